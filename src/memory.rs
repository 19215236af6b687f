use std::fmt;

use thiserror::Error;

/// Number of addressable words.
pub const MEMORY_SIZE: usize = 0x10000;

/// An address that does not name a memory cell. Kept wide so the offending value survives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("address {0} is outside memory")]
pub struct OutOfRange(pub i64);

/// Flat word-addressed memory, zero-initialised.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    cells: Box<[u16]>,
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        // Allocated on the heap directly; a 128KB array would pass through the stack first
        Memory {
            cells: vec![0; MEMORY_SIZE].into_boxed_slice(),
        }
    }

    fn index(addr: i64) -> Result<usize, OutOfRange> {
        usize::try_from(addr)
            .ok()
            .filter(|i| *i < MEMORY_SIZE)
            .ok_or(OutOfRange(addr))
    }

    pub fn read(&self, addr: impl Into<i64>) -> Result<u16, OutOfRange> {
        let addr = addr.into();
        Ok(self.cells[Memory::index(addr)?])
    }

    pub fn write(&mut self, addr: impl Into<i64>, value: u16) -> Result<(), OutOfRange> {
        let addr = addr.into();
        self.cells[Memory::index(addr)?] = value;
        Ok(())
    }

    /// Any `u16` names a cell, so these can't fail.
    pub fn get(&self, addr: u16) -> u16 {
        self.cells[usize::from(addr)]
    }

    pub fn set(&mut self, addr: u16, value: u16) {
        self.cells[usize::from(addr)] = value;
    }

    /// Copy `words` to consecutive cells from `base`. Nothing is written unless all of them fit.
    pub fn load(&mut self, base: u16, words: &[u16]) -> Result<(), OutOfRange> {
        let start = usize::from(base);
        let end = start + words.len();
        if end > MEMORY_SIZE {
            return Err(OutOfRange(end as i64 - 1));
        }
        self.cells[start..end].copy_from_slice(words);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.cells
    }

    pub fn clear(&mut self) {
        self.cells.fill(0);
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.cells.iter().filter(|w| **w != 0).count();
        f.debug_struct("Memory").field("nonzero_cells", &used).finish()
    }
}

use std::{
    cmp::Ordering,
    ops::{Index, IndexMut},
};

use crate::symbol::Register;

/// Result sign of the last register write. Values are the PSR bits they occupy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Condition {
    N = 0b100,
    Z = 0b010,
    P = 0b001,
}

impl Condition {
    /// Condition for `value` read as two's complement.
    pub fn of(value: u16) -> Condition {
        match (value as i16).cmp(&0) {
            Ordering::Less => Condition::N,
            Ordering::Equal => Condition::Z,
            Ordering::Greater => Condition::P,
        }
    }

    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// Architectural registers of the processor.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct RegisterFile {
    reg: [u16; 8],
    /// Program counter
    pub pc: u16,
    /// Instruction register, the word currently executing
    pub ir: u16,
    /// Processor status register. Only the low three bits (condition codes) are used.
    pub psr: u16,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile::default()
    }

    pub fn general(&self) -> &[u16; 8] {
        &self.reg
    }

    /// Condition code currently held in the PSR, if exactly one is set.
    pub fn condition(&self) -> Option<Condition> {
        match self.psr & 0b111 {
            0b100 => Some(Condition::N),
            0b010 => Some(Condition::Z),
            0b001 => Some(Condition::P),
            _ => None,
        }
    }

    /// Replace the condition code bits, leaving the rest of the PSR alone.
    pub fn set_condition(&mut self, cc: Condition) {
        self.psr = (self.psr & !0b111) | cc.bits();
    }

    /// Write `value` to `dr` and update the condition codes from it.
    pub fn write_result(&mut self, dr: Register, value: u16) {
        self[dr] = value;
        self.set_condition(Condition::of(value));
    }
}

impl Index<Register> for RegisterFile {
    type Output = u16;

    fn index(&self, r: Register) -> &Self::Output {
        &self.reg[r.index()]
    }
}

impl IndexMut<Register> for RegisterFile {
    fn index_mut(&mut self, r: Register) -> &mut Self::Output {
        &mut self.reg[r.index()]
    }
}

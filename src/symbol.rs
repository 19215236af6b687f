use std::{fmt, str::FromStr};

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Symbol table of label -> memory address.
///
/// Insertion order is kept so that two assemblies of the same source compare equal entry by
/// entry.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct SymbolTable {
    map: FxMap<String, u16>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            map: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Define `label`. Returns the existing address if the label is already defined, leaving the
    /// table unchanged.
    pub fn insert(&mut self, label: &str, addr: u16) -> Result<(), u16> {
        if let Some(&prev) = self.map.get(label) {
            return Err(prev);
        }
        self.map.insert(label.to_string(), addr);
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<u16> {
        self.map.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> + '_ {
        self.map.iter().map(|(label, addr)| (label.as_str(), *addr))
    }
}

/// Represents the CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    /// Stack pointer by convention, used by RTI.
    R6,
    /// Link register for JSR, JSRR and TRAP.
    R7,
}

impl Register {
    pub const ALL: [Register; 8] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
    ];

    /// Register for a 3-bit field value. Panics on anything wider, which would mean a field was
    /// extracted with the wrong width.
    pub fn from_index(index: u16) -> Register {
        assert!(index < 8, "register index {index} does not fit in 3 bits");
        Register::ALL[index as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Register {
    type Err = ();

    /// Accepts `R0`..`R7` in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some('r' | 'R'), Some(n @ '0'..='7'), None) => {
                Ok(Register::ALL[n as usize - '0' as usize])
            }
            _ => Err(()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.index())
    }
}

/// Condition codes a branch tests for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flag {
    /// -
    N,
    /// 0
    Z,
    /// +
    P,
    /// <= 0
    Nz,
    /// >= 0
    Zp,
    /// != 0
    Np,
    /// Unconditional
    Nzp,
}

impl Flag {
    /// Value of the `n`, `z`, `p` bits (11..9) of a BR instruction.
    pub fn nzp(self) -> u16 {
        match self {
            Flag::N => 0b100,
            Flag::Z => 0b010,
            Flag::P => 0b001,
            Flag::Nz => 0b110,
            Flag::Zp => 0b011,
            Flag::Np => 0b101,
            Flag::Nzp => 0b111,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstrKind {
    Add,
    And,
    Br(Flag),
    Jmp,
    Jsr,
    Jsrr,
    Ld,
    Ldi,
    Ldr,
    Lea,
    Not,
    Ret,
    Rti,
    St,
    Sti,
    Str,
    Trap(TrapKind),
}

impl FromStr for InstrKind {
    type Err = ();

    /// Mnemonics are matched case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_uppercase().as_str() {
            "ADD" => InstrKind::Add,
            "AND" => InstrKind::And,
            "BR" | "BRNZP" => InstrKind::Br(Flag::Nzp),
            "BRN" => InstrKind::Br(Flag::N),
            "BRZ" => InstrKind::Br(Flag::Z),
            "BRP" => InstrKind::Br(Flag::P),
            "BRNZ" => InstrKind::Br(Flag::Nz),
            "BRZP" => InstrKind::Br(Flag::Zp),
            "BRNP" => InstrKind::Br(Flag::Np),
            "JMP" => InstrKind::Jmp,
            "JSR" => InstrKind::Jsr,
            "JSRR" => InstrKind::Jsrr,
            "LD" => InstrKind::Ld,
            "LDI" => InstrKind::Ldi,
            "LDR" => InstrKind::Ldr,
            "LEA" => InstrKind::Lea,
            "NOT" => InstrKind::Not,
            "RET" => InstrKind::Ret,
            "RTI" => InstrKind::Rti,
            "ST" => InstrKind::St,
            "STI" => InstrKind::Sti,
            "STR" => InstrKind::Str,
            "TRAP" => InstrKind::Trap(TrapKind::Generic),
            "GETC" => InstrKind::Trap(TrapKind::Getc),
            "OUT" => InstrKind::Trap(TrapKind::Out),
            "PUTS" => InstrKind::Trap(TrapKind::Puts),
            "IN" => InstrKind::Trap(TrapKind::In),
            "PUTSP" => InstrKind::Trap(TrapKind::Putsp),
            "HALT" => InstrKind::Trap(TrapKind::Halt),
            _ => return Err(()),
        };
        Ok(kind)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrapKind {
    /// `TRAP` with an explicit vector operand.
    Generic,
    Getc,
    Out,
    Puts,
    In,
    Putsp,
    Halt,
}

impl TrapKind {
    /// Fixed vector of an alias. `None` for a plain `TRAP`.
    pub fn vector(self) -> Option<u8> {
        match self {
            TrapKind::Generic => None,
            TrapKind::Getc => Some(0x20),
            TrapKind::Out => Some(0x21),
            TrapKind::Puts => Some(0x22),
            TrapKind::In => Some(0x23),
            TrapKind::Putsp => Some(0x24),
            TrapKind::Halt => Some(HALT_VECTOR),
        }
    }
}

/// Trap vector that stops the run loop.
pub const HALT_VECTOR: u8 = 0x25;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirKind {
    Orig,
    End,
    Stringz,
    Blkw,
    Fill,
}

impl FromStr for DirKind {
    type Err = ();

    /// Takes the directive name including its leading `.`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_uppercase().as_str() {
            ".ORIG" => DirKind::Orig,
            ".END" => DirKind::End,
            ".STRINGZ" => DirKind::Stringz,
            ".BLKW" => DirKind::Blkw,
            ".FILL" => DirKind::Fill,
            _ => return Err(()),
        };
        Ok(kind)
    }
}

impl fmt::Display for DirKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirKind::Orig => ".ORIG",
            DirKind::End => ".END",
            DirKind::Stringz => ".STRINGZ",
            DirKind::Blkw => ".BLKW",
            DirKind::Fill => ".FILL",
        };
        f.write_str(name)
    }
}

//! Declarative instruction layouts.
//!
//! Every opcode is described once, as a list of segments covering bits 11..0 from the most
//! significant end. The assembler encodes through the same table the processor decodes through,
//! so the two can never disagree about where a field lives.

use std::fmt;

use thiserror::Error;

use crate::word;

/// Primary opcode, bits 15..12 of every instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Opcode {
    Br = 0x0,
    Add = 0x1,
    Ld = 0x2,
    St = 0x3,
    Jsr = 0x4,
    And = 0x5,
    Ldr = 0x6,
    Str = 0x7,
    Rti = 0x8,
    Not = 0x9,
    Ldi = 0xA,
    Sti = 0xB,
    Jmp = 0xC,
    /// Unassigned. Never present in a [`FormatTable`].
    Reserved = 0xD,
    Lea = 0xE,
    Trap = 0xF,
}

impl Opcode {
    pub const ALL: [Opcode; 16] = [
        Opcode::Br,
        Opcode::Add,
        Opcode::Ld,
        Opcode::St,
        Opcode::Jsr,
        Opcode::And,
        Opcode::Ldr,
        Opcode::Str,
        Opcode::Rti,
        Opcode::Not,
        Opcode::Ldi,
        Opcode::Sti,
        Opcode::Jmp,
        Opcode::Reserved,
        Opcode::Lea,
        Opcode::Trap,
    ];

    /// Opcode held in the top four bits of `word`.
    pub fn of(word: u16) -> Opcode {
        Opcode::ALL[(word >> 12) as usize]
    }

    pub fn tag(self) -> u16 {
        self as u16
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FieldName {
    Dr,
    Sr,
    Sr1,
    Sr2,
    BaseR,
    Imm5,
    Offset6,
    PcOffset9,
    PcOffset11,
    TrapVect8,
    N,
    Z,
    P,
}

impl FieldName {
    pub const COUNT: usize = 13;

    pub fn name(self) -> &'static str {
        match self {
            FieldName::Dr => "DR",
            FieldName::Sr => "SR",
            FieldName::Sr1 => "SR1",
            FieldName::Sr2 => "SR2",
            FieldName::BaseR => "BaseR",
            FieldName::Imm5 => "imm5",
            FieldName::Offset6 => "offset6",
            FieldName::PcOffset9 => "PCoffset9",
            FieldName::PcOffset11 => "PCoffset11",
            FieldName::TrapVect8 => "trapvect8",
            FieldName::N => "n",
            FieldName::Z => "z",
            FieldName::P => "p",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, variable part of an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Field {
    pub name: FieldName,
    pub width: u8,
    pub signed: bool,
}

impl Field {
    /// Inclusive range of values this field accepts.
    pub fn bounds(&self) -> (i64, i64) {
        word::bounds(self.width.into(), self.signed)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Segment {
    Field(Field),
    /// Bits that always hold `value`. Mode selector bits are written this way too.
    Fixed { width: u8, value: u16 },
}

impl Segment {
    pub fn width(&self) -> u32 {
        match self {
            Segment::Field(field) => field.width.into(),
            Segment::Fixed { width, .. } => (*width).into(),
        }
    }
}

#[derive(PartialEq, Eq, Debug)]
pub struct Layout {
    /// Most significant first, covering bits 11..0 exactly.
    pub segments: &'static [Segment],
}

impl Layout {
    /// Every segment with the inclusive `(high, low)` bits it occupies.
    pub fn placed(&self) -> impl Iterator<Item = (u32, u32, Segment)> + '_ {
        let mut next_high = 11i32;
        self.segments.iter().map(move |seg| {
            let high = next_high as u32;
            let low = high + 1 - seg.width();
            next_high = low as i32 - 1;
            (high, low, *seg)
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Field(field) => Some(*field),
            Segment::Fixed { .. } => None,
        })
    }

    fn width(&self) -> u32 {
        self.segments.iter().map(Segment::width).sum()
    }
}

/// All layouts of one opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Format {
    pub opcode: Opcode,
    /// Bit that picks the layout. Layout `n` is used when the bit reads `n`.
    pub selector: Option<u32>,
    pub layouts: &'static [Layout],
}

impl Format {
    /// Index of the layout `word` is written in.
    pub fn mode_of(&self, word: u16) -> u16 {
        match self.selector {
            Some(bit) => word::extract_field(word, bit, bit, false),
            None => 0,
        }
    }
}

/// Which of a layout's fields are set, and to what.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet {
    values: [Option<i32>; FieldName::COUNT],
}

impl FieldSet {
    pub fn new() -> Self {
        FieldSet::default()
    }

    pub fn with(mut self, name: FieldName, value: i32) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: FieldName, value: i32) {
        self.values[name as usize] = Some(value);
    }

    pub fn get(&self, name: FieldName) -> Option<i32> {
        self.values[name as usize]
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            FieldName::Dr,
            FieldName::Sr,
            FieldName::Sr1,
            FieldName::Sr2,
            FieldName::BaseR,
            FieldName::Imm5,
            FieldName::Offset6,
            FieldName::PcOffset9,
            FieldName::PcOffset11,
            FieldName::TrapVect8,
            FieldName::N,
            FieldName::Z,
            FieldName::P,
        ];
        f.debug_map()
            .entries(
                names
                    .iter()
                    .filter_map(|name| self.get(*name).map(|value| (name.name(), value))),
            )
            .finish()
    }
}

/// Whether decoding checks the constant bits of a layout.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Decoding {
    /// Constant bits must hold their documented values.
    #[default]
    Strict,
    /// Constant bits are ignored.
    Lenient,
}

/// A decoded word: which opcode, which of its layouts, and the field values.
///
/// Signed fields are sign-extended, everything else is read unsigned.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Decoded {
    pub opcode: Opcode,
    pub mode: u16,
    pub fields: FieldSet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("opcode {0:?} has no format")]
    UnknownOpcode(Opcode),
    #[error("{opcode:?} expects {expected:#b} in bits {high}..={low}, found {found:#b}")]
    ConstantBits {
        opcode: Opcode,
        high: u32,
        low: u32,
        expected: u16,
        found: u16,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("opcode {0:?} has no format")]
    UnknownOpcode(Opcode),
    #[error("{opcode:?} has no layout {mode}")]
    UnknownMode { opcode: Opcode, mode: u16 },
    #[error("field {0} was not provided")]
    MissingField(FieldName),
    #[error("{field} value {value} is outside {min}..={max}")]
    Overflow {
        field: FieldName,
        value: i64,
        min: i64,
        max: i64,
    },
}

// Layout building blocks

const fn reg(name: FieldName) -> Segment {
    Segment::Field(Field {
        name,
        width: 3,
        signed: false,
    })
}

const fn flag(name: FieldName) -> Segment {
    Segment::Field(Field {
        name,
        width: 1,
        signed: false,
    })
}

const fn signed(name: FieldName, width: u8) -> Segment {
    Segment::Field(Field {
        name,
        width,
        signed: true,
    })
}

const fn fixed(width: u8, value: u16) -> Segment {
    Segment::Fixed { width, value }
}

use FieldName as F;

const BR: &[Layout] = &[Layout {
    segments: &[
        flag(F::N),
        flag(F::Z),
        flag(F::P),
        signed(F::PcOffset9, 9),
    ],
}];

// ADD and AND share their layouts, selected by bit 5
const ARITH: &[Layout] = &[
    Layout {
        segments: &[reg(F::Dr), reg(F::Sr1), fixed(3, 0b000), reg(F::Sr2)],
    },
    Layout {
        segments: &[reg(F::Dr), reg(F::Sr1), fixed(1, 1), signed(F::Imm5, 5)],
    },
];

const PC_RELATIVE: &[Layout] = &[Layout {
    segments: &[reg(F::Dr), signed(F::PcOffset9, 9)],
}];

const STORE_PC_RELATIVE: &[Layout] = &[Layout {
    segments: &[reg(F::Sr), signed(F::PcOffset9, 9)],
}];

const BASE_OFFSET: &[Layout] = &[Layout {
    segments: &[reg(F::Dr), reg(F::BaseR), signed(F::Offset6, 6)],
}];

const STORE_BASE_OFFSET: &[Layout] = &[Layout {
    segments: &[reg(F::Sr), reg(F::BaseR), signed(F::Offset6, 6)],
}];

// JSRR is layout 0 and JSR layout 1, selected by bit 11
const JSR: &[Layout] = &[
    Layout {
        segments: &[fixed(3, 0b000), reg(F::BaseR), fixed(6, 0)],
    },
    Layout {
        segments: &[fixed(1, 1), signed(F::PcOffset11, 11)],
    },
];

const RTI: &[Layout] = &[Layout {
    segments: &[fixed(12, 0)],
}];

const NOT: &[Layout] = &[Layout {
    segments: &[reg(F::Dr), reg(F::Sr), fixed(6, 0b111111)],
}];

const JMP: &[Layout] = &[Layout {
    segments: &[fixed(3, 0b000), reg(F::BaseR), fixed(6, 0)],
}];

const TRAP: &[Layout] = &[Layout {
    segments: &[
        fixed(4, 0),
        Segment::Field(Field {
            name: F::TrapVect8,
            width: 8,
            signed: false,
        }),
    ],
}];

/// Layout index of the register form of ADD and AND.
pub const REG_MODE: u16 = 0;
/// Layout index of the immediate form of ADD and AND.
pub const IMM_MODE: u16 = 1;
/// Layout index of JSRR.
pub const JSRR_MODE: u16 = 0;
/// Layout index of JSR.
pub const JSR_MODE: u16 = 1;

/// Owned lookup from opcode to format. Build it once and hand it to whatever encodes or decodes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FormatTable {
    formats: [Option<Format>; 16],
}

impl Default for FormatTable {
    fn default() -> Self {
        FormatTable::lc3()
    }
}

impl FormatTable {
    /// The standard LC3 instruction set.
    pub fn lc3() -> Self {
        let format = |opcode: Opcode, selector: Option<u32>, layouts: &'static [Layout]| {
            Some(Format {
                opcode,
                selector,
                layouts,
            })
        };
        let table = FormatTable {
            formats: [
                format(Opcode::Br, None, BR),
                format(Opcode::Add, Some(5), ARITH),
                format(Opcode::Ld, None, PC_RELATIVE),
                format(Opcode::St, None, STORE_PC_RELATIVE),
                format(Opcode::Jsr, Some(11), JSR),
                format(Opcode::And, Some(5), ARITH),
                format(Opcode::Ldr, None, BASE_OFFSET),
                format(Opcode::Str, None, STORE_BASE_OFFSET),
                format(Opcode::Rti, None, RTI),
                format(Opcode::Not, None, NOT),
                format(Opcode::Ldi, None, PC_RELATIVE),
                format(Opcode::Sti, None, STORE_PC_RELATIVE),
                format(Opcode::Jmp, None, JMP),
                None,
                format(Opcode::Lea, None, PC_RELATIVE),
                format(Opcode::Trap, None, TRAP),
            ],
        };
        for format in table.iter() {
            assert_eq!(format.layouts.len(), 1 << u32::from(format.selector.is_some()));
            for layout in format.layouts {
                assert_eq!(layout.width(), 12, "{:?} layout must cover 12 bits", format.opcode);
            }
        }
        table
    }

    pub fn format(&self, opcode: Opcode) -> Option<&Format> {
        self.formats[opcode as usize].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Format> + '_ {
        self.formats.iter().flatten()
    }

    pub fn layout(&self, opcode: Opcode, mode: u16) -> Option<&'static Layout> {
        self.format(opcode)
            .and_then(|format| format.layouts.get(mode as usize))
    }

    /// Assemble one word. Every field of the chosen layout must be present and in range.
    pub fn encode(&self, opcode: Opcode, mode: u16, fields: &FieldSet) -> Result<u16, EncodeError> {
        let format = self.format(opcode).ok_or(EncodeError::UnknownOpcode(opcode))?;
        let layout = format
            .layouts
            .get(mode as usize)
            .ok_or(EncodeError::UnknownMode { opcode, mode })?;

        let mut word = opcode.tag() << 12;
        for (high, low, seg) in layout.placed() {
            let bits = match seg {
                Segment::Fixed { value, .. } => value,
                Segment::Field(field) => {
                    let value = fields
                        .get(field.name)
                        .ok_or(EncodeError::MissingField(field.name))?;
                    word::encode(value.into(), field.width.into(), field.signed).map_err(|_| {
                        let (min, max) = field.bounds();
                        EncodeError::Overflow {
                            field: field.name,
                            value: value.into(),
                            min,
                            max,
                        }
                    })?
                }
            };
            word = word::insert_field(word, high, low, bits);
        }
        Ok(word)
    }

    pub fn decode(&self, word: u16) -> Result<Decoded, DecodeError> {
        self.decode_with(word, Decoding::Strict)
    }

    pub fn decode_with(&self, word: u16, decoding: Decoding) -> Result<Decoded, DecodeError> {
        let opcode = Opcode::of(word);
        let format = self.format(opcode).ok_or(DecodeError::UnknownOpcode(opcode))?;
        let mode = format.mode_of(word);
        let Some(layout) = format.layouts.get(mode as usize) else {
            unreachable!("{opcode:?} selector picked a missing layout");
        };

        let mut fields = FieldSet::new();
        for (high, low, seg) in layout.placed() {
            match seg {
                Segment::Fixed { value, .. } => {
                    let found = word::extract_field(word, high, low, false);
                    if decoding == Decoding::Strict && found != value {
                        return Err(DecodeError::ConstantBits {
                            opcode,
                            high,
                            low,
                            expected: value,
                            found,
                        });
                    }
                }
                Segment::Field(field) => {
                    let bits = word::extract_field(word, high, low, false);
                    fields.set(field.name, word::decode(bits, field.width.into(), field.signed));
                }
            }
        }
        Ok(Decoded {
            opcode,
            mode,
            fields,
        })
    }
}

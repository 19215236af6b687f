use crate::{
    format::{
        DecodeError, Decoded, Decoding, EncodeError, FieldName as F, FieldSet, FormatTable, Opcode,
        IMM_MODE, JSRR_MODE, JSR_MODE, REG_MODE,
    },
    symbol::Register,
};

/// Second source of ADD and AND.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Choice {
    Reg(Register),
    /// Sign-extended `imm5`
    Imm(i16),
}

/// A decoded instruction with typed operands. Offsets are already sign-extended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instruction {
    /// Add SR1 with the second source and store in DR
    Add {
        dr: Register,
        sr1: Register,
        src2: Choice,
    },
    /// Bitwise-and SR1 with the second source and store in DR
    And {
        dr: Register,
        sr1: Register,
        src2: Choice,
    },
    /// Bitwise complement of SR
    Not { dr: Register, sr: Register },
    /// Add the offset to PC if any condition in `nzp` is set
    Br { nzp: u16, pc_offset9: i16 },
    /// Set PC to BaseR. `RET` is `JMP R7`.
    Jmp { base_r: Register },
    /// Link R7 and jump relative to PC
    Jsr { pc_offset11: i16 },
    /// Link R7 and jump to BaseR
    Jsrr { base_r: Register },
    Ld { dr: Register, pc_offset9: i16 },
    Ldi { dr: Register, pc_offset9: i16 },
    Ldr {
        dr: Register,
        base_r: Register,
        offset6: i16,
    },
    /// Load the effective address itself
    Lea { dr: Register, pc_offset9: i16 },
    St { sr: Register, pc_offset9: i16 },
    Sti { sr: Register, pc_offset9: i16 },
    Str {
        sr: Register,
        base_r: Register,
        offset6: i16,
    },
    /// Pop PC and PSR from the stack at R6
    Rti,
    Trap { trapvect8: u8 },
}

fn field(decoded: &Decoded, name: F) -> i32 {
    match decoded.fields.get(name) {
        Some(value) => value,
        None => unreachable!("{:?} layout has no {name}", decoded.opcode),
    }
}

fn reg(decoded: &Decoded, name: F) -> Register {
    Register::from_index(field(decoded, name) as u16)
}

fn offset(decoded: &Decoded, name: F) -> i16 {
    field(decoded, name) as i16
}

impl Instruction {
    pub fn decode(
        table: &FormatTable,
        word: u16,
        decoding: Decoding,
    ) -> Result<Instruction, DecodeError> {
        Instruction::from_decoded(&table.decode_with(word, decoding)?)
    }

    /// Give names and types to the fields of a table decode.
    pub fn from_decoded(d: &Decoded) -> Result<Instruction, DecodeError> {
        let src2 = |d: &Decoded| match d.mode {
            REG_MODE => Choice::Reg(reg(d, F::Sr2)),
            _ => Choice::Imm(offset(d, F::Imm5)),
        };
        let instr = match d.opcode {
            Opcode::Add => Instruction::Add {
                dr: reg(d, F::Dr),
                sr1: reg(d, F::Sr1),
                src2: src2(d),
            },
            Opcode::And => Instruction::And {
                dr: reg(d, F::Dr),
                sr1: reg(d, F::Sr1),
                src2: src2(d),
            },
            Opcode::Not => Instruction::Not {
                dr: reg(d, F::Dr),
                sr: reg(d, F::Sr),
            },
            Opcode::Br => Instruction::Br {
                nzp: (field(d, F::N) << 2 | field(d, F::Z) << 1 | field(d, F::P)) as u16,
                pc_offset9: offset(d, F::PcOffset9),
            },
            Opcode::Jmp => Instruction::Jmp {
                base_r: reg(d, F::BaseR),
            },
            Opcode::Jsr if d.mode == JSR_MODE => Instruction::Jsr {
                pc_offset11: offset(d, F::PcOffset11),
            },
            Opcode::Jsr => Instruction::Jsrr {
                base_r: reg(d, F::BaseR),
            },
            Opcode::Ld => Instruction::Ld {
                dr: reg(d, F::Dr),
                pc_offset9: offset(d, F::PcOffset9),
            },
            Opcode::Ldi => Instruction::Ldi {
                dr: reg(d, F::Dr),
                pc_offset9: offset(d, F::PcOffset9),
            },
            Opcode::Ldr => Instruction::Ldr {
                dr: reg(d, F::Dr),
                base_r: reg(d, F::BaseR),
                offset6: offset(d, F::Offset6),
            },
            Opcode::Lea => Instruction::Lea {
                dr: reg(d, F::Dr),
                pc_offset9: offset(d, F::PcOffset9),
            },
            Opcode::St => Instruction::St {
                sr: reg(d, F::Sr),
                pc_offset9: offset(d, F::PcOffset9),
            },
            Opcode::Sti => Instruction::Sti {
                sr: reg(d, F::Sr),
                pc_offset9: offset(d, F::PcOffset9),
            },
            Opcode::Str => Instruction::Str {
                sr: reg(d, F::Sr),
                base_r: reg(d, F::BaseR),
                offset6: offset(d, F::Offset6),
            },
            Opcode::Rti => Instruction::Rti,
            Opcode::Trap => Instruction::Trap {
                trapvect8: field(d, F::TrapVect8) as u8,
            },
            Opcode::Reserved => return Err(DecodeError::UnknownOpcode(Opcode::Reserved)),
        };
        Ok(instr)
    }

    /// Opcode, layout and fields that encode this instruction.
    pub fn lower(&self) -> (Opcode, u16, FieldSet) {
        let regs = |pairs: &[(F, Register)]| {
            pairs
                .iter()
                .fold(FieldSet::new(), |set, (name, r)| set.with(*name, r.index() as i32))
        };
        let arith = |opcode, dr: Register, sr1: Register, src2: Choice| {
            let set = regs(&[(F::Dr, dr), (F::Sr1, sr1)]);
            match src2 {
                Choice::Reg(sr2) => (opcode, REG_MODE, set.with(F::Sr2, sr2.index() as i32)),
                Choice::Imm(imm5) => (opcode, IMM_MODE, set.with(F::Imm5, imm5.into())),
            }
        };
        match *self {
            Instruction::Add { dr, sr1, src2 } => arith(Opcode::Add, dr, sr1, src2),
            Instruction::And { dr, sr1, src2 } => arith(Opcode::And, dr, sr1, src2),
            Instruction::Not { dr, sr } => (Opcode::Not, 0, regs(&[(F::Dr, dr), (F::Sr, sr)])),
            Instruction::Br { nzp, pc_offset9 } => (
                Opcode::Br,
                0,
                FieldSet::new()
                    .with(F::N, (nzp >> 2 & 1).into())
                    .with(F::Z, (nzp >> 1 & 1).into())
                    .with(F::P, (nzp & 1).into())
                    .with(F::PcOffset9, pc_offset9.into()),
            ),
            Instruction::Jmp { base_r } => (Opcode::Jmp, 0, regs(&[(F::BaseR, base_r)])),
            Instruction::Jsr { pc_offset11 } => (
                Opcode::Jsr,
                JSR_MODE,
                FieldSet::new().with(F::PcOffset11, pc_offset11.into()),
            ),
            Instruction::Jsrr { base_r } => (Opcode::Jsr, JSRR_MODE, regs(&[(F::BaseR, base_r)])),
            Instruction::Ld { dr, pc_offset9 } => (
                Opcode::Ld,
                0,
                regs(&[(F::Dr, dr)]).with(F::PcOffset9, pc_offset9.into()),
            ),
            Instruction::Ldi { dr, pc_offset9 } => (
                Opcode::Ldi,
                0,
                regs(&[(F::Dr, dr)]).with(F::PcOffset9, pc_offset9.into()),
            ),
            Instruction::Ldr {
                dr,
                base_r,
                offset6,
            } => (
                Opcode::Ldr,
                0,
                regs(&[(F::Dr, dr), (F::BaseR, base_r)]).with(F::Offset6, offset6.into()),
            ),
            Instruction::Lea { dr, pc_offset9 } => (
                Opcode::Lea,
                0,
                regs(&[(F::Dr, dr)]).with(F::PcOffset9, pc_offset9.into()),
            ),
            Instruction::St { sr, pc_offset9 } => (
                Opcode::St,
                0,
                regs(&[(F::Sr, sr)]).with(F::PcOffset9, pc_offset9.into()),
            ),
            Instruction::Sti { sr, pc_offset9 } => (
                Opcode::Sti,
                0,
                regs(&[(F::Sr, sr)]).with(F::PcOffset9, pc_offset9.into()),
            ),
            Instruction::Str {
                sr,
                base_r,
                offset6,
            } => (
                Opcode::Str,
                0,
                regs(&[(F::Sr, sr), (F::BaseR, base_r)]).with(F::Offset6, offset6.into()),
            ),
            Instruction::Rti => (Opcode::Rti, 0, FieldSet::new()),
            Instruction::Trap { trapvect8 } => (
                Opcode::Trap,
                0,
                FieldSet::new().with(F::TrapVect8, trapvect8.into()),
            ),
        }
    }

    pub fn encode(&self, table: &FormatTable) -> Result<u16, EncodeError> {
        let (opcode, mode, fields) = self.lower();
        table.encode(opcode, mode, &fields)
    }

    /// Register written by this instruction, if any. Every such write also sets the condition
    /// codes.
    pub fn destination(&self) -> Option<Register> {
        match *self {
            Instruction::Add { dr, .. }
            | Instruction::And { dr, .. }
            | Instruction::Not { dr, .. }
            | Instruction::Ld { dr, .. }
            | Instruction::Ldi { dr, .. }
            | Instruction::Ldr { dr, .. }
            | Instruction::Lea { dr, .. } => Some(dr),
            _ => None,
        }
    }
}

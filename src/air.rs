use tracing::trace;

use crate::{
    error::{self, AsmError, SimError},
    format::{
        EncodeError, FieldName as F, FieldSet, FormatTable, Opcode, IMM_MODE, JSRR_MODE, JSR_MODE,
        REG_MODE,
    },
    span::Span,
    symbol::{InstrKind, Register, SymbolTable, TrapKind},
    word,
};

/// Assembly intermediate representation: every statement with its address, and the symbol
/// table built while laying them out.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Air {
    /// Memory address the program is loaded at
    pub(crate) orig: u16,
    pub(crate) stmts: Vec<AirStmt>,
    pub(crate) symbols: SymbolTable,
}

/// Single LC3 statement at a known address. Labels are already in the symbol table.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AirStmt {
    pub line: usize,
    pub addr: u16,
    /// Covers the mnemonic or directive
    pub span: Span,
    pub kind: AirKind,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AirKind {
    Instr {
        kind: InstrKind,
        operands: Vec<Operand>,
    },
    Fill(Operand),
    /// Number of zero words to reserve
    Blkw(u16),
    /// Characters, without the terminating zero
    Stringz(Vec<u16>),
}

impl AirStmt {
    /// Words this statement occupies.
    pub fn size(&self) -> u32 {
        match &self.kind {
            AirKind::Instr { .. } | AirKind::Fill(_) => 1,
            AirKind::Blkw(n) => (*n).into(),
            AirKind::Stringz(chars) => chars.len() as u32 + 1,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Operand {
    pub kind: OperandKind,
    pub span: Span,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OperandKind {
    Reg(Register),
    Imm(i32),
    Symbol(String),
}

/// Assembled machine code and the symbols it was laid out with.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Program {
    pub orig: u16,
    pub words: Vec<u16>,
    pub symbols: SymbolTable,
}

impl Program {
    /// Origin followed by the words, the layout of an LC3 object file.
    pub fn to_raw(&self) -> Vec<u16> {
        let mut raw = Vec::with_capacity(self.words.len() + 1);
        raw.push(self.orig);
        raw.extend_from_slice(&self.words);
        raw
    }

    /// Inverse of [`Program::to_raw`]. Object files carry no symbols.
    pub fn from_raw(raw: &[u16]) -> Result<Program, SimError> {
        let (&orig, words) = raw.split_first().ok_or(SimError::ImageTooShort)?;
        Ok(Program {
            orig,
            words: words.to_vec(),
            symbols: SymbolTable::new(),
        })
    }

    /// Big-endian bytes of [`Program::to_raw`].
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.to_raw().iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    pub fn from_be_bytes(bytes: &[u8]) -> Result<Program, SimError> {
        if bytes.len() % 2 != 0 {
            return Err(SimError::MisalignedImage { len: bytes.len() });
        }
        let raw: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Program::from_raw(&raw)
    }
}

impl Air {
    pub fn orig(&self) -> u16 {
        self.orig
    }

    pub fn stmts(&self) -> &[AirStmt] {
        &self.stmts
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Second pass: resolve symbols and encode every statement through `table`.
    pub fn emit(&self, table: &FormatTable) -> Result<Program, AsmError> {
        let mut words = Vec::with_capacity(self.stmts.len());
        for stmt in &self.stmts {
            match &stmt.kind {
                AirKind::Instr { kind, operands } => {
                    let word = self.emit_instr(table, stmt, *kind, operands)?;
                    trace!(addr = %word::to_hex(stmt.addr), word = %word::to_hex(word), "emit");
                    words.push(word);
                }
                AirKind::Fill(op) => words.push(self.fill_value(stmt, op)?),
                AirKind::Blkw(n) => words.extend(std::iter::repeat(0).take((*n).into())),
                AirKind::Stringz(chars) => {
                    words.extend_from_slice(chars);
                    words.push(0);
                }
            }
        }
        Ok(Program {
            orig: self.orig,
            words,
            symbols: self.symbols.clone(),
        })
    }

    fn fill_value(&self, stmt: &AirStmt, op: &Operand) -> Result<u16, AsmError> {
        match &op.kind {
            OperandKind::Imm(value) => {
                let value = i64::from(*value);
                if !(-0x8000..=0xFFFF).contains(&value) {
                    return Err(error::range_overflow(
                        ".FILL",
                        value,
                        (-0x8000, 0xFFFF),
                        stmt.line,
                        op.span,
                    ));
                }
                Ok(value as u16)
            }
            OperandKind::Symbol(sym) => self
                .symbols
                .get(sym)
                .ok_or_else(|| error::undefined_symbol(sym, stmt.line, op.span)),
            OperandKind::Reg(_) => Err(error::syntax(
                ".FILL expects a literal or a label",
                None,
                stmt.line,
                op.span,
            )),
        }
    }

    /// Value of an immediate or PC-relative operand. Symbols resolve relative to the
    /// incremented PC of the statement.
    fn value(&self, stmt: &AirStmt, op: &Operand) -> Result<i32, AsmError> {
        match &op.kind {
            OperandKind::Imm(value) => Ok(*value),
            OperandKind::Symbol(sym) => {
                let target = self
                    .symbols
                    .get(sym)
                    .ok_or_else(|| error::undefined_symbol(sym, stmt.line, op.span))?;
                Ok(i32::from(target) - (i32::from(stmt.addr) + 1))
            }
            OperandKind::Reg(r) => Err(error::syntax(
                format!("Expected a literal or label, found register {r}"),
                Some("check the type of operands allowed for this instruction"),
                stmt.line,
                op.span,
            )),
        }
    }

    fn emit_instr(
        &self,
        table: &FormatTable,
        stmt: &AirStmt,
        kind: InstrKind,
        operands: &[Operand],
    ) -> Result<u16, AsmError> {
        let mut fields = Fields::new(stmt);
        let (opcode, mode) = match kind {
            InstrKind::Add | InstrKind::And => {
                let opcode = if kind == InstrKind::Add {
                    Opcode::Add
                } else {
                    Opcode::And
                };
                let [dr, sr1, src2] = arity::<3>(stmt, operands)?;
                fields.reg(F::Dr, dr)?;
                fields.reg(F::Sr1, sr1)?;
                if let OperandKind::Reg(_) = src2.kind {
                    fields.reg(F::Sr2, src2)?;
                    (opcode, REG_MODE)
                } else {
                    fields.set(F::Imm5, self.value(stmt, src2)?, src2);
                    (opcode, IMM_MODE)
                }
            }
            InstrKind::Not => {
                let [dr, sr] = arity::<2>(stmt, operands)?;
                fields.reg(F::Dr, dr)?;
                fields.reg(F::Sr, sr)?;
                (Opcode::Not, 0)
            }
            InstrKind::Br(flag) => {
                let [target] = arity::<1>(stmt, operands)?;
                let nzp = flag.nzp();
                fields.set(F::N, (nzp >> 2 & 1).into(), target);
                fields.set(F::Z, (nzp >> 1 & 1).into(), target);
                fields.set(F::P, (nzp & 1).into(), target);
                fields.set(F::PcOffset9, self.value(stmt, target)?, target);
                (Opcode::Br, 0)
            }
            InstrKind::Jmp => {
                let [base] = arity::<1>(stmt, operands)?;
                fields.reg(F::BaseR, base)?;
                (Opcode::Jmp, 0)
            }
            InstrKind::Ret => {
                arity::<0>(stmt, operands)?;
                fields.set(F::BaseR, Register::R7.index() as i32, stmt);
                (Opcode::Jmp, 0)
            }
            InstrKind::Jsr => {
                let [target] = arity::<1>(stmt, operands)?;
                if let OperandKind::Reg(_) = target.kind {
                    return Err(error::syntax(
                        "JSR takes a label or offset",
                        Some("use JSRR to jump to an address held in a register"),
                        stmt.line,
                        target.span,
                    ));
                }
                fields.set(F::PcOffset11, self.value(stmt, target)?, target);
                (Opcode::Jsr, JSR_MODE)
            }
            InstrKind::Jsrr => {
                let [base] = arity::<1>(stmt, operands)?;
                fields.reg(F::BaseR, base)?;
                (Opcode::Jsr, JSRR_MODE)
            }
            InstrKind::Ld | InstrKind::Ldi | InstrKind::Lea => {
                let [dr, target] = arity::<2>(stmt, operands)?;
                fields.reg(F::Dr, dr)?;
                fields.set(F::PcOffset9, self.value(stmt, target)?, target);
                let opcode = match kind {
                    InstrKind::Ld => Opcode::Ld,
                    InstrKind::Ldi => Opcode::Ldi,
                    _ => Opcode::Lea,
                };
                (opcode, 0)
            }
            InstrKind::St | InstrKind::Sti => {
                let [sr, target] = arity::<2>(stmt, operands)?;
                fields.reg(F::Sr, sr)?;
                fields.set(F::PcOffset9, self.value(stmt, target)?, target);
                let opcode = if kind == InstrKind::St {
                    Opcode::St
                } else {
                    Opcode::Sti
                };
                (opcode, 0)
            }
            InstrKind::Ldr | InstrKind::Str => {
                let [reg, base, offset] = arity::<3>(stmt, operands)?;
                if kind == InstrKind::Ldr {
                    fields.reg(F::Dr, reg)?;
                } else {
                    fields.reg(F::Sr, reg)?;
                }
                fields.reg(F::BaseR, base)?;
                fields.set(F::Offset6, self.value(stmt, offset)?, offset);
                let opcode = if kind == InstrKind::Ldr {
                    Opcode::Ldr
                } else {
                    Opcode::Str
                };
                (opcode, 0)
            }
            InstrKind::Rti => {
                arity::<0>(stmt, operands)?;
                (Opcode::Rti, 0)
            }
            InstrKind::Trap(TrapKind::Generic) => {
                let [vect] = arity::<1>(stmt, operands)?;
                fields.set(F::TrapVect8, self.value(stmt, vect)?, vect);
                (Opcode::Trap, 0)
            }
            InstrKind::Trap(alias) => {
                arity::<0>(stmt, operands)?;
                let vect = alias.vector().map_or(0, i32::from);
                fields.set(F::TrapVect8, vect, stmt);
                (Opcode::Trap, 0)
            }
        };
        fields.encode(table, opcode, mode)
    }
}

/// Require exactly `N` operands.
fn arity<'o, const N: usize>(
    stmt: &AirStmt,
    operands: &'o [Operand],
) -> Result<&'o [Operand; N], AsmError> {
    operands.try_into().map_err(|_| {
        let span = operands.get(N).map_or(stmt.span, |op| op.span);
        error::syntax(
            format!("Expected {N} operands, found {}", operands.len()),
            Some("check the number of operands for this instruction"),
            stmt.line,
            span,
        )
    })
}

/// Something with a source location, so field errors can point at the operand that caused them.
trait Spanned {
    fn span(&self) -> Span;
}

impl Spanned for Operand {
    fn span(&self) -> Span {
        self.span
    }
}

impl Spanned for AirStmt {
    fn span(&self) -> Span {
        self.span
    }
}

/// Field values of one instruction along with where each came from.
struct Fields<'s> {
    stmt: &'s AirStmt,
    set: FieldSet,
    spans: Vec<(F, Span)>,
}

impl<'s> Fields<'s> {
    fn new(stmt: &'s AirStmt) -> Self {
        Fields {
            stmt,
            set: FieldSet::new(),
            spans: Vec::new(),
        }
    }

    fn set(&mut self, name: F, value: i32, from: &impl Spanned) {
        self.set.set(name, value);
        self.spans.push((name, from.span()));
    }

    fn reg(&mut self, name: F, op: &Operand) -> Result<(), AsmError> {
        match op.kind {
            OperandKind::Reg(r) => {
                self.set(name, r.index() as i32, op);
                Ok(())
            }
            _ => Err(error::syntax(
                format!("Expected a register for {name}"),
                Some("registers are written R0 to R7"),
                self.stmt.line,
                op.span,
            )),
        }
    }

    fn encode(self, table: &FormatTable, opcode: Opcode, mode: u16) -> Result<u16, AsmError> {
        table.encode(opcode, mode, &self.set).map_err(|err| match err {
            EncodeError::Overflow {
                field,
                value,
                min,
                max,
            } => {
                let span = self
                    .spans
                    .iter()
                    .find(|(name, _)| *name == field)
                    .map_or(self.stmt.span, |(_, span)| *span);
                error::range_overflow(field.name(), value, (min, max), self.stmt.line, span)
            }
            other => unreachable!("{opcode:?} encoding is missing a case: {other}"),
        })
    }
}

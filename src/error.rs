use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::span::Span;

/// Everything that can abort an assembly. Each variant points at the offending source line.
///
/// These carry spans but not the source text; attach it with
/// [`miette::Report::with_source_code`] (see [`crate::report`]).
#[derive(Clone, Debug, PartialEq, Eq, Error, Diagnostic)]
pub enum AsmError {
    #[error("{message}")]
    #[diagnostic(code(parse::syntax))]
    Syntax {
        message: String,
        line: usize,
        #[label("here")]
        span: SourceSpan,
        #[help]
        help: Option<&'static str>,
    },

    #[error("Undefined symbol `{symbol}` on line {line}")]
    #[diagnostic(
        code(asm::undefined_symbol),
        help("labels must be defined somewhere before `.END`")
    )]
    UndefinedSymbol {
        symbol: String,
        line: usize,
        #[label("undefined label")]
        span: SourceSpan,
    },

    #[error("Duplicate label `{symbol}` on line {line}, already defined at x{first:04X}")]
    #[diagnostic(
        code(parse::duplicate_label),
        help("prefix labels are only allowed once per file")
    )]
    DuplicateSymbol {
        symbol: String,
        line: usize,
        first: u16,
        #[label("duplicate label")]
        span: SourceSpan,
    },

    #[error("Value {value} does not fit in {field} ({min}..={max}) on line {line}")]
    #[diagnostic(
        code(asm::range_overflow),
        help("use a smaller literal or move the label closer to this instruction")
    )]
    RangeOverflow {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
        line: usize,
        #[label("out-of-range value")]
        span: SourceSpan,
    },
}

impl AsmError {
    /// 1-based source line the error was raised on.
    pub fn line(&self) -> usize {
        match self {
            AsmError::Syntax { line, .. }
            | AsmError::UndefinedSymbol { line, .. }
            | AsmError::DuplicateSymbol { line, .. }
            | AsmError::RangeOverflow { line, .. } => *line,
        }
    }

    pub fn span(&self) -> SourceSpan {
        match self {
            AsmError::Syntax { span, .. }
            | AsmError::UndefinedSymbol { span, .. }
            | AsmError::DuplicateSymbol { span, .. }
            | AsmError::RangeOverflow { span, .. } => *span,
        }
    }
}

// Constructors used by both assembler passes

pub fn syntax(
    message: impl Into<String>,
    help: Option<&'static str>,
    line: usize,
    span: Span,
) -> AsmError {
    AsmError::Syntax {
        message: message.into(),
        line,
        span: span.into(),
        help,
    }
}

pub fn undefined_symbol(symbol: &str, line: usize, span: Span) -> AsmError {
    AsmError::UndefinedSymbol {
        symbol: symbol.to_string(),
        line,
        span: span.into(),
    }
}

pub fn duplicate_symbol(symbol: &str, first: u16, line: usize, span: Span) -> AsmError {
    AsmError::DuplicateSymbol {
        symbol: symbol.to_string(),
        line,
        first,
        span: span.into(),
    }
}

pub fn range_overflow(
    field: &'static str,
    value: i64,
    (min, max): (i64, i64),
    line: usize,
    span: Span,
) -> AsmError {
    AsmError::RangeOverflow {
        field,
        value,
        min,
        max,
        line,
        span: span.into(),
    }
}

/// Fatal conditions raised by the processor. The run loop stops at the first one.
#[derive(Clone, Debug, PartialEq, Eq, Error, Diagnostic)]
pub enum SimError {
    #[error("Unsupported instruction x{word:04X} at x{pc:04X}")]
    #[diagnostic(
        code(sim::unsupported_opcode),
        help("opcode 1101 is reserved; other opcodes must keep their constant bits")
    )]
    UnsupportedOpcode { word: u16, pc: u16 },

    #[error("Address {address} is outside memory (instruction at x{pc:04X})")]
    #[diagnostic(code(sim::memory_out_of_range))]
    MemoryOutOfRange { address: i64, pc: u16 },

    #[error("Object image is empty, expected an origin word")]
    #[diagnostic(code(sim::image_too_short))]
    ImageTooShort,

    #[error("Object image is {len} bytes, which is not aligned to 16 bits")]
    #[diagnostic(code(sim::misaligned_image))]
    MisalignedImage { len: usize },
}

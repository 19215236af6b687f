//! Two-pass assembler and cycle-stepped processor core for the LC3.
//!
//! Both halves share one [`FormatTable`]: the assembler packs operand fields through it and the
//! processor unpacks them through it.
//!
//! ```
//! use lc3sim::{assemble, FormatTable, Processor, Stop};
//!
//! let table = FormatTable::lc3();
//! let program = assemble(".ORIG x3000\nADD R0, R0, #5\nHALT\n.END", &table)?;
//! assert_eq!(program.words, vec![0x1025, 0xF025]);
//!
//! let mut cpu = Processor::new(&table);
//! cpu.load_program(&program)?;
//! assert_eq!(cpu.run()?, Stop::Halted);
//! assert_eq!(cpu.registers().general()[0], 5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use miette::{Diagnostic, Report};
use tracing::debug;

// Shared contract
pub mod word;
pub mod format;
pub mod ops;

// Assembling
pub mod lexer;
pub mod span;
mod parser;
pub use parser::AsmParser;
mod air;
pub use air::{Air, AirKind, AirStmt, Operand, OperandKind, Program};
pub mod symbol;

// Running
mod memory;
pub use memory::{Memory, OutOfRange, MEMORY_SIZE};
mod state;
pub use state::{Condition, RegisterFile};
mod runtime;
pub use runtime::{Processor, Status, Stop};

mod error;
pub use error::{AsmError, SimError};
pub mod features;
pub mod env;
pub use env::Config;
pub use format::FormatTable;

/// Translate LC3 assembly into machine words. Fails on the first error, producing nothing.
pub fn assemble(src: &str, table: &FormatTable) -> Result<Program, AsmError> {
    let air = AsmParser::new(src).parse()?;
    let program = air.emit(table)?;
    debug!(
        orig = %word::to_hex(program.orig),
        words = program.words.len(),
        symbols = program.symbols.len(),
        "assembled"
    );
    Ok(program)
}

/// Attach `src` to an error so it renders with the offending line highlighted.
pub fn report<E>(err: E, src: &str) -> Report
where
    E: Diagnostic + Send + Sync + 'static,
{
    Report::new(err).with_source_code(src.to_string())
}

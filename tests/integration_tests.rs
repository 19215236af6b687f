use lc3sim::{
    assemble, format::FormatTable, ops::Instruction, report, AsmError, Processor, SimError,
    Status, Stop,
};
use rstest::rstest;

fn asm(src: &str) -> Result<lc3sim::Program, AsmError> {
    assemble(src, &FormatTable::lc3())
}

#[test]
fn single_add() {
    let program = asm(".ORIG x3000\nADD R0, R0, #5\n.END").unwrap();
    assert_eq!(program.orig, 0x3000);
    assert_eq!(program.words, vec![0x1025]);
}

#[test]
fn backward_branch() {
    let src = "\
.ORIG x3000
        LD R1, COUNT
LOOP:   ADD R1,R1,#-1
        BRp LOOP
        HALT
COUNT   .FILL #3
.END";
    let program = asm(src).unwrap();
    assert_eq!(program.symbols.get("LOOP"), Some(0x3001));
    // BRp at x3002, so the offset is x3001 - x3003 = -2
    assert_eq!(program.words[2], 0x03FE);
    assert_eq!(program.words[0], 0x2203);
    assert_eq!(program.words[4], 3);
}

#[test_log::test]
fn counting_program_halts() {
    let table = FormatTable::lc3();
    let mut cpu = Processor::new(&table);
    cpu.load(
        0x3000,
        &[0x2406, 0x2206, 0x127f, 0x7fe, 0x14bf, 0x7fb, 0xf025, 0xa, 0x7fff],
    )
    .unwrap();
    assert_eq!(cpu.run(), Ok(Stop::Halted));
    let regs = cpu.registers();
    assert_eq!(regs[lc3sim::symbol::Register::R1], 0xFFFF);
    assert_eq!(regs[lc3sim::symbol::Register::R2], 0xFFFF);
    assert_eq!(regs[lc3sim::symbol::Register::R7], 0x3007);
    assert_eq!(regs.psr & 0b111, 0b100);
    // 11 passes of the outer loop, each counting x7FFF down past zero, then the HALT
    assert_eq!(cpu.cycles(), 11 * (1 + 2 * 0x8000 + 2) + 1 + 1);
}

#[test]
fn fill_label_is_absolute() {
    let program = asm(".ORIG x3000\nLOOP ADD R0, R0, #1\nBR LOOP\nPTR .FILL LOOP\n.END").unwrap();
    assert_eq!(program.words[2], 0x3000);
}

#[test]
fn undefined_symbol_emits_nothing() {
    let err = asm(".ORIG x3000\nADD R0, R0, #1\nBRz NOWHERE\n.END").unwrap_err();
    match err {
        AsmError::UndefinedSymbol { symbol, line, .. } => {
            assert_eq!(symbol, "NOWHERE");
            assert_eq!(line, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn reserved_opcode_is_rejected() {
    let table = FormatTable::lc3();
    assert!(table.decode(0xD123).is_err());
    assert!(Instruction::decode(&table, 0xDFFF, Default::default()).is_err());

    let mut cpu = Processor::new(&table);
    cpu.load(0x3000, &[0xD000]).unwrap();
    assert_eq!(
        cpu.step(),
        Err(SimError::UnsupportedOpcode {
            word: 0xD000,
            pc: 0x3000
        })
    );
}

#[test]
fn empty_directives() {
    let program = asm(".ORIG x3000\nA .BLKW 0\nB .STRINGZ \"\"\nC HALT\n.END").unwrap();
    assert_eq!(program.words, vec![0, 0xF025]);
    assert_eq!(program.symbols.get("A"), Some(0x3000));
    assert_eq!(program.symbols.get("B"), Some(0x3000));
    assert_eq!(program.symbols.get("C"), Some(0x3001));
}

#[rstest]
#[case("ADD R1, R2, R3", 0x1283)]
#[case("and r0 r0 #0", 0x5020)]
#[case("NOT R4, R5", 0x997F)]
#[case("BR #-1", 0x0FFF)]
#[case("BRn x0", 0x0800)]
#[case("BRzp 3", 0x0603)]
#[case("JMP R3", 0xC0C0)]
#[case("RET", 0xC1C0)]
#[case("JSR #-1024", 0x4C00)]
#[case("JSRR R2", 0x4080)]
#[case("LD R0, #255", 0x20FF)]
#[case("LDI R7, x-100", 0xAF00)]
#[case("LDR R1, R6, #-32", 0x63A0)]
#[case("LEA R3, 0x10", 0xE610)]
#[case("ST R2, #0", 0x3400)]
#[case("STI R0, #1", 0xB001)]
#[case("STR R5, R6, #31", 0x7B9F)]
#[case("RTI", 0x8000)]
#[case("TRAP xFF", 0xF0FF)]
#[case("GETC", 0xF020)]
#[case("OUT", 0xF021)]
#[case("PUTS", 0xF022)]
#[case("IN", 0xF023)]
#[case("PUTSP", 0xF024)]
#[case("halt", 0xF025)]
fn encodes(#[case] line: &str, #[case] expected: u16) {
    let program = asm(&format!(".ORIG x3000\n{line}\n.END")).unwrap();
    assert_eq!(program.words, vec![expected], "{line}");
}

#[rstest]
#[case("ADD R0, R0, #16", "imm5")]
#[case("ADD R0, R0, #-17", "imm5")]
#[case("LDR R0, R0, #32", "offset6")]
#[case("BR #256", "PCoffset9")]
#[case("JSR #1024", "PCoffset11")]
#[case("TRAP #256", "trapvect8")]
#[case("TRAP #-1", "trapvect8")]
#[case(".FILL #65536", ".FILL")]
#[case(".FILL #-32769", ".FILL")]
fn range_overflow(#[case] line: &str, #[case] expected: &str) {
    let err = asm(&format!(".ORIG x3000\n{line}\n.END")).unwrap_err();
    assert!(
        matches!(err, AsmError::RangeOverflow { field, line: 2, .. } if field == expected),
        "{err:?}"
    );
}

#[test]
fn label_too_far() {
    let err = asm(".ORIG x3000\nLD R0, FAR\n.BLKW 300\nFAR .FILL 1\n.END").unwrap_err();
    assert!(matches!(
        err,
        AsmError::RangeOverflow {
            field: "PCoffset9",
            value: 300,
            ..
        }
    ));
}

#[rstest]
#[case("ADD R0, R0")]
#[case("ADD R0, R0, R1, R2")]
#[case("NOT R0, #1")]
#[case("JMP LABEL")]
#[case("JSR R1")]
#[case("RET R7")]
#[case("HALT #1")]
#[case("LD #1, #1")]
#[case("FOO R1")]
#[case("ADD R0, R0, \"str\"")]
#[case(".BLKW LABEL")]
fn syntax_errors(#[case] line: &str) {
    let err = asm(&format!(".ORIG x3000\nLABEL ADD R0, R0, #0\n{line}\n.END")).unwrap_err();
    assert!(matches!(err, AsmError::Syntax { line: 3, .. }), "{err:?}");
}

#[test]
fn duplicate_labels() {
    let err = asm(".ORIG x3000\nX ADD R0, R0, #0\nX: HALT\n.END").unwrap_err();
    assert!(matches!(
        err,
        AsmError::DuplicateSymbol {
            first: 0x3000,
            line: 3,
            ..
        }
    ));
}

#[test]
fn report_points_at_line() {
    let src = ".ORIG x3000\nBR MISSING\n.END";
    let err = asm(src).unwrap_err();
    let rendered = format!("{:?}", report(err, src));
    assert!(rendered.contains("MISSING"), "{rendered}");
    assert!(rendered.contains("asm::undefined_symbol"), "{rendered}");
}

#[test]
fn strings_and_escapes() {
    let program = asm(".ORIG x3000\nMSG .STRINGZ \"a\\n\\\"b\\\"\"\n.END").unwrap();
    assert_eq!(
        program.words,
        vec![b'a' as u16, b'\n' as u16, b'"' as u16, b'b' as u16, b'"' as u16, 0]
    );
}

#[test]
fn end_is_optional_and_final() {
    let with_end = asm(".ORIG x3000\nHALT\n.END\nthis is not assembly").unwrap();
    let without = asm(".ORIG x3000\nHALT").unwrap();
    assert_eq!(with_end, without);
}

/// Sum an array with a subroutine, then halt.
const SUM: &str = r#"
; Sum the numbers in DATA
        .ORIG x3000
MAIN    LEA R1, DATA        ; pointer
        LD R2, LEN          ; remaining
        AND R0, R0, #0      ; total
        JSR SUM
        ST R0, RESULT
        HALT

SUM     ADD R2, R2, #0
        BRz DONE
        LDR R3, R1, #0
        ADD R0, R0, R3
        ADD R1, R1, #1
        ADD R2, R2, #-1
        BR SUM
DONE    RET

LEN     .FILL #4
DATA    .FILL #10
        .FILL x-3
        .FILL #7
        .FILL 0x0010
RESULT  .BLKW 1
        .END
"#;

#[test_log::test]
fn subroutine_program() {
    let table = FormatTable::lc3();
    let program = assemble(SUM, &table).unwrap();
    let result = program.symbols.get("RESULT").unwrap();

    let mut cpu = Processor::new(&table);
    cpu.load_program(&program).unwrap();
    assert_eq!(cpu.run(), Ok(Stop::Halted));
    assert_eq!(cpu.memory().read(result), Ok(10 - 3 + 7 + 16));
    assert_eq!(cpu.registers().general()[0], 30);
}

#[test]
fn object_image_round_trip() {
    let table = FormatTable::lc3();
    let program = assemble(SUM, &table).unwrap();
    let bytes = program.to_be_bytes();
    assert_eq!(&bytes[..2], &[0x30, 0x00]);

    let loaded = lc3sim::Program::from_be_bytes(&bytes).unwrap();
    assert_eq!(loaded.words, program.words);

    let mut cpu = Processor::new(&table);
    cpu.load_image(&program.to_raw()).unwrap();
    assert_eq!(cpu.run(), Ok(Stop::Halted));
}

#[test]
fn trap_service_routine() {
    // A user supplied service routine for x26 that doubles R0 and returns
    let src = "\
.ORIG x0026
.FILL x4000
.END";
    let routine = ".ORIG x4000\nADD R0, R0, R0\nRET\n.END";
    let main = ".ORIG x3000\nAND R0, R0, #0\nADD R0, R0, #3\nTRAP x26\nHALT\n.END";

    let table = FormatTable::lc3();
    let mut cpu = Processor::new(&table);
    for part in [src, routine, main] {
        cpu.load_program(&assemble(part, &table).unwrap()).unwrap();
    }
    assert_eq!(cpu.registers().pc, 0x3000);
    assert_eq!(cpu.run(), Ok(Stop::Halted));
    assert_eq!(cpu.registers().general()[0], 6);
    assert_eq!(cpu.step(), Ok(Status::Halted));
}

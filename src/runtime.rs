use tracing::{debug, trace, warn};

use crate::{
    air::Program,
    env::Config,
    error::SimError,
    format::FormatTable,
    memory::{Memory, OutOfRange},
    ops::{Choice, Instruction},
    state::RegisterFile,
    symbol::{Register, HALT_VECTOR},
    word::to_hex,
};

/// Outcome of a single [`Processor::step`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Running,
    Halted,
}

/// Why [`Processor::run`] returned.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stop {
    /// A `TRAP x25` executed, or [`Processor::halt`] was called.
    Halted,
    /// `max_cycles` instructions ran without halting.
    CycleLimit,
}

/// Values read by the fetch-operands stage. Execute only looks at these, never at live state,
/// so `JSRR R7` jumps to the old R7.
#[derive(Clone, Copy, Default, Debug)]
struct Operands {
    a: u16,
    b: u16,
}

/// Everything the store stage has to write back.
#[derive(Clone, Copy, Debug)]
enum Writeback {
    None,
    /// Register write, updates condition codes
    Reg { dr: Register, value: u16 },
    Mem { addr: u16, value: u16 },
    /// `link` saves the incremented PC in R7 first
    Jump { target: u16, link: bool },
    Trap { target: u16, halt: bool },
    /// RTI
    Return { pc: u16, psr: u16, sp: u16 },
}

/// Cycle-stepped LC3 core. Owns its memory and registers, borrows the format table it decodes
/// with.
pub struct Processor<'t> {
    table: &'t FormatTable,
    config: Config,
    regs: RegisterFile,
    mem: Memory,
    /// Instructions completed since the last load or reset
    cycles: u64,
    halted: bool,
}

impl<'t> Processor<'t> {
    pub fn new(table: &'t FormatTable) -> Self {
        Processor::with_config(table, Config::default())
    }

    pub fn with_config(table: &'t FormatTable, config: Config) -> Self {
        Processor {
            table,
            config,
            regs: RegisterFile::new(),
            mem: Memory::new(),
            cycles: 0,
            halted: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Write `words` to consecutive addresses from `orig` and point PC at `orig`. Other memory
    /// and registers are left as they are.
    pub fn load(&mut self, orig: u16, words: &[u16]) -> Result<(), SimError> {
        if self.regs.psr != 0 {
            warn!(psr = %to_hex(self.regs.psr), "loading over a non-zero PSR");
        }
        self.mem
            .load(orig, words)
            .map_err(|OutOfRange(address)| SimError::MemoryOutOfRange {
                address,
                pc: self.regs.pc,
            })?;
        self.regs.pc = orig;
        self.cycles = 0;
        self.halted = false;
        debug!(orig = %to_hex(orig), words = words.len(), "loaded program");
        Ok(())
    }

    pub fn load_program(&mut self, program: &Program) -> Result<(), SimError> {
        self.load(program.orig, &program.words)
    }

    /// Load an object image: origin word followed by the program.
    pub fn load_image(&mut self, raw: &[u16]) -> Result<(), SimError> {
        self.load_program(&Program::from_raw(raw)?)
    }

    /// Clear memory and registers.
    pub fn reset(&mut self) {
        self.regs = RegisterFile::new();
        self.mem.clear();
        self.cycles = 0;
        self.halted = false;
    }

    /// Stop the processor. [`Processor::run`] returns before the next instruction.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Clear a halt so that execution can continue from the current PC.
    pub fn resume(&mut self) {
        self.halted = false;
    }

    /// Run until halted, an error, or the configured cycle limit.
    pub fn run(&mut self) -> Result<Stop, SimError> {
        let start = self.cycles;
        loop {
            if self.halted {
                debug!(cycles = self.cycles, "halted");
                return Ok(Stop::Halted);
            }
            if let Some(max) = self.config.max_cycles {
                if self.cycles - start >= max {
                    debug!(cycles = self.cycles, "cycle limit reached");
                    return Ok(Stop::CycleLimit);
                }
            }
            if let Err(err) = self.step() {
                warn!(%err, pc = %to_hex(self.regs.pc), "run stopped");
                return Err(err);
            }
        }
    }

    /// Execute one full instruction cycle. Does nothing once halted.
    ///
    /// On error the processor is left as it was before the failing instruction: PC points at it
    /// and IR still holds the previous instruction.
    pub fn step(&mut self) -> Result<Status, SimError> {
        if self.halted {
            return Ok(Status::Halted);
        }
        let (pc, ir) = (self.regs.pc, self.regs.ir);
        self.cycle(pc).inspect_err(|_| {
            self.regs.pc = pc;
            self.regs.ir = ir;
        })
    }

    fn cycle(&mut self, pc: u16) -> Result<Status, SimError> {
        self.fetch(pc)?;
        let instr = self.decode(pc)?;
        trace!(pc = %to_hex(pc), ir = %to_hex(self.regs.ir), ?instr, "cycle");
        let addr = self.evaluate_address(&instr);
        let operands = self.fetch_operands(&instr, addr, pc)?;
        let writeback = self.execute(&instr, operands, addr, pc)?;
        let status = self.store(writeback);
        self.cycles += 1;
        Ok(status)
    }

    fn read(&self, addr: i64, pc: u16) -> Result<u16, SimError> {
        self.mem
            .read(addr)
            .map_err(|OutOfRange(address)| SimError::MemoryOutOfRange { address, pc })
    }

    /// IR <- M[PC], PC <- PC + 1
    fn fetch(&mut self, pc: u16) -> Result<(), SimError> {
        self.regs.ir = self.read(pc.into(), pc)?;
        self.regs.pc = pc.checked_add(1).ok_or(SimError::MemoryOutOfRange {
            address: 0x10000,
            pc,
        })?;
        Ok(())
    }

    fn decode(&self, pc: u16) -> Result<Instruction, SimError> {
        let word = self.regs.ir;
        Instruction::decode(self.table, word, self.config.features.decoding())
            .map_err(|_| SimError::UnsupportedOpcode { word, pc })
    }

    /// Effective address, computed wide. Not checked against memory bounds until it is used.
    fn evaluate_address(&self, instr: &Instruction) -> Option<i64> {
        let pc = i64::from(self.regs.pc);
        match *instr {
            Instruction::Br { pc_offset9, .. }
            | Instruction::Ld { pc_offset9, .. }
            | Instruction::Ldi { pc_offset9, .. }
            | Instruction::Lea { pc_offset9, .. }
            | Instruction::St { pc_offset9, .. }
            | Instruction::Sti { pc_offset9, .. } => Some(pc + i64::from(pc_offset9)),
            Instruction::Jsr { pc_offset11 } => Some(pc + i64::from(pc_offset11)),
            Instruction::Ldr {
                base_r, offset6, ..
            }
            | Instruction::Str {
                base_r, offset6, ..
            } => Some(i64::from(self.regs[base_r]) + i64::from(offset6)),
            Instruction::Trap { trapvect8 } => Some(trapvect8.into()),
            _ => None,
        }
    }

    fn fetch_operands(
        &self,
        instr: &Instruction,
        addr: Option<i64>,
        pc: u16,
    ) -> Result<Operands, SimError> {
        let ea = || match addr {
            Some(addr) => addr,
            None => unreachable!("{instr:?} has no effective address"),
        };
        let ops = match *instr {
            Instruction::Add { sr1, src2, .. } | Instruction::And { sr1, src2, .. } => Operands {
                a: self.regs[sr1],
                b: match src2 {
                    Choice::Reg(sr2) => self.regs[sr2],
                    Choice::Imm(imm5) => imm5 as u16,
                },
            },
            Instruction::Not { sr, .. } => Operands {
                a: self.regs[sr],
                b: 0,
            },
            Instruction::Jmp { base_r } | Instruction::Jsrr { base_r } => Operands {
                a: self.regs[base_r],
                b: 0,
            },
            Instruction::Ld { .. } | Instruction::Ldr { .. } | Instruction::Trap { .. } => {
                Operands {
                    a: self.read(ea(), pc)?,
                    b: 0,
                }
            }
            Instruction::Ldi { .. } => {
                let ptr = self.read(ea(), pc)?;
                Operands {
                    a: self.read(ptr.into(), pc)?,
                    b: ptr,
                }
            }
            Instruction::St { sr, .. } | Instruction::Str { sr, .. } => Operands {
                a: self.regs[sr],
                b: 0,
            },
            Instruction::Sti { sr, .. } => Operands {
                a: self.regs[sr],
                b: self.read(ea(), pc)?,
            },
            Instruction::Rti => {
                let sp = i64::from(self.regs[Register::R6]);
                Operands {
                    a: self.read(sp, pc)?,
                    b: self.read(sp + 1, pc)?,
                }
            }
            Instruction::Br { .. } | Instruction::Jsr { .. } | Instruction::Lea { .. } => {
                Operands::default()
            }
        };
        Ok(ops)
    }

    fn execute(
        &self,
        instr: &Instruction,
        ops: Operands,
        addr: Option<i64>,
        pc: u16,
    ) -> Result<Writeback, SimError> {
        // Addresses that end up in PC, a register or a store must name a memory cell
        let target = || {
            let addr = match addr {
                Some(addr) => addr,
                None => unreachable!("{instr:?} has no effective address"),
            };
            u16::try_from(addr).map_err(|_| SimError::MemoryOutOfRange { address: addr, pc })
        };
        let wb = match *instr {
            Instruction::Add { dr, .. } => Writeback::Reg {
                dr,
                value: ops.a.wrapping_add(ops.b),
            },
            Instruction::And { dr, .. } => Writeback::Reg {
                dr,
                value: ops.a & ops.b,
            },
            Instruction::Not { dr, .. } => Writeback::Reg { dr, value: !ops.a },
            Instruction::Br { nzp, .. } => {
                if nzp & self.regs.psr & 0b111 != 0 {
                    Writeback::Jump {
                        target: target()?,
                        link: false,
                    }
                } else {
                    Writeback::None
                }
            }
            Instruction::Jmp { .. } => Writeback::Jump {
                target: ops.a,
                link: false,
            },
            Instruction::Jsr { .. } => Writeback::Jump {
                target: target()?,
                link: true,
            },
            Instruction::Jsrr { .. } => Writeback::Jump {
                target: ops.a,
                link: true,
            },
            Instruction::Ld { dr, .. }
            | Instruction::Ldi { dr, .. }
            | Instruction::Ldr { dr, .. } => Writeback::Reg { dr, value: ops.a },
            Instruction::Lea { dr, .. } => Writeback::Reg {
                dr,
                value: target()?,
            },
            Instruction::St { .. } | Instruction::Str { .. } => Writeback::Mem {
                addr: target()?,
                value: ops.a,
            },
            Instruction::Sti { .. } => Writeback::Mem {
                addr: ops.b,
                value: ops.a,
            },
            Instruction::Trap { trapvect8 } => Writeback::Trap {
                target: ops.a,
                halt: trapvect8 == HALT_VECTOR,
            },
            Instruction::Rti => Writeback::Return {
                pc: ops.a,
                psr: ops.b,
                sp: self.regs[Register::R6].wrapping_add(2),
            },
        };
        Ok(wb)
    }

    fn store(&mut self, wb: Writeback) -> Status {
        match wb {
            Writeback::None => {}
            Writeback::Reg { dr, value } => self.regs.write_result(dr, value),
            Writeback::Mem { addr, value } => self.mem.set(addr, value),
            Writeback::Jump { target, link } => {
                if link {
                    self.regs[Register::R7] = self.regs.pc;
                }
                self.regs.pc = target;
            }
            Writeback::Trap { target, halt } => {
                self.regs[Register::R7] = self.regs.pc;
                self.regs.pc = target;
                if halt {
                    self.halted = true;
                    return Status::Halted;
                }
            }
            Writeback::Return { pc, psr, sp } => {
                self.regs.pc = pc;
                self.regs.psr = psr;
                self.regs[Register::R6] = sp;
            }
        }
        Status::Running
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{features::Features, state::Condition, symbol::Register::*};

    fn cpu<'t>(table: &'t FormatTable, words: &[u16]) -> Processor<'t> {
        let mut cpu = Processor::new(table);
        cpu.load(0x3000, words).unwrap();
        cpu
    }

    fn steps(cpu: &mut Processor, n: usize) {
        for _ in 0..n {
            assert_eq!(cpu.step(), Ok(Status::Running));
        }
    }

    #[test_log::test]
    fn arithmetic_sets_flags() {
        let table = FormatTable::lc3();
        // ADD R0, R0, #5; ADD R1, R0, #-6; AND R2, R1, R0; NOT R3, R2
        let mut cpu = cpu(&table, &[0x1025, 0x123A, 0x5440, 0x96BF]);
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R0], 5);
        assert_eq!(cpu.registers().condition(), Some(Condition::P));
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R1], 0xFFFF);
        assert_eq!(cpu.registers().condition(), Some(Condition::N));
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R2], 5);
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R3], 0xFFFA);
        assert_eq!(cpu.registers().pc, 0x3004);
        assert_eq!(cpu.cycles(), 4);
    }

    #[test]
    fn add_wraps() {
        let table = FormatTable::lc3();
        // ADD R0, R0, #1 with R0 = x7FFF
        let mut cpu = cpu(&table, &[0x1021]);
        cpu.registers_mut()[R0] = 0x7FFF;
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R0], 0x8000);
        assert_eq!(cpu.registers().condition(), Some(Condition::N));
    }

    #[test]
    fn branches() {
        let table = FormatTable::lc3();
        // AND R0, R0, #0; BRp #5; BRz #2
        let mut cpu = cpu(&table, &[0x5020, 0x0205, 0x0402]);
        steps(&mut cpu, 2);
        assert_eq!(cpu.registers().pc, 0x3002);
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers().pc, 0x3005);
    }

    #[test]
    fn branch_never_taken_with_clear_psr() {
        let table = FormatTable::lc3();
        // BRnzp #3 straight after load, no condition set yet
        let mut cpu = cpu(&table, &[0x0E03]);
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers().pc, 0x3001);
    }

    #[test]
    fn subroutines() {
        let table = FormatTable::lc3();
        // JSR #2; (skipped); (skipped); RET
        let mut cpu = cpu(&table, &[0x4802, 0, 0, 0xC1C0]);
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers().pc, 0x3003);
        assert_eq!(cpu.registers()[R7], 0x3001);
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers().pc, 0x3001);
    }

    #[test]
    fn jsrr_r7_uses_old_value() {
        let table = FormatTable::lc3();
        // JSRR R7
        let mut cpu = cpu(&table, &[0x41C0]);
        cpu.registers_mut()[R7] = 0x4000;
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers().pc, 0x4000);
        assert_eq!(cpu.registers()[R7], 0x3001);
    }

    #[test]
    fn loads_and_stores() {
        let table = FormatTable::lc3();
        let mut cpu = cpu(
            &table,
            &[
                0x2007, // LD R0, #7      -> M[x3008] = x300A
                0xA206, // LDI R1, #6     -> M[M[x3008]] = M[x300A] = -2
                0xE405, // LEA R2, #5     -> x3008
                0x6681, // LDR R3, R2, #1 -> M[x3009] = 7
                0x3605, // ST R3, #5      -> M[x300A] = 7
                0xB203, // STI R1, #3     -> M[M[x3009]] = M[7] = -2
                0x7283, // STR R1, R2, #3 -> M[x300B] = -2
                0,
                0x300A, // x3008
                0x0007, // x3009
                0xFFFE, // x300A
            ],
        );
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R0], 0x300A);
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R1], 0xFFFE);
        assert_eq!(cpu.registers().condition(), Some(Condition::N));
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R2], 0x3008);
        assert_eq!(cpu.registers().condition(), Some(Condition::P));
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers()[R3], 7);
        steps(&mut cpu, 1);
        assert_eq!(cpu.memory().read(0x300A), Ok(7));
        steps(&mut cpu, 1);
        assert_eq!(cpu.memory().read(7), Ok(0xFFFE));
        steps(&mut cpu, 1);
        assert_eq!(cpu.memory().read(0x300B), Ok(0xFFFE));
        // Stores leave the condition codes alone
        assert_eq!(cpu.registers().condition(), Some(Condition::P));
    }

    #[test]
    fn trap_vectors() {
        let table = FormatTable::lc3();
        // TRAP x23
        let mut cpu = cpu(&table, &[0xF023]);
        cpu.memory_mut().write(0x23, 0x0500).unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers().pc, 0x0500);
        assert_eq!(cpu.registers()[R7], 0x3001);
        assert!(!cpu.is_halted());
    }

    #[test_log::test]
    fn halt_trap() {
        let table = FormatTable::lc3();
        let mut cpu = cpu(&table, &[0xF025, 0x1021]);
        assert_eq!(cpu.step(), Ok(Status::Halted));
        assert_eq!(cpu.registers()[R7], 0x3001);
        // Halted processors stay put
        assert_eq!(cpu.step(), Ok(Status::Halted));
        assert_eq!(cpu.cycles(), 1);
        assert_eq!(cpu.run(), Ok(Stop::Halted));
    }

    #[test]
    fn rti_pops_pc_and_psr() {
        let table = FormatTable::lc3();
        let mut cpu = cpu(&table, &[0x8000]);
        cpu.registers_mut()[R6] = 0x2FF0;
        cpu.memory_mut().load(0x2FF0, &[0x4000, 0x0001]).unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.registers().pc, 0x4000);
        assert_eq!(cpu.registers().psr, 0x0001);
        assert_eq!(cpu.registers()[R6], 0x2FF2);
    }

    #[test_log::test]
    fn unsupported_opcode() {
        let table = FormatTable::lc3();
        let mut cpu = cpu(&table, &[0x1021, 0xD000]);
        assert_eq!(
            cpu.run(),
            Err(SimError::UnsupportedOpcode {
                word: 0xD000,
                pc: 0x3001
            })
        );
        // Last valid state is still visible
        assert_eq!(cpu.registers()[R0], 1);
        assert_eq!(cpu.registers().pc, 0x3001);
        assert_eq!(cpu.registers().ir, 0x1021);
        assert_eq!(cpu.cycles(), 1);
    }

    #[test]
    fn constant_bits_need_lenient() {
        let table = FormatTable::lc3();
        // NOT R0, R0 with a cleared low bit
        let mut strict = cpu(&table, &[0x903E]);
        assert!(matches!(
            strict.step(),
            Err(SimError::UnsupportedOpcode { word: 0x903E, .. })
        ));

        let config = Config {
            features: Features { lenient: true },
            max_cycles: None,
        };
        let mut lenient = Processor::with_config(&table, config);
        lenient.load(0x3000, &[0x903E]).unwrap();
        assert_eq!(lenient.step(), Ok(Status::Running));
        assert_eq!(lenient.registers()[R0], 0xFFFF);
    }

    #[test]
    fn addresses_out_of_range() {
        let table = FormatTable::lc3();
        // LDR R1, R0, #1 with R0 = xFFFF
        let mut cpu = cpu(&table, &[0x6201]);
        cpu.registers_mut()[R0] = 0xFFFF;
        assert_eq!(
            cpu.step(),
            Err(SimError::MemoryOutOfRange {
                address: 0x10000,
                pc: 0x3000
            })
        );

        // LEA R0, #-2 at x0000
        let mut cpu = Processor::new(&table);
        cpu.load(0x0000, &[0xE1FE]).unwrap();
        assert_eq!(
            cpu.step(),
            Err(SimError::MemoryOutOfRange { address: -1, pc: 0 })
        );

        // Running off the end of memory
        let mut cpu = Processor::new(&table);
        cpu.load(0xFFFF, &[0x1021]).unwrap();
        assert_eq!(
            cpu.step(),
            Err(SimError::MemoryOutOfRange {
                address: 0x10000,
                pc: 0xFFFF
            })
        );
        assert_eq!(cpu.registers().pc, 0xFFFF);
        assert_eq!(cpu.registers().ir, 0);
        assert_eq!(cpu.registers()[R0], 0);
    }

    #[test]
    fn cycle_limit_and_halt_request() {
        let table = FormatTable::lc3();
        let config = Config {
            features: Features::default(),
            max_cycles: Some(10),
        };
        // BRnzp #-1 after setting Z
        let mut cpu = Processor::with_config(&table, config);
        cpu.load(0x3000, &[0x5020, 0x0FFF]).unwrap();
        assert_eq!(cpu.run(), Ok(Stop::CycleLimit));
        assert_eq!(cpu.cycles(), 10);
        assert_eq!(cpu.run(), Ok(Stop::CycleLimit));
        assert_eq!(cpu.cycles(), 20);

        cpu.halt();
        assert_eq!(cpu.run(), Ok(Stop::Halted));
        cpu.resume();
        assert_eq!(cpu.step(), Ok(Status::Running));
    }

    #[test]
    fn reset_clears_everything() {
        let table = FormatTable::lc3();
        let mut cpu = cpu(&table, &[0x1025]);
        steps(&mut cpu, 1);
        cpu.reset();
        assert_eq!(cpu.registers(), &RegisterFile::new());
        assert_eq!(cpu.memory().read(0x3000), Ok(0));
        assert_eq!(cpu.cycles(), 0);
    }
}

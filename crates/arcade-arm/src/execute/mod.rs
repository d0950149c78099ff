//! Instruction execution.
//!
//! Each instruction runs with the prefetch queue already shifted, so R15
//! reads as the opcode address plus eight. Handlers that write R15 go
//! through [`ArmCore::branch_to`], which refills the queue at the target.

mod alu;
mod transfer;

use arcade_core::MemoryBus;
use tracing::{trace, warn};

use crate::encoding::{branch_offset, Condition, OpClass};
use crate::state::{Mode, ADDRESS_MASK, LR, PC, PSW_I};
use crate::{ArmCore, ArmTrap, TrapPolicy};

impl ArmCore {
    /// Executes the opcode in prefetch slot 0.
    pub(crate) fn execute_opcode(&mut self, bus: &mut dyn MemoryBus) {
        let opcode = self.queue[0];
        self.diag.instructions = self.diag.instructions.saturating_add(1);
        if !Condition::of(opcode).passes(self.regs.psw()) {
            self.diag.condition_skipped = self.diag.condition_skipped.saturating_add(1);
            return;
        }
        match OpClass::of(opcode) {
            OpClass::DataRegister | OpClass::DataImmediate => self.data_processing(opcode, bus),
            OpClass::TransferImmediate | OpClass::TransferRegister => {
                self.single_transfer(opcode, bus);
            }
            OpClass::Block => self.block_transfer(opcode, bus),
            OpClass::Branch => self.branch(opcode, bus, false),
            OpClass::BranchLink => self.branch(opcode, bus, true),
            OpClass::Undefined => self.undefined(opcode, bus),
            OpClass::SoftwareInterrupt => self.software_interrupt(opcode, bus),
        }
    }

    fn branch(&mut self, opcode: u32, bus: &mut dyn MemoryBus, link: bool) {
        let pc = self.regs.get(PC);
        if link {
            let ret = (pc.wrapping_sub(4) & ADDRESS_MASK) | self.regs.psw();
            self.regs.set(LR, ret);
        }
        self.branch_to(bus, pc.wrapping_add_signed(branch_offset(opcode) << 2));
    }

    fn undefined(&mut self, opcode: u32, bus: &mut dyn MemoryBus) {
        let pc = self.regs.get(PC).wrapping_sub(8) & ADDRESS_MASK;
        if self.diag.record_illegal(pc, opcode) {
            warn!(pc, opcode, "undefined instruction");
        } else {
            trace!(pc, opcode, count = self.diag.illegal, "undefined instruction");
        }
        if self.config.illegal_opcodes == TrapPolicy::Trap {
            self.enter_trap(ArmTrap::Undefined, bus);
        }
    }

    fn software_interrupt(&mut self, opcode: u32, bus: &mut dyn MemoryBus) {
        self.diag.swis = self.diag.swis.saturating_add(1);
        trace!(comment = opcode & 0x00FF_FFFF, "swi");
        if self.config.software_interrupts == TrapPolicy::Trap {
            self.enter_trap(ArmTrap::SoftwareInterrupt, bus);
        }
    }

    /// Enters Supervisor mode with IRQs masked; R14 returns to the next
    /// instruction.
    fn enter_trap(&mut self, trap: ArmTrap, bus: &mut dyn MemoryBus) {
        let link = self.regs.get(PC).wrapping_sub(4) & ADDRESS_MASK;
        self.enter_exception(bus, Mode::Supervisor, PSW_I, link, trap.vector());
    }
}

#[cfg(test)]
mod tests {
    use arcade_core::{CoreContext, CpuCore, DirectContext, FlatMemory, MemoryBus};
    use rstest::rstest;

    use crate::state::{Mode, PSW_C, PSW_I, PSW_N, PSW_V, PSW_Z};
    use crate::{ArmConfig, ArmCore, ArmRegister};

    const R0: u32 = ArmRegister::R0.id();

    fn reg(core: &ArmCore, index: u32) -> u32 {
        core.register(R0 + index).unwrap()
    }

    /// Loads `program` at zero, resets into User mode and runs one
    /// instruction per word.
    fn run(config: ArmConfig, program: &[u32], setup: impl FnOnce(&mut ArmCore)) -> (ArmCore, FlatMemory) {
        let mut memory = FlatMemory::new(16);
        memory.load_words(0, program);
        let mut core = ArmCore::new(config);
        core.reset(0, &mut memory);
        core.set_register(ArmRegister::Psw.id(), 0).unwrap();
        setup(&mut core);
        let cycles = i32::try_from(program.len()).unwrap() * 4;
        let mut ctx = DirectContext::new(&mut memory, cycles);
        let used = core.execute(cycles, &mut ctx);
        assert_eq!(used, cycles);
        assert_eq!(ctx.cycles_left(), 0);
        (core, memory)
    }

    fn run_default(program: &[u32], setup: impl FnOnce(&mut ArmCore)) -> ArmCore {
        run(ArmConfig::default(), program, setup).0
    }

    fn set(core: &mut ArmCore, index: u32, value: u32) {
        core.set_register(R0 + index, value).unwrap();
    }

    #[rstest]
    #[case::add(0xE081_0002, 7, 5, 12)]
    #[case::sub(0xE041_0002, 7, 5, 2)]
    #[case::rsb(0xE061_0002, 7, 5, 0xFFFF_FFFE)]
    #[case::and(0xE001_0002, 0b1100, 0b1010, 0b1000)]
    #[case::eor(0xE021_0002, 0b1100, 0b1010, 0b0110)]
    #[case::orr(0xE181_0002, 0b1100, 0b1010, 0b1110)]
    #[case::bic(0xE1C1_0002, 0b1100, 0b1010, 0b0100)]
    #[case::mvn(0xE1E0_0002, 0, 0, 0xFFFF_FFFF)]
    #[case::add_lsl(0xE081_0102, 1, 3, 13)]
    fn data_processing_results(
        #[case] opcode: u32,
        #[case] r1: u32,
        #[case] r2: u32,
        #[case] expected: u32,
    ) {
        let core = run_default(&[opcode], |core| {
            set(core, 1, r1);
            set(core, 2, r2);
        });
        assert_eq!(reg(&core, 0), expected);
    }

    #[test]
    fn subs_sets_carry_as_not_borrow() {
        // SUBS R0, R1, R2 ; SUBS R3, R2, R1
        let core = run_default(&[0xE051_0002, 0xE052_3001], |core| {
            set(core, 1, 5);
            set(core, 2, 3);
        });
        assert_eq!(reg(&core, 3), 0xFFFF_FFFE);
        let psw = core.register(ArmRegister::Psw.id()).unwrap();
        assert_eq!(psw & (PSW_N | PSW_Z | PSW_C | PSW_V), PSW_N);
    }

    #[test]
    fn adds_detects_signed_overflow() {
        // ADDS R0, R1, R2
        let core = run_default(&[0xE091_0002], |core| {
            set(core, 1, 0x7FFF_FFFF);
            set(core, 2, 1);
        });
        let psw = core.register(ArmRegister::Psw.id()).unwrap();
        assert_eq!(psw & (PSW_N | PSW_Z | PSW_C | PSW_V), PSW_N | PSW_V);
    }

    #[test]
    fn movs_takes_carry_from_the_shifter() {
        // MOVS R0, R1, LSR #1
        let core = run_default(&[0xE1B0_00A1], |core| set(core, 1, 3));
        assert_eq!(reg(&core, 0), 1);
        let psw = core.register(ArmRegister::Psw.id()).unwrap();
        assert_eq!(psw & (PSW_N | PSW_Z | PSW_C), PSW_C);
    }

    #[test]
    fn failed_conditions_are_counted_and_skipped() {
        // MOVEQ R0, #1 ; MOVNE R1, #2
        let core = run_default(&[0x03A0_0001, 0x13A0_1002], |_| {});
        assert_eq!(reg(&core, 0), 0);
        assert_eq!(reg(&core, 1), 2);
        assert_eq!(core.diagnostics().condition_skipped, 1);
        assert_eq!(core.diagnostics().instructions, 2);
    }

    #[test]
    fn r15_reads_eight_ahead() {
        // NOP ; ADD R0, R15, #0
        let core = run_default(&[0xE1A0_0000, 0xE28F_0000], |_| {});
        assert_eq!(reg(&core, 0), 12);
    }

    #[test]
    fn branch_with_link_records_the_following_instruction() {
        // BL +8 (target 0x10)
        let core = run_default(&[0xEB00_0002], |_| {});
        assert_eq!(reg(&core, 14), 4);
        assert_eq!(core.pc(), 0x10);
    }

    #[test]
    fn backward_branch_wraps_to_itself() {
        // B . at 0
        let core = run_default(&[0xEAFF_FFFE], |_| {});
        assert_eq!(core.pc(), 0);
    }

    #[test]
    fn pre_indexed_load_with_write_back() {
        // LDR R0, [R1, #4]!
        let mut memory = FlatMemory::new(16);
        memory.load_words(0, &[0xE5B1_0004]);
        memory.write32(0x104, 0xCAFE_F00D);
        let mut core = ArmCore::new(ArmConfig::default());
        core.reset(0, &mut memory);
        set(&mut core, 1, 0x100);
        let mut ctx = DirectContext::new(&mut memory, 4);
        core.execute(4, &mut ctx);
        assert_eq!(reg(&core, 0), 0xCAFE_F00D);
        assert_eq!(reg(&core, 1), 0x104);
    }

    #[test]
    fn post_indexed_byte_store_always_writes_back() {
        // STRB R0, [R1], #-1
        let (core, mut memory) = run(ArmConfig::default(), &[0xE441_0001], |core| {
            set(core, 0, 0x1234_56AB);
            set(core, 1, 0x200);
        });
        assert_eq!(memory.read8(0x200), 0xAB);
        assert_eq!(memory.read8(0x201), 0);
        assert_eq!(reg(&core, 1), 0x1FF);
    }

    #[test]
    fn register_offset_transfer_uses_the_shifter() {
        // STR R0, [R1, R2, LSL #2]
        let (_, mut memory) = run(ArmConfig::default(), &[0xE781_0102], |core| {
            set(core, 0, 0x55);
            set(core, 1, 0x300);
            set(core, 2, 3);
        });
        assert_eq!(memory.read32(0x30C), 0x55);
    }

    #[test]
    fn word_addresses_ignore_the_low_bits() {
        // LDR R0, [R1]
        let mut memory = FlatMemory::new(16);
        memory.load_words(0, &[0xE591_0000]);
        memory.write32(0x400, 0x0102_0304);
        let mut core = ArmCore::new(ArmConfig::default());
        core.reset(0, &mut memory);
        set(&mut core, 1, 0x403);
        let mut ctx = DirectContext::new(&mut memory, 4);
        core.execute(4, &mut ctx);
        assert_eq!(reg(&core, 0), 0x0102_0304);
    }

    #[test]
    fn stm_db_with_write_back_then_ldm_ia_restores() {
        // STMDB R13!, {R0-R2} ; MOV R0, #0 ; MOV R1, #0 ; MOV R2, #0 ; LDMIA R13!, {R0-R2}
        let program = [0xE92D_0007, 0xE3A0_0000, 0xE3A0_1000, 0xE3A0_2000, 0xE8BD_0007];
        let (core, mut memory) = run(ArmConfig::default(), &program, |core| {
            set(core, 0, 10);
            set(core, 1, 11);
            set(core, 2, 12);
            set(core, 13, 0x1000);
        });
        assert_eq!(memory.read32(0xFF4), 10);
        assert_eq!(memory.read32(0xFF8), 11);
        assert_eq!(memory.read32(0xFFC), 12);
        assert_eq!((reg(&core, 0), reg(&core, 1), reg(&core, 2)), (10, 11, 12));
        assert_eq!(reg(&core, 13), 0x1000);
    }

    #[test]
    fn ldm_into_r15_with_s_restores_status() {
        // LDMIA R0, {R15}^ from Supervisor mode
        let mut memory = FlatMemory::new(16);
        memory.load_words(0, &[0xE8D0_8000]);
        memory.write32(0x500, 0x0000_0040 | PSW_Z);
        let mut core = ArmCore::new(ArmConfig::default());
        core.reset(0, &mut memory);
        set(&mut core, 0, 0x500);
        let mut ctx = DirectContext::new(&mut memory, 4);
        core.execute(4, &mut ctx);
        assert_eq!(core.pc(), 0x40);
        assert_eq!(core.registers().mode(), Mode::User);
        assert!(core.registers().flag(PSW_Z));
    }

    /// Resets into Supervisor mode, applies `setup` and runs one instruction.
    fn run_supervisor(
        opcode: u32,
        setup: impl FnOnce(&mut ArmCore, &mut FlatMemory),
    ) -> (ArmCore, FlatMemory) {
        let mut memory = FlatMemory::new(16);
        memory.load_words(0, &[opcode]);
        let mut core = ArmCore::new(ArmConfig::default());
        core.reset(0, &mut memory);
        setup(&mut core, &mut memory);
        let mut ctx = DirectContext::new(&mut memory, 4);
        core.execute(4, &mut ctx);
        (core, memory)
    }

    #[test]
    fn ldm_into_r15_switches_mode_without_caret() {
        // LDMIA R13, {R15}
        let (core, _) = run_supervisor(0xE89D_8000, |core, memory| {
            set(core, 13, 0x500);
            memory.write32(0x500, 0x0000_0040);
        });
        assert_eq!(core.pc(), 0x40);
        assert_eq!(core.registers().mode(), Mode::User);
        assert!(!core.registers().flag(PSW_I));
        assert_eq!(core.registers().svc_bank()[0], 0x500);
    }

    #[test]
    fn ldr_into_r15_loads_status_bits() {
        // LDR R15, [R1]
        let (core, _) = run_supervisor(0xE591_F000, |core, memory| {
            set(core, 1, 0x600);
            memory.write32(0x600, 0x80 | PSW_N | PSW_I | Mode::Irq.bits());
        });
        assert_eq!(core.pc(), 0x80);
        assert_eq!(core.registers().mode(), Mode::Irq);
        assert!(core.registers().flag(PSW_N));
        assert!(core.registers().flag(PSW_I));
    }

    #[test]
    fn user_mode_r15_writes_only_reach_the_flags() {
        // MOV R15, R1
        let core = run_default(&[0xE1A0_F001], |core| {
            set(core, 1, 0x80 | PSW_Z | PSW_I | Mode::Supervisor.bits());
        });
        assert_eq!(core.pc(), 0x80);
        assert_eq!(core.registers().mode(), Mode::User);
        assert!(core.registers().flag(PSW_Z));
        assert!(!core.registers().flag(PSW_I));
    }

    #[test]
    fn stm_caret_stores_user_bank_words() {
        // STMIA R0, {R13}^
        let (_, mut memory) = run_supervisor(0xE8C0_2000, |core, _| {
            set(core, 0, 0x700);
            set(core, 13, 0xAAAA_AAAA);
            core.set_register(ArmRegister::Sr13.id(), 0x1234_5678).unwrap();
        });
        assert_eq!(memory.read32(0x700), 0x1234_5678);
    }

    #[test]
    fn movs_pc_lr_returns_from_supervisor() {
        // MOVS R15, R14
        let mut memory = FlatMemory::new(16);
        memory.load_words(0, &[0xE1B0_F00E]);
        let mut core = ArmCore::new(ArmConfig::default());
        core.reset(0, &mut memory);
        set(&mut core, 14, 0x80 | PSW_C);
        let mut ctx = DirectContext::new(&mut memory, 4);
        core.execute(4, &mut ctx);
        assert_eq!(core.pc(), 0x80);
        assert_eq!(core.registers().mode(), Mode::User);
        assert!(core.registers().flag(PSW_C));
        assert!(!core.registers().flag(PSW_I));
    }

    #[test]
    fn ignored_undefined_instructions_are_counted() {
        let core = run_default(&[0xEE00_0000, 0xEC00_0000, 0xE3A0_0007], |_| {});
        assert_eq!(core.diagnostics().illegal, 2);
        assert_eq!(core.diagnostics().last_illegal, Some((4, 0xEC00_0000)));
        assert_eq!(reg(&core, 0), 7);
    }

    #[test]
    fn trapped_swi_enters_supervisor() {
        // MOV R0, #0 ; SWI 0x10
        let (core, _) = run(ArmConfig::trapping(), &[0xE3A0_0000, 0xEF00_0010], |_| {});
        assert_eq!(core.registers().mode(), Mode::Supervisor);
        assert_eq!(core.pc(), 0x08);
        assert_eq!(core.registers().get(14), 0x08);
        assert_eq!(core.registers().user(14), 0);
        assert_eq!(core.diagnostics().swis, 1);
    }

    #[test]
    fn trapped_undefined_enters_its_vector() {
        let (core, _) = run(ArmConfig::trapping(), &[0xEE00_0000], |_| {});
        assert_eq!(core.pc(), 0x04);
        assert_eq!(core.registers().get(14), 0x04);
        assert!(core.registers().flag(PSW_I));
    }
}

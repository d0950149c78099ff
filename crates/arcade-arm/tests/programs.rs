//! Small ARM programs run outside any machine.

#![allow(clippy::pedantic, clippy::nursery, clippy::unwrap_used)]

use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

use arcade_arm::{ArmConfig, ArmCore, ArmRegister, Mode};
use arcade_core::{CpuCore, DirectContext, FlatMemory, MemoryBus};

fn boot(config: ArmConfig, program: &[(u32, u32)]) -> (ArmCore, FlatMemory) {
    let mut memory = FlatMemory::new(16);
    for &(addr, word) in program {
        memory.write32(addr, word);
    }
    let mut core = ArmCore::new(config);
    core.reset(0, &mut memory);
    (core, memory)
}

fn run(core: &mut ArmCore, memory: &mut FlatMemory, cycles: i32) {
    let mut ctx = DirectContext::new(memory, cycles);
    let used = core.execute(cycles, &mut ctx);
    assert!(used >= cycles);
}

fn reg(core: &ArmCore, index: u32) -> u32 {
    core.register(ArmRegister::R0.id() + index).unwrap()
}

#[test]
fn subroutine_sums_a_countdown() {
    let (mut core, mut memory) = boot(
        ArmConfig::default(),
        &[
            (0x00, 0xE3A0_0000), // MOV R0, #0
            (0x04, 0xE3A0_100A), // MOV R1, #10
            (0x08, 0xE3A0_2C01), // MOV R2, #0x100
            (0x0C, 0xEB00_0002), // BL 0x1C
            (0x10, 0xE582_0000), // STR R0, [R2]
            (0x14, 0xEAFF_FFFE), // B .
            (0x18, 0xE1A0_0000), // MOV R0, R0
            (0x1C, 0xE080_0001), // ADD R0, R0, R1
            (0x20, 0xE251_1001), // SUBS R1, R1, #1
            (0x24, 0x1AFF_FFFC), // BNE 0x1C
            (0x28, 0xE1A0_F00E), // MOV R15, R14
        ],
    );
    run(&mut core, &mut memory, 1000);
    assert_eq!(reg(&core, 0), 55);
    assert_eq!(memory.read32(0x100), 55);
    assert_eq!(reg(&core, 14) & 0x03FF_FFFC, 0x10);
    assert_eq!(core.pc(), 0x14);
}

#[test]
fn block_copy_with_write_back() {
    let (mut core, mut memory) = boot(
        ArmConfig::default(),
        &[
            (0x00, 0xE3A0_8C02), // MOV R8, #0x200
            (0x04, 0xE3A0_9C03), // MOV R9, #0x300
            (0x08, 0xE8B8_000F), // LDMIA R8!, {R0-R3}
            (0x0C, 0xE8A9_000F), // STMIA R9!, {R0-R3}
            (0x10, 0xE559_4001), // LDRB R4, [R9, #-1]
            (0x14, 0xEAFF_FFFE), // B .
            (0x200, 0x1111_1111),
            (0x204, 0x2222_2222),
            (0x208, 0x3333_3333),
            (0x20C, 0x4433_2211),
        ],
    );
    run(&mut core, &mut memory, 40);
    for offset in (0..16).step_by(4) {
        assert_eq!(memory.read32(0x300 + offset), memory.read32(0x200 + offset));
    }
    assert_eq!(reg(&core, 4), 0x44);
    assert_eq!(reg(&core, 8), 0x210);
    assert_eq!(reg(&core, 9), 0x310);
}

#[test]
fn software_interrupt_round_trip() {
    let (mut core, mut memory) = boot(
        ArmConfig::trapping(),
        &[
            (0x00, 0xEA00_000E), // B 0x40
            (0x08, 0xEA00_001C), // B 0x80
            (0x40, 0xE33F_F000), // TEQP R15, #0
            (0x44, 0xEF00_0042), // SWI 0x42
            (0x48, 0xE3A0_6001), // MOV R6, #1
            (0x4C, 0xEAFF_FFFE), // B .
            (0x80, 0xE3A0_5007), // MOV R5, #7
            (0x84, 0xE1B0_F00E), // MOVS R15, R14
        ],
    );
    run(&mut core, &mut memory, 100);
    assert_eq!(reg(&core, 5), 7);
    assert_eq!(reg(&core, 6), 1);
    assert_eq!(core.registers().mode(), Mode::User);
    assert_eq!(core.registers().svc_bank()[1], 0x48);
    assert_eq!(core.diagnostics().swis, 1);
    assert_eq!(core.pc(), 0x4C);
}

#[test]
fn disassembly_walks_a_listing() {
    let (core, mut memory) = boot(
        ArmConfig::default(),
        &[(0x00, 0xE3A0_100A), (0x04, 0xEB00_0002), (0x08, 0xE8BD_8003)],
    );
    let mut lines = Vec::new();
    let mut pc = 0;
    while pc < 12 {
        let mut line = String::new();
        pc += core.disassemble(&mut memory, pc, &mut line);
        lines.push(line);
    }
    assert_eq!(
        lines,
        ["MOV R1, #0xA", "BL 0x00000014", "LDMIA R13!, {R0, R1, R15}"]
    );
}

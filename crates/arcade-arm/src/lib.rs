//! ARM interpreter for the Arcade scheduler.
//!
//! [`ArmCore`] implements [`arcade_core::CpuCore`] for the 26-bit ARM
//! instruction set: banked registers for the User, FIRQ, IRQ and Supervisor
//! modes, a three-word prefetch queue and a fixed cost of
//! [`CYCLES_PER_INSTRUCTION`] per instruction.

/// Core state and the `CpuCore` implementation.
pub mod cpu;
pub use cpu::{ArmCore, CONTEXT_SIZE, CYCLES_PER_INSTRUCTION, FIRQ_LINE, IRQ_LINE};

/// Condition codes, dispatch table and register ids.
pub mod encoding;
pub use encoding::{ArmRegister, Condition, DataOp, OpClass, DISPATCH, IMM12};

/// Barrel shifter.
pub mod shifter;
pub use shifter::{ShiftKind, ShifterOutput};

/// Banked register file.
pub mod state;
pub use state::{Mode, RegisterFile};

/// Trap classification and handling policy.
pub mod fault;
pub use fault::{ArmTrap, TrapPolicy};

/// Core configuration.
pub mod config;
pub use config::ArmConfig;

/// Execution counters.
pub mod diag;
pub use diag::ArmDiagnostics;

/// Disassembler.
pub mod disasm;
pub use disasm::disassemble;

mod execute;

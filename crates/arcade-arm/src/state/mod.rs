//! Architectural register state of the ARM core.

/// Banked register file and status word.
pub mod registers;

pub use registers::{
    Mode, RegisterFile, ADDRESS_MASK, BYTE_ADDRESS_MASK, LR, PC, PSW_C, PSW_F, PSW_FLAGS, PSW_I,
    PSW_MASK, PSW_MODE, PSW_N, PSW_V, PSW_Z, SP,
};

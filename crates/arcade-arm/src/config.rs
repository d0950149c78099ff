//! Core behavior switches.

use crate::TrapPolicy;

/// Behavior of an [`crate::ArmCore`] on instructions the hardware traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ArmConfig {
    /// Handling of undefined encodings.
    pub illegal_opcodes: TrapPolicy,
    /// Handling of `SWI`.
    pub software_interrupts: TrapPolicy,
}

impl ArmConfig {
    /// Both trap kinds enter their vectors.
    #[must_use]
    pub const fn trapping() -> Self {
        Self {
            illegal_opcodes: TrapPolicy::Trap,
            software_interrupts: TrapPolicy::Trap,
        }
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            illegal_opcodes: TrapPolicy::Ignore,
            software_interrupts: TrapPolicy::Ignore,
        }
    }
}

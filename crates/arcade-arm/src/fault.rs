use thiserror::Error;

/// Exceptions raised by instructions rather than interrupt lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum ArmTrap {
    /// Coprocessor or otherwise unassigned encoding.
    #[error("undefined instruction")]
    Undefined = 0x01,
    /// `SWI` executed.
    #[error("software interrupt")]
    SoftwareInterrupt = 0x02,
}

impl ArmTrap {
    /// Stable code for diagnostics.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a value produced by [`ArmTrap::as_u8`].
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Undefined),
            0x02 => Some(Self::SoftwareInterrupt),
            _ => None,
        }
    }

    /// Hardware vector entered when the trap is taken.
    #[must_use]
    pub const fn vector(self) -> u32 {
        match self {
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
        }
    }
}

/// What the core does when a trap condition occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TrapPolicy {
    /// Count it and continue with the next instruction.
    #[default]
    Ignore,
    /// Enter Supervisor mode through the trap vector.
    Trap,
}

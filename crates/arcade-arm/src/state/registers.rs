//! Banked register file and processor status word.
//!
//! The live set `R0..R15` always holds the registers of the current mode.
//! Each privileged mode owns a shadow bank; while that mode is active the
//! shadow holds the displaced User values instead. Switching between two
//! privileged modes therefore goes through User: restore the source bank,
//! then swap in the destination bank.

/// Negative flag.
pub const PSW_N: u32 = 0x8000_0000;
/// Zero flag.
pub const PSW_Z: u32 = 0x4000_0000;
/// Carry flag.
pub const PSW_C: u32 = 0x2000_0000;
/// Overflow flag.
pub const PSW_V: u32 = 0x1000_0000;
/// IRQ disable.
pub const PSW_I: u32 = 0x0800_0000;
/// FIRQ disable.
pub const PSW_F: u32 = 0x0400_0000;
/// Mode field.
pub const PSW_MODE: u32 = 0x0000_0003;
/// Condition flags.
pub const PSW_FLAGS: u32 = PSW_N | PSW_Z | PSW_C | PSW_V;
/// Every bit the status word stores.
pub const PSW_MASK: u32 = PSW_FLAGS | PSW_I | PSW_F | PSW_MODE;

/// Mask applied to word addresses (26-bit, word aligned).
pub const ADDRESS_MASK: u32 = 0x03FF_FFFC;
/// Mask applied to byte addresses (26-bit).
pub const BYTE_ADDRESS_MASK: u32 = 0x03FF_FFFF;

/// Register index of the program counter.
pub const PC: usize = 15;
/// Register index of the link register.
pub const LR: usize = 14;
/// Register index of the stack pointer.
pub const SP: usize = 13;

/// Processor mode held in the low two PSW bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Mode {
    /// Unprivileged.
    User = 0,
    /// Fast interrupt; banks `R8..R14`.
    Firq = 1,
    /// Interrupt; banks `R13..R14`.
    Irq = 2,
    /// Supervisor; banks `R13..R14`.
    Supervisor = 3,
}

impl Mode {
    /// Every mode, in PSW encoding order.
    pub const ALL: [Self; 4] = [Self::User, Self::Firq, Self::Irq, Self::Supervisor];

    /// Decodes the mode field of a status word.
    #[must_use]
    pub const fn from_psw(psw: u32) -> Self {
        match psw & PSW_MODE {
            0 => Self::User,
            1 => Self::Firq,
            2 => Self::Irq,
            _ => Self::Supervisor,
        }
    }

    /// PSW mode bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Lowest register index the mode banks, or `None` for User.
    #[must_use]
    pub const fn first_banked(self) -> Option<usize> {
        match self {
            Self::User => None,
            Self::Firq => Some(8),
            Self::Irq | Self::Supervisor => Some(13),
        }
    }

    /// Short name used by the disassembler and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "usr",
            Self::Firq => "fiq",
            Self::Irq => "irq",
            Self::Supervisor => "svc",
        }
    }
}

/// Live registers, shadow banks and the status word.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    live: [u32; 16],
    firq: [u32; 7],
    irq: [u32; 2],
    svc: [u32; 2],
    psw: u32,
}

impl RegisterFile {
    /// All registers zero, User mode, flags clear.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            live: [0; 16],
            firq: [0; 7],
            irq: [0; 2],
            svc: [0; 2],
            psw: 0,
        }
    }

    /// Live register `index` (`0..=15`) of the current mode.
    #[must_use]
    pub const fn get(&self, index: usize) -> u32 {
        self.live[index & 15]
    }

    /// Writes live register `index`.
    pub const fn set(&mut self, index: usize, value: u32) {
        self.live[index & 15] = value;
    }

    /// Status word.
    #[must_use]
    pub const fn psw(&self) -> u32 {
        self.psw
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        Mode::from_psw(self.psw)
    }

    /// `true` when `flag` is set in the status word.
    #[must_use]
    pub const fn flag(&self, flag: u32) -> bool {
        self.psw & flag != 0
    }

    /// Carry as 0 or 1.
    #[must_use]
    pub const fn carry(&self) -> u32 {
        (self.psw & PSW_C) >> 29
    }

    /// Replaces N, Z, C and V with the matching bits of `flags`.
    pub const fn set_flags(&mut self, flags: u32) {
        self.psw = (self.psw & !PSW_FLAGS) | (flags & PSW_FLAGS);
    }

    /// Sets N and Z from `result` and C from `carry`, leaving V.
    pub const fn set_logical_flags(&mut self, result: u32, carry: bool) {
        let mut flags = (result & PSW_N) | (self.psw & PSW_V);
        if result == 0 {
            flags |= PSW_Z;
        }
        if carry {
            flags |= PSW_C;
        }
        self.set_flags(flags);
    }

    /// Loads a new status word, swapping banks when the mode changes.
    pub fn set_psw(&mut self, value: u32) {
        self.switch_mode(Mode::from_psw(value));
        self.psw = value & PSW_MASK;
    }

    /// Status update allowed from the current mode: privileged modes take
    /// every bit of `value`, User only the condition flags.
    pub fn restore_psw(&mut self, value: u32) {
        if self.mode() == Mode::User {
            self.psw = (self.psw & !PSW_FLAGS) | (value & PSW_FLAGS);
        } else {
            self.set_psw(value);
        }
    }

    /// Changes mode, exchanging live registers with the shadow banks.
    pub fn switch_mode(&mut self, to: Mode) {
        let from = self.mode();
        if from == to {
            return;
        }
        self.swap_bank(from);
        self.swap_bank(to);
        self.psw = (self.psw & !PSW_MODE) | to.bits();
    }

    fn swap_bank(&mut self, mode: Mode) {
        match mode {
            Mode::User => {}
            Mode::Firq => self.live[8..15].swap_with_slice(&mut self.firq),
            Mode::Irq => self.live[13..15].swap_with_slice(&mut self.irq),
            Mode::Supervisor => self.live[13..15].swap_with_slice(&mut self.svc),
        }
    }

    fn shadow_slot(&mut self, index: usize) -> Option<&mut u32> {
        match (self.mode(), index) {
            (Mode::Firq, 8..=14) => Some(&mut self.firq[index - 8]),
            (Mode::Irq, 13..=14) => Some(&mut self.irq[index - 13]),
            (Mode::Supervisor, 13..=14) => Some(&mut self.svc[index - 13]),
            _ => None,
        }
    }

    /// User-bank register `index`, wherever it currently lives.
    #[must_use]
    pub fn user(&self, index: usize) -> u32 {
        let index = index & 15;
        match (self.mode(), index) {
            (Mode::Firq, 8..=14) => self.firq[index - 8],
            (Mode::Irq, 13..=14) => self.irq[index - 13],
            (Mode::Supervisor, 13..=14) => self.svc[index - 13],
            _ => self.live[index],
        }
    }

    /// Writes the User-bank copy of register `index`.
    pub fn set_user(&mut self, index: usize, value: u32) {
        let index = index & 15;
        match self.shadow_slot(index) {
            Some(slot) => *slot = value,
            None => self.live[index] = value,
        }
    }

    /// Stored FIRQ bank (`R8..R14`).
    #[must_use]
    pub const fn firq_bank(&self) -> &[u32; 7] {
        &self.firq
    }

    /// Stored IRQ bank (`R13`, `R14`).
    #[must_use]
    pub const fn irq_bank(&self) -> &[u32; 2] {
        &self.irq
    }

    /// Stored Supervisor bank (`R13`, `R14`).
    #[must_use]
    pub const fn svc_bank(&self) -> &[u32; 2] {
        &self.svc
    }

    pub(crate) const fn banks_mut(&mut self) -> (&mut [u32; 7], &mut [u32; 2], &mut [u32; 2]) {
        (&mut self.firq, &mut self.irq, &mut self.svc)
    }

    /// Writes the status word without touching the banks.
    pub(crate) const fn set_psw_raw(&mut self, value: u32) {
        self.psw = value & PSW_MASK;
    }
}

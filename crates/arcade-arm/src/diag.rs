/// Counters kept by an [`crate::ArmCore`] across resets of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ArmDiagnostics {
    /// Instructions fetched, including those whose condition failed.
    pub instructions: u64,
    /// Instructions skipped by their condition field.
    pub condition_skipped: u64,
    /// Undefined encodings met.
    pub illegal: u64,
    /// Address and opcode of the most recent undefined encoding.
    pub last_illegal: Option<(u32, u32)>,
    /// IRQ entries taken.
    pub irq_entries: u64,
    /// FIRQ entries taken.
    pub firq_entries: u64,
    /// `SWI` instructions executed.
    pub swis: u64,
}

impl ArmDiagnostics {
    /// Records an undefined encoding at `pc` and returns `true` the first time.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_illegal(&mut self, pc: u32, opcode: u32) -> bool {
        self.illegal = self.illegal.saturating_add(1);
        self.last_illegal = Some((pc, opcode));
        self.illegal == 1
    }

    /// Clears every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::ArmDiagnostics;

    #[test]
    fn first_illegal_is_reported_once() {
        let mut diag = ArmDiagnostics::default();
        assert!(diag.record_illegal(0x100, 0xEE00_0000));
        assert!(!diag.record_illegal(0x104, 0xEC00_0000));
        assert_eq!(diag.illegal, 2);
        assert_eq!(diag.last_illegal, Some((0x104, 0xEC00_0000)));
        diag.reset();
        assert_eq!(diag, ArmDiagnostics::default());
    }
}

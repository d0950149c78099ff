//! Barrel shifter for the second operand.
//!
//! Every form returns the shifted value together with the carry it shifts
//! out, which logical data-processing operations copy into C.

/// Shift type, bits 6..5 of the operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShiftKind {
    /// Logical shift left.
    Lsl = 0,
    /// Logical shift right.
    Lsr = 1,
    /// Arithmetic shift right.
    Asr = 2,
    /// Rotate right; an immediate amount of zero means rotate with extend.
    Ror = 3,
}

impl ShiftKind {
    /// Shift type encoded in `opcode`.
    #[must_use]
    pub const fn of(opcode: u32) -> Self {
        match (opcode >> 5) & 3 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }

    /// Upper-case mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Lsl => "LSL",
            Self::Lsr => "LSR",
            Self::Asr => "ASR",
            Self::Ror => "ROR",
        }
    }
}

/// Shifted operand and the carry shifted out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShifterOutput {
    /// Operand value.
    pub value: u32,
    /// Carry-out.
    pub carry: bool,
}

impl ShifterOutput {
    const fn new(value: u32, carry: bool) -> Self {
        Self { value, carry }
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn asr(value: u32, amount: u32) -> u32 {
    ((value as i32) >> amount) as u32
}

const fn bit(value: u32, index: u32) -> bool {
    (value >> index) & 1 != 0
}

/// Shift by a 5-bit immediate `amount`.
///
/// Zero encodes the special forms: no shift for `LSL`, a 32-bit shift for
/// `LSR` and `ASR`, and `RRX` for `ROR`.
#[must_use]
pub const fn shift_immediate(kind: ShiftKind, value: u32, amount: u32, carry: bool) -> ShifterOutput {
    let amount = amount & 31;
    match kind {
        ShiftKind::Lsl if amount == 0 => ShifterOutput::new(value, carry),
        ShiftKind::Lsl => ShifterOutput::new(value << amount, bit(value, 32 - amount)),
        ShiftKind::Lsr if amount == 0 => ShifterOutput::new(0, bit(value, 31)),
        ShiftKind::Lsr => ShifterOutput::new(value >> amount, bit(value, amount - 1)),
        ShiftKind::Asr if amount == 0 => ShifterOutput::new(asr(value, 31), bit(value, 31)),
        ShiftKind::Asr => ShifterOutput::new(asr(value, amount), bit(value, amount - 1)),
        ShiftKind::Ror if amount == 0 => {
            let high = if carry { 0x8000_0000 } else { 0 };
            ShifterOutput::new(high | (value >> 1), bit(value, 0))
        }
        ShiftKind::Ror => ShifterOutput::new(value.rotate_right(amount), bit(value, amount - 1)),
    }
}

/// Shift by the bottom byte of a register.
///
/// A zero amount leaves the value and carry untouched.
#[must_use]
pub const fn shift_register(kind: ShiftKind, value: u32, amount: u32, carry: bool) -> ShifterOutput {
    let amount = amount & 0xFF;
    if amount == 0 {
        return ShifterOutput::new(value, carry);
    }
    match kind {
        ShiftKind::Lsl => match amount {
            1..=31 => ShifterOutput::new(value << amount, bit(value, 32 - amount)),
            32 => ShifterOutput::new(0, bit(value, 0)),
            _ => ShifterOutput::new(0, false),
        },
        ShiftKind::Lsr => match amount {
            1..=31 => ShifterOutput::new(value >> amount, bit(value, amount - 1)),
            32 => ShifterOutput::new(0, bit(value, 31)),
            _ => ShifterOutput::new(0, false),
        },
        ShiftKind::Asr => {
            if amount < 32 {
                ShifterOutput::new(asr(value, amount), bit(value, amount - 1))
            } else {
                ShifterOutput::new(asr(value, 31), bit(value, 31))
            }
        }
        ShiftKind::Ror => {
            let rotate = amount & 31;
            if rotate == 0 {
                ShifterOutput::new(value, bit(value, 31))
            } else {
                ShifterOutput::new(value.rotate_right(rotate), bit(value, rotate - 1))
            }
        }
    }
}

/// Rotated immediate operand; the carry only changes when the field rotates.
#[must_use]
pub const fn rotated_immediate(field: u32, carry: bool) -> ShifterOutput {
    let value = crate::encoding::IMM12[(field & 0xFFF) as usize];
    if field & 0xF00 == 0 {
        ShifterOutput::new(value, carry)
    } else {
        ShifterOutput::new(value, bit(value, 31))
    }
}

#[cfg(test)]
mod tests {
    use super::{rotated_immediate, shift_immediate, shift_register, ShiftKind, ShifterOutput};
    use proptest::prelude::*;
    use rstest::rstest;

    fn out(value: u32, carry: bool) -> ShifterOutput {
        ShifterOutput { value, carry }
    }

    #[rstest]
    #[case(ShiftKind::Lsl, 0x8000_0001, 0, false, out(0x8000_0001, false))]
    #[case(ShiftKind::Lsl, 0x8000_0001, 1, false, out(0x0000_0002, true))]
    #[case(ShiftKind::Lsr, 0x8000_0001, 0, false, out(0, true))]
    #[case(ShiftKind::Lsr, 0x8000_0003, 1, false, out(0x4000_0001, true))]
    #[case(ShiftKind::Asr, 0x8000_0000, 0, false, out(0xFFFF_FFFF, true))]
    #[case(ShiftKind::Asr, 0x4000_0000, 0, true, out(0, false))]
    #[case(ShiftKind::Asr, 0x8000_0010, 4, false, out(0xF800_0001, false))]
    #[case(ShiftKind::Ror, 0x0000_0001, 0, true, out(0x8000_0000, true))]
    #[case(ShiftKind::Ror, 0x0000_0002, 0, false, out(0x0000_0001, false))]
    #[case(ShiftKind::Ror, 0x0000_00F1, 4, false, out(0x1000_000F, false))]
    fn immediate_shifts(
        #[case] kind: ShiftKind,
        #[case] value: u32,
        #[case] amount: u32,
        #[case] carry: bool,
        #[case] expected: ShifterOutput,
    ) {
        assert_eq!(shift_immediate(kind, value, amount, carry), expected);
    }

    #[rstest]
    #[case(ShiftKind::Lsl, 0x0000_0001, 32, out(0, true))]
    #[case(ShiftKind::Lsl, 0x0000_0001, 33, out(0, false))]
    #[case(ShiftKind::Lsr, 0x8000_0000, 32, out(0, true))]
    #[case(ShiftKind::Lsr, 0x8000_0000, 40, out(0, false))]
    #[case(ShiftKind::Asr, 0x8000_0000, 200, out(0xFFFF_FFFF, true))]
    #[case(ShiftKind::Ror, 0x8000_0001, 32, out(0x8000_0001, true))]
    #[case(ShiftKind::Ror, 0x0000_0003, 33, out(0x8000_0001, true))]
    #[case(ShiftKind::Lsr, 0x0000_00F0, 0x104, out(0x0000_000F, false))]
    fn register_shifts(
        #[case] kind: ShiftKind,
        #[case] value: u32,
        #[case] amount: u32,
        #[case] expected: ShifterOutput,
    ) {
        assert_eq!(shift_register(kind, value, amount, false), expected);
    }

    #[test]
    fn unrotated_immediates_keep_carry() {
        assert_eq!(rotated_immediate(0x0FF, true), out(0xFF, true));
        assert_eq!(rotated_immediate(0x4FF, false), out(0xFF00_0000, true));
        assert_eq!(rotated_immediate(0x101, true), out(0x4000_0000, false));
    }

    proptest! {
        #[test]
        fn register_zero_is_identity(kind in 0u32..4, value: u32, carry: bool) {
            let kind = ShiftKind::of(kind << 5);
            prop_assert_eq!(shift_register(kind, value, 0x100, carry), out(value, carry));
        }

        #[test]
        fn register_and_immediate_agree_below_32(kind in 0u32..4, value: u32, amount in 1u32..32, carry: bool) {
            let kind = ShiftKind::of(kind << 5);
            prop_assert_eq!(
                shift_register(kind, value, amount, carry),
                shift_immediate(kind, value, amount, carry)
            );
        }

        #[test]
        fn lsl_then_lsr_masks_low_bits(value: u32, amount in 1u32..32) {
            let left = shift_immediate(ShiftKind::Lsl, value, amount, false).value;
            let back = shift_immediate(ShiftKind::Lsr, left, amount, false).value;
            prop_assert_eq!(back, value & (u32::MAX >> amount));
        }
    }
}

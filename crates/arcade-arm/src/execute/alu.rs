//! Data-processing instructions.

use arcade_core::MemoryBus;

use crate::encoding::{reg_at, DataOp, OpClass};
use crate::shifter::{rotated_immediate, shift_immediate, shift_register, ShiftKind, ShifterOutput};
use crate::state::{PC, PSW_C, PSW_N, PSW_V, PSW_Z};
use crate::ArmCore;

/// Adder result with its carry and signed overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AddOutput {
    value: u32,
    carry: bool,
    overflow: bool,
}

/// `a + b + carry_in`; subtraction is `a + !b + 1`, so C is NOT borrow.
#[allow(clippy::cast_possible_truncation)]
const fn add_with_carry(a: u32, b: u32, carry_in: u32) -> AddOutput {
    let sum = a as u64 + b as u64 + carry_in as u64;
    let value = sum as u32;
    AddOutput {
        value,
        carry: sum > u32::MAX as u64,
        overflow: (!(a ^ b) & (a ^ value)) >> 31 != 0,
    }
}

impl ArmCore {
    /// `Rm` as an operand: R15 carries the status word in its spare bits.
    pub(super) const fn operand_rm(&self, rm: usize) -> u32 {
        if rm == PC {
            self.regs.get(PC) | self.regs.psw()
        } else {
            self.regs.get(rm)
        }
    }

    pub(super) const fn shifted_register(&self, opcode: u32) -> ShifterOutput {
        let value = self.operand_rm(reg_at(opcode, 0));
        let kind = ShiftKind::of(opcode);
        let carry = self.regs.flag(PSW_C);
        if opcode & 0x10 != 0 {
            let amount = self.regs.get(reg_at(opcode, 8));
            shift_register(kind, value, amount, carry)
        } else {
            shift_immediate(kind, value, (opcode >> 7) & 31, carry)
        }
    }

    pub(super) fn data_processing(&mut self, opcode: u32, bus: &mut dyn MemoryBus) {
        let operand = if matches!(OpClass::of(opcode), OpClass::DataImmediate) {
            rotated_immediate(opcode, self.regs.flag(PSW_C))
        } else {
            self.shifted_register(opcode)
        };
        let op = DataOp::of(opcode);
        let rn = self.regs.get(reg_at(opcode, 16));
        let rd = reg_at(opcode, 12);
        let set_flags = opcode & (1 << 20) != 0;
        let op2 = operand.value;
        let carry = self.regs.carry();

        let arithmetic = match op {
            DataOp::Sub | DataOp::Cmp => Some(add_with_carry(rn, !op2, 1)),
            DataOp::Rsb => Some(add_with_carry(op2, !rn, 1)),
            DataOp::Add | DataOp::Cmn => Some(add_with_carry(rn, op2, 0)),
            DataOp::Adc => Some(add_with_carry(rn, op2, carry)),
            DataOp::Sbc => Some(add_with_carry(rn, !op2, carry)),
            DataOp::Rsc => Some(add_with_carry(op2, !rn, carry)),
            _ => None,
        };
        let result = match (op, arithmetic) {
            (_, Some(sum)) => sum.value,
            (DataOp::And | DataOp::Tst, None) => rn & op2,
            (DataOp::Eor | DataOp::Teq, None) => rn ^ op2,
            (DataOp::Orr, None) => rn | op2,
            (DataOp::Bic, None) => rn & !op2,
            (DataOp::Mvn, None) => !op2,
            (_, None) => op2,
        };

        if rd == PC {
            if !op.is_test() {
                self.write_pc(bus, result);
            } else if set_flags {
                self.regs.restore_psw(result);
            }
            return;
        }
        if set_flags {
            match arithmetic {
                Some(sum) => {
                    let mut flags = result & PSW_N;
                    if result == 0 {
                        flags |= PSW_Z;
                    }
                    if sum.carry {
                        flags |= PSW_C;
                    }
                    if sum.overflow {
                        flags |= PSW_V;
                    }
                    self.regs.set_flags(flags);
                }
                None => self.regs.set_logical_flags(result, operand.carry),
            }
        }
        if op.is_test() {
            return;
        }
        self.regs.set(rd, result);
    }
}

#[cfg(test)]
mod tests {
    use super::add_with_carry;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x7FFF_FFFF, 1, 0, 0x8000_0000, false, true)]
    #[case(0xFFFF_FFFF, 1, 0, 0, true, false)]
    #[case(0x8000_0000, 0x8000_0000, 0, 0, true, true)]
    #[case(5, !3, 1, 2, true, false)]
    #[case(3, !5, 1, 0xFFFF_FFFE, false, false)]
    #[case(0x8000_0000, !1, 1, 0x7FFF_FFFF, true, true)]
    fn adder_flags(
        #[case] a: u32,
        #[case] b: u32,
        #[case] carry_in: u32,
        #[case] value: u32,
        #[case] carry: bool,
        #[case] overflow: bool,
    ) {
        let out = add_with_carry(a, b, carry_in);
        assert_eq!((out.value, out.carry, out.overflow), (value, carry, overflow));
    }

    proptest! {
        #[test]
        fn subtraction_carry_is_not_borrow(a: u32, b: u32) {
            let out = add_with_carry(a, !b, 1);
            prop_assert_eq!(out.value, a.wrapping_sub(b));
            prop_assert_eq!(out.carry, a >= b);
            let signed = i64::from(i32::from_ne_bytes(a.to_ne_bytes()))
                - i64::from(i32::from_ne_bytes(b.to_ne_bytes()));
            prop_assert_eq!(out.overflow, i32::try_from(signed).is_err());
        }
    }
}

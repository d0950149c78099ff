//! Single and block data transfers.

use arcade_core::MemoryBus;

use crate::encoding::{reg_at, OpClass};
use crate::state::{ADDRESS_MASK, BYTE_ADDRESS_MASK, PC};
use crate::ArmCore;

const PRE_INDEX: u32 = 1 << 24;
const UP: u32 = 1 << 23;
const BYTE: u32 = 1 << 22;
// Bit 22 of a block transfer selects the User bank (`^`), never bytes.
const USER_BANK: u32 = 1 << 22;
const WRITE_BACK: u32 = 1 << 21;
const LOAD: u32 = 1 << 20;

impl ArmCore {
    /// R15 as stored by `STR` and `STM`: one word past the pipelined PC, with
    /// the status word merged in.
    const fn stored_pc(&self) -> u32 {
        (self.regs.get(PC).wrapping_add(4) & ADDRESS_MASK) | self.regs.psw()
    }

    pub(super) fn single_transfer(&mut self, opcode: u32, bus: &mut dyn MemoryBus) {
        let offset = if matches!(OpClass::of(opcode), OpClass::TransferRegister) {
            self.shifted_register(opcode).value
        } else {
            opcode & 0xFFF
        };
        let rn = reg_at(opcode, 16);
        let rd = reg_at(opcode, 12);
        let base = self.regs.get(rn);
        let indexed = if opcode & UP != 0 {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let pre = opcode & PRE_INDEX != 0;
        let address = if pre { indexed } else { base };
        let write_back = (!pre || opcode & WRITE_BACK != 0) && rn != PC;

        if opcode & LOAD != 0 {
            let value = if opcode & BYTE != 0 {
                u32::from(bus.read8(address & BYTE_ADDRESS_MASK))
            } else {
                bus.read32(address & ADDRESS_MASK)
            };
            if write_back {
                self.regs.set(rn, indexed);
            }
            if rd == PC {
                self.write_pc(bus, value);
            } else {
                self.regs.set(rd, value);
            }
        } else {
            let value = if rd == PC {
                self.stored_pc()
            } else {
                self.regs.get(rd)
            };
            if opcode & BYTE != 0 {
                bus.write8(address & BYTE_ADDRESS_MASK, value.to_le_bytes()[0]);
            } else {
                bus.write32(address & ADDRESS_MASK, value);
            }
            if write_back {
                self.regs.set(rn, indexed);
            }
        }
    }

    pub(super) fn block_transfer(&mut self, opcode: u32, bus: &mut dyn MemoryBus) {
        let list = opcode & 0xFFFF;
        let rn = reg_at(opcode, 16);
        let base = self.regs.get(rn);
        let span = list.count_ones() * 4;
        let up = opcode & UP != 0;
        let pre = opcode & PRE_INDEX != 0;
        let mut address = match (up, pre) {
            (true, false) => base,
            (true, true) => base.wrapping_add(4),
            (false, false) => base.wrapping_sub(span).wrapping_add(4),
            (false, true) => base.wrapping_sub(span),
        };
        let final_base = if up {
            base.wrapping_add(span)
        } else {
            base.wrapping_sub(span)
        };
        let write_back = opcode & WRITE_BACK != 0 && rn != PC;
        let user_bank = opcode & USER_BANK != 0;
        let loads_pc = list & (1 << PC) != 0;
        let registers = (0..16usize).filter(|index| list & (1 << *index) != 0);

        if opcode & LOAD != 0 {
            if write_back {
                self.regs.set(rn, final_base);
            }
            let mut new_pc = None;
            for index in registers {
                let value = bus.read32(address & ADDRESS_MASK);
                address = address.wrapping_add(4);
                if index == PC {
                    new_pc = Some(value);
                } else if user_bank && !loads_pc {
                    self.regs.set_user(index, value);
                } else {
                    self.regs.set(index, value);
                }
            }
            if let Some(value) = new_pc {
                self.write_pc(bus, value);
            }
        } else {
            for index in registers {
                let value = if index == PC {
                    self.stored_pc()
                } else if user_bank {
                    self.regs.user(index)
                } else {
                    self.regs.get(index)
                };
                bus.write32(address & ADDRESS_MASK, value);
                address = address.wrapping_add(4);
            }
            if write_back {
                self.regs.set(rn, final_base);
            }
        }
    }
}

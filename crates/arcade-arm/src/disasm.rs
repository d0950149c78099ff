//! Single-instruction disassembly.

use crate::encoding::{branch_offset, reg_at, Condition, DataOp, OpClass, IMM12};
use crate::shifter::ShiftKind;
use crate::state::{ADDRESS_MASK, PC};

/// Formats the instruction `opcode` located at `pc`.
///
/// Undefined encodings render as `.word 0xXXXXXXXX ; UNDEFINED`.
#[must_use]
pub fn disassemble(pc: u32, opcode: u32) -> String {
    let cond = Condition::of(opcode).suffix();
    match OpClass::of(opcode) {
        OpClass::DataRegister | OpClass::DataImmediate => data_processing(opcode, cond),
        OpClass::TransferImmediate | OpClass::TransferRegister => single_transfer(opcode, cond),
        OpClass::Block => block_transfer(opcode, cond),
        OpClass::Branch | OpClass::BranchLink => {
            let link = if opcode & (1 << 24) != 0 { "L" } else { "" };
            let target = pc
                .wrapping_add(8)
                .wrapping_add_signed(branch_offset(opcode) << 2)
                & ADDRESS_MASK;
            format!("B{link}{cond} 0x{target:08X}")
        }
        OpClass::SoftwareInterrupt => format!("SWI{cond} 0x{:06X}", opcode & 0x00FF_FFFF),
        OpClass::Undefined => format!(".word 0x{opcode:08X} ; UNDEFINED"),
    }
}

fn register(index: usize) -> String {
    format!("R{index}")
}

/// Shifted-register operand, `Rm` plus any shift.
fn shifted_register(opcode: u32) -> String {
    let rm = register(reg_at(opcode, 0));
    let kind = ShiftKind::of(opcode);
    if opcode & 0x10 != 0 {
        return format!("{rm}, {} {}", kind.mnemonic(), register(reg_at(opcode, 8)));
    }
    match (kind, (opcode >> 7) & 31) {
        (ShiftKind::Lsl, 0) => rm,
        (ShiftKind::Ror, 0) => format!("{rm}, RRX"),
        (ShiftKind::Lsr | ShiftKind::Asr, 0) => format!("{rm}, {} #32", kind.mnemonic()),
        (_, amount) => format!("{rm}, {} #{amount}", kind.mnemonic()),
    }
}

fn data_processing(opcode: u32, cond: &str) -> String {
    let op = DataOp::of(opcode);
    let rd = reg_at(opcode, 12);
    let set_flags = opcode & (1 << 20) != 0;
    let suffix = match (op.is_test(), set_flags) {
        (true, _) if rd == PC => "P",
        (false, true) => "S",
        _ => "",
    };
    let operand = if matches!(OpClass::of(opcode), OpClass::DataImmediate) {
        format!("#0x{:X}", IMM12[(opcode & 0xFFF) as usize])
    } else {
        shifted_register(opcode)
    };
    let mnemonic = format!("{}{cond}{suffix}", op.mnemonic());
    let rn = register(reg_at(opcode, 16));
    if op.is_move() {
        format!("{mnemonic} {}, {operand}", register(rd))
    } else if op.is_test() {
        format!("{mnemonic} {rn}, {operand}")
    } else {
        format!("{mnemonic} {}, {rn}, {operand}", register(rd))
    }
}

fn single_transfer(opcode: u32, cond: &str) -> String {
    let load = if opcode & (1 << 20) != 0 { "LDR" } else { "STR" };
    let byte = if opcode & (1 << 22) != 0 { "B" } else { "" };
    let sign = if opcode & (1 << 23) != 0 { "" } else { "-" };
    let offset = if matches!(OpClass::of(opcode), OpClass::TransferRegister) {
        Some(format!("{sign}{}", shifted_register(opcode)))
    } else {
        let value = opcode & 0xFFF;
        (value != 0).then(|| format!("#{sign}0x{value:X}"))
    };
    let rn = register(reg_at(opcode, 16));
    let write_back = if opcode & (1 << 21) != 0 { "!" } else { "" };
    let address = match (opcode & (1 << 24) != 0, offset) {
        (true, Some(offset)) => format!("[{rn}, {offset}]{write_back}"),
        (true, None) => format!("[{rn}]{write_back}"),
        (false, Some(offset)) => format!("[{rn}], {offset}"),
        (false, None) => format!("[{rn}]"),
    };
    format!("{load}{cond}{byte} {}, {address}", register(reg_at(opcode, 12)))
}

/// Register list with runs of three or more collapsed into ranges.
fn register_list(list: u32) -> String {
    let mut parts = Vec::new();
    let mut index = 0;
    while index < 16 {
        if list & (1 << index) == 0 {
            index += 1;
            continue;
        }
        let start = index;
        while index < 16 && list & (1 << index) != 0 {
            index += 1;
        }
        let end = index - 1;
        if end - start >= 2 {
            parts.push(format!("{}-{}", register(start), register(end)));
        } else {
            parts.extend((start..=end).map(register));
        }
    }
    format!("{{{}}}", parts.join(", "))
}

fn block_transfer(opcode: u32, cond: &str) -> String {
    let load = if opcode & (1 << 20) != 0 { "LDM" } else { "STM" };
    let mode = match (opcode & (1 << 23) != 0, opcode & (1 << 24) != 0) {
        (true, false) => "IA",
        (true, true) => "IB",
        (false, false) => "DA",
        (false, true) => "DB",
    };
    let write_back = if opcode & (1 << 21) != 0 { "!" } else { "" };
    let user = if opcode & (1 << 22) != 0 { "^" } else { "" };
    format!(
        "{load}{cond}{mode} {}{write_back}, {}{user}",
        register(reg_at(opcode, 16)),
        register_list(opcode & 0xFFFF)
    )
}

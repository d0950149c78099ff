//! Opcode fields, condition codes and the primary dispatch table.

use crate::state::{PSW_C, PSW_N, PSW_V, PSW_Z};

/// Condition field, bits 31..28 of every opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Condition {
    Eq = 0x0,
    Ne = 0x1,
    Cs = 0x2,
    Cc = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    Al = 0xE,
    Nv = 0xF,
}

impl Condition {
    /// Every condition in encoding order.
    pub const ALL: [Self; 16] = [
        Self::Eq,
        Self::Ne,
        Self::Cs,
        Self::Cc,
        Self::Mi,
        Self::Pl,
        Self::Vs,
        Self::Vc,
        Self::Hi,
        Self::Ls,
        Self::Ge,
        Self::Lt,
        Self::Gt,
        Self::Le,
        Self::Al,
        Self::Nv,
    ];

    /// Condition of `opcode`.
    #[must_use]
    pub const fn of(opcode: u32) -> Self {
        Self::ALL[(opcode >> 28) as usize]
    }

    /// Evaluates the condition against the flags of `psw`. `NV` never passes.
    #[must_use]
    pub const fn passes(self, psw: u32) -> bool {
        let n = psw & PSW_N != 0;
        let z = psw & PSW_Z != 0;
        let c = psw & PSW_C != 0;
        let v = psw & PSW_V != 0;
        match self {
            Self::Eq => z,
            Self::Ne => !z,
            Self::Cs => c,
            Self::Cc => !c,
            Self::Mi => n,
            Self::Pl => !n,
            Self::Vs => v,
            Self::Vc => !v,
            Self::Hi => c && !z,
            Self::Ls => !c || z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
            Self::Al => true,
            Self::Nv => false,
        }
    }

    /// Assembler suffix; empty for `AL`.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Cs => "CS",
            Self::Cc => "CC",
            Self::Mi => "MI",
            Self::Pl => "PL",
            Self::Vs => "VS",
            Self::Vc => "VC",
            Self::Hi => "HI",
            Self::Ls => "LS",
            Self::Ge => "GE",
            Self::Lt => "LT",
            Self::Gt => "GT",
            Self::Le => "LE",
            Self::Al => "",
            Self::Nv => "NV",
        }
    }
}

/// Data-processing operation, bits 24..21.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum DataOp {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl DataOp {
    const ALL: [Self; 16] = [
        Self::And,
        Self::Eor,
        Self::Sub,
        Self::Rsb,
        Self::Add,
        Self::Adc,
        Self::Sbc,
        Self::Rsc,
        Self::Tst,
        Self::Teq,
        Self::Cmp,
        Self::Cmn,
        Self::Orr,
        Self::Mov,
        Self::Bic,
        Self::Mvn,
    ];

    /// Operation encoded in `opcode`.
    #[must_use]
    pub const fn of(opcode: u32) -> Self {
        Self::ALL[((opcode >> 21) & 0xF) as usize]
    }

    /// `TST`, `TEQ`, `CMP` and `CMN` only set flags.
    #[must_use]
    pub const fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }

    /// `MOV` and `MVN` ignore `Rn`.
    #[must_use]
    pub const fn is_move(self) -> bool {
        matches!(self, Self::Mov | Self::Mvn)
    }

    /// Operations whose flags come from the shifter rather than the adder.
    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(
            self,
            Self::And | Self::Eor | Self::Tst | Self::Teq | Self::Orr | Self::Mov | Self::Bic | Self::Mvn
        )
    }

    /// Upper-case mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Eor => "EOR",
            Self::Sub => "SUB",
            Self::Rsb => "RSB",
            Self::Add => "ADD",
            Self::Adc => "ADC",
            Self::Sbc => "SBC",
            Self::Rsc => "RSC",
            Self::Tst => "TST",
            Self::Teq => "TEQ",
            Self::Cmp => "CMP",
            Self::Cmn => "CMN",
            Self::Orr => "ORR",
            Self::Mov => "MOV",
            Self::Bic => "BIC",
            Self::Mvn => "MVN",
        }
    }
}

/// Instruction class selected by bits 27..20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Data processing with a shifted register operand.
    DataRegister,
    /// Data processing with a rotated 8-bit immediate.
    DataImmediate,
    /// `LDR`/`STR` with a 12-bit immediate offset.
    TransferImmediate,
    /// `LDR`/`STR` with a register offset shifted by an immediate.
    TransferRegister,
    /// `LDM`/`STM`.
    Block,
    /// `B`.
    Branch,
    /// `BL`.
    BranchLink,
    /// Coprocessor space, undefined on this core.
    Undefined,
    /// `SWI`.
    SoftwareInterrupt,
}

const fn class_of(index: usize) -> OpClass {
    match index >> 5 {
        0 => OpClass::DataRegister,
        1 => OpClass::DataImmediate,
        2 => OpClass::TransferImmediate,
        3 => OpClass::TransferRegister,
        4 => OpClass::Block,
        5 if index & 0x10 == 0 => OpClass::Branch,
        5 => OpClass::BranchLink,
        _ if index >= 0xF0 => OpClass::SoftwareInterrupt,
        _ => OpClass::Undefined,
    }
}

const fn build_dispatch() -> [OpClass; 256] {
    let mut table = [OpClass::Undefined; 256];
    let mut index = 0;
    while index < 256 {
        table[index] = class_of(index);
        index += 1;
    }
    table
}

/// Instruction class for each value of bits 27..20.
pub const DISPATCH: [OpClass; 256] = build_dispatch();

impl OpClass {
    /// Class of `opcode`.
    ///
    /// Register-offset transfers with bit 4 set have no defined meaning and
    /// decode as [`OpClass::Undefined`].
    #[must_use]
    pub const fn of(opcode: u32) -> Self {
        let class = DISPATCH[((opcode >> 20) & 0xFF) as usize];
        if matches!(class, Self::TransferRegister) && opcode & 0x10 != 0 {
            Self::Undefined
        } else {
            class
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn build_immediates() -> [u32; 4096] {
    let mut table = [0; 4096];
    let mut index = 0;
    while index < 4096 {
        let base = (index & 0xFF) as u32;
        let rotate = ((index >> 8) * 2) as u32;
        table[index] = base.rotate_right(rotate);
        index += 1;
    }
    table
}

/// Decoded value of every 12-bit rotated immediate field.
pub const IMM12: [u32; 4096] = build_immediates();

/// Register ids understood by `register` / `set_register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ArmRegister {
    /// Opcode being executed (prefetch slot 0).
    Op = 0,
    /// First lookahead word.
    Q1 = 1,
    /// Second lookahead word.
    Q2 = 2,
    /// Program status word.
    Psw = 3,
    R0 = 4,
    R1 = 5,
    R2 = 6,
    R3 = 7,
    R4 = 8,
    R5 = 9,
    R6 = 10,
    R7 = 11,
    R8 = 12,
    R9 = 13,
    R10 = 14,
    R11 = 15,
    R12 = 16,
    R13 = 17,
    R14 = 18,
    R15 = 19,
    Fr8 = 20,
    Fr9 = 21,
    Fr10 = 22,
    Fr11 = 23,
    Fr12 = 24,
    Fr13 = 25,
    Fr14 = 26,
    Ir13 = 27,
    Ir14 = 28,
    Sr13 = 29,
    Sr14 = 30,
}

impl ArmRegister {
    /// Every register id, in numeric order.
    pub const ALL: [Self; 31] = [
        Self::Op,
        Self::Q1,
        Self::Q2,
        Self::Psw,
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
        Self::Fr8,
        Self::Fr9,
        Self::Fr10,
        Self::Fr11,
        Self::Fr12,
        Self::Fr13,
        Self::Fr14,
        Self::Ir13,
        Self::Ir14,
        Self::Sr13,
        Self::Sr14,
    ];

    /// Register for a numeric id.
    #[must_use]
    pub const fn from_id(id: u32) -> Option<Self> {
        let index = id as usize;
        if index < Self::ALL.len() {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Numeric id.
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Live register `R0..R15`.
    #[must_use]
    pub const fn general(index: usize) -> Self {
        Self::ALL[4 + (index & 15)]
    }
}

/// Register field at bit `shift`.
#[must_use]
pub const fn reg_at(opcode: u32, shift: u32) -> usize {
    ((opcode >> shift) & 0xF) as usize
}

/// Sign-extended 24-bit branch offset, in words.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn branch_offset(opcode: u32) -> i32 {
    ((opcode << 8) as i32) >> 8
}

//! The ARM core as seen by the scheduler.

use arcade_core::{CoreContext, CoreError, CpuCore, LineState, MemoryBus};
use tracing::{debug, trace};

use crate::encoding::ArmRegister;
use crate::state::{Mode, RegisterFile, ADDRESS_MASK, LR, PC, PSW_F, PSW_I, PSW_MODE};
use crate::{ArmConfig, ArmDiagnostics};

/// Cycles charged for every instruction, executed or skipped.
pub const CYCLES_PER_INSTRUCTION: i32 = 4;

/// Size of the blob produced by [`CpuCore::context`].
pub const CONTEXT_SIZE: usize = 128;

/// IRQ input line.
pub const IRQ_LINE: u8 = 0;
/// FIRQ input line.
pub const FIRQ_LINE: u8 = 1;

const IRQ_VECTOR: u32 = 0x18;
const FIRQ_VECTOR: u32 = 0x1C;

const IRQ_PENDING: u8 = 0x01;
const FIRQ_PENDING: u8 = 0x02;

/// ARM interpreter with a three-word prefetch queue.
///
/// `queue[0]` holds the opcode being executed and `queue[1..]` the next two
/// words. R15 always points at the address `queue[2]` was fetched from, so
/// during execution it reads as the opcode address plus eight.
#[derive(Debug, Clone)]
pub struct ArmCore {
    pub(crate) regs: RegisterFile,
    pub(crate) queue: [u32; 3],
    pub(crate) lines: u8,
    pub(crate) config: ArmConfig,
    pub(crate) diag: ArmDiagnostics,
}

impl ArmCore {
    /// Core in its power-on state. Call [`CpuCore::reset`] before running it.
    #[must_use]
    pub const fn new(config: ArmConfig) -> Self {
        Self {
            regs: RegisterFile::new(),
            queue: [0; 3],
            lines: 0,
            config,
            diag: ArmDiagnostics {
                instructions: 0,
                condition_skipped: 0,
                illegal: 0,
                last_illegal: None,
                irq_entries: 0,
                firq_entries: 0,
                swis: 0,
            },
        }
    }

    /// Trap policies in force.
    #[must_use]
    pub const fn config(&self) -> &ArmConfig {
        &self.config
    }

    /// Counters since construction.
    #[must_use]
    pub const fn diagnostics(&self) -> &ArmDiagnostics {
        &self.diag
    }

    /// Register file, for inspection.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Prefetch queue: current opcode and two lookahead words.
    #[must_use]
    pub const fn queue(&self) -> [u32; 3] {
        self.queue
    }

    /// Jumps to `target` and refills the lookahead words from there.
    pub(crate) fn branch_to(&mut self, bus: &mut dyn MemoryBus, target: u32) {
        let target = target & ADDRESS_MASK;
        self.queue[1] = bus.read32(target);
        self.queue[2] = bus.read32(target.wrapping_add(4) & ADDRESS_MASK);
        self.regs.set(PC, target.wrapping_add(4) & ADDRESS_MASK);
    }

    /// Writes a full R15 value: the status bits the mode allows, then the
    /// address, switching register banks when the mode changes.
    pub(crate) fn write_pc(&mut self, bus: &mut dyn MemoryBus, value: u32) {
        self.regs.restore_psw(value);
        self.branch_to(bus, value);
    }

    /// Moves the next word into slot 0 and fetches one more.
    fn advance(&mut self, bus: &mut dyn MemoryBus) {
        let pc = self.regs.get(PC).wrapping_add(4) & ADDRESS_MASK;
        self.regs.set(PC, pc);
        self.queue = [self.queue[1], self.queue[2], bus.read32(pc)];
    }

    /// Switches to `mode`, masks `mask`, links `return_address` with the old
    /// status word into the new mode's R14 and jumps to `vector`.
    pub(crate) fn enter_exception(
        &mut self,
        bus: &mut dyn MemoryBus,
        mode: Mode,
        mask: u32,
        return_address: u32,
        vector: u32,
    ) {
        let psw = self.regs.psw();
        self.regs.set_psw((psw & !PSW_MODE) | mask | mode.bits());
        self.regs.set(LR, (return_address & ADDRESS_MASK) | psw);
        self.branch_to(bus, vector);
    }

    /// Takes a pending, unmasked interrupt. FIRQ wins over IRQ.
    fn service_interrupts(&mut self, ctx: &mut dyn CoreContext) {
        let (line, latch, mode, mask, vector) = if self.lines & FIRQ_PENDING != 0
            && !self.regs.flag(PSW_F)
        {
            (FIRQ_LINE, FIRQ_PENDING, Mode::Firq, PSW_I | PSW_F, FIRQ_VECTOR)
        } else if self.lines & IRQ_PENDING != 0 && !self.regs.flag(PSW_I) {
            (IRQ_LINE, IRQ_PENDING, Mode::Irq, PSW_I, IRQ_VECTOR)
        } else {
            return;
        };
        if ctx.acknowledge_irq(line).release {
            self.lines &= !latch;
        }
        if line == FIRQ_LINE {
            self.diag.firq_entries = self.diag.firq_entries.saturating_add(1);
        } else {
            self.diag.irq_entries = self.diag.irq_entries.saturating_add(1);
        }
        let resume = self.regs.get(PC);
        trace!(line, resume = resume.wrapping_sub(4), "interrupt entry");
        self.enter_exception(ctx.bus(), mode, mask, resume, vector);
    }
}

impl Default for ArmCore {
    fn default() -> Self {
        Self::new(ArmConfig::default())
    }
}

fn write_words(blob: &mut Vec<u8>, words: &[u32]) {
    for word in words {
        blob.extend_from_slice(&word.to_le_bytes());
    }
}

fn read_words<const N: usize>(blob: &[u8], offset: usize) -> [u32; N] {
    let mut words = [0; N];
    for (index, word) in words.iter_mut().enumerate() {
        let start = offset + index * 4;
        *word = u32::from_le_bytes([
            blob[start],
            blob[start + 1],
            blob[start + 2],
            blob[start + 3],
        ]);
    }
    words
}

impl CpuCore for ArmCore {
    fn name(&self) -> &'static str {
        "arm"
    }

    /// Enters Supervisor mode at address zero with both interrupt kinds
    /// masked. `param` is unused.
    fn reset(&mut self, _param: u32, bus: &mut dyn MemoryBus) {
        self.regs = RegisterFile::new();
        self.regs.set_psw(PSW_I | PSW_F | Mode::Supervisor.bits());
        self.queue = [0; 3];
        self.lines = 0;
        self.branch_to(bus, 0);
        debug!("arm reset");
    }

    fn execute(&mut self, cycles: i32, ctx: &mut dyn CoreContext) -> i32 {
        loop {
            self.service_interrupts(ctx);
            self.advance(ctx.bus());
            self.execute_opcode(ctx.bus());
            ctx.consume(CYCLES_PER_INSTRUCTION);
            if ctx.cycles_left() <= 0 {
                break;
            }
        }
        cycles - ctx.cycles_left()
    }

    /// Layout, little-endian words: prefetch queue, PSW, R0..R15, the FIRQ,
    /// IRQ and Supervisor banks, then one byte of pending-line latches.
    fn context(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(CONTEXT_SIZE);
        write_words(&mut blob, &self.queue);
        write_words(&mut blob, &[self.regs.psw()]);
        let live: Vec<u32> = (0..16).map(|index| self.regs.get(index)).collect();
        write_words(&mut blob, &live);
        write_words(&mut blob, self.regs.firq_bank());
        write_words(&mut blob, self.regs.irq_bank());
        write_words(&mut blob, self.regs.svc_bank());
        blob.push(self.lines);
        blob.resize(CONTEXT_SIZE, 0);
        blob
    }

    fn set_context(&mut self, blob: &[u8]) -> Result<(), CoreError> {
        if blob.len() != CONTEXT_SIZE {
            return Err(CoreError::ContextSize {
                expected: CONTEXT_SIZE,
                actual: blob.len(),
            });
        }
        self.queue = read_words::<3>(blob, 0);
        let [psw] = read_words::<1>(blob, 12);
        self.regs.set_psw_raw(psw);
        for (index, value) in read_words::<16>(blob, 16).into_iter().enumerate() {
            self.regs.set(index, value);
        }
        let (firq, irq, svc) = self.regs.banks_mut();
        *firq = read_words::<7>(blob, 80);
        *irq = read_words::<2>(blob, 108);
        *svc = read_words::<2>(blob, 116);
        self.lines = blob[124] & (IRQ_PENDING | FIRQ_PENDING);
        Ok(())
    }

    fn register(&self, id: u32) -> Option<u32> {
        let register = ArmRegister::from_id(id)?;
        let value = match register {
            ArmRegister::Op => self.queue[0],
            ArmRegister::Q1 => self.queue[1],
            ArmRegister::Q2 => self.queue[2],
            ArmRegister::Psw => self.regs.psw(),
            ArmRegister::Fr8
            | ArmRegister::Fr9
            | ArmRegister::Fr10
            | ArmRegister::Fr11
            | ArmRegister::Fr12
            | ArmRegister::Fr13
            | ArmRegister::Fr14 => self.regs.firq_bank()[bank_slot(register, ArmRegister::Fr8)],
            ArmRegister::Ir13 | ArmRegister::Ir14 => {
                self.regs.irq_bank()[bank_slot(register, ArmRegister::Ir13)]
            }
            ArmRegister::Sr13 | ArmRegister::Sr14 => {
                self.regs.svc_bank()[bank_slot(register, ArmRegister::Sr13)]
            }
            general => self.regs.get(bank_slot(general, ArmRegister::R0)),
        };
        Some(value)
    }

    fn set_register(&mut self, id: u32, value: u32) -> Result<(), CoreError> {
        let register = ArmRegister::from_id(id).ok_or(CoreError::UnknownRegister(id))?;
        match register {
            ArmRegister::Op => self.queue[0] = value,
            ArmRegister::Q1 => self.queue[1] = value,
            ArmRegister::Q2 => self.queue[2] = value,
            ArmRegister::Psw => self.regs.set_psw(value),
            ArmRegister::R15 => self.regs.set(PC, value & ADDRESS_MASK),
            ArmRegister::Fr8
            | ArmRegister::Fr9
            | ArmRegister::Fr10
            | ArmRegister::Fr11
            | ArmRegister::Fr12
            | ArmRegister::Fr13
            | ArmRegister::Fr14 => {
                self.regs.banks_mut().0[bank_slot(register, ArmRegister::Fr8)] = value;
            }
            ArmRegister::Ir13 | ArmRegister::Ir14 => {
                self.regs.banks_mut().1[bank_slot(register, ArmRegister::Ir13)] = value;
            }
            ArmRegister::Sr13 | ArmRegister::Sr14 => {
                self.regs.banks_mut().2[bank_slot(register, ArmRegister::Sr13)] = value;
            }
            general => self.regs.set(bank_slot(general, ArmRegister::R0), value),
        }
        Ok(())
    }

    /// Address of the next instruction to execute.
    fn pc(&self) -> u32 {
        self.regs.get(PC).wrapping_sub(4) & ADDRESS_MASK
    }

    fn set_irq_line(&mut self, line: u8, state: LineState) {
        let latch = match line {
            IRQ_LINE => IRQ_PENDING,
            FIRQ_LINE => FIRQ_PENDING,
            _ => {
                debug!(line, "arm has no such interrupt line");
                return;
            }
        };
        if state == LineState::Clear {
            self.lines &= !latch;
        } else {
            self.lines |= latch;
        }
    }

    fn set_nmi_line(&mut self, state: LineState) {
        debug!(?state, "arm has no nmi input");
    }

    fn default_irq_vector(&self, line: u8) -> i32 {
        match line {
            IRQ_LINE => 0x18,
            FIRQ_LINE => 0x1C,
            other => i32::from(other),
        }
    }

    fn disassemble(&self, bus: &mut dyn MemoryBus, pc: u32, out: &mut String) -> u32 {
        let pc = pc & ADDRESS_MASK;
        out.push_str(&crate::disasm::disassemble(pc, bus.read32(pc)));
        4
    }
}

const fn bank_slot(register: ArmRegister, first: ArmRegister) -> usize {
    (register.id() - first.id()) as usize
}

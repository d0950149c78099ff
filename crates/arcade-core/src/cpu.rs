//! Contract between the scheduler and emulated CPU cores.

use thiserror::Error;
use tracing::warn;

use crate::{CpuScheduler, InterruptController, IrqAcknowledge, LineState, MemoryBus};

/// Failures reported by core register and context access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CoreError {
    /// The register id is not defined by this core.
    #[error("unknown register id {0}")]
    UnknownRegister(u32),
    /// A context blob does not match the core's snapshot layout.
    #[error("context blob is {actual} bytes, expected {expected}")]
    ContextSize {
        /// Size the core produces.
        expected: usize,
        /// Size supplied by the caller.
        actual: usize,
    },
}

/// Services a core may use while executing a slice.
///
/// The live cycle counter belongs to the context, not the core: the
/// scheduler may shorten it while the core runs, so cores re-read
/// [`CoreContext::cycles_left`] after every instruction.
pub trait CoreContext {
    /// Cycles remaining in the slice. May be negative after an overrun.
    fn cycles_left(&self) -> i32;

    /// Deducts retired cycles.
    fn consume(&mut self, cycles: i32);

    /// Memory the core executes against.
    fn bus(&mut self) -> &mut dyn MemoryBus;

    /// Called once per serviced interrupt, at the point the core fetches
    /// the vector for IRQ `line`.
    fn acknowledge_irq(&mut self, line: u8) -> IrqAcknowledge;
}

/// Capabilities every emulated CPU provides to the machine.
pub trait CpuCore {
    /// Short core name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the core to its power-on state. `param` is core specific.
    fn reset(&mut self, param: u32, bus: &mut dyn MemoryBus);

    /// Runs until the context's cycle counter is exhausted and returns the
    /// cycles used, `cycles - ctx.cycles_left()` at exit.
    fn execute(&mut self, cycles: i32, ctx: &mut dyn CoreContext) -> i32;

    /// Serializes the whole register state.
    fn context(&self) -> Vec<u8>;

    /// Restores a blob produced by [`CpuCore::context`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContextSize`] when the blob has the wrong size.
    fn set_context(&mut self, blob: &[u8]) -> Result<(), CoreError>;

    /// Reads a register by core-specific id.
    fn register(&self, id: u32) -> Option<u32>;

    /// Writes a register by core-specific id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRegister`] for an id the core lacks.
    fn set_register(&mut self, id: u32, value: u32) -> Result<(), CoreError>;

    /// Address of the instruction about to execute.
    fn pc(&self) -> u32;

    /// Drives maskable interrupt `line`. Only `Assert` and `Clear` arrive
    /// here; the controller expands `Pulse` and `Hold`.
    fn set_irq_line(&mut self, line: u8, state: LineState);

    /// Drives the non-maskable interrupt input.
    fn set_nmi_line(&mut self, state: LineState);

    /// Vector supplied for `line` when no driver override exists.
    fn default_irq_vector(&self, line: u8) -> i32 {
        i32::from(line)
    }

    /// Writes one instruction at `pc` to `out` and returns its length in
    /// bytes.
    fn disassemble(&self, bus: &mut dyn MemoryBus, pc: u32, out: &mut String) -> u32;
}

/// Context wiring a core to a running machine.
pub struct ExecContext<'a> {
    sched: &'a mut CpuScheduler,
    irq: &'a mut InterruptController,
    cpu: usize,
    bus: &'a mut dyn MemoryBus,
}

impl<'a> ExecContext<'a> {
    /// Context for `cpu`, whose slice must be active in `sched`.
    #[must_use]
    pub const fn new(
        sched: &'a mut CpuScheduler,
        irq: &'a mut InterruptController,
        cpu: usize,
        bus: &'a mut dyn MemoryBus,
    ) -> Self {
        Self {
            sched,
            irq,
            cpu,
            bus,
        }
    }

    /// Scheduler services, for cores that spin or yield.
    pub const fn scheduler(&mut self) -> &mut CpuScheduler {
        self.sched
    }
}

impl CoreContext for ExecContext<'_> {
    fn cycles_left(&self) -> i32 {
        self.sched.cycles_left().unwrap_or(0)
    }

    fn consume(&mut self, cycles: i32) {
        self.sched.consume(cycles);
    }

    fn bus(&mut self) -> &mut dyn MemoryBus {
        self.bus
    }

    fn acknowledge_irq(&mut self, line: u8) -> IrqAcknowledge {
        self.irq.acknowledge(self.cpu, line).unwrap_or_else(|err| {
            warn!(cpu = self.cpu, line, %err, "acknowledge for unwired line");
            IrqAcknowledge {
                vector: i32::from(line),
                release: false,
            }
        })
    }
}

/// Stand-alone context that runs a core outside any machine.
pub struct DirectContext<'a> {
    bus: &'a mut dyn MemoryBus,
    icount: i32,
    release_on_ack: bool,
    acknowledged: Vec<u8>,
}

impl<'a> DirectContext<'a> {
    /// Context granting `cycles` against `bus`.
    #[must_use]
    pub const fn new(bus: &'a mut dyn MemoryBus, cycles: i32) -> Self {
        Self {
            bus,
            icount: cycles,
            release_on_ack: false,
            acknowledged: Vec::new(),
        }
    }

    /// Treats every line as held, so acknowledges release it.
    #[must_use]
    pub const fn with_held_lines(mut self, held: bool) -> Self {
        self.release_on_ack = held;
        self
    }

    /// Grants another `cycles` to the counter.
    pub const fn refill(&mut self, cycles: i32) {
        self.icount = cycles;
    }

    /// Lines acknowledged so far, in order.
    #[must_use]
    pub fn acknowledged(&self) -> &[u8] {
        &self.acknowledged
    }
}

impl CoreContext for DirectContext<'_> {
    fn cycles_left(&self) -> i32 {
        self.icount
    }

    fn consume(&mut self, cycles: i32) {
        self.icount = self.icount.saturating_sub(cycles);
    }

    fn bus(&mut self) -> &mut dyn MemoryBus {
        self.bus
    }

    fn acknowledge_irq(&mut self, line: u8) -> IrqAcknowledge {
        self.acknowledged.push(line);
        IrqAcknowledge {
            vector: i32::from(line),
            release: self.release_on_ack,
        }
    }
}

//! Per-CPU input line state and interrupt delivery.
//!
//! Requests never touch a core directly. [`InterruptController::set_line`]
//! queues a [`Deadline::Now`] timer carrying the change, so simultaneous
//! requests resolve in call order alongside every other timed event. The
//! machine hands the fired change back to [`InterruptController::deliver`],
//! which applies it to the core.

use std::fmt;

use tracing::{debug, trace};

use crate::{
    interrupt_trigger, CpuCore, CpuScheduler, Deadline, Event, InterruptRequest, InterruptStats,
    LineChange, MemoryBus, SchedError, SuspendReasons,
};

/// Number of maskable interrupt lines per CPU.
pub const MAX_IRQ_LINES: usize = 8;

/// Requested state of an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LineState {
    /// Line released.
    #[default]
    Clear,
    /// Line asserted until explicitly cleared.
    Assert,
    /// Line asserted until the core acknowledges the interrupt.
    Hold,
    /// Line asserted and released within the same event.
    Pulse,
}

impl LineState {
    /// Returns `true` for every state that drives the line.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Clear)
    }
}

/// CPU input line addressed by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InputLine {
    /// Maskable interrupt line `0..MAX_IRQ_LINES`.
    Irq(u8),
    /// Non-maskable interrupt.
    Nmi,
    /// Reset line; asserting holds the CPU in reset.
    Reset,
    /// Halt line; asserting stops the CPU.
    Halt,
}

/// Answer given to a core that starts servicing an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrqAcknowledge {
    /// Vector or interrupt number supplied for the line.
    pub vector: i32,
    /// `true` when the line was held and is now released; the core must
    /// drop its own latch for the line.
    pub release: bool,
}

/// Driver acknowledge callback, called with the line being serviced.
pub type AckCallback = Box<dyn FnMut(u8) -> i32>;

#[derive(Default)]
struct CpuLines {
    irq: [LineState; MAX_IRQ_LINES],
    vectors: [i32; MAX_IRQ_LINES],
    interrupts_enabled: bool,
    reset_param: u32,
    ack: Option<AckCallback>,
}

/// Line state and acknowledge bookkeeping for every CPU of a machine.
pub struct InterruptController {
    cpus: Vec<CpuLines>,
    stats: InterruptStats,
}

impl fmt::Debug for InterruptController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptController")
            .field("cpus", &self.cpus.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn irq_index(line: u8) -> Result<usize, SchedError> {
    let index = usize::from(line);
    if index < MAX_IRQ_LINES {
        Ok(index)
    } else {
        Err(SchedError::InvalidLine { line })
    }
}

impl InterruptController {
    /// Creates a controller for `cpu_count` CPUs with every line clear and
    /// interrupts enabled.
    #[must_use]
    pub fn new(cpu_count: usize) -> Self {
        let mut controller = Self {
            cpus: Vec::with_capacity(cpu_count),
            stats: InterruptStats::default(),
        };
        controller.cpus.resize_with(cpu_count, CpuLines::default);
        controller.reset();
        controller
    }

    /// Clears every line and re-enables interrupts. Vectors, reset
    /// parameters and acknowledge callbacks are kept.
    pub fn reset(&mut self) {
        for lines in &mut self.cpus {
            lines.irq = [LineState::Clear; MAX_IRQ_LINES];
            lines.interrupts_enabled = true;
        }
    }

    /// Delivery counters.
    #[must_use]
    pub const fn stats(&self) -> &InterruptStats {
        &self.stats
    }

    fn lines(&self, cpu: usize) -> Result<&CpuLines, SchedError> {
        let count = self.cpus.len();
        self.cpus
            .get(cpu)
            .ok_or(SchedError::InvalidCpu { index: cpu, count })
    }

    fn lines_mut(&mut self, cpu: usize) -> Result<&mut CpuLines, SchedError> {
        let count = self.cpus.len();
        self.cpus
            .get_mut(cpu)
            .ok_or(SchedError::InvalidCpu { index: cpu, count })
    }

    /// Queues a line change for `cpu`.
    ///
    /// IRQ and NMI requests for a CPU that is halted, held in reset or
    /// disabled are dropped and counted.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`], [`SchedError::InvalidLine`] or
    /// [`SchedError::ResourceExhausted`] when the timer pool is full.
    pub fn set_line(
        &mut self,
        sched: &mut CpuScheduler,
        cpu: usize,
        line: InputLine,
        state: LineState,
    ) -> Result<(), SchedError> {
        self.lines(cpu)?;
        if let InputLine::Irq(number) = line {
            irq_index(number)?;
        }
        if matches!(line, InputLine::Irq(_) | InputLine::Nmi) && !sched.is_running(cpu)? {
            self.stats.record_dropped();
            debug!(cpu, ?line, ?state, "interrupt dropped on stopped cpu");
            return Ok(());
        }
        sched.timer_set(Deadline::Now, Event::Line(LineChange { cpu, line, state }))?;
        Ok(())
    }

    /// Queues a change of the reset line.
    ///
    /// # Errors
    ///
    /// See [`InterruptController::set_line`].
    pub fn set_reset_line(
        &mut self,
        sched: &mut CpuScheduler,
        cpu: usize,
        state: LineState,
    ) -> Result<(), SchedError> {
        self.set_line(sched, cpu, InputLine::Reset, state)
    }

    /// Queues a change of the halt line.
    ///
    /// # Errors
    ///
    /// See [`InterruptController::set_line`].
    pub fn set_halt_line(
        &mut self,
        sched: &mut CpuScheduler,
        cpu: usize,
        state: LineState,
    ) -> Result<(), SchedError> {
        self.set_line(sched, cpu, InputLine::Halt, state)
    }

    /// Raises a configured machine interrupt unless the CPU has interrupts
    /// disabled.
    ///
    /// # Errors
    ///
    /// See [`InterruptController::set_line`].
    pub fn raise(
        &mut self,
        sched: &mut CpuScheduler,
        cpu: usize,
        request: InterruptRequest,
    ) -> Result<(), SchedError> {
        if !self.lines(cpu)?.interrupts_enabled {
            trace!(cpu, "interrupt masked by machine gate");
            return Ok(());
        }
        self.set_line(sched, cpu, request.line, request.state)
    }

    /// Applies a fired line change to `core`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] or [`SchedError::InvalidLine`].
    pub fn deliver(
        &mut self,
        sched: &mut CpuScheduler,
        core: &mut dyn CpuCore,
        bus: &mut dyn MemoryBus,
        change: LineChange,
    ) -> Result<(), SchedError> {
        let LineChange { cpu, line, state } = change;
        let reset_param = self.lines(cpu)?.reset_param;
        match line {
            InputLine::Irq(number) => {
                let index = irq_index(number)?;
                self.lines_mut(cpu)?.irq[index] = state;
                match state {
                    LineState::Pulse => {
                        core.set_irq_line(number, LineState::Assert);
                        core.set_irq_line(number, LineState::Clear);
                        self.lines_mut(cpu)?.irq[index] = LineState::Clear;
                    }
                    LineState::Hold => core.set_irq_line(number, LineState::Assert),
                    LineState::Assert | LineState::Clear => core.set_irq_line(number, state),
                }
                if state.is_active() {
                    sched.fire_trigger(interrupt_trigger(cpu));
                }
            }
            InputLine::Nmi => {
                match state {
                    LineState::Pulse => {
                        core.set_nmi_line(LineState::Assert);
                        core.set_nmi_line(LineState::Clear);
                    }
                    LineState::Hold => core.set_nmi_line(LineState::Assert),
                    LineState::Assert | LineState::Clear => core.set_nmi_line(state),
                }
                if state.is_active() {
                    sched.fire_trigger(interrupt_trigger(cpu));
                }
            }
            InputLine::Reset => match state {
                LineState::Assert | LineState::Hold => {
                    sched.suspend_cpu(cpu, true, SuspendReasons::RESET)?;
                }
                LineState::Pulse => {
                    core.reset(reset_param, bus);
                    sched.suspend_cpu(cpu, false, SuspendReasons::RESET)?;
                }
                LineState::Clear => {
                    if sched.is_suspended(cpu, SuspendReasons::RESET)? {
                        core.reset(reset_param, bus);
                    }
                    sched.suspend_cpu(cpu, false, SuspendReasons::RESET)?;
                }
            },
            InputLine::Halt => {
                let on = matches!(state, LineState::Assert | LineState::Hold);
                sched.suspend_cpu(cpu, on, SuspendReasons::HALT)?;
            }
        }
        self.stats.record_delivered();
        trace!(cpu, ?line, ?state, "line change delivered");
        Ok(())
    }

    /// Services an acknowledge from `cpu`'s core for IRQ `line`.
    ///
    /// A held line is released. The vector comes from the driver callback
    /// when one is installed, else from the stored per-line vector.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] or [`SchedError::InvalidLine`].
    pub fn acknowledge(&mut self, cpu: usize, line: u8) -> Result<IrqAcknowledge, SchedError> {
        let index = irq_index(line)?;
        let lines = self.lines_mut(cpu)?;
        let release = lines.irq[index] == LineState::Hold;
        if release {
            lines.irq[index] = LineState::Clear;
        }
        let vector = match lines.ack.as_mut() {
            Some(callback) => callback(line),
            None => lines.vectors[index],
        };
        self.stats.record_acknowledged();
        Ok(IrqAcknowledge { vector, release })
    }

    /// Last state recorded for IRQ `line` of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] or [`SchedError::InvalidLine`].
    pub fn line_state(&self, cpu: usize, line: u8) -> Result<LineState, SchedError> {
        Ok(self.lines(cpu)?.irq[irq_index(line)?])
    }

    /// Stored vector for IRQ `line` of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] or [`SchedError::InvalidLine`].
    pub fn vector(&self, cpu: usize, line: u8) -> Result<i32, SchedError> {
        Ok(self.lines(cpu)?.vectors[irq_index(line)?])
    }

    /// Overrides the vector supplied for IRQ `line` of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] or [`SchedError::InvalidLine`].
    pub fn set_vector(&mut self, cpu: usize, line: u8, vector: i32) -> Result<(), SchedError> {
        let index = irq_index(line)?;
        self.lines_mut(cpu)?.vectors[index] = vector;
        Ok(())
    }

    /// Loads every vector of `cpu` from the core's defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn load_default_vectors(&mut self, cpu: usize, core: &dyn CpuCore) -> Result<(), SchedError> {
        let lines = self.lines_mut(cpu)?;
        for (line, vector) in (0u8..).zip(lines.vectors.iter_mut()) {
            *vector = core.default_irq_vector(line);
        }
        Ok(())
    }

    /// Installs or removes the driver acknowledge callback of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn set_ack_callback(
        &mut self,
        cpu: usize,
        callback: Option<AckCallback>,
    ) -> Result<(), SchedError> {
        self.lines_mut(cpu)?.ack = callback;
        Ok(())
    }

    /// Opens or closes the gate for machine-generated interrupts of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn set_interrupt_enable(&mut self, cpu: usize, enabled: bool) -> Result<(), SchedError> {
        self.lines_mut(cpu)?.interrupts_enabled = enabled;
        Ok(())
    }

    /// Returns `true` when machine-generated interrupts reach `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn interrupts_enabled(&self, cpu: usize) -> Result<bool, SchedError> {
        Ok(self.lines(cpu)?.interrupts_enabled)
    }

    /// Sets the parameter passed to the core when the reset line resets it.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn set_reset_param(&mut self, cpu: usize, param: u32) -> Result<(), SchedError> {
        self.lines_mut(cpu)?.reset_param = param;
        Ok(())
    }
}

//! Outer run loop: machine lifecycle, video frame timing and driver hooks.
//!
//! A [`Machine`] owns the scheduler, the interrupt controller and one
//! [`CpuUnit`] per configured CPU. Every (re)initialization rebuilds the
//! scheduler from the configuration and arms the frame timers:
//!
//! * a timeslice pulse at `fps * slices_per_frame` raising
//!   [`TRIGGER_TIMESLICE`];
//! * a refresh reference timer that never fires and is restarted at each
//!   screen update, giving [`Machine::time_in_frame`];
//! * a VBlank pulse at `fps * multiplier`, where the multiplier is a common
//!   multiple of every CPU's VBlank interrupts per frame;
//! * one pulse per CPU with a timed interrupt.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::{
    ConfigError, CpuConfig, CpuCore, CpuScheduler, Deadline, Event, EventSink, ExecContext,
    InputLine, InterruptController, LineState, MachineConfig, MemoryBus, ScheduleOutcome,
    SchedError, SuspendReasons, TimerHandle, VirtualTime, TRIGGER_TIMESLICE,
};

/// Frame bookkeeping carried by machine timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FrameEvent {
    /// First VBlank after initialization; starts the VBlank pulse.
    FirstVblank,
    /// One VBlank subdivision.
    Vblank,
    /// Screen update, `vblank_duration` after a real VBlank.
    Update,
    /// Timed interrupt of one CPU.
    TimedInterrupt {
        /// Target CPU.
        cpu: usize,
    },
}

/// Lifecycle state of a [`Machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    /// Timers and cores will be set up on the next step.
    Initializing,
    /// Scheduling slices.
    Running,
    /// A reset was requested; the next step reinitializes.
    ResetRequested,
    /// Stopped for good.
    ShuttingDown,
}

/// Failures surfaced by the machine loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    /// A scheduler or timer operation failed.
    #[error(transparent)]
    Sched(#[from] SchedError),
    /// The machine configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result of one [`Machine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// `cpu` executed `cycles`.
    Ran {
        /// CPU that ran.
        cpu: usize,
        /// Cycles reported by the core.
        cycles: i32,
    },
    /// No CPU could run; due timers fired.
    Stalemate,
    /// The machine is shutting down.
    ShutDown,
}

/// Summary of one completed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameReport {
    /// Frame number after the update, starting at 1.
    pub frame: u64,
    /// Virtual time at the screen update.
    pub now: VirtualTime,
    /// Renormalization epoch at the screen update.
    pub epoch: u64,
    /// Steps taken to reach the update.
    pub steps: u64,
}

/// Result of [`Machine::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOutcome {
    /// A screen update happened.
    Completed(FrameReport),
    /// A reset was requested before the frame ended.
    Reset,
    /// The machine is shutting down.
    ShutDown,
}

/// A CPU core together with the memory it executes against.
pub struct CpuUnit {
    /// Core implementation.
    pub core: Box<dyn CpuCore>,
    /// Address space seen by the core.
    pub bus: Box<dyn MemoryBus>,
}

impl CpuUnit {
    /// Pairs `core` with `bus`.
    #[must_use]
    pub const fn new(core: Box<dyn CpuCore>, bus: Box<dyn MemoryBus>) -> Self {
        Self { core, bus }
    }
}

impl fmt::Debug for CpuUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuUnit")
            .field("core", &self.core.name())
            .finish_non_exhaustive()
    }
}

/// Called with the frame number at every real VBlank.
pub type FrameListener = Box<dyn FnMut(u64)>;
/// Driver setup run at every (re)initialization, before cores reset.
pub type InitHook = Box<dyn FnMut(&mut MachineServices<'_>) -> Result<(), SchedError>>;
/// Driver timer callback, invoked with the timer's parameter.
pub type TimerCallback = Box<dyn FnMut(&mut MachineServices<'_>, i32)>;

#[derive(Debug, Clone, Default)]
struct FrameState {
    vblank_period: VirtualTime,
    vblank_multiplier: u32,
    vblank_countdown: u32,
    cpu_countdown: Vec<Option<(u32, u32)>>,
    in_vblank: bool,
    current_frame: u64,
    updated_at: VirtualTime,
    updated_epoch: u64,
    watchdog: Option<u32>,
    watchdog_frames: u32,
    refresh_timer: Option<TimerHandle>,
    vblank_timer: Option<TimerHandle>,
    updated: bool,
    reset_requested: bool,
}

/// Scheduler, interrupt and frame services handed to driver hooks.
pub struct MachineServices<'a> {
    sched: &'a mut CpuScheduler,
    irq: &'a mut InterruptController,
    frame: &'a mut FrameState,
}

impl MachineServices<'_> {
    /// Scheduler and timer services.
    pub const fn scheduler(&mut self) -> &mut CpuScheduler {
        self.sched
    }

    /// Interrupt controller.
    pub const fn interrupts(&mut self) -> &mut InterruptController {
        self.irq
    }

    /// Queues a line change for `cpu`.
    ///
    /// # Errors
    ///
    /// See [`InterruptController::set_line`].
    pub fn set_line(
        &mut self,
        cpu: usize,
        line: InputLine,
        state: LineState,
    ) -> Result<(), SchedError> {
        self.irq.set_line(self.sched, cpu, line, state)
    }

    /// Schedules driver callback `id` with `param` at `deadline`.
    ///
    /// # Errors
    ///
    /// See [`CpuScheduler::timer_set`].
    pub fn set_callback(
        &mut self,
        deadline: Deadline,
        id: u32,
        param: i32,
    ) -> Result<TimerHandle, SchedError> {
        self.sched.timer_set(deadline, Event::Callback { id, param })
    }

    /// Arms the watchdog for `frames` screen updates.
    pub const fn watchdog_enable(&mut self, frames: u32) {
        self.frame.watchdog_frames = frames;
        self.frame.watchdog = Some(frames);
    }

    /// Restarts the watchdog countdown, arming it at two seconds of frames
    /// if it was never enabled.
    pub const fn watchdog_reset(&mut self) {
        self.frame.watchdog = Some(self.frame.watchdog_frames);
    }

    /// Requests a machine reset at the end of the current step.
    pub const fn request_reset(&mut self) {
        self.frame.reset_requested = true;
    }

    /// Frames completed since the last initialization.
    #[must_use]
    pub const fn current_frame(&self) -> u64 {
        self.frame.current_frame
    }
}

struct Runtime {
    config: MachineConfig,
    irq: InterruptController,
    units: Vec<CpuUnit>,
    frame: FrameState,
    listeners: Vec<FrameListener>,
    callbacks: Vec<TimerCallback>,
    init_hook: Option<InitHook>,
    pending_error: Option<SchedError>,
}

impl Runtime {
    fn note(&mut self, result: Result<(), SchedError>) {
        if let Err(err) = result {
            warn!(%err, "timer event failed");
            self.pending_error.get_or_insert(err);
        }
    }

    const fn services<'a>(&'a mut self, sched: &'a mut CpuScheduler) -> MachineServices<'a> {
        MachineServices {
            sched,
            irq: &mut self.irq,
            frame: &mut self.frame,
        }
    }

    // `count_only` advances the countdowns without raising interrupts; used
    // to align the first VBlank.
    fn vblank(&mut self, sched: &mut CpuScheduler, count_only: bool) -> Result<(), SchedError> {
        for cpu in 0..self.frame.cpu_countdown.len() {
            let Some((countdown, multiplier)) = self.frame.cpu_countdown[cpu] else {
                continue;
            };
            let left = countdown.saturating_sub(1);
            if left == 0 {
                if !count_only {
                    if let Some(request) = self.config.cpus[cpu].vblank_interrupt {
                        self.irq.raise(sched, cpu, request)?;
                    }
                }
                self.frame.cpu_countdown[cpu] = Some((multiplier, multiplier));
            } else {
                self.frame.cpu_countdown[cpu] = Some((left, multiplier));
            }
        }

        self.frame.vblank_countdown = self.frame.vblank_countdown.saturating_sub(1);
        if self.frame.vblank_countdown == 0 {
            let frame = self.frame.current_frame;
            for listener in &mut self.listeners {
                listener(frame);
            }
            sched.timer_set(
                Deadline::After(self.config.vblank_duration()),
                Event::Frame(FrameEvent::Update),
            )?;
            self.frame.in_vblank = true;
            self.frame.vblank_countdown = self.frame.vblank_multiplier;
            trace!(frame, "vblank");
        }
        Ok(())
    }

    fn update(&mut self, sched: &mut CpuScheduler) -> Result<(), SchedError> {
        self.frame.in_vblank = false;
        if let Some(left) = self.frame.watchdog {
            if left > 0 {
                let left = left - 1;
                self.frame.watchdog = Some(left);
                if left == 0 {
                    warn!(frame = self.frame.current_frame, "reset caused by the watchdog");
                    self.frame.reset_requested = true;
                }
            }
        }
        self.frame.current_frame += 1;
        self.frame.updated = true;
        self.frame.updated_at = sched.now();
        self.frame.updated_epoch = sched.clock().epoch();
        if let Some(refresh) = self.frame.refresh_timer {
            sched.timer_reset(refresh, Deadline::Never)?;
        }
        Ok(())
    }

    fn frame_event(&mut self, sched: &mut CpuScheduler, event: FrameEvent) -> Result<(), SchedError> {
        match event {
            FrameEvent::FirstVblank => {
                let period = self.frame.vblank_period;
                self.frame.vblank_timer =
                    Some(sched.timer_pulse(period, Event::Frame(FrameEvent::Vblank))?);
                self.vblank(sched, false)
            }
            FrameEvent::Vblank => self.vblank(sched, false),
            FrameEvent::Update => self.update(sched),
            FrameEvent::TimedInterrupt { cpu } => {
                match self.config.cpus.get(cpu).and_then(|config| config.timed_interrupt) {
                    Some(request) => self.irq.raise(sched, cpu, request),
                    None => Ok(()),
                }
            }
        }
    }
}

impl EventSink for Runtime {
    fn on_timer(&mut self, sched: &mut CpuScheduler, _timer: TimerHandle, event: Event) {
        let result = match event {
            Event::Line(change) => match self.units.get_mut(change.cpu) {
                Some(unit) => self
                    .irq
                    .deliver(sched, unit.core.as_mut(), unit.bus.as_mut(), change),
                None => Err(SchedError::InvalidCpu {
                    index: change.cpu,
                    count: self.units.len(),
                }),
            },
            Event::Frame(frame) => self.frame_event(sched, frame),
            Event::Callback { id, param } => {
                let index = usize::try_from(id).unwrap_or(usize::MAX);
                if let Some(callback) = self.callbacks.get_mut(index) {
                    let mut services = MachineServices {
                        sched,
                        irq: &mut self.irq,
                        frame: &mut self.frame,
                    };
                    callback(&mut services, param);
                } else {
                    warn!(id, "timer names an unregistered callback");
                }
                Ok(())
            }
            Event::Marker | Event::Trigger(_) => Ok(()),
        };
        self.note(result);
    }
}

/// A complete emulated machine: CPUs, scheduler, interrupts and frame timing.
pub struct Machine {
    state: MachineState,
    sched: CpuScheduler,
    runtime: Runtime,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("state", &self.state)
            .field("sched", &self.sched)
            .field("units", &self.runtime.units)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Builds a machine from `config` and one unit per configured CPU.
    /// Timers are armed on the first [`Machine::step`].
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Config`] for an invalid configuration or a
    /// unit count that differs from the CPU count.
    pub fn new(config: MachineConfig, units: Vec<CpuUnit>) -> Result<Self, MachineError> {
        config.validate()?;
        if units.len() != config.cpus.len() {
            return Err(ConfigError::CpuCountMismatch {
                configured: config.cpus.len(),
                supplied: units.len(),
            }
            .into());
        }
        let sched = CpuScheduler::new(&config.scheduler_config())?;
        let irq = InterruptController::new(units.len());
        let watchdog_frames = config.frames_per_second.saturating_mul(2);
        Ok(Self {
            state: MachineState::Initializing,
            sched,
            runtime: Runtime {
                config,
                irq,
                units,
                frame: FrameState {
                    watchdog_frames,
                    ..FrameState::default()
                },
                listeners: Vec::new(),
                callbacks: Vec::new(),
                init_hook: None,
                pending_error: None,
            },
        })
    }

    /// Installs the driver hook run at every initialization.
    pub fn set_init_hook(&mut self, hook: InitHook) {
        self.runtime.init_hook = Some(hook);
    }

    /// Adds a listener called once per real VBlank.
    pub fn add_frame_listener(&mut self, listener: FrameListener) {
        self.runtime.listeners.push(listener);
    }

    /// Registers a driver callback and returns the id to schedule it with.
    pub fn register_callback(&mut self, callback: TimerCallback) -> u32 {
        let id = u32::try_from(self.runtime.callbacks.len()).unwrap_or(u32::MAX);
        self.runtime.callbacks.push(callback);
        id
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> MachineState {
        self.state
    }

    /// Machine configuration.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.runtime.config
    }

    /// Scheduler, for inspection.
    #[must_use]
    pub const fn scheduler(&self) -> &CpuScheduler {
        &self.sched
    }

    /// Interrupt controller, for inspection.
    #[must_use]
    pub const fn interrupts(&self) -> &InterruptController {
        &self.runtime.irq
    }

    /// Driver services between steps.
    pub fn services(&mut self) -> MachineServices<'_> {
        self.runtime.services(&mut self.sched)
    }

    /// Core of `cpu`.
    #[must_use]
    pub fn core(&self, cpu: usize) -> Option<&dyn CpuCore> {
        self.runtime.units.get(cpu).map(|unit| unit.core.as_ref())
    }

    /// Core and memory of `cpu`, for debugger access.
    pub fn unit_mut(&mut self, cpu: usize) -> Option<&mut CpuUnit> {
        self.runtime.units.get_mut(cpu)
    }

    /// Frames completed since the last initialization.
    #[must_use]
    pub const fn current_frame(&self) -> u64 {
        self.runtime.frame.current_frame
    }

    /// `true` between a real VBlank and the following screen update.
    #[must_use]
    pub const fn in_vblank(&self) -> bool {
        self.runtime.frame.in_vblank
    }

    /// Time since the last screen update.
    #[must_use]
    pub fn time_in_frame(&self) -> VirtualTime {
        self.runtime
            .frame
            .refresh_timer
            .and_then(|timer| self.sched.timer_time_elapsed(timer).ok())
            .unwrap_or(VirtualTime::ZERO)
    }

    /// Beam position derived from [`Machine::time_in_frame`].
    #[must_use]
    pub fn scanline(&self) -> u32 {
        let frame = i64::from(self.runtime.config.frame_period().ticks().max(1));
        let elapsed = i64::from(self.time_in_frame().ticks().max(0));
        let line = elapsed * i64::from(self.runtime.config.screen_lines) / frame;
        u32::try_from(line).unwrap_or(u32::MAX)
    }

    /// Cycles `cpu` can still run before the frame period ends.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn frame_cycles_left(&self, cpu: usize) -> Result<i32, SchedError> {
        let left = self
            .runtime
            .config
            .frame_period()
            .saturating_sub(self.time_in_frame());
        Ok(self.sched.clock().cycles_for(cpu, left)?.max(0))
    }

    /// Requests a reset; the next step reinitializes the machine.
    pub fn request_reset(&mut self) {
        debug!("machine reset requested");
        self.state = MachineState::ResetRequested;
    }

    /// Stops the machine; further steps do nothing.
    pub fn shut_down(&mut self) {
        info!(frame = self.runtime.frame.current_frame, "machine shutting down");
        self.state = MachineState::ShuttingDown;
    }

    fn initialize(&mut self) -> Result<(), MachineError> {
        let config = self.runtime.config.clone();
        self.sched = CpuScheduler::new(&config.scheduler_config())?;
        let sched = &mut self.sched;
        let runtime = &mut self.runtime;

        runtime.irq.reset();
        for (cpu, (unit, cpu_config)) in runtime.units.iter().zip(&config.cpus).enumerate() {
            runtime.irq.load_default_vectors(cpu, unit.core.as_ref())?;
            runtime.irq.set_reset_param(cpu, cpu_config.reset_param)?;
            runtime.irq.set_ack_callback(cpu, None)?;
        }

        let multiplier = config.vblank_multiplier();
        let fps = config.frames_per_second;
        runtime.frame = FrameState {
            vblank_period: VirtualTime::from_hz(fps.saturating_mul(multiplier)),
            vblank_multiplier: multiplier,
            vblank_countdown: multiplier,
            cpu_countdown: config.cpus.iter().map(|cpu| countdown(cpu, multiplier)).collect(),
            watchdog_frames: fps.saturating_mul(2),
            ..FrameState::default()
        };
        runtime.pending_error = None;

        let slices = config.slices_per_frame.max(1);
        sched.timer_pulse(
            VirtualTime::from_hz(fps.saturating_mul(slices)),
            Event::Trigger(TRIGGER_TIMESLICE),
        )?;
        runtime.frame.refresh_timer = Some(sched.timer_set(Deadline::Never, Event::Marker)?);
        for (cpu, cpu_config) in config.cpus.iter().enumerate() {
            if let Some(period) = cpu_config.timed_interrupt_period() {
                sched.timer_pulse(period, Event::Frame(FrameEvent::TimedInterrupt { cpu }))?;
            }
        }

        let vblank_period = runtime.frame.vblank_period;
        let mut first = vblank_period.saturating_sub(config.vblank_duration());
        while first.is_negative() {
            runtime.vblank(sched, true)?;
            first = first.saturating_add(vblank_period);
        }
        runtime.frame.vblank_timer = Some(sched.timer_set(
            Deadline::After(first),
            Event::Frame(FrameEvent::FirstVblank),
        )?);

        for (cpu, cpu_config) in config.cpus.iter().enumerate() {
            if cpu_config.audio && !config.sound_enabled {
                sched.suspend_cpu(cpu, true, SuspendReasons::DISABLE)?;
                debug!(cpu, name = %cpu_config.name, "audio cpu disabled");
            }
        }

        if let Some(hook) = runtime.init_hook.as_mut() {
            let mut services = MachineServices {
                sched: &mut *sched,
                irq: &mut runtime.irq,
                frame: &mut runtime.frame,
            };
            hook(&mut services)?;
        }

        for (unit, cpu_config) in runtime.units.iter_mut().zip(&config.cpus) {
            unit.core.reset(cpu_config.reset_param, unit.bus.as_mut());
        }

        self.state = MachineState::Running;
        debug!(
            cpus = runtime.units.len(),
            vblank_multiplier = multiplier,
            "machine initialized"
        );
        Ok(())
    }

    /// Runs one scheduling step, initializing first when needed.
    ///
    /// # Errors
    ///
    /// Returns the first scheduler failure raised by a timer event or by
    /// initialization.
    pub fn step(&mut self) -> Result<StepOutcome, MachineError> {
        match self.state {
            MachineState::ShuttingDown => return Ok(StepOutcome::ShutDown),
            MachineState::Initializing | MachineState::ResetRequested => self.initialize()?,
            MachineState::Running => {}
        }

        let outcome = self.sched.schedule_cpu(&mut self.runtime);
        if let Some(err) = self.runtime.pending_error.take() {
            return Err(err.into());
        }
        let step = match outcome {
            ScheduleOutcome::Run { cpu, cycles } => {
                let unit = &mut self.runtime.units[cpu];
                let mut ctx =
                    ExecContext::new(&mut self.sched, &mut self.runtime.irq, cpu, unit.bus.as_mut());
                let ran = unit.core.execute(cycles, &mut ctx);
                self.sched.update_cpu(cpu, ran)?;
                StepOutcome::Ran { cpu, cycles: ran }
            }
            ScheduleOutcome::Stalemate => StepOutcome::Stalemate,
        };

        if self.runtime.frame.reset_requested {
            self.runtime.frame.reset_requested = false;
            self.request_reset();
        }
        Ok(step)
    }

    /// Steps until the next screen update.
    ///
    /// # Errors
    ///
    /// See [`Machine::step`].
    pub fn run_frame(&mut self) -> Result<FrameOutcome, MachineError> {
        self.runtime.frame.updated = false;
        let mut steps = 0u64;
        loop {
            if self.state == MachineState::ShuttingDown {
                return Ok(FrameOutcome::ShutDown);
            }
            let initializing = self.state != MachineState::Running;
            self.step()?;
            steps += 1;
            if initializing {
                self.runtime.frame.updated = false;
            }
            if self.state == MachineState::ResetRequested {
                return Ok(FrameOutcome::Reset);
            }
            if self.runtime.frame.updated {
                return Ok(FrameOutcome::Completed(FrameReport {
                    frame: self.runtime.frame.current_frame,
                    now: self.runtime.frame.updated_at,
                    epoch: self.runtime.frame.updated_epoch,
                    steps,
                }));
            }
        }
    }
}

fn countdown(cpu: &CpuConfig, multiplier: u32) -> Option<(u32, u32)> {
    (cpu.vblank_interrupts_per_frame > 0).then(|| {
        let every = multiplier / cpu.vblank_interrupts_per_frame;
        (every, every)
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{
        CpuUnit, FrameOutcome, Machine, MachineError, MachineServices, MachineState, StepOutcome,
    };
    use crate::{
        ConfigError, CoreContext, CoreError, CpuConfig, CpuCore, FlatMemory, InputLine,
        InterruptRequest, LineState, MachineConfig, MemoryBus, SuspendReasons, VirtualTime,
    };

    #[derive(Default)]
    struct Shared {
        irqs: Vec<(usize, u8, LineState)>,
        resets: u32,
    }

    struct Burner {
        id: usize,
        shared: Rc<RefCell<Shared>>,
    }

    impl CpuCore for Burner {
        fn name(&self) -> &'static str {
            "burner"
        }

        fn reset(&mut self, _param: u32, _bus: &mut dyn MemoryBus) {
            self.shared.borrow_mut().resets += 1;
        }

        fn execute(&mut self, cycles: i32, ctx: &mut dyn CoreContext) -> i32 {
            while ctx.cycles_left() > 0 {
                ctx.consume(4);
            }
            cycles - ctx.cycles_left()
        }

        fn context(&self) -> Vec<u8> {
            Vec::new()
        }

        fn set_context(&mut self, _blob: &[u8]) -> Result<(), CoreError> {
            Ok(())
        }

        fn register(&self, _id: u32) -> Option<u32> {
            None
        }

        fn set_register(&mut self, id: u32, _value: u32) -> Result<(), CoreError> {
            Err(CoreError::UnknownRegister(id))
        }

        fn pc(&self) -> u32 {
            0
        }

        fn set_irq_line(&mut self, line: u8, state: LineState) {
            self.shared.borrow_mut().irqs.push((self.id, line, state));
        }

        fn set_nmi_line(&mut self, _state: LineState) {}

        fn disassemble(&self, _bus: &mut dyn MemoryBus, _pc: u32, out: &mut String) -> u32 {
            out.push_str("nop");
            4
        }
    }

    fn cpu(hz: u32) -> CpuConfig {
        CpuConfig {
            clock: crate::CpuClockConfig::new(hz),
            ..CpuConfig::default()
        }
    }

    fn machine(config: MachineConfig) -> (Machine, Rc<RefCell<Shared>>) {
        let shared = Rc::new(RefCell::new(Shared::default()));
        let units = (0..config.cpus.len())
            .map(|id| {
                CpuUnit::new(
                    Box::new(Burner {
                        id,
                        shared: Rc::clone(&shared),
                    }),
                    Box::new(FlatMemory::new(8)),
                )
            })
            .collect();
        (Machine::new(config, units).unwrap(), shared)
    }

    #[test]
    fn unit_count_must_match_configuration() {
        let err = Machine::new(MachineConfig::default(), Vec::new()).unwrap_err();
        assert_eq!(
            err,
            MachineError::Config(ConfigError::CpuCountMismatch {
                configured: 1,
                supplied: 0
            })
        );
    }

    #[test]
    fn first_step_initializes_and_resets_cores() {
        let (mut machine, shared) = machine(MachineConfig::default());
        assert_eq!(machine.state(), MachineState::Initializing);
        let step = machine.step().unwrap();
        assert!(matches!(step, StepOutcome::Ran { cpu: 0, .. }));
        assert_eq!(machine.state(), MachineState::Running);
        assert_eq!(shared.borrow().resets, 1);
    }

    #[test]
    fn frames_complete_once_per_frame_period() {
        let (mut machine, _) = machine(MachineConfig::default());
        let frames = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&frames);
        machine.add_frame_listener(Box::new(move |frame: u64| seen.borrow_mut().push(frame)));

        let period = VirtualTime::from_hz(60).ticks();
        for expected in 1..=3 {
            match machine.run_frame().unwrap() {
                FrameOutcome::Completed(report) => {
                    assert_eq!(report.frame, expected);
                    let frames = i32::try_from(expected).unwrap();
                    assert_eq!(report.now.ticks(), period * frames);
                    assert_eq!(report.epoch, 0);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(*frames.borrow(), vec![0, 1, 2]);
        assert!(machine.time_in_frame().ticks() <= period);
        assert!(machine.scanline() <= 256);
        assert!(!machine.in_vblank());
    }

    #[test]
    fn vblank_interrupts_follow_the_common_multiple() {
        let mut config = MachineConfig::default();
        config.cpus = vec![cpu(1_000_000), cpu(1_000_000)];
        config.cpus[0].vblank_interrupts_per_frame = 2;
        config.cpus[0].vblank_interrupt = Some(InterruptRequest::default());
        config.cpus[1].vblank_interrupts_per_frame = 3;
        config.cpus[1].vblank_interrupt = Some(InterruptRequest {
            line: InputLine::Irq(1),
            state: LineState::Pulse,
        });
        let (mut machine, shared) = machine(config);
        machine.run_frame().unwrap();

        let irqs = shared.borrow().irqs.clone();
        let cpu0 = irqs.iter().filter(|(cpu, _, state)| *cpu == 0 && *state == LineState::Assert);
        let cpu1 = irqs.iter().filter(|(cpu, _, state)| *cpu == 1 && *state == LineState::Assert);
        assert_eq!(cpu0.count(), 2);
        assert_eq!(cpu1.count(), 3);
        assert_eq!(machine.interrupts().stats().delivered, 5);
    }

    #[test]
    fn timed_interrupts_fire_at_their_own_rate() {
        let mut config = MachineConfig::default();
        config.cpus[0].timed_interrupt_rate = 600;
        config.cpus[0].timed_interrupt = Some(InterruptRequest {
            line: InputLine::Irq(2),
            state: LineState::Assert,
        });
        let (mut machine, shared) = machine(config);
        machine.run_frame().unwrap();
        let count = shared
            .borrow()
            .irqs
            .iter()
            .filter(|(_, line, _)| *line == 2)
            .count();
        assert!((9..=10).contains(&count), "got {count}");
    }

    #[test]
    fn watchdog_requests_a_reset_after_its_frames() {
        let (mut machine, shared) = machine(MachineConfig::default());
        machine.set_init_hook(Box::new(|services: &mut MachineServices<'_>| {
            services.watchdog_enable(2);
            Ok(())
        }));
        assert!(matches!(machine.run_frame(), Ok(FrameOutcome::Completed(_))));
        assert_eq!(machine.run_frame(), Ok(FrameOutcome::Reset));
        assert_eq!(machine.state(), MachineState::ResetRequested);

        assert!(matches!(machine.run_frame(), Ok(FrameOutcome::Completed(_))));
        assert_eq!(machine.current_frame(), 1);
        assert_eq!(shared.borrow().resets, 2);
    }

    #[test]
    fn audio_cpus_are_disabled_without_sound() {
        let mut config = MachineConfig::default();
        config.sound_enabled = false;
        config.cpus = vec![cpu(1_000_000), cpu(1_000_000)];
        config.cpus[1].audio = true;
        let (mut machine, _) = machine(config);
        machine.run_frame().unwrap();
        assert_eq!(
            machine.scheduler().is_suspended(1, SuspendReasons::DISABLE),
            Ok(true)
        );
        assert_eq!(machine.scheduler().total_cycles(1), Ok(0));
        assert!(machine.scheduler().total_cycles(0).unwrap() > 16_000);
    }

    #[test]
    fn init_hook_can_hold_a_cpu_in_reset() {
        let mut config = MachineConfig::default();
        config.cpus = vec![cpu(1_000_000), cpu(1_000_000)];
        let (mut machine, _) = machine(config);
        machine.set_init_hook(Box::new(|services: &mut MachineServices<'_>| {
            services.scheduler().suspend_cpu(1, true, SuspendReasons::RESET)
        }));
        machine.run_frame().unwrap();
        assert_eq!(machine.scheduler().total_cycles(1), Ok(0));

        machine
            .services()
            .set_line(1, InputLine::Reset, LineState::Clear)
            .unwrap();
        machine.run_frame().unwrap();
        assert!(machine.scheduler().total_cycles(1).unwrap() > 0);
    }

    #[test]
    fn registered_callbacks_receive_their_parameter() {
        let (mut machine, _) = machine(MachineConfig::default());
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&hits);
        let id = machine.register_callback(Box::new(move |services: &mut MachineServices<'_>, param: i32| {
            sink.borrow_mut().push((param, services.current_frame()));
        }));
        machine.set_init_hook(Box::new(move |services: &mut MachineServices<'_>| {
            services
                .set_callback(crate::Deadline::After(VirtualTime::from_millis(20)), id, 77)
                .map(|_| ())
        }));
        machine.run_frame().unwrap();
        assert!(hits.borrow().is_empty());
        machine.run_frame().unwrap();
        assert_eq!(*hits.borrow(), vec![(77, 1)]);
    }

    #[test]
    fn shut_down_machines_stop_stepping() {
        let (mut machine, _) = machine(MachineConfig::default());
        machine.shut_down();
        assert_eq!(machine.step(), Ok(StepOutcome::ShutDown));
        assert_eq!(machine.run_frame(), Ok(FrameOutcome::ShutDown));
    }
}

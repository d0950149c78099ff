//! Round-robin CPU scheduler driven by the timer queue.
//!
//! Each call to [`CpuScheduler::schedule_cpu`] either grants one CPU a
//! cycle budget that ends at the next timer expiry, or fires every timer
//! due at that instant and tries again. The caller runs the granted slice
//! and reports the result through [`CpuScheduler::update_cpu`].

use tracing::{debug, trace};

use crate::{
    ActiveSlice, ConfigError, Deadline, FrameEvent, InputLine, LineState, SchedError,
    SchedulerConfig, SchedulerStats, TimerHandle, TimerQueue, VirtualClock, VirtualTime,
};

/// Trigger raised at every forced timeslice boundary.
pub const TRIGGER_TIMESLICE: i32 = -1000;
/// Base of the per-CPU interrupt triggers; CPU `n` uses `TRIGGER_INT + n`.
pub const TRIGGER_INT: i32 = -2000;
/// Base of the rolling triggers used by `yield_until_time`.
pub const TRIGGER_YIELDTIME: i32 = -3000;
/// Base of the rolling triggers used by `spin_until_time`.
pub const TRIGGER_SUSPENDTIME: i32 = -4000;

const TIME_TRIGGER_SLOTS: i32 = 256;

/// Bit set of independent reasons for a CPU not executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SuspendReasons(u8);

impl SuspendReasons {
    /// No reason; the CPU is running.
    pub const NONE: Self = Self(0);
    /// Halt line asserted.
    pub const HALT: Self = Self(0x01);
    /// Reset line asserted.
    pub const RESET: Self = Self(0x02);
    /// Spinning until the next timeslice.
    pub const SPIN: Self = Self(0x04);
    /// Waiting for a trigger id.
    pub const TRIGGER: Self = Self(0x08);
    /// Disabled by machine configuration.
    pub const DISABLE: Self = Self(0x10);
    /// Every reason.
    pub const ANY: Self = Self(0x1F);
    /// Reasons that make a CPU not running as far as interrupts are concerned.
    pub const STOPPED: Self = Self(Self::HALT.0 | Self::RESET.0 | Self::DISABLE.0);

    /// Raw bit pattern.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a set from raw bits, dropping unknown bits.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ANY.0)
    }

    /// Returns `true` when no reason is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when any reason in `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` when every reason in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Adds the reasons in `other`.
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the reasons in `other`.
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// Line transition delivered through the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LineChange {
    /// Target CPU.
    pub cpu: usize,
    /// Target line.
    pub line: InputLine,
    /// Requested state.
    pub state: LineState,
}

/// Payload carried by a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Event {
    /// No action; the timer is an elapsed-time reference.
    Marker,
    /// Raise a trigger id. Handled by the scheduler itself.
    Trigger(i32),
    /// Apply an input line change.
    Line(LineChange),
    /// Machine frame bookkeeping.
    Frame(FrameEvent),
    /// User callback registered with the machine.
    Callback {
        /// Registered callback id.
        id: u32,
        /// Opaque parameter.
        param: i32,
    },
}

/// Receives timer events the scheduler does not handle itself.
pub trait EventSink {
    /// Called once per expiry of a timer carrying `event`.
    ///
    /// The sink may schedule, reset or remove timers (including `timer`
    /// itself) and change CPU suspension through `sched`.
    fn on_timer(&mut self, sched: &mut CpuScheduler, timer: TimerHandle, event: Event);
}

impl<F> EventSink for F
where
    F: FnMut(&mut CpuScheduler, TimerHandle, Event),
{
    fn on_timer(&mut self, sched: &mut CpuScheduler, timer: TimerHandle, event: Event) {
        self(sched, timer, event);
    }
}

/// Result of one scheduling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleOutcome {
    /// Run `cpu` for `cycles`, then call [`CpuScheduler::update_cpu`].
    Run {
        /// CPU to execute.
        cpu: usize,
        /// Granted cycle budget.
        cycles: i32,
    },
    /// No CPU could make progress; due timers may still have fired.
    Stalemate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct CpuSlot {
    suspend: SuspendReasons,
    nocount: bool,
    trigger: Option<i32>,
    total_cycles: u64,
}

/// Multi-CPU scheduler owning the machine clock and timer queue.
#[derive(Debug, Clone)]
pub struct CpuScheduler {
    clock: VirtualClock,
    timers: TimerQueue<Event>,
    cpus: Vec<CpuSlot>,
    last_cpu: Option<usize>,
    stats: SchedulerStats,
    time_trigger: i32,
}

impl CpuScheduler {
    /// Creates a scheduler with every CPU running at time zero.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`SchedulerConfig::validate`].
    pub fn new(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            clock: VirtualClock::new(&config.cpus),
            timers: TimerQueue::new(config.timer_capacity),
            cpus: vec![CpuSlot::default(); config.cpus.len()],
            last_cpu: None,
            stats: SchedulerStats::default(),
            time_trigger: 0,
        })
    }

    /// Number of scheduled CPUs.
    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Machine clock.
    #[must_use]
    pub const fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Timer queue, for inspection.
    #[must_use]
    pub const fn timers(&self) -> &TimerQueue<Event> {
        &self.timers
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> VirtualTime {
        self.clock.now()
    }

    /// Activity counters.
    #[must_use]
    pub const fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// CPU whose slice is executing, if any.
    #[must_use]
    pub fn active_cpu(&self) -> Option<usize> {
        self.clock.active().map(|slice| slice.cpu)
    }

    /// Cycles left in the executing slice.
    #[must_use]
    pub fn cycles_left(&self) -> Option<i32> {
        self.clock.active().map(|slice| slice.icount)
    }

    /// Deducts retired cycles from the executing slice.
    pub fn consume(&mut self, cycles: i32) {
        if let Some(slice) = self.clock.active_mut() {
            slice.icount = slice.icount.saturating_sub(cycles);
        }
    }

    /// Ends the executing slice at the current instruction boundary.
    pub fn abort_timeslice(&mut self) {
        if let Some(slice) = self.clock.active_mut() {
            if slice.icount > 0 {
                slice.lost = slice.lost.saturating_add(slice.icount);
                slice.icount = 0;
            }
        }
    }

    /// Cycles executed by `cpu` since the scheduler was created.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn total_cycles(&self, cpu: usize) -> Result<u64, SchedError> {
        Ok(self.slot(cpu)?.total_cycles)
    }

    /// Changes the overclock factor of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] or [`SchedError::InvalidOverclock`].
    pub fn set_overclock(&mut self, cpu: usize, factor: f64) -> Result<(), SchedError> {
        self.clock.set_overclock(cpu, factor)
    }

    /// Allocates a one-shot timer.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ResourceExhausted`] or
    /// [`SchedError::DurationOutOfRange`].
    pub fn timer_set(&mut self, deadline: Deadline, event: Event) -> Result<TimerHandle, SchedError> {
        let handle = self.timers.insert(self.clock.now(), deadline, None, event)?;
        self.preempt_for(handle, deadline);
        Ok(handle)
    }

    /// Allocates a periodic timer first expiring one `period` from now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ResourceExhausted`] or
    /// [`SchedError::DurationOutOfRange`].
    pub fn timer_pulse(
        &mut self,
        period: VirtualTime,
        event: Event,
    ) -> Result<TimerHandle, SchedError> {
        let deadline = Deadline::After(period);
        let handle = self
            .timers
            .insert(self.clock.now(), deadline, Some(period), event)?;
        self.preempt_for(handle, deadline);
        Ok(handle)
    }

    /// Re-homes a timer to expire at `deadline` from now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] or
    /// [`SchedError::DurationOutOfRange`].
    pub fn timer_reset(&mut self, handle: TimerHandle, deadline: Deadline) -> Result<(), SchedError> {
        self.timers.reset(self.clock.now(), handle, deadline)?;
        self.preempt_for(handle, deadline);
        Ok(())
    }

    /// Sets a timer's next expiry and period independently.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] or
    /// [`SchedError::DurationOutOfRange`].
    pub fn timer_adjust(
        &mut self,
        handle: TimerHandle,
        deadline: Deadline,
        period: Option<VirtualTime>,
    ) -> Result<(), SchedError> {
        self.timers
            .adjust(self.clock.now(), handle, deadline, period)?;
        self.preempt_for(handle, deadline);
        Ok(())
    }

    /// Frees a timer and returns its event.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn timer_remove(&mut self, handle: TimerHandle) -> Result<Event, SchedError> {
        self.timers.remove(handle)
    }

    /// Enables or disables a timer, returning the previous state.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn timer_enable(&mut self, handle: TimerHandle, enabled: bool) -> Result<bool, SchedError> {
        let previous = self.timers.enable(handle, enabled)?;
        if enabled && !previous {
            if let Some(expire) = self.timers.expire_time(handle)? {
                let deadline = Deadline::After(expire.saturating_sub(self.clock.now()));
                self.preempt_for(handle, deadline);
            }
        }
        Ok(previous)
    }

    /// Time since the timer was started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn timer_time_elapsed(&self, handle: TimerHandle) -> Result<VirtualTime, SchedError> {
        self.timers.elapsed(self.clock.now(), handle)
    }

    /// Time until the timer expires, `None` when it never does.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn timer_time_left(&self, handle: TimerHandle) -> Result<Option<VirtualTime>, SchedError> {
        self.timers.remaining(self.clock.now(), handle)
    }

    /// Instant the timer was last started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn timer_start_time(&self, handle: TimerHandle) -> Result<VirtualTime, SchedError> {
        self.timers.start_time(handle)
    }

    /// Instant the timer will fire, `None` when it never does.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn timer_fire_time(&self, handle: TimerHandle) -> Result<Option<VirtualTime>, SchedError> {
        self.timers.expire_time(handle)
    }

    // A timer landing before the running slice's end shortens the slice and
    // books the difference as lost cycles.
    fn preempt_for(&mut self, handle: TimerHandle, deadline: Deadline) {
        let Some(slice) = self.clock.active().copied() else {
            return;
        };
        let Ok(Some(expire)) = self.timers.expire_time(handle) else {
            return;
        };
        if expire >= self.clock.base_time() {
            return;
        }
        let new_icount = match deadline {
            Deadline::Now => 0,
            Deadline::After(_) | Deadline::Never => {
                let until = expire.saturating_sub(self.clock.now());
                self.clock
                    .cycles_for(slice.cpu, until)
                    .unwrap_or(0)
                    .saturating_add(1)
            }
        };
        let diff = slice.icount.saturating_sub(new_icount);
        if diff > 0 {
            if let Some(active) = self.clock.active_mut() {
                active.lost = active.lost.saturating_add(diff);
                active.icount = new_icount;
            }
            self.stats.record_preemption(diff);
            trace!(cpu = slice.cpu, lost = diff, "slice preempted by timer");
        }
    }

    /// Picks the next CPU to run, firing due timers when every runnable CPU
    /// has caught up with the head of the timer queue.
    pub fn schedule_cpu(&mut self, sink: &mut dyn EventSink) -> ScheduleOutcome {
        if let Some(end) = self.timers.next_expiry() {
            if let Some(outcome) = self.pick_cpu(end) {
                return outcome;
            }
            self.fire_due(end, sink);
            self.last_cpu = None;
            if let Some(end) = self.timers.next_expiry() {
                if let Some(outcome) = self.pick_cpu(end) {
                    return outcome;
                }
            }
        }
        self.stats.record_stalemate();
        trace!(now = self.clock.now().ticks(), "scheduling stalemate");
        ScheduleOutcome::Stalemate
    }

    fn pick_cpu(&mut self, end: VirtualTime) -> Option<ScheduleOutcome> {
        let first = self.last_cpu.map_or(0, |cpu| cpu + 1);
        for cpu in first..self.cpus.len() {
            if !self.cpus[cpu].suspend.is_empty() {
                continue;
            }
            let cycles = self.clock.budget(cpu, end);
            if cycles > 0 {
                self.clock.begin_slice(cpu, cycles);
                self.last_cpu = Some(cpu);
                self.stats.record_slice();
                trace!(cpu, cycles, "slice granted");
                return Some(ScheduleOutcome::Run { cpu, cycles });
            }
        }

        for (cpu, slot) in self.cpus.iter().enumerate() {
            if !slot.suspend.is_empty() && !slot.nocount {
                if self.clock.is_behind(cpu, end) {
                    self.clock.set_local_time(cpu, end);
                }
            }
        }
        None
    }

    fn fire_due(&mut self, mut end: VirtualTime, sink: &mut dyn EventSink) {
        if end >= VirtualTime::ONE_SECOND {
            self.renormalize();
            end = end.saturating_sub(VirtualTime::ONE_SECOND);
        }
        self.clock.set_base_time(end);
        while let Some(fired) = self.timers.begin_fire(end) {
            self.stats.record_timer_fired();
            match fired.payload {
                Event::Marker => {}
                Event::Trigger(trigger) => self.fire_trigger(trigger),
                event => sink.on_timer(self, fired.handle, event),
            }
            self.timers.finish_fire();
        }
    }

    /// Accounts for a finished slice.
    ///
    /// `ran` is the cycle count returned by the core; preempted cycles are
    /// subtracted before the CPU's time advances. Suspended CPUs do not
    /// advance.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn update_cpu(&mut self, cpu: usize, ran: i32) -> Result<(), SchedError> {
        self.slot(cpu)?;
        let slice = self.clock.end_slice().filter(|slice| slice.cpu == cpu);
        let lost = slice.map_or(0, |slice| slice.lost);
        let executed = if self.cpus[cpu].suspend.is_empty() {
            let executed = ran.saturating_sub(lost);
            self.clock.advance(cpu, executed);
            executed
        } else {
            slice
                .and_then(|slice: ActiveSlice| slice.retired_before_suspend)
                .unwrap_or(0)
        };
        let slot = &mut self.cpus[cpu];
        slot.total_cycles = slot
            .total_cycles
            .saturating_add(u64::from(executed.max(0).unsigned_abs()));
        if self.clock.needs_renormalization(cpu) {
            self.renormalize();
        }
        Ok(())
    }

    fn renormalize(&mut self) {
        self.clock.renormalize();
        self.timers.renormalize();
        self.stats.record_renormalization();
    }

    fn slot(&self, cpu: usize) -> Result<&CpuSlot, SchedError> {
        let count = self.cpus.len();
        self.cpus
            .get(cpu)
            .ok_or(SchedError::InvalidCpu { index: cpu, count })
    }

    /// Adds (`on`) or clears one suspend reason.
    ///
    /// Suspending the running CPU ends its slice immediately. Resuming a CPU
    /// that was suspended but not held moves its time up to now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn suspend_cpu(
        &mut self,
        cpu: usize,
        on: bool,
        reason: SuspendReasons,
    ) -> Result<(), SchedError> {
        self.slot(cpu)?;
        self.change_suspend(cpu, on, reason, false);
        Ok(())
    }

    // `cpu` must be in range. A hold additionally stops the CPU's time.
    fn change_suspend(&mut self, cpu: usize, on: bool, reason: SuspendReasons, hold: bool) {
        let now = self.clock.now();
        let slot = &mut self.cpus[cpu];
        let was_suspended = !slot.suspend.is_empty();
        let was_held = slot.nocount;
        if on {
            slot.suspend.insert(reason);
        } else {
            slot.suspend.remove(reason);
        }
        slot.nocount = false;
        let suspended = !slot.suspend.is_empty();

        if self.active_cpu() == Some(cpu) && !was_suspended && suspended {
            self.clock.set_local_time(cpu, now);
            self.clock.set_base_time(now);
            if let Some(slice) = self.clock.active_mut() {
                slice.retired_before_suspend = Some(slice.consumed());
                slice.lost = 0;
                slice.icount = 0;
            }
            debug!(cpu, reasons = reason.bits(), "running cpu suspended");
        } else if was_suspended && !suspended && !was_held {
            if self.clock.is_behind(cpu, now) {
                self.clock.set_local_time(cpu, now);
            }
            debug!(cpu, "cpu resumed");
        }
        if on && hold {
            self.cpus[cpu].nocount = true;
        }
    }

    /// Like [`CpuScheduler::suspend_cpu`], but a held CPU does not accrue
    /// time while stopped.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn hold_cpu(&mut self, cpu: usize, on: bool, reason: SuspendReasons) -> Result<(), SchedError> {
        self.slot(cpu)?;
        self.change_suspend(cpu, on, reason, true);
        Ok(())
    }

    /// Returns `true` when any reason in `reasons` is set for `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn is_suspended(&self, cpu: usize, reasons: SuspendReasons) -> Result<bool, SchedError> {
        Ok(self.slot(cpu)?.suspend.intersects(reasons))
    }

    /// Returns `true` when `cpu` is suspended for one of `reasons` and held.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn is_held(&self, cpu: usize, reasons: SuspendReasons) -> Result<bool, SchedError> {
        let slot = self.slot(cpu)?;
        Ok(slot.suspend.intersects(reasons) && slot.nocount)
    }

    /// Returns `true` unless `cpu` is halted, held in reset, or disabled.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn is_running(&self, cpu: usize) -> Result<bool, SchedError> {
        Ok(!self.slot(cpu)?.suspend.intersects(SuspendReasons::STOPPED))
    }

    /// Current suspend reasons of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn suspend_reasons(&self, cpu: usize) -> Result<SuspendReasons, SchedError> {
        Ok(self.slot(cpu)?.suspend)
    }

    /// Suspends `cpu` until `trigger` is raised. Time keeps accruing.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn suspend_until_trigger(&mut self, cpu: usize, trigger: i32) -> Result<(), SchedError> {
        self.slot(cpu)?;
        self.wait_for_trigger(cpu, trigger, false);
        Ok(())
    }

    /// Holds `cpu` until `trigger` is raised. Time stops accruing.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn hold_until_trigger(&mut self, cpu: usize, trigger: i32) -> Result<(), SchedError> {
        self.slot(cpu)?;
        self.wait_for_trigger(cpu, trigger, true);
        Ok(())
    }

    fn wait_for_trigger(&mut self, cpu: usize, trigger: i32, hold: bool) {
        self.change_suspend(cpu, true, SuspendReasons::TRIGGER, hold);
        self.cpus[cpu].trigger = Some(trigger);
    }

    /// Raises `trigger`: ends the running slice and releases every CPU
    /// waiting for it.
    pub fn fire_trigger(&mut self, trigger: i32) {
        self.stats.record_trigger();
        self.abort_timeslice();
        for cpu in 0..self.cpus.len() {
            let slot = self.cpus[cpu];
            if slot.suspend.contains(SuspendReasons::TRIGGER) && slot.trigger == Some(trigger) {
                self.change_suspend(cpu, false, SuspendReasons::TRIGGER, true);
                self.cpus[cpu].trigger = None;
                trace!(cpu, trigger, "trigger released cpu");
            }
        }
    }

    /// Raises `trigger` after `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ResourceExhausted`] or
    /// [`SchedError::DurationOutOfRange`].
    pub fn trigger_after(
        &mut self,
        duration: VirtualTime,
        trigger: i32,
    ) -> Result<TimerHandle, SchedError> {
        self.timer_set(Deadline::After(duration), Event::Trigger(trigger))
    }

    /// Suspends the running CPU until `trigger`.
    pub fn spin_until_trigger(&mut self, trigger: i32) {
        if let Some(cpu) = self.active_cpu() {
            self.wait_for_trigger(cpu, trigger, false);
        }
    }

    /// Holds the running CPU until `trigger`.
    pub fn yield_until_trigger(&mut self, trigger: i32) {
        if let Some(cpu) = self.active_cpu() {
            self.wait_for_trigger(cpu, trigger, true);
        }
    }

    /// Suspends the running CPU until its next interrupt.
    pub fn spin_until_interrupt(&mut self) {
        if let Some(cpu) = self.active_cpu() {
            self.wait_for_trigger(cpu, interrupt_trigger(cpu), false);
        }
    }

    /// Holds the running CPU until its next interrupt.
    pub fn yield_until_interrupt(&mut self) {
        if let Some(cpu) = self.active_cpu() {
            self.wait_for_trigger(cpu, interrupt_trigger(cpu), true);
        }
    }

    /// Burns the rest of the running CPU's timeslice.
    pub fn spin(&mut self) {
        self.spin_until_trigger(TRIGGER_TIMESLICE);
    }

    /// Gives up the rest of the running CPU's timeslice without accruing time.
    pub fn yield_timeslice(&mut self) {
        self.yield_until_trigger(TRIGGER_TIMESLICE);
    }

    /// Suspends the running CPU for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ResourceExhausted`] or
    /// [`SchedError::DurationOutOfRange`].
    pub fn spin_until_time(&mut self, duration: VirtualTime) -> Result<(), SchedError> {
        let trigger = TRIGGER_SUSPENDTIME + self.next_time_trigger();
        self.spin_until_trigger(trigger);
        self.trigger_after(duration, trigger).map(|_| ())
    }

    /// Holds the running CPU for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ResourceExhausted`] or
    /// [`SchedError::DurationOutOfRange`].
    pub fn yield_until_time(&mut self, duration: VirtualTime) -> Result<(), SchedError> {
        let trigger = TRIGGER_YIELDTIME + self.next_time_trigger();
        self.yield_until_trigger(trigger);
        self.trigger_after(duration, trigger).map(|_| ())
    }

    fn next_time_trigger(&mut self) -> i32 {
        let slot = self.time_trigger;
        self.time_trigger = (self.time_trigger + 1) % TIME_TRIGGER_SLOTS;
        slot
    }
}

/// Trigger raised when `cpu` takes an interrupt.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const fn interrupt_trigger(cpu: usize) -> i32 {
    TRIGGER_INT + cpu as i32
}

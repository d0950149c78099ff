//! Saturating diagnostic counters for the scheduler and interrupt controller.

/// Scheduler activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SchedulerStats {
    /// Execution slices granted to CPUs.
    pub slices_granted: u64,
    /// Scheduling calls that could not run any CPU.
    pub stalemates: u64,
    /// Timer callbacks dispatched.
    pub timers_fired: u64,
    /// One-second renormalizations applied.
    pub renormalizations: u64,
    /// Running slices shortened by a newly scheduled timer.
    pub preemptions: u64,
    /// Cycles removed from running slices by preemption.
    pub cycles_lost: u64,
    /// Trigger ids raised.
    pub triggers_fired: u64,
}

impl SchedulerStats {
    pub(crate) const fn record_slice(&mut self) {
        self.slices_granted = self.slices_granted.saturating_add(1);
    }

    pub(crate) const fn record_stalemate(&mut self) {
        self.stalemates = self.stalemates.saturating_add(1);
    }

    pub(crate) const fn record_timer_fired(&mut self) {
        self.timers_fired = self.timers_fired.saturating_add(1);
    }

    pub(crate) const fn record_renormalization(&mut self) {
        self.renormalizations = self.renormalizations.saturating_add(1);
    }

    pub(crate) const fn record_preemption(&mut self, cycles: i32) {
        self.preemptions = self.preemptions.saturating_add(1);
        self.cycles_lost = self.cycles_lost.saturating_add(cycles.unsigned_abs() as u64);
    }

    pub(crate) const fn record_trigger(&mut self) {
        self.triggers_fired = self.triggers_fired.saturating_add(1);
    }
}

/// Interrupt controller counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InterruptStats {
    /// Line changes applied to a core.
    pub delivered: u64,
    /// Requests discarded because the target CPU was not running.
    pub dropped: u64,
    /// Acknowledge callbacks serviced for cores.
    pub acknowledged: u64,
}

impl InterruptStats {
    pub(crate) const fn record_delivered(&mut self) {
        self.delivered = self.delivered.saturating_add(1);
    }

    pub(crate) const fn record_dropped(&mut self) {
        self.dropped = self.dropped.saturating_add(1);
    }

    pub(crate) const fn record_acknowledged(&mut self) {
        self.acknowledged = self.acknowledged.saturating_add(1);
    }
}

use thiserror::Error;

/// Recoverable failures reported by the timer queue and CPU scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SchedError {
    /// Every timer slot in the pool is in use.
    #[error("timer pool exhausted ({capacity} slots in use)")]
    ResourceExhausted {
        /// Configured pool capacity.
        capacity: usize,
    },
    /// The timer handle refers to a timer that has already been removed.
    #[error("timer handle is stale or was never issued by this queue")]
    InvalidHandle,
    /// The CPU index is outside the configured CPU table.
    #[error("cpu index {index} out of range (machine has {count} cpus)")]
    InvalidCpu {
        /// Requested CPU index.
        index: usize,
        /// Number of configured CPUs.
        count: usize,
    },
    /// A duration or period is negative, zero where a period is required, or
    /// longer than one second.
    #[error("duration outside the representable scheduling window")]
    DurationOutOfRange,
    /// An overclock factor is zero, negative, or not finite.
    #[error("overclock factor must be a positive finite number")]
    InvalidOverclock,
    /// The interrupt line number is not wired on this machine.
    #[error("irq line {line} out of range")]
    InvalidLine {
        /// Requested line number.
        line: u8,
    },
}

impl SchedError {
    /// Returns `true` when the error is caused by a caller-supplied value rather
    /// than by pool state.
    #[must_use]
    pub const fn is_caller_error(self) -> bool {
        !matches!(self, Self::ResourceExhausted { .. })
    }
}

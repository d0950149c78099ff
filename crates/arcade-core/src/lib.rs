//! Multi-CPU emulation scheduler for Arcade.
//!
//! Several emulated CPUs, each with its own clock, share one virtual
//! timeline. They run in bounded slices, interleaved with timer events
//! that expire at exact virtual instants.

/// Fixed-point virtual time and per-CPU clock timelines.
pub mod time;
pub use time::{ActiveSlice, VirtualClock, VirtualTime, TICKS_PER_SECOND};

/// Fixed-capacity timer pool ordered by expiration.
pub mod timer;
pub use timer::{Deadline, Fired, TimerHandle, TimerQueue};

/// Slice scheduling, suspension and trigger bookkeeping.
pub mod scheduler;
pub use scheduler::{
    interrupt_trigger, CpuScheduler, Event, EventSink, LineChange, ScheduleOutcome,
    SuspendReasons, TRIGGER_INT, TRIGGER_SUSPENDTIME, TRIGGER_TIMESLICE, TRIGGER_YIELDTIME,
};

/// Interrupt, reset and halt line delivery.
pub mod interrupt;
pub use interrupt::{
    AckCallback, InputLine, InterruptController, IrqAcknowledge, LineState, MAX_IRQ_LINES,
};

/// Contract implemented by emulated CPU cores.
pub mod cpu;
pub use cpu::{CoreContext, CoreError, CpuCore, DirectContext, ExecContext};

/// Byte-addressed memory bus.
pub mod memory;
pub use memory::{FlatMemory, MemoryBus};

/// Machine lifecycle and video frame timing.
pub mod machine;
pub use machine::{
    CpuUnit, FrameEvent, FrameListener, FrameOutcome, FrameReport, InitHook, Machine,
    MachineError, MachineServices, MachineState, StepOutcome, TimerCallback,
};

/// Scheduler and machine configuration.
pub mod config;
pub use config::{
    compute_rate, ConfigError, CpuClockConfig, CpuConfig, InterruptRequest, MachineConfig,
    SchedulerConfig, DEFAULT_TIMER_CAPACITY, RATE_NANOSECOND_THRESHOLD,
};

/// Counters exposed for diagnostics.
pub mod diag;
pub use diag::{InterruptStats, SchedulerStats};

/// Error types shared by the timer queue and scheduler.
pub mod error;
pub use error::SchedError;

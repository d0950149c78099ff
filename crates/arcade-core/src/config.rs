//! Scheduler and machine configuration.

use thiserror::Error;

use crate::{InputLine, LineState, VirtualTime, MAX_IRQ_LINES};

/// Default number of timer slots in a machine's timer pool.
pub const DEFAULT_TIMER_CAPACITY: usize = 256;

/// Timed-interrupt rates below this value are in Hz; values at or above it
/// are periods in nanoseconds.
pub const RATE_NANOSECOND_THRESHOLD: u32 = 50_000;

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A machine must contain at least one CPU.
    #[error("at least one cpu must be configured")]
    NoCpus,
    /// A CPU was configured with a clock of 0 Hz.
    #[error("cpu {cpu} has a zero clock rate")]
    ZeroClock {
        /// CPU index.
        cpu: usize,
    },
    /// A CPU overclock factor is non-positive or not finite.
    #[error("cpu {cpu} has an invalid overclock factor")]
    InvalidOverclock {
        /// CPU index.
        cpu: usize,
    },
    /// The frame rate is zero.
    #[error("frames per second must be non-zero")]
    ZeroFrameRate,
    /// The timer pool has no slots.
    #[error("timer capacity must be non-zero")]
    ZeroTimerCapacity,
    /// VBlank lasts longer than a whole frame.
    #[error("vblank duration of {usec}us exceeds the frame period")]
    VblankTooLong {
        /// Configured VBlank duration.
        usec: u32,
    },
    /// A timed-interrupt rate resolves to a period longer than one second.
    #[error("cpu {cpu} timed interrupt rate {rate} is out of range")]
    TimedInterruptRate {
        /// CPU index.
        cpu: usize,
        /// Configured raw rate value.
        rate: u32,
    },
    /// A machine interrupt names an IRQ line the controller does not wire.
    #[error("cpu {cpu} interrupt uses irq line {line}, only {max} lines exist")]
    IrqLineOutOfRange {
        /// CPU index.
        cpu: usize,
        /// Configured line number.
        line: u8,
        /// Number of wired lines.
        max: usize,
    },
    /// The number of cores handed to the machine differs from the configuration.
    #[error("configuration names {configured} cpus but {supplied} cores were supplied")]
    CpuCountMismatch {
        /// CPUs in the configuration.
        configured: usize,
        /// Cores supplied by the caller.
        supplied: usize,
    },
}

/// Clock settings of one CPU timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuClockConfig {
    /// Nominal clock rate in Hz.
    pub clock_hz: u32,
    /// Multiplier applied to the nominal rate.
    pub overclock: f64,
}

impl CpuClockConfig {
    /// Clock at `clock_hz` with no overclocking.
    #[must_use]
    pub const fn new(clock_hz: u32) -> Self {
        Self {
            clock_hz,
            overclock: 1.0,
        }
    }
}

impl Default for CpuClockConfig {
    fn default() -> Self {
        Self::new(8_000_000)
    }
}

/// Configuration of a bare [`CpuScheduler`](crate::CpuScheduler).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SchedulerConfig {
    /// One clock per CPU, in scheduling order.
    pub cpus: Vec<CpuClockConfig>,
    /// Number of timer slots.
    pub timer_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpus: vec![CpuClockConfig::default()],
            timer_capacity: DEFAULT_TIMER_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Scheduler for the given clock rates with the default timer pool.
    #[must_use]
    pub fn with_rates(rates: &[u32]) -> Self {
        Self {
            cpus: rates.iter().map(|&hz| CpuClockConfig::new(hz)).collect(),
            timer_capacity: DEFAULT_TIMER_CAPACITY,
        }
    }

    /// Checks CPU clocks and pool capacity.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpus.is_empty() {
            return Err(ConfigError::NoCpus);
        }
        if self.timer_capacity == 0 {
            return Err(ConfigError::ZeroTimerCapacity);
        }
        for (cpu, clock) in self.cpus.iter().enumerate() {
            if clock.clock_hz == 0 {
                return Err(ConfigError::ZeroClock { cpu });
            }
            if !clock.overclock.is_finite() || clock.overclock <= 0.0 {
                return Err(ConfigError::InvalidOverclock { cpu });
            }
        }
        Ok(())
    }
}

/// Interrupt raised by a periodic machine timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InterruptRequest {
    /// Target input line.
    pub line: InputLine,
    /// State applied to the line.
    pub state: LineState,
}

impl Default for InterruptRequest {
    fn default() -> Self {
        Self {
            line: InputLine::Irq(0),
            state: LineState::Hold,
        }
    }
}

/// Per-CPU machine settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuConfig {
    /// Display name used in logs.
    pub name: String,
    /// Clock settings.
    pub clock: CpuClockConfig,
    /// Parameter passed to the core on reset.
    pub reset_param: u32,
    /// Audio CPUs are disabled when sound is off.
    pub audio: bool,
    /// Interrupts raised per frame in sync with VBlank (0 = none).
    pub vblank_interrupts_per_frame: u32,
    /// Interrupt raised by the VBlank countdown.
    pub vblank_interrupt: Option<InterruptRequest>,
    /// Independent interrupt rate: 0 = none, below 50000 = Hz, otherwise a
    /// period in nanoseconds.
    pub timed_interrupt_rate: u32,
    /// Interrupt raised by the timed-interrupt timer.
    pub timed_interrupt: Option<InterruptRequest>,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            name: "cpu".to_string(),
            clock: CpuClockConfig::default(),
            reset_param: 0,
            audio: false,
            vblank_interrupts_per_frame: 0,
            vblank_interrupt: None,
            timed_interrupt_rate: 0,
            timed_interrupt: None,
        }
    }
}

impl CpuConfig {
    /// Period of the timed interrupt, or `None` when disabled.
    #[must_use]
    pub fn timed_interrupt_period(&self) -> Option<VirtualTime> {
        compute_rate(self.timed_interrupt_rate)
    }
}

/// Converts a raw rate value into a period: 0 disables, below 50000 is Hz,
/// otherwise nanoseconds.
#[must_use]
pub fn compute_rate(value: u32) -> Option<VirtualTime> {
    match value {
        0 => None,
        hz if hz < RATE_NANOSECOND_THRESHOLD => Some(VirtualTime::from_hz(hz)),
        nanos => Some(VirtualTime::from_nanos(u64::from(nanos))),
    }
}

/// Configuration of a complete emulated machine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineConfig {
    /// Video frame rate.
    pub frames_per_second: u32,
    /// Time between the start of VBlank and the screen update.
    pub vblank_duration_usec: u32,
    /// Forced scheduling boundaries per frame.
    pub slices_per_frame: u32,
    /// Scanlines per frame, used by [`Machine::scanline`](crate::Machine::scanline).
    pub screen_lines: u32,
    /// When `false`, CPUs flagged as audio are disabled.
    pub sound_enabled: bool,
    /// Number of timer slots.
    pub timer_capacity: usize,
    /// CPUs in scheduling order.
    pub cpus: Vec<CpuConfig>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            frames_per_second: 60,
            vblank_duration_usec: 0,
            slices_per_frame: 1,
            screen_lines: 256,
            sound_enabled: true,
            timer_capacity: DEFAULT_TIMER_CAPACITY,
            cpus: vec![CpuConfig::default()],
        }
    }
}

impl MachineConfig {
    /// Clock and pool settings for the underlying scheduler.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            cpus: self.cpus.iter().map(|cpu| cpu.clock).collect(),
            timer_capacity: self.timer_capacity,
        }
    }

    /// Duration of one video frame.
    #[must_use]
    pub const fn frame_period(&self) -> VirtualTime {
        VirtualTime::from_hz(self.frames_per_second)
    }

    /// Duration of VBlank.
    #[must_use]
    pub const fn vblank_duration(&self) -> VirtualTime {
        VirtualTime::from_micros(self.vblank_duration_usec as u64)
    }

    /// Smallest multiple of the largest per-CPU VBlank interrupt count that
    /// every non-zero count divides.
    #[must_use]
    pub fn vblank_multiplier(&self) -> u32 {
        let counts: Vec<u32> = self
            .cpus
            .iter()
            .map(|cpu| cpu.vblank_interrupts_per_frame)
            .filter(|&ipf| ipf > 0)
            .collect();
        let max = counts.iter().copied().max().unwrap_or(1);
        let mut multiplier = max;
        while counts.iter().any(|&ipf| multiplier % ipf != 0) {
            multiplier += max;
        }
        multiplier
    }

    /// Checks the machine and every CPU.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler_config().validate()?;
        if self.frames_per_second == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        if self.vblank_duration() > self.frame_period() {
            return Err(ConfigError::VblankTooLong {
                usec: self.vblank_duration_usec,
            });
        }
        for (cpu, config) in self.cpus.iter().enumerate() {
            for request in [config.vblank_interrupt, config.timed_interrupt]
                .into_iter()
                .flatten()
            {
                if let InputLine::Irq(line) = request.line {
                    if usize::from(line) >= MAX_IRQ_LINES {
                        return Err(ConfigError::IrqLineOutOfRange {
                            cpu,
                            line,
                            max: MAX_IRQ_LINES,
                        });
                    }
                }
            }
            if let Some(period) = config.timed_interrupt_period() {
                if period <= VirtualTime::ZERO || period > VirtualTime::ONE_SECOND {
                    return Err(ConfigError::TimedInterruptRate {
                        cpu,
                        rate: config.timed_interrupt_rate,
                    });
                }
            }
        }
        Ok(())
    }
}

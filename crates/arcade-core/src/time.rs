//! Fixed-point virtual time and per-CPU cycle conversion.
//!
//! Every CPU keeps its own position on the shared timeline. Positions are
//! stored as whole ticks plus a remainder measured in `1 / rate` ticks, so
//! converting executed cycles into time never accumulates rounding drift.

use std::fmt;

use tracing::trace;

use crate::{CpuClockConfig, SchedError};

/// Number of virtual time ticks in one second (`2^30`).
pub const TICKS_PER_SECOND: i32 = 1 << 30;

const TPS: i128 = TICKS_PER_SECOND as i128;

/// Signed 32-bit fixed-point timestamp or duration on the virtual timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VirtualTime(i32);

impl VirtualTime {
    /// Time zero.
    pub const ZERO: Self = Self(0);
    /// Exactly one second.
    pub const ONE_SECOND: Self = Self(TICKS_PER_SECOND);
    /// Largest representable timestamp.
    pub const MAX: Self = Self(i32::MAX);
    /// Smallest representable timestamp.
    pub const MIN: Self = Self(i32::MIN);

    /// Builds a timestamp from a raw tick count.
    #[must_use]
    pub const fn from_ticks(ticks: i32) -> Self {
        Self(ticks)
    }

    /// Returns the raw tick count.
    #[must_use]
    pub const fn ticks(self) -> i32 {
        self.0
    }

    /// Period of a signal running at `hz` cycles per second. Zero yields zero.
    #[must_use]
    pub const fn from_hz(hz: u32) -> Self {
        if hz == 0 {
            return Self::ZERO;
        }
        Self::from_wide(TPS / hz as i128)
    }

    /// Converts nanoseconds into ticks, rounding down.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self::from_wide(nanos as i128 * TPS / 1_000_000_000)
    }

    /// Converts microseconds into ticks, rounding down.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self::from_wide(micros as i128 * TPS / 1_000_000)
    }

    /// Converts milliseconds into ticks, rounding down.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self::from_wide(millis as i128 * TPS / 1_000)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn from_wide(ticks: i128) -> Self {
        if ticks > i32::MAX as i128 {
            Self::MAX
        } else if ticks < i32::MIN as i128 {
            Self::MIN
        } else {
            Self(ticks as i32)
        }
    }

    /// Adds two times, returning `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(ticks) => Some(Self(ticks)),
            None => None,
        }
    }

    /// Adds two times, clamping at the representable range.
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Subtracts two times, clamping at the representable range.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Returns `true` for timestamps before time zero.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Seconds represented by this value.
    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.0) / f64::from(TICKS_PER_SECOND)
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}

/// Execution slice currently granted to a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSlice {
    /// Index of the running CPU.
    pub cpu: usize,
    /// Cycles granted when the slice started.
    pub granted: i32,
    /// Cycles the core may still execute.
    pub icount: i32,
    /// Cycles taken away from the slice by mid-slice preemption.
    pub lost: i32,
    /// Cycles retired before the CPU suspended itself, if it did.
    pub retired_before_suspend: Option<i32>,
}

impl ActiveSlice {
    /// Cycles retired so far in this slice.
    #[must_use]
    pub const fn consumed(&self) -> i32 {
        self.granted
            .saturating_sub(self.icount)
            .saturating_sub(self.lost)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Timeline {
    clock_hz: u32,
    overclock: f64,
    rate: i128,
    // Whole ticks, wider than `VirtualTime` so a held CPU can fall more
    // than a second behind across renormalizations.
    ticks: i64,
    // Fraction of a tick, in units of 1 / rate ticks.
    subtick: i128,
}

impl Timeline {
    fn new(config: &CpuClockConfig) -> Self {
        Self {
            clock_hz: config.clock_hz,
            overclock: config.overclock,
            rate: effective_rate(config.clock_hz, config.overclock),
            ticks: 0,
            subtick: 0,
        }
    }

    const fn time(&self) -> VirtualTime {
        VirtualTime::from_wide(self.ticks as i128)
    }

    fn position_after(&self, cycles: i64) -> (i64, i128) {
        let acc = self.subtick + i128::from(cycles) * TPS;
        let ticks = i128::from(self.ticks) + acc.div_euclid(self.rate);
        (clamp_ticks(ticks), acc.rem_euclid(self.rate))
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn clamp_ticks(ticks: i128) -> i64 {
    if ticks > i64::MAX as i128 {
        i64::MAX
    } else if ticks < i64::MIN as i128 {
        i64::MIN
    } else {
        ticks as i64
    }
}

#[allow(clippy::cast_possible_truncation)]
fn effective_rate(clock_hz: u32, overclock: f64) -> i128 {
    let scaled = (f64::from(clock_hz) * overclock).round();
    i128::from((scaled as i64).max(1))
}

#[allow(clippy::cast_possible_truncation)]
const fn clamp_cycles(cycles: i128) -> i32 {
    if cycles > i32::MAX as i128 {
        i32::MAX
    } else if cycles < i32::MIN as i128 {
        i32::MIN
    } else {
        cycles as i32
    }
}

/// The single authoritative clock of a machine.
///
/// Holds every CPU's timeline position, the base time recorded when the
/// current slice was granted, and the renormalization epoch counter.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualClock {
    timelines: Vec<Timeline>,
    base_time: VirtualTime,
    active: Option<ActiveSlice>,
    epoch: u64,
}

impl VirtualClock {
    /// Creates a clock with one timeline per configured CPU, all at time zero.
    #[must_use]
    pub fn new(cpus: &[CpuClockConfig]) -> Self {
        Self {
            timelines: cpus.iter().map(Timeline::new).collect(),
            base_time: VirtualTime::ZERO,
            active: None,
            epoch: 0,
        }
    }

    /// Number of CPU timelines.
    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.timelines.len()
    }

    /// Current virtual time.
    ///
    /// While a slice is executing this is the running CPU's position after
    /// the cycles it has retired so far; otherwise it is the base time.
    #[must_use]
    pub fn now(&self) -> VirtualTime {
        match self.active {
            Some(slice) if slice.icount.saturating_add(slice.lost) > 0 => {
                let (ticks, _) = self.timelines[slice.cpu]
                    .position_after(i64::from(slice.consumed().max(0)));
                VirtualTime::from_wide(i128::from(ticks))
            }
            _ => self.base_time,
        }
    }

    /// Base time recorded by the last slice grant or timer expiry.
    #[must_use]
    pub const fn base_time(&self) -> VirtualTime {
        self.base_time
    }

    /// Number of renormalizations applied since the clock was created.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Slice currently executing, if any.
    #[must_use]
    pub const fn active(&self) -> Option<&ActiveSlice> {
        self.active.as_ref()
    }

    /// Local timeline position of `cpu`, clamped to the `VirtualTime` range.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn local_time(&self, cpu: usize) -> Result<VirtualTime, SchedError> {
        Ok(self.timeline(cpu)?.time())
    }

    /// How far `cpu` trails `time`, in whole cycles.
    ///
    /// Unlike [`VirtualClock::local_time`] this is exact for a CPU that has
    /// been held across several renormalizations.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn cycles_behind(&self, cpu: usize, time: VirtualTime) -> Result<i64, SchedError> {
        let timeline = self.timeline(cpu)?;
        let span = i128::from(time.0) - i128::from(timeline.ticks);
        Ok(clamp_ticks((span * timeline.rate - timeline.subtick).div_euclid(TPS)))
    }

    /// Effective clock rate of `cpu` in cycles per second after overclocking.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn rate(&self, cpu: usize) -> Result<u64, SchedError> {
        Ok(self.timeline(cpu)?.rate as u64)
    }

    /// Current overclock factor of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn overclock(&self, cpu: usize) -> Result<f64, SchedError> {
        Ok(self.timeline(cpu)?.overclock)
    }

    /// Whole cycles `cpu` executes in `duration`, rounded down.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn cycles_for(&self, cpu: usize, duration: VirtualTime) -> Result<i32, SchedError> {
        let rate = self.timeline(cpu)?.rate;
        Ok(clamp_cycles(
            (i128::from(duration.0) * rate).div_euclid(TPS),
        ))
    }

    /// Time `cpu` needs to execute `cycles`, rounded down.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index.
    pub fn cycles_to_time(&self, cpu: usize, cycles: i32) -> Result<VirtualTime, SchedError> {
        let rate = self.timeline(cpu)?.rate;
        Ok(VirtualTime::from_wide(
            (i128::from(cycles) * TPS).div_euclid(rate),
        ))
    }

    /// Changes the overclock factor of `cpu`.
    ///
    /// The fractional tick remainder is rescaled to the new rate. Timer
    /// expirations are timestamps and are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidCpu`] for an unknown CPU index and
    /// [`SchedError::InvalidOverclock`] for a non-positive or non-finite factor.
    pub fn set_overclock(&mut self, cpu: usize, factor: f64) -> Result<(), SchedError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(SchedError::InvalidOverclock);
        }
        let timeline = self.timeline_mut(cpu)?;
        let rate = effective_rate(timeline.clock_hz, factor);
        timeline.subtick = timeline.subtick * rate / timeline.rate;
        timeline.rate = rate;
        timeline.overclock = factor;
        Ok(())
    }

    fn timeline(&self, cpu: usize) -> Result<&Timeline, SchedError> {
        let count = self.timelines.len();
        self.timelines
            .get(cpu)
            .ok_or(SchedError::InvalidCpu { index: cpu, count })
    }

    fn timeline_mut(&mut self, cpu: usize) -> Result<&mut Timeline, SchedError> {
        let count = self.timelines.len();
        self.timelines
            .get_mut(cpu)
            .ok_or(SchedError::InvalidCpu { index: cpu, count })
    }

    pub(crate) fn set_base_time(&mut self, time: VirtualTime) {
        self.base_time = time;
    }

    pub(crate) fn set_local_time(&mut self, cpu: usize, time: VirtualTime) {
        let timeline = &mut self.timelines[cpu];
        timeline.ticks = i64::from(time.0);
        timeline.subtick = 0;
    }

    /// Whole cycles `cpu` can execute without passing `end`.
    pub(crate) fn budget(&self, cpu: usize, end: VirtualTime) -> i32 {
        let timeline = &self.timelines[cpu];
        let span = i128::from(end.0) - i128::from(timeline.ticks);
        clamp_cycles((span * timeline.rate - timeline.subtick).div_euclid(TPS))
    }

    pub(crate) fn project(&self, cpu: usize, cycles: i32) -> VirtualTime {
        let (ticks, _) = self.timelines[cpu].position_after(i64::from(cycles));
        VirtualTime::from_wide(i128::from(ticks))
    }

    /// Returns `true` when `cpu` sits strictly before `time`.
    pub(crate) fn is_behind(&self, cpu: usize, time: VirtualTime) -> bool {
        self.timelines[cpu].ticks < i64::from(time.0)
    }

    pub(crate) fn advance(&mut self, cpu: usize, cycles: i32) {
        let timeline = &mut self.timelines[cpu];
        let (ticks, subtick) = timeline.position_after(i64::from(cycles));
        timeline.ticks = ticks;
        timeline.subtick = subtick;
    }

    pub(crate) fn begin_slice(&mut self, cpu: usize, cycles: i32) {
        let base_time = self.project(cpu, cycles);
        self.base_time = base_time;
        self.active = Some(ActiveSlice {
            cpu,
            granted: cycles,
            icount: cycles,
            lost: 0,
            retired_before_suspend: None,
        });
    }

    pub(crate) fn active_mut(&mut self) -> Option<&mut ActiveSlice> {
        self.active.as_mut()
    }

    pub(crate) fn end_slice(&mut self) -> Option<ActiveSlice> {
        self.active.take()
    }

    pub(crate) fn needs_renormalization(&self, cpu: usize) -> bool {
        self.timelines[cpu].ticks >= i64::from(TICKS_PER_SECOND)
    }

    pub(crate) fn renormalize(&mut self) {
        for timeline in &mut self.timelines {
            timeline.ticks = timeline.ticks.saturating_sub(i64::from(TICKS_PER_SECOND));
        }
        self.base_time = self.base_time.saturating_sub(VirtualTime::ONE_SECOND);
        self.epoch += 1;
        trace!(epoch = self.epoch, "virtual clock renormalized");
    }
}

#[cfg(test)]
mod tests {
    use super::{VirtualClock, VirtualTime, TICKS_PER_SECOND};
    use crate::{CpuClockConfig, SchedError};
    use proptest::prelude::*;
    use rstest::rstest;

    fn clock(rates: &[u32]) -> VirtualClock {
        let cpus: Vec<_> = rates.iter().map(|&hz| CpuClockConfig::new(hz)).collect();
        VirtualClock::new(&cpus)
    }

    #[rstest]
    #[case(60, TICKS_PER_SECOND / 60)]
    #[case(1_000, TICKS_PER_SECOND / 1_000)]
    #[case(1, TICKS_PER_SECOND)]
    #[case(0, 0)]
    fn from_hz_divides_one_second(#[case] hz: u32, #[case] ticks: i32) {
        assert_eq!(VirtualTime::from_hz(hz).ticks(), ticks);
    }

    #[test]
    fn unit_conversions_round_down_and_saturate() {
        assert_eq!(VirtualTime::from_millis(1000), VirtualTime::ONE_SECOND);
        assert_eq!(VirtualTime::from_micros(1_000_000), VirtualTime::ONE_SECOND);
        assert_eq!(VirtualTime::from_nanos(1), VirtualTime::ZERO);
        assert_eq!(VirtualTime::from_millis(10_000), VirtualTime::MAX);
    }

    #[test]
    fn cycles_for_floors_with_wide_intermediate() {
        let clock = clock(&[1_000_000]);
        assert_eq!(clock.cycles_for(0, VirtualTime::ONE_SECOND), Ok(1_000_000));
        assert_eq!(clock.cycles_for(0, VirtualTime::from_ticks(1073)), Ok(0));
        assert_eq!(clock.cycles_for(0, VirtualTime::from_ticks(1074)), Ok(1));
        assert_eq!(
            clock.cycles_for(3, VirtualTime::ZERO),
            Err(SchedError::InvalidCpu { index: 3, count: 1 })
        );
    }

    #[test]
    fn advancing_in_small_steps_does_not_drift() {
        let mut clock = clock(&[3_000_000]);
        for _ in 0..3_000 {
            clock.advance(0, 1_000);
        }
        assert_eq!(clock.local_time(0), Ok(VirtualTime::ONE_SECOND));
    }

    #[test]
    fn budget_never_overshoots_end() {
        let mut clock = clock(&[7_159_090]);
        let end = VirtualTime::from_hz(60);
        let cycles = clock.budget(0, end);
        clock.advance(0, cycles);
        assert!(clock.local_time(0).unwrap() <= end);
        assert_eq!(clock.budget(0, end), 0);
    }

    #[test]
    fn now_tracks_retired_cycles_inside_a_slice() {
        let mut clock = clock(&[1_000_000]);
        clock.begin_slice(0, 1_000);
        let projected = clock.base_time();
        assert_eq!(clock.now(), VirtualTime::ZERO);

        if let Some(slice) = clock.active_mut() {
            slice.icount = 500;
        }
        assert_eq!(clock.now(), clock.project(0, 500));

        if let Some(slice) = clock.active_mut() {
            slice.icount = -4;
        }
        assert_eq!(clock.now(), projected);
    }

    #[test]
    fn overclock_rescales_rate_and_rejects_bad_factors() {
        let mut clock = clock(&[1_000_000]);
        clock.set_overclock(0, 1.5).unwrap();
        assert_eq!(clock.rate(0), Ok(1_500_000));
        assert_eq!(
            clock.set_overclock(0, 0.0),
            Err(SchedError::InvalidOverclock)
        );
        assert_eq!(
            clock.set_overclock(0, f64::NAN),
            Err(SchedError::InvalidOverclock)
        );
    }

    #[test]
    fn renormalize_shifts_every_position_by_one_second() {
        let mut clock = clock(&[1_000_000, 2_000_000]);
        clock.advance(0, 1_250_000);
        clock.advance(1, 2_000_000);
        clock.set_base_time(VirtualTime::from_ticks(TICKS_PER_SECOND + 5));
        assert!(clock.needs_renormalization(0));

        clock.renormalize();

        assert_eq!(clock.epoch(), 1);
        assert_eq!(clock.local_time(0), Ok(VirtualTime::from_ticks(TICKS_PER_SECOND / 4)));
        assert_eq!(clock.local_time(1), Ok(VirtualTime::ZERO));
        assert_eq!(clock.base_time(), VirtualTime::from_ticks(5));
    }

    #[test]
    fn idle_timeline_keeps_its_deficit_across_many_epochs() {
        let mut clock = clock(&[1_000_000, 1_000_000]);
        for _ in 0..4 {
            clock.advance(1, 1_000_000);
            clock.renormalize();
        }
        assert_eq!(clock.local_time(0), Ok(VirtualTime::MIN));
        assert!(clock.is_behind(0, VirtualTime::MIN));
        assert_eq!(clock.cycles_behind(0, VirtualTime::ZERO), Ok(4_000_000));

        let mut owed = 4_000_000;
        while owed > 0 {
            let cycles = clock.budget(0, VirtualTime::ZERO);
            assert!(cycles > 0);
            clock.advance(0, cycles);
            owed -= cycles;
        }
        assert_eq!(owed, 0);
        assert_eq!(clock.local_time(0), Ok(VirtualTime::ZERO));
    }

    proptest! {
        #[test]
        fn advance_is_additive(hz in 1u32..50_000_000, a in 0i32..1_000_000, b in 0i32..1_000_000) {
            let mut split = clock(&[hz]);
            split.advance(0, a);
            split.advance(0, b);
            let mut whole = clock(&[hz]);
            whole.advance(0, a + b);
            prop_assert_eq!(split.local_time(0), whole.local_time(0));
        }
    }
}

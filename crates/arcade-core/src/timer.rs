//! Time-ordered pool of one-shot and periodic timers.
//!
//! Timers live in a fixed-capacity slot arena and are addressed through
//! generation-checked [`TimerHandle`]s. A separate order list keeps live
//! timers sorted by expiry, ties in insertion order, with disabled and
//! never-expiring timers at the tail.

use tracing::{trace, warn};

use crate::{SchedError, VirtualTime, TICKS_PER_SECOND};

/// Opaque, generation-checked reference to a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

impl TimerHandle {
    /// Slot index inside the pool.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }
}

/// When a timer should expire, relative to the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Deadline {
    /// At the current instant, after every timer already due.
    Now,
    /// After a duration of at most one second.
    After(VirtualTime),
    /// Never; the timer only serves as an elapsed-time reference.
    Never,
}

/// Timer popped from the head of the queue by [`TimerQueue::begin_fire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<T> {
    /// Handle of the firing timer.
    pub handle: TimerHandle,
    /// Expiry instant being serviced.
    pub expire: VirtualTime,
    /// Copy of the timer payload.
    pub payload: T,
}

#[derive(Debug, Clone)]
struct TimerEntry<T> {
    payload: T,
    // Wide ticks: a long-lived timer's start may fall over a second behind.
    start: i64,
    expire: Option<VirtualTime>,
    period: Option<VirtualTime>,
    enabled: bool,
}

impl<T> TimerEntry<T> {
    // Finite keys sort before never-expiring ones.
    fn key(&self) -> (bool, i32) {
        match self.expire {
            Some(expire) if self.enabled => (false, expire.ticks()),
            _ => (true, 0),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    entry: Option<TimerEntry<T>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Firing {
    handle: TimerHandle,
    modified: bool,
}

/// Fixed-capacity timer pool ordered by expiry.
#[derive(Debug, Clone)]
pub struct TimerQueue<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    order: Vec<TimerHandle>,
    capacity: usize,
    firing: Option<Firing>,
}

const fn wide(time: VirtualTime) -> i64 {
    time.ticks() as i64
}

fn check_duration(duration: VirtualTime) -> Result<(), SchedError> {
    if duration.is_negative() || duration > VirtualTime::ONE_SECOND {
        return Err(SchedError::DurationOutOfRange);
    }
    Ok(())
}

fn check_period(period: VirtualTime) -> Result<(), SchedError> {
    if period <= VirtualTime::ZERO {
        return Err(SchedError::DurationOutOfRange);
    }
    check_duration(period)
}

fn resolve(now: VirtualTime, deadline: Deadline) -> Result<Option<VirtualTime>, SchedError> {
    match deadline {
        Deadline::Now => Ok(Some(now)),
        Deadline::After(duration) => {
            check_duration(duration)?;
            now.checked_add(duration)
                .map(Some)
                .ok_or(SchedError::DurationOutOfRange)
        }
        Deadline::Never => Ok(None),
    }
}

impl<T: Clone> TimerQueue<T> {
    /// Creates an empty pool with room for `capacity` timers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            order: Vec::with_capacity(capacity),
            capacity,
            firing: None,
        }
    }

    /// Maximum number of live timers.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` when no timer is allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns `true` while `handle` refers to a live timer.
    #[must_use]
    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.entry(handle).is_some()
    }

    /// Expiry of the head timer, or `None` when nothing is due ever.
    #[must_use]
    pub fn next_expiry(&self) -> Option<VirtualTime> {
        let head = self.order.first()?;
        let entry = self.entry(*head)?;
        match entry.key() {
            (false, ticks) => Some(VirtualTime::from_ticks(ticks)),
            (true, _) => None,
        }
    }

    /// Allocates a timer.
    ///
    /// `period` makes the timer periodic; it re-arms at `expire + period`
    /// after each firing.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::ResourceExhausted`] when the pool is full and
    /// [`SchedError::DurationOutOfRange`] for a negative or over-long
    /// duration, or a period that is not strictly positive.
    pub fn insert(
        &mut self,
        now: VirtualTime,
        deadline: Deadline,
        period: Option<VirtualTime>,
        payload: T,
    ) -> Result<TimerHandle, SchedError> {
        if let Some(period) = period {
            check_period(period)?;
        }
        let expire = resolve(now, deadline)?;
        let entry = TimerEntry {
            payload,
            start: wide(now),
            expire,
            period,
            enabled: true,
        };

        let handle = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            TimerHandle {
                index,
                generation: slot.generation,
            }
        } else if self.slots.len() < self.capacity {
            let index = u32::try_from(self.slots.len())
                .map_err(|_| SchedError::ResourceExhausted {
                    capacity: self.capacity,
                })?;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            TimerHandle {
                index,
                generation: 0,
            }
        } else {
            warn!(capacity = self.capacity, "timer pool exhausted");
            return Err(SchedError::ResourceExhausted {
                capacity: self.capacity,
            });
        };

        self.link(handle);
        Ok(handle)
    }

    /// Moves a timer's expiry to `deadline` from `now`, restarting its
    /// elapsed-time reference.
    ///
    /// A periodic timer given a finite duration adopts it as its new
    /// period. Resetting the timer that is currently firing suppresses the
    /// automatic re-arm or removal that would otherwise follow its callback.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle and
    /// [`SchedError::DurationOutOfRange`] for an invalid duration.
    pub fn reset(
        &mut self,
        now: VirtualTime,
        handle: TimerHandle,
        deadline: Deadline,
    ) -> Result<(), SchedError> {
        let expire = resolve(now, deadline)?;
        let entry = self.entry_mut_checked(handle)?;
        if let (Some(_), Deadline::After(duration)) = (entry.period, deadline) {
            if duration > VirtualTime::ZERO {
                entry.period = Some(duration);
            }
        }
        entry.start = wide(now);
        entry.expire = expire;
        self.mark_modified(handle);
        self.relink(handle);
        Ok(())
    }

    /// Sets expiry and period independently. `None` makes the timer one-shot.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle and
    /// [`SchedError::DurationOutOfRange`] for an invalid duration or period.
    pub fn adjust(
        &mut self,
        now: VirtualTime,
        handle: TimerHandle,
        deadline: Deadline,
        period: Option<VirtualTime>,
    ) -> Result<(), SchedError> {
        if let Some(period) = period {
            check_period(period)?;
        }
        let expire = resolve(now, deadline)?;
        let entry = self.entry_mut_checked(handle)?;
        entry.start = wide(now);
        entry.expire = expire;
        entry.period = period;
        self.mark_modified(handle);
        self.relink(handle);
        Ok(())
    }

    /// Frees a timer and returns its payload.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn remove(&mut self, handle: TimerHandle) -> Result<T, SchedError> {
        self.entry_mut_checked(handle)?;
        self.unlink(handle);
        self.mark_modified(handle);
        let slot = &mut self.slots[handle.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        slot.entry
            .take()
            .map(|entry| entry.payload)
            .ok_or(SchedError::InvalidHandle)
    }

    /// Enables or disables a timer and returns the previous state.
    ///
    /// A disabled timer sorts as never-expiring but keeps its expiry and
    /// period.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn enable(&mut self, handle: TimerHandle, enabled: bool) -> Result<bool, SchedError> {
        let entry = self.entry_mut_checked(handle)?;
        let previous = entry.enabled;
        entry.enabled = enabled;
        if previous != enabled {
            self.relink(handle);
        }
        Ok(previous)
    }

    /// Time since the timer was set, reset, or last re-armed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn elapsed(&self, now: VirtualTime, handle: TimerHandle) -> Result<VirtualTime, SchedError> {
        let entry = self.entry_checked(handle)?;
        Ok(VirtualTime::from_wide(
            i128::from(now.ticks()) - i128::from(entry.start),
        ))
    }

    /// Time until expiry, or `None` for a timer that never expires.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn remaining(
        &self,
        now: VirtualTime,
        handle: TimerHandle,
    ) -> Result<Option<VirtualTime>, SchedError> {
        let entry = self.entry_checked(handle)?;
        Ok(entry.expire.map(|expire| expire.saturating_sub(now)))
    }

    /// Instant the timer was last started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn start_time(&self, handle: TimerHandle) -> Result<VirtualTime, SchedError> {
        let start = self.entry_checked(handle)?.start;
        Ok(VirtualTime::from_wide(i128::from(start)))
    }

    /// Configured expiry, or `None` for a timer that never expires.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn expire_time(&self, handle: TimerHandle) -> Result<Option<VirtualTime>, SchedError> {
        Ok(self.entry_checked(handle)?.expire)
    }

    /// Payload of a live timer.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidHandle`] for a stale handle.
    pub fn payload(&self, handle: TimerHandle) -> Result<&T, SchedError> {
        Ok(&self.entry_checked(handle)?.payload)
    }

    /// Handle of the timer whose callback is running, if any.
    #[must_use]
    pub fn firing(&self) -> Option<TimerHandle> {
        self.firing.map(|firing| firing.handle)
    }

    /// Pops the head timer if it is due at or before `end` and marks it as
    /// firing. Must be paired with [`TimerQueue::finish_fire`].
    pub fn begin_fire(&mut self, end: VirtualTime) -> Option<Fired<T>> {
        let expire = self.next_expiry().filter(|&expire| expire <= end)?;
        let handle = *self.order.first()?;
        let payload = self.entry(handle)?.payload.clone();
        self.firing = Some(Firing {
            handle,
            modified: false,
        });
        trace!(timer = handle.index, expire = expire.ticks(), "timer firing");
        Some(Fired {
            handle,
            expire,
            payload,
        })
    }

    /// Completes the firing started by [`TimerQueue::begin_fire`].
    ///
    /// Unless the callback reset or removed the timer, a periodic timer is
    /// re-armed at `expire + period` and a one-shot timer is freed.
    pub fn finish_fire(&mut self) {
        let Some(firing) = self.firing.take() else {
            return;
        };
        if firing.modified {
            return;
        }
        let Some(entry) = self.entry_mut(firing.handle) else {
            return;
        };
        match (entry.period, entry.expire) {
            (Some(period), Some(expire)) => {
                entry.start = wide(expire);
                entry.expire = expire.checked_add(period);
                if entry.expire.is_none() {
                    warn!(timer = firing.handle.index, "periodic timer overflowed the timeline");
                }
                self.relink(firing.handle);
            }
            _ => {
                if let Err(err) = self.remove(firing.handle) {
                    warn!(%err, "failed to free fired timer");
                }
            }
        }
    }

    /// Shifts every finite start and expiry back by one second.
    pub fn renormalize(&mut self) {
        for entry in self.slots.iter_mut().filter_map(|slot| slot.entry.as_mut()) {
            entry.start = entry.start.saturating_sub(i64::from(TICKS_PER_SECOND));
            if let Some(expire) = entry.expire.as_mut() {
                *expire = expire.saturating_sub(VirtualTime::ONE_SECOND);
            }
        }
    }

    fn entry(&self, handle: TimerHandle) -> Option<&TimerEntry<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, handle: TimerHandle) -> Option<&mut TimerEntry<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn entry_checked(&self, handle: TimerHandle) -> Result<&TimerEntry<T>, SchedError> {
        let entry = self.entry(handle);
        debug_assert!(entry.is_some(), "stale timer handle {handle:?}");
        entry.ok_or(SchedError::InvalidHandle)
    }

    fn entry_mut_checked(&mut self, handle: TimerHandle) -> Result<&mut TimerEntry<T>, SchedError> {
        let entry = self.entry_mut(handle);
        debug_assert!(entry.is_some(), "stale timer handle {handle:?}");
        entry.ok_or(SchedError::InvalidHandle)
    }

    fn mark_modified(&mut self, handle: TimerHandle) {
        if let Some(firing) = self.firing.as_mut() {
            if firing.handle == handle {
                firing.modified = true;
            }
        }
    }

    fn key_of(&self, handle: TimerHandle) -> (bool, i32) {
        self.entry(handle).map_or((true, 0), TimerEntry::key)
    }

    fn link(&mut self, handle: TimerHandle) {
        let key = self.key_of(handle);
        let position = self.order.partition_point(|&other| self.key_of(other) <= key);
        self.order.insert(position, handle);
    }

    fn unlink(&mut self, handle: TimerHandle) {
        if let Some(position) = self.order.iter().position(|&other| other == handle) {
            self.order.remove(position);
        }
    }

    fn relink(&mut self, handle: TimerHandle) {
        self.unlink(handle);
        self.link(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::{Deadline, TimerQueue};
    use crate::{SchedError, VirtualTime, TICKS_PER_SECOND};
    use proptest::prelude::*;

    const T0: VirtualTime = VirtualTime::ZERO;

    fn ticks(n: i32) -> VirtualTime {
        VirtualTime::from_ticks(n)
    }

    fn drain(queue: &mut TimerQueue<u32>, end: VirtualTime) -> Vec<(i32, u32)> {
        let mut fired = Vec::new();
        while let Some(timer) = queue.begin_fire(end) {
            fired.push((timer.expire.ticks(), timer.payload));
            queue.finish_fire();
        }
        fired
    }

    #[test]
    fn same_instant_timers_fire_in_insertion_order() {
        let mut queue = TimerQueue::new(8);
        for id in 0..4 {
            queue.insert(T0, Deadline::After(ticks(100)), None, id).unwrap();
        }
        queue.insert(T0, Deadline::After(ticks(50)), None, 9).unwrap();

        assert_eq!(
            drain(&mut queue, ticks(100)),
            vec![(50, 9), (100, 0), (100, 1), (100, 2), (100, 3)]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn now_deadline_queues_behind_pending_now_timers() {
        let mut queue = TimerQueue::new(8);
        queue.insert(ticks(10), Deadline::After(ticks(5)), None, 1).unwrap();
        queue.insert(ticks(10), Deadline::Now, None, 2).unwrap();
        queue.insert(ticks(10), Deadline::Now, None, 3).unwrap();

        assert_eq!(drain(&mut queue, ticks(15)), vec![(10, 2), (10, 3), (15, 1)]);
    }

    #[test]
    fn never_timers_sit_at_the_tail_and_never_fire() {
        let mut queue = TimerQueue::new(4);
        let reference = queue.insert(T0, Deadline::Never, None, 0).unwrap();
        assert_eq!(queue.next_expiry(), None);
        queue.insert(T0, Deadline::After(ticks(3)), None, 1).unwrap();
        assert_eq!(queue.next_expiry(), Some(ticks(3)));
        assert_eq!(drain(&mut queue, VirtualTime::MAX), vec![(3, 1)]);
        assert_eq!(queue.elapsed(ticks(40), reference), Ok(ticks(40)));
        assert_eq!(queue.remaining(ticks(40), reference), Ok(None));
    }

    #[test]
    fn periodic_timers_rearm_from_previous_expiry() {
        let mut queue = TimerQueue::new(4);
        queue
            .insert(T0, Deadline::After(ticks(100)), Some(ticks(100)), 7)
            .unwrap();
        assert_eq!(
            drain(&mut queue, ticks(350)),
            vec![(100, 7), (200, 7), (300, 7)]
        );
        assert_eq!(queue.next_expiry(), Some(ticks(400)));
    }

    #[test]
    fn reset_inside_callback_suppresses_rearm_and_adopts_period() {
        let mut queue = TimerQueue::new(4);
        let handle = queue
            .insert(T0, Deadline::After(ticks(100)), Some(ticks(100)), 0)
            .unwrap();

        let mut fired = Vec::new();
        let mut count = 0;
        while let Some(timer) = queue.begin_fire(ticks(400)) {
            count += 1;
            fired.push(timer.expire.ticks());
            if count == 3 {
                queue
                    .reset(timer.expire, handle, Deadline::After(ticks(50)))
                    .unwrap();
            }
            queue.finish_fire();
        }

        assert_eq!(fired, vec![100, 200, 300, 350, 400]);
    }

    #[test]
    fn remove_inside_callback_is_not_double_freed() {
        let mut queue = TimerQueue::new(2);
        let handle = queue
            .insert(T0, Deadline::After(ticks(10)), Some(ticks(10)), 0)
            .unwrap();
        let timer = queue.begin_fire(ticks(10)).unwrap();
        assert_eq!(queue.firing(), Some(handle));
        assert_eq!(queue.remove(timer.handle), Ok(0));
        let replacement = queue.insert(ticks(10), Deadline::Never, None, 1).unwrap();
        queue.finish_fire();

        assert!(queue.contains(replacement));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.firing(), None);
    }

    #[test]
    fn disabled_timers_keep_their_expiry() {
        let mut queue = TimerQueue::new(2);
        let handle = queue.insert(T0, Deadline::After(ticks(10)), None, 0).unwrap();
        assert_eq!(queue.enable(handle, false), Ok(true));
        assert_eq!(queue.next_expiry(), None);
        assert_eq!(queue.expire_time(handle), Ok(Some(ticks(10))));
        assert_eq!(queue.enable(handle, true), Ok(false));
        assert_eq!(queue.next_expiry(), Some(ticks(10)));
    }

    #[test]
    fn adjust_sets_duration_and_period_independently() {
        let mut queue = TimerQueue::new(2);
        let handle = queue.insert(T0, Deadline::Never, None, 0).unwrap();
        queue
            .adjust(ticks(5), handle, Deadline::After(ticks(20)), Some(ticks(7)))
            .unwrap();
        assert_eq!(drain(&mut queue, ticks(40)), vec![(25, 0), (32, 0), (39, 0)]);
        assert_eq!(queue.start_time(handle), Ok(ticks(39)));
    }

    #[test]
    fn exhaustion_is_reported_and_slots_are_recycled() {
        let mut queue = TimerQueue::new(2);
        let first = queue.insert(T0, Deadline::Never, None, 0).unwrap();
        queue.insert(T0, Deadline::Never, None, 1).unwrap();
        assert_eq!(
            queue.insert(T0, Deadline::Never, None, 2),
            Err(SchedError::ResourceExhausted { capacity: 2 })
        );
        queue.remove(first).unwrap();
        let reused = queue.insert(T0, Deadline::Never, None, 3).unwrap();
        assert_eq!(reused.index(), first.index());
        assert_ne!(reused, first);
    }

    #[test]
    fn durations_are_range_checked() {
        let mut queue = TimerQueue::new(2);
        assert_eq!(
            queue.insert(T0, Deadline::After(ticks(-1)), None, 0),
            Err(SchedError::DurationOutOfRange)
        );
        assert_eq!(
            queue.insert(T0, Deadline::Now, Some(VirtualTime::ZERO), 0),
            Err(SchedError::DurationOutOfRange)
        );
        assert_eq!(
            queue.insert(
                T0,
                Deadline::After(VirtualTime::ONE_SECOND.saturating_add(ticks(1))),
                None,
                0
            ),
            Err(SchedError::DurationOutOfRange)
        );
        assert!(queue.is_empty());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "stale timer handle"))]
    fn stale_handles_fail_loudly_in_debug_and_error_in_release() {
        let mut queue = TimerQueue::new(2);
        let handle = queue.insert(T0, Deadline::Never, None, 0).unwrap();
        queue.remove(handle).unwrap();
        assert_eq!(queue.remove(handle), Err(SchedError::InvalidHandle));
    }

    #[test]
    fn renormalize_preserves_order_and_never_sentinel() {
        let mut queue = TimerQueue::new(4);
        let start = VirtualTime::ONE_SECOND;
        queue.insert(start, Deadline::After(ticks(20)), None, 0).unwrap();
        let never = queue.insert(start, Deadline::Never, None, 1).unwrap();
        queue.renormalize();
        assert_eq!(queue.next_expiry(), Some(ticks(20)));
        assert_eq!(queue.expire_time(never), Ok(None));
        assert_eq!(queue.start_time(never), Ok(T0));
    }

    #[test]
    fn elapsed_survives_several_renormalizations() {
        let mut queue = TimerQueue::new(1);
        let never = queue.insert(T0, Deadline::Never, None, 0).unwrap();
        for _ in 0..3 {
            queue.renormalize();
        }
        assert_eq!(queue.start_time(never), Ok(VirtualTime::MIN));
        let half = TICKS_PER_SECOND / 2;
        let now = ticks(-(TICKS_PER_SECOND + half));
        assert_eq!(queue.elapsed(now, never), Ok(ticks(TICKS_PER_SECOND + half)));
    }

    proptest! {
        #[test]
        fn fire_order_is_sorted_and_stable(deadlines in prop::collection::vec(0i32..64, 1..48)) {
            let mut queue = TimerQueue::new(64);
            for (id, &at) in deadlines.iter().enumerate() {
                let id = u32::try_from(id).unwrap();
                queue.insert(T0, Deadline::After(ticks(at)), None, id).unwrap();
            }
            let fired = drain(&mut queue, ticks(64));
            let mut expected: Vec<(i32, u32)> = deadlines
                .iter()
                .enumerate()
                .map(|(id, &at)| (at, u32::try_from(id).unwrap()))
                .collect();
            expected.sort_by_key(|&(at, _)| at);
            prop_assert_eq!(fired, expected);
        }
    }
}

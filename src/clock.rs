//! Monotonic room clock.
//!
//! `tick()` advances `elapsed_time`/`delta_time` and fires due timers. Timers
//! are driven by ticks rather than wall-clock alarms, so pausing the tick
//! source pauses every timer with it. Large gaps between ticks (over one
//! second) clamp `delta_time` to 100ms to protect simulations from spiral
//! after a stall.

use smallvec::SmallVec;
use std::time::Duration;
use tokio::time::Instant;

/// Ticks longer than this are treated as a stall.
const JUMP_THRESHOLD: Duration = Duration::from_secs(1);
/// `delta_time` reported for a stalled tick.
const CLAMPED_DELTA: Duration = Duration::from_millis(100);

pub type TimerId = u64;

type TimerCallback = Box<dyn FnMut() + Send>;

struct Timer {
    id: TimerId,
    deadline: Duration,
    interval: Option<Duration>,
    callback: Option<TimerCallback>,
}

pub struct Clock {
    running: bool,
    previous: Option<Instant>,
    pub delta_time: Duration,
    pub elapsed_time: Duration,
    timers: Vec<Timer>,
    next_id: TimerId,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            running: true,
            previous: None,
            delta_time: Duration::ZERO,
            elapsed_time: Duration::ZERO,
            timers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
        self.previous = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.previous = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Reset accumulated time, keeping registered timers.
    pub fn reset(&mut self) {
        self.delta_time = Duration::ZERO;
        self.elapsed_time = Duration::ZERO;
        self.previous = Some(Instant::now());
    }

    /// Remove every registered timer.
    pub fn clear(&mut self) {
        self.timers.clear();
    }

    /// Advance the clock and fire due timers. Returns the ids of timers that
    /// fired this tick, so callers can route id-keyed work of their own.
    pub fn tick(&mut self) -> SmallVec<[TimerId; 4]> {
        self.tick_at(Instant::now())
    }

    pub(crate) fn tick_at(&mut self, now: Instant) -> SmallVec<[TimerId; 4]> {
        let mut fired = SmallVec::new();
        if !self.running {
            return fired;
        }

        let raw_delta = self.previous.map_or(Duration::ZERO, |prev| now - prev);
        self.previous = Some(now);
        self.delta_time = if raw_delta > JUMP_THRESHOLD {
            CLAMPED_DELTA
        } else {
            raw_delta
        };
        self.elapsed_time += self.delta_time;

        // Reverse-indexed so one-shot timers can be removed in place.
        for i in (0..self.timers.len()).rev() {
            if self.timers[i].deadline > self.elapsed_time {
                continue;
            }
            fired.push(self.timers[i].id);
            if let Some(callback) = self.timers[i].callback.as_mut() {
                callback();
            }
            match self.timers[i].interval {
                Some(interval) => {
                    let deadline = self.elapsed_time + interval;
                    self.timers[i].deadline = deadline;
                }
                None => {
                    self.timers.remove(i);
                }
            }
        }
        fired.reverse();
        fired
    }

    pub fn set_timeout(
        &mut self,
        delay: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> TimerId {
        self.insert(delay, None, Some(Box::new(callback)))
    }

    pub fn set_interval(
        &mut self,
        delay: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> TimerId {
        self.insert(delay, Some(delay), Some(Box::new(callback)))
    }

    /// Register a one-shot timer with no inline callback; the owner reacts to
    /// the id returned by `tick()`.
    pub fn schedule_timeout(&mut self, delay: Duration) -> TimerId {
        self.insert(delay, None, None)
    }

    /// Register a repeating timer with no inline callback.
    pub fn schedule_interval(&mut self, delay: Duration) -> TimerId {
        self.insert(delay, Some(delay), None)
    }

    pub fn clear_timeout(&mut self, id: TimerId) {
        self.timers.retain(|timer| timer.id != id);
    }

    pub fn clear_interval(&mut self, id: TimerId) {
        self.clear_timeout(id);
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    fn insert(
        &mut self,
        delay: Duration,
        interval: Option<Duration>,
        callback: Option<TimerCallback>,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.push(Timer {
            id,
            deadline: self.elapsed_time + delay,
            interval,
            callback,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ticked(clock: &mut Clock, later_by: Duration) -> SmallVec<[TimerId; 4]> {
        let base = clock.previous.unwrap_or_else(Instant::now);
        clock.tick_at(base + later_by)
    }

    #[test]
    fn elapsed_time_is_monotone() {
        let mut clock = Clock::new();
        clock.start();
        let mut last = Duration::ZERO;
        for step in 1..5u64 {
            ticked(&mut clock, Duration::from_millis(step * 10));
            assert!(clock.elapsed_time >= last);
            last = clock.elapsed_time;
        }
    }

    #[test]
    fn large_jumps_clamp_delta_time() {
        let mut clock = Clock::new();
        clock.start();
        ticked(&mut clock, Duration::from_secs(5));
        assert_eq!(clock.delta_time, Duration::from_millis(100));
        // elapsed advances by the clamped delta, not the raw jump
        assert_eq!(clock.elapsed_time, Duration::from_millis(100));
    }

    #[test]
    fn small_deltas_pass_through() {
        let mut clock = Clock::new();
        clock.start();
        ticked(&mut clock, Duration::from_millis(16));
        assert_eq!(clock.delta_time, Duration::from_millis(16));
    }

    #[test]
    fn timeout_fires_once() {
        let mut clock = Clock::new();
        clock.start();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_cb = hits.clone();
        clock.set_timeout(Duration::from_millis(30), move || {
            hits_in_cb.fetch_add(1, Ordering::SeqCst);
        });

        ticked(&mut clock, Duration::from_millis(10));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        ticked(&mut clock, Duration::from_millis(25));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        ticked(&mut clock, Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(clock.active_timers(), 0);
    }

    #[test]
    fn interval_fires_repeatedly_and_clears() {
        let mut clock = Clock::new();
        clock.start();
        let id = clock.schedule_interval(Duration::from_millis(20));

        assert!(ticked(&mut clock, Duration::from_millis(25)).contains(&id));
        assert!(ticked(&mut clock, Duration::from_millis(25)).contains(&id));
        clock.clear_interval(id);
        assert!(ticked(&mut clock, Duration::from_millis(25)).is_empty());
    }

    #[test]
    fn stopped_clock_fires_nothing() {
        let mut clock = Clock::new();
        clock.start();
        clock.schedule_timeout(Duration::from_millis(1));
        clock.stop();
        assert!(clock.tick().is_empty());
        assert_eq!(clock.elapsed_time, Duration::ZERO);
    }

    #[test]
    fn clear_drops_all_timers() {
        let mut clock = Clock::new();
        clock.start();
        clock.schedule_timeout(Duration::from_millis(1));
        clock.schedule_interval(Duration::from_millis(1));
        clock.clear();
        assert_eq!(clock.active_timers(), 0);
    }
}

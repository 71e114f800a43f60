//! Virtual clocks queried by the engine for `Date` and timers.
//!
//! Each agent owns one [`Clock`]. The foreground consumer calls
//! [`Clock::begin_tick`] at the start of every task; `Date.now()` and host
//! queries route through [`Clock::clock_time_ms`] while the agent is
//! current.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn wall_now_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// Pass-through system time.
#[derive(Debug, Default)]
pub struct SystemClock;

/// Wall clock shifted so `now = epoch + (wall_now − wall_at_construction)`.
#[derive(Debug)]
pub struct RealtimeClock {
    offset_ms: i64,
}

impl RealtimeClock {
    pub fn new(epoch_ms: i64) -> Self {
        Self { offset_ms: epoch_ms - wall_now_ms() }
    }
}

/// Freezes a single instant at each `begin_tick`; every query during the
/// task returns the same value. The epoch defaults to the first tick's
/// real time.
#[derive(Debug)]
pub struct MicrotaskClock {
    epoch_ms: Option<i64>,
    offset_ms: Option<i64>,
    current_ms: i64,
    start: Instant,
}

impl MicrotaskClock {
    pub fn new(epoch_ms: Option<i64>) -> Self {
        Self {
            epoch_ms,
            offset_ms: None,
            current_ms: epoch_ms.unwrap_or(0),
            start: Instant::now(),
        }
    }

    fn tick(&mut self) {
        let wall = self.start.elapsed().as_millis() as i64;
        let offset = *self.offset_ms.get_or_insert_with(|| {
            // First tick pins the epoch.
            self.epoch_ms.unwrap_or_else(wall_now_ms) - wall
        });
        self.current_ms = wall + offset;
    }
}

/// Returns `epoch + increment × tick_count`, independent of wall time.
#[derive(Debug)]
pub struct DeterministicClock {
    epoch_ms: i64,
    increment_ms: i64,
    current_ms: i64,
    ticks: u64,
}

impl DeterministicClock {
    pub fn new(epoch_ms: i64, increment_ms: i64) -> Self {
        Self { epoch_ms, increment_ms, current_ms: epoch_ms, ticks: 0 }
    }
}

/// The four clock variants of an agent's behavior record.
#[derive(Debug)]
pub enum Clock {
    System(SystemClock),
    Realtime(RealtimeClock),
    Microtask(MicrotaskClock),
    Deterministic(DeterministicClock),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System(SystemClock)
    }

    pub fn realtime(epoch_ms: i64) -> Self {
        Clock::Realtime(RealtimeClock::new(epoch_ms))
    }

    pub fn microtask(epoch_ms: Option<i64>) -> Self {
        Clock::Microtask(MicrotaskClock::new(epoch_ms))
    }

    pub fn deterministic(epoch_ms: i64, increment_ms: i64) -> Self {
        Clock::Deterministic(DeterministicClock::new(epoch_ms, increment_ms))
    }

    /// Called at the start of each foreground task.
    pub fn begin_tick(&mut self) {
        match self {
            Clock::System(_) | Clock::Realtime(_) => {}
            Clock::Microtask(clock) => clock.tick(),
            Clock::Deterministic(clock) => {
                // The k-th tick observes epoch + k·increment, counting
                // from zero.
                clock.current_ms = clock.epoch_ms
                    + clock.increment_ms.wrapping_mul(clock.ticks as i64);
                clock.ticks += 1;
            }
        }
    }

    /// Milliseconds since the Unix epoch as this clock tells it.
    pub fn clock_time_ms(&self) -> i64 {
        match self {
            Clock::System(_) => wall_now_ms(),
            Clock::Realtime(clock) => wall_now_ms() + clock.offset_ms,
            Clock::Microtask(clock) => clock.current_ms,
            Clock::Deterministic(clock) => clock.current_ms,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_ticks_ignore_wall_time() {
        let mut clock = Clock::deterministic(0, 1000);
        for expected in [0, 1000, 2000, 3000] {
            clock.begin_tick();
            assert_eq!(clock.clock_time_ms(), expected);
            assert_eq!(clock.clock_time_ms(), expected);
        }
    }

    #[test]
    fn microtask_freezes_within_tick() {
        let mut clock = Clock::microtask(Some(500));
        clock.begin_tick();
        let first = clock.clock_time_ms();
        assert!(first >= 500);
        assert_eq!(clock.clock_time_ms(), first);
    }

    #[test]
    fn realtime_shifts_epoch() {
        let clock = Clock::realtime(0);
        let now = clock.clock_time_ms();
        // Construction pinned the offset; the reading is near zero.
        assert!((0..1000).contains(&now), "unexpected shifted time {now}");
    }
}

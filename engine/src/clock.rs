//! Enqueue clock for outbox operations.
//!
//! Operation timestamps come from the wall clock but must be strictly
//! increasing: two mutations in the same millisecond, or a wall clock that
//! steps backwards, must never reorder replay.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// A wall-clock source forced to be strictly monotonic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonotonicClock {
    /// Last timestamp handed out
    pub last: Timestamp,
}

impl MonotonicClock {
    /// Create a clock that has not handed out any timestamp yet.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Create a clock that will only hand out timestamps after `last`.
    pub fn starting_after(last: Timestamp) -> Self {
        Self { last }
    }

    /// Produce the next timestamp given the current wall-clock reading.
    pub fn tick(&mut self, wall: Timestamp) -> Timestamp {
        self.last = wall.max(self.last + 1);
        self.last
    }

    /// Produce the next timestamp from the system clock.
    pub fn now(&mut self) -> Timestamp {
        self.tick(wall_clock_millis())
    }
}

/// Milliseconds since the Unix epoch. Clocks set before 1970 read as 0.
pub fn wall_clock_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clock_starts_at_zero() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.last, 0);
    }

    #[test]
    fn tick_follows_wall_clock() {
        let mut clock = MonotonicClock::new();
        assert_eq!(clock.tick(1000), 1000);
        assert_eq!(clock.tick(2000), 2000);
    }

    #[test]
    fn tick_is_strictly_increasing_within_a_millisecond() {
        let mut clock = MonotonicClock::new();
        assert_eq!(clock.tick(1000), 1000);
        assert_eq!(clock.tick(1000), 1001);
        assert_eq!(clock.tick(1000), 1002);
    }

    #[test]
    fn tick_survives_wall_clock_going_backwards() {
        let mut clock = MonotonicClock::new();
        clock.tick(5000);
        assert_eq!(clock.tick(10), 5001);
    }

    #[test]
    fn seeded_clock_starts_after_seed() {
        let mut clock = MonotonicClock::starting_after(9000);
        assert_eq!(clock.tick(100), 9001);
    }

    #[test]
    fn now_is_after_epoch() {
        let mut clock = MonotonicClock::new();
        assert!(clock.now() > 1_600_000_000_000);
    }

    #[test]
    fn serialization_format() {
        let clock = MonotonicClock::starting_after(42);
        let json = serde_json::to_string(&clock).unwrap();
        assert_eq!(json, "{\"last\":42}");
    }
}

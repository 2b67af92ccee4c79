use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Hybrid instant combining wall-clock time with a logical counter.
///
/// The counter disambiguates events that fall into the same wall-clock
/// millisecond, so timestamps issued by one [`Clock`] are strictly
/// increasing even on fast or stalled system clocks. "Strictly newer"
/// comparisons during synchronization rely on this.
///
/// Ordering: `millis` → `counter` (total order).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Wall-clock milliseconds since UNIX epoch.
    pub millis: u64,
    /// Logical counter for events at the same physical time.
    pub counter: u32,
}

impl Timestamp {
    /// Create a timestamp with explicit values.
    pub fn new(millis: u64, counter: u32) -> Self {
        Self { millis, counter }
    }

    /// A timestamp for the current wall-clock time.
    pub fn now() -> Self {
        Self {
            millis: wall_millis(),
            counter: 0,
        }
    }

    /// The zero timestamp.
    pub const fn zero() -> Self {
        Self {
            millis: 0,
            counter: 0,
        }
    }

    /// Returns `true` if this instant is strictly after `other`.
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }

    /// Returns `true` if this instant is strictly before `other`.
    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.millis
            .cmp(&other.millis)
            .then(self.counter.cmp(&other.counter))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms.{})", self.millis, self.counter)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.millis, self.counter)
    }
}

fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Monotone source of [`Timestamp`]s.
///
/// Each `tick` is strictly after every timestamp the clock issued before:
/// when the wall clock has not advanced past the last issued instant, the
/// logical counter is bumped instead.
#[derive(Clone, Debug, Default)]
pub struct Clock {
    last: Timestamp,
}

impl Clock {
    /// A clock that has issued nothing yet.
    pub fn new() -> Self {
        Self {
            last: Timestamp::zero(),
        }
    }

    /// Issue the next timestamp.
    pub fn tick(&mut self) -> Timestamp {
        let wall = wall_millis();
        let next = if wall > self.last.millis {
            Timestamp::new(wall, 0)
        } else {
            Timestamp::new(self.last.millis, self.last.counter + 1)
        };
        self.last = next;
        next
    }

    /// The most recently issued timestamp.
    pub fn last(&self) -> Timestamp {
        self.last
    }
}

/// Who touched an object, and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub at: Timestamp,
    pub by: UserId,
}

impl AuditStamp {
    pub fn new(at: Timestamp, by: UserId) -> Self {
        Self { at, by }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn ordering_millis_first() {
        let a = Timestamp::new(100, 5);
        let b = Timestamp::new(200, 0);
        assert!(a < b);
    }

    #[test]
    fn ordering_counter_second() {
        let a = Timestamp::new(100, 1);
        let b = Timestamp::new(100, 2);
        assert!(a < b);
    }

    #[test]
    fn equal_timestamps() {
        let a = Timestamp::new(100, 1);
        let b = Timestamp::new(100, 1);
        assert_eq!(a, b);
        assert!(!a.is_after(&b));
        assert!(!a.is_before(&b));
    }

    #[test]
    fn now_produces_reasonable_timestamp() {
        let t = Timestamp::now();
        // Should be after 2020-01-01 (1577836800000 ms)
        assert!(t.millis > 1_577_836_800_000);
        assert_eq!(t.counter, 0);
    }

    #[test]
    fn zero_is_smallest() {
        assert!(Timestamp::zero() < Timestamp::new(1, 0));
        assert_eq!(Timestamp::zero(), Timestamp::default());
    }

    #[test]
    fn clock_is_strictly_monotone() {
        let mut clock = Clock::new();
        let mut prev = clock.tick();
        for _ in 0..1_000 {
            let next = clock.tick();
            assert!(next.is_after(&prev));
            prev = next;
        }
    }

    #[test]
    fn clock_remembers_last() {
        let mut clock = Clock::new();
        let t = clock.tick();
        assert_eq!(clock.last(), t);
    }

    #[test]
    fn serde_roundtrip() {
        let t = Timestamp::new(1234567890, 42);
        let json = serde_json::to_string(&t).unwrap();
        let parsed: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(t, parsed);
    }

    #[test]
    fn display_format() {
        let t = Timestamp::new(1000, 5);
        assert_eq!(format!("{t}"), "1000.5");
    }

    proptest! {
        #[test]
        fn ordering_matches_tuple_ordering(
            a_ms in 0u64..1_000_000,
            a_ctr in 0u32..1_000,
            b_ms in 0u64..1_000_000,
            b_ctr in 0u32..1_000,
        ) {
            let a = Timestamp::new(a_ms, a_ctr);
            let b = Timestamp::new(b_ms, b_ctr);
            prop_assert_eq!(a.cmp(&b), (a_ms, a_ctr).cmp(&(b_ms, b_ctr)));
        }
    }
}

use std::cell::Cell;

use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};

/// Source of local wall-clock time for rollover decisions and archive names.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock pinned to a chosen instant, used by tests and `run --at`.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Cell<NaiveDateTime>,
}

impl FixedClock {
    #[must_use]
    pub const fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Cell::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        self.now.set(now);
    }

    pub fn advance(&self, delta: TimeDelta) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }
}

/// Minutes until the next rollover minute, `0` when `now` is on it.
#[must_use]
pub fn minutes_until(now: NaiveDateTime, rollover_minute: u32) -> u32 {
    (rollover_minute % 60 + 60 - now.minute()) % 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .expect("valid timestamp")
    }

    #[test]
    fn fixed_clock_holds_and_advances() {
        let clock = FixedClock::new(at(13, 50));
        assert_eq!(clock.now(), at(13, 50));
        clock.advance(TimeDelta::minutes(10));
        assert_eq!(clock.now(), at(14, 0));
        clock.set(at(9, 5));
        assert_eq!(clock.now(), at(9, 5));
    }

    #[test]
    fn minutes_until_top_of_hour() {
        assert_eq!(minutes_until(at(14, 0), 0), 0);
        assert_eq!(minutes_until(at(14, 10), 0), 50);
        assert_eq!(minutes_until(at(14, 59), 0), 1);
    }

    #[test]
    fn minutes_until_custom_minute() {
        assert_eq!(minutes_until(at(14, 30), 30), 0);
        assert_eq!(minutes_until(at(14, 20), 30), 10);
        assert_eq!(minutes_until(at(14, 40), 30), 50);
    }
}

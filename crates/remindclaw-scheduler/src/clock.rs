//! Wall-clock source, swappable in tests.

use chrono::{NaiveDateTime, Timelike};
use std::time::Duration;

/// Local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The machine's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Time left until the next top of the hour.
pub fn until_next_hour(now: NaiveDateTime) -> Duration {
    let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
    let nanos = u64::from(now.nanosecond() % 1_000_000_000);
    Duration::from_secs(3600 - into_hour) - Duration::from_nanos(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_until_next_hour() {
        assert_eq!(until_next_hour(at(9, 0, 0)), Duration::from_secs(3600));
        assert_eq!(until_next_hour(at(9, 59, 30)), Duration::from_secs(30));
        assert_eq!(until_next_hour(at(23, 30, 0)), Duration::from_secs(1800));
    }
}

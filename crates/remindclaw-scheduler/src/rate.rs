//! Hourly send governor — at most `cap` successful sends per wall-clock hour.

use chrono::{NaiveDate, NaiveDateTime, Timelike};

#[derive(Debug, Clone)]
pub struct HourlyGovernor {
    cap: u32,
    window: Option<(NaiveDate, u32)>,
    count: u32,
}

impl HourlyGovernor {
    /// A cap of zero disables the limit.
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            window: None,
            count: 0,
        }
    }

    fn roll(&mut self, now: NaiveDateTime) {
        let window = (now.date(), now.hour());
        if self.window != Some(window) {
            self.window = Some(window);
            self.count = 0;
        }
    }

    /// Whether another send fits in the current hour.
    pub fn permits(&mut self, now: NaiveDateTime) -> bool {
        self.roll(now);
        self.cap == 0 || self.count < self.cap
    }

    /// Count one successful send.
    pub fn record(&mut self, now: NaiveDateTime) {
        self.roll(now);
        self.count += 1;
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

//! In-memory roster source for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::traits::RosterSource;
use remindclaw_core::types::RawEnrollee;

#[derive(Default)]
pub struct StaticRoster {
    records: Mutex<Vec<RawEnrollee>>,
    fail: AtomicBool,
    fetches: AtomicUsize,
}

impl StaticRoster {
    pub fn new(records: Vec<RawEnrollee>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn set_records(&self, records: Vec<RawEnrollee>) {
        if let Ok(mut guard) = self.records.lock() {
            *guard = records;
        }
    }

    /// Make subsequent fetches fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RosterSource for StaticRoster {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_enrollees(&self) -> Result<Vec<RawEnrollee>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemindClawError::Roster("roster provider unavailable".into()));
        }
        self.records
            .lock()
            .map(|r| r.clone())
            .map_err(|_| RemindClawError::Roster("lock poisoned".into()))
    }
}

/// A fully valid enrollee for `day_label`, handy for building scenarios.
pub fn enrollee(code: &str, phone: &str, day_label: &str) -> RawEnrollee {
    RawEnrollee {
        status: Some("Ativo".into()),
        phone: Some(phone.into()),
        full_name: Some(format!("Student {code}")),
        agent: Some("lucas.garcia@example.com".into()),
        monitoring_day: Some(day_label.into()),
        monitoring_link: Some(format!("https://meet.example.com/{code}")),
        registration_code: Some(code.into()),
    }
}

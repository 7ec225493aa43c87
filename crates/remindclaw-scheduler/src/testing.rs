//! In-memory ledger with failure injection, and a clock driven by tokio time.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::traits::Ledger;
use remindclaw_core::types::{DayStats, SentMarker};

use crate::clock::Clock;

#[derive(Default)]
pub struct MemoryLedger {
    sent: Mutex<HashSet<SentMarker>>,
    stats: Mutex<BTreeMap<String, DayStats>>,
    fail_checks: AtomicBool,
    fail_marks: AtomicBool,
    fail_stats_reads: AtomicBool,
    marks: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `is_sent` returns an error.
    pub fn fail_checks(&self, fail: bool) {
        self.fail_checks.store(fail, Ordering::SeqCst);
    }

    /// `mark_sent` returns an error.
    pub fn fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }

    /// `load_day_stats` returns an error.
    pub fn fail_stats_reads(&self, fail: bool) {
        self.fail_stats_reads.store(fail, Ordering::SeqCst);
    }

    /// Successful `mark_sent` inserts.
    pub fn mark_count(&self) -> usize {
        self.marks.load(Ordering::SeqCst)
    }

    pub fn contains(&self, marker: &SentMarker) -> bool {
        self.sent.lock().map(|s| s.contains(marker)).unwrap_or(false)
    }

    pub fn stats_for(&self, day: &str) -> DayStats {
        self.stats
            .lock()
            .ok()
            .and_then(|s| s.get(day).cloned())
            .unwrap_or_default()
    }

    pub fn seed_stats(&self, day: &str, stats: DayStats) {
        if let Ok(mut all) = self.stats.lock() {
            all.insert(day.to_string(), stats);
        }
    }

    pub fn seed_sent(&self, marker: SentMarker) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.insert(marker);
        }
    }
}

fn poisoned() -> RemindClawError {
    RemindClawError::Ledger("lock poisoned".into())
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn is_sent(&self, marker: &SentMarker) -> Result<bool> {
        if self.fail_checks.load(Ordering::SeqCst) {
            return Err(RemindClawError::Ledger("store unreachable".into()));
        }
        Ok(self.sent.lock().map_err(|_| poisoned())?.contains(marker))
    }

    async fn mark_sent(&self, marker: &SentMarker) -> Result<bool> {
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(RemindClawError::Ledger("disk full".into()));
        }
        let inserted = self.sent.lock().map_err(|_| poisoned())?.insert(marker.clone());
        if inserted {
            self.marks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(inserted)
    }

    async fn load_day_stats(&self, day: &str) -> Result<DayStats> {
        if self.fail_stats_reads.load(Ordering::SeqCst) {
            return Err(RemindClawError::Ledger("store unreachable".into()));
        }
        Ok(self.stats_for(day))
    }

    async fn record_send(&self, day: &str, agent: &str) -> Result<DayStats> {
        let mut all = self.stats.lock().map_err(|_| poisoned())?;
        let stats = all.entry(day.to_string()).or_default();
        stats.record(agent);
        Ok(stats.clone())
    }

    async fn all_stats(&self) -> Result<BTreeMap<String, DayStats>> {
        Ok(self.stats.lock().map_err(|_| poisoned())?.clone())
    }

    async fn reset(&self) -> Result<()> {
        self.sent.lock().map_err(|_| poisoned())?.clear();
        self.stats.lock().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

/// Wall clock that advances with tokio's (pausable) time.
pub struct TokioClock {
    origin: NaiveDateTime,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(origin: NaiveDateTime) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_default();
        self.origin + elapsed
    }
}

//! Ledger trait — "already sent" facts and per-day counters.
//!
//! Sent markers are insert-if-absent. Stats only move by increments applied
//! inside the store, so a concurrent `reset` is never overwritten.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{DayStats, SentMarker};

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn is_sent(&self, marker: &SentMarker) -> Result<bool>;

    /// Insert-if-absent. Returns `true` when a new row was written.
    async fn mark_sent(&self, marker: &SentMarker) -> Result<bool>;

    async fn load_day_stats(&self, day: &str) -> Result<DayStats>;

    /// Count one successful send for `agent` on `day` as a single atomic
    /// increment, and return the day's counters after it.
    async fn record_send(&self, day: &str, agent: &str) -> Result<DayStats>;

    async fn all_stats(&self) -> Result<BTreeMap<String, DayStats>>;

    /// Drop every sent marker and stats row.
    async fn reset(&self) -> Result<()>;
}

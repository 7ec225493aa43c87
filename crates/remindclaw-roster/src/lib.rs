//! # RemindClaw Roster
//!
//! Fetches enrollees, normalizes their contact data and buckets valid contacts
//! by scheduled weekday. Records that fail validation are kept in a bounded,
//! deduplicated invalid-contact log that operators can inspect and reset.

pub mod invalid;
pub mod normalize;
pub mod partition;
pub mod source;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::traits::RosterSource;
use remindclaw_core::types::InvalidContactRecord;

pub use invalid::InvalidContactLog;
pub use partition::{AllowedStatuses, InvalidReason, Partition, partition_enrollees};
pub use source::HttpRoster;

/// One search hit, as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolleeSummary {
    pub registration_code: String,
    pub full_name: String,
    pub status: Option<String>,
    pub phone: Option<String>,
    pub agent: Option<String>,
    pub monitoring_day: Option<String>,
}

/// Roster source plus the invalid-contact log that outlives single runs.
pub struct RosterPartitioner {
    source: Arc<dyn RosterSource>,
    allowed: AllowedStatuses,
    log: Mutex<InvalidContactLog>,
}

impl RosterPartitioner {
    pub fn new(source: Arc<dyn RosterSource>, allowed: AllowedStatuses) -> Self {
        Self {
            source,
            allowed,
            log: Mutex::new(InvalidContactLog::default()),
        }
    }

    /// Fetch and partition. Fetch failures propagate untouched.
    ///
    /// The returned `invalid` list holds only records not reported before;
    /// they are added to the log before returning.
    pub async fn load(&self) -> Result<Partition> {
        let records = self.source.fetch_enrollees().await?;
        let seen = self.seen_snapshot()?;
        let partition = partition_enrollees(&records, &self.allowed, &seen);

        let mut log = self.lock_log()?;
        for record in &partition.invalid {
            log.record(record.clone());
        }
        drop(log);

        tracing::info!(
            "📋 Roster partitioned: {} contacts in {} day(s), {} new invalid, {} skipped by status",
            partition.contact_count(),
            partition.buckets.len(),
            partition.invalid.len(),
            partition.skipped
        );
        Ok(partition)
    }

    /// Add a delivery failure note. Returns `false` for a duplicate.
    pub fn record_failure(&self, record: InvalidContactRecord) -> bool {
        self.lock_log().map(|mut log| log.record(record)).unwrap_or(false)
    }

    pub fn invalid_contacts(&self) -> Vec<InvalidContactRecord> {
        self.lock_log().map(|log| log.list()).unwrap_or_default()
    }

    pub fn reset_invalid(&self) {
        if let Ok(mut log) = self.lock_log() {
            log.reset();
        }
    }

    /// Case-insensitive name search over the live roster, one hit per
    /// registration code.
    pub async fn search(&self, query: &str) -> Result<Vec<EnrolleeSummary>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.source.fetch_enrollees().await?;
        let mut codes = HashSet::new();
        let hits = records
            .into_iter()
            .filter_map(|raw| {
                let name = raw.full_name.clone()?;
                if !name.to_lowercase().contains(&needle) {
                    return None;
                }
                let code = raw
                    .registration_code
                    .clone()
                    .unwrap_or_else(|| partition::UNKNOWN_CODE.to_string());
                if !codes.insert(code.clone()) {
                    return None;
                }
                Some(EnrolleeSummary {
                    registration_code: code,
                    full_name: name,
                    status: raw.status,
                    phone: raw.phone,
                    agent: raw.agent,
                    monitoring_day: raw.monitoring_day,
                })
            })
            .collect();
        Ok(hits)
    }

    fn seen_snapshot(&self) -> Result<HashSet<InvalidContactRecord>> {
        Ok(self.lock_log()?.seen().clone())
    }

    fn lock_log(&self) -> Result<std::sync::MutexGuard<'_, InvalidContactLog>> {
        self.log
            .lock()
            .map_err(|_| RemindClawError::Other("invalid-contact log poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticRoster, enrollee};

    #[tokio::test]
    async fn test_invalid_records_reported_once_until_reset() {
        let mut broken = enrollee("R-2", "123", "Segunda-feira às 10:00");
        broken.full_name = Some("Ana Lima".into());
        let source = Arc::new(StaticRoster::new(vec![
            enrollee("R-1", "11987654321", "Segunda-feira às 09:00"),
            broken,
        ]));
        let partitioner = RosterPartitioner::new(source, AllowedStatuses::default());

        let first = partitioner.load().await.unwrap();
        assert_eq!(first.bucket("monday").len(), 1);
        assert_eq!(first.invalid.len(), 1);

        let second = partitioner.load().await.unwrap();
        assert!(second.invalid.is_empty());
        assert_eq!(partitioner.invalid_contacts().len(), 1);

        partitioner.reset_invalid();
        assert!(partitioner.invalid_contacts().is_empty());
        assert_eq!(partitioner.load().await.unwrap().invalid.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let source = Arc::new(StaticRoster::new(Vec::new()));
        source.set_failing(true);
        let partitioner = RosterPartitioner::new(source, AllowedStatuses::default());
        assert!(matches!(partitioner.load().await, Err(RemindClawError::Roster(_))));
    }

    #[tokio::test]
    async fn test_search_dedups_by_code() {
        let mut dup = enrollee("R-1", "11987654321", "Terça às 09:00");
        dup.full_name = Some("Maria Silva".into());
        let mut first = enrollee("R-1", "11987654321", "Segunda às 09:00");
        first.full_name = Some("Maria Silva".into());
        let mut other = enrollee("R-3", "11987654321", "Segunda às 09:00");
        other.full_name = Some("Joao Souza".into());
        let source = Arc::new(StaticRoster::new(vec![first, dup, other]));
        let partitioner = RosterPartitioner::new(source, AllowedStatuses::default());

        let hits = partitioner.search("maria").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].monitoring_day.as_deref(), Some("Segunda às 09:00"));
        assert!(partitioner.search("  ").await.unwrap().is_empty());
    }

    #[test]
    fn test_record_failure_dedups() {
        let partitioner = RosterPartitioner::new(
            Arc::new(StaticRoster::default()),
            AllowedStatuses::default(),
        );
        let record = InvalidContactRecord {
            agent: "Lucas Garcia".into(),
            student: "Maria".into(),
            registration_code: "R-1".into(),
            reason: "send failed: timeout".into(),
        };
        assert!(partitioner.record_failure(record.clone()));
        assert!(!partitioner.record_failure(record));
    }
}

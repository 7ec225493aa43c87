//! Dispatch Scheduler — one cancellable, rate-governed, idempotent send cycle.
//!
//! ```text
//! roster → today's bucket → sort by time of day
//!   for each contact:
//!     stop? ─► final snapshot, Stopped
//!     ledger says sent? ─► skip
//!     hourly cap reached? ─► wait for next hour (cancellable)
//!     send (timeout) ─► ok: count, increment stats, mark sent, progress events
//!                    └► err: failure event, failure note, continue
//!     random delay (cancellable)
//! ```
//!
//! The hourly count lives on the [`Dispatcher`], so a reconnect within the
//! same wall-clock hour keeps the sends already made.
//!
//! A ledger read failure on the "already sent" check is treated as not sent
//! and broadcast as a warning; a resend is possible while the store is down.
//! A failed sent-marker write aborts the cycle. A failed stats increment is
//! retried once when the cycle ends.

use async_trait::async_trait;
use chrono::Datelike;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use remindclaw_channels::{CycleHandler, CycleOutcome, whatsapp_jid};
use remindclaw_core::config::DispatchConfig;
use remindclaw_core::error::RemindClawError;
use remindclaw_core::events::{Event, EventBroadcaster};
use remindclaw_core::traits::{GatewayConnection, Ledger};
use remindclaw_core::types::{Contact, DayStats, InvalidContactRecord, SentMarker};
use remindclaw_roster::RosterPartitioner;
use remindclaw_roster::normalize::{slot_for, time_of_day};

use crate::clock::{Clock, until_next_hour};
use crate::rate::HourlyGovernor;
use crate::template;

/// Dispatch failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("send timed out after {0:?}")]
    GatewayTimeout(Duration),
    #[error("send failed: {0}")]
    GatewaySendError(String),
    #[error("ledger read failed: {0}")]
    LedgerReadError(String),
    #[error("ledger write failed: {0}")]
    LedgerWriteError(String),
    #[error("roster fetch failed: {0}")]
    RosterFetchError(String),
    #[error("dispatch stopped")]
    Stopped,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub day: String,
    pub scheduled: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Day total after the cycle, including earlier cycles.
    pub total_sent: u64,
}

/// Dispatch limits, resolved from [`DispatchConfig`].
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub hourly_cap: u32,
    pub send_timeout: Duration,
    pub ledger_timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub template: String,
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        let min = config.min_delay_ms.min(config.max_delay_ms);
        Self {
            hourly_cap: config.hourly_cap,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            ledger_timeout: Duration::from_secs(config.ledger_timeout_secs),
            min_delay: Duration::from_millis(min),
            max_delay: Duration::from_millis(config.max_delay_ms),
            template: config.message_template.clone(),
        }
    }
}

pub struct Dispatcher {
    roster: Arc<RosterPartitioner>,
    ledger: Arc<dyn Ledger>,
    events: EventBroadcaster,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
    governor: Mutex<HourlyGovernor>,
    cycle_lock: tokio::sync::Mutex<()>,
}

enum LedgerCall<T> {
    Done(T),
    Failed(String),
}

impl Dispatcher {
    pub fn new(
        roster: Arc<RosterPartitioner>,
        ledger: Arc<dyn Ledger>,
        events: EventBroadcaster,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            roster,
            ledger,
            events,
            clock,
            governor: Mutex::new(HourlyGovernor::new(settings.hourly_cap)),
            settings,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.events.log(message);
    }

    fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.events.log(message);
    }

    fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.events.log(message);
    }

    /// Bound a ledger call by the configured timeout.
    async fn ledger_call<T>(
        &self,
        call: impl Future<Output = remindclaw_core::Result<T>>,
    ) -> LedgerCall<T> {
        match tokio::time::timeout(self.settings.ledger_timeout, call).await {
            Ok(Ok(value)) => LedgerCall::Done(value),
            Ok(Err(e)) => LedgerCall::Failed(e.to_string()),
            Err(_) => LedgerCall::Failed(format!(
                "timed out after {:?}",
                self.settings.ledger_timeout
            )),
        }
    }

    fn next_delay(&self) -> Duration {
        let (min, max) = (self.settings.min_delay, self.settings.max_delay);
        if max <= min {
            return min;
        }
        let ms = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    fn under_hourly_cap(&self) -> bool {
        let now = self.clock.now();
        self.governor.lock().map(|mut g| g.permits(now)).unwrap_or(true)
    }

    fn count_hourly_send(&self) {
        let now = self.clock.now();
        if let Ok(mut governor) = self.governor.lock() {
            governor.record(now);
        }
    }

    fn publish_stats(&self, day: &str, stats: &DayStats) {
        self.events.publish(Event::agent_stats(day, &stats.agents));
    }

    /// Retry unsaved increments, then broadcast the stored day counters.
    /// Falls back to `local` when the store cannot be read.
    async fn final_snapshot(&self, day: &str, local: DayStats, unsaved: &[String]) -> DayStats {
        for agent in unsaved {
            if let LedgerCall::Failed(e) = self.ledger_call(self.ledger.record_send(day, agent)).await {
                self.warn(format!("⚠️ Could not save stats for {day}: {e}"));
            }
        }
        let stats = match self.ledger_call(self.ledger.load_day_stats(day)).await {
            LedgerCall::Done(stored) => stored,
            LedgerCall::Failed(e) => {
                self.warn(format!("⚠️ Could not reload stats for {day}: {e}"));
                local
            }
        };
        self.info(format!("📊 Day stats - {day}: total sent: {}", stats.total_sent));
        self.publish_stats(day, &stats);
        stats
    }

    /// Send `contact`'s reminder with the configured timeout.
    async fn send_one(
        &self,
        connection: &dyn GatewayConnection,
        contact: &Contact,
    ) -> Result<(), DispatchError> {
        let address = whatsapp_jid(&contact.phone_canonical);
        let text = template::render(&self.settings.template, contact);
        match tokio::time::timeout(self.settings.send_timeout, connection.send_text(&address, &text)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DispatchError::GatewaySendError(e.to_string())),
            Err(_) => Err(DispatchError::GatewayTimeout(self.settings.send_timeout)),
        }
    }

    /// Run one cycle for today's weekday.
    pub async fn run(
        &self,
        connection: &dyn GatewayConnection,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, DispatchError> {
        let _cycle = self.cycle_lock.lock().await;
        if cancel.is_cancelled() {
            self.info("⏹️ Dispatch stopped");
            return Err(DispatchError::Stopped);
        }

        self.info("📋 Loading contacts...");
        let mut partition = match self.roster.load().await {
            Ok(partition) => partition,
            Err(e) => {
                let e = match e {
                    RemindClawError::Roster(msg) => msg,
                    other => other.to_string(),
                };
                self.error(format!("❌ Could not load roster: {e}"));
                return Err(DispatchError::RosterFetchError(e));
            }
        };
        for invalid in &partition.invalid {
            self.warn(format!(
                "⚠️ Invalid contact: {} ({}) - agent {}: {}",
                invalid.student, invalid.registration_code, invalid.agent, invalid.reason
            ));
        }

        let day = slot_for(self.clock.now().weekday()).to_string();
        let mut stats = match self.ledger_call(self.ledger.load_day_stats(&day)).await {
            LedgerCall::Done(stats) => stats,
            LedgerCall::Failed(e) => {
                self.error(format!("❌ Could not load stats for {day}: {e}"));
                return Err(DispatchError::LedgerReadError(e));
            }
        };

        let mut contacts = partition.buckets.remove(&day).unwrap_or_default();
        let mut report = CycleReport {
            day: day.clone(),
            scheduled: contacts.len(),
            total_sent: stats.total_sent,
            ..Default::default()
        };
        if contacts.is_empty() {
            self.info(format!("📭 No contacts scheduled for {day}"));
            self.info(format!("📊 Day stats - {day}: total sent: {}", stats.total_sent));
            self.publish_stats(&day, &stats);
            return Ok(report);
        }

        contacts.sort_by_key(|c| time_of_day(&c.scheduled_day_label).unwrap_or(u32::MAX));
        self.info(format!("📅 {} contacts scheduled for {day}", contacts.len()));

        let mut unsaved: Vec<String> = Vec::new();
        let mut stopped = false;
        let last = contacts.len() - 1;

        for (index, contact) in contacts.iter().enumerate() {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }

            let marker = SentMarker::for_contact(contact);
            match self.ledger_call(self.ledger.is_sent(&marker)).await {
                LedgerCall::Done(true) => {
                    self.info(format!(
                        "⏭️ Already sent to {} ({}) for {}",
                        contact.first_name, contact.phone_display, contact.scheduled_day_label
                    ));
                    report.skipped += 1;
                    continue;
                }
                LedgerCall::Done(false) => {}
                LedgerCall::Failed(e) => {
                    self.warn(format!(
                        "⚠️ Ledger check failed for {} ({}), assuming not sent: {e}",
                        contact.first_name, contact.registration_code
                    ));
                }
            }

            if !self.under_hourly_cap() {
                let wait = until_next_hour(self.clock.now());
                self.info(format!(
                    "⏳ Hourly limit of {} messages reached, waiting {} min",
                    self.settings.hourly_cap,
                    wait.as_secs().div_ceil(60)
                ));
                tokio::select! {
                    _ = cancel.cancelled() => {
                        stopped = true;
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            match self.send_one(connection, contact).await {
                Ok(()) => {
                    self.count_hourly_send();
                    report.sent += 1;
                    self.info(format!(
                        "✅ Message sent to {} ({}) - agent {}",
                        contact.first_name, contact.phone_display, contact.agent_name
                    ));

                    match self
                        .ledger_call(self.ledger.record_send(&day, &contact.agent_name))
                        .await
                    {
                        LedgerCall::Done(latest) => stats = latest,
                        LedgerCall::Failed(e) => {
                            self.warn(format!("⚠️ Could not save stats for {day}: {e}"));
                            stats.record(&contact.agent_name);
                            unsaved.push(contact.agent_name.clone());
                        }
                    }

                    match self.ledger_call(self.ledger.mark_sent(&marker)).await {
                        LedgerCall::Done(inserted) => {
                            if !inserted {
                                tracing::debug!("Sent marker for {} already present", contact.registration_code);
                            }
                        }
                        LedgerCall::Failed(e) => {
                            self.error(format!(
                                "❌ Could not record send to {} ({}): {e}",
                                contact.first_name, contact.registration_code
                            ));
                            self.final_snapshot(&day, stats, &unsaved).await;
                            return Err(DispatchError::LedgerWriteError(e));
                        }
                    }

                    self.info(format!("📊 Send stats - total sent: {}", report.sent));
                    self.info(format!("📊 Day stats - {day}: total sent: {}", stats.total_sent));
                    self.publish_stats(&day, &stats);
                }
                Err(e) => {
                    report.failed += 1;
                    self.error(format!(
                        "❌ Failed to send to {} ({}): {e}",
                        contact.first_name, contact.phone_display
                    ));
                    self.roster.record_failure(InvalidContactRecord {
                        agent: contact.agent_name.clone(),
                        student: contact.first_name.clone(),
                        registration_code: contact.registration_code.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            if index < last {
                let delay = self.next_delay();
                tracing::debug!("⏱️ Waiting {:?} before next message", delay);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        stopped = true;
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        report.total_sent = self.final_snapshot(&day, stats, &unsaved).await.total_sent;

        if stopped {
            self.info("⏹️ Dispatch stopped");
            return Err(DispatchError::Stopped);
        }
        self.info(format!(
            "🏁 All messages for {day} processed: {} sent, {} skipped, {} failed",
            report.sent, report.skipped, report.failed
        ));
        Ok(report)
    }
}

#[async_trait]
impl CycleHandler for Dispatcher {
    async fn run_cycle(
        &self,
        connection: Arc<dyn GatewayConnection>,
        cancel: CancellationToken,
    ) -> CycleOutcome {
        match self.run(connection.as_ref(), &cancel).await {
            Ok(_) => CycleOutcome::Completed,
            Err(DispatchError::Stopped) => CycleOutcome::Stopped,
            Err(e) => CycleOutcome::Aborted(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryLedger, TokioClock};
    use chrono::{NaiveDate, NaiveDateTime, Timelike};
    use remindclaw_channels::testing::MockGateway;
    use remindclaw_core::types::RawEnrollee;
    use remindclaw_roster::AllowedStatuses;
    use remindclaw_roster::testing::{StaticRoster, enrollee};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// 2024-01-01 is a Monday.
    fn monday_at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            hourly_cap: 100,
            send_timeout: Duration::from_secs(10),
            ledger_timeout: Duration::from_secs(5),
            min_delay: Duration::from_secs(20),
            max_delay: Duration::from_secs(40),
            template: DispatchConfig::default().message_template,
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        roster: Arc<StaticRoster>,
        partitioner: Arc<RosterPartitioner>,
        ledger: Arc<MemoryLedger>,
        gateway: MockGateway,
        events: EventBroadcaster,
        clock: Arc<TokioClock>,
    }

    fn fixture(records: Vec<RawEnrollee>, settings: DispatchSettings) -> Fixture {
        let roster = Arc::new(StaticRoster::new(records));
        let partitioner = Arc::new(RosterPartitioner::new(roster.clone(), AllowedStatuses::default()));
        let ledger = Arc::new(MemoryLedger::new());
        let events = EventBroadcaster::new();
        let clock = Arc::new(TokioClock::new(monday_at(8, 0)));
        let dispatcher = Dispatcher::new(
            partitioner.clone(),
            ledger.clone(),
            events.clone(),
            clock.clone(),
            settings,
        );
        Fixture {
            dispatcher,
            roster,
            partitioner,
            ledger,
            gateway: MockGateway::new(),
            events,
            clock,
        }
    }

    impl Fixture {
        async fn run(&self) -> Result<CycleReport, DispatchError> {
            let connection = self.gateway.connection();
            self.dispatcher
                .run(connection.as_ref(), &CancellationToken::new())
                .await
        }

        fn logged(&self, needle: &str) -> bool {
            self.events.history().iter().any(|e| match e {
                Event::Log { message } => message.contains(needle),
                _ => false,
            })
        }
    }

    fn marker(code: &str, label: &str) -> SentMarker {
        SentMarker {
            registration_code: code.into(),
            scheduled_day_label: label.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monday_scenario_sends_once() {
        let mut record = enrollee("R-1", "(11) 98765-4321", "Monday at 09:00");
        record.full_name = Some("Maria Silva".into());
        let f = fixture(vec![record], settings());

        let report = f.run().await.unwrap();
        assert_eq!(report.day, "monday");
        assert_eq!(report.sent, 1);
        assert_eq!(report.total_sent, 1);

        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "551187654321@s.whatsapp.net");
        assert!(sent[0].1.starts_with("Hi Maria!"));
        assert!(sent[0].1.contains("https://meet.example.com/R-1"));

        assert_eq!(f.ledger.mark_count(), 1);
        assert!(f.ledger.contains(&marker("R-1", "Monday at 09:00")));
        let stats = f.ledger.stats_for("monday");
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.agents["Lucas Garcia"], 1);

        let agent_events: Vec<_> = f
            .events
            .history()
            .into_iter()
            .filter(|e| matches!(e, Event::AgentStats { .. }))
            .collect();
        assert!(!agent_events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_same_day_is_idempotent() {
        let f = fixture(
            vec![
                enrollee("R-1", "11987654321", "Monday at 09:00"),
                enrollee("R-2", "11912345678", "Segunda-feira às 10:00"),
            ],
            settings(),
        );
        let first = f.run().await.unwrap();
        assert_eq!(first.sent, 2);

        let second = f.run().await.unwrap();
        assert_eq!(second.sent, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.total_sent, 2);
        assert_eq!(f.gateway.sent().len(), 2);
        assert_eq!(f.ledger.stats_for("monday").total_sent, 2);
        assert!(f.logged("Already sent"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disallowed_status_never_dispatched() {
        let mut graduated = enrollee("R-9", "11987654321", "Monday at 09:00");
        graduated.status = Some("Graduated".into());
        let f = fixture(vec![graduated], settings());

        let report = f.run().await.unwrap();
        assert_eq!(report.scheduled, 0);
        assert!(f.gateway.sent().is_empty());
        assert!(f.partitioner.invalid_contacts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_does_not_abort_cycle() {
        let f = fixture(
            vec![
                enrollee("R-1", "11987654321", "Monday at 09:00"),
                enrollee("R-2", "11912345678", "Monday at 10:00"),
            ],
            settings(),
        );
        f.gateway.fail_for("551187654321@s.whatsapp.net");

        let report = f.run().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);
        assert!(!f.ledger.contains(&marker("R-1", "Monday at 09:00")));
        assert!(f.ledger.contains(&marker("R-2", "Monday at 10:00")));
        assert!(f.logged("Failed to send"));

        let failures = f.partitioner.invalid_contacts();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].registration_code, "R-1");
        assert!(failures[0].reason.starts_with("send failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_is_a_failure() {
        let f = fixture(
            vec![
                enrollee("R-1", "11987654321", "Monday at 09:00"),
                enrollee("R-2", "11912345678", "Monday at 10:00"),
            ],
            settings(),
        );
        f.gateway.hang_for("551187654321@s.whatsapp.net");

        let report = f.run().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(f.ledger.mark_count(), 1);
        assert!(f.logged("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_cap_is_never_exceeded() {
        let records = (0..5)
            .map(|i| enrollee(&format!("R-{i}"), &format!("119876543{i:02}"), "Monday at 09:00"))
            .collect();
        let mut s = settings();
        s.hourly_cap = 2;
        s.min_delay = Duration::from_secs(1);
        s.max_delay = Duration::from_secs(1);
        let f = fixture(records, s);

        let stamps = Arc::new(Mutex::new(Vec::new()));
        let (clock, recorded) = (f.clock.clone(), stamps.clone());
        f.gateway.on_send(move |_| recorded.lock().unwrap().push(clock.now()));

        let report = f.run().await.unwrap();
        assert_eq!(report.sent, 5);

        let mut per_hour: BTreeMap<u32, usize> = BTreeMap::new();
        for stamp in stamps.lock().unwrap().iter() {
            *per_hour.entry(stamp.hour()).or_default() += 1;
        }
        assert!(per_hour.values().all(|n| *n <= 2), "{per_hour:?}");
        assert_eq!(per_hour.len(), 3);
        assert!(f.logged("Hourly limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_cycle_prevents_further_marks() {
        let records = (0..5)
            .map(|i| enrollee(&format!("R-{i}"), &format!("119876543{i:02}"), "Monday at 09:00"))
            .collect();
        let f = fixture(records, settings());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        f.gateway.on_send(move |n| {
            if n == 2 {
                trigger.cancel();
            }
        });

        let connection = f.gateway.connection();
        let started = tokio::time::Instant::now();
        let result = f.dispatcher.run(connection.as_ref(), &cancel).await;

        assert_eq!(result, Err(DispatchError::Stopped));
        assert_eq!(f.gateway.sent().len(), 2);
        assert_eq!(f.ledger.mark_count(), 2);
        // One delay between the two sends; the second delay is cut short.
        assert!(started.elapsed() <= settings().max_delay);
        assert!(f.logged("Dispatch stopped"));
        assert_eq!(f.ledger.stats_for("monday").total_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_hourly_wait() {
        let records = (0..2)
            .map(|i| enrollee(&format!("R-{i}"), &format!("119876543{i:02}"), "Monday at 09:00"))
            .collect();
        let mut s = settings();
        s.hourly_cap = 1;
        s.min_delay = Duration::from_secs(1);
        s.max_delay = Duration::from_secs(1);
        let f = fixture(records, s);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5 * 60)).await;
            trigger.cancel();
        });

        let connection = f.gateway.connection();
        let started = tokio::time::Instant::now();
        let result = f.dispatcher.run(connection.as_ref(), &cancel).await;

        assert_eq!(result, Err(DispatchError::Stopped));
        assert!(f.logged("Hourly limit"));
        assert_eq!(f.gateway.sent().len(), 1);
        assert_eq!(f.ledger.mark_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(10 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_cap_carries_across_cycles() {
        let records = (0..4)
            .map(|i| enrollee(&format!("R-{i}"), &format!("119876543{i:02}"), "Monday at 09:00"))
            .collect();
        let mut s = settings();
        s.hourly_cap = 2;
        s.min_delay = Duration::from_secs(1);
        s.max_delay = Duration::from_secs(1);
        let f = fixture(records, s);

        // First cycle drops after its second send, as on a reconnect.
        let first = CancellationToken::new();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let (clock, recorded, trigger) = (f.clock.clone(), stamps.clone(), first.clone());
        f.gateway.on_send(move |n| {
            recorded.lock().unwrap().push(clock.now());
            if n == 2 {
                trigger.cancel();
            }
        });

        let connection = f.gateway.connection();
        assert_eq!(
            f.dispatcher.run(connection.as_ref(), &first).await,
            Err(DispatchError::Stopped)
        );
        let report = f
            .dispatcher
            .run(connection.as_ref(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.sent, 2);

        let mut per_hour: BTreeMap<u32, usize> = BTreeMap::new();
        for stamp in stamps.lock().unwrap().iter() {
            *per_hour.entry(stamp.hour()).or_default() += 1;
        }
        assert_eq!(per_hour.get(&8), Some(&2), "{per_hour:?}");
        assert_eq!(per_hour.get(&9), Some(&2), "{per_hour:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_reset_mid_cycle_is_kept() {
        let records = (0..3)
            .map(|i| enrollee(&format!("R-{i}"), &format!("119876543{i:02}"), "Monday at 09:00"))
            .collect();
        let mut s = settings();
        s.min_delay = Duration::from_secs(30);
        s.max_delay = Duration::from_secs(30);
        let f = fixture(records, s);

        // Sends land at 0s, 30s and 60s; the operator resets in between.
        let ledger = f.ledger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            ledger.reset().await.unwrap();
        });

        let report = f.run().await.unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.total_sent, 1);
        assert_eq!(f.ledger.stats_for("monday").total_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_sends_nothing() {
        let f = fixture(vec![enrollee("R-1", "11987654321", "Monday at 09:00")], settings());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let connection = f.gateway.connection();
        assert_eq!(
            f.dispatcher.run(connection.as_ref(), &cancel).await,
            Err(DispatchError::Stopped)
        );
        assert!(f.gateway.sent().is_empty());
        assert_eq!(f.roster.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_check_failure_fails_open() {
        let f = fixture(vec![enrollee("R-1", "11987654321", "Monday at 09:00")], settings());
        f.ledger.seed_sent(marker("R-1", "Monday at 09:00"));
        f.ledger.fail_checks(true);

        let report = f.run().await.unwrap();
        assert_eq!(report.sent, 1);
        assert!(f.logged("assuming not sent"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_write_failure_aborts_cycle() {
        let f = fixture(
            vec![
                enrollee("R-1", "11987654321", "Monday at 09:00"),
                enrollee("R-2", "11912345678", "Monday at 10:00"),
            ],
            settings(),
        );
        f.ledger.fail_marks(true);

        let result = f.run().await;
        assert!(matches!(result, Err(DispatchError::LedgerWriteError(_))));
        assert_eq!(f.gateway.sent().len(), 1);
        assert!(f.logged("Could not record send"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_read_failure_aborts_before_sending() {
        let f = fixture(vec![enrollee("R-1", "11987654321", "Monday at 09:00")], settings());
        f.ledger.fail_stats_reads(true);
        assert!(matches!(f.run().await, Err(DispatchError::LedgerReadError(_))));
        assert!(f.gateway.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_failure_aborts_cycle() {
        let f = fixture(Vec::new(), settings());
        f.roster.set_failing(true);
        assert!(matches!(f.run().await, Err(DispatchError::RosterFetchError(_))));
        assert!(f.logged("Could not load roster"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contacts_sent_in_session_order() {
        let f = fixture(
            vec![
                enrollee("late", "11900000001", "Segunda-feira às 14:00"),
                enrollee("none", "11900000002", "Segunda-feira"),
                enrollee("early", "11900000003", "Monday at 08:30"),
            ],
            settings(),
        );
        f.run().await.unwrap();
        let order: Vec<_> = f.gateway.sent().into_iter().map(|(to, _)| to).collect();
        assert_eq!(
            order,
            vec![
                "551100000003@s.whatsapp.net",
                "551100000001@s.whatsapp.net",
                "551100000002@s.whatsapp.net",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_days_untouched_and_totals_seeded() {
        let f = fixture(
            vec![
                enrollee("R-1", "11987654321", "Monday at 09:00"),
                enrollee("R-2", "11912345678", "Tuesday at 09:00"),
            ],
            settings(),
        );
        let mut previous = DayStats::default();
        previous.record("Ana Souza");
        f.ledger.seed_stats("monday", previous);

        let report = f.run().await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.total_sent, 2);
        let stats = f.ledger.stats_for("monday");
        assert_eq!(stats.agents["Ana Souza"], 1);
        assert_eq!(stats.agents["Lucas Garcia"], 1);
        assert_eq!(f.ledger.stats_for("tuesday"), DayStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_day_reports_previous_stats() {
        let f = fixture(vec![enrollee("R-2", "11912345678", "Tuesday at 09:00")], settings());
        let mut previous = DayStats::default();
        previous.record("Ana Souza");
        f.ledger.seed_stats("monday", previous);

        let report = f.run().await.unwrap();
        assert_eq!(report.scheduled, 0);
        assert_eq!(report.total_sent, 1);
        assert!(f.logged("No contacts scheduled for monday"));
        assert!(f.events.history().iter().any(|e| matches!(
            e,
            Event::AgentStats { data } if data.day == "monday" && data.agents["Ana Souza"] == 1
        )));
    }
}

//! Control facade — the operations the HTTP surface and the CLI drive.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use remindclaw_channels::{
    ReconnectPolicy, SessionManager, StartOutcome, StopOutcome, WsBridgeGateway,
};
use remindclaw_core::config::{RemindClawConfig, expand_path};
use remindclaw_core::error::Result;
use remindclaw_core::events::EventBroadcaster;
use remindclaw_core::traits::Ledger;
use remindclaw_core::types::{ConnectionState, InvalidContactRecord};
use remindclaw_roster::{AllowedStatuses, EnrolleeSummary, HttpRoster, RosterPartitioner};

use crate::clock::SystemClock;
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::ledger::SqliteLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub state: ConnectionState,
}

/// Totals across all weekdays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_sent: u64,
    pub per_day: BTreeMap<String, u64>,
    pub per_agent: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct BotControl {
    session: SessionManager,
    ledger: Arc<dyn Ledger>,
    roster: Arc<RosterPartitioner>,
    events: EventBroadcaster,
}

impl BotControl {
    pub fn new(
        session: SessionManager,
        ledger: Arc<dyn Ledger>,
        roster: Arc<RosterPartitioner>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            session,
            ledger,
            roster,
            events,
        }
    }

    /// Wire the production stack: SQLite ledger, HTTP roster, WhatsApp bridge.
    pub fn from_config(config: &RemindClawConfig) -> Result<Self> {
        let events = EventBroadcaster::new();
        let ledger = Arc::new(SqliteLedger::open(&expand_path(&config.ledger.path))?);
        let source = Arc::new(HttpRoster::new(&config.roster)?);
        let roster = Arc::new(RosterPartitioner::new(
            source,
            AllowedStatuses::from_names(&config.roster.allowed_statuses),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            roster.clone(),
            ledger.clone(),
            events.clone(),
            Arc::new(SystemClock),
            DispatchSettings::from(&config.dispatch),
        ));
        let session = SessionManager::new(
            Arc::new(WsBridgeGateway::new(&config.whatsapp)),
            ledger.clone(),
            dispatcher,
            events.clone(),
            ReconnectPolicy::from(&config.reconnect),
        );
        tracing::info!(
            "🔧 Bot wired: ledger {}, roster {}, gateway {}",
            config.ledger.path,
            config.roster.base_url,
            session.gateway_name()
        );
        Ok(Self::new(session, ledger, roster, events))
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub async fn start_cycle(&self) -> StartOutcome {
        self.session.start().await
    }

    /// Returns once the connection is torn down.
    pub async fn stop_cycle(&self) -> StopOutcome {
        self.session.stop().await
    }

    pub fn status(&self) -> BotStatus {
        BotStatus {
            running: self.session.is_running(),
            state: self.session.state(),
        }
    }

    /// Fails while a lifecycle is running.
    pub async fn reset_credentials(&self) -> Result<()> {
        self.session.clear_credentials().await
    }

    /// Stop (if needed), then forget the stored session.
    pub async fn clear_session(&self) -> Result<()> {
        if self.session.stop().await == StopOutcome::Stopped {
            tracing::info!("🛑 Bot stopped before clearing session");
        }
        self.session.clear_credentials().await
    }

    pub async fn reset_stats(&self) -> Result<()> {
        self.ledger.reset().await?;
        self.events.log("🧹 Stats and send history cleared");
        Ok(())
    }

    pub fn invalid_contacts(&self) -> Vec<InvalidContactRecord> {
        self.roster.invalid_contacts()
    }

    pub fn reset_invalid_contacts(&self) {
        self.roster.reset_invalid();
        tracing::info!("🧹 Invalid contact log cleared");
    }

    pub async fn stats(&self) -> Result<StatsSummary> {
        let mut summary = StatsSummary::default();
        for (day, stats) in self.ledger.all_stats().await? {
            summary.total_sent += stats.total_sent;
            for (agent, count) in &stats.agents {
                *summary.per_agent.entry(agent.clone()).or_insert(0) += count;
            }
            summary.per_day.insert(day, stats.total_sent);
        }
        Ok(summary)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<EnrolleeSummary>> {
        self.roster.search(query).await
    }
}

//! Shared domain types: roster records, contacts, ledger rows, session state.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One enrollee record as the roster provider returns it.
///
/// Every field is optional and loosely typed; numbers are accepted where
/// strings are expected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEnrollee {
    #[serde(default, deserialize_with = "loose_string")]
    pub status: Option<String>,
    #[serde(default, rename = "cel", alias = "phone", deserialize_with = "loose_string")]
    pub phone: Option<String>,
    #[serde(default, rename = "nomeCompleto", alias = "fullName", deserialize_with = "loose_string")]
    pub full_name: Option<String>,
    #[serde(default, rename = "agenteDoSucesso", alias = "agent", deserialize_with = "loose_string")]
    pub agent: Option<String>,
    #[serde(default, rename = "monitoringDay", deserialize_with = "loose_string")]
    pub monitoring_day: Option<String>,
    #[serde(default, rename = "monitoringLink", deserialize_with = "loose_string")]
    pub monitoring_link: Option<String>,
    #[serde(default, rename = "registrationCode", deserialize_with = "loose_string")]
    pub registration_code: Option<String>,
}

fn loose_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// A validated send target for one scheduled weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Digits only: country + area + 8-digit subscriber.
    pub phone_canonical: String,
    /// `+55 DD XXXX-XXXX`, for logs.
    pub phone_display: String,
    pub first_name: String,
    pub agent_name: String,
    pub agent_email_raw: String,
    /// Canonical weekday key, e.g. `monday`.
    pub scheduled_day_slot: String,
    /// The original "day at time" text.
    pub scheduled_day_label: String,
    pub monitoring_link: String,
    pub registration_code: String,
}

/// An enrollee that failed validation or delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidContactRecord {
    pub agent: String,
    pub student: String,
    pub registration_code: String,
    /// Comma-joined failure reasons.
    pub reason: String,
}

/// Ledger key: "already sent for this exact schedule occurrence".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentMarker {
    pub registration_code: String,
    pub scheduled_day_label: String,
}

impl SentMarker {
    pub fn for_contact(contact: &Contact) -> Self {
        Self {
            registration_code: contact.registration_code.clone(),
            scheduled_day_label: contact.scheduled_day_label.clone(),
        }
    }
}

/// Aggregated counters for one weekday slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStats {
    pub total_sent: u64,
    pub agents: BTreeMap<String, u64>,
}

impl DayStats {
    /// Count one successful send for `agent`.
    pub fn record(&mut self, agent: &str) {
        self.total_sent += 1;
        *self.agents.entry(agent.to_string()).or_insert(0) += 1;
    }
}

/// Logical state of the messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingPairing,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// A lifecycle is in progress; `start()` must not open another one.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingPairing | Self::Open | Self::Closing
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Opaque pairing/auth material persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBlob(pub serde_json::Value);

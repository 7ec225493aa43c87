//! # RemindClaw Core
//!
//! Shared configuration, error type, domain types, the event broadcaster and
//! the collaborator traits the other crates plug into.
//!
//! ```text
//! RosterSource ──► roster::RosterPartitioner ──┐
//!                                              ▼
//! MessagingGateway ◄── channels::SessionManager ──► scheduler::Dispatcher ──► Ledger
//!                                  │                          │
//!                                  └────────► EventBroadcaster ◄┘ ──► observers (ws)
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use config::RemindClawConfig;
pub use error::{RemindClawError, Result};
pub use events::{Event, EventBroadcaster, Subscription};
pub use types::{
    ConnectionState, Contact, CredentialBlob, DayStats, InvalidContactRecord, RawEnrollee,
    SentMarker,
};

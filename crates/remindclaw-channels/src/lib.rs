//! # RemindClaw Channels
//!
//! The messaging side: the session lifecycle manager that supervises the one
//! WhatsApp connection, disconnect classification, the stop signal shared with
//! the dispatch loop, pairing QR rendering, and the bridge client that implements
//! [`MessagingGateway`](remindclaw_core::traits::MessagingGateway).

pub mod classify;
pub mod pairing;
pub mod session;
pub mod signal;
pub mod whatsapp;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classify::{DisconnectReason, classify};
pub use pairing::qr_data_url;
pub use session::{
    CycleHandler, CycleOutcome, ReconnectPolicy, RecoveryAction, SessionManager, StartOutcome,
    StopOutcome,
};
pub use signal::StopSignal;
pub use whatsapp::{WsBridgeGateway, whatsapp_jid};

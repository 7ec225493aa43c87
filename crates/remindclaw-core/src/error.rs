//! RemindClaw error types.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RemindClawError>;

/// Errors shared by every RemindClaw crate.
#[derive(Debug, Error)]
pub enum RemindClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Credential store error: {0}")]
    Credentials(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

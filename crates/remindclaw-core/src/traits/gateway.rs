//! Messaging gateway trait — connect, observe session events, send, terminate.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::CredentialBlob;

/// Session events published by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The provider wants the operator to scan a pairing code.
    Pairing(String),
    /// Auth material changed and must be persisted.
    CredentialsUpdated(CredentialBlob),
    /// The session is usable for sending.
    Open,
    /// The session ended; `code` is the provider's status code if any.
    Closed { code: Option<u16>, message: String },
}

/// Factory for connections to the messaging provider.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Open a connection, resuming `credentials` when present.
    ///
    /// The receiver yields session events until the connection ends;
    /// dropping it releases all subscriptions on the handle.
    async fn connect(
        &self,
        credentials: Option<CredentialBlob>,
    ) -> Result<(Arc<dyn GatewayConnection>, mpsc::Receiver<ConnectionEvent>)>;
}

/// A live connection handle.
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    /// Send a text message to a provider address.
    async fn send_text(&self, address: &str, text: &str) -> Result<()>;

    /// Invalidate the session on the provider side.
    async fn logout(&self) -> Result<()>;

    /// Close the transport. Idempotent.
    async fn end(&self);
}

//! Persisted pairing material.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::CredentialBlob;

/// Stores the messaging session's credential blob under a fixed key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<CredentialBlob>>;
    async fn save(&self, blob: &CredentialBlob) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

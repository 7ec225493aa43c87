//! Roster source trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::RawEnrollee;

/// Fetches the current enrollee list from the external provider.
#[async_trait]
pub trait RosterSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_enrollees(&self) -> Result<Vec<RawEnrollee>>;
}

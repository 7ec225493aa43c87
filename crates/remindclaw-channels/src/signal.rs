//! Process-wide stop flag, observed cooperatively by every long wait.

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// A resettable cancellation token.
///
/// `raise()` cancels the current token; `clear()` swaps in a fresh one so the
/// next lifecycle starts un-cancelled. Holders of an old token keep seeing it
/// cancelled.
#[derive(Clone, Default)]
pub struct StopSignal {
    current: Arc<Mutex<CancellationToken>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        if let Ok(token) = self.current.lock() {
            token.cancel();
        }
    }

    pub fn clear(&self) {
        if let Ok(mut token) = self.current.lock()
            && token.is_cancelled()
        {
            *token = CancellationToken::new();
        }
    }

    pub fn is_raised(&self) -> bool {
        self.current.lock().map(|t| t.is_cancelled()).unwrap_or(true)
    }

    /// The token for the current lifecycle.
    pub fn token(&self) -> CancellationToken {
        self.current
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|_| {
                let token = CancellationToken::new();
                token.cancel();
                token
            })
    }
}

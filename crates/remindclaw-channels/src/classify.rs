//! Disconnect classification — one total mapping from close codes to causes.

use std::fmt;

/// Why a messaging connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Credentials were invalidated on the provider side.
    LoggedOut,
    /// Network loss or a provider-requested restart.
    Transient,
    /// The provider is temporarily blocking the account.
    RateLimited,
    /// Anything we do not recognise; handled like `Transient`.
    Unknown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LoggedOut => "logged out",
            Self::Transient => "connection lost",
            Self::RateLimited => "rate limited",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Map a provider close code to a [`DisconnectReason`].
pub fn classify(code: Option<u16>) -> DisconnectReason {
    match code {
        Some(401) => DisconnectReason::LoggedOut,
        Some(403 | 429) => DisconnectReason::RateLimited,
        // timed out, connection closed/lost, replaced, bad session, unavailable, restart required
        Some(408 | 428 | 440 | 500 | 503 | 515) => DisconnectReason::Transient,
        _ => DisconnectReason::Unknown,
    }
}

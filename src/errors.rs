//! Typed sync error taxonomy.
//!
//! Provider clients and the scraper return `SyncError` so the classifier can
//! switch on a closed kind enum. `classify_message` remains as a keyword
//! fallback for untyped errors bubbling up through `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("blocked by provider: {0}")]
    ProviderBlocked(String),
    #[error("{0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimit,
    Auth,
    Network,
    Validation,
    ProviderBlocked,
    Unknown,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::RateLimit(_) => ErrorKind::RateLimit,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::ProviderBlocked(_) => ErrorKind::ProviderBlocked,
            SyncError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Wrap an untyped error, recovering a kind from its message.
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match classify_message(&msg) {
            ErrorKind::RateLimit => SyncError::RateLimit(msg),
            ErrorKind::Auth => SyncError::Auth(msg),
            ErrorKind::Network => SyncError::Network(msg),
            ErrorKind::Validation => SyncError::Validation(msg),
            ErrorKind::ProviderBlocked => SyncError::ProviderBlocked(msg),
            ErrorKind::Unknown => SyncError::Unknown(msg),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return SyncError::Network(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return SyncError::RateLimit(err.to_string());
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return SyncError::Auth(err.to_string());
            }
        }
        if err.is_decode() {
            return SyncError::Validation(err.to_string());
        }
        SyncError::Unknown(err.to_string())
    }
}

/// Keyword classification of an error message, checked in priority order:
/// rate-limit, authentication, network/timeout, validation, blocked, unknown.
pub fn classify_message(msg: &str) -> ErrorKind {
    let m = msg.to_lowercase();
    if m.contains("rate limit") || m.contains("too many requests") || m.contains("429") {
        ErrorKind::RateLimit
    } else if m.contains("unauthorized") || m.contains("invalid token") || m.contains("api key") {
        ErrorKind::Auth
    } else if m.contains("network") || m.contains("timeout") || m.contains("timed out") {
        ErrorKind::Network
    } else if m.contains("validation") || m.contains("invalid data") {
        ErrorKind::Validation
    } else if m.contains("498") || m.contains("blocked") || m.contains("captcha") {
        ErrorKind::ProviderBlocked
    } else {
        ErrorKind::Unknown
    }
}

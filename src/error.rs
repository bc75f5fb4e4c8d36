//! Error taxonomy for the session subsystem.
//!
//! DESIGN
//! ======
//! `AuthError` is what every authenticator, challenge, and backend operation
//! returns. Each kind maps to exactly one remediation in the console UI:
//! re-show the captcha, show a network error, or force a re-login. Payloads
//! are plain strings so the enum stays `Clone`, which lets one refresh result
//! be handed to every waiter.

use std::path::PathBuf;

/// Failures surfaced by login, logout, refresh, and challenge operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The captcha challenge could not be fetched.
    #[error("captcha challenge unavailable: {0}")]
    ChallengeUnavailable(String),

    /// Username or password rejected. The consumed challenge is spent.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Captcha answer did not match the issued challenge. The challenge is spent.
    #[error("invalid captcha: {0}")]
    InvalidCaptcha(String),

    /// Transport or backend failure.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Refresh failed or a protected call rejected the token.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The result arrived after it stopped mattering (login screen left, or a
    /// logout superseded the operation). The store was not touched.
    #[error("result discarded: {0}")]
    Discarded(String),
}

impl AuthError {
    /// Grepable code for logs and inline form errors.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ChallengeUnavailable(_) => "E_CHALLENGE_UNAVAILABLE",
            Self::InvalidCredentials(_) => "E_INVALID_CREDENTIALS",
            Self::InvalidCaptcha(_) => "E_INVALID_CAPTCHA",
            Self::ServiceUnavailable(_) => "E_SERVICE_UNAVAILABLE",
            Self::SessionExpired(_) => "E_SESSION_EXPIRED",
            Self::Discarded(_) => "E_DISCARDED",
        }
    }

    /// Whether retrying the same operation with backoff can succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::ChallengeUnavailable(_))
    }

    /// Whether the caller must fetch a fresh captcha before the next login attempt.
    #[must_use]
    pub fn requires_new_challenge(&self) -> bool {
        matches!(self, Self::InvalidCredentials(_) | Self::InvalidCaptcha(_))
    }

    /// Whether the session is gone and the user must log in again.
    #[must_use]
    pub fn forces_reauth(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

/// Invalid or inconsistent configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

/// Durable session storage failures. Logged, never fatal to a session operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored session is corrupt: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

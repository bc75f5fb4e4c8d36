//! Auth backend seam.
//!
//! ARCHITECTURE
//! ============
//! Everything network-facing goes through `AuthBackend`. The production
//! implementation is [`http::HttpBackend`]; tests script a mock. Backends
//! classify failures into the [`AuthError`] taxonomy themselves, so the
//! authenticator never inspects status codes.

pub mod http;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::AuthError;
use crate::types::{CaptchaChallenge, Identity, LoginRequest, LoginResponse};

pub use http::HttpBackend;

/// Backend endpoints consumed by the session subsystem.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    /// Fetch a fresh captcha challenge.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeUnavailable`] on any failure.
    async fn request_challenge(&self) -> Result<CaptchaChallenge, AuthError>;

    /// Submit credentials plus captcha answer.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`], [`AuthError::InvalidCaptcha`], or
    /// [`AuthError::ServiceUnavailable`].
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError>;

    /// Tell the backend the session is over.
    ///
    /// # Errors
    ///
    /// Any error; callers treat logout notification as best-effort.
    async fn logout(&self, token: &str) -> Result<(), AuthError>;

    /// Exchange `token` for a renewed one.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionExpired`] if the token was rejected,
    /// [`AuthError::ServiceUnavailable`] on transport failure.
    async fn refresh(&self, token: &str) -> Result<String, AuthError>;

    /// Authoritative identity for `token`.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionExpired`] if the token was rejected,
    /// [`AuthError::ServiceUnavailable`] on transport failure.
    async fn current_identity(&self, token: &str) -> Result<Identity, AuthError>;
}

//! Login screen controller.
//!
//! Owns the captcha challenge shown on the form and drives the
//! challenge → submit → commit cycle. Leaving the screen (via a
//! [`ScreenHandle`]) makes any attempt that resolves afterward return
//! [`AuthError::Discarded`] without touching the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::authenticator::Authenticator;
use crate::challenge::ChallengeProvider;
use crate::error::AuthError;
use crate::retry::RetryPolicy;
use crate::types::{CaptchaChallenge, LoginRequest, Session};

/// What the user typed into the form.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub captcha_answer: String,
    pub remember: bool,
    pub tenant_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("captcha_answer", &self.captcha_answer)
            .field("remember", &self.remember)
            .finish_non_exhaustive()
    }
}

/// Cloneable token that marks the screen as left.
#[derive(Clone, Debug)]
pub struct ScreenHandle {
    active: Arc<AtomicBool>,
}

impl ScreenHandle {
    pub fn leave(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct LoginScreen {
    auth: Arc<Authenticator>,
    challenges: ChallengeProvider,
    retry: RetryPolicy,
    active: Arc<AtomicBool>,
}

impl LoginScreen {
    #[must_use]
    pub fn new(auth: Arc<Authenticator>, captcha_ttl: Duration, retry: RetryPolicy) -> Self {
        let challenges = ChallengeProvider::new(auth.backend().clone(), captcha_ttl);
        Self { auth, challenges, retry, active: Arc::new(AtomicBool::new(true)) }
    }

    #[must_use]
    pub fn handle(&self) -> ScreenHandle {
        ScreenHandle { active: self.active.clone() }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Challenge currently displayed, if still valid.
    #[must_use]
    pub fn challenge(&self) -> Option<CaptchaChallenge> {
        self.challenges.current()
    }

    /// Fetch the challenge to display, retrying transient failures.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeUnavailable`] once the retry policy gives up.
    pub async fn load_challenge(&self) -> Result<CaptchaChallenge, AuthError> {
        self.challenges.request_with_retry(&self.retry).await
    }

    /// Submit the form against the held challenge.
    ///
    /// The challenge is consumed by this attempt. After a failed attempt a
    /// fresh challenge is fetched; only if that fetch fails after a transport
    /// error is the unconsumed challenge put back.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeUnavailable`] if no valid challenge is held,
    /// [`AuthError::Discarded`] if the screen was left, otherwise whatever
    /// [`Authenticator::login`] reports.
    pub async fn submit(&self, credentials: Credentials) -> Result<Session, AuthError> {
        if !self.is_active() {
            return Err(AuthError::Discarded("login screen was left".into()));
        }
        let challenge = self.challenges.take()?;
        let mut request = LoginRequest::new(
            credentials.username,
            credentials.password,
            credentials.captcha_answer,
            challenge.session_id.clone(),
        )
        .remember(credentials.remember);
        if let Some(tenant) = credentials.tenant_token {
            request = request.tenant_token(tenant);
        }

        let generation = self.auth.store().generation();
        let outcome = self.auth.authenticate(&request).await;

        if !self.is_active() {
            debug!(username = %request.username, "login screen left before result; discarded");
            return Err(AuthError::Discarded("login screen was left".into()));
        }

        match outcome {
            Ok(session) => self.auth.commit_login(generation, session),
            Err(err) => {
                if let Err(fetch) = self.challenges.request().await {
                    warn!(error = %fetch, "could not fetch a new captcha after failed login");
                    if matches!(err, AuthError::ServiceUnavailable(_)) {
                        self.challenges.restore(&challenge);
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "login_test.rs"]
mod tests;

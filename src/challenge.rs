//! Captcha challenge provider.
//!
//! Holds at most one challenge: the most recently issued. A challenge is
//! single-use, so a login attempt `take`s it; only an attempt the server never
//! saw (transport failure) may `restore` it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::AuthBackend;
use crate::error::AuthError;
use crate::retry::RetryPolicy;
use crate::types::CaptchaChallenge;

struct Issued {
    challenge: CaptchaChallenge,
    at: Instant,
}

#[derive(Default)]
struct Slots {
    held: Option<Issued>,
    /// Taken by an attempt that has not resolved yet; keeps the issue time for `restore`.
    in_flight: Option<Issued>,
}

pub struct ChallengeProvider {
    backend: Arc<dyn AuthBackend>,
    ttl: Duration,
    slots: Mutex<Slots>,
}

impl ChallengeProvider {
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>, ttl: Duration) -> Self {
        Self { backend, ttl, slots: Mutex::new(Slots::default()) }
    }

    /// Fetch a fresh challenge, replacing any held one.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeUnavailable`] if the backend cannot issue one.
    pub async fn request(&self) -> Result<CaptchaChallenge, AuthError> {
        let challenge = self.backend.request_challenge().await.map_err(|e| match e {
            AuthError::ChallengeUnavailable(_) => e,
            other => AuthError::ChallengeUnavailable(other.to_string()),
        })?;
        debug!(session_id = %challenge.session_id, "captcha challenge issued");
        let issued = Issued { challenge: challenge.clone(), at: Instant::now() };
        *self.lock() = Slots { held: Some(issued), in_flight: None };
        Ok(challenge)
    }

    /// [`ChallengeProvider::request`] under a backoff policy.
    ///
    /// # Errors
    ///
    /// The last [`AuthError::ChallengeUnavailable`] once attempts run out.
    pub async fn request_with_retry(&self, policy: &RetryPolicy) -> Result<CaptchaChallenge, AuthError> {
        policy.run(|| self.request()).await
    }

    /// The held challenge, if it has not expired.
    #[must_use]
    pub fn current(&self) -> Option<CaptchaChallenge> {
        let slots = self.lock();
        slots.held.as_ref().filter(|issued| !self.expired(issued)).map(|issued| issued.challenge.clone())
    }

    /// Consume the held challenge for one login attempt.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeUnavailable`] if none is held or it has expired.
    pub fn take(&self) -> Result<CaptchaChallenge, AuthError> {
        let mut slots = self.lock();
        let Some(issued) = slots.held.take() else {
            return Err(AuthError::ChallengeUnavailable("no captcha challenge requested".into()));
        };
        if self.expired(&issued) {
            return Err(AuthError::ChallengeUnavailable("captcha challenge expired".into()));
        }
        let challenge = issued.challenge.clone();
        slots.in_flight = Some(issued);
        Ok(challenge)
    }

    /// Return a taken challenge the server never saw. Ignored if a newer one
    /// was issued meanwhile. The original issue time still governs expiry.
    pub fn restore(&self, challenge: &CaptchaChallenge) {
        let mut slots = self.lock();
        let Some(issued) = slots.in_flight.take() else {
            return;
        };
        if slots.held.is_none() && issued.challenge == *challenge {
            slots.held = Some(issued);
        }
    }

    /// Forget any held challenge.
    pub fn discard(&self) {
        *self.lock() = Slots::default();
    }

    fn expired(&self, issued: &Issued) -> bool {
        issued.at.elapsed() >= self.ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            warn!("challenge lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
#[path = "challenge_test.rs"]
mod tests;

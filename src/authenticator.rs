//! Authenticator: login, logout, refresh, and identity against the backend.
//!
//! ARCHITECTURE
//! ============
//! The authenticator is the only writer of the [`SessionStore`] (the login
//! screen writes through it). Every operation captures the store generation
//! before its network call and writes back conditionally, so anything that
//! mutated the store in the meantime wins.
//!
//! CONCURRENCY
//! ===========
//! - Logout clears the store first and never waits on the refresh lock, so it
//!   beats any in-flight login or refresh.
//! - Refresh is single-flight: callers serialize on a `tokio::sync::Mutex`.
//!   A caller that gets the lock after the generation moved returns the store's
//!   current session instead of issuing another network call.
//! - A protected call rejected with a token that another caller already renewed
//!   picks up the renewed session instead of refreshing again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::AuthBackend;
use crate::config::TokenTiming;
use crate::error::AuthError;
use crate::store::{SessionState, SessionStore};
use crate::types::{Identity, LoginRequest, Persistence, Session, now_ms};

pub struct Authenticator {
    backend: Arc<dyn AuthBackend>,
    store: Arc<SessionStore>,
    timing: TokenTiming,
    refresh_lock: Mutex<()>,
}

impl Authenticator {
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>, store: Arc<SessionStore>, timing: TokenTiming) -> Self {
        Self { backend, store, timing, refresh_lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn AuthBackend> {
        &self.backend
    }

    /// Cached identity of the logged-in user. No network call.
    #[must_use]
    pub fn current_identity(&self) -> Option<Identity> {
        self.store.identity()
    }

    // =========================================================================
    // LOGIN / LOGOUT
    // =========================================================================

    /// Submit credentials and install the resulting session.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] / [`AuthError::InvalidCaptcha`] when
    /// rejected (a new challenge is needed), [`AuthError::ServiceUnavailable`]
    /// on transport failure, [`AuthError::Discarded`] if a logout or another
    /// login landed while this one was in flight.
    pub async fn login(&self, request: &LoginRequest) -> Result<Session, AuthError> {
        let generation = self.store.generation();
        let session = self.authenticate(request).await?;
        self.commit_login(generation, session)
    }

    /// Network half of login. Does not touch the store.
    pub(crate) async fn authenticate(&self, request: &LoginRequest) -> Result<Session, AuthError> {
        let response = self.backend.login(request).await.inspect_err(|e| {
            info!(username = %request.username, code = e.error_code(), "login rejected");
        })?;
        if response.token.is_empty() {
            return Err(AuthError::ServiceUnavailable("backend returned an empty token".into()));
        }
        Ok(Session::new(response.token, response.user, Persistence::from_remember(request.remember)))
    }

    /// Store half of login: install `session` unless the store moved past `generation`.
    pub(crate) fn commit_login(&self, generation: u64, session: Session) -> Result<Session, AuthError> {
        if self.store.commit_if(generation, session.clone()) {
            info!(username = %session.user.username, persistence = ?session.persistence, "login succeeded");
            Ok(session)
        } else {
            debug!(username = %session.user.username, generation, "login result superseded; discarded");
            Err(AuthError::Discarded("session changed while login was in flight".into()))
        }
    }

    /// Clear the local session, then tell the backend. Remote failure is only logged.
    pub async fn logout(&self) {
        let token = self.store.token();
        self.store.clear();
        let Some(token) = token else {
            debug!("logout with no session");
            return;
        };
        info!("session cleared");
        if let Err(e) = self.backend.logout(&token).await {
            warn!(error = %e, "remote logout failed; local session already cleared");
        }
    }

    // =========================================================================
    // REFRESH
    // =========================================================================

    /// Exchange the current token for a renewed one.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionExpired`] if there is no session, the backend
    /// refused, or a logout landed first. The store is empty afterwards in the
    /// first two cases.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let observed = self.store.generation();
        let _flight = self.refresh_lock.lock().await;

        let state = self.store.snapshot();
        if state.generation != observed {
            debug!(observed, current = state.generation, "session moved while waiting; reusing result");
            return state
                .session
                .ok_or_else(|| AuthError::SessionExpired("session ended while waiting for refresh".into()));
        }
        self.renew(state).await
    }

    /// Renew the session only if it still holds `stale`, the token a caller
    /// found expired or rejected. A token already renewed by another caller is
    /// returned without a network call.
    pub(crate) async fn refresh_stale(&self, stale: &str) -> Result<Session, AuthError> {
        let _flight = self.refresh_lock.lock().await;

        let state = self.store.snapshot();
        match state.session.as_ref() {
            None => return Err(AuthError::SessionExpired("session ended while waiting for refresh".into())),
            Some(current) if current.token != stale => {
                debug!(generation = state.generation, "token already renewed; reusing result");
                return Ok(current.clone());
            }
            Some(_) => {}
        }
        self.renew(state).await
    }

    /// Network half of refresh. Caller holds the refresh lock.
    async fn renew(&self, state: SessionState) -> Result<Session, AuthError> {
        let Some(session) = state.session else {
            return Err(AuthError::SessionExpired("no session to refresh".into()));
        };

        match self.backend.refresh(&session.token).await {
            Ok(token) => {
                if let Some(renewed) = self.store.replace_token_if(state.generation, token) {
                    info!(username = %renewed.user.username, "token refreshed");
                    Ok(renewed)
                } else {
                    debug!(generation = state.generation, "refresh result superseded; discarded");
                    Err(AuthError::SessionExpired("session ended while refresh was in flight".into()))
                }
            }
            Err(e) => {
                warn!(error = %e, username = %session.user.username, "token refresh failed; clearing session");
                self.store.clear_if(state.generation);
                Err(match e {
                    AuthError::SessionExpired(_) => e,
                    other => AuthError::SessionExpired(other.to_string()),
                })
            }
        }
    }

    /// Whether `session` is within the refresh lead of expiry.
    #[must_use]
    pub fn refresh_due(&self, session: &Session) -> bool {
        now_ms() >= self.timing.refresh_due_ms(session.obtained_at_ms)
    }

    /// Run a protected backend call with the current bearer token.
    ///
    /// Refreshes first when the token is due; if the call reports the token
    /// invalid, refreshes once and retries once. Callers rejected with the
    /// same token share one refresh.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionExpired`] when not logged in or the refresh fails,
    /// otherwise whatever `call` returns.
    pub async fn with_session<F, Fut, T>(&self, mut call: F) -> Result<T, AuthError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let Some(mut session) = self.store.current() else {
            return Err(AuthError::SessionExpired("not logged in".into()));
        };
        if self.refresh_due(&session) {
            session = self.refresh_stale(&session.token).await?;
        }
        match call(session.token.clone()).await {
            Err(AuthError::SessionExpired(reason)) => {
                debug!(%reason, "protected call rejected token; refreshing once");
                let renewed = self.refresh_stale(&session.token).await?;
                call(renewed.token).await
            }
            other => other,
        }
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// Ask the backend who the token belongs to and update the cached identity.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionExpired`] when not logged in or the token was
    /// rejected (the session is cleared), [`AuthError::ServiceUnavailable`]
    /// on transport failure.
    pub async fn fetch_identity(&self) -> Result<Identity, AuthError> {
        let state = self.store.snapshot();
        let Some(session) = state.session else {
            return Err(AuthError::SessionExpired("not logged in".into()));
        };
        match self.backend.current_identity(&session.token).await {
            Ok(identity) => {
                if self.store.replace_identity_if(state.generation, identity.clone()) {
                    debug!(username = %identity.username, "cached identity updated");
                }
                Ok(identity)
            }
            Err(e @ AuthError::SessionExpired(_)) => {
                warn!(error = %e, "identity lookup rejected token; clearing session");
                self.store.clear_if(state.generation);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // BACKGROUND REFRESH
    // =========================================================================

    /// Spawn a task that refreshes each session shortly before it expires.
    /// Returns a handle for shutdown.
    pub fn spawn_refresh_task(self: Arc<Self>) -> JoinHandle<()> {
        let lead_secs = self.timing.refresh_lead.as_secs();
        info!(lead_secs, "background token refresh started");
        tokio::spawn(async move {
            let mut changes = self.store.subscribe();
            loop {
                let due_ms = changes
                    .borrow_and_update()
                    .session
                    .as_ref()
                    .map(|session| self.timing.refresh_due_ms(session.obtained_at_ms));

                let Some(due_ms) = due_ms else {
                    if changes.changed().await.is_err() {
                        break;
                    }
                    continue;
                };

                let wait = Duration::from_millis(due_ms.saturating_sub(now_ms()));
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(wait) => {
                        if let Err(e) = self.refresh().await {
                            warn!(error = %e, "background refresh failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "authenticator_test.rs"]
mod tests;

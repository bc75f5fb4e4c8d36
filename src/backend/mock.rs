//! Scripted in-memory backend for tests.
//!
//! Issues captchas whose answer is always [`CAPTCHA_ANSWER`], knows one
//! account (`alice` / `pw1`, token `tok-abc`), and consumes each captcha
//! session on its first login attempt. Failures are toggled per endpoint;
//! [`Gate`]s hold a call open so tests can interleave other operations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::AuthBackend;
use crate::error::AuthError;
use crate::types::{CaptchaChallenge, Identity, LoginRequest, LoginResponse};

pub(crate) const CAPTCHA_ANSWER: &str = "7F2K";

pub(crate) fn alice() -> Identity {
    Identity { id: "1".into(), username: "alice".into(), name: "Alice".into(), role: "staff".into() }
}

/// Holds a backend call open until released.
#[derive(Default)]
pub(crate) struct Gate {
    pub started: Notify,
    pub release: Notify,
}

impl Gate {
    async fn pass(&self) {
        self.started.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct Script {
    next_session: u32,
    next_refresh: u32,
    outstanding: HashMap<String, String>,
    revoked: HashSet<String>,
    challenge_down: bool,
    login_error: Option<AuthError>,
    logout_error: Option<AuthError>,
    refresh_error: Option<AuthError>,
    identity_override: Option<Identity>,
    last_tenant_token: Option<String>,
    login_gate: Option<Arc<Gate>>,
    refresh_gate: Option<Arc<Gate>>,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    script: Mutex<Script>,
    pub challenge_calls: AtomicUsize,
    pub login_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub identity_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_challenge_down(&self, down: bool) {
        self.script.lock().unwrap().challenge_down = down;
    }

    pub fn fail_logins_with(&self, error: Option<AuthError>) {
        self.script.lock().unwrap().login_error = error;
    }

    pub fn fail_logouts_with(&self, error: Option<AuthError>) {
        self.script.lock().unwrap().logout_error = error;
    }

    pub fn fail_refreshes_with(&self, error: Option<AuthError>) {
        self.script.lock().unwrap().refresh_error = error;
    }

    pub fn set_identity(&self, identity: Identity) {
        self.script.lock().unwrap().identity_override = Some(identity);
    }

    pub fn last_tenant_token(&self) -> Option<String> {
        self.script.lock().unwrap().last_tenant_token.clone()
    }

    pub fn revoke(&self, token: &str) {
        self.script.lock().unwrap().revoked.insert(token.to_owned());
    }

    pub fn gate_logins(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.script.lock().unwrap().login_gate = Some(gate.clone());
        gate
    }

    pub fn gate_refreshes(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.script.lock().unwrap().refresh_gate = Some(gate.clone());
        gate
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuthBackend for MockBackend {
    async fn request_challenge(&self) -> Result<CaptchaChallenge, AuthError> {
        self.challenge_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.challenge_down {
            return Err(AuthError::ChallengeUnavailable("captcha endpoint down".into()));
        }
        script.next_session += 1;
        let session_id = format!("s{}", script.next_session);
        script.outstanding.insert(session_id.clone(), CAPTCHA_ANSWER.to_owned());
        Ok(CaptchaChallenge { session_id, image: "data:image/png;base64,AAAA".into() })
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.script.lock().unwrap().login_gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut script = self.script.lock().unwrap();
        script.last_tenant_token.clone_from(&request.tenant_token);
        if let Some(error) = script.login_error.clone() {
            return Err(error);
        }
        let expected = script.outstanding.remove(&request.session_id);
        if expected.as_deref() != Some(request.captcha.as_str()) {
            return Err(AuthError::InvalidCaptcha("captcha mismatch".into()));
        }
        if request.username != "alice" || request.password != "pw1" {
            return Err(AuthError::InvalidCredentials("bad username or password".into()));
        }
        script.revoked.remove("tok-abc");
        Ok(LoginResponse { token: "tok-abc".into(), user: alice() })
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if let Some(error) = script.logout_error.clone() {
            return Err(error);
        }
        script.revoked.insert(token.to_owned());
        Ok(())
    }

    async fn refresh(&self, token: &str) -> Result<String, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.script.lock().unwrap().refresh_gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut script = self.script.lock().unwrap();
        if let Some(error) = script.refresh_error.clone() {
            return Err(error);
        }
        if script.revoked.contains(token) {
            return Err(AuthError::SessionExpired("token revoked".into()));
        }
        script.next_refresh += 1;
        script.revoked.insert(token.to_owned());
        Ok(format!("tok-r{}", script.next_refresh))
    }

    async fn current_identity(&self, token: &str) -> Result<Identity, AuthError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        if script.revoked.contains(token) {
            return Err(AuthError::SessionExpired("token revoked".into()));
        }
        Ok(script.identity_override.clone().unwrap_or_else(alice))
    }
}

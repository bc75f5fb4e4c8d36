//! Session domain types and the wire DTOs exchanged with the auth backend.
//!
//! DESIGN
//! ======
//! Field names follow the backend's JSON (`sessionId`, `captchaUrl`,
//! `tenantToken`). Identity ids arrive as strings from some deployments and
//! as integers from others; both decode to `String`.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Snapshot of the authenticated user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user id.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    pub role: String,
}

// =============================================================================
// SESSION
// =============================================================================

/// Whether a session outlives the current run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Written to durable storage; rehydrated on the next start.
    Durable,
    /// Memory only.
    #[default]
    RunScoped,
}

impl Persistence {
    #[must_use]
    pub fn from_remember(remember: bool) -> Self {
        if remember { Self::Durable } else { Self::RunScoped }
    }
}

/// Token and identity, always held together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: Identity,
    /// When this client obtained `token`, in Unix milliseconds.
    pub obtained_at_ms: u64,
    #[serde(default)]
    pub persistence: Persistence,
}

impl Session {
    #[must_use]
    pub fn new(token: String, user: Identity, persistence: Persistence) -> Self {
        Self { token, user, obtained_at_ms: now_ms(), persistence }
    }

    /// Same identity and persistence with a renewed token.
    #[must_use]
    pub fn renewed(&self, token: String) -> Self {
        Self { token, user: self.user.clone(), obtained_at_ms: now_ms(), persistence: self.persistence }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .field("obtained_at_ms", &self.obtained_at_ms)
            .field("persistence", &self.persistence)
            .finish()
    }
}

// =============================================================================
// CAPTCHA
// =============================================================================

/// A server-issued captcha bound to a server session id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    /// Must be echoed back with the login attempt.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Image reference to render (usually a `data:` URL).
    #[serde(rename = "captchaUrl", alias = "image")]
    pub image: String,
}

// =============================================================================
// LOGIN
// =============================================================================

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// The user's answer to the captcha.
    pub captcha: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub remember: bool,
    /// Tenant credential for the tenant-user login variant.
    #[serde(rename = "tenantToken", skip_serializing_if = "Option::is_none")]
    pub tenant_token: Option<String>,
}

impl LoginRequest {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        captcha: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            captcha: captcha.into(),
            session_id: session_id.into(),
            remember: false,
            tenant_token: None,
        }
    }

    #[must_use]
    pub fn remember(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }

    #[must_use]
    pub fn tenant_token(mut self, token: impl Into<String>) -> Self {
        self.tenant_token = Some(token.into());
        self
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("captcha", &self.captcha)
            .field("session_id", &self.session_id)
            .field("remember", &self.remember)
            .field("tenant_token", &self.tenant_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Successful `POST /auth/login` payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Identity,
}

/// Successful `POST /auth/refresh-token` payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    #[serde(default, deserialize_with = "deserialize_opt_code")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(D::Error::custom("expected string or number id")),
    }
}

fn deserialize_opt_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(D::Error::custom("expected string or number code")),
    }
}

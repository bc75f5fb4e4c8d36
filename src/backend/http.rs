//! HTTP implementation of [`AuthBackend`] over the console's REST API.
//!
//! Thin reqwest wrapper. Status classification and envelope decoding are pure
//! functions (`decode_payload`, `classify_login_failure`,
//! `classify_token_failure`) so they can be tested without a server.
//!
//! WIRE NOTES
//! ==========
//! Some backend builds wrap every response in `{code, message, data}`; others
//! return the payload bare. Both are accepted. Error bodies carry an optional
//! machine `code` and a human `message`.

use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::AuthBackend;
use crate::config::{HttpTimeouts, SessionConfig};
use crate::error::{AuthError, ConfigError};
use crate::types::{CaptchaChallenge, ErrorBody, Identity, LoginRequest, LoginResponse, RefreshResponse};

const REQUEST_ID_HEADER: &str = "x-request-id";

const CAPTCHA_PATH: &str = "/auth/captcha";
const LOGIN_PATH: &str = "/auth/login";
const LOGOUT_PATH: &str = "/auth/logout";
const REFRESH_PATH: &str = "/auth/refresh-token";
const IDENTITY_PATH: &str = "/auth/user";

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a backend rooted at `base_url` (for example `https://host/api`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClientBuild`] if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeouts: HttpTimeouts) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(timeouts.request)
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| ConfigError::HttpClientBuild(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// # Errors
    ///
    /// See [`HttpBackend::new`].
    pub fn from_config(config: &SessionConfig) -> Result<Self, ConfigError> {
        Self::new(config.api_base_url.clone(), config.timeouts)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(%method, path, %request_id, "auth backend request");
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header(REQUEST_ID_HEADER, request_id)
    }

    fn authorized(&self, method: Method, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.request(method, path).header(AUTHORIZATION, format!("Bearer {token}"))
    }

    /// Send and read the whole body. Transport failures become `ServiceUnavailable`.
    async fn send(builder: reqwest::RequestBuilder) -> Result<(u16, String), AuthError> {
        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::ServiceUnavailable(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::ServiceUnavailable(e.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait::async_trait]
impl AuthBackend for HttpBackend {
    async fn request_challenge(&self) -> Result<CaptchaChallenge, AuthError> {
        let fetch = async {
            let (status, body) = Self::send(self.request(Method::GET, CAPTCHA_PATH)).await?;
            decode_response::<CaptchaChallenge, _>(status, &body, classify_token_failure)
        };
        fetch.await.map_err(|e| match e {
            AuthError::ChallengeUnavailable(_) => e,
            other => AuthError::ChallengeUnavailable(other.to_string()),
        })
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let (status, body) = Self::send(self.request(Method::POST, LOGIN_PATH).json(request)).await?;
        decode_response(status, &body, classify_login_failure)
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let (status, body) = Self::send(self.authorized(Method::POST, LOGOUT_PATH, token)).await?;
        if is_success(status) {
            return Ok(());
        }
        Err(classify_token_failure(status, &error_body(&body)))
    }

    async fn refresh(&self, token: &str) -> Result<String, AuthError> {
        let builder = self
            .authorized(Method::POST, REFRESH_PATH, token)
            .json(&serde_json::json!({ "token": token }));
        let (status, body) = Self::send(builder).await?;
        let refreshed: RefreshResponse = decode_response(status, &body, classify_token_failure)?;
        if refreshed.token.is_empty() {
            return Err(AuthError::SessionExpired("backend returned an empty token".into()));
        }
        Ok(refreshed.token)
    }

    async fn current_identity(&self, token: &str) -> Result<Identity, AuthError> {
        let (status, body) = Self::send(self.authorized(Method::GET, IDENTITY_PATH, token)).await?;
        decode_response(status, &body, classify_token_failure)
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// A decoded response body: the payload, or an in-band failure from the envelope.
#[derive(Debug, PartialEq)]
pub(crate) enum Payload {
    Data(Value),
    Failure { status: u16, body: ErrorBody },
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Unwrap the optional `{code, message, data}` envelope.
pub(crate) fn decode_payload(body: &str) -> Result<Payload, serde_json::Error> {
    let value: Value = serde_json::from_str(body)?;
    if let Value::Object(map) = &value
        && map.contains_key("code")
        && map.contains_key("data")
    {
        let code = match &map["code"] {
            Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()),
            Value::String(s) => s.parse::<u16>().ok(),
            _ => None,
        };
        if code == Some(200) {
            return Ok(Payload::Data(map["data"].clone()));
        }
        let body = ErrorBody {
            code: None,
            message: map.get("message").and_then(Value::as_str).map(str::to_owned),
        };
        return Ok(Payload::Failure { status: code.unwrap_or(400), body });
    }
    Ok(Payload::Data(value))
}

/// Parse an error body leniently; plain-text bodies become the message.
pub(crate) fn error_body(raw: &str) -> ErrorBody {
    serde_json::from_str::<ErrorBody>(raw).unwrap_or_else(|_| {
        let trimmed = raw.trim();
        ErrorBody { code: None, message: (!trimmed.is_empty()).then(|| trimmed.to_owned()) }
    })
}

fn decode_response<T, F>(status: u16, raw: &str, classify: F) -> Result<T, AuthError>
where
    T: DeserializeOwned,
    F: Fn(u16, &ErrorBody) -> AuthError,
{
    if !is_success(status) {
        return Err(classify(status, &error_body(raw)));
    }
    match decode_payload(raw) {
        Ok(Payload::Data(value)) => serde_json::from_value(value)
            .map_err(|e| AuthError::ServiceUnavailable(format!("unexpected response shape: {e}"))),
        Ok(Payload::Failure { status, body }) => Err(classify(status, &body)),
        Err(e) => Err(AuthError::ServiceUnavailable(format!("response is not JSON: {e}"))),
    }
}

fn mentions_captcha(message: &str) -> bool {
    message.to_ascii_lowercase().contains("captcha") || message.contains("验证码")
}

/// Map a failed login response onto the error taxonomy.
pub(crate) fn classify_login_failure(status: u16, body: &ErrorBody) -> AuthError {
    let message = body.message.clone().unwrap_or_else(|| format!("login rejected with status {status}"));
    match body.code.as_deref() {
        Some("invalid_captcha") => return AuthError::InvalidCaptcha(message),
        Some("invalid_credentials") => return AuthError::InvalidCredentials(message),
        _ => {}
    }
    match status {
        408 | 429 | 500..=599 => AuthError::ServiceUnavailable(message),
        _ if mentions_captcha(&message) => AuthError::InvalidCaptcha(message),
        400 | 401 | 403 | 422 => AuthError::InvalidCredentials(message),
        _ => AuthError::ServiceUnavailable(message),
    }
}

/// Map a failed bearer-token call (refresh, identity, logout) onto the error taxonomy.
pub(crate) fn classify_token_failure(status: u16, body: &ErrorBody) -> AuthError {
    let message = body.message.clone().unwrap_or_else(|| format!("request failed with status {status}"));
    match status {
        401 | 403 => AuthError::SessionExpired(message),
        _ => AuthError::ServiceUnavailable(message),
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

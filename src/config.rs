//! Session configuration parsed from environment variables.
//!
//! Every timing the backend leaves unspecified (captcha lifetime, token
//! validity window, refresh lead) is an explicit knob here with a documented
//! default.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::guard::normalize_path;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_LOGIN_PATH: &str = "/";
pub const DEFAULT_LANDING_PATH: &str = "/home";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_REFRESH_LEAD_SECS: u64 = 5 * 60;
pub const DEFAULT_CAPTCHA_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 8000;
pub const DEFAULT_STATE_DIR_NAME: &str = ".restaurant-console";

/// Home page per staff role, used when `CONSOLE_ROLE_LANDING` is unset.
pub const DEFAULT_ROLE_LANDING: &[(&str, &str)] = &[
    ("admin", "/admin/staff"),
    ("cashier", "/cashier/transaction"),
    ("finance", "/finance/statistics"),
    ("marketing", "/marketing/analysis"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request: Duration,
    pub connect: Duration,
}

/// Token validity and refresh scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTiming {
    /// How long a freshly issued token stays valid.
    pub ttl: Duration,
    /// How long before expiry a proactive refresh is due.
    pub refresh_lead: Duration,
}

impl TokenTiming {
    /// Unix-millis instant at which a token obtained at `obtained_at_ms` should be refreshed.
    #[must_use]
    pub fn refresh_due_ms(&self, obtained_at_ms: u64) -> u64 {
        let window = self.ttl.saturating_sub(self.refresh_lead);
        obtained_at_ms.saturating_add(u64::try_from(window.as_millis()).unwrap_or(u64::MAX))
    }
}

impl Default for TokenTiming {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            refresh_lead: Duration::from_secs(DEFAULT_REFRESH_LEAD_SECS),
        }
    }
}

/// Backoff knobs for `ServiceUnavailable` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub timeouts: HttpTimeouts,
    pub login_path: String,
    pub landing_path: String,
    /// Role → landing page; roles not listed use `landing_path`.
    pub role_landing: BTreeMap<String, String>,
    pub token: TokenTiming,
    pub captcha_ttl: Duration,
    pub retry: RetrySettings,
    pub state_dir: PathBuf,
}

impl SessionConfig {
    /// Build typed session config from environment variables.
    ///
    /// Optional (all have defaults):
    /// - `CONSOLE_API_BASE_URL`
    /// - `CONSOLE_REQUEST_TIMEOUT_SECS`, `CONSOLE_CONNECT_TIMEOUT_SECS`
    /// - `CONSOLE_LOGIN_PATH`, `CONSOLE_LANDING_PATH`
    /// - `CONSOLE_ROLE_LANDING` (`role=/path,role=/path`; empty disables role pages)
    /// - `CONSOLE_TOKEN_TTL_SECS`, `CONSOLE_REFRESH_LEAD_SECS`
    /// - `CONSOLE_CAPTCHA_TTL_SECS`
    /// - `CONSOLE_RETRY_ATTEMPTS`, `CONSOLE_RETRY_DELAY_MS`, `CONSOLE_RETRY_MAX_DELAY_MS`
    /// - `CONSOLE_STATE_DIR`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when paths, URLs or role landing
    /// entries are malformed or the refresh lead does not fit inside the
    /// token TTL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] but reads values through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`SessionConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup("CONSOLE_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let secs = |key: &str, default: u64| Duration::from_secs(parse_or(&lookup, key, default));
        let millis = |key: &str, default: u64| Duration::from_millis(parse_or(&lookup, key, default));

        let timeouts = HttpTimeouts {
            request: secs("CONSOLE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect: secs("CONSOLE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let token = TokenTiming {
            ttl: secs("CONSOLE_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS),
            refresh_lead: secs("CONSOLE_REFRESH_LEAD_SECS", DEFAULT_REFRESH_LEAD_SECS),
        };

        let retry = RetrySettings {
            attempts: parse_or(&lookup, "CONSOLE_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS).max(1),
            base_delay: millis("CONSOLE_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            max_delay: millis("CONSOLE_RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS),
        };

        let state_dir = match (lookup("CONSOLE_STATE_DIR"), lookup("HOME")) {
            (Some(dir), _) => PathBuf::from(dir),
            (None, Some(home)) => PathBuf::from(home).join(DEFAULT_STATE_DIR_NAME),
            (None, None) => PathBuf::from(DEFAULT_STATE_DIR_NAME),
        };

        let role_landing = match lookup("CONSOLE_ROLE_LANDING") {
            Some(raw) => parse_role_landing(&raw)?,
            None => default_role_landing(),
        };

        let config = Self {
            api_base_url,
            timeouts,
            login_path: lookup("CONSOLE_LOGIN_PATH").unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            landing_path: lookup("CONSOLE_LANDING_PATH").unwrap_or_else(|| DEFAULT_LANDING_PATH.to_string()),
            role_landing,
            token,
            captcha_ttl: secs("CONSOLE_CAPTCHA_TTL_SECS", DEFAULT_CAPTCHA_TTL_SECS),
            retry,
            state_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(invalid("CONSOLE_API_BASE_URL", format!("expected http(s) URL, got '{}'", self.api_base_url)));
        }
        if !self.login_path.starts_with('/') {
            return Err(invalid("CONSOLE_LOGIN_PATH", "must start with '/'"));
        }
        if !self.landing_path.starts_with('/') {
            return Err(invalid("CONSOLE_LANDING_PATH", "must start with '/'"));
        }
        let login = normalize_path(&self.login_path);
        if login == normalize_path(&self.landing_path) {
            return Err(invalid("CONSOLE_LANDING_PATH", "must differ from the login path"));
        }
        for (role, path) in &self.role_landing {
            if !path.starts_with('/') {
                return Err(invalid("CONSOLE_ROLE_LANDING", format!("path for role '{role}' must start with '/'")));
            }
            if normalize_path(path) == login {
                return Err(invalid("CONSOLE_ROLE_LANDING", format!("path for role '{role}' equals the login path")));
            }
        }
        if self.token.refresh_lead >= self.token.ttl {
            return Err(invalid("CONSOLE_REFRESH_LEAD_SECS", "must be shorter than CONSOLE_TOKEN_TTL_SECS"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeouts: HttpTimeouts {
                request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
                connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            role_landing: default_role_landing(),
            token: TokenTiming::default(),
            captcha_ttl: Duration::from_secs(DEFAULT_CAPTCHA_TTL_SECS),
            retry: RetrySettings::default(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR_NAME),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn default_role_landing() -> BTreeMap<String, String> {
    DEFAULT_ROLE_LANDING.iter().map(|(role, path)| ((*role).to_string(), (*path).to_string())).collect()
}

/// Parse `role=/path` pairs separated by commas. Blank entries are skipped.
fn parse_role_landing(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (role, path) = entry
                .split_once('=')
                .map(|(role, path)| (role.trim(), path.trim()))
                .filter(|(role, path)| !role.is_empty() && !path.is_empty())
                .ok_or_else(|| invalid("CONSOLE_ROLE_LANDING", format!("expected role=/path, got '{entry}'")))?;
            Ok((role.to_string(), path.to_string()))
        })
        .collect()
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.into() }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

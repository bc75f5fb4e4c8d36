//! Session and access-control core for the restaurant admin console.
//!
//! ARCHITECTURE
//! ============
//! Challenge provider → authenticator → session store → route guard.
//!
//! - [`challenge`] fetches the captcha a login attempt must answer.
//! - [`authenticator`] logs in, logs out, refreshes, and is the only writer of
//!   the [`store::SessionStore`].
//! - [`guard`] decides each navigation from the store's session presence.
//! - [`login`] is the form controller tying a challenge to one attempt.
//!
//! Everything network-facing sits behind [`backend::AuthBackend`].

pub mod authenticator;
pub mod backend;
pub mod challenge;
pub mod config;
pub mod error;
pub mod guard;
pub mod login;
pub mod retry;
pub mod storage;
pub mod store;
pub mod types;

pub use authenticator::Authenticator;
pub use backend::{AuthBackend, HttpBackend};
pub use config::SessionConfig;
pub use error::{AuthError, ConfigError, StorageError};
pub use guard::{Navigator, RouteDecision, RouteGuard};
pub use login::{Credentials, LoginScreen, ScreenHandle};
pub use store::{SessionState, SessionStore};
pub use types::{CaptchaChallenge, Identity, LoginRequest, Persistence, Session};

//! Route access control.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every navigation is checked with [`RouteGuard::decide`], a pure function of
//! the target path and whether a session exists. [`Navigator`] wires it to the
//! session store so a mounted page is re-checked whenever the session changes
//! (logout elsewhere, failed refresh).
//!
//! Authenticated users sent away from the login page land on their role's
//! home page, or the default landing path for roles without one.

use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::debug;

use crate::config::SessionConfig;
use crate::store::SessionState;

/// Canonical form used for path comparison: no query, no fragment, no trailing slash.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
    RedirectToLanding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    login_path: String,
    landing_path: String,
    role_landing: BTreeMap<String, String>,
}

impl RouteGuard {
    #[must_use]
    pub fn new(login_path: &str, landing_path: &str) -> Self {
        Self {
            login_path: normalize_path(login_path),
            landing_path: normalize_path(landing_path),
            role_landing: BTreeMap::new(),
        }
    }

    /// Add per-role landing pages, replacing any earlier entry for the same role.
    #[must_use]
    pub fn with_role_landing<I, K, V>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        for (role, path) in routes {
            self.role_landing.insert(role.into(), normalize_path(path.as_ref()));
        }
        self
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.login_path, &config.landing_path).with_role_landing(&config.role_landing)
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }

    /// Landing page for `role`, falling back to the default landing path.
    #[must_use]
    pub fn landing_for(&self, role: Option<&str>) -> &str {
        role.and_then(|role| self.role_landing.get(role)).map_or(self.landing_path.as_str(), String::as_str)
    }

    #[must_use]
    pub fn decide(&self, target: &str, session_present: bool) -> RouteDecision {
        let on_login = normalize_path(target) == self.login_path;
        match (session_present, on_login) {
            (false, false) => RouteDecision::RedirectToLogin,
            (true, true) => RouteDecision::RedirectToLanding,
            _ => RouteDecision::Allow,
        }
    }

    /// Where a navigation to `target` ends up. `session_role` is the logged-in
    /// user's role, `None` when there is no session.
    #[must_use]
    pub fn resolve(&self, target: &str, session_role: Option<&str>) -> String {
        match self.decide(target, session_role.is_some()) {
            RouteDecision::Allow => target.to_string(),
            RouteDecision::RedirectToLogin => self.login_path.clone(),
            RouteDecision::RedirectToLanding => self.landing_for(session_role).to_string(),
        }
    }
}

// =============================================================================
// NAVIGATOR
// =============================================================================

/// Current location plus a live view of the session.
pub struct Navigator {
    guard: RouteGuard,
    session: watch::Receiver<SessionState>,
    path: String,
}

impl Navigator {
    /// Mount at `initial_path`, immediately applying the guard.
    #[must_use]
    pub fn new(guard: RouteGuard, mut session: watch::Receiver<SessionState>, initial_path: &str) -> Self {
        let role = session_role(&session.borrow_and_update());
        let path = guard.resolve(initial_path, role.as_deref());
        Self { guard, session, path }
    }

    #[must_use]
    pub fn current_path(&self) -> &str {
        &self.path
    }

    /// Navigate to `target`; returns the path actually landed on.
    pub fn navigate(&mut self, target: &str) -> &str {
        let role = session_role(&self.session.borrow());
        let resolved = self.guard.resolve(target, role.as_deref());
        if resolved != target {
            debug!(requested = %target, redirect = %resolved, "route guard redirect");
        }
        self.path = resolved;
        &self.path
    }

    /// Wait for the next session change and re-check the current path.
    ///
    /// Returns the redirect taken, or `None` if the current page is still allowed
    /// or the store has been dropped.
    pub async fn session_changed(&mut self) -> Option<RouteDecision> {
        self.session.changed().await.ok()?;
        let role = session_role(&self.session.borrow_and_update());
        let decision = self.guard.decide(&self.path, role.is_some());
        if decision == RouteDecision::Allow {
            return None;
        }
        let resolved = self.guard.resolve(&self.path, role.as_deref());
        debug!(from = %self.path, to = %resolved, "session change forced redirect");
        self.path = resolved;
        Some(decision)
    }
}

fn session_role(state: &SessionState) -> Option<String> {
    state.session.as_ref().map(|session| session.user.role.clone())
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;

use std::sync::Mutex as StdMutex;

use tokio::sync::Notify;

use super::*;
use crate::backend::mock::{CAPTCHA_ANSWER, MockBackend, alice};
use crate::guard::{RouteDecision, RouteGuard};
use crate::storage::MemoryStorage;

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    backend: Arc<MockBackend>,
    storage: Arc<MemoryStorage>,
    store: Arc<SessionStore>,
    auth: Arc<Authenticator>,
}

fn harness() -> Harness {
    harness_with(TokenTiming::default())
}

fn harness_with(timing: TokenTiming) -> Harness {
    let backend = MockBackend::new();
    let storage = Arc::new(MemoryStorage::default());
    let store = Arc::new(SessionStore::new(storage.clone()));
    let auth = Arc::new(Authenticator::new(backend.clone(), store.clone(), timing));
    Harness { backend, storage, store, auth }
}

/// Timing under which every session is immediately due for refresh.
fn always_due() -> TokenTiming {
    TokenTiming { ttl: Duration::from_secs(10), refresh_lead: Duration::from_secs(10) }
}

async fn alice_request(h: &Harness, answer: &str) -> LoginRequest {
    let challenge = h.backend.request_challenge().await.unwrap();
    LoginRequest::new("alice", "pw1", answer, challenge.session_id)
}

async fn login_alice(h: &Harness) -> Session {
    let request = alice_request(h, CAPTCHA_ANSWER).await;
    h.auth.login(&request).await.unwrap()
}

// =============================================================================
// login
// =============================================================================

#[tokio::test]
async fn login_installs_token_and_identity_together() {
    let h = harness();
    let challenge = h.backend.request_challenge().await.unwrap();
    assert_eq!(challenge.session_id, "s1");

    let session = h.auth.login(&LoginRequest::new("alice", "pw1", "7F2K", "s1")).await.unwrap();
    assert_eq!(session.token, "tok-abc");
    assert_eq!(
        session.user,
        Identity { id: "1".into(), username: "alice".into(), name: "Alice".into(), role: "staff".into() }
    );

    let stored = h.store.current().unwrap();
    assert_eq!(stored.token, "tok-abc");
    assert_eq!(stored.user, session.user);

    let guard = RouteGuard::new("/", "/home");
    assert_eq!(guard.decide("/home", h.store.is_authenticated()), RouteDecision::Allow);
    let role = h.store.identity().map(|identity| identity.role);
    assert_eq!(guard.resolve("/", role.as_deref()), "/home");
}

#[tokio::test]
async fn wrong_captcha_leaves_store_empty() {
    let h = harness();
    let request = alice_request(&h, "0000").await;
    let err = h.auth.login(&request).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCaptcha(_)));
    assert!(err.requires_new_challenge());
    assert!(!h.store.is_authenticated());

    let guard = RouteGuard::new("/", "/home");
    assert_eq!(guard.resolve("/home", h.store.identity().map(|identity| identity.role).as_deref()), "/");
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let h = harness();
    let challenge = h.backend.request_challenge().await.unwrap();
    let err = h
        .auth
        .login(&LoginRequest::new("alice", "wrong", CAPTCHA_ANSWER, challenge.session_id))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials(_)));
    assert!(h.store.current().is_none());
}

#[tokio::test]
async fn service_failure_surfaces_unchanged() {
    let h = harness();
    h.backend.fail_logins_with(Some(AuthError::ServiceUnavailable("502".into())));
    let request = alice_request(&h, CAPTCHA_ANSWER).await;
    let err = h.auth.login(&request).await.unwrap_err();
    assert_eq!(err, AuthError::ServiceUnavailable("502".into()));
    assert!(!err.requires_new_challenge());
}

#[tokio::test]
async fn challenge_cannot_be_reused() {
    let h = harness();
    let request = alice_request(&h, CAPTCHA_ANSWER).await;
    h.auth.login(&request).await.unwrap();
    h.auth.logout().await;
    assert!(matches!(h.auth.login(&request).await, Err(AuthError::InvalidCaptcha(_))));
}

#[tokio::test]
async fn remember_writes_durable_storage() {
    let h = harness();
    let request = alice_request(&h, CAPTCHA_ANSWER).await.remember(true);
    h.auth.login(&request).await.unwrap();
    assert_eq!(h.storage.stored().unwrap().token, "tok-abc");

    let rehydrated = SessionStore::rehydrate(h.storage.clone());
    assert_eq!(rehydrated.token().as_deref(), Some("tok-abc"));
    assert_eq!(rehydrated.identity(), Some(alice()));
}

#[tokio::test]
async fn login_without_remember_removes_durable_session() {
    let h = harness();
    let remembered = alice_request(&h, CAPTCHA_ANSWER).await.remember(true);
    h.auth.login(&remembered).await.unwrap();

    let forgetful = alice_request(&h, CAPTCHA_ANSWER).await;
    assert!(!forgetful.remember);
    h.auth.login(&forgetful).await.unwrap();
    assert!(h.storage.stored().is_none());
    assert!(h.store.is_authenticated());
}

#[tokio::test]
async fn current_identity_makes_no_network_call() {
    let h = harness();
    assert!(h.auth.current_identity().is_none());
    login_alice(&h).await;
    assert_eq!(h.auth.current_identity(), Some(alice()));
    assert_eq!(MockBackend::calls(&h.backend.identity_calls), 0);
}

// =============================================================================
// logout
// =============================================================================

#[tokio::test]
async fn logout_clears_store_and_notifies_backend() {
    let h = harness();
    let request = alice_request(&h, CAPTCHA_ANSWER).await.remember(true);
    h.auth.login(&request).await.unwrap();

    h.auth.logout().await;
    assert!(!h.store.is_authenticated());
    assert!(h.storage.stored().is_none());
    assert_eq!(MockBackend::calls(&h.backend.logout_calls), 1);
}

#[tokio::test]
async fn logout_clears_store_even_when_remote_fails() {
    let h = harness();
    login_alice(&h).await;
    h.backend.fail_logouts_with(Some(AuthError::ServiceUnavailable("connection reset".into())));

    h.auth.logout().await;
    assert!(h.store.current().is_none());
    assert!(h.auth.current_identity().is_none());
}

#[tokio::test]
async fn logout_without_session_skips_backend() {
    let h = harness();
    h.auth.logout().await;
    assert_eq!(MockBackend::calls(&h.backend.logout_calls), 0);
}

#[tokio::test]
async fn logout_during_login_discards_login() {
    let h = harness();
    let request = alice_request(&h, CAPTCHA_ANSWER).await;
    let gate = h.backend.gate_logins();

    let logout = async {
        gate.started.notified().await;
        h.auth.logout().await;
        gate.release.notify_one();
    };
    let (result, ()) = tokio::join!(h.auth.login(&request), logout);

    assert!(matches!(result, Err(AuthError::Discarded(_))));
    assert!(!h.store.is_authenticated());
}

// =============================================================================
// refresh
// =============================================================================

#[tokio::test]
async fn refresh_replaces_token_and_keeps_identity() {
    let h = harness();
    login_alice(&h).await;

    let renewed = h.auth.refresh().await.unwrap();
    assert_eq!(renewed.token, "tok-r1");
    assert_eq!(renewed.user, alice());
    assert_eq!(h.store.token().as_deref(), Some("tok-r1"));
}

#[tokio::test]
async fn concurrent_refreshes_share_one_network_call() {
    let h = harness();
    login_alice(&h).await;
    let gate = h.backend.gate_refreshes();

    let release = async {
        gate.started.notified().await;
        gate.release.notify_one();
    };
    let (first, second, ()) = tokio::join!(h.auth.refresh(), h.auth.refresh(), release);

    assert_eq!(MockBackend::calls(&h.backend.refresh_calls), 1);
    assert_eq!(first.unwrap().token, "tok-r1");
    assert_eq!(second.unwrap().token, "tok-r1");
}

#[tokio::test]
async fn refresh_failure_clears_session() {
    let h = harness();
    let request = alice_request(&h, CAPTCHA_ANSWER).await.remember(true);
    h.auth.login(&request).await.unwrap();
    h.backend.fail_refreshes_with(Some(AuthError::ServiceUnavailable("timeout".into())));

    let err = h.auth.refresh().await.unwrap_err();
    assert!(err.forces_reauth());
    assert!(!h.store.is_authenticated());
    assert!(h.storage.stored().is_none());
}

#[tokio::test]
async fn refresh_without_session_is_expired() {
    let h = harness();
    assert!(matches!(h.auth.refresh().await, Err(AuthError::SessionExpired(_))));
    assert_eq!(MockBackend::calls(&h.backend.refresh_calls), 0);
}

#[tokio::test]
async fn logout_during_refresh_wins() {
    let h = harness();
    login_alice(&h).await;
    // Remote logout fails so the mock still honours the old token.
    h.backend.fail_logouts_with(Some(AuthError::ServiceUnavailable("down".into())));
    let gate = h.backend.gate_refreshes();

    let logout = async {
        gate.started.notified().await;
        h.auth.logout().await;
        gate.release.notify_one();
    };
    let (result, ()) = tokio::join!(h.auth.refresh(), logout);

    assert_eq!(result, Err(AuthError::SessionExpired("session ended while refresh was in flight".into())));
    assert!(!h.store.is_authenticated());
}

#[test]
fn refresh_due_uses_token_timing() {
    let h = harness();
    let fresh = Session::new("t".into(), alice(), Persistence::RunScoped);
    assert!(!h.auth.refresh_due(&fresh));

    let old = Session { obtained_at_ms: 0, ..fresh };
    assert!(h.auth.refresh_due(&old));
}

// =============================================================================
// with_session
// =============================================================================

#[tokio::test]
async fn with_session_requires_login() {
    let h = harness();
    let result = h.auth.with_session(|token| async move { Ok(token) }).await;
    assert!(matches!(result, Err(AuthError::SessionExpired(_))));
}

#[tokio::test]
async fn with_session_passes_current_token() {
    let h = harness();
    login_alice(&h).await;
    let token = h.auth.with_session(|token| async move { Ok(token) }).await.unwrap();
    assert_eq!(token, "tok-abc");
    assert_eq!(MockBackend::calls(&h.backend.refresh_calls), 0);
}

#[tokio::test]
async fn with_session_refreshes_once_after_rejection() {
    let h = harness();
    login_alice(&h).await;
    let log = StdMutex::new(Vec::new());
    let seen = &log;

    let result = h
        .auth
        .with_session(move |token| async move {
            seen.lock().unwrap().push(token.clone());
            if token == "tok-abc" { Err(AuthError::SessionExpired("stale".into())) } else { Ok(token) }
        })
        .await;

    assert_eq!(result.unwrap(), "tok-r1");
    assert_eq!(*log.lock().unwrap(), vec!["tok-abc".to_string(), "tok-r1".to_string()]);
    assert_eq!(MockBackend::calls(&h.backend.refresh_calls), 1);
}

#[tokio::test]
async fn late_rejection_reuses_token_renewed_by_another_caller() {
    let h = harness();
    login_alice(&h).await;
    let (slow_started, slow_release) = (Notify::new(), Notify::new());
    let (started, release) = (&slow_started, &slow_release);

    // Holds tok-abc until the other caller has already refreshed, then gets rejected.
    let slow = h.auth.with_session(move |token| async move {
        if token == "tok-abc" {
            started.notify_one();
            release.notified().await;
            return Err(AuthError::SessionExpired("stale".into()));
        }
        Ok(token)
    });
    let fast = async {
        started.notified().await;
        let result = h
            .auth
            .with_session(|token| async move {
                if token == "tok-abc" { Err(AuthError::SessionExpired("stale".into())) } else { Ok(token) }
            })
            .await;
        release.notify_one();
        result
    };
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(fast.unwrap(), "tok-r1");
    assert_eq!(slow.unwrap(), "tok-r1");
    assert_eq!(MockBackend::calls(&h.backend.refresh_calls), 1);
    assert_eq!(h.store.token().as_deref(), Some("tok-r1"));
    assert!(h.backend.current_identity("tok-r1").await.is_ok());
}

#[tokio::test]
async fn with_session_refreshes_proactively_when_due() {
    let h = harness_with(always_due());
    login_alice(&h).await;
    let token = h.auth.with_session(|token| async move { Ok(token) }).await.unwrap();
    assert_eq!(token, "tok-r1");
}

#[tokio::test]
async fn with_session_gives_up_when_refresh_fails() {
    let h = harness();
    login_alice(&h).await;
    h.backend.revoke("tok-abc");

    let result: Result<(), _> =
        h.auth.with_session(|_| async { Err(AuthError::SessionExpired("rejected".into())) }).await;
    assert!(matches!(result, Err(AuthError::SessionExpired(_))));
    assert!(!h.store.is_authenticated());
}

// =============================================================================
// fetch_identity
// =============================================================================

#[tokio::test]
async fn fetch_identity_updates_cache_only() {
    let h = harness();
    login_alice(&h).await;
    let promoted = Identity { role: "manager".into(), ..alice() };
    h.backend.set_identity(promoted.clone());

    assert_eq!(h.auth.fetch_identity().await.unwrap(), promoted);
    assert_eq!(h.auth.current_identity(), Some(promoted));
    assert_eq!(h.store.token().as_deref(), Some("tok-abc"));
}

#[tokio::test]
async fn fetch_identity_with_rejected_token_clears_session() {
    let h = harness();
    login_alice(&h).await;
    h.backend.revoke("tok-abc");

    assert!(matches!(h.auth.fetch_identity().await, Err(AuthError::SessionExpired(_))));
    assert!(!h.store.is_authenticated());
}

// =============================================================================
// background refresh
// =============================================================================

#[tokio::test]
async fn refresh_task_renews_before_expiry() {
    let h = harness_with(TokenTiming {
        ttl: Duration::from_millis(200),
        refresh_lead: Duration::from_millis(150),
    });
    let task = h.auth.clone().spawn_refresh_task();

    login_alice(&h).await;
    let mut rx = h.store.subscribe();
    let renewed = tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|state| state.session.as_ref().is_some_and(|s| s.token != "tok-abc")),
    )
    .await
    .is_ok_and(|changed| changed.is_ok());
    assert!(renewed);
    assert!(MockBackend::calls(&h.backend.refresh_calls) >= 1);
    task.abort();
}

#[tokio::test]
async fn refresh_task_idles_without_session() {
    let h = harness_with(always_due());
    let task = h.auth.clone().spawn_refresh_task();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(MockBackend::calls(&h.backend.refresh_calls), 0);
    task.abort();
}

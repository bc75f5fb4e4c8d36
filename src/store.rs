//! Session token store, the single source of truth for "who is logged in".
//!
//! ARCHITECTURE
//! ============
//! State lives in a `tokio::sync::watch` channel. Every mutation runs inside
//! one `send_modify`/`send_if_modified` closure, so token and identity change
//! together and subscribers never see one without the other. A `generation`
//! counter is bumped on every mutation; operations that started earlier pass
//! the generation they observed and their write is dropped if anything
//! happened in between (a logout during a refresh, for instance).
//!
//! Readers (route guard, navigator, UI) get `subscribe()`. Mutators are
//! crate-private: only the authenticator and the login screen write.
//!
//! PERSISTENCE
//! ===========
//! Writers serialize on a separate `write_lock` and touch storage after the
//! watch closure returns, still holding that lock. Storage therefore sees
//! mutations in the same order subscribers do, and readers never wait on disk
//! I/O. Storage calls are blocking and run on the writer's thread.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::storage::TokenStorage;
use crate::types::{Identity, Persistence, Session};

/// Snapshot published to subscribers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub session: Option<Session>,
    pub generation: u64,
}

impl SessionState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

pub struct SessionStore {
    tx: watch::Sender<SessionState>,
    storage: Arc<dyn TokenStorage>,
    write_lock: Mutex<()>,
}

/// Storage action owed by a mutation that was published.
enum Persist {
    Save(Session),
    Clear,
}

impl SessionStore {
    /// Empty store backed by `storage`. Does not read storage.
    #[must_use]
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self { tx, storage, write_lock: Mutex::new(()) }
    }

    /// Store seeded from whatever `storage` holds. Call once at startup.
    ///
    /// An unreadable or corrupt stored session is logged and discarded.
    #[must_use]
    pub fn rehydrate(storage: Arc<dyn TokenStorage>) -> Self {
        let store = Self::new(storage);
        match store.storage.load() {
            Ok(Some(mut session)) => {
                session.persistence = Persistence::Durable;
                debug!(username = %session.user.username, "rehydrated stored session");
                store.tx.send_modify(|state| {
                    state.session = Some(session);
                    state.generation += 1;
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "stored session unreadable; starting logged out");
                if let Err(e) = store.storage.clear() {
                    warn!(error = %e, "failed to clear unreadable session");
                }
            }
        }
        store
    }

    // -------------------------------------------------------------------------
    // READS
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().session.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.tx.borrow().session.as_ref().map(|s| s.user.clone())
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.tx.borrow().session.as_ref().map(|s| s.token.clone())
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    /// Change feed. The receiver starts at the current state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    // -------------------------------------------------------------------------
    // WRITES
    // -------------------------------------------------------------------------

    /// Install `session` if the generation is still `expected`. Returns whether it was written.
    pub(crate) fn commit_if(&self, expected: u64, session: Session) -> bool {
        let _write = self.write_guard();
        let mut owed = None;
        self.tx.send_if_modified(|state| {
            if state.generation != expected {
                return false;
            }
            owed = Some(Persist::for_session(&session));
            state.session = Some(session);
            state.generation += 1;
            true
        });
        self.apply(owed)
    }

    /// Swap in a renewed token if the generation is still `expected` and a session exists.
    pub(crate) fn replace_token_if(&self, expected: u64, token: String) -> Option<Session> {
        let _write = self.write_guard();
        let mut renewed = None;
        self.tx.send_if_modified(|state| {
            if state.generation != expected {
                return false;
            }
            let Some(current) = state.session.as_ref() else {
                return false;
            };
            let next = current.renewed(token);
            renewed = Some(next.clone());
            state.session = Some(next);
            state.generation += 1;
            true
        });
        self.apply(renewed.as_ref().map(Persist::for_session));
        renewed
    }

    /// Update the cached identity, keeping the token, if the generation is still `expected`.
    pub(crate) fn replace_identity_if(&self, expected: u64, user: Identity) -> bool {
        let _write = self.write_guard();
        let mut owed = None;
        self.tx.send_if_modified(|state| {
            if state.generation != expected {
                return false;
            }
            let Some(current) = state.session.as_mut() else {
                return false;
            };
            if current.user == user {
                return false;
            }
            current.user = user;
            owed = Some(Persist::for_session(current));
            state.generation += 1;
            true
        });
        self.apply(owed)
    }

    /// Drop the session unconditionally. Always bumps the generation so any
    /// in-flight login or refresh loses.
    pub(crate) fn clear(&self) {
        let _write = self.write_guard();
        self.tx.send_modify(|state| {
            state.session = None;
            state.generation += 1;
        });
        self.apply(Some(Persist::Clear));
    }

    /// Drop the session if the generation is still `expected`.
    pub(crate) fn clear_if(&self, expected: u64) -> bool {
        let _write = self.write_guard();
        let cleared = self.tx.send_if_modified(|state| {
            if state.generation != expected {
                return false;
            }
            state.session = None;
            state.generation += 1;
            true
        });
        self.apply(cleared.then_some(Persist::Clear))
    }

    /// Run the storage action for a published mutation. Returns whether one was owed.
    fn apply(&self, owed: Option<Persist>) -> bool {
        let Some(owed) = owed else {
            return false;
        };
        let result = match &owed {
            Persist::Save(session) => self.storage.save(session),
            Persist::Clear => self.storage.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "session persistence failed; continuing in memory");
        }
        true
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            warn!("session write lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

impl Persist {
    /// Durable sessions are saved; run-scoped ones remove any stale durable copy.
    fn for_session(session: &Session) -> Self {
        match session.persistence {
            Persistence::Durable => Self::Save(session.clone()),
            Persistence::RunScoped => Self::Clear,
        }
    }
}

//! Durable session storage.
//!
//! SYSTEM CONTEXT
//! ==============
//! The session store calls into a `TokenStorage` on every mutation. Only
//! durable (remember-me) sessions are written; run-scoped sessions and
//! logouts remove the stored key. Storage is read exactly once, at startup,
//! to rehydrate.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are returned to the store, which logs them and keeps the
//! in-memory session authoritative.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::types::Session;

/// Fixed key the durable session is stored under.
pub const SESSION_STORAGE_KEY: &str = "token";

/// Persistence backend for the durable session.
pub trait TokenStorage: Send + Sync {
    /// Read the stored session, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing medium cannot be read or decoded.
    fn load(&self) -> Result<Option<Session>, StorageError>;

    /// Replace the stored session.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the write fails.
    fn save(&self, session: &Session) -> Result<(), StorageError>;

    /// Remove the stored session. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the removal fails.
    fn clear(&self) -> Result<(), StorageError>;
}

// =============================================================================
// FILE STORAGE
// =============================================================================

/// JSON file at `<dir>/token.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(format!("{SESSION_STORAGE_KEY}.json")) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io { path: self.path.clone(), source }
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<Option<Session>, StorageError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn save(&self, session: &Session) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let raw = serde_json::to_vec(session)?;

        // Write-then-rename so a crash never leaves a truncated token file.
        let tmp = self.path.with_extension("json.tmp");
        let mut file = open_private(&tmp).map_err(|e| self.io_error(e))?;
        file.write_all(&raw).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

// =============================================================================
// IN-MEMORY STORAGE
// =============================================================================

/// Process-local storage. Useful in tests and for kiosks that must never
/// write credentials to disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<Session>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self { slot: Mutex::new(Some(session)) }
    }

    /// Snapshot of what is currently stored.
    #[must_use]
    pub fn stored(&self) -> Option<Session> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Session>, StorageError> {
        Ok(self.stored())
    }

    fn save(&self, session: &Session) -> Result<(), StorageError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(session.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}

/// Storage that persists nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl TokenStorage for NullStorage {
    fn load(&self) -> Result<Option<Session>, StorageError> {
        Ok(None)
    }

    fn save(&self, _session: &Session) -> Result<(), StorageError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;

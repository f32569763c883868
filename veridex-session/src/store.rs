//! Durable session persistence.
//!
//! The store is deliberately thin: it persists whatever it is handed and
//! returns whatever was put. Policy and validity checks belong to the
//! [`manager`](crate::manager).
//!
//! [`SledSessionStore`] is the production implementation (pure-Rust
//! embedded DB, survives restart); [`MemorySessionStore`] backs tests.

use alloy_primitives::B256;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::Path;

use veridex::error::InternalError;

use crate::session::Session;

/// Error from the backing store.
///
/// Wraps [`InternalError`] so manager-level callers can propagate storage
/// failures without inspecting the backend.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct StoreError(#[from] pub InternalError);

impl StoreError {
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self(InternalError::Storage(err.to_string()))
    }
}

/// Durable mapping from `key_hash` to [`Session`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a session, overwriting any previous state.
    async fn put(&self, session: &Session) -> Result<(), StoreError>;

    /// Loads a session by its key hash.
    async fn get(&self, key_hash: &B256) -> Result<Option<Session>, StoreError>;

    /// Deletes a session. Returns whether it existed.
    async fn delete(&self, key_hash: &B256) -> Result<bool, StoreError>;

    /// Lists every session belonging to a master credential.
    async fn list_by_master(&self, master_key_hash: &B256) -> Result<Vec<Session>, StoreError>;

    /// Marks a session as quarantined.
    ///
    /// Quarantined sessions stay readable for audit but are excluded from
    /// every spending path.
    async fn set_quarantined(&self, key_hash: &B256) -> Result<(), StoreError>;

    /// Returns whether a session is quarantined.
    async fn is_quarantined(&self, key_hash: &B256) -> Result<bool, StoreError>;
}

/// Sled-backed session store.
///
/// Named trees:
///   sessions   — key hash bytes → JSON(Session)
///   quarantine — key hash bytes → [] (membership set)
#[derive(Debug)]
pub struct SledSessionStore {
    sessions: sled::Tree,
    quarantine: sled::Tree,
}

impl SledSessionStore {
    /// Opens or creates the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(StoreError::storage)?;
        Self::from_db(&db)
    }

    /// Opens a throwaway store backed by a temporary database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be created.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(StoreError::storage)?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        let sessions = db.open_tree("sessions").map_err(StoreError::storage)?;
        let quarantine = db.open_tree("quarantine").map_err(StoreError::storage)?;
        Ok(Self {
            sessions,
            quarantine,
        })
    }
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        let value = serde_json::to_vec(session).map_err(StoreError::storage)?;
        self.sessions
            .insert(session.key_hash.as_slice(), value)
            .map_err(StoreError::storage)?;
        self.sessions
            .flush_async()
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }

    async fn get(&self, key_hash: &B256) -> Result<Option<Session>, StoreError> {
        match self
            .sessions
            .get(key_hash.as_slice())
            .map_err(StoreError::storage)?
        {
            Some(bytes) => {
                let session = serde_json::from_slice(&bytes).map_err(StoreError::storage)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key_hash: &B256) -> Result<bool, StoreError> {
        let existed = self
            .sessions
            .remove(key_hash.as_slice())
            .map_err(StoreError::storage)?
            .is_some();
        self.sessions
            .flush_async()
            .await
            .map_err(StoreError::storage)?;
        Ok(existed)
    }

    async fn list_by_master(&self, master_key_hash: &B256) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();
        for entry in self.sessions.iter() {
            let (_, bytes) = entry.map_err(StoreError::storage)?;
            let session: Session = serde_json::from_slice(&bytes).map_err(StoreError::storage)?;
            if session.master_key_hash == *master_key_hash {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    async fn set_quarantined(&self, key_hash: &B256) -> Result<(), StoreError> {
        self.quarantine
            .insert(key_hash.as_slice(), &[])
            .map_err(StoreError::storage)?;
        self.quarantine
            .flush_async()
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }

    async fn is_quarantined(&self, key_hash: &B256) -> Result<bool, StoreError> {
        self.quarantine
            .contains_key(key_hash.as_slice())
            .map_err(StoreError::storage)
    }
}

/// In-memory session store for tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<B256, Session>,
    quarantine: std::sync::Mutex<HashSet<B256>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions.insert(session.key_hash, session.clone());
        Ok(())
    }

    async fn get(&self, key_hash: &B256) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(key_hash).map(|s| s.clone()))
    }

    async fn delete(&self, key_hash: &B256) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(key_hash).is_some())
    }

    async fn list_by_master(&self, master_key_hash: &B256) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.master_key_hash == *master_key_hash)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn set_quarantined(&self, key_hash: &B256) -> Result<(), StoreError> {
        self.quarantine
            .lock()
            .expect("quarantine lock poisoned")
            .insert(*key_hash);
        Ok(())
    }

    async fn is_quarantined(&self, key_hash: &B256) -> Result<bool, StoreError> {
        Ok(self
            .quarantine
            .lock()
            .expect("quarantine lock poisoned")
            .contains(key_hash))
    }
}

//! Persistent client state
//!
//! The transport persists exactly two strings across process restarts: the
//! client identifier and the hex-encoded session key. Both live behind the
//! [`KeyValueStore`] trait so the coordinator and the request pipeline are
//! testable without a real persistent medium.
//!
//! - **sqlite**: SQLite-backed store for production use
//! - **memory**: in-memory store for tests

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::StorageKeys;
use crate::crypto::keys;
use crate::error::ClientResult;

pub use memory::MemoryKeyStore;
pub use sqlite::SqliteKeyStore;

/// A persistent string-to-string store surviving process restarts
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> ClientResult<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> ClientResult<()>;

    /// Remove a value. Must be complete before returning so a racing
    /// reader cannot observe the removed value afterwards.
    async fn remove(&self, key: &str) -> ClientResult<()>;
}

/// Owns the persisted client identity and session key.
///
/// The client identifier is created lazily on first use and survives
/// session key resets; the server expects the same identifier to be reused
/// across key exchanges. Only [`IdentityStore::reset`] replaces it.
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
    /// In-memory copy of the identifier to avoid a store read per request
    client_id: RwLock<Option<String>>,
}

impl IdentityStore {
    /// Create an identity store over the given backend
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        Self {
            store,
            keys,
            client_id: RwLock::new(None),
        }
    }

    /// Return the persisted client identifier, generating and persisting a
    /// new 32-character alphanumeric one if none exists yet.
    pub async fn get_or_create_client_id(&self) -> ClientResult<String> {
        if let Some(id) = self.client_id.read().await.clone() {
            return Ok(id);
        }

        let mut cached = self.client_id.write().await;
        // another task may have populated the cache while we waited
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        if let Some(id) = self.store.get(&self.keys.client_id).await? {
            *cached = Some(id.clone());
            return Ok(id);
        }

        let id = keys::generate_client_id();
        self.store.set(&self.keys.client_id, &id).await?;
        tracing::info!("generated new client identifier");
        *cached = Some(id.clone());
        Ok(id)
    }

    /// The persisted session key, if any
    pub async fn session_key(&self) -> ClientResult<Option<String>> {
        self.store.get(&self.keys.session_key).await
    }

    /// Persist a session key
    pub async fn set_session_key(&self, key_hex: &str) -> ClientResult<()> {
        self.store.set(&self.keys.session_key, key_hex).await
    }

    /// Remove the persisted session key. The client identifier is kept.
    pub async fn clear_session_key(&self) -> ClientResult<()> {
        self.store.remove(&self.keys.session_key).await
    }

    /// Remove both the session key and the client identifier. The next
    /// request will generate a fresh identity and re-handshake.
    pub async fn reset(&self) -> ClientResult<()> {
        self.store.remove(&self.keys.session_key).await?;
        self.store.remove(&self.keys.client_id).await?;
        *self.client_id.write().await = None;
        Ok(())
    }
}

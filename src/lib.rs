//! Client-side transport encryption
//!
//! This crate establishes a shared AES-256 session key with an API server
//! over an untrusted channel and transparently encrypts/decrypts the JSON
//! bodies of every subsequent request, recovering when the server
//! invalidates the key.
//!
//! ## Components
//!
//! - **crypto**: RSA-OAEP key wrapping, AES-256-CBC envelopes, key material
//!   generation
//! - **store**: persisted client identity and session key (SQLite-backed,
//!   with an in-memory variant for tests)
//! - **exchange**: the key exchange handshake and session lifecycle
//! - **api**: the request pipeline applying identity headers, encryption,
//!   decryption and key-invalidation recovery
//! - **config**: endpoint paths, header names and storage keys
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use veil_transport::{ApiClient, SqliteKeyStore, TransportConfig};
//!
//! let config = TransportConfig::new("https://api.example.com")?;
//! let store = Arc::new(SqliteKeyStore::connect("client.db").await?);
//! let client = ApiClient::new(config, store)?
//!     .on_session_reset(|| reload_application_state());
//!
//! // the handshake and body encryption happen behind this call
//! let users: Vec<User> = client.get("/manage/user/list").await?;
//! ```

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod models;
pub mod store;

// Re-export the main entry points
pub use api::{ApiClient, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use config::{StorageKeys, TransportConfig};
pub use error::{ClientError, ClientResult};
pub use exchange::{HandshakeError, HandshakeState, KeyManager};
pub use models::EncryptedEnvelope;
pub use store::{IdentityStore, KeyValueStore, MemoryKeyStore, SqliteKeyStore};

//! Transport configuration
//!
//! Endpoint paths, header names and storage keys the encrypted transport
//! uses to talk to a server. Defaults match the reference backend; every
//! field is public so deployments can override what they need.

use std::time::Duration;

use url::Url;

use crate::error::{ClientError, ClientResult};

/// Keys under which client state is persisted in the key-value store
#[derive(Debug, Clone)]
pub struct StorageKeys {
    /// Storage key for the client identifier
    pub client_id: String,
    /// Storage key for the hex-encoded session key
    pub session_key: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            client_id: "client_id".to_string(),
            session_key: "aes_key".to_string(),
        }
    }
}

/// Configuration for the encrypted transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL of the API server
    pub base_url: Url,
    /// Path of the endpoint publishing the server's RSA public key
    pub public_key_path: String,
    /// Path of the endpoint registering the wrapped session key
    pub exchange_key_path: String,
    /// Path prefixes that bypass body encryption/decryption.
    ///
    /// Matched against the request path at segment boundaries, never by
    /// substring containment: `/upload` exempts `/upload` and `/upload/x`
    /// but not `/manage/uploads`.
    pub exempt_paths: Vec<String>,
    /// Header carrying the client identifier on every request
    pub client_id_header: String,
    /// Status code by which the server signals session key invalidation
    pub key_invalid_status: u16,
    /// Response body flag by which the server signals key invalidation
    pub key_invalid_flag: String,
    /// Storage keys for persisted client state
    pub storage: StorageKeys,
    /// Maximum handshake attempts before a request falls back to plaintext
    pub handshake_attempts: u32,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
}

impl TransportConfig {
    /// Create a configuration for the given API base URL with defaults
    /// for everything else.
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("invalid base URL {base_url:?}: {e}")))?;

        Ok(Self {
            base_url,
            public_key_path: "/auth/public-key".to_string(),
            exchange_key_path: "/auth/exchange-key".to_string(),
            exempt_paths: vec![
                "/auth/exchange-key".to_string(),
                "/auth/public-key".to_string(),
                "/auth/admin/login".to_string(),
                "/auth/wx-login".to_string(),
                "/auth/logout".to_string(),
                "/upload".to_string(),
            ],
            client_id_header: "x-client-id".to_string(),
            key_invalid_status: 428,
            key_invalid_flag: "needKeyExchange".to_string(),
            storage: StorageKeys::default(),
            handshake_attempts: 2,
            request_timeout: Duration::from_secs(30),
        })
    }

    /// Whether a request path bypasses the encryption pipeline.
    ///
    /// A path is exempt when one of the configured prefixes matches up to a
    /// path-segment or query boundary.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| {
            match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
                None => false,
            }
        })
    }
}

//! Session key exchange
//!
//! Establishes the shared AES session key with the server: fetch the
//! server's RSA public key, generate a key locally, wrap it with RSA-OAEP
//! and register it under the client identifier. The handshake either fully
//! succeeds (the server holds the key, the key is persisted locally) or
//! fully fails (the candidate key is discarded and any previously persisted
//! key is left untouched).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::api::transport::{HttpRequest, Transport};
use crate::config::TransportConfig;
use crate::crypto::asymmetric;
use crate::crypto::keys::SessionKey;
use crate::error::ClientResult;
use crate::models::{ExchangeKeyRequest, ExchangeKeyResponse, PublicKeyResponse};
use crate::store::{IdentityStore, KeyValueStore};

/// Errors that can occur during the key exchange handshake
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The server public key could not be fetched or parsed
    #[error("server public key unavailable: {0}")]
    PublicKeyUnavailable(String),

    /// Wrapping the session key under the server public key failed
    #[error("failed to encrypt session key: {0}")]
    EncryptionFailed(String),

    /// The server refused or failed to register the key
    #[error("server rejected key exchange: {0}")]
    ServerRejected(String),
}

/// Progress of the key exchange within this process lifetime.
///
/// Whether a usable session key exists is a separate question — a key may
/// have been restored from storage without any handshake running — so
/// `is_key_exchanged` reads the store, not this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    InProgress,
    Established,
    Failed,
}

/// Coordinates the session key lifecycle.
///
/// `exchange_key` is idempotent and single-flight: concurrent callers
/// serialize on an internal lock and observe the winner's result instead of
/// issuing duplicate handshakes to the server.
pub struct KeyManager {
    transport: Arc<dyn Transport>,
    identity: IdentityStore,
    config: Arc<TransportConfig>,
    state: RwLock<HandshakeState>,
    exchange_lock: Mutex<()>,
    /// Bumped by `clear_keys`/`reset_identity`. A handshake snapshots the
    /// epoch at start and discards its result if the epoch moved, so a late
    /// success cannot repopulate state the caller asked to be cleared.
    reset_epoch: AtomicU64,
}

impl KeyManager {
    /// Create a key manager over the given transport and state backend
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        config: Arc<TransportConfig>,
    ) -> Self {
        Self {
            transport,
            identity: IdentityStore::new(store, config.storage.clone()),
            config,
            state: RwLock::new(HandshakeState::Idle),
            exchange_lock: Mutex::new(()),
            reset_epoch: AtomicU64::new(0),
        }
    }

    /// The stable client identifier, created on first use
    pub async fn client_id(&self) -> ClientResult<String> {
        self.identity.get_or_create_client_id().await
    }

    /// The current session key, if one is persisted
    pub async fn aes_key(&self) -> ClientResult<Option<String>> {
        self.identity.session_key().await
    }

    /// Whether a session key is currently available
    pub async fn is_key_exchanged(&self) -> ClientResult<bool> {
        Ok(self.identity.session_key().await?.is_some())
    }

    /// The handshake progress, for logging and tests
    pub async fn handshake_state(&self) -> HandshakeState {
        *self.state.read().await
    }

    /// Establish a session key with the server.
    ///
    /// Returns immediately when a key is already available. Under
    /// concurrent invocation exactly one handshake runs; the other callers
    /// wait for it and share its outcome.
    pub async fn exchange_key(&self) -> ClientResult<()> {
        if self.is_key_exchanged().await? {
            return Ok(());
        }

        let _guard = self.exchange_lock.lock().await;

        // a concurrent caller may have finished the exchange while we waited
        if self.is_key_exchanged().await? {
            return Ok(());
        }

        let epoch = self.reset_epoch.load(Ordering::SeqCst);
        *self.state.write().await = HandshakeState::InProgress;

        match self.run_handshake().await {
            Ok(key) => {
                if self.reset_epoch.load(Ordering::SeqCst) != epoch {
                    tracing::warn!("session cleared during key exchange; discarding new key");
                    *self.state.write().await = HandshakeState::Idle;
                    return Ok(());
                }

                self.identity.set_session_key(key.expose()).await?;
                *self.state.write().await = HandshakeState::Established;
                tracing::info!("key exchange complete");
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    /// Clear the session key, keeping the client identifier.
    ///
    /// This is the logout path and a cancellation boundary: a handshake in
    /// flight when this is called will discard its result.
    pub async fn clear_keys(&self) -> ClientResult<()> {
        self.reset_epoch.fetch_add(1, Ordering::SeqCst);
        self.identity.clear_session_key().await?;
        *self.state.write().await = HandshakeState::Idle;
        tracing::info!("session key cleared");
        Ok(())
    }

    /// Discard both the session key and the client identifier. The next
    /// handshake runs under a freshly generated identity.
    pub async fn reset_identity(&self) -> ClientResult<()> {
        self.reset_epoch.fetch_add(1, Ordering::SeqCst);
        self.identity.reset().await?;
        *self.state.write().await = HandshakeState::Idle;
        tracing::warn!("client identity reset");
        Ok(())
    }

    /// Run the four handshake steps and return the new key on success.
    /// The key is not yet persisted when this returns.
    async fn run_handshake(&self) -> ClientResult<SessionKey> {
        let client_id = self.identity.get_or_create_client_id().await?;
        tracing::info!("starting key exchange");

        // step 1: fetch the server public key (never cached; a rotated
        // server key must be picked up by the next handshake)
        let request = HttpRequest::get(&self.config.public_key_path)
            .with_header(&self.config.client_id_header, &client_id);
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| HandshakeError::PublicKeyUnavailable(e.to_string()))?;
        if !response.is_success() {
            return Err(
                HandshakeError::PublicKeyUnavailable(format!("status {}", response.status)).into(),
            );
        }
        let public_key: PublicKeyResponse = response
            .parse_body()
            .map_err(|e| HandshakeError::PublicKeyUnavailable(e.to_string()))?;

        // step 2: generate the session key locally
        let key = SessionKey::generate();

        // step 3: wrap it under the server public key
        let encrypted_aes_key = asymmetric::encrypt(key.expose(), &public_key.public_key)
            .map_err(|e| HandshakeError::EncryptionFailed(e.to_string()))?;

        // step 4: register the wrapped key under our client identifier
        let body = serde_json::to_value(ExchangeKeyRequest {
            client_id: &client_id,
            encrypted_aes_key: &encrypted_aes_key,
        })?;
        let request = HttpRequest::post(&self.config.exchange_key_path)
            .with_header(&self.config.client_id_header, &client_id)
            .with_body(body);
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| HandshakeError::ServerRejected(e.to_string()))?;
        if !response.is_success() {
            return Err(
                HandshakeError::ServerRejected(format!("status {}", response.status)).into(),
            );
        }
        let ack: ExchangeKeyResponse = response
            .parse_body()
            .map_err(|e| HandshakeError::ServerRejected(e.to_string()))?;
        if !ack.success {
            return Err(
                HandshakeError::ServerRejected("server did not acknowledge the key".to_string())
                    .into(),
            );
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Mutex as StdMutex, OnceLock};

    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::{Oaep, RsaPrivateKey};
    use serde_json::json;
    use sha2::Sha256;
    use tokio::sync::Notify;

    use super::*;
    use crate::api::transport::mock::MockTransport;
    use crate::api::transport::HttpResponse;
    use crate::error::ClientError;
    use crate::store::MemoryKeyStore;

    fn server_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap())
    }

    fn server_key_pem() -> String {
        server_key()
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap()
    }

    fn config() -> Arc<TransportConfig> {
        Arc::new(TransportConfig::new("https://api.example.com").unwrap())
    }

    fn manager(transport: Arc<dyn Transport>) -> KeyManager {
        KeyManager::new(transport, Arc::new(MemoryKeyStore::new()), config())
    }

    /// Handler answering both handshake endpoints, recording the key the
    /// server would decrypt.
    fn handshake_handler(
        registered: Arc<StdMutex<Option<String>>>,
    ) -> impl Fn(&HttpRequest) -> ClientResult<HttpResponse> + Send + Sync {
        move |request| match request.path.as_str() {
            "/auth/public-key" => Ok(HttpResponse::ok(json!({"publicKey": server_key_pem()}))),
            "/auth/exchange-key" => {
                let body = request.body.as_ref().unwrap();
                let wrapped = body["encryptedAesKey"].as_str().unwrap();
                let ciphertext = BASE64.decode(wrapped).unwrap();
                let key = server_key().decrypt(Oaep::new::<Sha256>(), &ciphertext).unwrap();
                *registered.lock().unwrap() = Some(String::from_utf8(key).unwrap());
                Ok(HttpResponse::ok(json!({"success": true})))
            }
            other => panic!("unexpected request to {other}"),
        }
    }

    #[tokio::test]
    async fn test_successful_exchange_persists_server_held_key() {
        let registered = Arc::new(StdMutex::new(None));
        let transport = Arc::new(MockTransport::new(handshake_handler(registered.clone())));
        let manager = manager(transport.clone());

        assert!(!manager.is_key_exchanged().await.unwrap());
        manager.exchange_key().await.unwrap();

        assert!(manager.is_key_exchanged().await.unwrap());
        assert_eq!(manager.handshake_state().await, HandshakeState::Established);

        // the key the server decrypted is the key we persisted
        let local = manager.aes_key().await.unwrap().unwrap();
        assert_eq!(local.len(), 64);
        assert_eq!(registered.lock().unwrap().as_deref(), Some(local.as_str()));

        // both handshake requests carried the client identifier
        let client_id = manager.client_id().await.unwrap();
        for request in transport.requests() {
            assert_eq!(request.header("x-client-id"), Some(client_id.as_str()));
        }
    }

    #[tokio::test]
    async fn test_exchange_is_idempotent() {
        let registered = Arc::new(StdMutex::new(None));
        let transport = Arc::new(MockTransport::new(handshake_handler(registered)));
        let manager = manager(transport.clone());

        manager.exchange_key().await.unwrap();
        let key = manager.aes_key().await.unwrap();
        assert_eq!(transport.request_count(), 2);

        manager.exchange_key().await.unwrap();

        // no further traffic, same key
        assert_eq!(transport.request_count(), 2);
        assert_eq!(manager.aes_key().await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_concurrent_exchange_runs_one_handshake() {
        let registered = Arc::new(StdMutex::new(None));
        let transport = Arc::new(MockTransport::new(handshake_handler(registered)));
        let manager = Arc::new(manager(transport.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.exchange_key().await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // one public key fetch plus one registration, no duplicates
        assert_eq!(transport.request_count(), 2);
        assert_eq!(manager.handshake_state().await, HandshakeState::Established);
    }

    #[tokio::test]
    async fn test_public_key_unavailable() {
        let transport = Arc::new(MockTransport::new(|_| {
            Ok(HttpResponse {
                status: 503,
                body: None,
            })
        }));
        let manager = manager(transport);

        let result = manager.exchange_key().await;

        assert!(matches!(
            result,
            Err(ClientError::Handshake(HandshakeError::PublicKeyUnavailable(_)))
        ));
        assert_eq!(manager.handshake_state().await, HandshakeState::Failed);
        assert!(!manager.is_key_exchanged().await.unwrap());
    }

    #[tokio::test]
    async fn test_server_rejection_discards_key() {
        let transport = Arc::new(MockTransport::new(|request| {
            match request.path.as_str() {
                "/auth/public-key" => Ok(HttpResponse::ok(json!({"publicKey": server_key_pem()}))),
                _ => Ok(HttpResponse::ok(json!({"success": false}))),
            }
        }));
        let manager = manager(transport);

        let result = manager.exchange_key().await;

        assert!(matches!(
            result,
            Err(ClientError::Handshake(HandshakeError::ServerRejected(_)))
        ));
        assert_eq!(manager.handshake_state().await, HandshakeState::Failed);
        assert!(!manager.is_key_exchanged().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_public_key_is_encryption_failure() {
        let transport = Arc::new(MockTransport::new(|request| {
            match request.path.as_str() {
                "/auth/public-key" => Ok(HttpResponse::ok(json!({"publicKey": "not a pem"}))),
                _ => Ok(HttpResponse::ok(json!({"success": true}))),
            }
        }));
        let manager = manager(transport.clone());

        let result = manager.exchange_key().await;

        assert!(matches!(
            result,
            Err(ClientError::Handshake(HandshakeError::EncryptionFailed(_)))
        ));
        // the wrapped key never left the client
        assert_eq!(transport.request_count(), 1);
        assert!(!manager.is_key_exchanged().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_exchange_keeps_previous_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_seen = calls.clone();
        let transport = Arc::new(MockTransport::new(move |_| {
            calls_seen.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 500,
                body: None,
            })
        }));

        let store = Arc::new(MemoryKeyStore::new());
        let manager = KeyManager::new(transport, store, config());

        // a working key is already persisted; exchange_key must not touch it
        let existing = "ab".repeat(32);
        manager.identity.set_session_key(&existing).await.unwrap();

        manager.exchange_key().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.aes_key().await.unwrap().unwrap(), existing);
    }

    #[tokio::test]
    async fn test_clear_keys_keeps_client_id() {
        let registered = Arc::new(StdMutex::new(None));
        let transport = Arc::new(MockTransport::new(handshake_handler(registered)));
        let manager = manager(transport);

        let client_id = manager.client_id().await.unwrap();
        manager.exchange_key().await.unwrap();

        manager.clear_keys().await.unwrap();

        assert!(!manager.is_key_exchanged().await.unwrap());
        assert_eq!(manager.handshake_state().await, HandshakeState::Idle);
        assert_eq!(manager.client_id().await.unwrap(), client_id);
    }

    /// Transport that stalls the exchange POST until released, so a test
    /// can clear state while the handshake is in flight.
    struct StallingTransport {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Transport for StallingTransport {
        async fn execute(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
            if request.path == "/auth/public-key" {
                return Ok(HttpResponse::ok(json!({"publicKey": server_key_pem()})));
            }
            self.started.notify_one();
            self.release.notified().await;
            Ok(HttpResponse::ok(json!({"success": true})))
        }
    }

    #[tokio::test]
    async fn test_clear_keys_discards_inflight_handshake() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = Arc::new(StallingTransport {
            started: started.clone(),
            release: release.clone(),
        });
        let manager = Arc::new(manager(transport));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.exchange_key().await })
        };

        // wait until the handshake reached the server, then log out
        started.notified().await;
        manager.clear_keys().await.unwrap();
        release.notify_one();

        task.await.unwrap().unwrap();

        // the late success must not repopulate session state
        assert!(!manager.is_key_exchanged().await.unwrap());
        assert_eq!(manager.handshake_state().await, HandshakeState::Idle);
    }
}

//! Encrypted request pipeline
//!
//! Every outgoing call passes through the same chain: attach the client
//! identity header, establish a session key if none is active, encrypt the
//! body, send, decrypt the response, and recover when the server reports
//! the key invalid. Calling code never sees the encryption in the success
//! path; crypto and handshake problems are absorbed here and converted
//! into fallback behavior.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::config::TransportConfig;
use crate::crypto::symmetric;
use crate::error::{ClientError, ClientResult};
use crate::exchange::KeyManager;
use crate::models::EncryptedEnvelope;
use crate::store::KeyValueStore;

/// Callback invoked after the session key was re-established following a
/// server-side invalidation. The application should discard and reload all
/// state derived from earlier responses.
pub type SessionResetHook = Arc<dyn Fn() + Send + Sync>;

/// API client applying transparent transport encryption
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    keys: Arc<KeyManager>,
    config: Arc<TransportConfig>,
    session_reset: Option<SessionResetHook>,
}

impl ApiClient {
    /// Create a client over a `reqwest` transport
    pub fn new(config: TransportConfig, store: Arc<dyn KeyValueStore>) -> ClientResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::with_transport(config, store, transport))
    }

    /// Create a client over a custom transport
    pub fn with_transport(
        config: TransportConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = Arc::new(config);
        let keys = Arc::new(KeyManager::new(
            Arc::clone(&transport),
            store,
            Arc::clone(&config),
        ));

        Self {
            transport,
            keys,
            config,
            session_reset: None,
        }
    }

    /// Register the application's reload callback for key-invalidation
    /// recovery
    pub fn on_session_reset(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.session_reset = Some(Arc::new(hook));
        self
    }

    /// The session key manager backing this client
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// GET a typed value
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let value = self.execute(Method::GET, path, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// POST a body, returning a typed value
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let value = self
            .execute(Method::POST, path, Some(serde_json::to_value(body)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Run one request through the full pipeline
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ClientResult<Value> {
        let exempt = self.config.is_exempt(path);
        let client_id = self.keys.client_id().await?;

        let mut request = HttpRequest::new(method, path)
            .with_header(&self.config.client_id_header, &client_id);
        request.body = body;

        if !exempt {
            self.ensure_session_key().await?;
            request.body = self.encrypt_body(path, request.body).await?;
        }

        let response = self.transport.execute(request).await?;

        // the exemption list bypasses encryption, not invalidation
        // recovery: the server may flag a dead session on any endpoint
        if self.is_key_invalidation(&response) {
            return self.recover_invalid_key(&response).await;
        }

        let status = response.status;
        let success = response.is_success();
        let body = if exempt {
            response.body
        } else {
            self.decrypt_body(path, response.body).await?
        };

        if !success {
            return Err(ClientError::Api {
                status,
                message: error_message(body.as_ref()),
            });
        }

        Ok(body.unwrap_or(Value::Null))
    }

    /// Establish a session key before an encrypted call, retrying a bounded
    /// number of times. After the first failed attempt the stored identity
    /// is discarded so the retry runs under a fresh client id; after the
    /// final failure the request proceeds unencrypted.
    async fn ensure_session_key(&self) -> ClientResult<()> {
        for attempt in 1..=self.config.handshake_attempts {
            if self.keys.is_key_exchanged().await? {
                return Ok(());
            }

            match self.keys.exchange_key().await {
                Ok(()) => {}
                Err(e) if attempt < self.config.handshake_attempts => {
                    tracing::warn!(
                        "key exchange attempt {attempt} failed ({e}); resetting client identity"
                    );
                    self.keys.reset_identity().await?;
                }
                Err(e) => {
                    tracing::warn!(
                        "key exchange failed after {attempt} attempts ({e}); \
                         proceeding without encryption"
                    );
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Wrap the outgoing body in an envelope. An encryption failure is
    /// logged and the plaintext body is sent rather than failing the call.
    async fn encrypt_body(&self, path: &str, body: Option<Value>) -> ClientResult<Option<Value>> {
        let Some(body) = body else {
            return Ok(None);
        };
        let Some(key) = self.keys.aes_key().await? else {
            return Ok(Some(body));
        };

        match symmetric::encrypt(&body.to_string(), &key) {
            Ok(encrypted) => {
                tracing::debug!("encrypted request body for {path}");
                Ok(Some(serde_json::to_value(EncryptedEnvelope { encrypted })?))
            }
            Err(e) => {
                tracing::error!("failed to encrypt request body for {path}: {e}");
                Ok(Some(body))
            }
        }
    }

    /// Unwrap an enveloped response body. Without a usable key the envelope
    /// is surfaced as-is; a decryption failure additionally clears the
    /// session key so the next call re-handshakes.
    async fn decrypt_body(&self, path: &str, body: Option<Value>) -> ClientResult<Option<Value>> {
        let Some(body) = body else {
            return Ok(None);
        };
        let Some(envelope) = body.get("encrypted").and_then(Value::as_str) else {
            return Ok(Some(body));
        };

        let Some(key) = self.keys.aes_key().await? else {
            tracing::warn!("encrypted response for {path} but no local session key; resetting identity");
            self.keys.reset_identity().await?;
            return Ok(Some(body));
        };

        match symmetric::decrypt(envelope, &key) {
            Ok(plaintext) => {
                tracing::debug!("decrypted response body for {path}");
                Ok(Some(serde_json::from_str(&plaintext)?))
            }
            Err(e) => {
                tracing::warn!("failed to decrypt response for {path} ({e}); clearing session key");
                self.keys.clear_keys().await?;
                Ok(Some(body))
            }
        }
    }

    fn is_key_invalidation(&self, response: &HttpResponse) -> bool {
        if response.status == self.config.key_invalid_status {
            return true;
        }
        response
            .body
            .as_ref()
            .and_then(|body| body.get(&self.config.key_invalid_flag))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The server no longer accepts our session key. Negotiate a new one
    /// under the same client identifier and tell the application to reload;
    /// the original request is not retried because state derived under the
    /// old key is no longer trustworthy.
    async fn recover_invalid_key(&self, response: &HttpResponse) -> ClientResult<Value> {
        tracing::warn!("server reports session key invalid; re-exchanging");
        self.keys.clear_keys().await?;

        match self.keys.exchange_key().await {
            Ok(()) => {
                tracing::info!("session key re-established");
                if let Some(hook) = &self.session_reset {
                    hook();
                }
                Err(ClientError::SessionRestarted)
            }
            Err(e) => {
                tracing::error!("re-exchange after key invalidation failed: {e}");
                Err(ClientError::Api {
                    status: response.status,
                    message: error_message(response.body.as_ref()),
                })
            }
        }
    }
}

fn error_message(body: Option<&Value>) -> String {
    body.and_then(|b| b.get("error").or_else(|| b.get("message")))
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string()
}

//! Error types for the transport client

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::exchange::HandshakeError;

/// Client-wide error type
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key exchange error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The server invalidated the session key and a fresh key was
    /// negotiated. Client-side state derived under the old session is
    /// stale; the application must reload before issuing further requests.
    #[error("Session key re-established; application state must be reloaded")]
    SessionRestarted,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

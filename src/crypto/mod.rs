//! Transport encryption primitives
//!
//! This module provides the cryptographic building blocks for the
//! encrypted transport session:
//!
//! - **asymmetric**: RSA-OAEP wrapping of the session key under the
//!   server's public key during the handshake
//! - **symmetric**: AES-256-CBC envelope encryption of request/response
//!   bodies under the established session key
//! - **keys**: CSPRNG generation of client identifiers and session keys
//! - **errors**: the `CryptoError` taxonomy shared by all of the above

pub mod asymmetric;
pub mod errors;
pub mod keys;
pub mod symmetric;

// Re-export commonly used types
pub use errors::{CryptoError, CryptoResult};
pub use keys::{generate_client_id, SessionKey, CLIENT_ID_LEN};

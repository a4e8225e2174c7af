//! RSA-OAEP key wrapping
//!
//! Encrypts the session key under the server's public key during the
//! handshake. The server publishes a PEM-encoded SPKI public key; only the
//! server holds the matching private key, so no decrypt path exists here
//! outside of tests.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;

use crate::crypto::errors::{CryptoError, CryptoResult};

/// Encrypt a short plaintext (the hex session key) under a PEM public key.
///
/// Uses OAEP padding with SHA-256. Returns standard base64. Payloads here
/// are at most 64 bytes, well inside the OAEP limit for a 2048-bit key.
pub fn encrypt(plaintext: &str, public_key_pem: &str) -> CryptoResult<String> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| CryptoError::InvalidKey(format!("not a valid SPKI public key: {e}")))?;

    let ciphertext = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(BASE64.encode(ciphertext))
}

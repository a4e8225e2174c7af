//! Key material generation
//!
//! Random identifiers and session keys, all sourced from the operating
//! system CSPRNG.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a client identifier in characters
pub const CLIENT_ID_LEN: usize = 32;

/// Length of a session key in bytes (AES-256)
pub const SESSION_KEY_LEN: usize = 32;

/// A freshly generated AES-256 session key, hex-encoded.
///
/// The key is zeroed on drop so that a handshake that fails partway through
/// does not leave the candidate key lingering in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(String);

impl SessionKey {
    /// Generate a new random 256-bit key (64 hex characters)
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let key = Self(hex::encode(bytes));
        bytes.zeroize();
        key
    }

    /// The hex-encoded key material
    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// Generate a random alphanumeric client identifier (32 characters)
pub fn generate_client_id() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}

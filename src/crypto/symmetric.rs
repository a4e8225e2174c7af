//! AES-256-CBC payload encryption
//!
//! Encrypts JSON payloads under the session key established by the key
//! exchange. Output is the wire envelope string `base64(iv):base64(ct)`,
//! which the server produces and consumes in the same format.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::SESSION_KEY_LEN;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

/// Encrypt a plaintext under a hex-encoded 256-bit key.
///
/// A fresh random IV is generated on every call; reusing an IV under the
/// same key breaks CBC confidentiality, so there is deliberately no way to
/// supply one.
pub fn encrypt(plaintext: &str, key_hex: &str) -> CryptoResult<String> {
    let key = decode_key(key_hex)
        .map_err(|e| CryptoError::EncryptionFailed(format!("bad session key: {e}")))?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!("{}:{}", BASE64.encode(iv), BASE64.encode(ciphertext)))
}

/// Decrypt an envelope string (`base64(iv):base64(ct)`) under a hex-encoded key.
///
/// Every failure mode — malformed envelope, wrong key, padding mismatch,
/// non-UTF-8 plaintext — maps to [`CryptoError::DecryptionFailed`].
pub fn decrypt(envelope: &str, key_hex: &str) -> CryptoResult<String> {
    let key = decode_key(key_hex)
        .map_err(|e| CryptoError::DecryptionFailed(format!("bad session key: {e}")))?;

    let (iv_b64, ct_b64) = envelope
        .split_once(':')
        .ok_or_else(|| CryptoError::DecryptionFailed("missing IV separator".to_string()))?;

    let iv: [u8; IV_LEN] = BASE64
        .decode(iv_b64)
        .map_err(|e| CryptoError::DecryptionFailed(format!("bad IV encoding: {e}")))?
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed("IV must be 16 bytes".to_string()))?;

    let ciphertext = BASE64
        .decode(ct_b64)
        .map_err(|e| CryptoError::DecryptionFailed(format!("bad ciphertext encoding: {e}")))?;

    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("padding validation failed".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("plaintext is not valid UTF-8".to_string()))
}

fn decode_key(key_hex: &str) -> Result<[u8; SESSION_KEY_LEN], String> {
    let bytes = hex::decode(key_hex).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|_| format!("key must be {SESSION_KEY_LEN} bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::SessionKey;

    #[test]
    fn test_round_trip() {
        let key = SessionKey::generate();
        let plaintext = r#"{"name":"alice","roles":["admin"]}"#;

        let envelope = encrypt(plaintext, key.expose()).unwrap();
        let decrypted = decrypt(&envelope, key.expose()).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_envelope_shape() {
        let key = SessionKey::generate();
        let envelope = encrypt("hello", key.expose()).unwrap();

        let (iv_b64, ct_b64) = envelope.split_once(':').unwrap();
        assert_eq!(BASE64.decode(iv_b64).unwrap().len(), 16);
        // PKCS7 pads "hello" to one full block
        assert_eq!(BASE64.decode(ct_b64).unwrap().len(), 16);
    }

    #[test]
    fn test_iv_is_fresh_per_call() {
        let key = SessionKey::generate();
        let plaintext = "same payload";

        let a = encrypt(plaintext, key.expose()).unwrap();
        let b = encrypt(plaintext, key.expose()).unwrap();

        assert_ne!(a, b);
        assert_eq!(decrypt(&a, key.expose()).unwrap(), plaintext);
        assert_eq!(decrypt(&b, key.expose()).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = SessionKey::generate();
        let other = SessionKey::generate();

        let envelope = encrypt(r#"{"ok":true}"#, key.expose()).unwrap();
        let result = decrypt(&envelope, other.expose());

        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_malformed_envelope_fails() {
        let key = SessionKey::generate();

        for envelope in ["no separator", "!!!:also-not-base64", ":", "YWJj:YWJj"] {
            let result = decrypt(envelope, key.expose());
            assert!(
                matches!(result, Err(CryptoError::DecryptionFailed(_))),
                "expected DecryptionFailed for {envelope:?}"
            );
        }
    }

    #[test]
    fn test_malformed_key_fails_encrypt() {
        let result = encrypt("data", "not-hex");
        assert!(matches!(result, Err(CryptoError::EncryptionFailed(_))));

        let result = encrypt("data", "abcd"); // valid hex, wrong length
        assert!(matches!(result, Err(CryptoError::EncryptionFailed(_))));
    }
}

//! Wire types shared between the key exchange and the request pipeline

use serde::{Deserialize, Serialize};

/// Wire wrapper substituting for a plaintext JSON body when encryption is
/// active. The payload string is `base64(iv):base64(ciphertext)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub encrypted: String,
}

/// Response from the public key endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    /// PEM-encoded (SPKI) RSA public key
    pub public_key: String,
}

/// Request body registering the wrapped session key with the server
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeKeyRequest<'a> {
    pub client_id: &'a str,
    /// Session key encrypted under the server public key, base64
    pub encrypted_aes_key: &'a str,
}

/// Acknowledgment from the exchange endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeKeyResponse {
    #[serde(default)]
    pub success: bool,
}

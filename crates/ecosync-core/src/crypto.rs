// ── Queued payload sealing ──
//
// Payloads in the mutation queue are encrypted at rest with ChaCha20-Poly1305.
// The key is the SHA-256 digest of a configured secret. Sealed bytes are
// `nonce (12 bytes) || ciphertext`, so every record carries its own nonce.

use std::fmt;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::queue::MutationPayload;

/// Secret used when none is configured.
pub const DEFAULT_QUEUE_SECRET: &str = "ecosync-offline-queue-v1";

const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 cipher for queued payloads.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: ChaCha20Poly1305,
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadCipher { .. }")
    }
}

impl Default for PayloadCipher {
    fn default() -> Self {
        Self::from_secret(&SecretString::from(DEFAULT_QUEUE_SECRET.to_owned()))
    }
}

impl PayloadCipher {
    /// Derive the key from `secret`.
    pub fn from_secret(secret: &SecretString) -> Self {
        let digest = Sha256::digest(secret.expose_secret().as_bytes());
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(digest.as_slice())),
        }
    }

    /// Encrypt under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CoreError::Crypto {
                message: format!("payload encryption failed: {e}"),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt bytes produced by [`seal`](Self::seal). Fails on a wrong key
    /// or tampered data.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(CoreError::Crypto {
                message: "sealed payload shorter than its nonce".into(),
            });
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CoreError::Crypto {
                message: format!("payload decryption failed: {e}"),
            })
    }
}

/// Hex SHA-256 of a payload's JSON encoding. Two writes with the same
/// parameters hash the same.
pub fn params_hash(payload: &MutationPayload) -> Result<String, CoreError> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

//! AES-256-GCM encryption for backup payloads.
//!
//! Wire format: hex(nonce || ciphertext) with a random 12-byte nonce, so a
//! payload is a plain text column in the database.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    InvalidKey,
    #[error("payload is not valid hex")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("payload shorter than the nonce")]
    TooShort,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed: wrong key or corrupted payload")]
    DecryptFailed,
}

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn new(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKey)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce_bytes: [u8; 12] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;
        let mut raw = nonce_bytes.to_vec();
        raw.extend_from_slice(&ciphertext);
        Ok(hex::encode(raw))
    }

    pub fn decrypt(&self, payload_hex: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = hex::decode(payload_hex)?;
        if raw.len() < 12 {
            return Err(CryptoError::TooShort);
        }
        let (nonce, ciphertext) = raw.split_at(12);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

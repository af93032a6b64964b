//! Authenticated encryption.
//!
//! Two AEAD ciphers are supported, both with 32-byte keys and 12-byte
//! nonces. The set is closed, so it is a plain enum rather than a trait.
//!
//! # Blob format
//!
//! ```text
//! [nonce:12][ciphertext‖tag:variable]
//! ```
//!
//! Every call draws a fresh nonce from the system CSPRNG. Nonce reuse under
//! one key breaks both ciphers, so there is no caller-supplied-nonce path.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, Result};
use crate::keys::EncryptionKey;

/// Nonce length shared by both supported ciphers.
pub const NONCE_LEN: usize = 12;

/// The supported AEAD ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-256 in Galois/Counter Mode.
    Aes256Gcm,
    /// ChaCha20 stream cipher with Poly1305 authenticator.
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Canonical algorithm name, as recorded in encrypted blobs.
    pub fn name(self) -> &'static str {
        match self {
            AeadAlgorithm::Aes256Gcm => "AES-256-GCM",
            AeadAlgorithm::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }

    /// Parses a blob's recorded algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AES-256-GCM" => Some(AeadAlgorithm::Aes256Gcm),
            "ChaCha20-Poly1305" => Some(AeadAlgorithm::ChaCha20Poly1305),
            _ => None,
        }
    }
}

impl std::fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An AEAD cipher bound to one key.
///
/// [`KeyManager`](crate::KeyManager) constructs these per key; callers that
/// manage their own key material can use one directly.
#[derive(Clone)]
pub struct Encryptor {
    algorithm: AeadAlgorithm,
    key: EncryptionKey,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches Debug output.
        f.debug_struct("Encryptor")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Encryptor {
    /// Creates an encryptor for the given cipher and key.
    pub fn new(algorithm: AeadAlgorithm, key: EncryptionKey) -> Self {
        Self { algorithm, key }
    }

    /// Returns the canonical algorithm name.
    pub fn algorithm(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Encrypts `plaintext`, returning `nonce ‖ ciphertext ‖ tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = match self.algorithm {
            AeadAlgorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(self.key.as_bytes()).map_err(|e| {
                    CryptoError::EncryptionFailed {
                        reason: e.to_string(),
                    }
                })?;
                cipher
                    .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
                    .map_err(|_| CryptoError::EncryptionFailed {
                        reason: "AES-256-GCM encryption failed".into(),
                    })?
            }
            AeadAlgorithm::ChaCha20Poly1305 => {
                let cipher =
                    ChaCha20Poly1305::new_from_slice(self.key.as_bytes()).map_err(|e| {
                        CryptoError::EncryptionFailed {
                            reason: e.to_string(),
                        }
                    })?;
                cipher
                    .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
                    .map_err(|_| CryptoError::EncryptionFailed {
                        reason: "ChaCha20-Poly1305 encryption failed".into(),
                    })?
            }
        };

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypts a `nonce ‖ ciphertext ‖ tag` blob.
    ///
    /// Fails with [`CryptoError::DecryptionFailed`] on a truncated blob, a
    /// wrong key, or any tampering with the ciphertext or tag.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionFailed {
                reason: format!("blob too short for nonce: {} bytes", blob.len()),
            });
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        match self.algorithm {
            AeadAlgorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(self.key.as_bytes()).map_err(|e| {
                    CryptoError::DecryptionFailed {
                        reason: e.to_string(),
                    }
                })?;
                cipher
                    .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| CryptoError::DecryptionFailed {
                        reason: "authentication failed: ciphertext tampered or wrong key".into(),
                    })
            }
            AeadAlgorithm::ChaCha20Poly1305 => {
                let cipher =
                    ChaCha20Poly1305::new_from_slice(self.key.as_bytes()).map_err(|e| {
                        CryptoError::DecryptionFailed {
                            reason: e.to_string(),
                        }
                    })?;
                cipher
                    .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| CryptoError::DecryptionFailed {
                        reason: "authentication failed: ciphertext tampered or wrong key".into(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(AeadAlgorithm::Aes256Gcm)]
    #[test_case(AeadAlgorithm::ChaCha20Poly1305)]
    fn roundtrip(algorithm: AeadAlgorithm) {
        let enc = Encryptor::new(algorithm, EncryptionKey::generate());
        let plaintext = b"patient admitted to ward 7";

        let blob = enc.encrypt(plaintext).unwrap();
        assert_ne!(&blob[NONCE_LEN..], plaintext.as_slice());

        let decrypted = enc.decrypt(&blob).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test_case(AeadAlgorithm::Aes256Gcm)]
    #[test_case(AeadAlgorithm::ChaCha20Poly1305)]
    fn tampered_last_byte_fails(algorithm: AeadAlgorithm) {
        let enc = Encryptor::new(algorithm, EncryptionKey::generate());
        let mut blob = enc.encrypt(b"audit payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        let err = enc.decrypt(&blob).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed { .. }));
    }

    #[test]
    fn wrong_key_fails() {
        let enc = Encryptor::new(AeadAlgorithm::Aes256Gcm, EncryptionKey::generate());
        let other = Encryptor::new(AeadAlgorithm::Aes256Gcm, EncryptionKey::generate());
        let blob = enc.encrypt(b"secret").unwrap();
        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn nonces_are_fresh_per_call() {
        let enc = Encryptor::new(AeadAlgorithm::ChaCha20Poly1305, EncryptionKey::generate());
        let a = enc.encrypt(b"same input").unwrap();
        let b = enc.encrypt(b"same input").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let enc = Encryptor::new(AeadAlgorithm::Aes256Gcm, EncryptionKey::generate());
        let err = enc.decrypt(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed { .. }));
    }

    #[test]
    fn algorithm_names_roundtrip() {
        for alg in [AeadAlgorithm::Aes256Gcm, AeadAlgorithm::ChaCha20Poly1305] {
            assert_eq!(AeadAlgorithm::from_name(alg.name()), Some(alg));
        }
        assert_eq!(AeadAlgorithm::from_name("ROT13"), None);
    }
}

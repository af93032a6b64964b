//! Encryption key lifecycle.
//!
//! A [`KeyManager`] owns the current encryption key and every key it has ever
//! used, addressed by an 8-byte [`KeyId`] derived from the key material. The
//! current key rotates automatically after a configurable number of
//! encryptions; historical keys stay in the table so old blobs remain
//! decryptable for their full retention period.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::{AeadAlgorithm, Encryptor};
use crate::error::{CryptoError, Result};
use crate::hash::sha256;

/// Length of every symmetric key, in bytes.
pub const KEY_LEN: usize = 32;

/// Minimum accepted key-derivation salt length, in bytes.
pub const MIN_SALT_LEN: usize = 16;

/// Encryptions under one key before the manager rotates to a fresh one.
pub const DEFAULT_ROTATE_AFTER: u64 = 1_000_000;

// ============================================================================
// Key material
// ============================================================================

/// A 32-byte symmetric encryption key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey({})", self.id())
    }
}

impl EncryptionKey {
    /// Draws a fresh key from the system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps existing key material.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Wraps a slice, failing unless it is exactly [`KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The key's address: the first 8 bytes of SHA-256 over the key material.
    pub fn id(&self) -> KeyId {
        let digest = sha256(&self.0);
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        KeyId(id)
    }
}

/// 8-byte key address derived from the key material.
///
/// Serialized as lowercase hex on every wire format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId([u8; 8]);

impl KeyId {
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Parses the hex form produced by `Display`.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| CryptoError::KeyEncoding {
            reason: format!("bad key id hex: {e}"),
        })?;
        let bytes: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::KeyEncoding {
                reason: format!("key id must be 8 bytes, got {}", bytes.len()),
            })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyId({self})")
    }
}

impl Serialize for KeyId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        KeyId::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Encrypted blobs
// ============================================================================

/// Output of [`KeyManager::encrypt`]: the ciphertext plus everything needed
/// to decrypt it later, whichever key generation produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    /// Canonical AEAD algorithm name.
    pub algorithm: String,
    /// `nonce ‖ ciphertext ‖ tag`.
    pub ciphertext: Vec<u8>,
    /// Address of the key that encrypted this blob.
    pub key_id: KeyId,
}

// ============================================================================
// Key manager
// ============================================================================

#[derive(Debug)]
struct KeyTable {
    current: EncryptionKey,
    current_id: KeyId,
    /// Every key this manager has ever used, current included.
    historical: HashMap<KeyId, EncryptionKey>,
    /// Encryptions performed under the current key.
    encryptions: u64,
}

/// Owns the current encryption key and the table of all keys ever used.
///
/// Rotation happens inline on the encrypt path once the per-key encryption
/// counter reaches `rotate_after`; the superseded key is retained so
/// historical blobs keep decrypting.
#[derive(Debug)]
pub struct KeyManager {
    algorithm: AeadAlgorithm,
    rotate_after: u64,
    table: Mutex<KeyTable>,
}

impl KeyManager {
    /// Creates a manager with a freshly generated key.
    pub fn new(algorithm: AeadAlgorithm) -> Self {
        Self::with_key(algorithm, EncryptionKey::generate())
    }

    /// Creates a manager seeded with caller-provided key material.
    pub fn with_key(algorithm: AeadAlgorithm, key: EncryptionKey) -> Self {
        let current_id = key.id();
        let mut historical = HashMap::new();
        historical.insert(current_id, key.clone());
        Self {
            algorithm,
            rotate_after: DEFAULT_ROTATE_AFTER,
            table: Mutex::new(KeyTable {
                current: key,
                current_id,
                historical,
                encryptions: 0,
            }),
        }
    }

    /// Overrides the rotation threshold.
    pub fn with_rotate_after(mut self, rotate_after: u64) -> Self {
        self.rotate_after = rotate_after.max(1);
        self
    }

    /// The AEAD cipher this manager encrypts with.
    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    /// Address of the current key generation.
    pub fn current_key_id(&self) -> KeyId {
        self.table.lock().expect("key table mutex poisoned").current_id
    }

    /// Number of key generations held (current plus historical).
    pub fn key_count(&self) -> usize {
        self.table
            .lock()
            .expect("key table mutex poisoned")
            .historical
            .len()
    }

    /// Encrypts `plaintext` under the current key, rotating first if the
    /// current key has reached its encryption budget.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let (key, key_id) = {
            let mut table = self.table.lock().expect("key table mutex poisoned");
            if table.encryptions >= self.rotate_after {
                let fresh = EncryptionKey::generate();
                let fresh_id = fresh.id();
                table.historical.insert(fresh_id, fresh.clone());
                tracing::info!(
                    old_key = %table.current_id,
                    new_key = %fresh_id,
                    encryptions = table.encryptions,
                    "rotated encryption key"
                );
                table.current = fresh;
                table.current_id = fresh_id;
                table.encryptions = 0;
            }
            table.encryptions += 1;
            (table.current.clone(), table.current_id)
        };

        let ciphertext = Encryptor::new(self.algorithm, key).encrypt(plaintext)?;
        Ok(EncryptedBlob {
            algorithm: self.algorithm.name().to_string(),
            ciphertext,
            key_id,
        })
    }

    /// Decrypts a blob using whichever key generation produced it.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let algorithm = AeadAlgorithm::from_name(&blob.algorithm).ok_or_else(|| {
            CryptoError::DecryptionFailed {
                reason: format!("unknown algorithm {:?}", blob.algorithm),
            }
        })?;

        let key = {
            let table = self.table.lock().expect("key table mutex poisoned");
            table
                .historical
                .get(&blob.key_id)
                .cloned()
                .ok_or(CryptoError::KeyNotFound {
                    key_id: blob.key_id.to_string(),
                })?
        };

        Encryptor::new(algorithm, key).decrypt(&blob.ciphertext)
    }
}

// ============================================================================
// Key derivation
// ============================================================================

/// Derives key material from a passphrase with scrypt (N=32768, r=8, p=1).
///
/// The salt must be at least [`MIN_SALT_LEN`] bytes.
pub fn derive_key(passphrase: &[u8], salt: &[u8], out_len: usize) -> Result<Vec<u8>> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::SaltTooShort {
            min: MIN_SALT_LEN,
            actual: salt.len(),
        });
    }

    // log2(32768) = 15
    let params =
        scrypt::Params::new(15, 8, 1, out_len).map_err(|e| CryptoError::DerivationFailed {
            reason: e.to_string(),
        })?;

    let mut out = vec![0u8; out_len];
    scrypt::scrypt(passphrase, salt, &params, &mut out).map_err(|e| {
        CryptoError::DerivationFailed {
            reason: e.to_string(),
        }
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_stable_and_hex() {
        let key = EncryptionKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(key.id(), key.id());
        let rendered = key.id().to_string();
        assert_eq!(rendered.len(), 16);
        assert_eq!(KeyId::from_hex(&rendered).unwrap(), key.id());
    }

    #[test]
    fn from_slice_enforces_length() {
        let err = EncryptionKey::from_slice(&[1u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength { expected: 32, actual: 16 }
        ));
    }

    #[test]
    fn manager_roundtrip() {
        let manager = KeyManager::new(AeadAlgorithm::Aes256Gcm);
        let blob = manager.encrypt(b"protected health information").unwrap();
        assert_eq!(blob.algorithm, "AES-256-GCM");
        assert_eq!(blob.key_id, manager.current_key_id());
        assert_eq!(
            manager.decrypt(&blob).unwrap(),
            b"protected health information"
        );
    }

    #[test]
    fn rotation_keeps_old_blobs_decryptable() {
        let manager = KeyManager::new(AeadAlgorithm::ChaCha20Poly1305).with_rotate_after(3);
        let first_id = manager.current_key_id();

        let early = manager.encrypt(b"before rotation").unwrap();
        for _ in 0..5 {
            manager.encrypt(b"filler").unwrap();
        }

        assert_ne!(manager.current_key_id(), first_id, "key should have rotated");
        assert!(manager.key_count() >= 2);
        assert_eq!(manager.decrypt(&early).unwrap(), b"before rotation");
    }

    #[test]
    fn unknown_key_id_is_reported() {
        let manager = KeyManager::new(AeadAlgorithm::Aes256Gcm);
        let other = KeyManager::new(AeadAlgorithm::Aes256Gcm);
        let blob = other.encrypt(b"foreign").unwrap();

        let err = manager.decrypt(&blob).unwrap_err();
        assert!(matches!(err, CryptoError::KeyNotFound { .. }));
    }

    #[test]
    fn derive_key_rejects_short_salt() {
        let err = derive_key(b"passphrase", &[0u8; 8], 32).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::SaltTooShort { min: 16, actual: 8 }
        ));
    }

    #[test]
    fn derive_key_is_deterministic() {
        let salt = [42u8; 16];
        let a = derive_key(b"correct horse", &salt, 32).unwrap();
        let b = derive_key(b"correct horse", &salt, 32).unwrap();
        let c = derive_key(b"battery staple", &salt, 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}

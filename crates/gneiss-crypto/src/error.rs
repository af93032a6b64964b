//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// AEAD decryption failed (wrong key, tampered ciphertext, or malformed blob).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Decrypt referenced a key id the manager has never held.
    #[error("key not found: {key_id}")]
    KeyNotFound { key_id: String },

    /// Key material has the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Key-derivation salt is too short.
    #[error("salt too short: need at least {min} bytes, got {actual}")]
    SaltTooShort { min: usize, actual: usize },

    /// Key derivation failed (bad parameters or output length).
    #[error("key derivation failed: {reason}")]
    DerivationFailed { reason: String },

    /// Key generation failed.
    #[error("key generation failed: {reason}")]
    KeyGenerationFailed { reason: String },

    /// PEM encode/decode of a key failed.
    #[error("key encoding failed: {reason}")]
    KeyEncoding { reason: String },

    /// A signature did not verify.
    ///
    /// `position` is the zero-based index of the broken link when the failure
    /// came from walking a signature chain.
    #[error("signature invalid: {reason}")]
    SignatureInvalid {
        position: Option<usize>,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, CryptoError>;

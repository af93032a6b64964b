//! # gneiss-crypto: Cryptographic primitives for Gneiss
//!
//! Everything the sink needs to make persisted audit data confidential and
//! tamper-evident:
//!
//! - SHA-256 helpers for record and chain hashing ([`sha256`], [`chain_data`])
//! - AEAD encryption with AES-256-GCM or ChaCha20-Poly1305 ([`Encryptor`])
//! - Key lifecycle with automatic rotation ([`KeyManager`], [`derive_key`])
//! - Asymmetric signing with Ed25519 or RSA-PSS ([`Signer`])
//! - A hash-linked signature chain ([`SignatureChain`])
//!
//! All primitives wrap well-reviewed RustCrypto implementations; this crate
//! owns key handling, wire shapes, and the chaining discipline, never the
//! math.

mod aead;
mod chain;
mod error;
mod hash;
mod keys;
mod signer;

pub use aead::{AeadAlgorithm, Encryptor, NONCE_LEN};
pub use chain::{ChainVerification, ChainedSignature, SignatureChain};
pub use error::{CryptoError, Result};
pub use hash::{HASH_LEN, Hash32, ZERO_HASH, sha256, sha256_concat};
pub use keys::{
    DEFAULT_ROTATE_AFTER, EncryptedBlob, EncryptionKey, KEY_LEN, KeyId, KeyManager, MIN_SALT_LEN,
    derive_key,
};
pub use signer::{Signer, SignatureAlgorithm};

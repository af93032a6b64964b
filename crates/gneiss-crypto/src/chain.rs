//! Hash-linked signature chain.
//!
//! Each entry binds three things under one signature: the hash of the signed
//! payload, the hash of the previous payload, and the sequence number. Any
//! replacement, reordering, or deletion of an entry breaks every later link,
//! so verification pinpoints the first tampered position.
//!
//! The chain borrows its [`Signer`]: signing and verification take the signer
//! as an argument, and a chain must never mix signers. Start a new chain when
//! the signing key changes.

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::hash::{sha256, Hash32, ZERO_HASH};
use crate::signer::Signer;

mod hex32 {
    use super::Hash32;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash32, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("hash must be 32 bytes, got {}", bytes.len())))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(&text).map_err(serde::de::Error::custom)
    }
}

/// One signed link in the chain.
///
/// Hashes serialize as lowercase hex, the signature as base64; this is the
/// exact shape embedded in persisted compliance records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedSignature {
    /// Sequence number the signer bound into this link.
    pub sequence: u64,
    /// SHA-256 of the signed payload.
    #[serde(with = "hex32")]
    pub data_hash: Hash32,
    /// `data_hash` of the previous link; all zeros for the first.
    #[serde(with = "hex32")]
    pub prev_hash: Hash32,
    /// Detached signature over `prev_hash ‖ data_hash ‖ LE64(sequence)`.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// Canonical signature algorithm name.
    pub algorithm: String,
}

impl ChainedSignature {
    /// Verifies this link in isolation: the signature must cover
    /// `prev_hash ‖ data_hash ‖ LE64(sequence)` and `data` (when given) must
    /// hash to `data_hash`.
    ///
    /// Isolation means no chain-continuity check; use
    /// [`SignatureChain::verify_records`] to validate a full run.
    pub fn verify_standalone(&self, signer: &Signer, data: Option<&[u8]>) -> Result<()> {
        if let Some(data) = data {
            if sha256(data) != self.data_hash {
                return Err(CryptoError::SignatureInvalid {
                    position: None,
                    reason: "payload does not match signed data hash".to_string(),
                });
            }
        }
        let payload = chain_data(&self.prev_hash, &self.data_hash, self.sequence);
        signer.verify(&payload, &self.signature)
    }
}

/// Outcome of walking a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    /// True when every link verified.
    pub valid: bool,
    /// Number of links examined.
    pub total_signatures: usize,
    /// Sequence of the last link, if the chain is non-empty.
    pub last_sequence: Option<u64>,
    /// Zero-based position of the first broken link.
    pub failed_position: Option<usize>,
    /// Human-readable description of the break.
    pub error: Option<String>,
}

impl ChainVerification {
    fn ok(total: usize, last_sequence: Option<u64>) -> Self {
        Self {
            valid: true,
            total_signatures: total,
            last_sequence,
            failed_position: None,
            error: None,
        }
    }

    fn broken(total: usize, position: usize, reason: String) -> Self {
        Self {
            valid: false,
            total_signatures: total,
            last_sequence: None,
            failed_position: Some(position),
            error: Some(reason),
        }
    }
}

/// Append-only chain of signed payload hashes.
#[derive(Debug, Default)]
pub struct SignatureChain {
    last_hash: Hash32,
    signatures: Vec<ChainedSignature>,
}

/// Builds the byte string each link's signature covers.
fn chain_data(prev_hash: &Hash32, data_hash: &Hash32, sequence: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 32 + 8);
    buf.extend_from_slice(prev_hash);
    buf.extend_from_slice(data_hash);
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf
}

impl SignatureChain {
    /// Creates an empty chain seeded with the zero hash.
    pub fn new() -> Self {
        Self {
            last_hash: ZERO_HASH,
            signatures: Vec::new(),
        }
    }

    /// Number of links in the chain.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Hash the next link will chain from.
    pub fn last_hash(&self) -> &Hash32 {
        &self.last_hash
    }

    /// Sequence of the most recent link.
    pub fn last_sequence(&self) -> Option<u64> {
        self.signatures.last().map(|s| s.sequence)
    }

    /// All links, oldest first.
    pub fn signatures(&self) -> &[ChainedSignature] {
        &self.signatures
    }

    /// Signs `data` as the next link and returns the new entry.
    pub fn sign(&mut self, signer: &Signer, sequence: u64, data: &[u8]) -> Result<ChainedSignature> {
        let data_hash = sha256(data);
        let payload = chain_data(&self.last_hash, &data_hash, sequence);
        let signature = signer.sign(&payload)?;

        let entry = ChainedSignature {
            sequence,
            data_hash,
            prev_hash: self.last_hash,
            signature,
            algorithm: signer.algorithm().name().to_string(),
        };
        self.signatures.push(entry.clone());
        self.last_hash = data_hash;
        Ok(entry)
    }

    /// Walks this chain from the zero hash, verifying every link.
    pub fn verify(&self, signer: &Signer) -> ChainVerification {
        Self::verify_records(signer, &self.signatures)
    }

    /// Verifies an arbitrary run of chained signatures that starts at the
    /// zero hash, e.g. links recovered from persisted compliance records.
    pub fn verify_records(signer: &Signer, signatures: &[ChainedSignature]) -> ChainVerification {
        let total = signatures.len();
        let mut expected_prev = ZERO_HASH;

        for (position, entry) in signatures.iter().enumerate() {
            if entry.algorithm != signer.algorithm().name() {
                return ChainVerification::broken(
                    total,
                    position,
                    format!(
                        "algorithm mismatch: chain has {}, signer is {}",
                        entry.algorithm,
                        signer.algorithm().name()
                    ),
                );
            }
            if entry.prev_hash != expected_prev {
                return ChainVerification::broken(
                    total,
                    position,
                    "prev_hash does not match preceding link".to_string(),
                );
            }

            let payload = chain_data(&entry.prev_hash, &entry.data_hash, entry.sequence);
            if let Err(err) = signer.verify(&payload, &entry.signature) {
                return ChainVerification::broken(total, position, err.to_string());
            }

            expected_prev = entry.data_hash;
        }

        ChainVerification::ok(total, signatures.last().map(|s| s.sequence))
    }
}

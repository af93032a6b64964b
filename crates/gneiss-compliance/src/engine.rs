//! The compliance engine: profile policy applied to the write path.
//!
//! The engine owns the [`KeyManager`] and the [`SignatureChain`]; the signer
//! is owned too but only *borrowed* by the chain during signing, so a signer
//! swap (new chain, new keys) never leaves dangling references.
//!
//! Two independent sequence counters run here, as in the wire format:
//! the *transform* sequence stamped into `_compliance_sequence` on every
//! transformed event, and the *storage* sequence assigned to each persisted
//! [`ComplianceRecord`] and bound into the signature chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use gneiss_crypto::{
    sha256, AeadAlgorithm, ChainVerification, EncryptionKey, KeyManager, SignatureChain, Signer,
};
use gneiss_types::LogEvent;
use serde_json::Value;

use crate::error::{ComplianceError, Result};
use crate::mask::{key_matches, mask_value, redact_template};
use crate::profile::ComplianceProfile;
use crate::record::ComplianceRecord;

/// Property key carrying the profile name on every transformed event.
pub const PROFILE_PROPERTY: &str = "_compliance_profile";

/// Property key carrying the transform sequence.
pub const SEQUENCE_PROPERTY: &str = "_compliance_sequence";

/// Placeholder inserted for required audit properties the caller omitted.
pub const MISSING_REQUIRED: &str = "[MISSING_REQUIRED]";

struct StorageState {
    next_sequence: u64,
    chain: SignatureChain,
}

/// Applies one profile's policy to events before they reach the WAL.
pub struct ComplianceEngine {
    profile: ComplianceProfile,
    key_manager: Option<KeyManager>,
    signer: Option<Signer>,
    storage: Mutex<StorageState>,
    transform_seq: AtomicU64,
    mask_enabled: bool,
    enforce_required: bool,
}

impl std::fmt::Debug for ComplianceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceEngine")
            .field("profile", &self.profile.name)
            .field("mask_enabled", &self.mask_enabled)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ComplianceEngine`].
pub struct ComplianceEngineBuilder {
    profile: ComplianceProfile,
    encryption_key: Option<EncryptionKey>,
    aead_algorithm: AeadAlgorithm,
    signer: Option<Signer>,
    mask_enabled: bool,
    enforce_required: bool,
    rotate_after: Option<u64>,
}

impl ComplianceEngineBuilder {
    /// Supplies explicit key material instead of a generated key.
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Selects the AEAD cipher (default AES-256-GCM).
    pub fn aead_algorithm(mut self, algorithm: AeadAlgorithm) -> Self {
        self.aead_algorithm = algorithm;
        self
    }

    /// Supplies an explicit signer instead of a generated keypair.
    pub fn signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Disables field masking (default enabled).
    pub fn mask_enabled(mut self, enabled: bool) -> Self {
        self.mask_enabled = enabled;
        self
    }

    /// Disables required-property placeholders (default enabled).
    pub fn enforce_required(mut self, enforce: bool) -> Self {
        self.enforce_required = enforce;
        self
    }

    /// Overrides the key-rotation threshold.
    pub fn rotate_after(mut self, encryptions: u64) -> Self {
        self.rotate_after = Some(encryptions);
        self
    }

    /// Builds the engine, generating key material the profile requires but
    /// the caller did not provide.
    pub fn build(self) -> Result<ComplianceEngine> {
        let key_manager = if self.profile.require_encryption {
            let manager = match self.encryption_key {
                Some(key) => KeyManager::with_key(self.aead_algorithm, key),
                None => KeyManager::new(self.aead_algorithm),
            };
            Some(match self.rotate_after {
                Some(n) => manager.with_rotate_after(n),
                None => manager,
            })
        } else {
            None
        };

        let signer = if self.profile.require_signing {
            match self.signer {
                Some(signer) => {
                    if let Some(expected) = self.profile.signing_algorithm {
                        if signer.algorithm() != expected {
                            tracing::warn!(
                                profile = self.profile.name,
                                expected = expected.name(),
                                actual = signer.algorithm().name(),
                                "explicit signer overrides the profile's algorithm"
                            );
                        }
                    }
                    Some(signer)
                }
                None => {
                    let algorithm = self.profile.signing_algorithm.ok_or_else(|| {
                        ComplianceError::SignerMissing {
                            profile: self.profile.name.to_string(),
                        }
                    })?;
                    Some(Signer::generate(algorithm)?)
                }
            }
        } else {
            None
        };

        Ok(ComplianceEngine {
            profile: self.profile,
            key_manager,
            signer,
            storage: Mutex::new(StorageState {
                next_sequence: 1,
                chain: SignatureChain::new(),
            }),
            transform_seq: AtomicU64::new(0),
            mask_enabled: self.mask_enabled,
            enforce_required: self.enforce_required,
        })
    }
}

impl ComplianceEngine {
    /// Starts building an engine for `profile`.
    pub fn builder(profile: ComplianceProfile) -> ComplianceEngineBuilder {
        ComplianceEngineBuilder {
            profile,
            encryption_key: None,
            aead_algorithm: AeadAlgorithm::Aes256Gcm,
            signer: None,
            mask_enabled: true,
            enforce_required: true,
            rotate_after: None,
        }
    }

    /// Builds an engine with everything generated per the profile.
    pub fn new(profile: ComplianceProfile) -> Result<Self> {
        Self::builder(profile).build()
    }

    /// The active profile.
    pub fn profile(&self) -> &ComplianceProfile {
        &self.profile
    }

    /// The engine's signer, when the profile signs.
    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    /// The engine's key manager, when the profile encrypts.
    pub fn key_manager(&self) -> Option<&KeyManager> {
        self.key_manager.as_ref()
    }

    /// Applies the profile's policy to an event, returning the transformed
    /// copy. The input is never mutated.
    pub fn transform(&self, event: &LogEvent) -> LogEvent {
        let mut out = event.clone();

        if self.enforce_required {
            for property in self.profile.audit_properties {
                if !out.properties.contains_key(*property) {
                    out.properties
                        .insert((*property).to_string(), Value::from(MISSING_REQUIRED));
                }
            }
        }

        if self.mask_enabled {
            for (key, value) in &mut out.properties {
                if key_matches(key, self.profile.mask_sensitive) {
                    *value = mask_value(value);
                }
            }
            out.message_template =
                redact_template(&out.message_template, self.profile.mask_sensitive);
        }

        let sequence = self.transform_seq.fetch_add(1, Ordering::SeqCst) + 1;
        out.properties
            .insert(PROFILE_PROPERTY.to_string(), Value::from(self.profile.name));
        out.properties
            .insert(SEQUENCE_PROPERTY.to_string(), Value::from(sequence));
        out
    }

    /// Transforms an event and packages it for storage: canonical JSON,
    /// encrypted if the profile demands it, chained-signed if the profile
    /// demands that.
    pub fn process_for_storage(&self, event: &LogEvent) -> Result<ComplianceRecord> {
        let (_, record) = self.process(event)?;
        Ok(record)
    }

    /// As [`Self::process_for_storage`], also returning the transformed
    /// event. The write path archives the transformed (masked) event to
    /// backends while the record goes to the WAL, and both must come from
    /// the same transform pass.
    pub fn process(&self, event: &LogEvent) -> Result<(LogEvent, ComplianceRecord)> {
        let transformed = self.transform(event);
        let payload = transformed.to_canonical_json()?;

        let (plain_data, encrypted_data) = match &self.key_manager {
            Some(manager) => (None, Some(manager.encrypt(&payload)?.into())),
            None => (Some(payload.clone()), None),
        };

        // Sequence assignment and chain append share one critical section so
        // chain order always matches record sequence order.
        let (sequence, signature) = {
            let mut storage = self.storage.lock().expect("storage state mutex poisoned");
            let sequence = storage.next_sequence;
            storage.next_sequence += 1;

            let signature = match &self.signer {
                Some(signer) => Some(storage.chain.sign(signer, sequence, &payload)?),
                None => None,
            };
            (sequence, signature)
        };

        let record = ComplianceRecord {
            timestamp: transformed.timestamp,
            profile: self.profile.name.to_string(),
            sequence,
            encrypted: encrypted_data.is_some(),
            signed: signature.is_some(),
            plain_data,
            encrypted_data,
            signature,
        };
        Ok((transformed, record))
    }

    /// Reverses [`Self::process_for_storage`]: decrypts, checks the
    /// signature, and returns the stored event.
    pub fn verify_record(&self, record: &ComplianceRecord) -> Result<LogEvent> {
        record.check_shape()?;

        let payload = if record.encrypted {
            let data = record
                .encrypted_data
                .clone()
                .expect("check_shape guarantees encrypted_data");
            let manager = self.key_manager.as_ref().ok_or_else(|| {
                ComplianceError::RecordMalformed {
                    reason: "encrypted record but engine has no key manager".to_string(),
                }
            })?;
            manager.decrypt(&data.into())?
        } else {
            record
                .plain_data
                .clone()
                .expect("check_shape guarantees plain_data")
        };

        if record.signed {
            let signature = record
                .signature
                .as_ref()
                .expect("check_shape guarantees signature");
            let signer = self
                .signer
                .as_ref()
                .ok_or_else(|| ComplianceError::SignerMissing {
                    profile: self.profile.name.to_string(),
                })?;
            signature.verify_standalone(signer, Some(&payload))?;
            if signature.sequence != record.sequence {
                return Err(ComplianceError::RecordMalformed {
                    reason: format!(
                        "record sequence {} does not match signature sequence {}",
                        record.sequence, signature.sequence
                    ),
                });
            }
        }

        Ok(LogEvent::from_canonical_json(&payload)
            .map_err(ComplianceError::Serialization)?)
    }

    /// Walks this engine's in-memory signature chain.
    pub fn verify_chain(&self) -> ChainVerification {
        let storage = self.storage.lock().expect("storage state mutex poisoned");
        match &self.signer {
            Some(signer) => storage.chain.verify(signer),
            None => ChainVerification {
                valid: true,
                total_signatures: 0,
                last_sequence: None,
                failed_position: None,
                error: None,
            },
        }
    }

    /// Verifies the chain embedded in a contiguous run of stored records
    /// (oldest first), independent of in-memory state.
    pub fn verify_records(&self, records: &[ComplianceRecord]) -> Result<ChainVerification> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ComplianceError::SignerMissing {
                profile: self.profile.name.to_string(),
            })?;

        let mut links = Vec::with_capacity(records.len());
        for record in records {
            let signature =
                record
                    .signature
                    .clone()
                    .ok_or_else(|| ComplianceError::RecordMalformed {
                        reason: format!("record {} carries no signature", record.sequence),
                    })?;
            links.push(signature);
        }
        Ok(SignatureChain::verify_records(signer, &links))
    }

    /// Data-hash of the payload, exposed for hash-chain cross-checks.
    pub fn payload_hash(payload: &[u8]) -> [u8; 32] {
        sha256(payload)
    }
}

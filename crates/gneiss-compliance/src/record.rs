//! Persisted compliance record wire format.
//!
//! A `ComplianceRecord` is the WAL payload when a profile is active: the
//! transformed event, either in the clear (`plain_data`) or AEAD-encrypted
//! (`encrypted_data`), plus the chained signature when the profile signs.
//!
//! The wire format is JSON with binary fields as base64 and hashes/key ids
//! as hex, so archived records stay greppable and the canonical encoding
//! stays byte-stable.

use chrono::{DateTime, Utc};
use gneiss_crypto::{ChainedSignature, EncryptedBlob, KeyId};
use serde::{Deserialize, Serialize};

use crate::error::{ComplianceError, Result};

mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(&t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod base64_vec {
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

/// Encrypted payload envelope inside a compliance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Canonical AEAD algorithm name.
    pub algorithm: String,
    /// `nonce ‖ ciphertext ‖ tag`, base64 on the wire.
    #[serde(with = "base64_vec")]
    pub ciphertext: Vec<u8>,
    /// Hex key address for decrypt-time key lookup.
    pub key_id: KeyId,
}

impl From<EncryptedBlob> for EncryptedData {
    fn from(blob: EncryptedBlob) -> Self {
        Self {
            algorithm: blob.algorithm,
            ciphertext: blob.ciphertext,
            key_id: blob.key_id,
        }
    }
}

impl From<EncryptedData> for EncryptedBlob {
    fn from(data: EncryptedData) -> Self {
        Self {
            algorithm: data.algorithm,
            ciphertext: data.ciphertext,
            key_id: data.key_id,
        }
    }
}

/// One event as persisted under an active compliance profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    /// Event timestamp (RFC3339 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Name of the profile that produced this record.
    pub profile: String,
    /// Storage sequence; also the sequence bound into the signature chain.
    pub sequence: u64,
    pub encrypted: bool,
    pub signed: bool,
    /// Canonical event JSON when the profile does not encrypt.
    #[serde(default, with = "base64_opt", skip_serializing_if = "Option::is_none")]
    pub plain_data: Option<Vec<u8>>,
    /// Encrypted event payload when the profile encrypts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<EncryptedData>,
    /// Chain link when the profile signs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ChainedSignature>,
}

impl ComplianceRecord {
    /// Serializes to the JSON wire form written into WAL payloads.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a record from its JSON wire form.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Structural sanity check: flags must match the payload variants.
    pub fn check_shape(&self) -> Result<()> {
        if self.encrypted && self.encrypted_data.is_none() {
            return Err(ComplianceError::RecordMalformed {
                reason: "encrypted flag set but no encrypted_data".to_string(),
            });
        }
        if !self.encrypted && self.plain_data.is_none() {
            return Err(ComplianceError::RecordMalformed {
                reason: "plaintext record without plain_data".to_string(),
            });
        }
        if self.signed && self.signature.is_none() {
            return Err(ComplianceError::RecordMalformed {
                reason: "signed flag set but no signature".to_string(),
            });
        }
        Ok(())
    }
}

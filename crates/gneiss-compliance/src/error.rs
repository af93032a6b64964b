//! Compliance error types.

/// Errors from the compliance engine.
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    /// A retention override fell outside the profile's legal bounds.
    #[error(
        "retention of {requested} days out of bounds for {profile}: minimum {min}, maximum {max}"
    )]
    RetentionOutOfBounds {
        profile: String,
        requested: u32,
        min: u32,
        max: u32,
    },

    /// The profile requires signing but no signer was provided or generated.
    #[error("profile {profile} requires signing but the engine has no signer")]
    SignerMissing { profile: String },

    /// Crypto-layer failure (encryption, decryption, signing).
    #[error(transparent)]
    Crypto(#[from] gneiss_crypto::CryptoError),

    /// JSON encode/decode of an event or record failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record is internally inconsistent.
    #[error("malformed compliance record: {reason}")]
    RecordMalformed { reason: String },
}

pub type Result<T> = std::result::Result<T, ComplianceError>;

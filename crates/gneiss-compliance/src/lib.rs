//! # gneiss-compliance: Regulation-aware event processing
//!
//! Turns raw log events into records that satisfy a compliance profile
//! before they reach the WAL:
//!
//! - **Profiles** ([`ComplianceProfile`]): HIPAA, PCI-DSS, SOX, and GDPR,
//!   each with masking patterns, encryption/signing requirements, and
//!   retention bounds.
//! - **Masking** ([`mask`]): positional masking of sensitive property values
//!   and template redaction.
//! - **Engine** ([`ComplianceEngine`]): transform + storage packaging with
//!   AEAD encryption, key rotation, and a tamper-evident signature chain.
//! - **Records** ([`ComplianceRecord`]): the JSON wire format persisted as
//!   WAL payloads and archived by backends.

mod engine;
mod error;
pub mod mask;
mod profile;
mod record;

pub use engine::{
    ComplianceEngine, ComplianceEngineBuilder, MISSING_REQUIRED, PROFILE_PROPERTY,
    SEQUENCE_PROPERTY,
};
pub use error::{ComplianceError, Result};
pub use profile::ComplianceProfile;
pub use record::{ComplianceRecord, EncryptedData};

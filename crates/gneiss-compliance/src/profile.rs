//! Compliance profiles.
//!
//! A profile bundles the masking, encryption, signing, and retention rules of
//! one regulation. Profiles are static configuration: the four shipped here
//! (HIPAA, PCI-DSS, SOX, GDPR) cover the regulations the sink targets, and
//! only the retention period is adjustable, inside the profile's legal
//! bounds.

use std::time::Duration;

use gneiss_crypto::SignatureAlgorithm;

use crate::error::{ComplianceError, Result};

/// Masking/encryption/signing/retention rules for one regulation.
#[derive(Debug, Clone)]
pub struct ComplianceProfile {
    /// Profile name as persisted in records ("HIPAA", "PCI-DSS", …).
    pub name: &'static str,
    /// Payloads must be AEAD-encrypted at rest.
    pub require_encryption: bool,
    /// Records must join the signature chain.
    pub require_signing: bool,
    /// Chain signature algorithm when signing is required.
    pub signing_algorithm: Option<SignatureAlgorithm>,
    /// Legal minimum retention, days.
    pub min_retention_days: u32,
    /// Retention applied when no override is configured, days.
    pub default_retention_days: u32,
    /// Upper retention bound (storage-limitation rules), days.
    pub max_retention_days: u32,
    /// Case-insensitive substrings marking a property key as sensitive.
    pub mask_sensitive: &'static [&'static str],
    /// Property names every audit event must carry.
    pub audit_properties: &'static [&'static str],
    /// Persisted data must be tamper-evident.
    pub tamper_proof: bool,
    /// Reads of audit data must themselves be logged.
    pub access_log: bool,
    /// Archived objects should use store-side immutability (object lock).
    pub immutable_storage: bool,

    retention_days: u32,
}

impl ComplianceProfile {
    /// HIPAA: PHI at rest is encrypted and signed (Ed25519), kept ≥ 6 years.
    pub fn hipaa() -> Self {
        Self {
            name: "HIPAA",
            require_encryption: true,
            require_signing: true,
            signing_algorithm: Some(SignatureAlgorithm::Ed25519),
            min_retention_days: 2190,
            default_retention_days: 2555,
            max_retention_days: 9125,
            // Deliberately no bare "patient": identifiers like PatientId
            // must survive masking, only the sensitive values go.
            mask_sensitive: &[
                "ssn",
                "social_security",
                "dob",
                "date_of_birth",
                "mrn",
                "medical_record",
                "diagnosis",
                "insurance",
                "password",
                "secret",
            ],
            audit_properties: &["UserId", "Action"],
            tamper_proof: true,
            access_log: true,
            immutable_storage: true,
            retention_days: 2555,
        }
    }

    /// PCI-DSS: cardholder data is encrypted and signed (RSA-PSS), kept ≥ 1 year.
    pub fn pci_dss() -> Self {
        Self {
            name: "PCI-DSS",
            require_encryption: true,
            require_signing: true,
            signing_algorithm: Some(SignatureAlgorithm::RsaPssSha256),
            min_retention_days: 365,
            default_retention_days: 365,
            max_retention_days: 1095,
            mask_sensitive: &["pan", "card", "cvv", "cvc", "expiry", "track", "password", "secret"],
            audit_properties: &["UserId", "Action"],
            tamper_proof: true,
            access_log: true,
            immutable_storage: false,
            retention_days: 365,
        }
    }

    /// SOX: financial records need integrity (RSA-PSS signing) for 7 years;
    /// confidentiality is not mandated, so encryption stays off by default.
    pub fn sox() -> Self {
        Self {
            name: "SOX",
            require_encryption: false,
            require_signing: true,
            signing_algorithm: Some(SignatureAlgorithm::RsaPssSha256),
            min_retention_days: 2555,
            default_retention_days: 2555,
            max_retention_days: 3650,
            mask_sensitive: &["salary", "compensation", "account_number", "password", "secret"],
            audit_properties: &["UserId", "Action"],
            tamper_proof: true,
            access_log: false,
            immutable_storage: true,
            retention_days: 2555,
        }
    }

    /// GDPR: personal data is encrypted and aggressively masked; storage
    /// limitation caps retention low.
    pub fn gdpr() -> Self {
        Self {
            name: "GDPR",
            require_encryption: true,
            require_signing: false,
            signing_algorithm: None,
            min_retention_days: 30,
            default_retention_days: 365,
            max_retention_days: 1095,
            mask_sensitive: &[
                "email",
                "phone",
                "address",
                "passport",
                "national_id",
                "ip_address",
                "password",
                "secret",
            ],
            audit_properties: &["UserId", "Action", "LawfulBasis"],
            tamper_proof: false,
            access_log: true,
            immutable_storage: false,
            retention_days: 365,
        }
    }

    /// Looks a profile up by its persisted name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "HIPAA" => Some(Self::hipaa()),
            "PCI-DSS" => Some(Self::pci_dss()),
            "SOX" => Some(Self::sox()),
            "GDPR" => Some(Self::gdpr()),
            _ => None,
        }
    }

    /// Overrides the retention period, validating it against the profile's
    /// legal bounds.
    pub fn with_retention_days(mut self, days: u32) -> Result<Self> {
        if days < self.min_retention_days || days > self.max_retention_days {
            return Err(ComplianceError::RetentionOutOfBounds {
                profile: self.name.to_string(),
                requested: days,
                min: self.min_retention_days,
                max: self.max_retention_days,
            });
        }
        self.retention_days = days;
        Ok(self)
    }

    /// Currently configured retention, days.
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Currently configured retention as a duration.
    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("HIPAA", 2190, 2555, 9125)]
    #[test_case("PCI-DSS", 365, 365, 1095)]
    #[test_case("SOX", 2555, 2555, 3650)]
    #[test_case("GDPR", 30, 365, 1095)]
    fn retention_bounds(name: &str, min: u32, default: u32, max: u32) {
        let profile = ComplianceProfile::by_name(name).unwrap();
        assert_eq!(profile.min_retention_days, min);
        assert_eq!(profile.default_retention_days, default);
        assert_eq!(profile.max_retention_days, max);
        assert_eq!(profile.retention_days(), default);
        assert!(min <= default && default <= max);
    }

    #[test]
    fn retention_override_is_bounded() {
        let err = ComplianceProfile::hipaa()
            .with_retention_days(100)
            .unwrap_err();
        match err {
            ComplianceError::RetentionOutOfBounds { min, requested, .. } => {
                assert_eq!(min, 2190);
                assert_eq!(requested, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err_names_minimum());

        let profile = ComplianceProfile::hipaa().with_retention_days(2555).unwrap();
        assert_eq!(profile.retention_days(), 2555);
        assert_eq!(
            profile.retention_period(),
            Duration::from_secs(2555 * 24 * 60 * 60)
        );
    }

    fn err_names_minimum() -> bool {
        let err = ComplianceProfile::hipaa()
            .with_retention_days(100)
            .unwrap_err();
        err.to_string().contains("2190")
    }

    #[test_case(2190; "at minimum")]
    #[test_case(9125; "at maximum")]
    fn retention_boundary_values_accepted(days: u32) {
        assert!(ComplianceProfile::hipaa().with_retention_days(days).is_ok());
    }

    #[test_case(2189; "below minimum")]
    #[test_case(9126; "above maximum")]
    fn retention_boundary_values_rejected(days: u32) {
        assert!(ComplianceProfile::hipaa().with_retention_days(days).is_err());
    }

    #[test]
    fn unknown_profile_name() {
        assert!(ComplianceProfile::by_name("FERPA").is_none());
    }

    #[test]
    fn signing_algorithms_match_regulations() {
        assert_eq!(
            ComplianceProfile::hipaa().signing_algorithm,
            Some(SignatureAlgorithm::Ed25519)
        );
        assert_eq!(
            ComplianceProfile::pci_dss().signing_algorithm,
            Some(SignatureAlgorithm::RsaPssSha256)
        );
        assert_eq!(
            ComplianceProfile::sox().signing_algorithm,
            Some(SignatureAlgorithm::RsaPssSha256)
        );
        assert!(!ComplianceProfile::gdpr().require_signing);
    }
}

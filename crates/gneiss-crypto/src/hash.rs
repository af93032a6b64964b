//! SHA-256 helpers for record and chain hashing.

use sha2::{Digest, Sha256};

/// Length of every hash in the system, in bytes.
pub const HASH_LEN: usize = 32;

/// A 32-byte SHA-256 digest.
pub type Hash32 = [u8; HASH_LEN];

/// The all-zero hash that seeds every chain.
pub const ZERO_HASH: Hash32 = [0u8; HASH_LEN];

/// Computes the SHA-256 digest of `data` in one shot.
pub fn sha256(data: &[u8]) -> Hash32 {
    let digest = Sha256::digest(data);
    digest.into()
}

/// Computes the SHA-256 digest of several parts without concatenating them.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash32 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc"), FIPS 180-2 appendix B.1
        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(hex::encode(sha256(b"abc")), expected);
    }

    #[test]
    fn concat_matches_single_shot() {
        assert_eq!(sha256_concat(&[b"foo", b"bar"]), sha256(b"foobar"));
    }
}

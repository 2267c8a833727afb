//! Message imprint derivation
//!
//! The TSA timestamps a fixed 32-byte imprint. When the stored content hash
//! is itself a SHA-256 digest, its raw bytes are the imprint, so the token
//! attests to the content hash directly. Any other algorithm or length is
//! reduced to SHA-256 of the hex string, which is deterministic for every
//! source algorithm. The chosen branch is recorded with the stored artifact
//! so a verifier knows which reconstruction rule to apply.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::record::HashAlgorithm;

/// Which derivation branch produced the imprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprintMethod {
    /// Imprint is the decoded content hash itself
    RawDigest,
    /// Imprint is SHA-256 of the hex-encoded content hash string
    HashedHex,
}

impl std::fmt::Display for ImprintMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImprintMethod::RawDigest => write!(f, "raw_digest"),
            ImprintMethod::HashedHex => write!(f, "hashed_hex"),
        }
    }
}

/// Derive the 32-byte imprint from a stored content hash
pub fn derive_imprint(hash_hex: &str, algorithm: HashAlgorithm) -> (ImprintMethod, [u8; 32]) {
    if algorithm == HashAlgorithm::Sha256 && hash_hex.len() == 64 {
        if let Ok(bytes) = hex::decode(hash_hex) {
            let mut imprint = [0u8; 32];
            imprint.copy_from_slice(&bytes);
            return (ImprintMethod::RawDigest, imprint);
        }
    }
    let digest = Sha256::digest(hash_hex.as_bytes());
    (ImprintMethod::HashedHex, digest.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash_used_raw() {
        let hash_hex = "a1".repeat(32);
        let (method, imprint) = derive_imprint(&hash_hex, HashAlgorithm::Sha256);
        assert_eq!(method, ImprintMethod::RawDigest);
        assert_eq!(imprint.to_vec(), hex::decode(&hash_hex).unwrap());
    }

    #[test]
    fn test_sha512_hash_is_rehashed() {
        let hash_hex = "b2".repeat(64);
        let (method, imprint) = derive_imprint(&hash_hex, HashAlgorithm::Sha512);
        assert_eq!(method, ImprintMethod::HashedHex);
        let expected: [u8; 32] = Sha256::digest(hash_hex.as_bytes()).into();
        assert_eq!(imprint, expected);
    }

    #[test]
    fn test_wrong_length_sha256_is_rehashed() {
        let short = "ab".repeat(16);
        let (method, _) = derive_imprint(&short, HashAlgorithm::Sha256);
        assert_eq!(method, ImprintMethod::HashedHex);
    }

    #[test]
    fn test_invalid_hex_falls_back_to_rehash() {
        let bogus = "zz".repeat(32);
        let (method, imprint) = derive_imprint(&bogus, HashAlgorithm::Sha256);
        assert_eq!(method, ImprintMethod::HashedHex);
        let expected: [u8; 32] = Sha256::digest(bogus.as_bytes()).into();
        assert_eq!(imprint, expected);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let hash_hex = "c3".repeat(48);
        let a = derive_imprint(&hash_hex, HashAlgorithm::Sha384);
        let b = derive_imprint(&hash_hex, HashAlgorithm::Sha384);
        assert_eq!(a, b);
    }

    #[test]
    fn test_method_display() {
        assert_eq!(ImprintMethod::RawDigest.to_string(), "raw_digest");
        assert_eq!(ImprintMethod::HashedHex.to_string(), "hashed_hex");
    }
}

//! Ed25519 signing primitive
//!
//! Wraps detached sign/verify over arbitrary byte strings. Long-lived keys
//! come from an operator-managed secret (hex-encoded 64-byte keypair); when
//! none is configured the caller falls back to a per-request ephemeral pair.
//! Also encodes the public key as a minimal PKIX SubjectPublicKeyInfo.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::asn1;

/// Ed25519 OID 1.3.101.112, pre-encoded content octets
const OID_ED25519: &[u8] = &[0x2b, 0x65, 0x70];

/// Signing key errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// Secret key is not valid hex
    #[error("secret key is not valid hex")]
    InvalidHex,

    /// Secret key has the wrong length (expects 64 bytes: seed + public)
    #[error("secret key must be 64 bytes, got {0}")]
    InvalidLength(usize),

    /// Keypair bytes are internally inconsistent
    #[error("keypair is inconsistent: {0}")]
    InvalidKeypair(String),

    /// Configured public key does not match the secret key
    #[error("public key mismatch")]
    PublicKeyMismatch,
}

/// Where the signing key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyProvenance {
    /// Long-lived, operator-managed key
    Managed,
    /// Generated for a single request
    Ephemeral,
}

impl std::fmt::Display for KeyProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyProvenance::Managed => write!(f, "managed"),
            KeyProvenance::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

/// An Ed25519 keypair plus its provenance
#[derive(Debug)]
pub struct SigningKeypair {
    key: SigningKey,
    provenance: KeyProvenance,
}

impl SigningKeypair {
    /// Load a managed keypair from a hex-encoded 64-byte secret
    /// (32-byte seed followed by the 32-byte public key).
    ///
    /// If `expected_public_hex` is given, the derived public key must match.
    pub fn from_hex(
        secret_hex: &str,
        expected_public_hex: Option<&str>,
    ) -> Result<Self, SigningError> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|_| SigningError::InvalidHex)?;
        if bytes.len() != 64 {
            return Err(SigningError::InvalidLength(bytes.len()));
        }
        let mut keypair = [0u8; 64];
        keypair.copy_from_slice(&bytes);
        let key = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|e| SigningError::InvalidKeypair(e.to_string()))?;

        if let Some(expected) = expected_public_hex {
            let expected_bytes =
                hex::decode(expected.trim()).map_err(|_| SigningError::InvalidHex)?;
            if expected_bytes != key.verifying_key().to_bytes() {
                return Err(SigningError::PublicKeyMismatch);
            }
        }

        Ok(Self {
            key,
            provenance: KeyProvenance::Managed,
        })
    }

    /// Generate a fresh ephemeral keypair
    pub fn ephemeral() -> Self {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self {
            key,
            provenance: KeyProvenance::Ephemeral,
        }
    }

    pub fn provenance(&self) -> KeyProvenance {
        self.provenance
    }

    /// Detached signature over arbitrary bytes
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }

    /// Raw 32-byte public key
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Hex-encoded 64-byte keypair in the format `from_hex` accepts
    pub fn keypair_hex(&self) -> String {
        hex::encode(self.key.to_keypair_bytes())
    }

    /// SHA-256 fingerprint of the raw public key bytes, hex-encoded
    pub fn public_key_fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.public_key_bytes()))
    }

    /// Minimal PKIX SubjectPublicKeyInfo DER for the public key
    ///
    /// `SEQUENCE { SEQUENCE { OID 1.3.101.112 }, BIT STRING { 00 || key } }`
    pub fn spki_der(&self) -> Vec<u8> {
        let algorithm = asn1::sequence(&asn1::oid(OID_ED25519));
        let key_bits = asn1::bit_string(&self.public_key_bytes());
        let mut content = algorithm;
        content.extend_from_slice(&key_bits);
        asn1::sequence(&content)
    }

    /// SPKI wrapped in PEM
    pub fn spki_pem(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.spki_der());
        let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
        for chunk in encoded.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
            pem.push('\n');
        }
        pem.push_str("-----END PUBLIC KEY-----\n");
        pem
    }
}

/// Verify a detached signature against a raw 32-byte public key
pub fn verify(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<bool, SigningError> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| SigningError::InvalidKeypair(e.to_string()))?;
    Ok(key.verify(message, &Signature::from_bytes(signature)).is_ok())
}

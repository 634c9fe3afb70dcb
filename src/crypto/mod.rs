//! Cryptographic integrity primitives for the tabulator

pub mod artifact;
pub mod audit;
pub mod hasher;
pub mod signed_document;
pub mod trust;
pub mod verifier;

use crate::{Result, crypto_error};
use base64::Engine;

// Re-export sealing types
pub use artifact::{AuditableArtifact, SealCheck, check_sealed_artifact};
pub use audit::{AuditEvent, AuditIntegrityReport, AuditRecord, AuditTrail, AuditTrailStatistics};
pub use hasher::{ContentHasher, Digest512};

// Re-export signature verification types
pub use signed_document::{ParseError, SignatureBlock, SignedDocumentParser};
pub use trust::{TestCapability, TrustAnchor, TrustAnchorRegistry};
pub use verifier::{FailureReason, SignatureVerifier, VerificationOutcome};

/// Cryptographic utilities
pub struct CryptoUtils;

impl CryptoUtils {
    /// Compare two byte strings in constant time
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        use subtle::ConstantTimeEq;
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }

    /// Decode standard base64, tolerating the line breaks vendors wrap long values with
    pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| crypto_error!("Invalid base64: {}", e))
    }

    /// Encode bytes as standard base64
    pub fn encode_base64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    /// Strip leading zero octets from a big-endian integer encoding
    pub fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        &bytes[start..]
    }
}

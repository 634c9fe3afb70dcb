//! Vendor signature verification
//!
//! Checks run in a fixed order so operators can tell an edited file
//! (`digest mismatch`) from one that was never legitimately signed
//! (`signature invalid`):
//!
//! 1. trust anchor disabled → [`VerificationOutcome::SkippedDisabled`]
//! 2. canonicalization algorithm must be one of the C14N 1.0 URIs
//! 3. digest of the normalized payload must equal `DigestValue`
//! 4. the document's embedded key must be the anchor's key, and `SignatureValue`
//!    must verify over the C14N of the document's own `SignedInfo` under the
//!    anchor's key
//!
//! The key embedded in the document is never used to verify anything.

use std::borrow::Cow;
use std::fmt;

use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};

use crate::crypto::signed_document::SignatureBlock;
use crate::crypto::trust::TrustAnchor;
use crate::crypto::CryptoUtils;

pub const C14N_1_0: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_1_0_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

/// Why a signed export was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    UnsupportedCanonicalization,
    UnsupportedDigestMethod,
    UnsupportedSignatureMethod,
    MalformedValue,
    DigestMismatch,
    UntrustedKey,
    SignatureInvalid,
    /// The signature covers a different file than the one presented
    ReferenceMismatch,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnsupportedCanonicalization => "unsupported canonicalization",
            FailureReason::UnsupportedDigestMethod => "unsupported digest method",
            FailureReason::UnsupportedSignatureMethod => "unsupported signature method",
            FailureReason::MalformedValue => "malformed signature value",
            FailureReason::DigestMismatch => "digest mismatch",
            FailureReason::UntrustedKey => "untrusted signing key",
            FailureReason::SignatureInvalid => "signature invalid",
            FailureReason::ReferenceMismatch => "reference mismatch",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state verification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationOutcome {
    Verified,
    Failed(FailureReason),
    /// Verification was disabled through the test capability
    SkippedDisabled,
}

impl VerificationOutcome {
    /// Only an exact digest and signature match counts
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }
}

/// Verifier for vendor signature blocks
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Verify `payload` against its signature block under `anchor`
    pub fn verify(
        payload: &[u8],
        block: &SignatureBlock,
        anchor: &TrustAnchor,
    ) -> VerificationOutcome {
        if !anchor.is_enabled() {
            return VerificationOutcome::SkippedDisabled;
        }

        match Self::check(payload, block, anchor) {
            Ok(()) => VerificationOutcome::Verified,
            Err(reason) => {
                tracing::debug!(
                    "Signature check failed for reference {}: {}",
                    block.reference_uri(),
                    reason
                );
                VerificationOutcome::Failed(reason)
            }
        }
    }

    fn check(
        payload: &[u8],
        block: &SignatureBlock,
        anchor: &TrustAnchor,
    ) -> Result<(), FailureReason> {
        let canonical = Self::canonicalize_payload(block.canonicalization_method(), payload)
            .ok_or(FailureReason::UnsupportedCanonicalization)?;

        let computed = Self::digest(block.digest_method(), &canonical)
            .ok_or(FailureReason::UnsupportedDigestMethod)?;
        let declared = CryptoUtils::decode_base64(block.digest_value())
            .map_err(|_| FailureReason::MalformedValue)?;
        if !CryptoUtils::constant_time_eq(&computed, &declared) {
            return Err(FailureReason::DigestMismatch);
        }

        let embedded_modulus =
            CryptoUtils::decode_base64(block.modulus()).map_err(|_| FailureReason::MalformedValue)?;
        let embedded_exponent =
            CryptoUtils::decode_base64(block.exponent()).map_err(|_| FailureReason::MalformedValue)?;
        if !anchor.matches_key(&embedded_modulus, &embedded_exponent) {
            return Err(FailureReason::UntrustedKey);
        }

        let signature_bytes = CryptoUtils::decode_base64(block.signature_value())
            .map_err(|_| FailureReason::MalformedValue)?;
        let signature = Signature::try_from(signature_bytes.as_slice())
            .map_err(|_| FailureReason::SignatureInvalid)?;
        let public_key = anchor.public_key().map_err(|e| {
            tracing::error!("🚨 Trust anchor key unusable: {}", e);
            FailureReason::SignatureInvalid
        })?;

        let signed_info = block.signed_info();
        let verified = match block.signature_method() {
            RSA_SHA256 => VerifyingKey::<Sha256>::new(public_key).verify(signed_info, &signature),
            RSA_SHA512 => VerifyingKey::<Sha512>::new(public_key).verify(signed_info, &signature),
            _ => return Err(FailureReason::UnsupportedSignatureMethod),
        };
        verified.map_err(|_| FailureReason::SignatureInvalid)
    }

    /// Fixed normalization the vendor applies to an export before digesting it:
    /// UTF-8 BOM removed and line endings normalized to LF. Nothing else changes;
    /// the XML declaration, empty-element tags and attribute order are digested
    /// as written. The C14N 1.0 URIs are the only algorithm names the vendor
    /// declares for this form. `None` for any other algorithm.
    pub fn canonicalize_payload<'a>(algorithm: &str, payload: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        if algorithm != C14N_1_0 && algorithm != C14N_1_0_WITH_COMMENTS {
            return None;
        }

        let payload = payload.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(payload);
        if !payload.contains(&b'\r') {
            return Some(Cow::Borrowed(payload));
        }

        let mut canonical = Vec::with_capacity(payload.len());
        let mut bytes = payload.iter().peekable();
        while let Some(&byte) = bytes.next() {
            if byte == b'\r' {
                if bytes.peek() == Some(&&b'\n') {
                    bytes.next();
                }
                canonical.push(b'\n');
            } else {
                canonical.push(byte);
            }
        }
        Some(Cow::Owned(canonical))
    }

    /// Digest `data` with the named algorithm
    pub fn digest(algorithm: &str, data: &[u8]) -> Option<Vec<u8>> {
        match algorithm {
            DIGEST_SHA256 => Some(Sha256::digest(data).to_vec()),
            DIGEST_SHA512 => Some(Sha512::digest(data).to_vec()),
            _ => None,
        }
    }
}

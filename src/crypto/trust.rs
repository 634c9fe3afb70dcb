//! Trust anchor for vendor export signatures
//!
//! The registry owns the one RSA public key the verifier trusts. It is built
//! once at process start and passed explicitly to the components that need
//! it. The anchor itself is decoded lazily on first use; concurrent first
//! callers all observe the same instance.
//!
//! Verification can only be switched off through [`TestCapability`], which is
//! mintable only in test builds (or with the `test-support` feature).

use std::fmt;
use std::sync::OnceLock;

use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::config::IntegrityConfig;
use crate::crypto::CryptoUtils;
use crate::{Error, Result, crypto_error};

/// Vendor signing key modulus, base64 big-endian
const EMBEDDED_MODULUS: &str = "h8bp0JW+BqiO8iBd7kwsIzMTdcjAabT2FIgTgj3wYN7LHtnbcBR81LOs0+5Ay31jK/3lSA7MwIrmpeuGhyv0P7PCm1vW8SM15gF9H9chP+ffJu+wGDbG3yob9RY5le1trSloSLwqVOp4pUI62n0+RUuBPpfn9EOYtRCD6sdYVjaVBzvASkk1qsQYoEa+sEbC6TlPltlqiI4q7MCcVjUfqphX9kp5CoVeQNiwU1oLAc8uHPyjNChVIGCtiADlBRoeEEGxhHOIJXwWKCoWRVsRFAI7EbNez/RxS7RAJruEEGiGuFomdXZ2djZnHnp3bM+oBTwg+FSg4dqP13UGnf8YIw==";

/// Vendor signing key public exponent (65537)
const EMBEDDED_EXPONENT: &str = "AQAB";

/// Proof that the caller is test harness code.
///
/// The private field keeps it unconstructible outside this module; `mint` is
/// compiled only for tests and the `test-support` feature.
pub struct TestCapability {
    _private: (),
}

impl TestCapability {
    #[cfg(any(test, feature = "test-support"))]
    pub fn mint() -> Self {
        Self { _private: () }
    }
}

impl fmt::Debug for TestCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TestCapability")
    }
}

/// The RSA public key trusted for vendor signatures
#[derive(Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
    enabled: bool,
}

impl TrustAnchor {
    /// Build an enabled anchor from base64 modulus and exponent
    pub fn from_base64(modulus: &str, exponent: &str) -> Result<Self> {
        let modulus = CryptoUtils::decode_base64(modulus)?;
        let exponent = CryptoUtils::decode_base64(exponent)?;
        Self::from_components(&modulus, &exponent)
    }

    /// Build an enabled anchor from big-endian modulus and exponent bytes
    pub fn from_components(modulus: &[u8], exponent: &[u8]) -> Result<Self> {
        let anchor = Self {
            modulus: CryptoUtils::trim_leading_zeros(modulus).to_vec(),
            exponent: CryptoUtils::trim_leading_zeros(exponent).to_vec(),
            enabled: true,
        };
        if anchor.modulus.is_empty() || anchor.exponent.is_empty() {
            return Err(crypto_error!("Trust anchor modulus and exponent must be non-zero"));
        }
        anchor.public_key()?;
        Ok(anchor)
    }

    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Copy of this anchor with verification switched off
    pub fn disabled_for_tests(&self, _capability: &TestCapability) -> Self {
        Self {
            enabled: false,
            ..self.clone()
        }
    }

    /// Whether a key claimed by a document is this anchor's key
    pub fn matches_key(&self, modulus: &[u8], exponent: &[u8]) -> bool {
        CryptoUtils::constant_time_eq(&self.modulus, CryptoUtils::trim_leading_zeros(modulus))
            && CryptoUtils::constant_time_eq(
                &self.exponent,
                CryptoUtils::trim_leading_zeros(exponent),
            )
    }

    pub fn public_key(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::new(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.exponent),
        )
        .map_err(|e| crypto_error!("Invalid RSA public key: {}", e))
    }

    /// Short SHA-256 fingerprint of the modulus for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.modulus);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("fingerprint", &self.fingerprint())
            .field("bits", &(self.modulus.len() * 8))
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Clone)]
enum AnchorSource {
    Encoded {
        modulus: &'static str,
        exponent: &'static str,
    },
    Decoded(TrustAnchor),
}

/// Holder of the single effective trust anchor
pub struct TrustAnchorRegistry {
    source: AnchorSource,
    verification_enabled: bool,
    anchor: OnceLock<std::result::Result<TrustAnchor, String>>,
}

impl TrustAnchorRegistry {
    /// Registry over the embedded vendor key, verification enabled
    pub fn embedded() -> Self {
        Self {
            source: AnchorSource::Encoded {
                modulus: EMBEDDED_MODULUS,
                exponent: EMBEDDED_EXPONENT,
            },
            verification_enabled: true,
            anchor: OnceLock::new(),
        }
    }

    /// Registry over the embedded key; refuses configurations that disable verification
    pub fn from_config(config: &IntegrityConfig) -> Result<Self> {
        if !config.verify_signatures {
            tracing::error!("🚫 Refusing to disable signature verification from configuration");
            return Err(Error::UnauthorizedDisable);
        }
        Ok(Self::embedded())
    }

    /// Registry over an explicit anchor, e.g. after a vendor key rollover
    pub fn with_anchor(anchor: TrustAnchor) -> Result<Self> {
        if !anchor.is_enabled() {
            return Err(Error::UnauthorizedDisable);
        }
        Ok(Self {
            source: AnchorSource::Decoded(anchor),
            verification_enabled: true,
            anchor: OnceLock::new(),
        })
    }

    /// View of this registry with verification disabled
    pub fn with_verification_disabled_for_tests(&self, _capability: &TestCapability) -> Self {
        tracing::warn!("⚠️  Signature verification disabled by test capability");
        Self {
            source: self.source.clone(),
            verification_enabled: false,
            anchor: OnceLock::new(),
        }
    }

    /// The effective anchor, decoded on first access
    pub fn current_trust_anchor(&self) -> Result<&TrustAnchor> {
        self.anchor
            .get_or_init(|| {
                let decoded = match &self.source {
                    AnchorSource::Encoded { modulus, exponent } => {
                        TrustAnchor::from_base64(modulus, exponent).map_err(|e| e.to_string())
                    }
                    AnchorSource::Decoded(anchor) => Ok(anchor.clone()),
                };
                match decoded {
                    Ok(mut anchor) => {
                        anchor.enabled = self.verification_enabled;
                        tracing::info!(
                            "🔑 Trust anchor loaded: fingerprint={}, verification_enabled={}",
                            anchor.fingerprint(),
                            anchor.enabled
                        );
                        Ok(anchor)
                    }
                    Err(message) => {
                        tracing::error!("🚨 Trust anchor could not be decoded: {}", message);
                        Err(message)
                    }
                }
            })
            .as_ref()
            .map_err(|message| Error::TrustAnchor {
                message: message.clone(),
            })
    }

    pub fn is_verification_enabled(&self) -> bool {
        self.verification_enabled
    }
}

impl fmt::Debug for TrustAnchorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchorRegistry")
            .field("verification_enabled", &self.verification_enabled)
            .field("anchor", &self.anchor.get())
            .finish()
    }
}

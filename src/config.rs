//! Configuration management for the integrity core
//!
//! Loads settings from environment variables with validation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default streaming buffer for content hashing (8 KiB)
pub const DEFAULT_HASH_BUFFER_BYTES: usize = 8 * 1024;

/// Detached signature suffix appended to a signed export's file name
pub const DEFAULT_SIGNATURE_SUFFIX: &str = ".sig.xml";

const MIN_HASH_BUFFER_BYTES: usize = 1024;
const MAX_HASH_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Integrity configuration for hashing and signature verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Chunk size used when streaming files through the content hasher
    pub hash_buffer_bytes: usize,

    /// Suffix of the detached signature document next to each signed export
    pub signature_suffix: String,

    /// Whether vendor signatures are verified. Loading `false` is allowed;
    /// building a trust anchor registry from it is not.
    pub verify_signatures: bool,

    /// Source identifier stamped on audit records
    pub audit_source: String,
}

impl IntegrityConfig {
    /// Load integrity configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let hash_buffer_bytes = std::env::var("TALLY_HASH_BUFFER_BYTES")
            .unwrap_or_else(|_| DEFAULT_HASH_BUFFER_BYTES.to_string())
            .parse()
            .map_err(|_| Error::internal("Invalid TALLY_HASH_BUFFER_BYTES"))?;
        Self::validate_buffer_size(hash_buffer_bytes)?;

        let signature_suffix = std::env::var("TALLY_SIGNATURE_SUFFIX")
            .unwrap_or_else(|_| DEFAULT_SIGNATURE_SUFFIX.to_string());
        if signature_suffix.is_empty() {
            return Err(Error::internal("TALLY_SIGNATURE_SUFFIX must not be empty"));
        }

        let verify_signatures = match std::env::var("TALLY_VERIFY_SIGNATURES") {
            Ok(value) => parse_bool(&value)
                .ok_or_else(|| Error::internal("Invalid TALLY_VERIFY_SIGNATURES"))?,
            Err(_) => true,
        };

        let audit_source =
            std::env::var("TALLY_AUDIT_SOURCE").unwrap_or_else(|_| "tabulator".to_string());

        Ok(Self {
            hash_buffer_bytes,
            signature_suffix,
            verify_signatures,
            audit_source,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            hash_buffer_bytes: MIN_HASH_BUFFER_BYTES, // Small chunks exercise the streaming path
            signature_suffix: DEFAULT_SIGNATURE_SUFFIX.to_string(),
            verify_signatures: true,
            audit_source: "tabulator_test".to_string(),
        }
    }

    fn validate_buffer_size(size: usize) -> Result<()> {
        if !(MIN_HASH_BUFFER_BYTES..=MAX_HASH_BUFFER_BYTES).contains(&size) {
            return Err(Error::internal(format!(
                "TALLY_HASH_BUFFER_BYTES must be between {} and {}",
                MIN_HASH_BUFFER_BYTES, MAX_HASH_BUFFER_BYTES
            )));
        }
        Ok(())
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            hash_buffer_bytes: DEFAULT_HASH_BUFFER_BYTES,
            signature_suffix: DEFAULT_SIGNATURE_SUFFIX.to_string(),
            verify_signatures: true,
            audit_source: "tabulator".to_string(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub integrity: IntegrityConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let integrity = IntegrityConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self { integrity, logging })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Result<Self> {
        let integrity = IntegrityConfig::for_testing();

        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        };

        Ok(Self { integrity, logging })
    }
}

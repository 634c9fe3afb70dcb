//! Error handling for the integrity core

use std::path::PathBuf;

use crate::crypto::signed_document::ParseError;
use crate::crypto::verifier::FailureReason;

/// Result type alias for the integrity core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the integrity core
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Cryptographic operation errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system errors outside of hashing
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or incomplete signature document
    #[error("Signature document error: {0}")]
    SignatureDocument(#[from] ParseError),

    /// A file could not be digested; the artifact cannot be finalized
    #[error("Hash unavailable for {path}: {source}")]
    HashUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A signed export failed verification and must not be ingested
    #[error("Verification rejected {path}: {reason}")]
    VerificationRejected { path: PathBuf, reason: FailureReason },

    /// Signature verification was asked to be disabled outside the test capability path
    #[error("Signature verification can only be disabled with a test capability")]
    UnauthorizedDisable,

    /// The embedded trust anchor could not be decoded
    #[error("Trust anchor unavailable: {message}")]
    TrustAnchor { message: String },

    /// A cast vote record could not be parsed
    #[error("CVR parse error in {source_id} at {location}: {message}")]
    CvrParse {
        source_id: String,
        location: String,
        message: String,
    },

    /// A cast vote record names a candidate the contest does not know
    #[error("Unrecognized candidate \"{candidate}\" in {source_id}")]
    UnrecognizedCandidate { source_id: String, candidate: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a new CVR parse error
    pub fn cvr_parse(
        source_id: impl Into<String>,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CvrParse {
            source_id: source_id.into(),
            location: location.into(),
            message: message.into(),
        }
    }

    /// Integrity failures that must stop ingestion of a source
    pub fn is_security_rejection(&self) -> bool {
        matches!(
            self,
            Self::VerificationRejected { .. } | Self::UnauthorizedDisable
        )
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! crypto_error {
    ($msg:expr) => {
        $crate::Error::crypto($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::crypto(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::Error::validation($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::validation(format!($fmt, $($arg)*))
    };
}

/// CVR parse error with a location, e.g. `ingest_error!(id, "ballot 3", "bad rank {}", r)`
#[macro_export]
macro_rules! ingest_error {
    ($source:expr, $location:expr, $msg:expr) => {
        $crate::Error::cvr_parse($source, $location, $msg)
    };
    ($source:expr, $location:expr, $fmt:expr, $($arg:tt)*) => {
        $crate::Error::cvr_parse($source, $location, format!($fmt, $($arg)*))
    };
}

//! Tamper-evident sealing of tabulator output files
//!
//! An [`AuditableArtifact`] wraps one output file. Once the producer has
//! finished writing, [`AuditableArtifact::finalize`] hashes it, writes a
//! `sha512: <hex>` sidecar into `<dir>/<dir name> Checksums/`, marks both files
//! read-only and records the hash in the audit trail.
//!
//! Only a failure to hash is fatal. Sidecar and permission problems are logged
//! as warnings: the recorded hash is the authoritative integrity signal.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::crypto::audit::{AuditEvent, AuditTrail};
use crate::crypto::hasher::ContentHasher;
use crate::crypto::CryptoUtils;
use crate::{Error, Result};

/// Prefix of the single line written to a sidecar file
pub const SIDECAR_PREFIX: &str = "sha512: ";

/// One output file awaiting or having completed finalization
#[derive(Debug)]
pub struct AuditableArtifact {
    path: PathBuf,
    hasher: ContentHasher,
    finalized: bool,
    digest_hex: Option<String>,
    sidecar_path: Option<PathBuf>,
}

impl AuditableArtifact {
    /// Associate with `path`; the file stays writable until finalized
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).map_err(|e| Error::io(path, e))?;
        Ok(Self {
            path: absolute,
            hasher: ContentHasher::default(),
            finalized: false,
            digest_hex: None,
            sidecar_path: None,
        })
    }

    /// Use a hasher with a configured buffer size
    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Lowercase SHA-512 hex, once finalized
    pub fn digest_hex(&self) -> Option<&str> {
        self.digest_hex.as_deref()
    }

    /// Sidecar location, if one was written
    pub fn sidecar_path(&self) -> Option<&Path> {
        self.sidecar_path.as_deref()
    }

    /// Hash, record, write the sidecar and seal the artifact.
    ///
    /// Callers finalize each artifact once. A repeated call is a no-op.
    pub fn finalize(&mut self, trail: &AuditTrail) -> Result<()> {
        if self.finalized {
            tracing::warn!(
                "⚠️  {} already finalized; ignoring repeated finalize",
                self.path.display()
            );
            return Ok(());
        }

        let digest = self.hasher.hash_file(&self.path).inspect_err(|e| {
            tracing::error!("🚨 Cannot finalize {}: {}", self.path.display(), e);
        })?;
        let hex = digest.to_hex();

        tracing::info!(
            target: "tally::audit",
            "{} written with hash {}",
            self.path.display(),
            hex
        );

        let sidecar = self.write_sidecar(&hex);

        let mut read_only = make_read_only(&self.path);
        if let Some(sidecar) = &sidecar {
            read_only &= make_read_only(sidecar);
        }

        self.finalized = true;
        self.digest_hex = Some(hex.clone());
        self.sidecar_path = sidecar.clone();

        trail.record(AuditEvent::ArtifactFinalized {
            path: self.path.display().to_string(),
            sha512: hex,
            sidecar: sidecar.map(|p| p.display().to_string()),
            read_only,
        })?;

        Ok(())
    }

    fn write_sidecar(&self, hex: &str) -> Option<PathBuf> {
        let Some(sidecar) = sidecar_path_for(&self.path) else {
            tracing::warn!(
                "⚠️  {} has no named parent directory; skipping checksum sidecar",
                self.path.display()
            );
            return None;
        };

        if let Some(dir) = sidecar.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                tracing::warn!(
                    "⚠️  Could not create checksum directory {}: {}",
                    dir.display(),
                    e
                );
                return None;
            }
        }

        if let Err(e) = fs::write(&sidecar, format!("{SIDECAR_PREFIX}{hex}")) {
            tracing::warn!(
                "⚠️  Could not write checksum sidecar {}: {}",
                sidecar.display(),
                e
            );
            return None;
        }

        Some(sidecar)
    }
}

/// `<parent>/<parent name> Checksums/<file name>.hash`
pub fn sidecar_path_for(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    let parent_name = parent.file_name()?;
    let file_name = path.file_name()?;
    Some(
        parent
            .join(format!("{} Checksums", parent_name.to_string_lossy()))
            .join(format!("{}.hash", file_name.to_string_lossy())),
    )
}

fn make_read_only(path: &Path) -> bool {
    let result = fs::metadata(path).and_then(|metadata| {
        let mut permissions = metadata.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(path, permissions)
    });

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("⚠️  Could not mark {} read-only: {}", path.display(), e);
            false
        }
    }
}

/// Result of re-checking a sealed artifact against its sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealCheck {
    Intact,
    Tampered { expected: String, actual: String },
    MissingSidecar,
    MalformedSidecar,
}

/// Re-hash a previously finalized artifact and compare with its sidecar
pub fn check_sealed_artifact(path: impl AsRef<Path>) -> Result<SealCheck> {
    let path = path.as_ref();
    let path = std::path::absolute(path).map_err(|e| Error::io(path, e))?;
    let Some(sidecar) = sidecar_path_for(&path) else {
        return Ok(SealCheck::MissingSidecar);
    };

    let contents = match fs::read_to_string(&sidecar) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SealCheck::MissingSidecar),
        Err(e) => return Err(Error::io(sidecar, e)),
    };

    let expected = match contents.trim_end().strip_prefix(SIDECAR_PREFIX) {
        Some(hex) if hex.len() == 128 && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            hex.to_ascii_lowercase()
        }
        _ => return Ok(SealCheck::MalformedSidecar),
    };

    let actual = ContentHasher::default().hash_file(&path)?.to_hex();
    if CryptoUtils::constant_time_eq(expected.as_bytes(), actual.as_bytes()) {
        Ok(SealCheck::Intact)
    } else {
        tracing::error!("🚨 Sealed artifact {} no longer matches its hash", path.display());
        Ok(SealCheck::Tampered { expected, actual })
    }
}

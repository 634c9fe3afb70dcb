//! Cast vote record ingestion
//!
//! A [`CvrIngestPort`] reads one vendor export format. The [`CvrIngestor`]
//! picks the reader for a source's [`SourceKind`], lists and reads the source's
//! files once, and for signed formats refuses to hand any payload to the reader
//! until every payload has passed signature verification against the trust
//! anchor. The reader parses those same bytes; it never goes back to disk.

pub mod json_reader;
pub mod xml_reader;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::IntegrityConfig;
use crate::crypto::artifact::AuditableArtifact;
use crate::crypto::audit::{AuditEvent, AuditTrail};
use crate::crypto::hasher::ContentHasher;
use crate::crypto::signed_document::SignedDocumentParser;
use crate::crypto::trust::{TrustAnchor, TrustAnchorRegistry};
use crate::crypto::verifier::{FailureReason, SignatureVerifier, VerificationOutcome};
use crate::ledger::is_reserved_candidate_name;
use crate::types::{CastVoteRecord, SourceDescriptor, SourceKind};
use crate::{Error, Result, ingest_error};

pub use json_reader::JsonCvrReader;
pub use xml_reader::XmlCvrReader;

/// A per-vendor CVR reader
pub trait CvrIngestPort: Send + Sync {
    /// Short name used in logs
    fn reader_name(&self) -> &'static str;

    /// Files making up `source`, in the order they will be read
    fn source_files(&self, source: &SourceDescriptor) -> Result<Vec<PathBuf>>;

    /// Append the records held in `payloads`, already read from `source`, to `records`
    fn read_payloads(
        &self,
        source: &SourceDescriptor,
        payloads: &[SourcePayload],
        records: &mut Vec<CastVoteRecord>,
    ) -> Result<()>;

    /// Append every record in `source` to `records`
    fn read_cast_vote_records(
        &self,
        source: &SourceDescriptor,
        records: &mut Vec<CastVoteRecord>,
    ) -> Result<()> {
        let payloads = self
            .source_files(source)?
            .into_iter()
            .map(SourcePayload::load)
            .collect::<Result<Vec<_>>>()?;
        self.read_payloads(source, &payloads, records)
    }
}

/// One export file and the bytes read from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePayload {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl SourcePayload {
    pub fn load(path: PathBuf) -> Result<Self> {
        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self { path, bytes })
    }

    /// File name used in error locations
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Check a candidate name read from `source` at `location`
pub(crate) fn check_candidate(source: &SourceDescriptor, name: &str, location: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ingest_error!(
            source.id.as_str(),
            location,
            "empty candidate name"
        ));
    }
    if is_reserved_candidate_name(name) {
        return Err(ingest_error!(
            source.id.as_str(),
            location,
            "candidate name \"{}\" is reserved for vote transfers",
            name
        ));
    }
    if !source.knows_candidate(name) {
        return Err(Error::UnrecognizedCandidate {
            source_id: source.id.clone(),
            candidate: name.to_string(),
        });
    }
    Ok(())
}

/// List regular files in `dir` accepted by `keep`, sorted by path
pub(crate) fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let keep_file = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(&keep);
        if keep_file {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `<file><suffix>`, e.g. `export.xml` → `export.xml.sig.xml`
pub fn signature_path_for(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Selects readers and gates signed sources before they are read
pub struct CvrIngestor {
    registry: Arc<TrustAnchorRegistry>,
    trail: Arc<AuditTrail>,
    config: IntegrityConfig,
    json_reader: JsonCvrReader,
    xml_reader: XmlCvrReader,
}

impl CvrIngestor {
    pub fn new(
        registry: Arc<TrustAnchorRegistry>,
        trail: Arc<AuditTrail>,
        config: IntegrityConfig,
    ) -> Self {
        let xml_reader = XmlCvrReader::new(config.signature_suffix.clone());
        Self {
            registry,
            trail,
            config,
            json_reader: JsonCvrReader::new(),
            xml_reader,
        }
    }

    pub fn trail(&self) -> &AuditTrail {
        &self.trail
    }

    /// Wrap an output file for sealing, hashed with the configured buffer size
    pub fn open_artifact(&self, path: impl AsRef<Path>) -> Result<AuditableArtifact> {
        Ok(AuditableArtifact::open(path)?.with_hasher(ContentHasher::from_config(&self.config)))
    }

    fn reader_for(&self, kind: &SourceKind) -> &dyn CvrIngestPort {
        match kind {
            SourceKind::Json => &self.json_reader,
            SourceKind::SignedXml { .. } => &self.xml_reader,
        }
    }

    /// Read every record of `source`, verifying signed sources first
    pub fn ingest(&self, source: &SourceDescriptor) -> Result<Vec<CastVoteRecord>> {
        let path = std::path::absolute(&source.path).map_err(|e| Error::io(&source.path, e))?;
        fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
        let resolved = SourceDescriptor {
            path,
            ..source.clone()
        };

        let reader = self.reader_for(&resolved.kind);
        let payloads = self.admit(&resolved, reader)?;

        let mut records = Vec::new();
        reader.read_payloads(&resolved, &payloads, &mut records)?;

        tracing::info!(
            "✅ Source {} ingested: {} record(s)",
            resolved.id,
            records.len()
        );
        Ok(records)
    }

    /// Ingest several sources at once, one blocking task per source
    pub async fn ingest_all(
        self: Arc<Self>,
        sources: Vec<SourceDescriptor>,
    ) -> Vec<Result<Vec<CastVoteRecord>>> {
        let handles: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let ingestor = Arc::clone(&self);
                tokio::task::spawn_blocking(move || ingestor.ingest(&source))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::internal(format!("Ingestion task failed: {e}"))),
            };
            results.push(result);
        }
        results
    }

    /// List and read the files of `source` once. For signed kinds every payload
    /// must pass verification before any of them is returned.
    fn admit(
        &self,
        source: &SourceDescriptor,
        reader: &dyn CvrIngestPort,
    ) -> Result<Vec<SourcePayload>> {
        let files = reader.source_files(source)?;
        if files.is_empty() {
            return Err(ingest_error!(
                source.id.as_str(),
                source.path.display().to_string(),
                "no CVR files found"
            ));
        }

        tracing::info!(
            "📥 Ingesting source {} with {} reader ({} file(s))",
            source.id,
            reader.reader_name(),
            files.len()
        );

        let payloads = files
            .into_iter()
            .map(SourcePayload::load)
            .collect::<Result<Vec<_>>>()?;

        if source.kind.requires_signature() {
            let anchor = self.registry.current_trust_anchor()?;
            for payload in &payloads {
                self.verify_payload(payload, anchor)?;
            }
        }
        Ok(payloads)
    }

    fn verify_payload(&self, payload: &SourcePayload, anchor: &TrustAnchor) -> Result<()> {
        let file = payload.path.as_path();
        let signature_path = signature_path_for(file, &self.config.signature_suffix);
        let file_label = file.display().to_string();

        let block = match SignedDocumentParser::parse_file(&signature_path) {
            Ok(block) => block,
            Err(e) => {
                tracing::error!("🚨 Unusable signature for {}: {}", file_label, e);
                self.trail.record(AuditEvent::SourceRejected {
                    path: file_label,
                    reason: e.to_string(),
                })?;
                return Err(e.into());
            }
        };

        let outcome = if anchor.is_enabled() && !reference_matches(block.reference_uri(), file) {
            VerificationOutcome::Failed(FailureReason::ReferenceMismatch)
        } else {
            SignatureVerifier::verify(&payload.bytes, &block, anchor)
        };

        match outcome {
            VerificationOutcome::Verified => {
                tracing::info!("🔏 Signature verified for {}", file_label);
                self.trail.record(AuditEvent::SourceVerified {
                    path: file_label,
                    signature: signature_path.display().to_string(),
                })?;
                Ok(())
            }
            VerificationOutcome::SkippedDisabled => {
                tracing::warn!(
                    "⚠️  Signature verification skipped for {}: verification disabled",
                    file_label
                );
                self.trail
                    .record(AuditEvent::VerificationSkipped { path: file_label })?;
                Ok(())
            }
            VerificationOutcome::Failed(reason) => {
                tracing::error!("🚨 Rejected {}: {}", file_label, reason);
                self.trail.record(AuditEvent::SourceRejected {
                    path: file_label,
                    reason: reason.to_string(),
                })?;
                Err(Error::VerificationRejected {
                    path: file.to_path_buf(),
                    reason,
                })
            }
        }
    }
}

impl std::fmt::Debug for CvrIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CvrIngestor")
            .field("registry", &self.registry)
            .field("signature_suffix", &self.config.signature_suffix)
            .finish()
    }
}

/// The reference URI's last path segment must name the payload file
fn reference_matches(uri: &str, file: &Path) -> bool {
    let referenced = uri.rsplit(['/', '\\']).next().unwrap_or(uri);
    !referenced.is_empty()
        && file
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name == referenced)
}

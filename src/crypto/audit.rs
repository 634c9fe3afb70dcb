//! Tamper-evident audit trail for integrity decisions
//!
//! Every sealed artifact and every verification decision on a vendor export is
//! appended as an [`AuditRecord`]. Records form a BLAKE3 hash chain: each
//! record carries the hash of its predecessor, so removing or editing an entry
//! breaks the chain and is reported by [`AuditTrail::verify_trail_integrity`].

use crate::crypto::CryptoUtils;
use crate::{Result, crypto_error};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Integrity decision recorded in the trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// An output file was hashed and sealed
    ArtifactFinalized {
        path: String,
        sha512: String,
        sidecar: Option<String>,
        read_only: bool,
    },
    /// A vendor export passed signature verification
    SourceVerified { path: String, signature: String },
    /// A vendor export failed verification and was refused
    SourceRejected { path: String, reason: String },
    /// Verification was disabled through the test capability
    VerificationSkipped { path: String },
}

impl AuditEvent {
    /// Short event name used in logs and queries
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::ArtifactFinalized { .. } => "artifact_finalized",
            AuditEvent::SourceVerified { .. } => "source_verified",
            AuditEvent::SourceRejected { .. } => "source_rejected",
            AuditEvent::VerificationSkipped { .. } => "verification_skipped",
        }
    }
}

/// Tamper-evident audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique audit record identifier
    pub record_id: Uuid,

    /// Sequence number in the audit trail (monotonically increasing)
    pub sequence_number: u64,

    /// Unix timestamp when the record was created
    pub timestamp: u64,

    /// Hash of the previous audit record (forms hash chain)
    pub previous_hash: Option<[u8; 32]>,

    /// Hash of this record's content
    pub content_hash: [u8; 32],

    /// Source system that produced the record
    pub audit_source: String,

    pub event: AuditEvent,
}

impl AuditRecord {
    /// Create a new chained record
    pub fn new(
        sequence_number: u64,
        previous_hash: Option<[u8; 32]>,
        event: AuditEvent,
        audit_source: String,
    ) -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| crypto_error!("System time error"))?
            .as_secs();

        let content_hash = Self::content_hash_of(&event, &audit_source)?;

        Ok(Self {
            record_id: Uuid::new_v4(),
            sequence_number,
            timestamp,
            previous_hash,
            content_hash,
            audit_source,
            event,
        })
    }

    fn content_hash_of(event: &AuditEvent, audit_source: &str) -> Result<[u8; 32]> {
        let content = serde_json::to_vec(&(event, audit_source))
            .map_err(|e| crypto_error!("Failed to serialize audit content: {}", e))?;
        Ok(blake3::hash(&content).into())
    }

    /// Calculate the hash of this entire audit record
    pub fn calculate_record_hash(&self) -> Result<[u8; 32]> {
        let record_content = serde_json::to_vec(self)
            .map_err(|e| crypto_error!("Failed to serialize audit record: {}", e))?;
        Ok(blake3::hash(&record_content).into())
    }

    /// Verify the content hash still matches the event
    pub fn verify_integrity(&self) -> Result<bool> {
        let expected = Self::content_hash_of(&self.event, &self.audit_source)?;
        Ok(CryptoUtils::constant_time_eq(&self.content_hash, &expected))
    }

    /// Export record with hex hashes and an ISO timestamp
    pub fn to_export_format(&self) -> ExportedAuditRecord {
        ExportedAuditRecord {
            record_id: self.record_id.to_string(),
            sequence_number: self.sequence_number,
            timestamp_iso: format_timestamp_iso(self.timestamp),
            audit_source: self.audit_source.clone(),
            event: self.event.clone(),
            content_hash: hex::encode(self.content_hash),
            previous_hash: self.previous_hash.map(hex::encode),
        }
    }
}

/// Audit record as written to an export file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedAuditRecord {
    pub record_id: String,
    pub sequence_number: u64,
    pub timestamp_iso: String,
    pub audit_source: String,
    pub event: AuditEvent,
    pub content_hash: String,
    pub previous_hash: Option<String>,
}

/// Audit trail statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditTrailStatistics {
    pub total_records: u64,
    pub artifacts_finalized: u64,
    pub sources_verified: u64,
    pub sources_rejected: u64,
    pub verifications_skipped: u64,
    pub chain_integrity_checks: u64,
    pub integrity_violations: u64,
}

/// Audit integrity verification report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditIntegrityReport {
    pub total_records_checked: usize,
    pub integrity_violations: Vec<AuditIntegrityViolation>,
    pub hash_chain_valid: bool,
}

/// Audit integrity violation details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditIntegrityViolation {
    pub record_id: Uuid,
    pub sequence_number: u64,
    pub violation_type: IntegrityViolationType,
}

/// Types of integrity violations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntegrityViolationType {
    ContentHashMismatch,
    HashChainBroken,
    SequenceNumberGap,
}

#[derive(Debug, Default)]
struct TrailState {
    next_sequence: u64,
    last_record_hash: Option<[u8; 32]>,
    records: Vec<AuditRecord>,
    statistics: AuditTrailStatistics,
}

/// Append-only, hash-chained audit trail for one tabulation run
#[derive(Debug)]
pub struct AuditTrail {
    audit_source: String,
    state: Mutex<TrailState>,
}

impl AuditTrail {
    /// Create an empty trail
    pub fn new(audit_source: impl Into<String>) -> Self {
        Self {
            audit_source: audit_source.into(),
            state: Mutex::new(TrailState {
                next_sequence: 1,
                ..TrailState::default()
            }),
        }
    }

    pub fn for_testing() -> Self {
        Self::new("tabulator_test")
    }

    /// Append an event to the trail
    pub fn record(&self, event: AuditEvent) -> Result<AuditRecord> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| crypto_error!("Failed to lock audit trail"))?;

        let record = AuditRecord::new(
            state.next_sequence,
            state.last_record_hash,
            event,
            self.audit_source.clone(),
        )?;
        let record_hash = record.calculate_record_hash()?;

        state.next_sequence += 1;
        state.last_record_hash = Some(record_hash);
        state.statistics.total_records += 1;
        match record.event {
            AuditEvent::ArtifactFinalized { .. } => state.statistics.artifacts_finalized += 1,
            AuditEvent::SourceVerified { .. } => state.statistics.sources_verified += 1,
            AuditEvent::SourceRejected { .. } => state.statistics.sources_rejected += 1,
            AuditEvent::VerificationSkipped { .. } => state.statistics.verifications_skipped += 1,
        }
        state.records.push(record.clone());

        tracing::debug!(
            "📝 Audit record added: seq={}, event={}",
            record.sequence_number,
            record.event.kind()
        );

        Ok(record)
    }

    /// Verify the integrity of the entire audit trail
    pub fn verify_trail_integrity(&self) -> Result<AuditIntegrityReport> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| crypto_error!("Failed to lock audit trail"))?;

        let report = Self::check_chain(&state.records)?;

        state.statistics.chain_integrity_checks += 1;
        state.statistics.integrity_violations += report.integrity_violations.len() as u64;

        if !report.hash_chain_valid {
            tracing::error!(
                "🚨 Audit trail integrity violated: {} violation(s)",
                report.integrity_violations.len()
            );
        }

        Ok(report)
    }

    fn check_chain(records: &[AuditRecord]) -> Result<AuditIntegrityReport> {
        let mut report = AuditIntegrityReport {
            total_records_checked: 0,
            integrity_violations: Vec::new(),
            hash_chain_valid: true,
        };

        let mut previous_hash: Option<[u8; 32]> = None;
        let mut expected_sequence = records.first().map(|r| r.sequence_number).unwrap_or(1);

        for record in records {
            report.total_records_checked += 1;
            let mut flag = |violation_type| {
                report.integrity_violations.push(AuditIntegrityViolation {
                    record_id: record.record_id,
                    sequence_number: record.sequence_number,
                    violation_type,
                });
            };

            if !record.verify_integrity()? {
                flag(IntegrityViolationType::ContentHashMismatch);
            }
            if record.previous_hash != previous_hash {
                flag(IntegrityViolationType::HashChainBroken);
            }
            if record.sequence_number != expected_sequence {
                flag(IntegrityViolationType::SequenceNumberGap);
            }

            previous_hash = Some(record.calculate_record_hash()?);
            expected_sequence = record.sequence_number + 1;
        }

        report.hash_chain_valid = report.integrity_violations.is_empty();
        Ok(report)
    }

    /// Snapshot of all records in sequence order
    pub fn records(&self) -> Result<Vec<AuditRecord>> {
        let state = self
            .state
            .lock()
            .map_err(|_| crypto_error!("Failed to lock audit trail"))?;
        Ok(state.records.clone())
    }

    pub fn statistics(&self) -> Result<AuditTrailStatistics> {
        let state = self
            .state
            .lock()
            .map_err(|_| crypto_error!("Failed to lock audit trail"))?;
        Ok(state.statistics.clone())
    }

    /// Export the trail as JSON lines, one record per line
    pub fn export_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for record in self.records()? {
            out.push_str(&serde_json::to_string(&record.to_export_format())?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Helper function to format timestamp in ISO format
fn format_timestamp_iso(timestamp: u64) -> String {
    use chrono::{TimeZone, Utc};
    match Utc.timestamp_opt(timestamp as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => timestamp.to_string(),
    }
}

//! # Core Types for CVR Ingestion
//!
//! Ballot records produced by the CVR readers and the descriptors that tell the
//! ingestor where a source lives and which vendor format it uses.
//!
//! ## Usage Examples
//!
//! ```rust
//! use tally::types::{CastVoteRecord, SourceDescriptor, SourceKind};
//! use tally::RankingSlot;
//!
//! let source = SourceDescriptor::new("county-a", "exports/county_a", SourceKind::SignedXml {
//!     contest_id: "mayor".to_string(),
//! })
//! .with_candidates(["Alice", "Bob"]);
//! assert!(source.kind.requires_signature());
//!
//! let mut record = CastVoteRecord::new("county-a", "ballot-1");
//! record.push_rank(1, ["Alice"].into_iter().collect::<RankingSlot>());
//! assert_eq!(record.slot_at(1).map(RankingSlot::count), Some(1));
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ranking::RankingSlot;

/// One voter's recorded choices for a contest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastVoteRecord {
    /// Identifier of the source this record was read from
    pub source_id: String,

    /// Record identifier within the source (ballot id, CVR GUID)
    pub record_id: String,

    pub precinct: Option<String>,

    /// Rank (1-based) and the candidates marked at it, ascending by rank
    pub rankings: Vec<(u32, RankingSlot)>,
}

impl CastVoteRecord {
    pub fn new(source_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            record_id: record_id.into(),
            precinct: None,
            rankings: Vec::new(),
        }
    }

    pub fn with_precinct(mut self, precinct: impl Into<String>) -> Self {
        self.precinct = Some(precinct.into());
        self
    }

    /// Add a rank, keeping rankings ordered by rank
    pub fn push_rank(&mut self, rank: u32, slot: RankingSlot) {
        let position = self.rankings.partition_point(|(existing, _)| *existing <= rank);
        self.rankings.insert(position, (rank, slot));
    }

    pub fn slot_at(&self, rank: u32) -> Option<&RankingSlot> {
        self.rankings
            .iter()
            .find(|(existing, _)| *existing == rank)
            .map(|(_, slot)| slot)
    }

    /// No candidate marked at any rank
    pub fn is_blank(&self) -> bool {
        self.rankings.iter().all(|(_, slot)| slot.is_empty())
    }
}

/// Vendor export format of a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum SourceKind {
    /// Unsigned JSON export
    Json,

    /// XML CVR documents, each with a detached XML-DSig signature
    SignedXml { contest_id: String },
}

impl SourceKind {
    /// Whether each file of this kind must pass signature verification before parsing
    pub fn requires_signature(&self) -> bool {
        match self {
            SourceKind::Json => false,
            SourceKind::SignedXml { .. } => true,
        }
    }
}

/// Where a CVR source lives and how to read it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub path: PathBuf,
    pub kind: SourceKind,

    /// Candidate names declared for the contest; empty accepts any non-reserved name
    #[serde(default)]
    pub candidates: Vec<String>,
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            kind,
            candidates: Vec::new(),
        }
    }

    pub fn with_candidates<S: Into<String>>(mut self, candidates: impl IntoIterator<Item = S>) -> Self {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `name` is acceptable for this source's contest
    pub fn knows_candidate(&self, name: &str) -> bool {
        self.candidates.is_empty() || self.candidates.iter().any(|c| c == name)
    }
}

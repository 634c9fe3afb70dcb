//! Reader for unsigned JSON CVR exports
//!
//! ```json
//! { "ballots": [ { "id": "b-1", "precinct": "P1",
//!                  "rankings": [ ["Alice"], ["Bob", "Carol"], [] ] } ] }
//! ```
//!
//! Position `i` of `rankings` is rank `i + 1`.

use std::path::PathBuf;

use serde::Deserialize;

use crate::cvr::{CvrIngestPort, SourcePayload, check_candidate, list_files};
use crate::ranking::RankingSlot;
use crate::types::{CastVoteRecord, SourceDescriptor};
use crate::{Result, ingest_error};

#[derive(Debug, Deserialize)]
struct JsonExport {
    ballots: Vec<JsonBallot>,
}

#[derive(Debug, Deserialize)]
struct JsonBallot {
    id: String,
    #[serde(default)]
    precinct: Option<String>,
    #[serde(default)]
    rankings: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct JsonCvrReader;

impl JsonCvrReader {
    pub fn new() -> Self {
        Self
    }

    fn read_file(
        &self,
        source: &SourceDescriptor,
        payload: &SourcePayload,
        records: &mut Vec<CastVoteRecord>,
    ) -> Result<()> {
        let file_label = payload.label();
        let export: JsonExport = serde_json::from_slice(&payload.bytes).map_err(|e| {
            ingest_error!(
                source.id.as_str(),
                format!("{}:{}:{}", file_label, e.line(), e.column()),
                e.to_string()
            )
        })?;

        for (index, ballot) in export.ballots.into_iter().enumerate() {
            let location = format!("{file_label}: ballots[{index}]");
            if ballot.id.trim().is_empty() {
                return Err(ingest_error!(source.id.as_str(), location, "missing ballot id"));
            }

            let mut record = CastVoteRecord::new(source.id.as_str(), ballot.id);
            record.precinct = ballot.precinct.filter(|p| !p.trim().is_empty());

            for (position, names) in ballot.rankings.into_iter().enumerate() {
                let rank = u32::try_from(position + 1).map_err(|_| {
                    ingest_error!(source.id.as_str(), location.as_str(), "too many ranks")
                })?;
                for name in &names {
                    check_candidate(source, name, &location)?;
                }
                record.push_rank(rank, names.into_iter().collect::<RankingSlot>());
            }

            records.push(record);
        }
        Ok(())
    }
}

impl CvrIngestPort for JsonCvrReader {
    fn reader_name(&self) -> &'static str {
        "json"
    }

    fn source_files(&self, source: &SourceDescriptor) -> Result<Vec<PathBuf>> {
        if source.path.is_dir() {
            list_files(&source.path, |name| name.ends_with(".json"))
        } else {
            Ok(vec![source.path.clone()])
        }
    }

    fn read_payloads(
        &self,
        source: &SourceDescriptor,
        payloads: &[SourcePayload],
        records: &mut Vec<CastVoteRecord>,
    ) -> Result<()> {
        for payload in payloads {
            let before = records.len();
            self.read_file(source, payload, records)?;
            tracing::debug!(
                "Read {} ballot(s) from {}",
                records.len() - before,
                payload.path.display()
            );
        }
        Ok(())
    }
}

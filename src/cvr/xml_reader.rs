//! Reader for signed XML CVR exports
//!
//! One `<Cvr>` document per file. Only the contest named by the source's
//! `contest_id` is read; ballots that do not include it are skipped. Each
//! `<Option>` carries a candidate `Name` and its rank in `Value`; several
//! options at the same rank form an overvote.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cvr::{CvrIngestPort, SourcePayload, check_candidate, list_files};
use crate::ranking::RankingSlot;
use crate::types::{CastVoteRecord, SourceDescriptor, SourceKind};
use crate::xml::{self, XmlElement};
use crate::{Error, Result, ingest_error};

#[derive(Debug, Clone)]
pub struct XmlCvrReader {
    signature_suffix: String,
}

impl XmlCvrReader {
    /// `signature_suffix` marks detached signature files to leave out of a directory listing
    pub fn new(signature_suffix: impl Into<String>) -> Self {
        Self {
            signature_suffix: signature_suffix.into(),
        }
    }

    fn read_file(
        &self,
        source: &SourceDescriptor,
        contest_id: &str,
        payload: &SourcePayload,
    ) -> Result<Option<CastVoteRecord>> {
        let file_label = payload.label();
        let root = xml::parse_document(&payload.bytes)
            .map_err(|e| ingest_error!(source.id.as_str(), file_label.as_str(), e.0))?;

        if root.name != "Cvr" {
            return Err(ingest_error!(
                source.id.as_str(),
                file_label.as_str(),
                "expected <Cvr> root, found <{}>",
                root.name
            ));
        }

        let guid = root.child_text("CvrGuid").ok_or_else(|| {
            ingest_error!(source.id.as_str(), format!("{file_label}: Cvr"), "missing CvrGuid")
        })?;

        let Some((contest_index, contest)) = root
            .child("Contests")
            .into_iter()
            .flat_map(|contests| contests.children_named("Contest"))
            .enumerate()
            .find(|(_, contest)| contest.child_text("Id") == Some(contest_id))
        else {
            tracing::debug!("{} has no votes in contest {}", file_label, contest_id);
            return Ok(None);
        };

        let mut record = CastVoteRecord::new(source.id.as_str(), guid);
        record.precinct = root
            .child("PrecinctSplit")
            .and_then(|split| split.child_text("Name"))
            .map(str::to_string);

        let contest_location = format!("{file_label}: Contests/Contest[{contest_index}]");
        for (slot, slot_rank) in self.read_options(source, contest, &contest_location)? {
            record.push_rank(slot_rank, slot);
        }
        Ok(Some(record))
    }

    fn read_options(
        &self,
        source: &SourceDescriptor,
        contest: &XmlElement,
        contest_location: &str,
    ) -> Result<Vec<(RankingSlot, u32)>> {
        let mut by_rank: BTreeMap<u32, RankingSlot> = BTreeMap::new();

        let options = contest
            .child("Options")
            .into_iter()
            .flat_map(|options| options.children_named("Option"));
        for (index, option) in options.enumerate() {
            let location = format!("{contest_location}/Options/Option[{index}]");

            let name = option
                .child_text("Name")
                .ok_or_else(|| ingest_error!(source.id.as_str(), location.as_str(), "missing Name"))?;
            let value = option
                .child_text("Value")
                .ok_or_else(|| ingest_error!(source.id.as_str(), location.as_str(), "missing Value"))?;
            let rank = value
                .parse::<u32>()
                .ok()
                .filter(|rank| *rank >= 1)
                .ok_or_else(|| {
                    ingest_error!(
                        source.id.as_str(),
                        location.as_str(),
                        "invalid rank \"{}\"",
                        value
                    )
                })?;

            check_candidate(source, name, &location)?;
            by_rank.entry(rank).or_default().add_candidate(name);
        }

        Ok(by_rank.into_iter().map(|(rank, slot)| (slot, rank)).collect())
    }
}

impl CvrIngestPort for XmlCvrReader {
    fn reader_name(&self) -> &'static str {
        "signed-xml"
    }

    fn source_files(&self, source: &SourceDescriptor) -> Result<Vec<PathBuf>> {
        if source.path.is_dir() {
            list_files(&source.path, |name| {
                name.ends_with(".xml") && !name.ends_with(self.signature_suffix.as_str())
            })
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
        let SourceKind::SignedXml { contest_id } = &source.kind else {
            return Err(Error::internal(format!(
                "{} reader cannot read source {} of kind {:?}",
                self.reader_name(),
                source.id,
                source.kind
            )));
        };

        let mut skipped = 0usize;
        for payload in payloads {
            match self.read_file(source, contest_id, payload)? {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::info!(
                "Source {}: {} CVR(s) without contest {} skipped",
                source.id,
                skipped,
                contest_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    const BALLOT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Cvr xmlns="http://tempuri.org/CVRDesign.xsd">
  <CvrGuid>5f0c1c2e-0001</CvrGuid>
  <PrecinctSplit><Name>Precinct 12</Name><Id>12</Id></PrecinctSplit>
  <Contests>
    <Contest>
      <Name>School Board</Name>
      <Id>3</Id>
      <Options><Option><Name>Dana</Name><Value>1</Value></Option></Options>
    </Contest>
    <Contest>
      <Name>Mayor</Name>
      <Id>7</Id>
      <Options>
        <Option><Name>Carol</Name><Value>3</Value></Option>
        <Option><Name>Alice</Name><Value>1</Value></Option>
        <Option><Name>Bob</Name><Value>3</Value></Option>
      </Options>
    </Contest>
  </Contests>
</Cvr>"#;

    fn source(dir: &Path) -> SourceDescriptor {
        SourceDescriptor::new(
            "county-b",
            dir,
            SourceKind::SignedXml {
                contest_id: "7".to_string(),
            },
        )
    }

    fn read(source: &SourceDescriptor) -> Result<Vec<CastVoteRecord>> {
        let mut records = Vec::new();
        XmlCvrReader::new(".sig.xml").read_cast_vote_records(source, &mut records)?;
        Ok(records)
    }

    #[test]
    fn test_reads_selected_contest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cvr_001.xml"), BALLOT).unwrap();

        let records = read(&source(dir.path())).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.record_id, "5f0c1c2e-0001");
        assert_eq!(record.precinct.as_deref(), Some("Precinct 12"));

        let ranks: Vec<u32> = record.rankings.iter().map(|(rank, _)| *rank).collect();
        assert_eq!(ranks, vec![1, 3]);
        assert_eq!(record.slot_at(1).unwrap().get(0), Some("Alice"));
        let third = record.slot_at(3).unwrap();
        assert!(third.is_overvote());
        assert_eq!(third.iter().collect::<Vec<_>>(), ["Carol", "Bob"]);
        assert!(!record.rankings.iter().any(|(_, slot)| slot.contains("Dana")));
    }

    #[test]
    fn test_ballot_without_contest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cvr_001.xml"), BALLOT).unwrap();
        let mut source = source(dir.path());
        source.kind = SourceKind::SignedXml {
            contest_id: "99".to_string(),
        };
        assert!(read(&source).unwrap().is_empty());
    }

    #[test]
    fn test_signature_files_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cvr_002.xml"), BALLOT).unwrap();
        fs::write(dir.path().join("cvr_001.xml"), BALLOT).unwrap();
        fs::write(dir.path().join("cvr_001.xml.sig.xml"), "<Signature/>").unwrap();

        let files = XmlCvrReader::new(".sig.xml")
            .source_files(&source(dir.path()))
            .unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["cvr_001.xml", "cvr_002.xml"]);
    }

    #[test]
    fn test_invalid_rank_reports_option_location() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("cvr_001.xml"),
            BALLOT.replace("<Value>1</Value></Option>\n        <Option><Name>Bob", "<Value>0</Value></Option>\n        <Option><Name>Bob"),
        )
        .unwrap();

        match read(&source(dir.path())).unwrap_err() {
            Error::CvrParse { location, .. } => {
                assert_eq!(location, "cvr_001.xml: Contests/Contest[1]/Options/Option[1]")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_candidate_and_bad_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cvr_001.xml"), BALLOT).unwrap();
        let restricted = source(dir.path()).with_candidates(["Alice", "Bob"]);
        assert!(matches!(
            read(&restricted),
            Err(Error::UnrecognizedCandidate { ref candidate, .. }) if candidate == "Carol"
        ));

        fs::write(dir.path().join("cvr_001.xml"), "<Ballot/>").unwrap();
        assert!(matches!(read(&source(dir.path())), Err(Error::CvrParse { .. })));
    }
}

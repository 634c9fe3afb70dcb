//! Per-round vote transfer accounting for result visualization
//!
//! Every transfer the counting algorithm makes is added here as
//! `(round, source, destination) += value`. Values are exact decimals so
//! fractional surplus transfers accumulate without drift. Entries only grow:
//! there is no subtraction and negative values are refused.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{Result, validation_error};

/// Source of first-round votes
pub const UNCOUNTED: &str = "uncounted";
/// Destination of ballots whose rankings are used up
pub const EXHAUSTED: &str = "exhausted";
/// Destination of surplus that could not be transferred
pub const RESIDUAL_SURPLUS: &str = "residual surplus";

/// Names that may never be used for a real candidate
pub const RESERVED_CANDIDATE_NAMES: [&str; 3] = [UNCOUNTED, EXHAUSTED, RESIDUAL_SURPLUS];

/// Whether `name` collides with a transfer sentinel (case-insensitive)
pub fn is_reserved_candidate_name(name: &str) -> bool {
    let name = name.trim();
    RESERVED_CANDIDATE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Reject empty names and names reserved for transfer sentinels
pub fn validate_candidate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(validation_error!("candidate name must not be empty"));
    }
    if is_reserved_candidate_name(name) {
        return Err(validation_error!(
            "candidate name \"{}\" is reserved for vote transfers",
            name
        ));
    }
    Ok(())
}

/// source → destination → accumulated value for one round
pub type RoundTransfers = BTreeMap<String, BTreeMap<String, Decimal>>;

/// Accumulated vote transfers keyed by round
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferLedger {
    rounds: BTreeMap<u32, RoundTransfers>,
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the flow from `source` to `destination` in `round`.
    ///
    /// `None` source means [`UNCOUNTED`]; `None` destination means [`EXHAUSTED`].
    pub fn add_transfer(
        &mut self,
        round: u32,
        source: Option<&str>,
        destination: Option<&str>,
        value: Decimal,
    ) -> Result<()> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(validation_error!(
                "transfer value must not be negative (round {}, value {})",
                round,
                value
            ));
        }

        let source = source.unwrap_or(UNCOUNTED);
        let destination = destination.unwrap_or(EXHAUSTED);

        let total = self
            .rounds
            .entry(round)
            .or_default()
            .entry(source.to_string())
            .or_default()
            .entry(destination.to_string())
            .or_insert(Decimal::ZERO);
        *total += value;

        tracing::trace!(
            "Round {} transfer {} -> {}: +{} (now {})",
            round,
            source,
            destination,
            value,
            total
        );
        Ok(())
    }

    /// All flows recorded for `round`, or `None` if nothing was recorded
    pub fn get_transfers_for_round(&self, round: u32) -> Option<&RoundTransfers> {
        self.rounds.get(&round)
    }

    /// Accumulated flow for one triple, zero if absent
    pub fn transfer(&self, round: u32, source: &str, destination: &str) -> Decimal {
        self.rounds
            .get(&round)
            .and_then(|sources| sources.get(source))
            .and_then(|destinations| destinations.get(destination))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Rounds with at least one recorded transfer, ascending
    pub fn rounds(&self) -> impl Iterator<Item = u32> + '_ {
        self.rounds.keys().copied()
    }

    /// Sum of every flow in `round`
    pub fn total_for_round(&self, round: u32) -> Decimal {
        self.rounds
            .get(&round)
            .map(|sources| sources.values().flat_map(|d| d.values()).copied().sum::<Decimal>())
            .unwrap_or(Decimal::ZERO)
    }

    /// JSON export for the visualization layer; decimals are written as strings
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rounds)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sentinels_for_missing_endpoints() {
        let mut ledger = TransferLedger::new();
        ledger.add_transfer(1, None, Some("Alice"), dec!(120)).unwrap();
        ledger.add_transfer(2, Some("Bob"), None, dec!(7)).unwrap();

        let round_one = ledger.get_transfers_for_round(1).unwrap();
        assert_eq!(round_one[UNCOUNTED]["Alice"], dec!(120));
        assert_eq!(ledger.transfer(2, "Bob", EXHAUSTED), dec!(7));
    }

    #[test]
    fn test_accumulation_is_exact() {
        let mut ledger = TransferLedger::new();
        for _ in 0..10 {
            ledger
                .add_transfer(3, Some("Alice"), Some("Carol"), dec!(0.1))
                .unwrap();
        }
        ledger
            .add_transfer(3, Some("Alice"), Some(RESIDUAL_SURPLUS), dec!(0.0000001))
            .unwrap();

        assert_eq!(ledger.transfer(3, "Alice", "Carol"), dec!(1.0));
        assert_eq!(ledger.total_for_round(3), dec!(1.0000001));
    }

    #[test]
    fn test_absent_round() {
        let mut ledger = TransferLedger::new();
        assert!(ledger.get_transfers_for_round(1).is_none());
        ledger.add_transfer(2, None, Some("Alice"), dec!(1)).unwrap();
        assert!(ledger.get_transfers_for_round(1).is_none());
        assert_eq!(ledger.rounds().collect::<Vec<_>>(), vec![2]);
        assert_eq!(ledger.total_for_round(9), Decimal::ZERO);
    }

    #[test]
    fn test_negative_transfers_are_rejected() {
        let mut ledger = TransferLedger::new();
        ledger.add_transfer(1, None, Some("Alice"), dec!(5)).unwrap();
        assert!(ledger.add_transfer(1, None, Some("Alice"), dec!(-1)).is_err());
        assert_eq!(ledger.transfer(1, UNCOUNTED, "Alice"), dec!(5));
    }

    #[test]
    fn test_json_export_keeps_decimals_exact() {
        let mut ledger = TransferLedger::new();
        ledger
            .add_transfer(1, Some("Alice"), Some("Bob"), dec!(33.3333))
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&ledger.to_json().unwrap()).unwrap();
        assert_eq!(json["1"]["Alice"]["Bob"], "33.3333");
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_candidate_name("exhausted"));
        assert!(is_reserved_candidate_name(" Residual Surplus "));
        assert!(!is_reserved_candidate_name("Alice"));

        assert!(validate_candidate_name("Alice").is_ok());
        assert!(validate_candidate_name("uncounted").is_err());
        assert!(validate_candidate_name("  ").is_err());
    }
}

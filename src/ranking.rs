//! Candidates marked at one ranking position on one ballot
//!
//! Usually a slot holds exactly one name, so the backing store keeps one name
//! inline. More than one name is an overvote at that rank; no name is an
//! undervote. Names are kept in the order they were added and never
//! de-duplicated.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Insertion-ordered multiset of candidate names at one rank
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingSlot {
    candidates: SmallVec<[String; 1]>,
}

impl RankingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate name
    pub fn add_candidate(&mut self, name: impl Into<String>) {
        self.candidates.push(name.into());
    }

    pub fn count(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// More than one candidate marked at this rank
    pub fn is_overvote(&self) -> bool {
        self.candidates.len() > 1
    }

    /// Name at `index`, or `None` when out of bounds
    pub fn get(&self, index: usize) -> Option<&str> {
        self.candidates.get(index).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.candidates.iter().any(|candidate| candidate == name)
    }

    /// Fresh forward iterator over the names in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.candidates.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for RankingSlot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut slot = Self::new();
        for name in iter {
            slot.add_candidate(name);
        }
        slot
    }
}

impl<'a> IntoIterator for &'a RankingSlot {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, String>, fn(&'a String) -> &'a str>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter().map(String::as_str as fn(&'a String) -> &'a str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot() {
        let slot = RankingSlot::new();
        assert_eq!(slot.count(), 0);
        assert!(slot.is_empty());
        assert!(!slot.is_overvote());
        assert_eq!(slot.get(0), None);
        assert_eq!(slot.iter().next(), None);
    }

    #[test]
    fn test_insertion_order_and_duplicates() {
        let mut slot = RankingSlot::new();
        for name in ["Carol", "Alice", "Carol"] {
            slot.add_candidate(name);
        }

        assert_eq!(slot.count(), 3);
        assert!(slot.is_overvote());
        assert_eq!(slot.iter().collect::<Vec<_>>(), ["Carol", "Alice", "Carol"]);
        assert_eq!(slot.get(1), Some("Alice"));
        assert_eq!(slot.get(3), None);
        assert!(slot.contains("Alice"));
        assert!(!slot.contains("Bob"));
    }

    #[test]
    fn test_traversals_are_independent() {
        let slot: RankingSlot = ["Alice", "Bob"].into_iter().collect();

        let mut first = slot.iter();
        assert_eq!(first.next(), Some("Alice"));
        // A new traversal starts from the beginning
        assert_eq!((&slot).into_iter().collect::<Vec<_>>(), ["Alice", "Bob"]);
        assert_eq!(first.next(), Some("Bob"));
        assert_eq!(first.next(), None);
    }

    #[test]
    fn test_count_matches_add_calls() {
        for calls in 0..6 {
            let mut slot = RankingSlot::new();
            for i in 0..calls {
                slot.add_candidate(format!("candidate {i}"));
            }
            assert_eq!(slot.count(), calls);
            for i in 0..calls {
                assert!(slot.contains(&format!("candidate {i}")));
            }
        }
    }
}

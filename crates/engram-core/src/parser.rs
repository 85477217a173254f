//! Parser collaborator: raw text → entries.
//!
//! Transcript-specific formats plug in through [`EntryParser`]. The generic
//! [`ParagraphParser`] treats each blank-line separated block as one entry
//! and marks blocks that look like critical events.

use std::collections::{BTreeMap, BTreeSet};

use crate::btsp::CriticalEventDetector;
use crate::constants::DEFAULT_TTL_SECS;
use crate::entry::Entry;
use crate::tokenizer::split_blocks;

/// Tag applied to entries the parser marked critical.
pub const BTSP_TAG: &str = "btsp";

pub trait EntryParser: Send {
    /// Entries with initial score, TTL, tags and critical flag assigned.
    /// `now` is Unix ms.
    fn parse(&self, raw: &str, now: u64) -> Vec<Entry>;
}

#[derive(Clone, Debug)]
pub struct ParagraphParser {
    detector: CriticalEventDetector,
    default_ttl_secs: u64,
}

impl Default for ParagraphParser {
    fn default() -> Self {
        Self::new(CriticalEventDetector::new(), DEFAULT_TTL_SECS)
    }
}

impl ParagraphParser {
    pub fn new(detector: CriticalEventDetector, default_ttl_secs: u64) -> Self {
        Self {
            detector,
            default_ttl_secs,
        }
    }
}

impl EntryParser for ParagraphParser {
    fn parse(&self, raw: &str, now: u64) -> Vec<Entry> {
        let blocks = split_blocks(raw);
        let n = blocks.len() as u64;

        blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| {
                // Later blocks are newer; the last one is stamped `now`.
                let timestamp = now.saturating_sub(n - 1 - i as u64);
                if self.detector.detect(&block) {
                    let tags = BTreeSet::from([BTSP_TAG.to_string()]);
                    self.detector
                        .mark_critical(&block, tags, &BTreeMap::new(), timestamp)
                } else {
                    Entry::new(block, timestamp).with_ttl_secs(self.default_ttl_secs)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_become_entries_in_order() {
        let parser = ParagraphParser::default();
        let entries = parser.parse("first thing\n\nsecond thing\n\nthird thing", 1_000);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content, "first thing");
        assert_eq!(entries[2].timestamp, 1_000);
        assert!(entries[0].timestamp < entries[1].timestamp);
        assert!(entries.iter().all(|e| !e.critical));
        assert!(entries.iter().all(|e| e.ttl_secs == DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_critical_blocks_marked() {
        let parser = ParagraphParser::default();
        let entries = parser.parse("all good here\n\nError: ENOENT no such file", 1_000);
        assert!(!entries[0].critical);
        assert!(entries[1].critical);
        assert!(entries[1].tags.contains(BTSP_TAG));
    }

    #[test]
    fn test_custom_ttl() {
        let parser = ParagraphParser::new(CriticalEventDetector::new(), 60);
        let entries = parser.parse("short lived", 1_000);
        assert_eq!(entries[0].ttl_secs, 60);
    }

    #[test]
    fn test_empty_input() {
        assert!(ParagraphParser::default().parse("  \n\n ", 5).is_empty());
    }
}

//! Exact deduplication on instruction and output.

use super::FinalRecord;
use crate::config::DedupMode;
use crate::digest::sha256_hex_lines;
use std::collections::HashSet;

/// Content key: SHA-256 over the trimmed instruction and output joined by a newline.
///
/// Storing digests instead of texts bounds memory on large runs.
pub fn dedup_key(instruction: &str, output: &str) -> String {
    sha256_hex_lines(&[instruction.trim(), output.trim()])
}

/// First-seen-wins duplicate filter.
#[derive(Debug)]
pub struct Deduplicator {
    mode: DedupMode,
    seen: HashSet<String>,
}

impl Deduplicator {
    /// Create an empty filter for `mode`.
    pub fn new(mode: DedupMode) -> Self {
        Self {
            mode,
            seen: HashSet::new(),
        }
    }

    /// Whether `record` is new. Always true with [`DedupMode::None`].
    pub fn admit(&mut self, record: &FinalRecord) -> bool {
        match self.mode {
            DedupMode::None => true,
            DedupMode::Exact => self.seen.insert(dedup_key(&record.instruction, &record.output)),
        }
    }

    /// Distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing was admitted yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

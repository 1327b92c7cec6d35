//! Final record ids.

use super::FinalRecord;
use crate::config::{IdConfig, IdStrategy};
use crate::digest::sha256_hex_lines;

/// Id for the `seq`-th kept record (1-based) under `config`.
///
/// `candidate` falls back to the sequential form when the record carries no candidate id.
pub fn assign_id(config: &IdConfig, seq: usize, record: &FinalRecord) -> String {
    let abbr = &config.workspace_abbr;
    match config.strategy {
        IdStrategy::Candidate => {
            if let Some(id) = record.candidate_id.as_deref().map(str::trim)
                && !id.is_empty()
            {
                return id.to_string();
            }
        }
        IdStrategy::Hash => {
            let anchor = record.anchor_chunk_id.as_deref().unwrap_or_default();
            let digest = sha256_hex_lines(&[anchor, &record.instruction, &record.output]);
            return format!("{abbr}_{}_q1", &digest[..16]);
        }
        IdStrategy::Sequential => {}
    }
    format!("{abbr}_{seq:0width$}_q1", width = config.zero_pad)
}

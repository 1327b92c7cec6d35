//! Audit changelog kept next to the final datasets. Newest entry first.

use super::Counters;
use crate::config::DatasetConfig;
use crate::digest::current_timestamp_rfc3339;
use serde_json::{Value, json};
use std::path::Path;

const HEADER: &str = "# QA Dataset Changelog\n\n";

/// One run's audit entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogEntry {
    /// Dataset version.
    pub version: String,
    /// RFC3339 timestamp.
    pub timestamp: String,
    /// Dataset file name.
    pub output: String,
    /// Counts for the run.
    pub counters: Counters,
    /// Active filter configuration.
    pub filters: Value,
}

impl ChangelogEntry {
    /// Entry stamped with the current time.
    pub fn new(version: &str, output: String, counters: &Counters, filters: Value) -> Self {
        Self {
            version: version.to_string(),
            timestamp: current_timestamp_rfc3339(),
            output,
            counters: counters.clone(),
            filters,
        }
    }

    /// Markdown section for this entry.
    pub fn render(&self) -> String {
        let counters = &self.counters;
        let reasons = serde_json::to_string(&counters.reasons).unwrap_or_default();
        let filters = serde_json::to_string(&self.filters).unwrap_or_default();
        [
            format!("## {} - {}", self.version, self.timestamp),
            String::new(),
            format!("- output: `{}`", self.output),
            format!("- kept: {}", counters.kept),
            format!("- read: {}", counters.read),
            format!("- dropped: {}", counters.dropped),
            format!("- duplicates_removed: {}", counters.duped),
            format!("- reject_reasons: {reasons}"),
            String::new(),
            format!("- filters: {filters}"),
            String::new(),
        ]
        .join("\n")
    }
}

/// Insert `entry` at the top of the changelog, creating it with a header when absent.
pub fn prepend_entry(path: &Path, entry: &ChangelogEntry) -> std::io::Result<()> {
    let section = entry.render();
    let body = match std::fs::read_to_string(path) {
        Ok(existing) => match existing.strip_prefix(HEADER) {
            Some(rest) => format!("{HEADER}{section}\n{rest}"),
            None => format!("{section}\n{existing}"),
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => format!("{HEADER}{section}"),
        Err(error) => return Err(error),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)
}

/// Filter, dedup, id, and sharding settings recorded with every entry.
pub fn filter_echo(config: &DatasetConfig) -> Value {
    let filters = &config.filters;
    json!({
        "min_question_chars": filters.min_question_chars,
        "max_question_chars": filters.max_question_chars,
        "min_answer_chars": filters.min_answer_chars,
        "max_answer_chars": filters.max_answer_chars,
        "languages_allowed": filters.languages_allowed,
        "trust_levels_allowed": filters.trust_levels_allowed,
        "content_types_allowed": filters.content_types_allowed,
        "require_nonempty_sources": filters.require_nonempty_sources,
        "drop_if_language_mismatch": filters.drop_if_language_mismatch,
        "dedup": config.dedup,
        "id": config.ids,
        "map": config.map,
        "num_shards": config.sharding.num_shards,
    })
}

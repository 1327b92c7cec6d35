//! Shared filter, dedup, and limit loop over candidate files.

use super::dedup::Deduplicator;
use super::filters::{RejectReason, map_candidate};
use super::{Counters, DatasetError, FinalRecord, RejectRecord, io_error};
use crate::config::DatasetConfig;
use crate::jsonl::{list_files, read_jsonl_numbered};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Kept records, rejects, and counts from one pass over the candidate files.
#[derive(Debug, Default)]
pub struct Curation {
    /// Mapped records without ids, in read order.
    pub records: Vec<FinalRecord>,
    /// Dropped rows with reason codes.
    pub rejects: Vec<RejectRecord>,
    /// Counts.
    pub counters: Counters,
}

/// Streams candidate rows through filters and exact dedup.
pub struct Curator<'a> {
    config: &'a DatasetConfig,
    version: &'a str,
    limit: usize,
}

impl<'a> Curator<'a> {
    /// Curator stamping records with `version`, keeping at most `limit` rows (0 = unlimited).
    pub fn new(config: &'a DatasetConfig, version: &'a str, limit: usize) -> Self {
        Self {
            config,
            version,
            limit,
        }
    }

    /// Candidate files in the configured directory, after the file limit.
    pub fn candidate_files(&self) -> Result<Vec<PathBuf>, DatasetError> {
        let config = self.config;
        let dir = config.resolve(&config.paths.candidates_dir);
        if !dir.is_dir() {
            return Err(DatasetError::MissingInput(dir));
        }
        let mut files =
            list_files(&dir, &[config.paths.file_suffix.as_str()]).map_err(io_error(&dir))?;
        if config.limits.limit_num_files > 0 {
            files.truncate(config.limits.limit_num_files);
        }
        Ok(files)
    }

    /// Run every row accepted by `select` through the filters.
    ///
    /// Rows `select` rejects are not counted at all; they belong to another shard. Rows that
    /// pass past the example limit are rejected as `limit_reached`, so `read` always equals
    /// `kept + dropped + duped`.
    pub fn curate<F>(&self, files: &[PathBuf], mut select: F) -> Result<Curation, DatasetError>
    where
        F: FnMut(&Value) -> bool,
    {
        let config = self.config;
        let mut dedup = Deduplicator::new(config.dedup.mode);
        let mut curation = Curation::default();

        let mut limit_logged = false;
        for path in files {
            let read = read_jsonl_numbered::<Value>(path).map_err(io_error(path))?;
            let file = file_label(path);
            for (line, candidate) in read.records {
                if !candidate.is_object() || !select(&candidate) {
                    continue;
                }
                curation.counters.read += 1;
                let record = match map_candidate(
                    &candidate,
                    &config.filters,
                    &config.mapping.input_value,
                    self.version,
                ) {
                    Ok(record) => record,
                    Err(reason) => {
                        let reason = reason.to_string();
                        curation.counters.reject(&reason);
                        curation.rejects.push(RejectRecord {
                            reason,
                            file: file.clone(),
                            line,
                            candidate_id: string_field(&candidate, "id"),
                            anchor_chunk_id: string_field(&candidate, "anchor_chunk_id"),
                        });
                        continue;
                    }
                };
                if !dedup.admit(&record) {
                    curation.counters.duped += 1;
                    continue;
                }
                if self.limit > 0 && curation.counters.kept >= self.limit {
                    if !limit_logged {
                        tracing::info!(limit = self.limit, "Example limit reached; counting the rest as rejects");
                        limit_logged = true;
                    }
                    let reason = RejectReason::LimitReached.to_string();
                    curation.counters.reject(&reason);
                    curation.rejects.push(RejectRecord {
                        reason,
                        file: file.clone(),
                        line,
                        candidate_id: record.candidate_id.clone(),
                        anchor_chunk_id: record.anchor_chunk_id.clone(),
                    });
                    continue;
                }
                curation.records.push(record);
                curation.counters.kept += 1;

                let kept = curation.counters.kept;
                if config.log_every_n > 0 && kept % config.log_every_n == 0 {
                    tracing::info!(
                        kept,
                        read = curation.counters.read,
                        dropped = curation.counters.dropped,
                        duped = curation.counters.duped,
                        "Progress"
                    );
                }
            }
        }
        Ok(curation)
    }
}

pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

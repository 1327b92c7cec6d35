//! Reduce phase: merge every shard, dedup across shards, assign final ids, publish.

use super::curate::file_label;
use super::dedup::Deduplicator;
use super::filters::{RejectReason, check_record};
use super::ids::assign_id;
use super::shard::{ShardPaths, ShardStats};
use super::version::resolve_version;
use super::{Counters, DatasetError, DatasetMode, DatasetReport, FinalRecord, RejectRecord, io_error, publish};
use crate::config::DatasetConfig;
use crate::jsonl::{read_jsonl, read_jsonl_numbered};
use serde_json::Value;

/// Merge all `num_shards` shard files into the versioned dataset.
///
/// Every shard data file must exist; a missing one aborts before anything is written.
/// Manifests only feed the changelog, so a missing manifest is a warning and that shard's
/// read count falls back to the rows found in its data file.
pub fn run_reduce(config: &DatasetConfig) -> Result<DatasetReport, DatasetError> {
    let final_dir = config.resolve(&config.paths.final_dir);
    let version = resolve_version(
        &config.output.version,
        DatasetMode::Reduce,
        &final_dir,
        &config.output.dataset_name,
    )?;
    let num_shards = config.sharding.num_shards;

    let shards: Vec<ShardPaths> = (0..num_shards)
        .map(|shard_id| ShardPaths::for_config(config, &version, shard_id))
        .collect();
    for (shard_id, paths) in (0..num_shards).zip(&shards) {
        let data = paths.data();
        if !data.is_file() {
            return Err(DatasetError::MissingShard {
                shard_id,
                num_shards,
                path: data,
            });
        }
    }
    tracing::info!(num_shards, version = %version, "Starting reduce phase");

    let mut counters = Counters::default();
    let mut rejects: Vec<RejectRecord> = Vec::new();
    let mut records: Vec<FinalRecord> = Vec::new();
    let mut dedup = Deduplicator::new(config.dedup.mode);
    let limit = config.limits.limit_num_examples;

    for (shard_id, paths) in (0..num_shards).zip(&shards) {
        let data = paths.data();
        let rows = read_jsonl_numbered::<Value>(&data).map_err(io_error(&data))?;
        let file = file_label(&data);

        match load_stats(paths)? {
            Some(stats) => {
                let mut upstream = stats.counters;
                upstream.kept = 0;
                counters.absorb(&upstream);
            }
            None => {
                tracing::warn!(shard_id, file = %paths.stats().display(), "Shard manifest missing; changelog counts cover shard rows only");
                counters.read += rows.records.len() + rows.malformed;
            }
        }
        if config.output.write_rejects {
            let shard_rejects = paths.rejects();
            if shard_rejects.is_file() {
                let upstream = read_jsonl::<RejectRecord>(&shard_rejects).map_err(io_error(&shard_rejects))?;
                rejects.extend(upstream.records);
            }
        }
        for _ in 0..rows.malformed {
            counters.reject(&RejectReason::InvalidRecord.to_string());
        }

        for (line, row) in rows.records {
            let candidate_id = row.get("candidate_id").and_then(Value::as_str).map(str::to_string);
            let anchor_chunk_id = row.get("anchor_chunk_id").and_then(Value::as_str).map(str::to_string);
            let checked = serde_json::from_value::<FinalRecord>(row)
                .map_err(|_| RejectReason::InvalidRecord)
                .and_then(|record| check_record(&record, &config.filters).map(|()| record));
            let mut record = match checked {
                Ok(record) => record,
                Err(reason) => {
                    let reason = reason.to_string();
                    counters.reject(&reason);
                    rejects.push(RejectRecord {
                        reason,
                        file: file.clone(),
                        line,
                        candidate_id,
                        anchor_chunk_id,
                    });
                    continue;
                }
            };
            if !dedup.admit(&record) {
                counters.duped += 1;
                continue;
            }
            if limit > 0 && records.len() >= limit {
                let reason = RejectReason::LimitReached.to_string();
                counters.reject(&reason);
                rejects.push(RejectRecord {
                    reason,
                    file: file.clone(),
                    line,
                    candidate_id: record.candidate_id.clone(),
                    anchor_chunk_id: record.anchor_chunk_id.clone(),
                });
                continue;
            }
            record.version = version.clone();
            record.id = Some(assign_id(&config.ids, records.len() + 1, &record));
            records.push(record);
        }
        tracing::debug!(shard_id, kept = records.len(), "Merged shard");
    }
    counters.kept = records.len();

    publish(config, DatasetMode::Reduce, &version, &records, &rejects, counters)
}

fn load_stats(paths: &ShardPaths) -> Result<Option<ShardStats>, DatasetError> {
    let path = paths.stats();
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(DatasetError::Io { path, source }),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| DatasetError::Json { path, source })
}

//! Map phase: deterministic partitioning of candidates into shard files.

use super::curate::Curator;
use super::version::resolve_version;
use super::{Counters, DatasetError, DatasetMode, DatasetReport, io_error};
use crate::candidates::shard_share;
use crate::config::{DatasetConfig, ShardKeyField};
use crate::digest::stable_hash;
use crate::jsonl::{write_json_atomic, write_jsonl_atomic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Shard index for `key`: `stable_hash(key) mod num_shards`.
pub fn shard_of(key: &str, num_shards: u32) -> u32 {
    (stable_hash(key) % u64::from(num_shards.max(1))) as u32
}

/// Partition key of a candidate row; missing fields hash as the empty string.
pub fn shard_key(candidate: &Value, field: ShardKeyField) -> &str {
    let name = match field {
        ShardKeyField::AnchorChunkId => "anchor_chunk_id",
        ShardKeyField::Question => "question",
    };
    candidate.get(name).and_then(Value::as_str).unwrap_or_default()
}

/// File names of one shard: data, rejects, and stats manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPaths {
    stem: PathBuf,
}

impl ShardPaths {
    /// `{shards_dir}/{dataset}_{version}.shard-{k:04}-of-{n:04}`.
    pub fn new(shards_dir: &Path, dataset_name: &str, version: &str, shard_id: u32, num_shards: u32) -> Self {
        Self {
            stem: shards_dir.join(format!(
                "{dataset_name}_{version}.shard-{shard_id:04}-of-{num_shards:04}"
            )),
        }
    }

    /// Paths for `shard_id` under the configured shards directory.
    pub fn for_config(config: &DatasetConfig, version: &str, shard_id: u32) -> Self {
        Self::new(
            &config.resolve(&config.paths.shards_dir),
            &config.output.dataset_name,
            version,
            shard_id,
            config.sharding.num_shards,
        )
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.stem.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Kept records.
    pub fn data(&self) -> PathBuf {
        self.with_suffix(".jsonl")
    }

    /// Dropped rows.
    pub fn rejects(&self) -> PathBuf {
        self.with_suffix(".rejects.jsonl")
    }

    /// Counts manifest.
    pub fn stats(&self) -> PathBuf {
        self.with_suffix(".stats.json")
    }
}

/// Manifest written next to every shard file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    /// Dataset name.
    pub dataset_name: String,
    /// Dataset version.
    pub version: String,
    /// Shard index.
    pub shard_id: u32,
    /// Shard count.
    pub num_shards: u32,
    /// Counts for this shard.
    pub counters: Counters,
}

/// Filter and locally dedup the candidates owned by this worker, then write its shard.
pub fn run_map(config: &DatasetConfig) -> Result<DatasetReport, DatasetError> {
    let final_dir = config.resolve(&config.paths.final_dir);
    let version = resolve_version(
        &config.output.version,
        DatasetMode::Map,
        &final_dir,
        &config.output.dataset_name,
    )?;
    let sharding = &config.sharding;
    let limit = shard_share(config.limits.limit_num_examples, sharding.num_shards);
    let curator = Curator::new(config, &version, limit);
    let files = curator.candidate_files()?;

    tracing::info!(
        shard_id = sharding.shard_id,
        num_shards = sharding.num_shards,
        version = %version,
        files = files.len(),
        key = ?config.map.key,
        "Starting map phase"
    );

    let key = config.map.key;
    let curation = curator.curate(&files, |candidate| {
        shard_of(shard_key(candidate, key), sharding.num_shards) == sharding.shard_id
    })?;

    let paths = ShardPaths::for_config(config, &version, sharding.shard_id);
    let counters = curation.counters;
    tracing::info!(
        shard_id = sharding.shard_id,
        read = counters.read,
        kept = counters.kept,
        dropped = counters.dropped,
        duped = counters.duped,
        "Map phase counts"
    );

    if config.dry_run {
        tracing::info!(file = %paths.data().display(), "Dry run: not writing shard");
        return Ok(DatasetReport {
            mode: DatasetMode::Map,
            version,
            output: None,
            counters,
        });
    }

    let data = paths.data();
    write_jsonl_atomic(&data, &curation.records).map_err(io_error(&data))?;
    if config.output.write_rejects {
        let rejects = paths.rejects();
        write_jsonl_atomic(&rejects, &curation.rejects).map_err(io_error(&rejects))?;
    }
    let stats = ShardStats {
        dataset_name: config.output.dataset_name.clone(),
        version: version.clone(),
        shard_id: sharding.shard_id,
        num_shards: sharding.num_shards,
        counters: counters.clone(),
    };
    let stats_path = paths.stats();
    write_json_atomic(&stats_path, &stats).map_err(io_error(&stats_path))?;

    tracing::info!(file = %data.display(), kept = counters.kept, "Wrote shard");
    Ok(DatasetReport {
        mode: DatasetMode::Map,
        version,
        output: Some(data),
        counters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shard_assignment_is_stable() {
        for key in ["c1", "doc_7_chunk_3", ""] {
            let first = shard_of(key, 4);
            assert!(first < 4);
            assert_eq!(first, shard_of(key, 4));
            assert_eq!(first as u64, stable_hash(key) % 4);
        }
        assert_eq!(shard_of("anything", 1), 0);
    }

    #[test]
    fn key_field_selects_value() {
        let row = json!({"anchor_chunk_id": "c1", "question": "Why?"});
        assert_eq!(shard_key(&row, ShardKeyField::AnchorChunkId), "c1");
        assert_eq!(shard_key(&row, ShardKeyField::Question), "Why?");
        assert_eq!(shard_key(&json!({}), ShardKeyField::Question), "");
    }

    #[test]
    fn shard_file_names_are_zero_padded() {
        let paths = ShardPaths::new(Path::new("/out"), "qa_final", "v2", 3, 16);
        assert_eq!(paths.data(), PathBuf::from("/out/qa_final_v2.shard-0003-of-0016.jsonl"));
        assert_eq!(
            paths.rejects(),
            PathBuf::from("/out/qa_final_v2.shard-0003-of-0016.rejects.jsonl")
        );
        assert_eq!(paths.stats(), PathBuf::from("/out/qa_final_v2.shard-0003-of-0016.stats.json"));
    }
}

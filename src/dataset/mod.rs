//! Dataset finalization: candidate files in, versioned instruction-tuning dataset out.
//!
//! Three modes share one filter/dedup/id core:
//!
//! * `single` reads every candidate file and publishes the dataset directly.
//! * `map` keeps the candidates hashing to this worker's shard and writes an intermediate
//!   shard file with its rejects and a stats manifest.
//! * `reduce` merges exactly `num_shards` shard files, removes cross-shard duplicates, assigns
//!   final ids, and publishes.
//!
//! Sharded runs need an explicit version because independent workers cannot agree on the
//! next one.

pub mod changelog;
pub mod curate;
pub mod dedup;
pub mod filters;
pub mod ids;
pub mod reduce;
pub mod shard;
pub mod single;
pub mod version;

pub use changelog::{ChangelogEntry, filter_echo, prepend_entry};
pub use curate::{Curation, Curator};
pub use dedup::{Deduplicator, dedup_key};
pub use filters::{RejectReason, detect_lang_simple, map_candidate, slug};
pub use ids::assign_id;
pub use reduce::run_reduce;
pub use shard::{ShardPaths, ShardStats, run_map, shard_key, shard_of};
pub use single::run_single;
pub use version::{infer_next_version, parse_version, resolve_version};

use crate::config::{ConfigError, DatasetConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fatal finalization errors.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// A shard file expected by the reducer does not exist.
    #[error("Shard {shard_id} of {num_shards} is missing: {path}")]
    MissingShard {
        /// Missing shard index.
        shard_id: u32,
        /// Expected shard count.
        num_shards: u32,
        /// Expected file.
        path: PathBuf,
    },
    /// `auto` versioning was requested in a sharded mode.
    #[error("An explicit version (vN) is required in {0} mode")]
    VersionRequired(DatasetMode),
    /// Version string is neither `auto` nor `vN`.
    #[error("Invalid dataset version {0:?}; expected `auto` or `vN`")]
    InvalidVersion(String),
    /// Versioned output already exists and overwriting is disabled.
    #[error("Refusing to overwrite existing dataset {0}")]
    OutputExists(PathBuf),
    /// Candidate directory does not exist.
    #[error("Candidate directory does not exist: {0}")]
    MissingInput(PathBuf),
    /// File system failure.
    #[error("I/O failure on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// A manifest or record could not be serialized or parsed.
    #[error("JSON failure on {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Finalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMode {
    /// One process does everything.
    Single,
    /// Partition and filter one shard.
    Map,
    /// Merge all shards.
    Reduce,
}

impl DatasetMode {
    /// Lowercase mode name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Map => "map",
            Self::Reduce => "reduce",
        }
    }
}

impl fmt::Display for DatasetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction-tuning sample.
///
/// Shard files hold records without `id`; the reducer (or the single-process path) assigns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    /// Final id, unique within the dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Question text.
    pub instruction: String,
    /// Constant input placeholder.
    #[serde(default)]
    pub input: String,
    /// Answer text.
    pub output: String,
    /// Declared language or `unknown`.
    pub language: String,
    /// Content types from the anchor.
    #[serde(default)]
    pub content_type: Vec<String>,
    /// Domains from the anchor.
    #[serde(default)]
    pub domain: Vec<String>,
    /// Trust level or `unknown`.
    pub trust_level: String,
    /// Cited chunks as `chunk:<id>`.
    #[serde(default)]
    pub source_ids: Vec<String>,
    /// Record origin marker.
    pub created_by: String,
    /// RFC3339 mapping timestamp.
    pub created_at: String,
    /// Dataset version.
    pub version: String,
    /// Candidate provenance, passed through untouched.
    #[serde(default)]
    pub provenance: Value,
    /// Originating candidate id.
    #[serde(default)]
    pub candidate_id: Option<String>,
    /// Anchor chunk of the originating candidate.
    #[serde(default)]
    pub anchor_chunk_id: Option<String>,
    /// Anchor document of the originating candidate.
    #[serde(default)]
    pub anchor_doc_id: Option<String>,
    /// Difficulty label.
    #[serde(default)]
    pub difficulty: Option<String>,
    /// Workspace label, empty when unknown.
    #[serde(default)]
    pub workspace: String,
    /// Topic slug, empty when unknown.
    #[serde(default)]
    pub topic: String,
}

/// One dropped row with its reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRecord {
    /// Reason code such as `question_too_short`.
    pub reason: String,
    /// File the row came from.
    pub file: String,
    /// 1-based line number in `file`.
    pub line: usize,
    /// Candidate id, when present.
    pub candidate_id: Option<String>,
    /// Anchor chunk id, when present.
    pub anchor_chunk_id: Option<String>,
}

/// Row counts for one run or shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    /// Rows read.
    pub read: usize,
    /// Rows kept.
    pub kept: usize,
    /// Rows rejected by filters.
    pub dropped: usize,
    /// Rows removed as exact duplicates.
    pub duped: usize,
    /// Rejections per reason code.
    pub reasons: BTreeMap<String, usize>,
}

impl Counters {
    /// Count one rejected row.
    pub fn reject(&mut self, reason: &str) {
        self.dropped += 1;
        *self.reasons.entry(reason.to_string()).or_default() += 1;
    }

    /// Add another worker's counts to these.
    pub fn absorb(&mut self, other: &Counters) {
        self.read += other.read;
        self.kept += other.kept;
        self.dropped += other.dropped;
        self.duped += other.duped;
        for (reason, count) in &other.reasons {
            *self.reasons.entry(reason.clone()).or_default() += count;
        }
    }
}

/// What a finalization run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetReport {
    /// Mode that ran.
    pub mode: DatasetMode,
    /// Resolved version.
    pub version: String,
    /// Dataset or shard file, `None` on dry runs.
    pub output: Option<PathBuf>,
    /// Final counts.
    pub counters: Counters,
}

/// Run finalization in `mode`.
pub fn run(config: &DatasetConfig, mode: DatasetMode) -> Result<DatasetReport, DatasetError> {
    config.validate()?;
    match mode {
        DatasetMode::Single => run_single(config),
        DatasetMode::Map => run_map(config),
        DatasetMode::Reduce => run_reduce(config),
    }
}

/// Versioned dataset file inside the final directory.
pub fn dataset_path(config: &DatasetConfig, version: &str) -> PathBuf {
    config
        .resolve(&config.paths.final_dir)
        .join(format!("{}_{version}.jsonl", config.output.dataset_name))
}

/// Rejects file for a version inside the final directory, named by `output.rejects_filename`.
pub fn rejects_path(config: &DatasetConfig, version: &str) -> PathBuf {
    let name = config
        .output
        .rejects_filename
        .replace("{dataset}", &config.output.dataset_name)
        .replace("{version}", version);
    config.resolve(&config.paths.final_dir).join(name)
}

/// Write the dataset, its rejects, and a changelog entry. Nothing is written on dry runs.
pub(crate) fn publish(
    config: &DatasetConfig,
    mode: DatasetMode,
    version: &str,
    records: &[FinalRecord],
    rejects: &[RejectRecord],
    counters: Counters,
) -> Result<DatasetReport, DatasetError> {
    let output = dataset_path(config, version);
    tracing::info!(
        mode = %mode,
        version,
        read = counters.read,
        kept = counters.kept,
        dropped = counters.dropped,
        duped = counters.duped,
        "Finalization counts"
    );

    if config.dry_run {
        tracing::info!(output = %output.display(), "Dry run: not writing dataset");
        return Ok(DatasetReport {
            mode,
            version: version.to_string(),
            output: None,
            counters,
        });
    }

    if output.exists() && !config.output.overwrite_existing {
        return Err(DatasetError::OutputExists(output));
    }
    crate::jsonl::write_jsonl_atomic(&output, records).map_err(io_error(&output))?;

    if config.output.write_rejects {
        let path = rejects_path(config, version);
        crate::jsonl::write_jsonl_atomic(&path, rejects).map_err(io_error(&path))?;
        tracing::info!(rejects = rejects.len(), file = %path.display(), "Wrote rejects");
    }

    if config.output.write_changelog {
        let path = config
            .resolve(&config.paths.final_dir)
            .join(&config.output.changelog_filename);
        let file_name = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = ChangelogEntry::new(version, file_name, &counters, filter_echo(config));
        prepend_entry(&path, &entry).map_err(io_error(&path))?;
    }

    tracing::info!(kept = records.len(), file = %output.display(), "Wrote dataset");
    Ok(DatasetReport {
        mode,
        version: version.to_string(),
        output: Some(output),
        counters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_absorb_merges_reasons() {
        let mut total = Counters::default();
        let mut shard = Counters {
            read: 3,
            kept: 1,
            duped: 1,
            ..Default::default()
        };
        shard.reject("missing_sources");
        total.absorb(&shard);
        total.absorb(&shard);

        assert_eq!(total.read, 6);
        assert_eq!(total.kept, 2);
        assert_eq!(total.dropped, 2);
        assert_eq!(total.duped, 2);
        assert_eq!(total.reasons.get("missing_sources"), Some(&2));
    }

    #[test]
    fn rejects_path_follows_configured_pattern() {
        let mut config = DatasetConfig {
            workspace_root: Some(PathBuf::from("/ws")),
            ..Default::default()
        };
        assert_eq!(
            rejects_path(&config, "v2"),
            PathBuf::from("/ws/qa_final/jsonl/qa_rejects_v2.jsonl")
        );
        config.output.dataset_name = "thermo".into();
        config.output.rejects_filename = "{dataset}_rejects_{version}.jsonl".into();
        assert_eq!(
            rejects_path(&config, "v2"),
            PathBuf::from("/ws/qa_final/jsonl/thermo_rejects_v2.jsonl")
        );
    }

    #[test]
    fn final_record_without_id_omits_field() {
        let record = FinalRecord {
            id: None,
            instruction: "q".into(),
            input: String::new(),
            output: "a".into(),
            language: "en".into(),
            content_type: vec![],
            domain: vec![],
            trust_level: "high".into(),
            source_ids: vec!["chunk:c1".into()],
            created_by: "llm_auto".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            version: "v1".into(),
            provenance: Value::Null,
            candidate_id: None,
            anchor_chunk_id: None,
            anchor_doc_id: None,
            difficulty: None,
            workspace: String::new(),
            topic: String::new(),
        };
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json.get("id").is_none());
        let back: FinalRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }
}

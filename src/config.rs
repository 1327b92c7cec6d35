//! Strongly-typed configuration for the generation and finalization stages.
//!
//! Both stages read a JSON document from disk. Every section carries explicit defaults, unknown
//! keys are rejected, and [`GenerationConfig::validate`] / [`DatasetConfig::validate`] run once at
//! startup so later code can rely on the invariants without re-checking them.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors encountered while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required key was not provided by the file, the CLI, or the environment.
    #[error("Missing configuration key: {0}")]
    MissingKey(String),
    /// Key was present but its value violates a constraint.
    #[error("Invalid value for configuration key {key}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending key.
        key: String,
        /// Human-readable description of the violated constraint.
        reason: String,
    },
    /// Configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Configuration file was not valid JSON for the expected schema.
    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying JSON failure.
        #[source]
        source: serde_json::Error,
    },
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

// ---------------------------------------------------------------------------------------------
// Generation stage
// ---------------------------------------------------------------------------------------------

/// Configuration for candidate generation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Root that every relative path is resolved against. Required after CLI/env merging.
    pub workspace_root: Option<PathBuf>,
    /// Input and output directories.
    pub paths: GenerationPaths,
    /// Anchor and neighbor label filters.
    pub filters: ChunkFilters,
    /// Local and vector neighbor selection.
    pub neighbors: NeighborConfig,
    /// Context group sizing.
    pub grouping: GroupingConfig,
    /// Per-group, per-document, and global emission limits.
    pub sampling: SamplingConfig,
    /// Language-model endpoint, model parameters, and retry policy.
    pub llm: LlmConfig,
    /// Vector-similarity collaborator.
    pub retrieval: RetrievalConfig,
    /// Optional prompt file overrides.
    pub prompts: PromptFiles,
    /// Output naming.
    pub output: GenerationOutput,
    /// Resume, dry-run, and progress settings.
    pub runtime: RuntimeConfig,
    /// Debug limits.
    pub debug: DebugLimits,
    /// Process-level sharding of input files.
    pub sharding: ShardingConfig,
}

/// Workspace-relative directories used by the generation stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationPaths {
    /// Directory containing semantically annotated chunk files (`*.jsonl` / `*.json`).
    pub semantic_dir: PathBuf,
    /// Directory receiving candidate files and their checkpoints.
    pub candidates_dir: PathBuf,
}

impl Default for GenerationPaths {
    fn default() -> Self {
        Self {
            semantic_dir: PathBuf::from("semantic/json"),
            candidates_dir: PathBuf::from("qa_candidates/jsonl"),
        }
    }
}

/// Label filters applied to anchors and to vector neighbors.
///
/// Empty allow-lists accept everything.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkFilters {
    /// Allowed chunk languages.
    pub languages_allowed: Vec<String>,
    /// Allowed trust levels.
    pub trust_levels_allowed: Vec<String>,
    /// Allowed content types (any overlap passes).
    pub content_types_allowed: Vec<String>,
    /// Allowed chunk roles for anchors (any overlap passes).
    pub chunk_roles_allowed: Vec<String>,
    /// Content types that exclude a vector neighbor.
    pub content_types_disallowed: Vec<String>,
    /// Chunk roles that exclude a vector neighbor.
    pub chunk_roles_disallowed: Vec<String>,
    /// Require at least one shared domain between anchor and neighbor when both declare one.
    pub require_domain_overlap: bool,
}

impl Default for ChunkFilters {
    fn default() -> Self {
        Self {
            languages_allowed: Vec::new(),
            trust_levels_allowed: Vec::new(),
            content_types_allowed: Vec::new(),
            chunk_roles_allowed: Vec::new(),
            content_types_disallowed: Vec::new(),
            chunk_roles_disallowed: Vec::new(),
            require_domain_overlap: true,
        }
    }
}

/// Local and vector neighbor selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeighborConfig {
    /// Sequential neighbors taken before the anchor.
    pub max_local_neighbors_before: usize,
    /// Sequential neighbors taken after the anchor.
    pub max_local_neighbors_after: usize,
    /// Number of neighbors requested from the retrieval collaborator.
    pub top_k: usize,
    /// Cap on filtered vector neighbors (0 disables the cap).
    pub max_neighbors: usize,
    /// Optional similarity threshold; its direction follows the retrieval metric.
    pub similarity_threshold: Option<f32>,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            max_local_neighbors_before: 1,
            max_local_neighbors_after: 1,
            top_k: 16,
            max_neighbors: 8,
            similarity_threshold: None,
        }
    }
}

/// Context group sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupingConfig {
    /// Smallest acceptable group (anchor included).
    pub min_group_size: usize,
    /// Largest acceptable group (anchor included).
    pub max_group_size: usize,
    /// Upper bound on groups built for one anchor.
    pub max_groups_per_chunk: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            min_group_size: 2,
            max_group_size: 6,
            max_groups_per_chunk: 2,
        }
    }
}

/// Emission limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    /// Pairs requested from the model per context group.
    pub max_qa_per_group: usize,
    /// Global cap on written candidates across the run (0 = unlimited).
    pub global_qa_limit: usize,
    /// Per-document quota policy.
    pub quota: QuotaConfig,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_qa_per_group: 3,
            global_qa_limit: 0,
            quota: QuotaConfig::default(),
        }
    }
}

/// How the per-document quota is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaMode {
    /// Fixed number of candidates per document (`per_document`, 0 = unlimited).
    Fixed,
    /// Derived from document chunk count and character volume, then clamped.
    Adaptive,
}

/// Per-document quota policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
    /// Quota computation mode.
    pub mode: QuotaMode,
    /// Fixed quota (only for [`QuotaMode::Fixed`]; 0 = unlimited).
    pub per_document: usize,
    /// Candidates budgeted per eligible chunk (adaptive mode).
    pub qa_per_chunk: f64,
    /// Characters of content budgeted per candidate (adaptive mode, 0 disables).
    pub chars_per_qa: usize,
    /// Lower clamp for adaptive quotas.
    pub min_per_document: usize,
    /// Upper clamp for adaptive quotas.
    pub max_per_document: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            mode: QuotaMode::Fixed,
            per_document: 0,
            qa_per_chunk: 0.5,
            chars_per_qa: 1500,
            min_per_document: 1,
            max_per_document: 200,
        }
    }
}

/// Language-model endpoint and parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Base URL of the Ollama runtime (overridden by `OLLAMA_URL`).
    pub base_url: String,
    /// Model tag; a missing tag on the server is fatal.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Maximum tokens to predict.
    pub num_predict: u32,
    /// Context window requested from the runtime.
    pub num_ctx: u32,
    /// Per-request timeout.
    pub request_timeout_s: u64,
    /// Attempts per call, including the first.
    pub max_retries: u32,
    /// Base backoff delay.
    pub base_delay_ms: u64,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter_ms: u64,
    /// Run the plan pass before generation.
    pub plan_enabled: bool,
    /// Per-chunk character budget when rendering context.
    pub max_chars_per_chunk: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b-instruct".to_string(),
            temperature: 0.2,
            top_p: 0.9,
            num_predict: 1024,
            num_ctx: 8192,
            request_timeout_s: 120,
            max_retries: 3,
            base_delay_ms: 500,
            jitter_ms: 250,
            plan_enabled: true,
            max_chars_per_chunk: 1200,
        }
    }
}

/// Connection settings for the vector-similarity collaborator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Base URL of the Qdrant instance (overridden by `QDRANT_URL`).
    pub qdrant_url: String,
    /// Collection holding chunk vectors (overridden by `QDRANT_COLLECTION_NAME`).
    pub collection: String,
    /// Optional API key (overridden by `QDRANT_API_KEY`).
    pub api_key: Option<String>,
    /// Payload key holding the chunk id.
    pub chunk_id_field: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://127.0.0.1:6333".to_string(),
            collection: "chunks".to_string(),
            api_key: None,
            chunk_id_field: "chunk_id".to_string(),
        }
    }
}

/// Optional workspace-relative prompt files.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptFiles {
    /// System prompt for the plan pass.
    pub plan_system_file: Option<PathBuf>,
    /// User template for the plan pass.
    pub plan_user_template_file: Option<PathBuf>,
    /// System prompt for the generate pass.
    pub generate_system_file: Option<PathBuf>,
    /// User template for the generate pass.
    pub generate_user_template_file: Option<PathBuf>,
}

/// Candidate output naming.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationOutput {
    /// File name pattern; `{input_basename}` is replaced by the input file stem.
    pub file_pattern: String,
}

impl Default for GenerationOutput {
    fn default() -> Self {
        Self {
            file_pattern: "{input_basename}.qa_candidates.jsonl".to_string(),
        }
    }
}

/// How existing candidate output is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Skip checkpointed anchors and append.
    Resume,
    /// Truncate output and checkpoint before processing.
    Overwrite,
}

/// Runtime switches for the generation stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Resume behaviour for existing output.
    pub resume_mode: ResumeMode,
    /// Assemble groups but never call the model or write output.
    pub dry_run: bool,
    /// Progress log cadence in written candidates.
    pub log_every_n: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resume_mode: ResumeMode::Resume,
            dry_run: false,
            log_every_n: 50,
        }
    }
}

/// Debug limits (0 disables each).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugLimits {
    /// Process at most this many input files.
    pub limit_num_files: usize,
    /// Inspect at most this many chunks per file.
    pub limit_num_chunks: usize,
}

/// Process-level sharding parameters shared by both stages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShardingConfig {
    /// Total number of independent workers.
    pub num_shards: u32,
    /// Zero-based index of this worker.
    pub shard_id: u32,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            num_shards: 1,
            shard_id: 0,
        }
    }
}

impl ShardingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_shards == 0 {
            return Err(invalid("sharding.num_shards", "must be at least 1"));
        }
        if self.shard_id >= self.num_shards {
            return Err(invalid(
                "sharding.shard_id",
                format!("{} is out of range for {} shards", self.shard_id, self.num_shards),
            ));
        }
        Ok(())
    }
}

impl GenerationConfig {
    /// Load the configuration file without validating it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// Apply `OLLAMA_URL`, `QDRANT_URL`, `QDRANT_API_KEY`, and `QDRANT_COLLECTION_NAME`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = load_env_optional("OLLAMA_URL") {
            self.llm.base_url = url;
        }
        if let Some(url) = load_env_optional("QDRANT_URL") {
            self.retrieval.qdrant_url = url;
        }
        if let Some(key) = load_env_optional("QDRANT_API_KEY") {
            self.retrieval.api_key = Some(key);
        }
        if let Some(collection) = load_env_optional("QDRANT_COLLECTION_NAME") {
            self.retrieval.collection = collection;
        }
    }

    /// Check cross-field invariants. Must be called once before the config is used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_root.is_none() {
            return Err(ConfigError::MissingKey("workspace_root".into()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingKey("llm.model".into()));
        }
        if self.llm.max_retries == 0 {
            return Err(invalid("llm.max_retries", "must be at least 1"));
        }
        let grouping = &self.grouping;
        if grouping.min_group_size == 0 {
            return Err(invalid("grouping.min_group_size", "must be at least 1"));
        }
        if grouping.max_group_size < grouping.min_group_size {
            return Err(invalid(
                "grouping.max_group_size",
                "must not be smaller than grouping.min_group_size",
            ));
        }
        if grouping.max_groups_per_chunk == 0 {
            return Err(invalid("grouping.max_groups_per_chunk", "must be at least 1"));
        }
        if grouping.max_groups_per_chunk > 1 && grouping.max_group_size < 2 {
            return Err(invalid(
                "grouping.max_group_size",
                "windowing over neighbors needs room for the anchor plus one neighbor",
            ));
        }
        if self.sampling.max_qa_per_group == 0 {
            return Err(invalid("sampling.max_qa_per_group", "must be at least 1"));
        }
        let quota = &self.sampling.quota;
        if quota.mode == QuotaMode::Adaptive {
            if quota.min_per_document > quota.max_per_document {
                return Err(invalid(
                    "sampling.quota.min_per_document",
                    "must not exceed sampling.quota.max_per_document",
                ));
            }
            if !(quota.qa_per_chunk.is_finite() && quota.qa_per_chunk >= 0.0) {
                return Err(invalid("sampling.quota.qa_per_chunk", "must be a non-negative number"));
            }
        }
        if self.output.file_pattern.trim().is_empty() {
            return Err(ConfigError::MissingKey("output.file_pattern".into()));
        }
        self.sharding.validate()
    }

    /// Workspace root; only valid after [`GenerationConfig::validate`] succeeded.
    pub fn workspace_root(&self) -> &Path {
        self.workspace_root.as_deref().unwrap_or(Path::new("."))
    }

    /// Resolve a workspace-relative path.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.workspace_root().join(relative)
    }
}

// ---------------------------------------------------------------------------------------------
// Finalization stage
// ---------------------------------------------------------------------------------------------

/// Configuration for dataset finalization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// Root that every relative path is resolved against. Required after CLI/env merging.
    pub workspace_root: Option<PathBuf>,
    /// Input and output directories.
    pub paths: DatasetPaths,
    /// Candidate to record field mapping.
    pub mapping: MappingConfig,
    /// Record-level filters.
    pub filters: RecordFilters,
    /// Deduplication settings.
    pub dedup: DedupConfig,
    /// Versioned output settings.
    pub output: DatasetOutput,
    /// Final id assignment.
    pub ids: IdConfig,
    /// Map-phase partitioning.
    pub map: MapConfig,
    /// Process-level sharding.
    pub sharding: ShardingConfig,
    /// Dry-run switch.
    pub dry_run: bool,
    /// Progress log cadence in kept records (0 disables).
    pub log_every_n: usize,
    /// Debug limits.
    pub limits: DatasetLimits,
}

/// Workspace-relative directories for finalization.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetPaths {
    /// Directory holding candidate files.
    pub candidates_dir: PathBuf,
    /// Directory receiving final datasets, rejects, and the changelog.
    pub final_dir: PathBuf,
    /// Directory receiving intermediate shard files.
    pub shards_dir: PathBuf,
    /// Input file suffix.
    pub file_suffix: String,
}

impl Default for DatasetPaths {
    fn default() -> Self {
        Self {
            candidates_dir: PathBuf::from("qa_candidates/jsonl"),
            final_dir: PathBuf::from("qa_final/jsonl"),
            shards_dir: PathBuf::from("qa_final/shards"),
            file_suffix: ".jsonl".to_string(),
        }
    }
}

/// Candidate to final record mapping.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingConfig {
    /// Value written to every record's `input` field.
    pub input_value: String,
}

/// Record-level filters applied identically in single and map mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordFilters {
    /// Minimum instruction length in characters.
    pub min_question_chars: usize,
    /// Maximum instruction length in characters.
    pub max_question_chars: usize,
    /// Minimum output length in characters.
    pub min_answer_chars: usize,
    /// Maximum output length in characters.
    pub max_answer_chars: usize,
    /// Allowed languages (empty accepts all).
    pub languages_allowed: Vec<String>,
    /// Allowed trust levels (empty accepts all).
    pub trust_levels_allowed: Vec<String>,
    /// Allowed content types (any overlap passes; empty accepts all).
    pub content_types_allowed: Vec<String>,
    /// Drop candidates whose source list is empty.
    pub require_nonempty_sources: bool,
    /// Drop candidates whose text looks like a different language than declared.
    pub drop_if_language_mismatch: bool,
}

impl Default for RecordFilters {
    fn default() -> Self {
        Self {
            min_question_chars: 20,
            max_question_chars: 600,
            min_answer_chars: 30,
            max_answer_chars: 2000,
            languages_allowed: vec!["de".into(), "en".into()],
            trust_levels_allowed: vec!["high".into(), "medium".into()],
            content_types_allowed: Vec::new(),
            require_nonempty_sources: true,
            drop_if_language_mismatch: false,
        }
    }
}

/// Deduplication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// Exact match on instruction + output.
    Exact,
    /// Keep everything.
    None,
}

/// Deduplication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Active mode.
    pub mode: DedupMode,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            mode: DedupMode::Exact,
        }
    }
}

/// Versioned output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetOutput {
    /// Dataset name used in file names.
    pub dataset_name: String,
    /// `auto` (single mode only) or an explicit `vN`.
    pub version: String,
    /// Prepend a changelog entry per run.
    pub write_changelog: bool,
    /// Changelog file name inside the final directory.
    pub changelog_filename: String,
    /// Persist rejected rows with their reason codes.
    pub write_rejects: bool,
    /// Rejects file name inside the final directory; `{dataset}` and `{version}` are substituted.
    pub rejects_filename: String,
    /// Allow replacing an existing versioned dataset file.
    pub overwrite_existing: bool,
}

impl Default for DatasetOutput {
    fn default() -> Self {
        Self {
            dataset_name: "qa_final".to_string(),
            version: "auto".to_string(),
            write_changelog: true,
            changelog_filename: "CHANGELOG.md".to_string(),
            write_rejects: true,
            rejects_filename: "qa_rejects_{version}.jsonl".to_string(),
            overwrite_existing: false,
        }
    }
}

/// Final id strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// `{abbr}_{seq}_q1`, zero padded, in reduce order.
    Sequential,
    /// `{abbr}_{hash}_q1` from anchor and content.
    Hash,
    /// Pass the candidate id through.
    Candidate,
}

/// Final id assignment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdConfig {
    /// Strategy used in the final pass.
    pub strategy: IdStrategy,
    /// Workspace abbreviation prefix.
    pub workspace_abbr: String,
    /// Zero padding for sequential ids.
    pub zero_pad: usize,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            strategy: IdStrategy::Sequential,
            workspace_abbr: "ws".to_string(),
            zero_pad: 5,
        }
    }
}

/// Field hashed by the shard partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKeyField {
    /// Candidate `anchor_chunk_id`.
    AnchorChunkId,
    /// Candidate `question`.
    Question,
}

/// Map-phase settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    /// Field hashed to pick a shard.
    pub key: ShardKeyField,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            key: ShardKeyField::AnchorChunkId,
        }
    }
}

/// Debug limits (0 disables each).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetLimits {
    /// Read at most this many candidate files.
    pub limit_num_files: usize,
    /// Keep at most this many records (pre-divided across shards in map mode).
    pub limit_num_examples: usize,
}

impl DatasetConfig {
    /// Load the configuration file without validating it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// Check cross-field invariants. Must be called once before the config is used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_root.is_none() {
            return Err(ConfigError::MissingKey("workspace_root".into()));
        }
        let filters = &self.filters;
        if filters.min_question_chars > filters.max_question_chars {
            return Err(invalid(
                "filters.min_question_chars",
                "must not exceed filters.max_question_chars",
            ));
        }
        if filters.min_answer_chars > filters.max_answer_chars {
            return Err(invalid(
                "filters.min_answer_chars",
                "must not exceed filters.max_answer_chars",
            ));
        }
        if self.output.dataset_name.trim().is_empty() {
            return Err(ConfigError::MissingKey("output.dataset_name".into()));
        }
        if self.output.version.trim().is_empty() {
            return Err(ConfigError::MissingKey("output.version".into()));
        }
        if !self.output.rejects_filename.contains("{version}") {
            return Err(invalid(
                "output.rejects_filename",
                "must contain the {version} placeholder",
            ));
        }
        self.sharding.validate()
    }

    /// Workspace root; only valid after [`DatasetConfig::validate`] succeeded.
    pub fn workspace_root(&self) -> &Path {
        self.workspace_root.as_deref().unwrap_or(Path::new("."))
    }

    /// Resolve a workspace-relative path.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.workspace_root().join(relative)
    }
}

/// Load `.env` so the `OLLAMA_URL`/`QDRANT_*` overrides can come from a file.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

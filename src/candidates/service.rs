//! Generation service coordinating chunk loading, retrieval, assembly, the model, and output.

use super::quota::{Quota, document_quota, shard_share};
use super::validator::build_candidate;
use super::writer::{CandidateWriter, resume_state};
use super::{NeighborRef, Provenance, RetrievalProvenance};
use crate::chunks::{ChunkStore, ChunkStoreError, list_chunk_files};
use crate::config::{ConfigError, GenerationConfig, ResumeMode};
use crate::context::ContextAssembler;
use crate::digest::{current_timestamp_rfc3339, stable_hash};
use crate::llm::{GroupState, LlmClient, LlmError, Orchestrator, PromptHashes, PromptSet};
use crate::metrics::{GenerationMetrics, MetricsSnapshot};
use crate::retrieval::{MetricInfo, NeighborRetriever, RetrievalError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Fatal errors that abort a generation run.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A chunk file could not be loaded.
    #[error(transparent)]
    ChunkStore(#[from] ChunkStoreError),
    /// The language model is unavailable.
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// The retrieval metric could not be determined.
    #[error("Failed to determine retrieval metric: {0}")]
    Retrieval(#[from] RetrievalError),
    /// Prompt files could not be loaded.
    #[error("Failed to load prompts: {0}")]
    Prompts(#[source] std::io::Error),
    /// Output could not be read or written.
    #[error("I/O failure on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> GenerationError + '_ {
    move |source| GenerationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Per-file result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSummary {
    /// Input file.
    pub input: PathBuf,
    /// Candidate file.
    pub output: PathBuf,
    /// Candidates appended during this run.
    pub written: usize,
    /// Whether the per-document quota stopped the file early.
    pub document_quota_reached: bool,
}

/// Whole-run result.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Run identifier recorded in provenance.
    pub run_id: String,
    /// Per-file summaries in processing order.
    pub files: Vec<FileSummary>,
    /// Whether the (shard share of the) global quota stopped the run.
    pub global_quota_reached: bool,
    /// Final counters.
    pub metrics: MetricsSnapshot,
}

impl RunSummary {
    /// Candidates appended across all files.
    pub fn written(&self) -> usize {
        self.files.iter().map(|file| file.written).sum()
    }
}

/// Coordinates candidate generation for every input file assigned to this worker.
///
/// Owns the retrieval and model handles so tests can inject in-memory implementations.
pub struct GenerationService {
    config: GenerationConfig,
    retriever: Box<dyn NeighborRetriever>,
    llm: Box<dyn LlmClient>,
    prompts: PromptSet,
    prompt_hashes: PromptHashes,
    metrics: GenerationMetrics,
    run_id: String,
}

impl GenerationService {
    /// Build the service, validating configuration and loading prompts.
    pub fn new(
        config: GenerationConfig,
        retriever: Box<dyn NeighborRetriever>,
        llm: Box<dyn LlmClient>,
    ) -> Result<Self, GenerationError> {
        config.validate()?;
        let prompts = PromptSet::load(config.workspace_root(), &config.prompts)
            .map_err(GenerationError::Prompts)?;
        let prompt_hashes = prompts.hashes();
        Ok(Self {
            config,
            retriever,
            llm,
            prompts,
            prompt_hashes,
            metrics: GenerationMetrics::new(),
            run_id: Uuid::new_v4().to_string(),
        })
    }

    /// Counters accumulated so far.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Candidate file for an input file.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = self
            .config
            .output
            .file_pattern
            .replace("{input_basename}", &stem);
        self.config
            .resolve(&self.config.paths.candidates_dir)
            .join(name)
    }

    /// Input files owned by this worker: sharded by `stable_hash(stem) mod num_shards`, then limited.
    pub fn assigned_files(&self) -> Result<Vec<PathBuf>, GenerationError> {
        let dir = self.config.resolve(&self.config.paths.semantic_dir);
        let files = list_chunk_files(&dir).map_err(io_error(&dir))?;
        let sharding = &self.config.sharding;
        let mut assigned: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| {
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                stable_hash(&stem) % u64::from(sharding.num_shards) == u64::from(sharding.shard_id)
            })
            .collect();
        let limit = self.config.debug.limit_num_files;
        if limit > 0 {
            assigned.truncate(limit);
        }
        Ok(assigned)
    }

    /// Candidates earlier runs already wrote for `files`; zero when outputs get overwritten.
    fn existing_candidates(&self, files: &[PathBuf]) -> Result<usize, GenerationError> {
        if self.config.runtime.resume_mode == ResumeMode::Overwrite {
            return Ok(0);
        }
        let mut total = 0;
        for path in files {
            let output = self.output_path(path);
            total += resume_state(&output).map_err(io_error(&output))?.candidates;
        }
        Ok(total)
    }

    /// Process every assigned file until done or the global quota runs out.
    pub async fn run(&self) -> Result<RunSummary, GenerationError> {
        let files = self.assigned_files()?;
        let sharding = &self.config.sharding;
        let global_share = shard_share(self.config.sampling.global_qa_limit, sharding.num_shards);
        let mut global = Quota::from_limit(global_share);
        let previous = self.existing_candidates(&files)?;
        global.charge(previous);
        let metric = self.retriever.metric().await?;

        tracing::info!(
            run_id = %self.run_id,
            files = files.len(),
            shard_id = sharding.shard_id,
            num_shards = sharding.num_shards,
            global_share,
            previous,
            model = %self.config.llm.model,
            metric = ?metric.metric,
            dry_run = self.config.runtime.dry_run,
            "Starting candidate generation"
        );

        let mut summary = RunSummary {
            run_id: self.run_id.clone(),
            ..Default::default()
        };
        for path in files {
            if global.is_exhausted() {
                summary.global_quota_reached = true;
                tracing::info!("Global quota reached; stopping");
                break;
            }
            let file = self.process_file(&path, metric, &mut global).await?;
            summary.files.push(file);
        }
        if global.is_exhausted() {
            summary.global_quota_reached = true;
        }
        summary.metrics = self.metrics.snapshot();
        tracing::info!(
            run_id = %self.run_id,
            written = summary.written(),
            metrics = ?summary.metrics,
            "Candidate generation finished"
        );
        Ok(summary)
    }

    /// Generate candidates for one chunk file.
    pub async fn process_file(
        &self,
        path: &Path,
        metric: MetricInfo,
        global: &mut Quota,
    ) -> Result<FileSummary, GenerationError> {
        let config = &self.config;
        let output = self.output_path(path);
        let mut summary = FileSummary {
            input: path.to_path_buf(),
            output: output.clone(),
            ..Default::default()
        };

        let store = ChunkStore::load(path)?;
        if store.is_empty() {
            tracing::warn!(file = %path.display(), "No chunks found; skipping");
            return Ok(summary);
        }
        let source_file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let dry_run = config.runtime.dry_run;
        let mut writer = if dry_run {
            None
        } else {
            Some(CandidateWriter::open(&output, config.runtime.resume_mode).map_err(io_error(&output))?)
        };
        let (already_done, existing) = match &writer {
            Some(writer) => (HashSet::new(), writer.existing_candidates()),
            None if config.runtime.resume_mode == ResumeMode::Overwrite => (HashSet::new(), 0),
            None => {
                let state = resume_state(&output).map_err(io_error(&output))?;
                (state.anchors, state.candidates)
            }
        };
        let is_done = |anchor: &str, writer: &Option<CandidateWriter>| match writer {
            Some(writer) => writer.is_processed(anchor),
            None => already_done.contains(anchor),
        };

        let mut doc_quota = document_quota(&config.sampling.quota, store.len(), store.total_chars());
        doc_quota.charge(existing);
        let assembler = ContextAssembler::new(&config.filters, &config.neighbors, &config.grouping);
        let orchestrator = Orchestrator::new(
            self.llm.as_ref(),
            &self.prompts,
            &config.llm,
            config.sampling.max_qa_per_group,
        );

        tracing::info!(
            file = %source_file,
            chunks = store.len(),
            existing,
            quota = ?doc_quota.remaining(),
            "Processing chunk file"
        );

        let chunk_limit = config.debug.limit_num_chunks;
        for (position, anchor) in store.chunks().iter().enumerate() {
            if chunk_limit > 0 && position >= chunk_limit {
                tracing::info!(file = %source_file, limit = chunk_limit, "Chunk limit reached");
                break;
            }
            if doc_quota.is_exhausted() {
                summary.document_quota_reached = true;
                tracing::info!(file = %source_file, "Document quota reached");
                break;
            }
            if global.is_exhausted() {
                break;
            }
            self.metrics.record_anchor();
            let anchor_id = anchor.chunk_id.as_str();
            if is_done(anchor_id, &writer) {
                self.metrics.record_resumed_anchor();
                continue;
            }
            if !assembler.is_eligible(anchor) {
                self.metrics.record_ineligible_anchor();
                continue;
            }

            let retrieved = match self
                .retriever
                .get_neighbors(anchor_id, config.neighbors.top_k)
                .await
            {
                Ok(neighbors) => neighbors,
                Err(error) => {
                    tracing::warn!(anchor = anchor_id, error = %error, "Neighbor retrieval failed; using local context only");
                    Vec::new()
                }
            };
            let assembly = assembler.assemble(&store, position, retrieved, metric);
            if assembly.groups.is_empty() {
                self.metrics.record_anchor_without_group();
                tracing::debug!(anchor = anchor_id, "Not enough context for a group");
                continue;
            }
            self.metrics.record_groups(assembly.groups.len() as u64);

            if dry_run {
                tracing::info!(
                    anchor = anchor_id,
                    groups = assembly.groups.len(),
                    sizes = ?assembly.groups.iter().map(|group| group.len()).collect::<Vec<_>>(),
                    "Dry run: would call the model"
                );
                continue;
            }

            let base_provenance = Provenance {
                run_id: self.run_id.clone(),
                generated_at: current_timestamp_rfc3339(),
                model: orchestrator.model().to_string(),
                model_options: orchestrator.options(),
                retrieval: RetrievalProvenance {
                    metric,
                    neighbors: assembly
                        .neighbors
                        .iter()
                        .map(|neighbor| NeighborRef {
                            chunk_id: neighbor.chunk.chunk_id.clone(),
                            score: neighbor.score,
                        })
                        .collect(),
                },
                prompt_hashes: self.prompt_hashes.clone(),
                plan: None,
                evidence_fallback: false,
            };

            let mut written_ids: HashSet<String> = HashSet::new();
            'groups: for group in &assembly.groups {
                let outcome = orchestrator.run_group(group).await?;
                self.metrics.record_retries(u64::from(outcome.retries));
                if outcome.trace.contains(&GroupState::PlanFallback) {
                    self.metrics.record_plan_fallback();
                }
                if outcome.final_state() == Some(GroupState::GenerateDiscarded) {
                    if outcome.abandoned {
                        self.metrics.record_group_abandoned();
                    } else {
                        self.metrics.record_group_discarded();
                    }
                    self.metrics.record_candidates(0, outcome.malformed as u64);
                    continue;
                }

                let mut provenance = base_provenance.clone();
                provenance.plan = outcome.plan.clone();
                let mut written = 0u64;
                let mut invalid = outcome.malformed as u64;
                for pair in &outcome.pairs {
                    if doc_quota.is_exhausted() || global.is_exhausted() {
                        self.metrics.record_candidates(written, invalid);
                        break 'groups;
                    }
                    let candidate = match build_candidate(pair, group, &source_file, &provenance) {
                        Ok(candidate) => candidate,
                        Err(reason) => {
                            invalid += 1;
                            tracing::debug!(anchor = anchor_id, reason = %reason, "Dropped model pair");
                            continue;
                        }
                    };
                    if !written_ids.insert(candidate.id.clone()) {
                        continue;
                    }
                    if let Some(writer) = writer.as_mut() {
                        writer.write(&candidate).map_err(io_error(&output))?;
                    }
                    doc_quota.consume();
                    global.consume();
                    written += 1;
                    summary.written += 1;
                    let every = config.runtime.log_every_n;
                    if every > 0 && summary.written % every == 0 {
                        tracing::info!(file = %source_file, written = summary.written, "Progress");
                    }
                }
                self.metrics.record_candidates(written, invalid);
            }

            if !written_ids.is_empty()
                && let Some(writer) = writer.as_mut()
            {
                writer.mark_processed(anchor_id).map_err(io_error(&output))?;
            }
        }

        if doc_quota.is_exhausted() {
            summary.document_quota_reached = true;
        }
        self.metrics.record_file();
        tracing::info!(
            file = %source_file,
            written = summary.written,
            output = %output.display(),
            "Finished chunk file"
        );
        Ok(summary)
    }
}

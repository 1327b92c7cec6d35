//! Candidate Validator & Writer.
//!
//! Maps model output onto the persisted candidate schema, enforces evidence grounding and
//! quotas, and appends candidates to a resumable JSON Lines stream.

pub mod quota;
pub mod service;
pub mod validator;
pub mod writer;

pub use quota::{Quota, document_quota, shard_share};
pub use service::{FileSummary, GenerationError, GenerationService, RunSummary};
pub use validator::{PairRejection, build_candidate, candidate_id, resolve_evidence};
pub use writer::{CandidateWriter, ResumeState, checkpoint_path, processed_anchors, resume_state};

use crate::llm::{ModelOptions, PlanResult, PromptHashes};
use crate::retrieval::MetricInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal difficulty label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Recall or direct application.
    Basic,
    /// Multi-step reasoning.
    Intermediate,
    /// Subtle conditions or combined concepts.
    Advanced,
}

impl Difficulty {
    /// Parse a label case-insensitively.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    /// Canonical lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Neighbor id and score as seen by the assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborRef {
    /// Neighbor chunk id.
    pub chunk_id: String,
    /// Similarity score.
    pub score: f32,
}

/// Retrieval side of a candidate's provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalProvenance {
    /// Metric used for ordering and thresholds.
    pub metric: MetricInfo,
    /// Filtered vector neighbors of the anchor.
    pub neighbors: Vec<NeighborRef>,
}

/// Immutable record of how a candidate was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Identifier of the generation run.
    pub run_id: String,
    /// RFC3339 timestamp of the write.
    pub generated_at: String,
    /// Model tag.
    pub model: String,
    /// Sampling options.
    pub model_options: ModelOptions,
    /// Retrieval metric and neighbors.
    pub retrieval: RetrievalProvenance,
    /// Digests of the prompt templates.
    pub prompt_hashes: PromptHashes,
    /// Validated plan, absent in degraded mode.
    pub plan: Option<PlanResult>,
    /// Whether evidence fell back to the full context.
    pub evidence_fallback: bool,
}

/// One persisted question-answer pair with full provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Deterministic id from the anchor and a content hash.
    pub id: String,
    /// Anchor chunk id.
    pub anchor_chunk_id: String,
    /// Anchor document id.
    pub anchor_doc_id: String,
    /// Documents touched by the context group.
    pub doc_ids: Vec<String>,
    /// Input file name the anchor came from.
    pub source_file: String,
    /// Position of the context group among the anchor's groups.
    pub group_index: usize,
    /// All chunk ids offered to the model.
    pub context_chunks: Vec<String>,
    /// Cited chunk ids; always a subset of `context_chunks`.
    pub source_chunks: Vec<String>,
    /// Question text.
    pub question: String,
    /// Answer text.
    pub answer: String,
    /// Difficulty label.
    pub difficulty: Difficulty,
    /// Anchor language.
    pub language: Option<String>,
    /// Anchor domains.
    pub domain: Vec<String>,
    /// Anchor content types.
    pub content_type: Vec<String>,
    /// Anchor trust level.
    pub trust_level: Option<String>,
    /// Provenance record.
    pub provenance: Provenance,
}

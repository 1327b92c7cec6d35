//! Neighbor Retrieval Client.
//!
//! The vector index is an external collaborator. The pipeline consumes only its query contract:
//! ranked neighbors for a chunk id plus a description of the similarity metric, which decides
//! sort order and threshold direction in the context assembler.

mod qdrant;

pub use qdrant::QdrantRetriever;

use crate::chunks::Chunk;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by neighbor retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid retrieval URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected retrieval response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Backend response did not have the expected shape.
    #[error("Malformed retrieval response: {0}")]
    InvalidResponse(String),
}

/// Similarity metric family used by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityMetric {
    /// Inner product: higher scores are more similar.
    #[serde(rename = "IP")]
    InnerProduct,
    /// Euclidean distance: lower scores are more similar.
    #[serde(rename = "L2")]
    L2,
}

/// Side-channel description of the index metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricInfo {
    /// Metric family.
    pub metric: SimilarityMetric,
    /// Whether vectors are normalized (inner product then equals cosine similarity).
    pub normalized: bool,
}

impl MetricInfo {
    /// Whether `score` passes `threshold` under this metric.
    pub fn passes_threshold(&self, score: f32, threshold: f32) -> bool {
        match self.metric {
            SimilarityMetric::InnerProduct => score >= threshold,
            SimilarityMetric::L2 => score <= threshold,
        }
    }

    /// Order two scores so that the more similar one sorts first.
    pub fn compare(&self, left: f32, right: f32) -> std::cmp::Ordering {
        match self.metric {
            SimilarityMetric::InnerProduct => right.total_cmp(&left),
            SimilarityMetric::L2 => left.total_cmp(&right),
        }
    }
}

impl Default for MetricInfo {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::InnerProduct,
            normalized: true,
        }
    }
}

/// Ranked neighbor returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Neighbor chunk with its labels.
    pub chunk: Chunk,
    /// Similarity score in the units of [`MetricInfo::metric`].
    pub score: f32,
}

/// Interface implemented by vector-similarity backends.
#[async_trait]
pub trait NeighborRetriever: Send + Sync {
    /// Describe the similarity metric so callers know the score direction.
    async fn metric(&self) -> Result<MetricInfo, RetrievalError>;

    /// Return up to `top_k` neighbors of `chunk_id`, best first.
    ///
    /// A chunk missing from the index yields an empty list rather than an error.
    async fn get_neighbors(
        &self,
        chunk_id: &str,
        top_k: usize,
    ) -> Result<Vec<Neighbor>, RetrievalError>;
}

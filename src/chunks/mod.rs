//! Chunk Store Reader: loads the ordered chunk records of one source document.
//!
//! Upstream annotation writes either one chunk per line (`*.jsonl`) or a single top-level array
//! (`*.json`). Semantic labels may sit at the top level or under `semantic`, and list-valued
//! labels are sometimes emitted as a bare string; both shapes are normalised on load so the rest
//! of the pipeline only sees [`Chunk`].

use crate::jsonl::{self, read_jsonl};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a chunk file.
#[derive(Debug, Error)]
pub enum ChunkStoreError {
    /// File could not be read.
    #[error("Failed to read chunk file {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// `*.json` file was not a top-level array of chunks.
    #[error("Chunk file {path} is not a JSON array of chunks: {source}")]
    InvalidJson {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying JSON failure.
        #[source]
        source: serde_json::Error,
    },
    /// File extension is neither `.jsonl` nor `.json`.
    #[error("Unsupported chunk file format: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Semantic labels attached by the upstream annotation step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticInfo {
    /// Reliability label (e.g. `high`, `medium`).
    pub trust_level: Option<String>,
    /// Topical domains.
    pub domain: Vec<String>,
    /// Document genres (e.g. `textbook`, `paper`).
    pub content_type: Vec<String>,
    /// Structural roles (e.g. `definition`, `example`).
    pub chunk_role: Vec<String>,
    /// One-sentence summary preferred over raw content when rendering context.
    pub summary_short: Option<String>,
}

/// Immutable unit of text produced by ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chunk {
    /// Unique id encoding the parent document and ordinal.
    pub chunk_id: String,
    /// Parent document id.
    pub doc_id: String,
    /// Chunk text.
    pub content: String,
    /// Language label.
    pub language: Option<String>,
    /// Semantic labels.
    pub semantic: SemanticInfo,
}

impl Chunk {
    /// Trust level label, if annotated.
    pub fn trust_level(&self) -> Option<&str> {
        self.semantic.trust_level.as_deref()
    }

    /// Text offered to the model: the short summary when present, else the content.
    pub fn display_text(&self) -> &str {
        self.semantic
            .summary_short
            .as_deref()
            .map(str::trim)
            .filter(|summary| !summary.is_empty())
            .unwrap_or(&self.content)
    }
}

/// Ordered chunks of one document with position and id lookup.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    source: PathBuf,
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
}

impl ChunkStore {
    /// Build a store from chunks in stored order. Later duplicates of an id are ignored for lookup.
    pub fn from_chunks(source: PathBuf, chunks: Vec<Chunk>) -> Self {
        let mut by_id = HashMap::with_capacity(chunks.len());
        for (position, chunk) in chunks.iter().enumerate() {
            by_id.entry(chunk.chunk_id.clone()).or_insert(position);
        }
        Self {
            source,
            chunks,
            by_id,
        }
    }

    /// Load a `*.jsonl` or `*.json` chunk file.
    pub fn load(path: &Path) -> Result<Self, ChunkStoreError> {
        let raw = match path.extension().and_then(|ext| ext.to_str()) {
            Some("jsonl") => {
                read_jsonl::<RawChunk>(path)
                    .map_err(|source| ChunkStoreError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?
                    .records
            }
            Some("json") => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ChunkStoreError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                serde_json::from_str::<Vec<RawChunk>>(&content).map_err(|source| {
                    ChunkStoreError::InvalidJson {
                        path: path.to_path_buf(),
                        source,
                    }
                })?
            }
            _ => return Err(ChunkStoreError::UnsupportedFormat(path.to_path_buf())),
        };

        let total = raw.len();
        let chunks: Vec<Chunk> = raw.into_iter().filter_map(RawChunk::into_chunk).collect();
        if chunks.len() < total {
            tracing::warn!(
                file = %path.display(),
                skipped = total - chunks.len(),
                "Skipped chunks without chunk_id"
            );
        }
        Ok(Self::from_chunks(path.to_path_buf(), chunks))
    }

    /// File the chunks were loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// All chunks in stored order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the document has no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk at `position` in stored order.
    pub fn by_position(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    /// Chunk with the given id.
    pub fn by_id(&self, chunk_id: &str) -> Option<&Chunk> {
        self.by_id.get(chunk_id).map(|&position| &self.chunks[position])
    }

    /// Total characters of content across all chunks.
    pub fn total_chars(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| chunk.content.chars().count())
            .sum()
    }
}

/// Decode a chunk from a loosely-shaped JSON object (e.g. a vector-store payload).
///
/// Returns `None` when the object has no `chunk_id` or is not an object.
pub fn chunk_from_value(value: serde_json::Value) -> Option<Chunk> {
    serde_json::from_value::<RawChunk>(value)
        .ok()
        .and_then(RawChunk::into_chunk)
}

/// Chunk files under `dir`, `*.jsonl` first then `*.json`, each group sorted by name.
pub fn list_chunk_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = jsonl::list_files(dir, &[".jsonl"])?;
    files.extend(jsonl::list_files(dir, &[".json"])?);
    Ok(files)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSemantic {
    trust_level: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    domain: Option<Vec<String>>,
    #[serde(deserialize_with = "string_or_list")]
    content_type: Option<Vec<String>>,
    #[serde(deserialize_with = "string_or_list")]
    chunk_role: Option<Vec<String>>,
    summary_short: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawChunk {
    chunk_id: Option<String>,
    doc_id: Option<String>,
    content: Option<String>,
    language: Option<String>,
    #[serde(flatten)]
    flat: RawSemantic,
    semantic: Option<RawSemantic>,
}

impl RawChunk {
    fn into_chunk(self) -> Option<Chunk> {
        let chunk_id = self.chunk_id.filter(|id| !id.trim().is_empty())?;
        let nested = self.semantic.unwrap_or_default();
        let flat = self.flat;
        Some(Chunk {
            chunk_id,
            doc_id: self.doc_id.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            language: self.language,
            semantic: SemanticInfo {
                trust_level: flat.trust_level.or(nested.trust_level),
                domain: flat.domain.or(nested.domain).unwrap_or_default(),
                content_type: flat.content_type.or(nested.content_type).unwrap_or_default(),
                chunk_role: flat.chunk_role.or(nested.chunk_role).unwrap_or_default(),
                summary_short: flat.summary_short.or(nested.summary_short),
            },
        })
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<serde_json::Value>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => Some(vec![value]),
        OneOrMany::Many(values) => Some(
            values
                .into_iter()
                .map(|value| match value {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                })
                .collect(),
        ),
        OneOrMany::Null(()) => None,
    })
}

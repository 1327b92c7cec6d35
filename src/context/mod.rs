//! Context Assembler.
//!
//! Combines an anchor chunk, its sequential neighbors, and filtered vector neighbors into one or
//! more bounded context groups. Group membership is a pure function of chunk order and neighbor
//! ranking, so identical inputs reproduce identical groups.

mod assembler;

pub use assembler::{Assembly, ContextAssembler};

use crate::chunks::Chunk;
use serde::{Deserialize, Serialize};

/// Projection of a chunk carrying only what prompting and provenance need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Chunk id.
    pub chunk_id: String,
    /// Parent document id.
    pub doc_id: String,
    /// Language label.
    pub language: Option<String>,
    /// Trust level label.
    pub trust_level: Option<String>,
    /// Content types.
    pub content_type: Vec<String>,
    /// Domains.
    pub domain: Vec<String>,
    /// Short summary, if annotated.
    pub summary_short: Option<String>,
    /// Full chunk content.
    pub content: String,
}

impl From<&Chunk> for ContextChunk {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            language: chunk.language.clone(),
            trust_level: chunk.semantic.trust_level.clone(),
            content_type: chunk.semantic.content_type.clone(),
            domain: chunk.semantic.domain.clone(),
            summary_short: chunk.semantic.summary_short.clone(),
            content: chunk.content.clone(),
        }
    }
}

/// Ordered, deduplicated chunks offered to the model in one call. The anchor is always first.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextGroup {
    /// Position of this group among the anchor's groups.
    pub group_index: usize,
    /// Member chunks, anchor first.
    pub chunks: Vec<ContextChunk>,
}

impl ContextGroup {
    /// Anchor chunk of the group.
    pub fn anchor(&self) -> &ContextChunk {
        &self.chunks[0]
    }

    /// Member ids in group order.
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks
            .iter()
            .map(|chunk| chunk.chunk_id.clone())
            .collect()
    }

    /// Distinct document ids in first-seen order.
    pub fn doc_ids(&self) -> Vec<String> {
        let mut doc_ids: Vec<String> = Vec::new();
        for chunk in &self.chunks {
            if !chunk.doc_id.is_empty() && !doc_ids.contains(&chunk.doc_id) {
                doc_ids.push(chunk.doc_id.clone());
            }
        }
        doc_ids
    }

    /// Number of member chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the group is empty (never true for assembled groups).
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Render the group as labelled text blocks.
    ///
    /// Each block prefers the short summary over the content and is cut to
    /// `max_chars_per_chunk` characters (0 disables the cut) with a trailing ` …`.
    pub fn render(&self, max_chars_per_chunk: usize) -> String {
        let mut lines = Vec::with_capacity(self.chunks.len() * 3);
        for (index, chunk) in self.chunks.iter().enumerate() {
            let text = chunk
                .summary_short
                .as_deref()
                .map(str::trim)
                .filter(|summary| !summary.is_empty())
                .unwrap_or_else(|| chunk.content.trim());
            let text = truncate_chars(text, max_chars_per_chunk);
            lines.push(format!(
                "[Chunk {} | chunk_id={} | doc_id={}]",
                index + 1,
                chunk.chunk_id,
                chunk.doc_id
            ));
            lines.push(text);
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{} …", &text[..cut]),
        None => text.to_string(),
    }
}

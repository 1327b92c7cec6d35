//! Mapping of model pairs onto candidates, including evidence grounding.

use super::{Candidate, Difficulty, Provenance};
use crate::context::ContextGroup;
use crate::digest::sha256_hex_lines;
use crate::llm::RawPair;
use serde_json::Value;
use thiserror::Error;

/// Why a model pair was not turned into a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairRejection {
    /// Question missing or blank.
    #[error("question missing or empty")]
    MissingQuestion,
    /// Answer missing or blank.
    #[error("answer missing or empty")]
    MissingAnswer,
    /// Difficulty label missing or unrecognized.
    #[error("unrecognized difficulty {0:?}")]
    UnknownDifficulty(String),
}

/// Deterministic candidate id: `{anchor}_qa_{first 16 hex of sha256(anchor\nquestion\nanswer)}`.
pub fn candidate_id(anchor_chunk_id: &str, question: &str, answer: &str) -> String {
    let digest = sha256_hex_lines(&[anchor_chunk_id, question, answer]);
    format!("{anchor_chunk_id}_qa_{}", &digest[..16])
}

/// Resolve cited ids against the context.
///
/// Returns the cited ids (deduplicated, in citation order) when they form a non-empty subset of
/// `context_ids`; otherwise the full context with the fallback flag set.
pub fn resolve_evidence(evidence: Option<&Value>, context_ids: &[String]) -> (Vec<String>, bool) {
    let cited = evidence.and_then(Value::as_array).and_then(|items| {
        let mut ids: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            let id = item.as_str()?.trim();
            if !context_ids.iter().any(|known| known == id) {
                return None;
            }
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        Some(ids)
    });
    match cited {
        Some(ids) if !ids.is_empty() => (ids, false),
        _ => (context_ids.to_vec(), true),
    }
}

/// Build a candidate from one model pair.
///
/// `provenance` is cloned into the candidate with its `evidence_fallback` flag set per pair.
pub fn build_candidate(
    pair: &RawPair,
    group: &ContextGroup,
    source_file: &str,
    provenance: &Provenance,
) -> Result<Candidate, PairRejection> {
    let question = non_blank(pair.question.as_deref()).ok_or(PairRejection::MissingQuestion)?;
    let answer = non_blank(pair.answer.as_deref()).ok_or(PairRejection::MissingAnswer)?;
    let label = pair.difficulty.as_deref().unwrap_or_default();
    let difficulty =
        Difficulty::parse(label).ok_or_else(|| PairRejection::UnknownDifficulty(label.to_string()))?;

    let anchor = group.anchor();
    let context_chunks = group.chunk_ids();
    let (source_chunks, evidence_fallback) =
        resolve_evidence(pair.evidence_chunks.as_ref(), &context_chunks);

    let mut provenance = provenance.clone();
    provenance.evidence_fallback = evidence_fallback;

    Ok(Candidate {
        id: candidate_id(&anchor.chunk_id, question, answer),
        anchor_chunk_id: anchor.chunk_id.clone(),
        anchor_doc_id: anchor.doc_id.clone(),
        doc_ids: group.doc_ids(),
        source_file: source_file.to_string(),
        group_index: group.group_index,
        context_chunks,
        source_chunks,
        question: question.to_string(),
        answer: answer.to_string(),
        difficulty,
        language: anchor.language.clone(),
        domain: anchor.domain.clone(),
        content_type: anchor.content_type.clone(),
        trust_level: anchor.trust_level.clone(),
        provenance,
    })
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::RetrievalProvenance;
    use crate::context::ContextChunk;
    use crate::llm::{ModelOptions, PromptSet};
    use crate::retrieval::MetricInfo;
    use serde_json::json;

    fn group() -> ContextGroup {
        let chunk = |id: &str, doc: &str| ContextChunk {
            chunk_id: id.into(),
            doc_id: doc.into(),
            language: Some("de".into()),
            trust_level: Some("high".into()),
            content_type: vec!["textbook".into()],
            domain: vec!["thermo".into()],
            summary_short: None,
            content: "text".into(),
        };
        ContextGroup {
            group_index: 1,
            chunks: vec![chunk("c1", "d1"), chunk("c0", "d1"), chunk("v1", "d2")],
        }
    }

    fn provenance() -> Provenance {
        Provenance {
            run_id: "run".into(),
            generated_at: "2025-01-01T00:00:00Z".into(),
            model: "llama".into(),
            model_options: ModelOptions::from(&crate::config::LlmConfig::default()),
            retrieval: RetrievalProvenance {
                metric: MetricInfo::default(),
                neighbors: vec![],
            },
            prompt_hashes: PromptSet::default().hashes(),
            plan: None,
            evidence_fallback: false,
        }
    }

    fn pair(evidence: Value) -> RawPair {
        RawPair {
            question: Some(" What drives heat transfer? ".into()),
            answer: Some("A temperature difference.".into()),
            difficulty: Some("Basic".into()),
            evidence_chunks: Some(evidence),
        }
    }

    #[test]
    fn keeps_valid_subset_of_context() {
        let candidate =
            build_candidate(&pair(json!(["v1", "c1", "v1"])), &group(), "d1.jsonl", &provenance())
                .expect("candidate");
        assert_eq!(candidate.source_chunks, vec!["v1", "c1"]);
        assert!(!candidate.provenance.evidence_fallback);
        assert_eq!(candidate.question, "What drives heat transfer?");
        assert_eq!(candidate.doc_ids, vec!["d1", "d2"]);
        assert_eq!(candidate.group_index, 1);
        assert_eq!(candidate.language.as_deref(), Some("de"));
    }

    #[test]
    fn foreign_evidence_falls_back_to_full_context() {
        let candidate =
            build_candidate(&pair(json!(["cX"])), &group(), "d1.jsonl", &provenance()).expect("candidate");
        assert_eq!(candidate.source_chunks, candidate.context_chunks);
        assert!(candidate.provenance.evidence_fallback);
    }

    #[test]
    fn empty_or_mistyped_evidence_falls_back() {
        let context = group().chunk_ids();
        assert_eq!(resolve_evidence(Some(&json!([])), &context), (context.clone(), true));
        assert_eq!(resolve_evidence(Some(&json!([1, 2])), &context), (context.clone(), true));
        assert_eq!(resolve_evidence(Some(&json!("c1")), &context), (context.clone(), true));
        assert_eq!(resolve_evidence(None, &context), (context, true));
    }

    #[test]
    fn rejects_incomplete_pairs() {
        let mut missing_answer = pair(json!([]));
        missing_answer.answer = Some("   ".into());
        assert_eq!(
            build_candidate(&missing_answer, &group(), "f", &provenance()),
            Err(PairRejection::MissingAnswer)
        );
        let mut odd_difficulty = pair(json!([]));
        odd_difficulty.difficulty = Some("expert".into());
        assert_eq!(
            build_candidate(&odd_difficulty, &group(), "f", &provenance()),
            Err(PairRejection::UnknownDifficulty("expert".into()))
        );
    }

    #[test]
    fn ids_are_stable_and_content_addressed() {
        let first = candidate_id("c1", "q", "a");
        assert_eq!(first, candidate_id("c1", "q", "a"));
        assert_ne!(first, candidate_id("c1", "q", "b"));
        assert!(first.starts_with("c1_qa_"));
        assert_eq!(first.len(), "c1_qa_".len() + 16);
    }
}

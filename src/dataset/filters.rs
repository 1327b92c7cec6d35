//! Record-level filters and the candidate to [`FinalRecord`] mapping.
//!
//! Candidates are read as untyped JSON so rows written by older generator versions, or
//! edited by hand, still map as long as the fields the filters need are present.

use super::FinalRecord;
use crate::config::RecordFilters;
use crate::digest::current_timestamp_rfc3339;
use serde_json::Value;
use std::fmt;

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Required string field missing or blank.
    MissingOrEmpty(&'static str),
    /// Question shorter than the minimum.
    QuestionTooShort,
    /// Question longer than the maximum.
    QuestionTooLong,
    /// Answer shorter than the minimum.
    AnswerTooShort,
    /// Answer longer than the maximum.
    AnswerTooLong,
    /// Declared language not allowed.
    LanguageNotAllowed,
    /// Declared trust level not allowed.
    TrustLevelNotAllowed,
    /// No allowed content type.
    ContentTypeNotAllowed,
    /// Empty source list.
    MissingSources,
    /// Text looks like another language than declared.
    LanguageMismatch,
    /// Shard row that no longer decodes as a record.
    InvalidRecord,
    /// Valid row past `limit_num_examples`.
    LimitReached,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOrEmpty(field) => write!(f, "missing_or_empty:{field}"),
            Self::QuestionTooShort => f.write_str("question_too_short"),
            Self::QuestionTooLong => f.write_str("question_too_long"),
            Self::AnswerTooShort => f.write_str("answer_too_short"),
            Self::AnswerTooLong => f.write_str("answer_too_long"),
            Self::LanguageNotAllowed => f.write_str("language_not_allowed"),
            Self::TrustLevelNotAllowed => f.write_str("trust_level_not_allowed"),
            Self::ContentTypeNotAllowed => f.write_str("content_type_not_allowed"),
            Self::MissingSources => f.write_str("missing_sources"),
            Self::LanguageMismatch => f.write_str("language_mismatch"),
            Self::InvalidRecord => f.write_str("invalid_record"),
            Self::LimitReached => f.write_str("limit_reached"),
        }
    }
}

const EN_WORDS: &[&str] = &["the", "and", "or", "of", "to", "in", "for", "with", "is", "are"];
const DE_WORDS: &[&str] = &["der", "die", "das", "und", "oder", "mit", "für", "ist", "sind"];

/// Rough German/English guess: `de`, `en`, or `unknown`.
///
/// Two or more umlauts/ß, or German function words outnumbering English ones by more than
/// two, mean `de`; the mirror condition means `en`.
pub fn detect_lang_simple(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    let umlauts = lower.chars().filter(|ch| "äöüß".contains(*ch)).count();
    let mut en = 0usize;
    let mut de = 0usize;
    for word in lower.split(|ch: char| !ch.is_alphanumeric() && ch != '_') {
        if EN_WORDS.contains(&word) {
            en += 1;
        }
        if DE_WORDS.contains(&word) {
            de += 1;
        }
    }
    if umlauts >= 2 || de > en + 2 {
        "de"
    } else if en > de + 2 {
        "en"
    } else {
        "unknown"
    }
}

/// Lowercase ASCII slug with `_` separators, at most 40 characters.
pub fn slug(text: &str) -> String {
    let mut out = String::new();
    for ch in text.trim().to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_end_matches('_');
    trimmed.chars().take(40).collect()
}

fn non_blank<'a>(candidate: &'a Value, key: &str) -> Option<&'a str> {
    candidate
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|text| !text.is_empty())
        .collect()
}

/// Apply `filters` to one candidate and map it to an id-less [`FinalRecord`].
///
/// Checks run in a fixed order and the first failure wins: required fields, length bounds,
/// language, trust level, content type, sources, then the optional language heuristic.
/// Lengths are counted in characters after trimming.
pub fn map_candidate(
    candidate: &Value,
    filters: &RecordFilters,
    input_value: &str,
    version: &str,
) -> Result<FinalRecord, RejectReason> {
    let question = non_blank(candidate, "question").ok_or(RejectReason::MissingOrEmpty("question"))?;
    let answer = non_blank(candidate, "answer").ok_or(RejectReason::MissingOrEmpty("answer"))?;
    check_lengths(question, answer, filters)?;

    let language = non_blank(candidate, "language");
    if let Some(language) = language
        && !filters.languages_allowed.is_empty()
        && !filters.languages_allowed.iter().any(|allowed| allowed == language)
    {
        return Err(RejectReason::LanguageNotAllowed);
    }

    let trust_level = non_blank(candidate, "trust_level");
    if let Some(trust) = trust_level
        && !filters.trust_levels_allowed.is_empty()
        && !filters.trust_levels_allowed.iter().any(|allowed| allowed == trust)
    {
        return Err(RejectReason::TrustLevelNotAllowed);
    }

    let content_type = string_list(candidate.get("content_type"));
    if !content_type.is_empty()
        && !filters.content_types_allowed.is_empty()
        && !content_type
            .iter()
            .any(|kind| filters.content_types_allowed.contains(kind))
    {
        return Err(RejectReason::ContentTypeNotAllowed);
    }

    let sources = candidate.get("source_chunks").and_then(Value::as_array);
    if filters.require_nonempty_sources && sources.is_none_or(|sources| sources.is_empty()) {
        return Err(RejectReason::MissingSources);
    }

    if filters.drop_if_language_mismatch
        && let Some(declared @ ("de" | "en")) = language
    {
        let detected = detect_lang_simple(&format!("{question} {answer}"));
        if detected != "unknown" && detected != declared {
            return Err(RejectReason::LanguageMismatch);
        }
    }

    let anchor_chunk_id = non_blank(candidate, "anchor_chunk_id").map(str::to_string);
    let source_ids = match sources {
        Some(sources) => sources
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| format!("chunk:{id}"))
            .collect(),
        None => anchor_chunk_id
            .iter()
            .map(|id| format!("chunk:{id}"))
            .collect(),
    };

    let domain = string_list(candidate.get("domain"));
    let topic = non_blank(candidate, "topic")
        .map(str::to_string)
        .or_else(|| domain.first().map(|first| slug(first)))
        .unwrap_or_default();
    let workspace = non_blank(candidate, "workspace")
        .or_else(|| non_blank(candidate, "workspace_name"))
        .unwrap_or_default()
        .to_string();

    Ok(FinalRecord {
        id: None,
        instruction: question.to_string(),
        input: input_value.to_string(),
        output: answer.to_string(),
        language: language.unwrap_or("unknown").to_string(),
        content_type,
        domain,
        trust_level: trust_level.unwrap_or("unknown").to_string(),
        source_ids,
        created_by: "llm_auto".to_string(),
        created_at: current_timestamp_rfc3339(),
        version: version.to_string(),
        provenance: candidate.get("provenance").cloned().unwrap_or(Value::Null),
        candidate_id: non_blank(candidate, "id").map(str::to_string),
        anchor_chunk_id,
        anchor_doc_id: non_blank(candidate, "anchor_doc_id").map(str::to_string),
        difficulty: non_blank(candidate, "difficulty").map(str::to_string),
        workspace,
        topic,
    })
}

/// Structural re-check applied to records read back from shard files.
pub fn check_record(record: &FinalRecord, filters: &RecordFilters) -> Result<(), RejectReason> {
    let question = record.instruction.trim();
    let answer = record.output.trim();
    if question.is_empty() {
        return Err(RejectReason::MissingOrEmpty("instruction"));
    }
    if answer.is_empty() {
        return Err(RejectReason::MissingOrEmpty("output"));
    }
    check_lengths(question, answer, filters)?;
    if filters.require_nonempty_sources && record.source_ids.is_empty() {
        return Err(RejectReason::MissingSources);
    }
    Ok(())
}

fn check_lengths(question: &str, answer: &str, filters: &RecordFilters) -> Result<(), RejectReason> {
    let question_len = question.chars().count();
    let answer_len = answer.chars().count();
    if question_len < filters.min_question_chars {
        return Err(RejectReason::QuestionTooShort);
    }
    if question_len > filters.max_question_chars {
        return Err(RejectReason::QuestionTooLong);
    }
    if answer_len < filters.min_answer_chars {
        return Err(RejectReason::AnswerTooShort);
    }
    if answer_len > filters.max_answer_chars {
        return Err(RejectReason::AnswerTooLong);
    }
    Ok(())
}

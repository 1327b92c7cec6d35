//! Prompt templates for the plan and generate passes.
//!
//! Built-in defaults can be replaced by workspace-relative files. Templates use `{CONTEXT}`,
//! `{PLAN}` and `{MAX_QA_PER_GROUP}` placeholders; every template is hashed so candidate
//! provenance pins the exact wording that produced it.

use crate::config::PromptFiles;
use crate::digest::sha256_hex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const PLAN_SYSTEM: &str = "\
You are an expert reviewer for engineering, thermodynamics and numerical simulation material. \
Before any questions are written, you read a small set of technical document chunks and decide \
what is worth asking about.

Rules:
- Use only information explicitly present in the chunks. Never invent formulas, symbols, values or assumptions.
- Cite evidence only with chunk_id values that appear in the chunk labels.
- Return exactly one JSON object and nothing else.
";

const PLAN_USER: &str = "\
Context chunks (labels show chunk_id and doc_id; never mention them in questions or answers):

{CONTEXT}

Identify the two most important, non-trivial takeaways supported by these chunks.

Return a single JSON object with exactly these keys:
- \"takeaways\": an array of exactly 2 objects, each {\"statement\": string, \"evidence_chunks\": [chunk_id, ...]}
- \"has_equations\": true if the chunks contain equations or formulas, else false
- \"equations\": array of equations quoted literally from the chunks (may be empty)
- \"self_check\": array of short reviewer notes on ambiguities or missing information (may be empty)
";

const GENERATE_SYSTEM: &str = "\
You are an expert assistant for engineering, thermodynamics and numerical simulation. \
Your task is to design exam-style and practice question-answer pairs strictly from small sets \
of technical document chunks.

Core rules:
- Use only information that is explicitly present in the provided chunks. Never invent formulas, \
symbols, parameter values, assumptions or definitions that are not clearly stated there.
- Prefer non-trivial, conceptually rich questions over simple recall of isolated facts.
- When the text is ambiguous or incomplete, omit that aspect instead of guessing.
- Use the same technical terminology, symbols and notation as in the text.
- Generate questions and answers in the same main language as the context.
- Keep answers precise, technically correct and as compact as possible while still fully answering the question.
";

const GENERATE_USER: &str = "\
You are given a set of context chunks from technical documents. Each chunk is labeled with a \
chunk_id and doc_id so you can orient yourself, but you must NOT mention chunk_id or doc_id in the \
questions or answers.

{CONTEXT}

Reviewer plan for this context (may be empty):
{PLAN}

Your goals:
1. Based only on the information in these chunks, generate between 1 and {MAX_QA_PER_GROUP} \
high-quality, non-trivial question-answer pairs. Cover the planned takeaways first.
2. Focus on conceptual understanding, conditions of validity, relationships between quantities, \
assumptions, limitations and the meaning of formulas.
3. Do not rely on outside knowledge.

Difficulty label: set \"difficulty\" to one of \"basic\", \"intermediate\", \"advanced\".

Output format (very important):
- Return a JSON array ONLY, with no text before or after.
- Each element must be an object with the keys:
  - \"question\": string
  - \"answer\": string
  - \"difficulty\": \"basic\" | \"intermediate\" | \"advanced\"
  - \"evidence_chunks\": array of chunk_id values that support the answer

Example:
[
  {\"question\": \"...\", \"answer\": \"...\", \"difficulty\": \"intermediate\", \"evidence_chunks\": [\"...\"]}
]
";

/// Placeholder substituted when generation runs without a validated plan.
pub const NO_PLAN: &str = "(no plan available)";

/// System prompts and user templates for both passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    /// Plan-pass system prompt.
    pub plan_system: String,
    /// Plan-pass user template.
    pub plan_user_template: String,
    /// Generate-pass system prompt.
    pub generate_system: String,
    /// Generate-pass user template.
    pub generate_user_template: String,
}

/// SHA-256 digests of the active templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptHashes {
    /// Digest of the plan system prompt.
    pub plan_system: String,
    /// Digest of the plan user template.
    pub plan_user: String,
    /// Digest of the generate system prompt.
    pub generate_system: String,
    /// Digest of the generate user template.
    pub generate_user: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            plan_system: PLAN_SYSTEM.to_string(),
            plan_user_template: PLAN_USER.to_string(),
            generate_system: GENERATE_SYSTEM.to_string(),
            generate_user_template: GENERATE_USER.to_string(),
        }
    }
}

impl PromptSet {
    /// Load overrides relative to `workspace_root`, falling back to built-in defaults.
    ///
    /// A configured file that cannot be read is an error.
    pub fn load(workspace_root: &Path, files: &PromptFiles) -> std::io::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            plan_system: read_override(workspace_root, &files.plan_system_file)?
                .unwrap_or(defaults.plan_system),
            plan_user_template: read_override(workspace_root, &files.plan_user_template_file)?
                .unwrap_or(defaults.plan_user_template),
            generate_system: read_override(workspace_root, &files.generate_system_file)?
                .unwrap_or(defaults.generate_system),
            generate_user_template: read_override(
                workspace_root,
                &files.generate_user_template_file,
            )?
            .unwrap_or(defaults.generate_user_template),
        })
    }

    /// Render the plan-pass user prompt.
    pub fn render_plan(&self, context: &str) -> String {
        self.plan_user_template.replace("{CONTEXT}", context)
    }

    /// Render the generate-pass user prompt.
    pub fn render_generate(&self, context: &str, plan: Option<&str>, max_qa: usize) -> String {
        self.generate_user_template
            .replace("{CONTEXT}", context)
            .replace("{PLAN}", plan.unwrap_or(NO_PLAN))
            .replace("{MAX_QA_PER_GROUP}", &max_qa.to_string())
    }

    /// Digests of all four templates.
    pub fn hashes(&self) -> PromptHashes {
        PromptHashes {
            plan_system: sha256_hex(&self.plan_system),
            plan_user: sha256_hex(&self.plan_user_template),
            generate_system: sha256_hex(&self.generate_system),
            generate_user: sha256_hex(&self.generate_user_template),
        }
    }
}

fn read_override(root: &Path, file: &Option<PathBuf>) -> std::io::Result<Option<String>> {
    let Some(relative) = file else {
        return Ok(None);
    };
    let path = root.join(relative);
    let text = std::fs::read_to_string(&path).map_err(|error| {
        std::io::Error::new(
            error.kind(),
            format!("prompt file {}: {error}", path.display()),
        )
    })?;
    tracing::debug!(path = %path.display(), "Loaded prompt override");
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholders() {
        let prompts = PromptSet::default();
        let rendered = prompts.render_generate("CTX-BLOCK", None, 4);
        assert!(rendered.contains("CTX-BLOCK"));
        assert!(rendered.contains(NO_PLAN));
        assert!(rendered.contains("between 1 and 4"));
        assert!(!rendered.contains("{MAX_QA_PER_GROUP}"));
        assert!(prompts.render_plan("CTX").contains("CTX"));
    }

    #[test]
    fn loads_overrides_and_changes_hashes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("gen.txt"), "custom {CONTEXT}").expect("write");
        let files = PromptFiles {
            generate_user_template_file: Some(PathBuf::from("gen.txt")),
            ..Default::default()
        };
        let prompts = PromptSet::load(dir.path(), &files).expect("load");
        assert_eq!(prompts.render_generate("x", None, 1), "custom x");
        assert_eq!(prompts.plan_system, PLAN_SYSTEM);
        assert_ne!(
            prompts.hashes().generate_user,
            PromptSet::default().hashes().generate_user
        );
    }

    #[test]
    fn missing_override_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = PromptFiles {
            plan_system_file: Some(PathBuf::from("absent.txt")),
            ..Default::default()
        };
        assert!(PromptSet::load(dir.path(), &files).is_err());
    }
}

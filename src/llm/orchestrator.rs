//! Two-pass protocol per context group.
//!
//! ```text
//! PlanRequested -> PlanValidated | PlanFallback -> GenerateRequested -> GenerateValidated | GenerateDiscarded
//! ```
//!
//! Only a missing model escapes as an error. Every other failure ends the group in a terminal
//! state and the batch carries on.

use super::extract::{JsonShape, extract_json};
use super::plan::{PlanResult, validate_plan};
use super::prompts::PromptSet;
use super::retry::{Attempted, RetryPolicy};
use super::{ChatRequest, LlmClient, LlmError, ModelOptions};
use crate::config::LlmConfig;
use crate::context::ContextGroup;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// Protocol states visited by one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Plan call issued.
    PlanRequested,
    /// Plan passed schema validation.
    PlanValidated,
    /// Plan skipped, failed, or invalid; generation proceeds without it.
    PlanFallback,
    /// Generate call issued.
    GenerateRequested,
    /// Generate call returned at least one structurally usable pair.
    GenerateValidated,
    /// Generate call failed or returned nothing usable.
    GenerateDiscarded,
}

/// Question/answer object as emitted by the model, before candidate validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawPair {
    /// Question text.
    pub question: Option<String>,
    /// Answer text.
    pub answer: Option<String>,
    /// Difficulty label.
    pub difficulty: Option<String>,
    /// Cited chunk ids, unvalidated.
    #[serde(alias = "evidence")]
    pub evidence_chunks: Option<Value>,
}

/// Everything the writer needs to know about one group's model interaction.
#[derive(Debug, Clone, Default)]
pub struct GroupOutcome {
    /// States visited in order.
    pub trace: Vec<GroupState>,
    /// Validated plan, when one was obtained.
    pub plan: Option<PlanResult>,
    /// Structurally usable pairs, capped at the requested maximum.
    pub pairs: Vec<RawPair>,
    /// Array elements that were not usable pair objects.
    pub malformed: usize,
    /// Retry attempts spent across both passes.
    pub retries: u32,
    /// Whether the group was given up after transient failures.
    pub abandoned: bool,
}

impl GroupOutcome {
    /// Terminal state of the group.
    pub fn final_state(&self) -> Option<GroupState> {
        self.trace.last().copied()
    }

    fn enter(&mut self, state: GroupState) {
        self.trace.push(state);
    }
}

/// Runs the plan and generate passes for context groups.
pub struct Orchestrator<'a> {
    client: &'a dyn LlmClient,
    prompts: &'a PromptSet,
    retry: RetryPolicy,
    model: String,
    options: ModelOptions,
    plan_enabled: bool,
    max_qa_per_group: usize,
    max_chars_per_chunk: usize,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator from the `llm` configuration section.
    pub fn new(
        client: &'a dyn LlmClient,
        prompts: &'a PromptSet,
        config: &LlmConfig,
        max_qa_per_group: usize,
    ) -> Self {
        Self {
            client,
            prompts,
            retry: RetryPolicy::from(config),
            model: config.model.clone(),
            options: ModelOptions::from(config),
            plan_enabled: config.plan_enabled,
            max_qa_per_group: max_qa_per_group.max(1),
            max_chars_per_chunk: config.max_chars_per_chunk,
        }
    }

    /// Model options sent with every call.
    pub fn options(&self) -> ModelOptions {
        self.options
    }

    /// Model tag.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run both passes for `group`. Fails only when the model is unavailable.
    pub async fn run_group(&self, group: &ContextGroup) -> Result<GroupOutcome, LlmError> {
        let anchor = group.anchor().chunk_id.as_str();
        let context = group.render(self.max_chars_per_chunk);
        let mut outcome = GroupOutcome::default();

        if self.plan_enabled {
            outcome.enter(GroupState::PlanRequested);
            let attempted = self
                .call_json(
                    "plan",
                    &self.prompts.plan_system,
                    self.prompts.render_plan(&context),
                    JsonShape::Object,
                )
                .await;
            outcome.retries += attempted.retries();
            match attempted.result {
                Ok(value) => {
                    let ids: HashSet<&str> = group
                        .chunks
                        .iter()
                        .map(|chunk| chunk.chunk_id.as_str())
                        .collect();
                    match validate_plan(&value, &ids) {
                        Ok(plan) => {
                            outcome.plan = Some(plan);
                            outcome.enter(GroupState::PlanValidated);
                        }
                        Err(error) => {
                            tracing::warn!(anchor, group = group.group_index, error = %error, "Plan failed validation; generating without plan");
                            outcome.enter(GroupState::PlanFallback);
                        }
                    }
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    tracing::warn!(anchor, group = group.group_index, error = %error, "Plan call failed; generating without plan");
                    outcome.enter(GroupState::PlanFallback);
                }
            }
        } else {
            outcome.enter(GroupState::PlanFallback);
        }

        let plan_text = outcome
            .plan
            .as_ref()
            .and_then(|plan| serde_json::to_string_pretty(plan).ok());
        outcome.enter(GroupState::GenerateRequested);
        let attempted = self
            .call_json(
                "generate",
                &self.prompts.generate_system,
                self.prompts
                    .render_generate(&context, plan_text.as_deref(), self.max_qa_per_group),
                JsonShape::Array,
            )
            .await;
        outcome.retries += attempted.retries();

        let items = match attempted.result {
            Ok(Value::Array(items)) => items,
            Ok(_) => Vec::new(),
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                tracing::warn!(anchor, group = group.group_index, error = %error, "Generate call failed; abandoning group");
                outcome.abandoned = true;
                outcome.enter(GroupState::GenerateDiscarded);
                return Ok(outcome);
            }
        };

        for item in items {
            match serde_json::from_value::<RawPair>(item) {
                Ok(pair) if item_has_text(&pair) => outcome.pairs.push(pair),
                _ => outcome.malformed += 1,
            }
        }
        if outcome.pairs.len() > self.max_qa_per_group {
            outcome.pairs.truncate(self.max_qa_per_group);
        }

        if outcome.pairs.is_empty() {
            tracing::warn!(
                anchor,
                group = group.group_index,
                malformed = outcome.malformed,
                "Generate output held no usable pairs"
            );
            outcome.enter(GroupState::GenerateDiscarded);
        } else {
            tracing::debug!(
                anchor,
                group = group.group_index,
                pairs = outcome.pairs.len(),
                planned = outcome.plan.is_some(),
                "Generate output accepted"
            );
            outcome.enter(GroupState::GenerateValidated);
        }
        Ok(outcome)
    }

    async fn call_json(
        &self,
        label: &str,
        system: &str,
        user: String,
        shape: JsonShape,
    ) -> Attempted<Value> {
        let request = ChatRequest {
            model: self.model.clone(),
            system: system.to_string(),
            user,
            options: self.options,
        };
        self.retry
            .run(label, || async {
                let text = self.client.chat(&request).await?;
                extract_json(&text, shape).map_err(|error| LlmError::InvalidResponse(error.to_string()))
            })
            .await
    }
}

fn item_has_text(pair: &RawPair) -> bool {
    pair.question.is_some() || pair.answer.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextChunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned responses in order, recording each request.
    struct Scripted {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(LlmError::Transient("script exhausted".into())))
        }
    }

    fn group() -> ContextGroup {
        let chunk = |id: &str| ContextChunk {
            chunk_id: id.into(),
            doc_id: "d".into(),
            language: Some("en".into()),
            trust_level: Some("high".into()),
            content_type: vec![],
            domain: vec![],
            summary_short: None,
            content: format!("text {id}"),
        };
        ContextGroup {
            group_index: 0,
            chunks: vec![chunk("c1"), chunk("c2")],
        }
    }

    fn config(plan_enabled: bool) -> LlmConfig {
        LlmConfig {
            plan_enabled,
            max_retries: 2,
            base_delay_ms: 0,
            jitter_ms: 0,
            ..Default::default()
        }
    }

    const PLAN: &str = r#"{"takeaways":[{"statement":"a","evidence_chunks":["c1"]},{"statement":"b","evidence_chunks":["c2"]}],"has_equations":false,"equations":[],"self_check":[]}"#;

    #[tokio::test]
    async fn validated_plan_is_forwarded_to_generate() {
        let client = Scripted::new(vec![
            Ok(format!("Plan:\n{PLAN}")),
            Ok(r#"[{"question":"q1","answer":"a1","difficulty":"basic"},{"question":"q2","answer":"a2","difficulty":"advanced"},{"question":"q3","answer":"a3","difficulty":"basic"}]"#.into()),
        ]);
        let prompts = PromptSet::default();
        let orchestrator = Orchestrator::new(&client, &prompts, &config(true), 2);

        let outcome = orchestrator.run_group(&group()).await.expect("outcome");
        assert_eq!(
            outcome.trace,
            vec![
                GroupState::PlanRequested,
                GroupState::PlanValidated,
                GroupState::GenerateRequested,
                GroupState::GenerateValidated
            ]
        );
        assert_eq!(outcome.pairs.len(), 2);
        let requests = client.requests.lock().unwrap();
        assert!(requests[1].user.contains("\"statement\": \"a\""));
        assert!(requests[1].user.contains("[Chunk 1 | chunk_id=c1 | doc_id=d]"));
    }

    #[tokio::test]
    async fn invalid_plan_degrades_without_aborting() {
        let client = Scripted::new(vec![
            Ok(r#"{"takeaways":[],"has_equations":false}"#.into()),
            Ok(r#"[{"question":"q","answer":"a","difficulty":"basic"}]"#.into()),
        ]);
        let prompts = PromptSet::default();
        let orchestrator = Orchestrator::new(&client, &prompts, &config(true), 3);

        let outcome = orchestrator.run_group(&group()).await.expect("outcome");
        assert!(outcome.trace.contains(&GroupState::PlanFallback));
        assert_eq!(outcome.final_state(), Some(GroupState::GenerateValidated));
        assert!(outcome.plan.is_none());
        let requests = client.requests.lock().unwrap();
        assert!(requests[1].user.contains(super::super::prompts::NO_PLAN));
    }

    #[tokio::test]
    async fn unparseable_generate_output_is_retried_then_abandoned() {
        let client = Scripted::new(vec![
            Ok("no json at all".into()),
            Ok("still nothing".into()),
        ]);
        let prompts = PromptSet::default();
        let orchestrator = Orchestrator::new(&client, &prompts, &config(false), 3);

        let outcome = orchestrator.run_group(&group()).await.expect("outcome");
        assert!(outcome.abandoned);
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.final_state(), Some(GroupState::GenerateDiscarded));
    }

    #[tokio::test]
    async fn malformed_items_are_counted() {
        let client = Scripted::new(vec![Ok(
            r#"[42, {"foo": 1}, {"question":"q","answer":"a","difficulty":"basic","evidence":["c2"]}]"#.into(),
        )]);
        let prompts = PromptSet::default();
        let orchestrator = Orchestrator::new(&client, &prompts, &config(false), 3);

        let outcome = orchestrator.run_group(&group()).await.expect("outcome");
        assert_eq!(outcome.malformed, 2);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].evidence_chunks, Some(serde_json::json!(["c2"])));
    }

    #[tokio::test]
    async fn missing_model_is_fatal() {
        let client = Scripted::new(vec![Err(LlmError::ModelNotFound("llama".into()))]);
        let prompts = PromptSet::default();
        let orchestrator = Orchestrator::new(&client, &prompts, &config(true), 3);

        let error = orchestrator.run_group(&group()).await.expect_err("fatal");
        assert!(matches!(error, LlmError::ModelNotFound(_)));
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }
}

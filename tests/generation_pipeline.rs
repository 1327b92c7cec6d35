//! End-to-end candidate generation against a mocked Ollama server and an in-memory index.

use async_trait::async_trait;
use httpmock::{Method::POST, MockServer};
use qacurator::candidates::{Candidate, GenerationError, GenerationService, processed_anchors};
use qacurator::chunks::chunk_from_value;
use qacurator::config::GenerationConfig;
use qacurator::jsonl::read_jsonl;
use qacurator::llm::{LlmError, OllamaChatClient};
use qacurator::retrieval::{MetricInfo, Neighbor, NeighborRetriever, RetrievalError};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

struct StaticIndex {
    neighbors: HashMap<String, Vec<Neighbor>>,
}

#[async_trait]
impl NeighborRetriever for StaticIndex {
    async fn metric(&self) -> Result<MetricInfo, RetrievalError> {
        Ok(MetricInfo::default())
    }

    async fn get_neighbors(&self, chunk_id: &str, top_k: usize) -> Result<Vec<Neighbor>, RetrievalError> {
        let mut found = self.neighbors.get(chunk_id).cloned().unwrap_or_default();
        found.truncate(top_k);
        Ok(found)
    }
}

fn index() -> StaticIndex {
    let chunk = chunk_from_value(json!({
        "chunk_id": "v1",
        "doc_id": "other",
        "content": "Related material from another manual.",
        "language": "en",
        "trust_level": "high"
    }))
    .expect("neighbor chunk");
    StaticIndex {
        neighbors: HashMap::from([("c1".to_string(), vec![Neighbor { chunk, score: 0.91 }])]),
    }
}

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let semantic = dir.path().join("semantic/json");
    std::fs::create_dir_all(&semantic).expect("mkdir");
    let rows: Vec<String> = ["The heat equation is introduced.", "Boundary conditions are listed.", "A worked example follows."]
        .iter()
        .enumerate()
        .map(|(index, content)| {
            json!({
                "chunk_id": format!("c{index}"),
                "doc_id": "manual",
                "content": content,
                "language": "en",
                "semantic": {"trust_level": "high", "domain": ["thermo"], "content_type": "textbook"}
            })
            .to_string()
        })
        .collect();
    std::fs::write(semantic.join("manual.jsonl"), rows.join("\n")).expect("write chunks");
    dir
}

fn config(root: &Path, server: &MockServer) -> GenerationConfig {
    let mut config = GenerationConfig {
        workspace_root: Some(root.to_path_buf()),
        ..Default::default()
    };
    config.llm.base_url = server.base_url();
    config.llm.max_retries = 2;
    config.llm.base_delay_ms = 0;
    config.llm.jitter_ms = 0;
    config
}

fn service(config: GenerationConfig) -> GenerationService {
    let llm = OllamaChatClient::from_config(&config.llm).expect("client");
    GenerationService::new(config, Box::new(index()), Box::new(llm)).expect("service")
}

fn output(root: &Path) -> PathBuf {
    root.join("qa_candidates/jsonl/manual.qa_candidates.jsonl")
}

fn reply(content: String) -> serde_json::Value {
    json!({"message": {"role": "assistant", "content": content}, "done": true})
}

#[tokio::test]
async fn generates_grounded_candidates_and_resumes() {
    let server = MockServer::start_async().await;
    let plan = json!({
        "takeaways": [
            {"statement": "The heat equation governs the problem.", "evidence_chunks": ["c1"]},
            {"statement": "Boundary conditions close it.", "evidence_chunks": ["c1", "nowhere"]}
        ],
        "has_equations": false,
        "equations": [],
        "self_check": []
    });
    let plan_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat").body_contains("exactly one JSON object");
            then.status(200).json_body(reply(format!("```json\n{plan}\n```")));
        })
        .await;
    let pairs = json!([
        {"question": "Which equation is introduced?", "answer": "The heat equation.", "difficulty": "basic", "evidence_chunks": ["c1", "nowhere"]},
        {"question": "What closes the problem?", "answer": "The listed boundary conditions.", "difficulty": "Intermediate", "evidence_chunks": ["c1"]},
        {"question": "Dropped for its label", "answer": "x", "difficulty": "expert"}
    ]);
    let generate_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat").body_contains("Return a JSON array ONLY");
            then.status(200).json_body(reply(pairs.to_string()));
        })
        .await;

    let dir = workspace();
    let summary = service(config(dir.path(), &server)).run().await.expect("run");

    // c0 and c2 get one group each, c1 gets its local group plus one with v1.
    plan_mock.assert_hits_async(4).await;
    generate_mock.assert_hits_async(4).await;
    assert_eq!(summary.written(), 6);
    assert_eq!(summary.metrics.groups_built, 4);
    assert_eq!(summary.metrics.candidates_invalid, 4);

    let candidates = read_jsonl::<Candidate>(&output(dir.path())).expect("read").records;
    assert_eq!(candidates.len(), 6);
    for candidate in &candidates {
        assert!(candidate.source_chunks.iter().all(|id| candidate.context_chunks.contains(id)));
        assert_eq!(candidate.anchor_doc_id, "manual");
        assert_eq!(candidate.domain, vec!["thermo".to_string()]);
        let plan = candidate.provenance.plan.as_ref().expect("plan recorded");
        assert_eq!(plan.takeaways[1].evidence_chunks, vec!["c1".to_string()]);
    }
    let fallback = candidates
        .iter()
        .find(|candidate| candidate.question == "Which equation is introduced?")
        .expect("first pair");
    assert!(fallback.provenance.evidence_fallback);
    assert_eq!(fallback.source_chunks, fallback.context_chunks);
    let with_neighbor = candidates
        .iter()
        .find(|candidate| candidate.anchor_chunk_id == "c1")
        .expect("c1 candidate");
    assert_eq!(with_neighbor.provenance.retrieval.neighbors[0].chunk_id, "v1");

    assert_eq!(processed_anchors(&output(dir.path())).expect("checkpoint").len(), 3);

    let resumed = service(config(dir.path(), &server)).run().await.expect("resume");
    assert_eq!(resumed.written(), 0);
    assert_eq!(resumed.metrics.anchors_resumed, 3);
    generate_mock.assert_hits_async(4).await;
}

#[tokio::test]
async fn missing_model_is_fatal() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(404).body("model 'llama3.1:8b-instruct' not found");
        })
        .await;

    let dir = workspace();
    let error = service(config(dir.path(), &server)).run().await.expect_err("fatal");
    assert!(matches!(error, GenerationError::Llm(LlmError::ModelNotFound(_))));
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn transient_failures_abandon_groups_without_failing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(503).body("busy");
        })
        .await;

    let dir = workspace();
    let summary = service(config(dir.path(), &server)).run().await.expect("run");
    assert_eq!(summary.written(), 0);
    assert_eq!(summary.metrics.groups_abandoned, 4);
    assert_eq!(summary.metrics.plan_fallbacks, 4);
    assert!(processed_anchors(&output(dir.path())).expect("checkpoint").is_empty());
}

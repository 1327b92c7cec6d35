//! Single-process finalization.

use super::curate::Curator;
use super::ids::assign_id;
use super::version::resolve_version;
use super::{DatasetError, DatasetMode, DatasetReport, publish};
use crate::config::DatasetConfig;

/// Filter, dedup, assign ids, and publish in one pass. `auto` versions are inferred here.
pub fn run_single(config: &DatasetConfig) -> Result<DatasetReport, DatasetError> {
    let final_dir = config.resolve(&config.paths.final_dir);
    let version = resolve_version(
        &config.output.version,
        DatasetMode::Single,
        &final_dir,
        &config.output.dataset_name,
    )?;
    let curator = Curator::new(config, &version, config.limits.limit_num_examples);
    let files = curator.candidate_files()?;
    tracing::info!(files = files.len(), version = %version, "Starting single-process finalization");

    let mut curation = curator.curate(&files, |_| true)?;
    for (index, record) in curation.records.iter_mut().enumerate() {
        record.id = Some(assign_id(&config.ids, index + 1, record));
    }
    publish(
        config,
        DatasetMode::Single,
        &version,
        &curation.records,
        &curation.rejects,
        curation.counters,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FinalRecord, RejectRecord, dataset_path, rejects_path, run};
    use crate::jsonl::read_jsonl;
    use serde_json::json;

    fn workspace() -> (tempfile::TempDir, DatasetConfig) {
        let dir = tempfile::tempdir().expect("tempdir");
        let candidates = dir.path().join("qa_candidates/jsonl");
        std::fs::create_dir_all(&candidates).expect("mkdir");
        let rows = [
            json!({"id": "c1_qa_1", "anchor_chunk_id": "c1", "question": "What does chunk one describe?", "answer": "It describes the measurement setup in detail.", "language": "en", "trust_level": "high", "source_chunks": ["c1"], "domain": ["Metrology"]}),
            json!({"id": "c2_qa_1", "anchor_chunk_id": "c2", "question": "What does chunk one describe?", "answer": "It describes the measurement setup in detail.", "language": "en", "trust_level": "high", "source_chunks": ["c2"]}),
            json!({"id": "c3_qa_1", "anchor_chunk_id": "c3", "question": "Which unit does the table use?", "answer": "The table reports every value in millivolts.", "language": "en", "trust_level": "low", "source_chunks": ["c3"]}),
        ];
        let body: Vec<String> = rows.iter().map(|row| row.to_string()).collect();
        std::fs::write(candidates.join("doc.qa_candidates.jsonl"), body.join("\n")).expect("write");
        let config = DatasetConfig {
            workspace_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        (dir, config)
    }

    #[test]
    fn publishes_versioned_dataset() {
        let (dir, config) = workspace();
        let report = run(&config, DatasetMode::Single).expect("run");
        assert_eq!(report.version, "v1");
        assert_eq!(report.counters.read, 3);
        assert_eq!(report.counters.kept, 1);
        assert_eq!(report.counters.dropped, 1);
        assert_eq!(report.counters.duped, 1);

        let records = read_jsonl::<FinalRecord>(&dataset_path(&config, "v1")).expect("dataset").records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_deref(), Some("ws_00001_q1"));
        assert_eq!(records[0].topic, "metrology");

        let rejects = read_jsonl::<RejectRecord>(&rejects_path(&config, "v1")).expect("rejects").records;
        assert_eq!(rejects.len(), 1);
        assert_eq!(rejects[0].reason, "trust_level_not_allowed");

        let changelog = std::fs::read_to_string(dir.path().join("qa_final/jsonl/CHANGELOG.md")).expect("changelog");
        assert!(changelog.contains("## v1 - "));
        assert!(changelog.contains("- duplicates_removed: 1"));
    }

    #[test]
    fn auto_version_advances_and_outputs_are_immutable() {
        let (_dir, mut config) = workspace();
        run(&config, DatasetMode::Single).expect("v1");
        let second = run(&config, DatasetMode::Single).expect("v2");
        assert_eq!(second.version, "v2");

        config.output.version = "v1".into();
        let error = run(&config, DatasetMode::Single).expect_err("exists");
        assert!(matches!(error, DatasetError::OutputExists(_)));

        config.output.overwrite_existing = true;
        assert!(run(&config, DatasetMode::Single).is_ok());
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (dir, mut config) = workspace();
        config.dry_run = true;
        let report = run(&config, DatasetMode::Single).expect("run");
        assert_eq!(report.output, None);
        assert_eq!(report.counters.kept, 1);
        assert!(!dir.path().join("qa_final").exists());
    }
}

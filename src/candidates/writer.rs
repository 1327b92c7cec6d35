//! Resumable candidate output with an anchor checkpoint.
//!
//! Next to every candidate file sits `<file>.anchors`: one `anchor<TAB>offset<TAB>rows` line per
//! anchor whose candidates are fully flushed, where `offset` is the candidate file length and
//! `rows` the number of candidate rows after that anchor. Resume reads the checkpoint instead of
//! the candidate file. Only bytes past the last recorded offset (left by a crash between the two
//! writes) are scanned, and a missing, outdated or inconsistent checkpoint is rebuilt from one
//! full scan.

use super::Candidate;
use crate::config::ResumeMode;
use crate::jsonl::JsonlWriter;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Checkpoint sidecar path for a candidate file.
pub fn checkpoint_path(candidates: &Path) -> PathBuf {
    let mut name = candidates
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".anchors");
    candidates.with_file_name(name)
}

/// What an earlier run left in a candidate file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeState {
    /// Anchors already represented.
    pub anchors: HashSet<String>,
    /// Candidate rows already on disk.
    pub candidates: usize,
}

/// Resume state of `candidates`, without modifying anything on disk.
pub fn resume_state(candidates: &Path) -> io::Result<ResumeState> {
    let recovered = recover(candidates)?;
    Ok(ResumeState {
        anchors: recovered.anchors,
        candidates: recovered.rows,
    })
}

/// Anchors already represented in `candidates`, without modifying anything on disk.
pub fn processed_anchors(candidates: &Path) -> io::Result<HashSet<String>> {
    Ok(resume_state(candidates)?.anchors)
}

/// Append-only candidate writer with checkpointed resume.
pub struct CandidateWriter {
    out: JsonlWriter,
    checkpoint: File,
    processed: HashSet<String>,
    existing: usize,
    rows: usize,
}

impl CandidateWriter {
    /// Open `path` honouring `mode`; `Overwrite` truncates the file and its checkpoint.
    pub fn open(path: &Path, mode: ResumeMode) -> io::Result<Self> {
        let sidecar = checkpoint_path(path);
        if mode == ResumeMode::Overwrite {
            if path.exists() {
                tracing::info!(file = %path.display(), "Overwriting existing candidate file");
            }
            let out = JsonlWriter::create(path)?;
            let checkpoint = File::create(&sidecar)?;
            return Ok(Self {
                out,
                checkpoint,
                processed: HashSet::new(),
                existing: 0,
                rows: 0,
            });
        }

        let recovered = recover(path)?;
        let out = JsonlWriter::append(path)?;
        let mut checkpoint = if recovered.rewrite {
            File::create(&sidecar)?
        } else {
            OpenOptions::new().create(true).append(true).open(&sidecar)?
        };
        if !recovered.pending.is_empty() || recovered.rewrite {
            let lines = if recovered.rewrite {
                &recovered.ordered
            } else {
                &recovered.pending
            };
            let offset = out.flushed_len()?;
            for anchor in lines {
                writeln!(checkpoint, "{anchor}\t{offset}\t{}", recovered.rows)?;
            }
            checkpoint.flush()?;
        }
        if !recovered.anchors.is_empty() {
            tracing::info!(
                file = %path.display(),
                anchors = recovered.anchors.len(),
                candidates = recovered.rows,
                "Resuming candidate file"
            );
        }
        Ok(Self {
            out,
            checkpoint,
            processed: recovered.anchors,
            existing: recovered.rows,
            rows: recovered.rows,
        })
    }

    /// Whether `anchor` already has candidates on disk.
    pub fn is_processed(&self, anchor: &str) -> bool {
        self.processed.contains(anchor)
    }

    /// Number of checkpointed anchors.
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Candidate rows that were on disk when the writer was opened.
    pub fn existing_candidates(&self) -> usize {
        self.existing
    }

    /// Append and flush one candidate.
    pub fn write(&mut self, candidate: &Candidate) -> io::Result<()> {
        self.out.write_record(candidate)?;
        self.rows += 1;
        Ok(())
    }

    /// Record `anchor` as complete. Call only after its candidates were written.
    pub fn mark_processed(&mut self, anchor: &str) -> io::Result<()> {
        let offset = self.out.flushed_len()?;
        writeln!(self.checkpoint, "{anchor}\t{offset}\t{}", self.rows)?;
        self.checkpoint.flush()?;
        self.processed.insert(anchor.to_string());
        Ok(())
    }

    /// Candidate file path.
    pub fn path(&self) -> &Path {
        self.out.path()
    }
}

#[derive(Debug, Default)]
struct Recovered {
    anchors: HashSet<String>,
    /// Anchors found past the last checkpointed offset.
    pending: Vec<String>,
    /// Every anchor in first-seen order, used when the checkpoint is rewritten.
    ordered: Vec<String>,
    /// Candidate rows on disk.
    rows: usize,
    /// Whether the checkpoint must be rebuilt from scratch.
    rewrite: bool,
}

fn recover(candidates: &Path) -> io::Result<Recovered> {
    let file_len = match std::fs::metadata(candidates) {
        Ok(metadata) => metadata.len(),
        Err(error) if error.kind() == io::ErrorKind::NotFound => 0,
        Err(error) => return Err(error),
    };
    let sidecar = checkpoint_path(candidates);

    let mut recovered = Recovered::default();
    let mut last_offset = 0u64;
    let mut last_rows = 0usize;
    let mut outdated = false;
    let checkpoint_exists = sidecar.exists();
    if checkpoint_exists {
        for line in BufReader::new(File::open(&sidecar)?).lines() {
            let line = line?;
            let mut parts = line.splitn(3, '\t');
            let Some(anchor) = parts.next().filter(|anchor| !anchor.is_empty()) else {
                continue;
            };
            let offset = parts.next().and_then(|raw| raw.trim().parse::<u64>().ok());
            let rows = parts.next().and_then(|raw| raw.trim().parse::<usize>().ok());
            match (offset, rows) {
                (Some(offset), Some(rows)) if offset >= last_offset => {
                    last_offset = offset;
                    last_rows = rows;
                }
                (Some(_), Some(_)) => {}
                _ => outdated = true,
            }
            if recovered.anchors.insert(anchor.to_string()) {
                recovered.ordered.push(anchor.to_string());
            }
        }
    }

    if file_len == 0 {
        recovered.rewrite = checkpoint_exists && !recovered.anchors.is_empty();
        if recovered.rewrite {
            tracing::warn!(file = %candidates.display(), "Checkpoint lists anchors but candidate file is empty; resetting");
            recovered.anchors.clear();
            recovered.ordered.clear();
        }
        return Ok(recovered);
    }

    if !checkpoint_exists || outdated || last_offset > file_len {
        if !checkpoint_exists {
            tracing::info!(file = %candidates.display(), "Building anchor checkpoint from candidate file");
        } else if outdated {
            tracing::info!(file = %candidates.display(), "Checkpoint lacks row counts; rebuilding");
        } else {
            tracing::warn!(file = %candidates.display(), "Checkpoint is ahead of candidate file; rebuilding");
        }
        let scanned = scan_anchors(candidates, 0)?;
        recovered.anchors.clear();
        recovered.ordered.clear();
        recovered.rows = scanned.len();
        for anchor in scanned {
            if recovered.anchors.insert(anchor.clone()) {
                recovered.ordered.push(anchor);
            }
        }
        recovered.rewrite = true;
        return Ok(recovered);
    }

    recovered.rows = last_rows;
    if last_offset < file_len {
        let scanned = scan_anchors(candidates, last_offset)?;
        recovered.rows += scanned.len();
        for anchor in scanned {
            if recovered.anchors.insert(anchor.clone()) {
                recovered.ordered.push(anchor.clone());
                recovered.pending.push(anchor);
            }
        }
    }
    Ok(recovered)
}

/// Anchor id of every candidate row from byte `from` on, one entry per row.
fn scan_anchors(path: &Path, from: u64) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut reader = BufReader::new(file);
    let mut anchors = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let Ok(value) = serde_json::from_slice::<Value>(&buf) else {
            continue;
        };
        if let Some(anchor) = value.get("anchor_chunk_id").and_then(Value::as_str) {
            anchors.push(anchor.to_string());
        }
    }
    Ok(anchors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append_raw(path: &Path, anchor: &str) {
        let mut writer = JsonlWriter::append(path).expect("open");
        writer
            .write_record(&json!({ "anchor_chunk_id": anchor, "question": "q" }))
            .expect("write");
    }

    #[test]
    fn checkpoint_path_appends_suffix() {
        assert_eq!(
            checkpoint_path(Path::new("/out/doc.qa_candidates.jsonl")),
            PathBuf::from("/out/doc.qa_candidates.jsonl.anchors")
        );
    }

    #[test]
    fn rebuilds_missing_checkpoint_from_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.jsonl");
        append_raw(&path, "a1");
        append_raw(&path, "a1");
        append_raw(&path, "a2");

        let writer = CandidateWriter::open(&path, ResumeMode::Resume).expect("open");
        assert!(writer.is_processed("a1") && writer.is_processed("a2"));
        let sidecar = std::fs::read_to_string(checkpoint_path(&path)).expect("sidecar");
        assert_eq!(sidecar.lines().count(), 2);
    }

    #[test]
    fn resume_picks_up_anchors_written_after_last_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.jsonl");
        {
            let mut writer = CandidateWriter::open(&path, ResumeMode::Resume).expect("open");
            append_raw(writer.path(), "a1");
            writer.mark_processed("a1").expect("mark");
        }
        // Simulate a crash after writing a2's candidates but before checkpointing it.
        append_raw(&path, "a2");

        let processed = processed_anchors(&path).expect("scan");
        assert!(processed.contains("a1") && processed.contains("a2"));

        let writer = CandidateWriter::open(&path, ResumeMode::Resume).expect("reopen");
        assert_eq!(writer.processed_count(), 2);
        let sidecar = std::fs::read_to_string(checkpoint_path(&path)).expect("sidecar");
        assert!(sidecar.lines().any(|line| line.starts_with("a2\t")));
    }

    #[test]
    fn overwrite_truncates_output_and_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.jsonl");
        append_raw(&path, "a1");
        drop(CandidateWriter::open(&path, ResumeMode::Resume).expect("open"));

        let writer = CandidateWriter::open(&path, ResumeMode::Overwrite).expect("overwrite");
        assert_eq!(writer.processed_count(), 0);
        assert_eq!(std::fs::metadata(&path).expect("meta").len(), 0);
        assert_eq!(
            std::fs::read_to_string(checkpoint_path(&path)).expect("sidecar"),
            ""
        );
    }

    #[test]
    fn counts_candidate_rows_across_resumes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.jsonl");
        append_raw(&path, "a1");
        append_raw(&path, "a1");
        {
            let writer = CandidateWriter::open(&path, ResumeMode::Resume).expect("open");
            assert_eq!(writer.existing_candidates(), 2);
        }
        append_raw(&path, "a2");

        let state = resume_state(&path).expect("state");
        assert_eq!(state.candidates, 3);
        assert_eq!(state.anchors.len(), 2);
        let writer = CandidateWriter::open(&path, ResumeMode::Resume).expect("reopen");
        assert_eq!(writer.existing_candidates(), 3);
    }

    #[test]
    fn checkpoint_without_row_counts_is_rebuilt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.jsonl");
        append_raw(&path, "a1");
        append_raw(&path, "a2");
        let len = std::fs::metadata(&path).expect("meta").len();
        std::fs::write(checkpoint_path(&path), format!("a1\t{len}\na2\t{len}\n")).expect("sidecar");

        assert_eq!(resume_state(&path).expect("state").candidates, 2);
        drop(CandidateWriter::open(&path, ResumeMode::Resume).expect("open"));
        let sidecar = std::fs::read_to_string(checkpoint_path(&path)).expect("sidecar");
        assert!(sidecar.lines().all(|line| line.split('\t').count() == 3));
    }

    #[test]
    fn invalid_utf8_row_does_not_block_resume() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.jsonl");
        append_raw(&path, "a1");
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(b"{\"anchor_chunk_id\":\"\xff\"}\n"))
            .expect("append bytes");
        append_raw(&path, "a2");

        let state = resume_state(&path).expect("state");
        assert_eq!(state.candidates, 2);
        assert!(state.anchors.contains("a1") && state.anchors.contains("a2"));
    }

    #[test]
    fn fresh_file_has_no_processed_anchors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("new/doc.jsonl");
        let writer = CandidateWriter::open(&path, ResumeMode::Resume).expect("open");
        assert_eq!(writer.processed_count(), 0);
        assert!(processed_anchors(&dir.path().join("absent.jsonl")).expect("absent").is_empty());
    }
}

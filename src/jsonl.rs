//! JSON Lines helpers shared by both pipeline stages.
//!
//! Reading is tolerant: malformed lines are skipped and counted. The first few per file are
//! logged individually and the rest are summarised once, so a corrupt file cannot flood the
//! log. Writing is append-only with a flush after every record.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Malformed lines logged individually per file before switching to a summary.
pub const MAX_PARSE_WARNINGS: usize = 5;

/// Records parsed from one JSON Lines file.
#[derive(Debug)]
pub struct JsonlRead<T> {
    /// Successfully decoded records in file order.
    pub records: Vec<T>,
    /// Non-empty lines that failed to decode.
    pub malformed: usize,
}

/// Read every decodable record from `path`, skipping blank and malformed lines.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> io::Result<JsonlRead<T>> {
    let numbered = read_jsonl_numbered(path)?;
    Ok(JsonlRead {
        records: numbered.records.into_iter().map(|(_, record)| record).collect(),
        malformed: numbered.malformed,
    })
}

/// Like [`read_jsonl`], pairing each record with its 1-based line number.
pub fn read_jsonl_numbered<T: DeserializeOwned>(path: &Path) -> io::Result<JsonlRead<(usize, T)>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut malformed = 0usize;
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        let decoded = std::str::from_utf8(&buf)
            .map_err(|error| error.to_string())
            .and_then(|text| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                serde_json::from_str::<T>(trimmed)
                    .map(Some)
                    .map_err(|error| error.to_string())
            });
        match decoded {
            Ok(Some(record)) => records.push((line_no, record)),
            Ok(None) => {}
            Err(error) => {
                malformed += 1;
                if malformed <= MAX_PARSE_WARNINGS {
                    tracing::warn!(
                        file = %path.display(),
                        line = line_no,
                        error = %error,
                        "Skipping malformed JSON line"
                    );
                }
            }
        }
    }

    if malformed > MAX_PARSE_WARNINGS {
        tracing::warn!(
            file = %path.display(),
            suppressed = malformed - MAX_PARSE_WARNINGS,
            total = malformed,
            "Further malformed lines suppressed"
        );
    }

    Ok(JsonlRead { records, malformed })
}

/// Append-only JSON Lines writer that flushes after every record.
pub struct JsonlWriter {
    path: PathBuf,
    inner: BufWriter<File>,
}

impl JsonlWriter {
    /// Open `path` for appending, creating parent directories and the file as needed.
    pub fn append(path: &Path) -> io::Result<Self> {
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: BufWriter::new(file),
        })
    }

    /// Open `path` truncating any existing content.
    pub fn create(path: &Path) -> io::Result<Self> {
        ensure_parent(path)?;
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: BufWriter::new(file),
        })
    }

    /// Serialize one record as a single line and flush it to disk.
    pub fn write_record<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.inner, record).map_err(io::Error::other)?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()
    }

    /// Path this writer appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes on disk after the last flush.
    pub fn flushed_len(&self) -> io::Result<u64> {
        Ok(self.inner.get_ref().metadata()?.len())
    }
}

/// Write `records` to `path` through a temporary sibling that is renamed into place.
///
/// Readers never observe a half-written file.
pub fn write_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> io::Result<()> {
    let tmp = tmp_sibling(path);
    {
        let mut writer = JsonlWriter::create(&tmp)?;
        for record in records {
            writer.write_record(record)?;
        }
    }
    std::fs::rename(&tmp, path)
}

/// Write `value` as pretty JSON through a temporary sibling.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    ensure_parent(path)?;
    let tmp = tmp_sibling(path);
    let body = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)
}

/// Files directly under `dir` whose names end with one of `suffixes`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn list_files(dir: &Path, suffixes: &[&str]) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if suffixes.iter().any(|suffix| name.ends_with(suffix)) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn skips_blank_and_malformed_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"a\":1}\n\nnot json\n{\"a\":2}\n{broken\n").expect("write");

        let read: JsonlRead<Value> = read_jsonl(&path).expect("read");
        assert_eq!(read.records, vec![json!({"a": 1}), json!({"a": 2})]);
        assert_eq!(read.malformed, 2);

        let numbered: JsonlRead<(usize, Value)> = read_jsonl_numbered(&path).expect("read");
        let lines: Vec<usize> = numbered.records.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![1, 4]);
    }

    #[test]
    fn invalid_utf8_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, b"{\"a\":1}\n{\"a\":\"\xff\xfe\"}\n{\"a\":3}\n").expect("write");

        let read: JsonlRead<(usize, Value)> = read_jsonl_numbered(&path).expect("read");
        assert_eq!(read.malformed, 1);
        assert_eq!(read.records, vec![(1, json!({"a": 1})), (3, json!({"a": 3}))]);
    }

    #[test]
    fn appends_across_writer_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/out.jsonl");
        JsonlWriter::append(&path)
            .expect("open")
            .write_record(&json!({"n": 1}))
            .expect("write");
        JsonlWriter::append(&path)
            .expect("reopen")
            .write_record(&json!({"n": 2}))
            .expect("write");

        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content, "{\"n\":1}\n{\"n\":2}\n");
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("final.jsonl");
        write_jsonl_atomic(&path, &[json!({"id": "x"})]).expect("write");
        assert!(path.exists());
        assert!(!dir.path().join("final.jsonl.tmp").exists());
    }

    #[test]
    fn lists_matching_files_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.jsonl", "a.jsonl", "c.txt", "d.json"] {
            std::fs::write(dir.path().join(name), "").expect("write");
        }
        let files = list_files(dir.path(), &[".jsonl", ".json"]).expect("list");
        let names: Vec<_> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jsonl", "b.jsonl", "d.json"]);
        assert!(list_files(&dir.path().join("missing"), &[".jsonl"]).expect("missing").is_empty());
    }
}

//! Dataset version tags (`v1`, `v2`, ...).

use super::{DatasetError, DatasetMode};
use crate::jsonl::list_files;
use std::path::Path;

/// Numeric part of `{dataset_name}_v<N>.jsonl`, if `file_name` has that shape.
pub fn parse_version(file_name: &str, dataset_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(dataset_name)?.strip_prefix("_v")?;
    let digits = rest.strip_suffix(".jsonl")?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// `v(N+1)` for the highest existing `{dataset_name}_vN.jsonl` in `final_dir`, else `v1`.
pub fn infer_next_version(final_dir: &Path, dataset_name: &str) -> std::io::Result<String> {
    let highest = list_files(final_dir, &[".jsonl"])?
        .iter()
        .filter_map(|path| path.file_name())
        .filter_map(|name| parse_version(&name.to_string_lossy(), dataset_name))
        .max()
        .unwrap_or(0);
    Ok(format!("v{}", highest + 1))
}

/// Resolve the requested version for `mode`.
///
/// `auto` is only accepted in single mode; explicit tags must look like `vN`.
pub fn resolve_version(
    requested: &str,
    mode: DatasetMode,
    final_dir: &Path,
    dataset_name: &str,
) -> Result<String, DatasetError> {
    let requested = requested.trim();
    if requested.eq_ignore_ascii_case("auto") {
        if mode != DatasetMode::Single {
            return Err(DatasetError::VersionRequired(mode));
        }
        let version = infer_next_version(final_dir, dataset_name).map_err(|source| DatasetError::Io {
            path: final_dir.to_path_buf(),
            source,
        })?;
        tracing::info!(version = %version, "Inferred next dataset version");
        return Ok(version);
    }
    let valid = requested
        .strip_prefix('v')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()));
    if !valid {
        return Err(DatasetError::InvalidVersion(requested.to_string()));
    }
    Ok(requested.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_dataset_files() {
        assert_eq!(parse_version("qa_final_v12.jsonl", "qa_final"), Some(12));
        assert_eq!(parse_version("qa_final_v.jsonl", "qa_final"), None);
        assert_eq!(parse_version("qa_rejects_v3.jsonl", "qa_final"), None);
        assert_eq!(parse_version("qa_final_v3.shard-0000-of-0002.jsonl", "qa_final"), None);
    }

    #[test]
    fn infers_next_version_from_highest() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(infer_next_version(dir.path(), "qa_final").expect("infer"), "v1");
        for name in ["qa_final_v1.jsonl", "qa_final_v10.jsonl", "qa_final_v2.jsonl", "other_v99.jsonl"] {
            std::fs::write(dir.path().join(name), "").expect("write");
        }
        assert_eq!(infer_next_version(dir.path(), "qa_final").expect("infer"), "v11");
    }

    #[test]
    fn sharded_modes_need_explicit_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = resolve_version("auto", DatasetMode::Map, dir.path(), "qa_final").expect_err("required");
        assert!(matches!(error, DatasetError::VersionRequired(DatasetMode::Map)));
        assert!(resolve_version("auto", DatasetMode::Reduce, dir.path(), "qa_final").is_err());
        assert_eq!(
            resolve_version("v4", DatasetMode::Reduce, dir.path(), "qa_final").expect("explicit"),
            "v4"
        );
        assert_eq!(
            resolve_version("auto", DatasetMode::Single, dir.path(), "qa_final").expect("auto"),
            "v1"
        );
        assert!(matches!(
            resolve_version("latest", DatasetMode::Single, dir.path(), "qa_final"),
            Err(DatasetError::InvalidVersion(_))
        ));
    }
}

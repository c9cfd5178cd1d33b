//! Atomic on-disk document primitives
//!
//! Every persistent document in the control plane (session table,
//! rollback history, secrets) goes through these helpers: write to a
//! sibling temporary file, flush, then rename over the target so a
//! reader never observes a half-written document. Secret-bearing files
//! are created owner-read/write only.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{HubError, HubResult};

fn write_atomic_bytes(path: &Path, data: &[u8], mode: Option<u32>) -> HubResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| HubError::internal(format!("no parent directory: {}", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| HubError::io(format!("creating {}", parent.display()), e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HubError::internal(format!("invalid file name: {}", path.display())))?;
    let tmp_path = parent.join(format!(".{file_name}.tmp"));

    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let mut f = options
            .open(&tmp_path)
            .map_err(|e| HubError::io(format!("creating {}", tmp_path.display()), e))?;
        f.write_all(data)
            .map_err(|e| HubError::io(format!("writing {}", tmp_path.display()), e))?;
        f.sync_all()
            .map_err(|e| HubError::io(format!("syncing {}", tmp_path.display()), e))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| HubError::io(format!("renaming into {}", path.display()), e))?;
    Ok(())
}

/// Atomically replace `path` with the JSON serialization of `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> HubResult<()> {
    let data = serde_json::to_vec(value)
        .map_err(|e| HubError::serialization(path.display().to_string(), e))?;
    write_atomic_bytes(path, &data, None)
}

/// Atomic JSON write with owner-only (0600) permissions, for documents
/// carrying credentials.
pub fn write_json_restricted<T: Serialize>(path: &Path, value: &T) -> HubResult<()> {
    let data = serde_json::to_vec(value)
        .map_err(|e| HubError::serialization(path.display().to_string(), e))?;
    write_atomic_bytes(path, &data, Some(0o600))
}

/// Atomic plain-text write with owner-only permissions.
pub fn write_text_restricted(path: &Path, text: &str) -> HubResult<()> {
    write_atomic_bytes(path, text.as_bytes(), Some(0o600))
}

/// Read and validate a JSON document. Malformed content is an error,
/// never a silent default.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> HubResult<T> {
    let data = fs::read_to_string(path)
        .map_err(|e| HubError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&data)
        .map_err(|e| HubError::serialization(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Doc {
        version: u32,
        entries: BTreeMap<String, i64>,
    }

    #[test]
    fn round_trips_a_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let mut entries = BTreeMap::new();
        entries.insert("a".into(), 1);
        let doc = Doc { version: 1, entries };

        write_json_atomic(&path, &doc).unwrap();
        let loaded: Doc = read_json(&path).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn leaves_no_temporary_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &serde_json::json!({"k": "v"})).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["doc.json"]);
    }

    #[test]
    fn rejects_malformed_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();
        let result: HubResult<Doc> = read_json(&path);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn restricted_write_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        write_json_restricted(&path, &serde_json::json!({"k": "v"})).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

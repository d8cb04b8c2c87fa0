//! JSON file storage -- detector state, quarantine lists, batch manifests.
//!
//! Every file is written whole: serialize, write and fsync a sibling temp
//! file, rename over the target.

pub mod manifest;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use self::manifest::ManifestStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid manifest search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Read and decode a JSON file. A missing file is `Ok(None)`; anything that
/// exists but does not parse is [`StorageError::Corrupt`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let body = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = temp_path(path);
    // Contents must be on disk before the rename makes them visible.
    write_synced(&tmp, &body).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        io_err(source)
    })?;
    Ok(())
}

fn write_synced(tmp: &Path, body: &[u8]) -> std::io::Result<()> {
    let written = std::fs::File::create(tmp).and_then(|mut file| {
        file.write_all(body)?;
        file.sync_all()
    });
    if written.is_err() && tmp.is_file() {
        let _ = std::fs::remove_file(tmp);
    }
    written
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let got: Option<BTreeMap<String, u32>> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_malformed_file_is_corrupt() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<BTreeMap<String, u32>>(&path).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_write_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        write_json_atomic(&path, &value).unwrap();

        let back: BTreeMap<String, u32> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, value);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_whole_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let long: BTreeMap<String, u32> = (0..50).map(|i| (format!("scenario-{i}"), i)).collect();
        write_json_atomic(&path, &long).unwrap();

        let short: BTreeMap<String, u32> = [("only".to_string(), 7)].into_iter().collect();
        write_json_atomic(&path, &short).unwrap();

        let back: BTreeMap<String, u32> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, short);
    }

    #[test]
    fn test_failed_temp_write_keeps_previous_contents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let original: BTreeMap<String, u32> = [("a".to_string(), 1)].into_iter().collect();
        write_json_atomic(&path, &original).unwrap();

        // A directory where the temp file should go makes the write fail.
        std::fs::create_dir(temp_path(&path)).unwrap();
        let replacement: BTreeMap<String, u32> = [("b".to_string(), 2)].into_iter().collect();
        let err = write_json_atomic(&path, &replacement).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));

        let back: BTreeMap<String, u32> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, original);
        assert!(temp_path(&path).is_dir());
    }
}

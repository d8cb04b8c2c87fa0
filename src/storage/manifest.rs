//! Batch manifests: `<root>/<YYYY-MM-DD>/batch-<id>/manifest.json`.

use super::{read_json, write_json_atomic, StorageError};
use crate::scheduler::result::BatchResult;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::warn;

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a batch's manifest and per-scenario artifacts.
    pub fn batch_dir(&self, date: NaiveDate, batch_id: &str) -> PathBuf {
        self.root
            .join(date.format("%Y-%m-%d").to_string())
            .join(format!("batch-{batch_id}"))
    }

    pub fn write(&self, result: &BatchResult) -> Result<PathBuf, StorageError> {
        let path = self
            .batch_dir(result.started_at.date_naive(), &result.id)
            .join(MANIFEST_FILE);
        write_json_atomic(&path, result)?;
        Ok(path)
    }

    /// Load a manifest by batch id from any date directory.
    pub fn load(&self, batch_id: &str) -> Result<Option<BatchResult>, StorageError> {
        let pattern = format!(
            "{}/*/batch-{}/{MANIFEST_FILE}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob::Pattern::escape(batch_id)
        );
        let Some(path) = glob::glob(&pattern)?.filter_map(Result::ok).max() else {
            return Ok(None);
        };
        let mut result: Option<BatchResult> = read_json(&path)?;
        if let Some(r) = result.as_mut() {
            r.manifest_path = Some(path);
        }
        Ok(result)
    }

    /// Most recent manifests first. Unreadable manifests are skipped.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<BatchResult>, StorageError> {
        let pattern = format!(
            "{}/*/batch-*/{MANIFEST_FILE}",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let paths: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(Result::ok).collect();

        let mut results = Vec::new();
        for path in paths {
            match read_json::<BatchResult>(&path) {
                Ok(Some(mut r)) => {
                    r.manifest_path = Some(path);
                    results.push(r);
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable manifest"),
            }
        }
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        results.truncate(limit);
        Ok(results)
    }
}

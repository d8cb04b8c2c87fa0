//! Hand-maintained quarantine list, kept alongside the detector's own entries.
//!
//! The file is a JSON array of `{scenario, note, added_at}`. It has its own
//! lock and is consulted by the batch scheduler in addition to the detector.

use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::info;

/// Answers "is this scenario quarantined, and why?".
pub trait QuarantineLookup: Send + Sync {
    /// Display note for a quarantined scenario, `None` when it may run.
    fn quarantine_note(&self, scenario: &str) -> Option<String>;

    fn is_quarantined(&self, scenario: &str) -> bool {
        self.quarantine_note(scenario).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedScenario {
    pub scenario: String,
    pub note: String,
    pub added_at: DateTime<Utc>,
}

pub struct QuarantineList {
    path: Option<PathBuf>,
    entries: RwLock<Vec<ListedScenario>>,
}

impl QuarantineList {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries: Vec<ListedScenario> = storage::read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    /// Add or replace the note for `scenario`.
    pub fn add(&self, scenario: &str, note: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.scenario != scenario);
        entries.push(ListedScenario {
            scenario: scenario.to_string(),
            note: note.to_string(),
            added_at: Utc::now(),
        });
        info!(%scenario, "added to quarantine list");
        self.save(&entries)
    }

    pub fn remove(&self, scenario: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.scenario != scenario);
        if entries.len() == before {
            return Ok(false);
        }
        info!(%scenario, "removed from quarantine list");
        self.save(&entries)?;
        Ok(true)
    }

    pub fn list(&self) -> Vec<ListedScenario> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save(&self, entries: &[ListedScenario]) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => storage::write_json_atomic(path, entries),
            None => Ok(()),
        }
    }
}

impl QuarantineLookup for QuarantineList {
    fn quarantine_note(&self, scenario: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.scenario == scenario)
            .map(|e| e.note.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_replaces_existing_note() {
        let list = QuarantineList::in_memory();
        list.add("checkout", "first").unwrap();
        list.add("checkout", "second").unwrap();
        assert_eq!(list.list().len(), 1);
        assert_eq!(list.quarantine_note("checkout").as_deref(), Some("second"));
    }

    #[test]
    fn test_remove_reports_presence() {
        let list = QuarantineList::in_memory();
        assert!(!list.remove("x").unwrap());
        list.add("x", "n").unwrap();
        assert!(list.remove("x").unwrap());
        assert!(!list.is_quarantined("x"));
    }

    #[test]
    fn test_persists_between_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quarantine.json");
        QuarantineList::open(&path).unwrap().add("login", "vendor outage").unwrap();
        let list = QuarantineList::open(&path).unwrap();
        assert_eq!(list.quarantine_note("login").as_deref(), Some("vendor outage"));
    }
}

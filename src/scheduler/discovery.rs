//! Scenario discovery and tag filtering.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A discovered scenario definition. Only `tags` is read from the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub path: PathBuf,
    pub tags: Vec<String>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Deserialize)]
struct ScenarioHeader {
    #[serde(default)]
    tags: Vec<String>,
}

/// Find scenario files matching `pattern`, sorted by path. Scenario names
/// are file stems; when several files share a stem only the first is kept.
///
/// A directory expands to its `*.yaml` and `*.yml` children. Anything that is
/// not a `.yaml`/`.yml` file is ignored.
pub fn discover(pattern: &str) -> Result<Vec<Scenario>, glob::PatternError> {
    let patterns = if Path::new(pattern).is_dir() {
        let dir = glob::Pattern::escape(pattern.trim_end_matches('/'));
        vec![format!("{dir}/*.yaml"), format!("{dir}/*.yml")]
    } else {
        vec![pattern.to_string()]
    };

    let mut paths = Vec::new();
    for p in &patterns {
        for entry in glob::glob(p)? {
            match entry {
                Ok(path) if path.is_file() && is_scenario_file(&path) => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping unreadable path during discovery"),
            }
        }
    }
    paths.sort();
    paths.dedup();

    // Names are unique per batch; the first path per name wins.
    let mut seen = HashSet::new();
    let mut scenarios = Vec::with_capacity(paths.len());
    for scenario in paths.into_iter().filter_map(load_scenario) {
        if seen.insert(scenario.name.clone()) {
            scenarios.push(scenario);
        } else {
            warn!(
                scenario = %scenario.name,
                path = %scenario.path.display(),
                "duplicate scenario name, skipping file"
            );
        }
    }
    debug!(%pattern, count = scenarios.len(), "discovered scenarios");
    Ok(scenarios)
}

fn is_scenario_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn load_scenario(path: PathBuf) -> Option<Scenario> {
    let name = path.file_stem()?.to_string_lossy().into_owned();
    let tags = match std::fs::read_to_string(&path) {
        Ok(content) => read_tags(&content).unwrap_or_else(|e| {
            warn!(scenario = %name, error = %e, "could not read scenario tags");
            Vec::new()
        }),
        Err(e) => {
            warn!(scenario = %name, error = %e, "could not read scenario file");
            Vec::new()
        }
    };
    Some(Scenario { name, path, tags })
}

fn read_tags(content: &str) -> Result<Vec<String>, serde_yaml_ng::Error> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let header: ScenarioHeader = serde_yaml_ng::from_str(content)?;
    Ok(header.tags)
}

/// `(filter empty OR any tag in filter) AND (exclude empty OR no tag in exclude)`,
/// compared case-insensitively.
pub fn matches_tags(scenario: &Scenario, filter: &[String], exclude: &[String]) -> bool {
    let has_any = |wanted: &[String]| {
        scenario
            .tags
            .iter()
            .any(|t| wanted.iter().any(|w| w.eq_ignore_ascii_case(t)))
    };
    (filter.is_empty() || has_any(filter)) && (exclude.is_empty() || !has_any(exclude))
}

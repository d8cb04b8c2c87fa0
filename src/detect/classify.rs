//! Infrastructure-error classification.
//!
//! Deciding whether an `error` came from the harness (browser crash, network
//! flap, timeout) or from the scenario itself is inherently approximate. The
//! scheduler takes any [`InfraErrorPredicate`]; [`MarkerClassifier`] is the
//! default substring matcher.

/// Markers matched case-insensitively against error text.
pub const DEFAULT_INFRA_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "browser crash",
    "network error",
    "playwright",
    "chromium",
    "connection refused",
    "econnreset",
];

/// Decides whether an error message points at infrastructure rather than the scenario.
pub trait InfraErrorPredicate: Send + Sync {
    fn is_infra_error(&self, error_text: &str) -> bool;
}

impl<F> InfraErrorPredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_infra_error(&self, error_text: &str) -> bool {
        self(error_text)
    }
}

/// Case-insensitive substring matcher over a list of markers.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    markers: Vec<String>,
}

impl MarkerClassifier {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// Defaults plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classifier = Self::default();
        for marker in extra {
            let marker = marker.as_ref().trim().to_lowercase();
            if !marker.is_empty() && !classifier.markers.contains(&marker) {
                classifier.markers.push(marker);
            }
        }
        classifier
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// First marker found in `error_text`, if any.
    pub fn matched_marker(&self, error_text: &str) -> Option<&str> {
        let lower = error_text.to_lowercase();
        self.markers
            .iter()
            .find(|m| lower.contains(m.as_str()))
            .map(String::as_str)
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_INFRA_MARKERS)
    }
}

impl InfraErrorPredicate for MarkerClassifier {
    fn is_infra_error(&self, error_text: &str) -> bool {
        self.matched_marker(error_text).is_some()
    }
}

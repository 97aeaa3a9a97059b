//! Tool-call marker detection.
//!
//! Markers are tested against the whole accumulated response text, so a tag
//! split across several deltas is still found.

use once_cell::sync::Lazy;
use pipeline_core::{PipelineError, PipelineResult};
use regex::{Regex, RegexBuilder};

/// Literal markers that signal a prompt-mode tool call
pub const DEFAULT_MARKERS: [&str; 2] = ["<tool_use>", "<tool_call>"];

static DEFAULT_CLASSIFIER: Lazy<MarkerClassifier> = Lazy::new(|| {
    MarkerClassifier::new(DEFAULT_MARKERS).expect("default tool markers are valid patterns")
});

/// Case-insensitive literal marker matcher
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    patterns: Vec<(String, Regex)>,
}

impl MarkerClassifier {
    /// Build a classifier from literal markers
    pub fn new<I, S>(markers: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = markers
            .into_iter()
            .map(|marker| {
                let marker = marker.as_ref();
                RegexBuilder::new(&regex::escape(marker))
                    .case_insensitive(true)
                    .build()
                    .map(|regex| (marker.to_string(), regex))
                    .map_err(|e| {
                        PipelineError::Configuration(format!("invalid tool marker '{marker}': {e}"))
                    })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Default markers plus `extra`
    pub fn with_extra_markers<I, S>(extra: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut markers: Vec<String> = DEFAULT_MARKERS.iter().map(ToString::to_string).collect();
        for marker in extra {
            let marker = marker.as_ref();
            if !marker.is_empty() && !markers.iter().any(|m| m.eq_ignore_ascii_case(marker)) {
                markers.push(marker.to_string());
            }
        }
        Self::new(markers)
    }

    /// Whether any marker occurs in `text`
    #[must_use]
    pub fn contains_tool_markers(&self, text: &str) -> bool {
        self.matched_marker(text).is_some()
    }

    /// First configured marker that occurs in `text`
    #[must_use]
    pub fn matched_marker(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(marker, _)| marker.as_str())
    }

    /// Configured markers
    pub fn markers(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(marker, _)| marker.as_str())
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

/// Check `text` against the default markers
#[must_use]
pub fn contains_tool_markers(text: &str) -> bool {
    DEFAULT_CLASSIFIER.contains_tool_markers(text)
}

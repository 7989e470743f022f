use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    classifier::DEFAULT_CLASSIFIER,
    error::{Result, StatError},
    tokenizer::DEFAULT_TOKENIZER,
};

/// Substituted for `%r` or `%f` when the learn request carries no value
const MISSING_ADDRESS: &str = "default";

/// Statistics configuration: the statfiles operators may train, and the
/// metrics that decide which classifier trains them.
///
/// # Examples
///
/// ```ron
/// stat: (
///     statfiles: {
///         "spam": (
///             pattern: "/var/lib/sift/%r.spam",
///             size: 1048576,
///             metric: Some("default"),
///         ),
///     },
///     metrics: {
///         "default": (classifier: "winnow"),
///     },
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatConfig {
    #[serde(default)]
    pub statfiles: HashMap<String, StatfileConfig>,
    #[serde(default)]
    pub metrics: HashMap<String, MetricConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatfileConfig {
    /// Path of the statfile on disk; `%r` expands to the recipient, `%f` to the sender
    pub pattern: String,
    /// Size of the statfile in bytes, used when it has to be created
    pub size: u64,
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
    #[serde(default)]
    pub metric: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    #[serde(default = "default_classifier")]
    pub classifier: String,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            classifier: default_classifier(),
        }
    }
}

fn default_tokenizer() -> String {
    DEFAULT_TOKENIZER.to_string()
}

fn default_classifier() -> String {
    DEFAULT_CLASSIFIER.to_string()
}

impl StatConfig {
    pub fn statfile(&self, name: &str) -> Option<&StatfileConfig> {
        self.statfiles.get(name)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricConfig> {
        self.metrics.get(name)
    }

    /// Name of the classifier that trains `statfile`
    ///
    /// Statfiles without a metric, or whose metric is not configured, use the
    /// default classifier.
    pub fn classifier_for(&self, statfile: &StatfileConfig) -> &str {
        statfile
            .metric
            .as_deref()
            .and_then(|metric| self.metric(metric))
            .map_or(DEFAULT_CLASSIFIER, |metric| metric.classifier.as_str())
    }
}

impl StatfileConfig {
    ///
    /// Expand this statfile's pattern for a recipient and sender
    ///
    /// # Errors
    /// If either address contains a path separator, or the expanded path
    /// would escape its directory through a `..` component
    ///
    pub fn resolve(&self, recipient: Option<&str>, from: Option<&str>) -> Result<PathBuf> {
        let recipient = recipient.unwrap_or(MISSING_ADDRESS);
        let from = from.unwrap_or(MISSING_ADDRESS);

        let expanded = self.pattern.replace("%r", recipient).replace("%f", from);

        if recipient.contains('/') || from.contains('/') {
            return Err(StatError::InvalidPath(expanded));
        }

        let path = PathBuf::from(expanded);
        validate_path(&path)?;

        Ok(path)
    }
}

fn validate_path(path: &Path) -> Result<()> {
    if path
        .components()
        .any(|component| component == Component::ParentDir)
    {
        return Err(StatError::InvalidPath(path.display().to_string()));
    }

    Ok(())
}

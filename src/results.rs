//! Per-rule results, kept in dispatch order and persisted as a JSON array.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Output of one rule. `succeeded` is false when every invocation variant
/// failed and `output` holds the failure message instead of agent text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    #[serde(rename = "rule")]
    pub label: String,
    pub output: String,
    #[serde(default = "default_succeeded")]
    pub succeeded: bool,
}

fn default_succeeded() -> bool {
    true
}

impl RuleResult {
    pub fn new(label: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            output: output.into(),
            succeeded: true,
        }
    }

    pub fn failed(label: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            ..Self::new(label, output)
        }
    }
}

/// Ordered collection of rule results. Insertion order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    results: Vec<RuleResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: RuleResult) {
        self.results.push(result);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.label.as_str()).collect()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded).count()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.results)
            .map_err(|e| Error::Results(format!("failed to serialize results: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let results: Vec<RuleResult> = serde_json::from_str(json)
            .map_err(|e| Error::Results(format!("failed to parse results: {e}")))?;
        Ok(Self { results })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        debug!(path = %path.display(), count = self.len(), "saved results");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            Error::Results(format!("failed to read results {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

impl FromIterator<RuleResult> for ResultSet {
    fn from_iter<I: IntoIterator<Item = RuleResult>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a RuleResult;
    type IntoIter = std::slice::Iter<'a, RuleResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

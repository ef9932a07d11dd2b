//! Stage output and recorded stage results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::StageName;

/// How a stage ended. Fatal failures are errors, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// The stage did its work.
    Completed,
    /// The stage deliberately did nothing.
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// What a stage hands back to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Status.
    pub status: StageStatus,
    /// Identifiers and counts the stage resolved.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Value>,
    /// Why the stage was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StageOutput {
    /// A completed output with no data.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            status: StageStatus::Completed,
            data: HashMap::new(),
            skip_reason: None,
        }
    }

    /// A skipped output.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            data: HashMap::new(),
            skip_reason: Some(reason.into()),
        }
    }

    /// Adds a data entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Looks up a string data entry.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// A stage run as recorded by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage tag.
    pub name: StageName,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
    /// The stage's output.
    #[serde(flatten)]
    pub output: StageOutput,
}

impl StageResult {
    /// Records an output that ends now.
    #[must_use]
    pub fn record(name: StageName, started_at: DateTime<Utc>, output: StageOutput) -> Self {
        Self {
            name,
            started_at,
            ended_at: Utc::now(),
            output,
        }
    }

    /// Duration in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_ms(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64
    }

    /// Returns true if the stage completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.output.status == StageStatus::Completed
    }

    /// Returns true if the stage was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.output.status == StageStatus::Skipped
    }
}

//! Per-step teardown outcomes and the final report.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use crate::core::TeardownTarget;
use crate::errors::{ControlPlaneResult, DeployError};
use crate::stages::{ComponentStatus, StatusReport};

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The resource was deleted.
    Deleted,
    /// Nothing to delete.
    NotFound,
    /// Deletion failed; teardown continued.
    Failed(String),
    /// Deliberately left alone.
    Skipped(String),
}

impl StepOutcome {
    /// Classifies a control-plane deletion result.
    #[must_use]
    pub fn from_result(result: ControlPlaneResult<()>) -> Self {
        match result {
            Ok(()) => Self::Deleted,
            Err(e) if e.is_not_found() => Self::NotFound,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    /// Classifies a result that may carry any deployment error.
    #[must_use]
    pub fn from_deploy(result: Result<(), DeployError>) -> Self {
        match result {
            Ok(()) => Self::Deleted,
            Err(DeployError::ControlPlane(e)) if e.is_not_found() => Self::NotFound,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    /// Returns true for `Failed`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Short label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::NotFound => "not found",
            Self::Failed(_) => "FAILED",
            Self::Skipped(_) => "skipped",
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) | Self::Skipped(reason) => write!(f, "{}: {reason}", self.label()),
            _ => f.write_str(self.label()),
        }
    }
}

/// One resource and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownStep {
    /// Resource label, e.g. `bucket ofac-rag-deploy-...`.
    pub resource: String,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Everything a teardown did, plus what is still there afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Target that ran.
    pub target: TeardownTarget,
    /// Steps in execution order.
    pub steps: Vec<TeardownStep>,
    /// Verification pass over the target's components.
    pub verification: StatusReport,
}

impl TeardownReport {
    /// An empty report.
    #[must_use]
    pub fn new(target: TeardownTarget) -> Self {
        Self {
            target,
            steps: Vec::new(),
            verification: StatusReport::default(),
        }
    }

    /// Records and logs one step.
    pub fn record(&mut self, resource: impl Into<String>, outcome: StepOutcome) {
        let resource = resource.into();
        match &outcome {
            StepOutcome::Failed(reason) => {
                tracing::warn!(resource = %resource, reason = %reason, "deletion failed, continuing");
            }
            StepOutcome::Skipped(reason) => {
                tracing::info!(resource = %resource, reason = %reason, "skipped");
            }
            other => tracing::info!(resource = %resource, outcome = %other, "teardown step"),
        }
        self.steps.push(TeardownStep { resource, outcome });
    }

    /// Records a failure that ends the teardown.
    pub fn record_fatal(&mut self, resource: impl Into<String>, reason: impl Into<String>) {
        let resource = resource.into();
        let reason = reason.into();
        tracing::error!(resource = %resource, reason = %reason, "deletion failed, aborting teardown");
        self.steps.push(TeardownStep {
            resource,
            outcome: StepOutcome::Failed(reason),
        });
    }

    /// Outcome of a resource, if it was visited.
    #[must_use]
    pub fn outcome_of(&self, resource: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.resource == resource)
            .map(|s| &s.outcome)
    }

    /// Steps that failed.
    #[must_use]
    pub fn failures(&self) -> Vec<&TeardownStep> {
        self.steps.iter().filter(|s| s.outcome.is_failure()).collect()
    }

    /// Components still present after teardown.
    #[must_use]
    pub fn residue(&self) -> Vec<&ComponentStatus> {
        self.verification
            .components
            .iter()
            .filter(|c| c.present)
            .collect()
    }

    /// Components whose verification lookup failed; they may still exist.
    #[must_use]
    pub fn unverified(&self) -> Vec<&ComponentStatus> {
        self.verification
            .components
            .iter()
            .filter(|c| c.is_unverified())
            .collect()
    }

    /// Returns true if nothing failed, nothing remains and every component
    /// was verified.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures().is_empty() && self.residue().is_empty() && self.unverified().is_empty()
    }

    /// Plain-text rendering for terminals.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("Teardown '{}'\n", self.target);
        for step in &self.steps {
            let _ = writeln!(out, "  {:<60} {}", step.resource, step.outcome);
        }
        out.push_str("\nVerification\n");
        out.push_str(&self.verification.render_table());
        let residue = self.residue();
        let unverified = self.unverified();
        if !residue.is_empty() {
            let names: Vec<_> = residue.iter().map(|c| c.component.as_str()).collect();
            let _ = writeln!(out, "\nStill present: {}", names.join(", "));
        }
        if !unverified.is_empty() {
            let names: Vec<_> = unverified.iter().map(|c| c.component.as_str()).collect();
            let _ = writeln!(out, "\nCould not verify: {}", names.join(", "));
        }
        if residue.is_empty() && unverified.is_empty() {
            out.push_str("\nNo residual resources.\n");
        }
        out
    }

    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("target".to_string(), json!(self.target));
        map.insert("steps".to_string(), json!(self.steps));
        map.insert("failures".to_string(), json!(self.failures().len()));
        map.insert(
            "residue".to_string(),
            json!(self
                .residue()
                .iter()
                .map(|c| c.component)
                .collect::<Vec<_>>()),
        );
        map.insert(
            "unverified".to_string(),
            json!(self
                .unverified()
                .iter()
                .map(|c| c.component)
                .collect::<Vec<_>>()),
        );
        map.insert("clean".to_string(), json!(self.is_clean()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ControlPlaneError;
    use crate::stages::Component;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(StepOutcome::from_result(Ok(())), StepOutcome::Deleted);
        assert_eq!(
            StepOutcome::from_result(Err(ControlPlaneError::not_found("s3api", "delete-bucket"))),
            StepOutcome::NotFound
        );
        let failed = StepOutcome::from_result(Err(ControlPlaneError::command(
            "s3api",
            "delete-bucket",
            "BucketNotEmpty",
        )));
        assert!(failed.is_failure());
        assert!(failed.to_string().contains("BucketNotEmpty"));
    }

    #[test]
    fn test_deploy_error_not_found_is_not_failure() {
        let outcome = StepOutcome::from_deploy(Err(
            ControlPlaneError::not_found("iam", "delete-role").into()
        ));
        assert_eq!(outcome, StepOutcome::NotFound);
    }

    #[test]
    fn test_report_tracks_failures_and_residue() {
        let mut report = TeardownReport::new(TeardownTarget::Data);
        report.record("bucket a", StepOutcome::Deleted);
        report.record("bucket b", StepOutcome::Failed("AccessDenied".to_string()));
        report.verification = StatusReport {
            components: vec![ComponentStatus {
                component: Component::CorpusBucket,
                present: true,
                state: "EXISTS".to_string(),
                detail: Some("b".to_string()),
            }],
        };

        assert_eq!(report.outcome_of("bucket a"), Some(&StepOutcome::Deleted));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.residue().len(), 1);
        assert!(!report.is_clean());
        assert!(report.render().contains("Still present: corpus-bucket"));
        assert_eq!(report.to_dict()["failures"], json!(1));
    }

    #[test]
    fn test_lookup_error_is_not_clean() {
        let mut report = TeardownReport::new(TeardownTarget::Data);
        report.record("bucket a", StepOutcome::Deleted);
        report.verification = StatusReport {
            components: vec![ComponentStatus {
                component: Component::SourceBucket,
                present: false,
                state: "ERROR".to_string(),
                detail: Some("AccessDenied".to_string()),
            }],
        };

        assert!(report.residue().is_empty());
        assert_eq!(report.unverified().len(), 1);
        assert!(!report.is_clean());
        let text = report.render();
        assert!(text.contains("Could not verify: source-bucket"), "{text}");
        assert!(!text.contains("No residual resources."), "{text}");
        assert_eq!(report.to_dict()["unverified"], json!(["source-bucket"]));
    }

    #[test]
    fn test_fatal_step_recorded_as_failure() {
        let mut report = TeardownReport::new(TeardownTarget::Embedding);
        report.record_fatal("stack ofac-rag", "stack ofac-rag reached terminal state DELETE_FAILED");

        assert_eq!(report.failures().len(), 1);
        assert!(matches!(
            report.outcome_of("stack ofac-rag"),
            Some(StepOutcome::Failed(reason)) if reason.contains("DELETE_FAILED")
        ));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_step_serializes_tagged() {
        let step = TeardownStep {
            resource: "role r".to_string(),
            outcome: StepOutcome::Skipped("kept".to_string()),
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value, json!({"resource": "role r", "outcome": "skipped", "reason": "kept"}));
    }
}

//! Error types for ragstack.
//!
//! The taxonomy follows how a deployment can go wrong against an eventually
//! consistent control plane:
//!
//! - a prerequisite (tool, credential, input directory) is missing
//! - a control-plane query or mutation failed
//! - a resource could not be created
//! - the control plane itself reported a terminal failure state
//! - a bounded wait ran out of attempts
//!
//! Stage functions propagate the first fatal error; the pipeline wraps it in
//! a [`StageFailure`] that names the stage and the region/profile/stack it
//! ran against.

use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Result alias for raw control-plane calls.
pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;

/// Failure of a single control-plane call.
#[derive(Debug, Clone, Error)]
pub enum ControlPlaneError {
    /// The addressed resource does not exist.
    #[error("{service} {operation}: resource not found")]
    NotFound {
        /// Service name (e.g. `s3api`).
        service: String,
        /// Operation name (e.g. `head-bucket`).
        operation: String,
    },

    /// The call completed with an error response.
    #[error("{service} {operation} failed: {message}")]
    Command {
        /// Service name.
        service: String,
        /// Operation name.
        operation: String,
        /// Error text returned by the control plane.
        message: String,
    },

    /// The response could not be interpreted.
    #[error("malformed {service} {operation} response: {reason}")]
    Malformed {
        /// Service name.
        service: String,
        /// Operation name.
        operation: String,
        /// What was wrong with the response.
        reason: String,
    },

    /// The client could not be started at all.
    #[error("failed to launch control-plane client: {0}")]
    Spawn(String),
}

impl ControlPlaneError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Creates a command error.
    #[must_use]
    pub fn command(
        service: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Command {
            service: service.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed-response error.
    #[must_use]
    pub fn malformed(
        service: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Malformed {
            service: service.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error means the resource is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// The main error type for deployment and teardown operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A required tool, credential or input is absent.
    #[error("missing prerequisite: {what} ({hint})")]
    MissingPrerequisite {
        /// What is missing.
        what: String,
        /// How to fix it.
        hint: String,
    },

    /// A control-plane call failed.
    #[error("{0}")]
    ControlPlane(#[from] ControlPlaneError),

    /// A resource could not be created.
    #[error("failed to create {resource}: {reason}")]
    Creation {
        /// The resource being created.
        resource: String,
        /// Why creation failed.
        reason: String,
    },

    /// The control plane reported a terminal failure state.
    #[error("{resource} reached terminal state {state}")]
    TerminalState {
        /// The resource.
        resource: String,
        /// The reported state.
        state: String,
    },

    /// A bounded wait ran out of attempts.
    #[error("timed out waiting for {resource} after {attempts} attempts (last state: {last_state})")]
    TimedOut {
        /// The resource.
        resource: String,
        /// Attempts made.
        attempts: usize,
        /// Last observed state.
        last_state: String,
    },

    /// The operator declined a confirmation gate.
    #[error("operator declined: {action}")]
    Declined {
        /// The gated action.
        action: String,
    },

    /// An external data collaborator failed.
    #[error("{name} failed: {reason}")]
    Collaborator {
        /// The collaborator name.
        name: String,
        /// The failure reason.
        reason: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Creates a missing-prerequisite error.
    #[must_use]
    pub fn missing(what: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingPrerequisite {
            what: what.into(),
            hint: hint.into(),
        }
    }

    /// Creates a creation error.
    #[must_use]
    pub fn creation(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::Creation {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a terminal-state error.
    #[must_use]
    pub fn terminal(resource: impl Into<String>, state: impl Into<String>) -> Self {
        Self::TerminalState {
            resource: resource.into(),
            state: state.into(),
        }
    }

    /// Creates a collaborator error.
    #[must_use]
    pub fn collaborator(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Collaborator {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable category name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingPrerequisite { .. } => "missing_prerequisite",
            Self::ControlPlane(_) => "control_plane",
            Self::Creation { .. } => "creation",
            Self::TerminalState { .. } => "terminal_state",
            Self::TimedOut { .. } => "timed_out",
            Self::Declined { .. } => "declined",
            Self::Collaborator { .. } => "collaborator",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), json!(self.kind()));
        map.insert("message".to_string(), json!(self.to_string()));

        match self {
            Self::Creation { resource, .. }
            | Self::TerminalState { resource, .. }
            | Self::TimedOut { resource, .. } => {
                map.insert("resource".to_string(), json!(resource));
            }
            Self::Declined { action } => {
                map.insert("action".to_string(), json!(action));
            }
            _ => {}
        }
        if let Self::TimedOut {
            attempts,
            last_state,
            ..
        } = self
        {
            map.insert("attempts".to_string(), json!(attempts));
            map.insert("last_state".to_string(), json!(last_state));
        }

        map
    }
}

/// A fatal stage error annotated with where it happened.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed (region={region}, profile={profile}, stack={stack}): {source}")]
pub struct StageFailure {
    /// Stage tag.
    pub stage: String,
    /// Region the stage ran against.
    pub region: String,
    /// Credential profile, `default` when ambient credentials are used.
    pub profile: String,
    /// Stack name.
    pub stack: String,
    /// The underlying error.
    #[source]
    pub source: DeployError,
}

impl StageFailure {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = self.source.to_dict();
        map.insert("stage".to_string(), json!(self.stage));
        map.insert("region".to_string(), json!(self.region));
        map.insert("profile".to_string(), json!(self.profile));
        map.insert("stack".to_string(), json!(self.stack));
        map
    }
}

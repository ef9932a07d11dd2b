//! Stage names and the targets an operator can invoke.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error raised for an unrecognized target name.
#[derive(Debug, Clone, Error)]
#[error("unknown target '{given}' (expected one of: {expected})")]
pub struct UnknownTarget {
    /// What the operator typed.
    pub given: String,
    /// Accepted names.
    pub expected: String,
}

/// A single unit of provisioning work, also used as the stage tag in logs
/// and failure annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Deployment bucket, templates, infrastructure stack.
    PrepareInfra,
    /// Source documents and pre-chunked corpus.
    Data,
    /// Ingestion jobs for every knowledge-base data source.
    Embedding,
    /// Tuning data, tuning role, fine-tuning job.
    Model,
    /// Provisioned throughput for the latest custom model.
    Endpoint,
    /// Container image and hosted application service.
    App,
    /// Read-only status aggregation.
    Status,
}

impl StageName {
    /// Stage tag as printed.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrepareInfra => "prepare-infra",
            Self::Data => "data",
            Self::Embedding => "embedding",
            Self::Model => "model",
            Self::Endpoint => "endpoint",
            Self::App => "app",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioning target accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageTarget {
    /// Every stage, in dependency order.
    #[default]
    All,
    /// Source documents and corpus.
    Data,
    /// Infrastructure, corpus and ingestion start.
    Embedding,
    /// Fine-tuning.
    Model,
    /// Provisioned throughput.
    Endpoint,
    /// Hosted application.
    App,
    /// Read-only status.
    Status,
}

impl StageTarget {
    const NAMES: &'static str = "all, data, embedding, model, endpoint, app, status";

    /// The stages this target runs, in order.
    #[must_use]
    pub fn stages(self) -> Vec<StageName> {
        match self {
            Self::All => vec![
                StageName::PrepareInfra,
                StageName::Data,
                StageName::Embedding,
                StageName::Model,
                StageName::Endpoint,
                StageName::App,
                StageName::Status,
            ],
            Self::Data => vec![StageName::Data],
            Self::Embedding => vec![
                StageName::PrepareInfra,
                StageName::Data,
                StageName::Embedding,
            ],
            Self::Model => vec![StageName::Model],
            Self::Endpoint => vec![StageName::Endpoint],
            Self::App => vec![StageName::App],
            Self::Status => vec![StageName::Status],
        }
    }

    /// Returns the target name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Data => "data",
            Self::Embedding => "embedding",
            Self::Model => "model",
            Self::Endpoint => "endpoint",
            Self::App => "app",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for StageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "data" => Ok(Self::Data),
            "embedding" => Ok(Self::Embedding),
            "model" => Ok(Self::Model),
            "endpoint" => Ok(Self::Endpoint),
            "app" => Ok(Self::App),
            "status" => Ok(Self::Status),
            _ => Err(UnknownTarget {
                given: s.to_string(),
                expected: Self::NAMES.to_string(),
            }),
        }
    }
}

/// A teardown target accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownTarget {
    /// Everything; requires confirmation.
    #[default]
    All,
    /// Source and corpus buckets.
    Data,
    /// Stack, knowledge bases, collections, deployment bucket.
    Embedding,
    /// Provisioned throughputs, custom models, tuning bucket and role.
    Model,
    /// Provisioned throughputs only.
    Endpoint,
    /// Hosted service and its build/registry/role resources.
    App,
}

impl TeardownTarget {
    const NAMES: &'static str = "all, data, embedding, model, endpoint, app";

    /// Returns the target name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Data => "data",
            Self::Embedding => "embedding",
            Self::Model => "model",
            Self::Endpoint => "endpoint",
            Self::App => "app",
        }
    }

    /// Whether this target sits behind the interactive confirmation gate.
    #[must_use]
    pub const fn requires_confirmation(self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for TeardownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeardownTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "data" => Ok(Self::Data),
            "embedding" => Ok(Self::Embedding),
            "model" => Ok(Self::Model),
            "endpoint" => Ok(Self::Endpoint),
            "app" => Ok(Self::App),
            _ => Err(UnknownTarget {
                given: s.to_string(),
                expected: Self::NAMES.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_chains_every_stage() {
        let stages = StageTarget::All.stages();
        assert_eq!(stages.first(), Some(&StageName::PrepareInfra));
        assert_eq!(stages.last(), Some(&StageName::Status));
        assert_eq!(stages.len(), 7);
    }

    #[test]
    fn test_embedding_includes_infra_and_data() {
        assert_eq!(
            StageTarget::Embedding.stages(),
            vec![StageName::PrepareInfra, StageName::Data, StageName::Embedding]
        );
    }

    #[test]
    fn test_parse_targets() {
        assert_eq!("MODEL".parse::<StageTarget>().unwrap(), StageTarget::Model);
        assert_eq!(" app ".parse::<TeardownTarget>().unwrap(), TeardownTarget::App);
        assert!("status".parse::<TeardownTarget>().is_err());

        let err = "nope".parse::<StageTarget>().unwrap_err();
        assert!(err.to_string().contains("embedding"));
    }

    #[test]
    fn test_only_teardown_all_is_gated() {
        assert!(TeardownTarget::All.requires_confirmation());
        assert!(!TeardownTarget::Model.requires_confirmation());
    }

    #[test]
    fn test_stage_name_serialize() {
        let json = serde_json::to_string(&StageName::PrepareInfra).unwrap();
        assert_eq!(json, r#""prepare-infra""#);
    }
}

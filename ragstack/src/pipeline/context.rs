//! Everything a stage needs, passed explicitly.

use std::fmt;
use std::sync::Arc;

use super::poll::PollConfig;
use crate::collaborators::{CloudContext, Collaborators};
use crate::config::DeployConfig;
use crate::confirm::{AutoConfirm, Confirmer, StdinConfirmer};
use crate::control::ControlPlane;
use crate::discovery::ResourceGraphWalker;
use crate::errors::{DeployError, StageFailure};

/// Execution context shared by every stage and teardown step.
///
/// The context holds no state of its own beyond configuration and handles;
/// everything else is re-derived from control-plane queries.
#[derive(Clone)]
pub struct DeployContext {
    /// Immutable configuration.
    pub config: Arc<DeployConfig>,
    /// Control-plane services.
    pub cloud: ControlPlane,
    /// External data collaborators.
    pub collaborators: Collaborators,
    /// Confirmation gate for costly or destructive actions.
    pub confirmer: Arc<dyn Confirmer>,
}

impl DeployContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        config: DeployConfig,
        cloud: ControlPlane,
        collaborators: Collaborators,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cloud,
            collaborators,
            confirmer,
        }
    }

    /// Picks the confirmer from configuration: pre-approved, or a terminal
    /// prompt.
    #[must_use]
    pub fn default_confirmer(config: &DeployConfig) -> Arc<dyn Confirmer> {
        if config.auto_approve {
            Arc::new(AutoConfirm(true))
        } else {
            Arc::new(StdinConfirmer::new())
        }
    }

    /// Applies the configured poll interval to an attempt preset.
    #[must_use]
    pub fn poll(&self, preset: PollConfig) -> PollConfig {
        preset.with_interval(self.config.poll_interval())
    }

    /// A graph walker over the stack service.
    #[must_use]
    pub fn walker(&self) -> ResourceGraphWalker<'_> {
        ResourceGraphWalker::new(self.cloud.stacks.as_ref())
    }

    /// Region/credential context for collaborators.
    #[must_use]
    pub fn cloud_context(&self) -> CloudContext {
        CloudContext::of(&self.config)
    }

    /// Annotates an error with the stage tag and deployment coordinates.
    #[must_use]
    pub fn annotate(&self, stage: impl Into<String>, source: DeployError) -> StageFailure {
        StageFailure {
            stage: stage.into(),
            region: self.config.region.clone(),
            profile: self.config.profile_label().to_string(),
            stack: self.config.stack_name.clone(),
            source,
        }
    }
}

impl fmt::Debug for DeployContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployContext")
            .field("region", &self.config.region)
            .field("profile", &self.config.profile_label())
            .field("stack", &self.config.stack_name)
            .finish_non_exhaustive()
    }
}

//! Deployment stages.
//!
//! Each stage is an idempotent unit of work that re-derives what it needs
//! from configuration and control-plane queries, so any stage can be re-run
//! on its own after a partial failure.

mod app;
mod data;
mod embedding;
mod endpoint;
mod files;
pub mod lookup;
mod model;
mod prepare_infra;
mod result;
mod status;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::core::StageName;
use crate::errors::Result;
use crate::pipeline::DeployContext;

pub use app::{AppStage, APP_PORT};
pub use data::DataStage;
pub use embedding::EmbeddingStage;
pub use endpoint::EndpointStage;
pub use model::{tuning_role_spec, ModelStage};
pub use prepare_infra::{is_stack_failed, is_stack_ready, PrepareInfraStage, TemplateRewriter};
pub use result::{StageOutput, StageResult, StageStatus};
pub use status::{Component, ComponentStatus, StatusReport, StatusStage};

/// A unit of provisioning work.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// The stage tag.
    fn name(&self) -> StageName;

    /// Runs the stage. The first fatal error is returned as-is; the
    /// pipeline annotates it.
    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput>;
}

/// The built-in implementation of a stage.
#[must_use]
pub fn stage_for(name: StageName) -> Box<dyn Stage> {
    match name {
        StageName::PrepareInfra => Box::new(PrepareInfraStage),
        StageName::Data => Box::new(DataStage),
        StageName::Embedding => Box::new(EmbeddingStage),
        StageName::Model => Box::new(ModelStage),
        StageName::Endpoint => Box::new(EndpointStage),
        StageName::App => Box::new(AppStage),
        StageName::Status => Box::new(StatusStage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageTarget;

    #[test]
    fn test_stage_for_matches_name() {
        for name in StageTarget::All.stages() {
            assert_eq!(stage_for(name).name(), name);
        }
    }
}

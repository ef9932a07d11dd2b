//! Teardown sequencing.
//!
//! The mirror of the stage pipeline: dependents are removed before what
//! they depend on, individual deletions are best-effort, and a final
//! verification pass reports whatever is left.

mod report;
mod steps;

use crate::core::TeardownTarget;
use crate::errors::{DeployError, StageFailure};
use crate::observability::SpanTimer;
use crate::pipeline::DeployContext;
use crate::stages::lookup::stack_inventory;
use crate::stages::{Component, StatusReport};

pub use report::{StepOutcome, TeardownReport, TeardownStep};

/// Stage tag used when annotating teardown failures.
pub const TEARDOWN_STAGE: &str = "teardown";

/// Components a target is responsible for removing.
#[must_use]
pub fn target_components(target: TeardownTarget) -> Vec<Component> {
    match target {
        TeardownTarget::All => Component::ALL.to_vec(),
        TeardownTarget::Data => vec![Component::SourceBucket, Component::CorpusBucket],
        TeardownTarget::Embedding => vec![
            Component::Stack,
            Component::KnowledgeBases,
            Component::DataSources,
            Component::Collections,
            Component::DeploymentBucket,
        ],
        TeardownTarget::Model => vec![
            Component::ProvisionedThroughput,
            Component::CustomModel,
            Component::TuningBucket,
            Component::TuningRole,
        ],
        TeardownTarget::Endpoint => vec![Component::ProvisionedThroughput],
        TeardownTarget::App => vec![Component::HostedService, Component::Repository],
    }
}

/// Runs the teardown of one target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeardownSequencer {
    target: TeardownTarget,
}

impl TeardownSequencer {
    /// Creates a sequencer for `target`.
    #[must_use]
    pub const fn new(target: TeardownTarget) -> Self {
        Self { target }
    }

    /// Returns the target.
    #[must_use]
    pub const fn target(&self) -> TeardownTarget {
        self.target
    }

    /// Deletes the target's resources, then verifies.
    ///
    /// Only a declined confirmation, an unreadable resource graph or a failed
    /// stack deletion abort the run; every other failure is recorded in the
    /// report.
    pub async fn run(&self, ctx: &DeployContext) -> Result<TeardownReport, StageFailure> {
        let timer = SpanTimer::start(format!("teardown-{}", self.target));
        let annotate = |e: DeployError| ctx.annotate(TEARDOWN_STAGE, e);

        if self.target.requires_confirmation() {
            let action = format!(
                "Delete every resource of stack {} in {} (profile {}). This cannot be undone.",
                ctx.config.stack_name,
                ctx.config.region,
                ctx.config.profile_label()
            );
            if !ctx.confirmer.confirm(&action).await {
                return Err(annotate(DeployError::Declined { action }));
            }
        }

        tracing::info!(
            target_name = %self.target,
            region = %ctx.config.region,
            profile = %ctx.config.profile_label(),
            stack = %ctx.config.stack_name,
            "teardown starting"
        );

        let mut report = TeardownReport::new(self.target);
        self.execute(ctx, &mut report).await.map_err(annotate)?;

        report.verification =
            StatusReport::collect_only(ctx, &target_components(self.target)).await;
        let residue = report.residue();
        if residue.is_empty() {
            tracing::info!(target_name = %self.target, "verification found no residual resources");
        } else {
            for c in &residue {
                tracing::warn!(component = %c.component, state = %c.state, "still present after teardown");
            }
        }
        tracing::info!(
            target_name = %self.target,
            steps = report.steps.len(),
            failures = report.failures().len(),
            duration_ms = timer.finish(),
            "teardown finished"
        );
        Ok(report)
    }

    async fn execute(&self, ctx: &DeployContext, report: &mut TeardownReport) -> Result<(), DeployError> {
        let config = &ctx.config;
        match self.target {
            TeardownTarget::All => {
                delete_app(ctx, report).await;
                delete_embedding(ctx, report).await?;
                steps::delete_throughputs(ctx, report).await;
                steps::delete_custom_models(ctx, report).await;
                for (_, bucket) in config.buckets.all() {
                    if bucket != config.buckets.deployment {
                        steps::delete_bucket(ctx, bucket, report).await;
                    }
                }
                steps::delete_role(ctx, &config.model.tuning_role, report).await;
            }
            TeardownTarget::Data => {
                steps::delete_bucket(ctx, &config.buckets.source, report).await;
                steps::delete_bucket(ctx, &config.buckets.corpus, report).await;
            }
            TeardownTarget::Embedding => delete_embedding(ctx, report).await?,
            TeardownTarget::Model => {
                steps::delete_throughputs(ctx, report).await;
                steps::delete_custom_models(ctx, report).await;
                steps::delete_bucket(ctx, &config.buckets.tuning, report).await;
                steps::delete_role(ctx, &config.model.tuning_role, report).await;
            }
            TeardownTarget::Endpoint => steps::delete_throughputs(ctx, report).await,
            TeardownTarget::App => delete_app(ctx, report).await,
        }
        Ok(())
    }
}

/// Stack, knowledge bases, collections and the deployment bucket.
///
/// The graph is read before the stack goes away; afterwards only name
/// listings could find retained resources.
async fn delete_embedding(ctx: &DeployContext, report: &mut TeardownReport) -> Result<(), DeployError> {
    let inventory = stack_inventory(ctx).await?;
    tracing::info!(resources = inventory.len(), "stack inventory captured");

    steps::delete_stack(ctx, report).await?;
    steps::delete_knowledge_bases(ctx, &inventory, report).await;
    steps::delete_collections(ctx, &inventory, report).await;
    steps::delete_bucket(ctx, &ctx.config.buckets.deployment, report).await;
    Ok(())
}

/// The hosted application and what only it uses.
async fn delete_app(ctx: &DeployContext, report: &mut TeardownReport) {
    let app = &ctx.config.app;
    steps::delete_service(ctx, report).await;
    steps::delete_build_project(ctx, report).await;
    steps::delete_repository(ctx, report).await;
    for role in [&app.instance_role, &app.access_role, &app.build_role] {
        steps::delete_role(ctx, role, report).await;
    }
}

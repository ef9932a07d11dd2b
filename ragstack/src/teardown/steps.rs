//! Individual teardown steps.
//!
//! Every step records its own outcome and swallows per-resource errors,
//! except stack deletion: resources inside a stack that failed to delete
//! may still be in use, so that failure stops the sequence.

use std::collections::BTreeSet;

use super::report::{StepOutcome, TeardownReport};
use crate::core::DataSourcePair;
use crate::discovery::{match_pairs, Inventory};
use crate::errors::{ControlPlaneError, DeployError, Result};
use crate::pipeline::{wait, DeployContext, PollConfig, ResourceState};
use crate::stages::lookup::{
    all_data_sources, all_object_keys, collection_ids, custom_models, knowledge_base_ids,
    throughputs,
};

const STACK_DELETED: &str = "DELETE_COMPLETE";
const STACK_DELETE_FAILED: &str = "DELETE_FAILED";

fn is_gone(state: &ResourceState) -> bool {
    state.is_absent()
}

/// Deletes the root stack and waits for it to disappear.
pub(crate) async fn delete_stack(ctx: &DeployContext, report: &mut TeardownReport) -> Result<()> {
    let stacks = ctx.cloud.stacks.as_ref();
    let name = ctx.config.stack_name.as_str();
    let label = format!("stack {name}");

    if stacks.describe_stack(name).await?.is_none() {
        report.record(label, StepOutcome::NotFound);
        return Ok(());
    }

    if let Err(e) = stacks.delete_stack(name).await {
        report.record_fatal(&label, e.to_string());
        return Err(e.into());
    }

    let poll = ctx.poll(PollConfig::provisioning());
    let outcome = wait(
        &label,
        &poll,
        move || async move {
            stacks
                .describe_stack(name)
                .await
                .map(|found| ResourceState::from_lookup(found, |s| s.status.clone()))
        },
        |state: &ResourceState| state.is_absent() || state.is_in(&[STACK_DELETED]),
        |state: &ResourceState| state.is_in(&[STACK_DELETE_FAILED]),
    )
    .await
    .into_result(&label, &poll);

    match outcome {
        Ok(_) => {
            report.record(label, StepOutcome::Deleted);
            Ok(())
        }
        Err(e) => {
            report.record_fatal(&label, e.to_string());
            Err(e)
        }
    }
}

/// Data sources first, then their knowledge bases.
pub(crate) async fn delete_knowledge_bases(
    ctx: &DeployContext,
    inventory: &Inventory,
    report: &mut TeardownReport,
) {
    let service = ctx.cloud.knowledge_bases.as_ref();
    let kb_ids = match knowledge_base_ids(ctx, inventory).await {
        Ok(ids) => ids,
        Err(e) => {
            report.record("knowledge bases", StepOutcome::Failed(e.to_string()));
            inventory.knowledge_base_ids()
        }
    };

    let discovered = match_pairs(&kb_ids, inventory.data_source_pairs());
    for pair in &discovered.skipped {
        report.record(
            format!("data source {pair}"),
            StepOutcome::Skipped("owning knowledge base not found".to_string()),
        );
    }

    let mut pairs: BTreeSet<DataSourcePair> = discovered.matched.into_iter().collect();
    for kb in &kb_ids {
        match all_data_sources(service, kb).await {
            Ok(sources) => pairs.extend(
                sources
                    .into_iter()
                    .map(|ds| DataSourcePair::new(kb.clone(), ds.id)),
            ),
            Err(e) if e.is_not_found() => {}
            Err(e) => report.record(
                format!("data sources of {kb}"),
                StepOutcome::Failed(e.to_string()),
            ),
        }
    }

    for pair in &pairs {
        let outcome = StepOutcome::from_result(service.delete_data_source(pair).await);
        report.record(format!("data source {pair}"), outcome);
    }
    for kb in &kb_ids {
        let outcome = StepOutcome::from_result(service.delete_knowledge_base(kb).await);
        report.record(format!("knowledge base {kb}"), outcome);
    }
}

/// Vector-search collections, each waited on without failing the run.
pub(crate) async fn delete_collections(
    ctx: &DeployContext,
    inventory: &Inventory,
    report: &mut TeardownReport,
) {
    let service = ctx.cloud.vector_search.as_ref();
    let ids = match collection_ids(ctx, inventory).await {
        Ok(ids) => ids,
        Err(e) => {
            report.record("collections", StepOutcome::Failed(e.to_string()));
            inventory.collection_ids()
        }
    };

    let poll = ctx.poll(PollConfig::teardown());
    for id in &ids {
        let label = format!("collection {id}");
        let mut outcome = StepOutcome::from_result(service.delete_collection(id).await);
        if outcome == StepOutcome::Deleted {
            let id = id.as_str();
            let waited = wait(
                &label,
                &poll,
                move || async move {
                    service
                        .get_collection(id)
                        .await
                        .map(|found| ResourceState::from_lookup(found, |c| c.status.clone()))
                },
                is_gone,
                |_| false,
            )
            .await;
            if !waited.is_ready() {
                outcome = StepOutcome::Failed(format!("still present, last state {}", waited.state()));
            }
        }
        report.record(label, outcome);
    }
}

/// Provisioned throughputs, each waited on without failing the run.
pub(crate) async fn delete_throughputs(ctx: &DeployContext, report: &mut TeardownReport) {
    let service = ctx.cloud.throughput.as_ref();
    let found = match throughputs(ctx).await {
        Ok(found) => found,
        Err(e) => {
            report.record("provisioned throughputs", StepOutcome::Failed(e.to_string()));
            return;
        }
    };

    let poll = ctx.poll(PollConfig::teardown());
    for pt in &found {
        let label = format!("provisioned throughput {}", pt.name);
        let mut outcome = StepOutcome::from_result(service.delete_provisioned_throughput(&pt.arn).await);
        if outcome == StepOutcome::Deleted {
            let arn = pt.arn.as_str();
            let waited = wait(
                &label,
                &poll,
                move || async move {
                    service
                        .get_provisioned_throughput(arn)
                        .await
                        .map(|found| ResourceState::from_lookup(found, |p| p.status.clone()))
                },
                is_gone,
                |_| false,
            )
            .await;
            if !waited.is_ready() {
                outcome = StepOutcome::Failed(format!("still present, last state {}", waited.state()));
            }
        }
        report.record(label, outcome);
    }
}

/// Custom models carrying the model prefix.
pub(crate) async fn delete_custom_models(ctx: &DeployContext, report: &mut TeardownReport) {
    let models = match custom_models(ctx).await {
        Ok(models) => models,
        Err(e) => {
            report.record("custom models", StepOutcome::Failed(e.to_string()));
            return;
        }
    };
    for model in &models {
        let outcome = StepOutcome::from_result(ctx.cloud.models.delete_custom_model(&model.arn).await);
        report.record(format!("custom model {}", model.name), outcome);
    }
}

/// Empties a bucket, then deletes it once it reports empty.
///
/// A failed recursive empty falls back to deleting listed keys one by one.
pub(crate) async fn delete_bucket(ctx: &DeployContext, bucket: &str, report: &mut TeardownReport) {
    let label = format!("bucket {bucket}");
    let outcome = empty_and_delete(ctx, bucket).await;
    report.record(label, outcome);
}

async fn empty_and_delete(ctx: &DeployContext, bucket: &str) -> StepOutcome {
    let storage = ctx.cloud.storage.as_ref();
    match storage.bucket_exists(bucket).await {
        Ok(false) => return StepOutcome::NotFound,
        Ok(true) => {}
        Err(e) => return StepOutcome::Failed(e.to_string()),
    }

    if let Err(e) = storage.empty_bucket(bucket).await {
        tracing::warn!(bucket, error = %e, "recursive empty failed, deleting objects one by one");
        match all_object_keys(storage, bucket).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = storage.delete_object(bucket, &key).await {
                        tracing::warn!(bucket, key, error = %e, "object deletion failed");
                    }
                }
            }
            Err(e) => return StepOutcome::Failed(format!("could not list objects: {e}")),
        }
    }

    match storage.list_objects(bucket, None, None).await {
        Ok(page) if page.items.is_empty() => {}
        Ok(page) => {
            return StepOutcome::Failed(format!(
                "bucket still holds objects (first: {})",
                page.items.first().map_or("?", String::as_str)
            ));
        }
        Err(e) => return StepOutcome::Failed(e.to_string()),
    }

    StepOutcome::from_result(storage.delete_bucket(bucket).await)
}

/// Removes a role's policies, then the role.
pub(crate) async fn delete_role(ctx: &DeployContext, name: &str, report: &mut TeardownReport) {
    let outcome = StepOutcome::from_deploy(remove_role(ctx, name).await);
    report.record(format!("role {name}"), outcome);
}

async fn remove_role(ctx: &DeployContext, name: &str) -> Result<()> {
    let identity = ctx.cloud.identity.as_ref();
    if identity.get_role(name).await?.is_none() {
        return Err(ControlPlaneError::not_found("iam", "get-role").into());
    }
    for policy in identity.list_role_policies(name).await? {
        identity.delete_role_policy(name, &policy).await?;
    }
    for arn in identity.list_attached_role_policies(name).await? {
        identity.detach_role_policy(name, &arn).await?;
    }
    identity.delete_role(name).await?;
    Ok(())
}

/// Hosted service, waited on without failing the run.
pub(crate) async fn delete_service(ctx: &DeployContext, report: &mut TeardownReport) {
    let hosting = ctx.cloud.hosting.as_ref();
    let name = &ctx.config.app.service_name;
    let label = format!("service {name}");

    let service = match hosting.find_service(name).await {
        Ok(Some(service)) => service,
        Ok(None) => {
            report.record(label, StepOutcome::NotFound);
            return;
        }
        Err(e) => {
            report.record(label, StepOutcome::Failed(e.to_string()));
            return;
        }
    };

    let mut outcome = StepOutcome::from_result(hosting.delete_service(&service.arn).await);
    if outcome == StepOutcome::Deleted {
        let poll = ctx.poll(PollConfig::teardown());
        let arn = service.arn.as_str();
        let waited = wait(
            &label,
            &poll,
            move || async move {
                hosting
                    .describe_service(arn)
                    .await
                    .map(|found| ResourceState::from_lookup(found, |s| s.status.clone()))
            },
            |state: &ResourceState| state.is_absent() || state.is_in(&["DELETED"]),
            |_| false,
        )
        .await;
        if !waited.is_ready() {
            outcome = StepOutcome::Failed(format!("still present, last state {}", waited.state()));
        }
    }
    report.record(label, outcome);
}

/// Managed build project.
pub(crate) async fn delete_build_project(ctx: &DeployContext, report: &mut TeardownReport) {
    let builds = ctx.cloud.builds.as_ref();
    let name = &ctx.config.app.build_project;
    let outcome = match builds.project_exists(name).await {
        Ok(false) => StepOutcome::NotFound,
        Ok(true) => StepOutcome::from_result(builds.delete_project(name).await),
        Err(e) => StepOutcome::Failed(e.to_string()),
    };
    report.record(format!("build project {name}"), outcome);
}

/// Container repository, images first.
pub(crate) async fn delete_repository(ctx: &DeployContext, report: &mut TeardownReport) {
    let name = &ctx.config.app.repository_name;
    let outcome = StepOutcome::from_deploy(remove_repository(ctx, name).await);
    report.record(format!("repository {name}"), outcome);
}

async fn remove_repository(ctx: &DeployContext, name: &str) -> Result<()> {
    let registry = ctx.cloud.registry.as_ref();
    if registry.describe_repository(name).await?.is_none() {
        return Err(ControlPlaneError::not_found("ecr", "describe-repositories").into());
    }
    let images = registry.list_images(name).await?;
    if !images.is_empty() {
        registry.delete_images(name, &images).await?;
    }
    registry
        .delete_repository(name)
        .await
        .map_err(DeployError::from)
}

//! Provisioned throughput for the latest custom model.

use async_trait::async_trait;
use serde_json::json;

use super::lookup::{latest_custom_model, throughputs, IN_SERVICE};
use super::{Stage, StageOutput};
use crate::control::{CustomModelSummary, ProvisionRequest, ProvisionedThroughput};
use crate::core::{select_latest, NamingConvention, StageName};
use crate::errors::{DeployError, Result};
use crate::pipeline::{wait, DeployContext, PollConfig, ResourceState};

const PT_FAILED: &str = "Failed";

/// Provisions dedicated inference capacity behind a confirmation gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointStage;

#[async_trait]
impl Stage for EndpointStage {
    fn name(&self) -> StageName {
        StageName::Endpoint
    }

    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput> {
        let config = &ctx.config;
        let model = latest_custom_model(ctx).await?.ok_or_else(|| {
            DeployError::missing(
                format!("custom model with prefix {}", config.model.prefix),
                "run `ragstack deploy model` first",
            )
        })?;
        tracing::info!(model = %model.name, "selected latest custom model");

        let pt_prefix = NamingConvention::provisioned_throughput_prefix(&config.model.prefix);
        let existing = throughputs(ctx)
            .await?
            .into_iter()
            .filter(|pt| pt.model_arn == model.arn && pt.status != PT_FAILED);
        let (arn, reused) = match select_latest(existing, &pt_prefix, |pt| pt.name.as_str()) {
            Some(pt) => {
                tracing::info!(name = %pt.name, status = %pt.status, "reusing provisioned throughput");
                (pt.arn, true)
            }
            None => match provision(ctx, &model).await? {
                Some(arn) => (arn, false),
                None => {
                    return Ok(StageOutput::skipped("provisioning declined")
                        .with("custom_model_arn", json!(model.arn)));
                }
            },
        };

        let pt = wait_for_throughput(ctx, &arn).await?;
        ensure_listed(ctx, &pt).await?;
        tracing::info!(name = %pt.name, arn = %pt.arn, "provisioned throughput in service");

        Ok(StageOutput::completed()
            .with("provisioned_throughput_arn", json!(pt.arn))
            .with("provisioned_throughput_name", json!(pt.name))
            .with("custom_model_arn", json!(model.arn))
            .with("reused", json!(reused)))
    }
}

/// Asks for confirmation, then submits the request. `None` when declined.
async fn provision(ctx: &DeployContext, model: &CustomModelSummary) -> Result<Option<String>> {
    let config = &ctx.config;
    let action = format!(
        "Provision {} model unit(s) of dedicated throughput for {} (billed hourly until deleted).",
        config.model.model_units, model.name
    );
    if !ctx.confirmer.confirm(&action).await {
        tracing::warn!(model = %model.name, "provisioned throughput declined");
        return Ok(None);
    }

    let request = ProvisionRequest {
        name: config.naming.provisioned_throughput_name(&config.model.prefix),
        model_arn: model.arn.clone(),
        model_units: config.model.model_units,
        client_token: uuid::Uuid::new_v4().to_string(),
    };
    let arn = ctx
        .cloud
        .throughput
        .create_provisioned_throughput(&request)
        .await
        .map_err(|e| DeployError::creation(format!("provisioned throughput {}", request.name), e))?;
    tracing::info!(name = %request.name, arn, "provisioned throughput requested");
    Ok(Some(arn))
}

async fn wait_for_throughput(ctx: &DeployContext, arn: &str) -> Result<ProvisionedThroughput> {
    let service = ctx.cloud.throughput.as_ref();
    let label = format!("provisioned throughput {arn}");
    let poll = ctx.poll(PollConfig::provisioning());

    wait(
        &label,
        &poll,
        move || async move {
            service
                .get_provisioned_throughput(arn)
                .await
                .map(|found| ResourceState::from_lookup(found, |pt| pt.status.clone()))
        },
        |state: &ResourceState| state.is_in(&[IN_SERVICE]),
        |state: &ResourceState| state.is_in(&[PT_FAILED]),
    )
    .await
    .into_result(&label, &poll)?;

    service
        .get_provisioned_throughput(arn)
        .await?
        .ok_or_else(|| DeployError::creation(&label, "vanished after reaching InService"))
}

/// Waits until the allocation shows up in the listing as well.
async fn ensure_listed(ctx: &DeployContext, pt: &ProvisionedThroughput) -> Result<()> {
    let service = ctx.cloud.throughput.as_ref();
    let arn = pt.arn.as_str();
    let label = format!("provisioned throughput {} listing", pt.name);
    let poll = ctx.poll(PollConfig::fast());

    wait(
        &label,
        &poll,
        move || async move {
            service.list_provisioned_throughputs().await.map(|all| {
                ResourceState::from_lookup(all.into_iter().find(|p| p.arn == arn), |p| {
                    p.status.clone()
                })
            })
        },
        |state: &ResourceState| state.status().is_some(),
        |_| false,
    )
    .await
    .into_result(&label, &poll)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{AutoConfirm, MockConfirmer};
    use crate::stages::StageStatus;
    use crate::testing::{Scripted, TestBed};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn with_model(bed: &TestBed) -> CustomModelSummary {
        let date = &bed.config().naming.date_stamp;
        bed.cloud().put_custom_model("ofac-nova-custom-20230101");
        bed.cloud()
            .put_custom_model(&format!("ofac-nova-custom-{date}"))
    }

    #[tokio::test]
    async fn test_provisions_latest_model_after_confirmation() {
        let bed = TestBed::new().unwrap();
        let model = with_model(&bed);
        let mut confirmer = MockConfirmer::new();
        confirmer.expect_confirm().times(1).return_const(true);
        let ctx = bed.context_with(Arc::new(confirmer));

        let output = EndpointStage.execute(&ctx).await.unwrap();

        assert_eq!(output.status, StageStatus::Completed);
        assert_eq!(output.get_str("custom_model_arn"), Some(model.arn.as_str()));
        assert_eq!(output.data["reused"], json!(false));
        assert!(output
            .get_str("provisioned_throughput_name")
            .unwrap()
            .starts_with("ofac-nova-custom-pt-"));
        assert!(bed.cloud().calls_to("list_provisioned_throughputs") >= 2);
    }

    #[tokio::test]
    async fn test_declined_gate_skips_without_creating() {
        let bed = TestBed::new().unwrap();
        with_model(&bed);
        let ctx = bed.context_with(Arc::new(AutoConfirm(false)));

        let output = EndpointStage.execute(&ctx).await.unwrap();

        assert_eq!(output.status, StageStatus::Skipped);
        assert_eq!(bed.cloud().calls_to("create_provisioned_throughput"), 0);
    }

    #[tokio::test]
    async fn test_existing_throughput_reused_without_prompt() {
        let bed = TestBed::new().unwrap();
        with_model(&bed);
        EndpointStage.execute(&bed.context()).await.unwrap();

        let mut confirmer = MockConfirmer::new();
        confirmer.expect_confirm().never();
        let ctx = bed.context_with(Arc::new(confirmer));
        let output = EndpointStage.execute(&ctx).await.unwrap();

        assert_eq!(output.data["reused"], json!(true));
        assert_eq!(bed.cloud().calls_to("create_provisioned_throughput"), 1);
    }

    #[tokio::test]
    async fn test_missing_model() {
        let bed = TestBed::new().unwrap();

        let err = EndpointStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
    }

    #[tokio::test]
    async fn test_failed_throughput() {
        let bed = TestBed::new().unwrap();
        with_model(&bed);
        bed.cloud()
            .script(Scripted::Throughput, &["Creating", "Failed"]);

        let err = EndpointStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "terminal_state");
    }
}

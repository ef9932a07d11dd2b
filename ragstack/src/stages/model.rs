//! Tuning data, the tuning role and the fine-tuning job.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{Stage, StageOutput};
use crate::collaborators::TuningDataRequest;
use crate::config::DeployConfig;
use crate::control::{CustomizationJob, CustomizationJobRequest};
use crate::core::StageName;
use crate::errors::{DeployError, Result};
use crate::pipeline::{
    ensure_bucket, ensure_role, wait, DeployContext, PollConfig, ResourceState, RoleSpec,
};

const JOB_COMPLETED: &str = "Completed";
const JOB_FAILED: [&str; 3] = ["Failed", "Stopped", "Stopping"];

/// Name of the inline policy granting dataset access.
pub const TUNING_ACCESS_POLICY: &str = "tuning-data-access";

/// The role assumed by the customization service.
///
/// Trust is limited to the customization service acting for this account;
/// data access is limited to the tuning bucket and dataset prefix.
#[must_use]
pub fn tuning_role_spec(config: &DeployConfig) -> RoleSpec<'_> {
    let bucket = &config.buckets.tuning;
    let prefix = config.model.tuning_data_prefix();

    let trust_policy = json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": "bedrock.amazonaws.com"},
            "Action": "sts:AssumeRole",
            "Condition": {"StringEquals": {"aws:SourceAccount": config.account_id}}
        }]
    });
    let access_policy = json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:PutObject"],
                "Resource": [format!("arn:aws:s3:::{bucket}/{prefix}*")]
            },
            {
                "Effect": "Allow",
                "Action": ["s3:ListBucket"],
                "Resource": [format!("arn:aws:s3:::{bucket}")],
                "Condition": {"StringLike": {"s3:prefix": [format!("{prefix}*")]}}
            }
        ]
    });

    RoleSpec {
        name: &config.model.tuning_role,
        trust_policy,
        description: "Fine-tuning data access for the RAG stack",
        inline_policies: vec![(TUNING_ACCESS_POLICY.to_string(), access_policy)],
        managed_policies: Vec::new(),
    }
}

/// Generates tuning data and drives a fine-tuning job to completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelStage;

#[async_trait]
impl Stage for ModelStage {
    fn name(&self) -> StageName {
        StageName::Model
    }

    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput> {
        let config = &ctx.config;
        let storage = ctx.cloud.storage.as_ref();
        let bucket = &config.buckets.tuning;
        let key = &config.model.tuning_data_key;

        ensure_bucket(storage, bucket, &config.region).await?;
        ctx.collaborators
            .tuning
            .generate(&TuningDataRequest {
                corpus_bucket: config.buckets.corpus.clone(),
                tuning_bucket: bucket.clone(),
                key: key.clone(),
                context: ctx.cloud_context(),
            })
            .await?;
        if !storage.object_exists(bucket, key).await? {
            return Err(DeployError::creation(
                format!("tuning dataset s3://{bucket}/{key}"),
                "generator finished without writing the dataset",
            ));
        }

        let role = ensure_role(
            ctx.cloud.identity.as_ref(),
            &tuning_role_spec(config),
            &ctx.poll(PollConfig::fast()),
        )
        .await?;

        let job_name = config.naming.job_name(&config.model.prefix);
        let model_name = config.naming.custom_model_name(&config.model.prefix);
        let models = ctx.cloud.models.as_ref();

        let reused = match models.get_customization_job(&job_name).await? {
            Some(job) => {
                tracing::info!(job = %job_name, status = %job.status, "reusing existing job");
                true
            }
            None => {
                let prefix = config.model.tuning_data_prefix();
                let request = CustomizationJobRequest {
                    job_name: job_name.clone(),
                    custom_model_name: model_name.clone(),
                    role_arn: role.value.arn.clone(),
                    base_model_id: config.model.base_model_id.clone(),
                    training_data_uri: format!("s3://{bucket}/{key}"),
                    output_data_uri: format!("s3://{bucket}/{prefix}output/"),
                    hyperparameters: BTreeMap::from([(
                        "epochCount".to_string(),
                        config.model.epochs.to_string(),
                    )]),
                    client_token: uuid::Uuid::new_v4().to_string(),
                };
                let arn = models
                    .create_customization_job(&request)
                    .await
                    .map_err(|e| DeployError::creation(format!("job {job_name}"), e))?;
                tracing::info!(job = %job_name, arn, "fine-tuning job submitted");
                false
            }
        };

        let job = wait_for_job(ctx, &job_name).await?;
        let model_arn = resolve_model_arn(ctx, &job, &model_name).await?;
        tracing::info!(job = %job_name, model = %model_arn, "custom model ready");

        Ok(StageOutput::completed()
            .with("job_name", json!(job_name))
            .with("job_arn", json!(job.arn))
            .with("custom_model_arn", json!(model_arn))
            .with("reused_job", json!(reused))
            .with("role_arn", Value::String(role.value.arn)))
    }
}

async fn wait_for_job(ctx: &DeployContext, job_name: &str) -> Result<CustomizationJob> {
    let models = ctx.cloud.models.as_ref();
    let label = format!("job {job_name}");
    let poll = ctx.poll(PollConfig::fine_tuning());

    wait(
        &label,
        &poll,
        move || async move {
            models
                .get_customization_job(job_name)
                .await
                .map(|found| ResourceState::from_lookup(found, |j| j.status.clone()))
        },
        |state: &ResourceState| state.is_in(&[JOB_COMPLETED]),
        |state: &ResourceState| state.is_in(&JOB_FAILED),
    )
    .await
    .into_result(&label, &poll)?;

    models
        .get_customization_job(job_name)
        .await?
        .ok_or_else(|| DeployError::creation(&label, "job vanished after completion"))
}

/// Output model of a completed job, falling back to a lookup by name when
/// the job response omits it.
async fn resolve_model_arn(
    ctx: &DeployContext,
    job: &CustomizationJob,
    model_name: &str,
) -> Result<String> {
    if let Some(arn) = job.output_model_arn.as_ref().filter(|a| !a.is_empty()) {
        return Ok(arn.clone());
    }

    let name = job.output_model_name.as_deref().unwrap_or(model_name);
    tracing::info!(model = name, "job response has no model ARN, looking it up by name");
    let models = ctx.cloud.models.list_custom_models(name).await?;
    models
        .into_iter()
        .find(|m| m.name == name)
        .map(|m| m.arn)
        .ok_or_else(|| {
            DeployError::creation(format!("custom model {name}"), "not found after job completion")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, TestBed};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_role_spec_is_scoped() {
        let bed = TestBed::new().unwrap();
        let config = bed.config();
        let spec = tuning_role_spec(config);

        assert_eq!(
            spec.trust_policy["Statement"][0]["Principal"]["Service"],
            "bedrock.amazonaws.com"
        );
        assert_eq!(
            spec.trust_policy["Statement"][0]["Condition"]["StringEquals"]["aws:SourceAccount"],
            config.account_id.as_str()
        );
        let (name, access) = &spec.inline_policies[0];
        assert_eq!(name, TUNING_ACCESS_POLICY);
        assert_eq!(
            access["Statement"][0]["Resource"][0],
            format!("arn:aws:s3:::{}/tuning/*", config.buckets.tuning)
        );
    }

    #[tokio::test]
    async fn test_job_completes_and_model_resolves() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();

        let output = ModelStage.execute(&ctx).await.unwrap();

        let expected = format!("{}-{}", ctx.config.model.prefix, ctx.config.naming.date_stamp);
        assert!(output.get_str("custom_model_arn").unwrap().ends_with(&expected));
        assert_eq!(output.data["reused_job"], json!(false));
        assert_eq!(
            bed.cloud().role_inline_policies(&ctx.config.model.tuning_role),
            vec![TUNING_ACCESS_POLICY.to_string()]
        );
    }

    #[tokio::test]
    async fn test_rerun_reuses_job() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();

        ModelStage.execute(&ctx).await.unwrap();
        let second = ModelStage.execute(&ctx).await.unwrap();

        assert_eq!(second.data["reused_job"], json!(true));
        assert_eq!(bed.cloud().calls_to("create_customization_job"), 1);
        assert_eq!(bed.cloud().calls_to("create_role"), 1);
    }

    #[tokio::test]
    async fn test_model_found_by_name_when_job_omits_it() {
        let bed = TestBed::new().unwrap();
        bed.cloud().omit_job_output_model();
        let ctx = bed.context();

        let output = ModelStage.execute(&ctx).await.unwrap();

        assert!(output.get_str("custom_model_arn").is_some());
        assert_eq!(bed.cloud().calls_to("list_custom_models"), 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_terminal() {
        let bed = TestBed::new().unwrap();
        bed.cloud()
            .script(Scripted::CustomizationJob, &["InProgress", "Failed"]);

        let err = ModelStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "terminal_state");
    }

    #[tokio::test]
    async fn test_job_timeout_reports_last_state() {
        let bed = TestBed::new().unwrap();
        bed.cloud().script(Scripted::CustomizationJob, &["InProgress"]);
        let ctx = bed.context();

        let err = ModelStage.execute(&ctx).await.unwrap_err();
        match err {
            DeployError::TimedOut {
                attempts,
                last_state,
                ..
            } => {
                assert_eq!(attempts, 360);
                assert_eq!(last_state, "InProgress");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

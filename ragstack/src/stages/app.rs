//! Container image and hosted application service.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use super::lookup::{active_throughput, knowledge_base_ids, stack_inventory};
use super::{Stage, StageOutput};
use crate::collaborators::ImageRequest;
use crate::config::DeployConfig;
use crate::control::{BuildProjectRequest, RepositorySummary, ServiceRequest, ServiceSummary};
use crate::core::StageName;
use crate::errors::{DeployError, Result};
use crate::pipeline::{
    ensure_bucket, ensure_present, ensure_role, wait, DeployContext, PollConfig, ResourceState,
    RoleSpec,
};

/// Port the application container listens on.
pub const APP_PORT: u16 = 8080;

const BUILD_SUCCEEDED: &str = "SUCCEEDED";
const BUILD_FAILED: [&str; 4] = ["FAILED", "FAULT", "STOPPED", "TIMED_OUT"];
const SERVICE_RUNNING: &str = "RUNNING";
const SERVICE_FAILED: [&str; 2] = ["CREATE_FAILED", "UPDATE_FAILED"];
const ECR_ACCESS_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSAppRunnerServicePolicyForECRAccess";

fn assume_role_policy(service: &str) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": service},
            "Action": "sts:AssumeRole"
        }]
    })
}

/// Role assumed by running application instances.
#[must_use]
pub fn instance_role_spec(config: &DeployConfig) -> RoleSpec<'_> {
    RoleSpec {
        name: &config.app.instance_role,
        trust_policy: assume_role_policy("tasks.apprunner.amazonaws.com"),
        description: "Model and knowledge-base access for the RAG application",
        inline_policies: vec![(
            "bedrock-invoke".to_string(),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": [
                        "bedrock:InvokeModel",
                        "bedrock:InvokeModelWithResponseStream",
                        "bedrock:Retrieve",
                        "bedrock:RetrieveAndGenerate"
                    ],
                    "Resource": "*"
                }]
            }),
        )],
        managed_policies: Vec::new(),
    }
}

/// Role the hosting service uses to pull the image.
#[must_use]
pub fn access_role_spec(config: &DeployConfig) -> RoleSpec<'_> {
    RoleSpec {
        name: &config.app.access_role,
        trust_policy: assume_role_policy("build.apprunner.amazonaws.com"),
        description: "Registry pull access for the RAG application",
        inline_policies: Vec::new(),
        managed_policies: vec![ECR_ACCESS_POLICY.to_string()],
    }
}

/// Role assumed by the managed image build.
#[must_use]
pub fn build_role_spec(config: &DeployConfig) -> RoleSpec<'_> {
    let repository = format!(
        "arn:aws:ecr:{}:{}:repository/{}",
        config.region, config.account_id, config.app.repository_name
    );
    let source = format!("arn:aws:s3:::{}/app-source/*", config.buckets.deployment);
    RoleSpec {
        name: &config.app.build_role,
        trust_policy: assume_role_policy("codebuild.amazonaws.com"),
        description: "Managed image build for the RAG application",
        inline_policies: vec![(
            "app-build".to_string(),
            json!({
                "Version": "2012-10-17",
                "Statement": [
                    {
                        "Effect": "Allow",
                        "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                        "Resource": "*"
                    },
                    {
                        "Effect": "Allow",
                        "Action": ["ecr:GetAuthorizationToken"],
                        "Resource": "*"
                    },
                    {
                        "Effect": "Allow",
                        "Action": [
                            "ecr:BatchCheckLayerAvailability",
                            "ecr:CompleteLayerUpload",
                            "ecr:InitiateLayerUpload",
                            "ecr:PutImage",
                            "ecr:UploadLayerPart"
                        ],
                        "Resource": repository
                    },
                    {
                        "Effect": "Allow",
                        "Action": ["s3:GetObject"],
                        "Resource": source
                    }
                ]
            }),
        )],
        managed_policies: Vec::new(),
    }
}

/// Environment variables the application reads at startup.
#[must_use]
pub fn runtime_environment(
    config: &DeployConfig,
    knowledge_base_id: &str,
    model_arn: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("AWS_REGION".to_string(), config.region.clone()),
        ("AWS_BEDROCK_MODE".to_string(), "1".to_string()),
        ("BEDROCK_KB_ID".to_string(), knowledge_base_id.to_string()),
        ("BEDROCK_MODEL_ARN".to_string(), model_arn.to_string()),
        (
            "BEDROCK_BASE_MODEL_ID".to_string(),
            config.model.foundation_model_id.clone(),
        ),
        ("ALLOWED_USERS".to_string(), config.app.allowed_users.clone()),
    ])
}

/// Builds the image and rolls out the hosted service.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppStage;

#[async_trait]
impl Stage for AppStage {
    fn name(&self) -> StageName {
        StageName::App
    }

    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput> {
        let config = &ctx.config;

        let inventory = stack_inventory(ctx).await?;
        let knowledge_base_id = knowledge_base_ids(ctx, &inventory)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                DeployError::missing(
                    format!("knowledge base for stack {}", config.stack_name),
                    "run `ragstack deploy embedding` first",
                )
            })?;

        let model_arn = match active_throughput(ctx).await? {
            Some(pt) => pt.arn,
            None => {
                tracing::info!("no provisioned throughput in service, using the on-demand model");
                config.naming.foundation_model_arn(&config.model.foundation_model_id)
            }
        };

        let registry = ctx.cloud.registry.as_ref();
        let name = config.app.repository_name.as_str();
        let repository = ensure_present(
            &format!("repository {name}"),
            registry.describe_repository(name),
            || registry.create_repository(name),
        )
        .await?
        .value;
        let image = repository.image(&config.app.image_tag);
        let build = build_image(ctx, &repository, &image).await?;

        let identity = ctx.cloud.identity.as_ref();
        let visibility = ctx.poll(PollConfig::fast());
        let instance_role = ensure_role(identity, &instance_role_spec(config), &visibility)
            .await?
            .value;
        let access_role = ensure_role(identity, &access_role_spec(config), &visibility)
            .await?
            .value;

        let request = ServiceRequest {
            name: config.app.service_name.clone(),
            image: image.clone(),
            port: APP_PORT,
            environment: runtime_environment(config, &knowledge_base_id, &model_arn),
            instance_role_arn: instance_role.arn,
            access_role_arn: access_role.arn,
        };
        let service = deploy_service(ctx, &request).await?;

        Ok(StageOutput::completed()
            .with("service_arn", json!(service.arn))
            .with("service_url", json!(service.url))
            .with("image", json!(image))
            .with("build", json!(build))
            .with("knowledge_base_id", json!(knowledge_base_id))
            .with("model_arn", json!(model_arn)))
    }
}

/// Builds and pushes the image; returns which path was taken.
async fn build_image(
    ctx: &DeployContext,
    repository: &RepositorySummary,
    image: &str,
) -> Result<&'static str> {
    let images = ctx.collaborators.images.as_ref();
    if images.is_available().await {
        let password = ctx.cloud.registry.login_password().await?;
        images
            .build_and_push(&ImageRequest {
                context_dir: ctx.config.paths.app_dir.clone(),
                image: image.to_string(),
                registry: repository.registry().to_string(),
                password,
            })
            .await?;
        return Ok("local");
    }

    tracing::info!("no local image build daemon, using the managed build service");
    managed_build(ctx, repository, image).await?;
    Ok("managed")
}

async fn managed_build(
    ctx: &DeployContext,
    repository: &RepositorySummary,
    image: &str,
) -> Result<()> {
    let config = &ctx.config;
    let archive = ctx
        .collaborators
        .packager
        .package(&config.paths.app_dir)
        .await?;

    let bucket = &config.buckets.deployment;
    let key = format!("app-source/{}.zip", config.app.service_name);
    ensure_bucket(ctx.cloud.storage.as_ref(), bucket, &config.region).await?;
    ctx.cloud.storage.put_object(bucket, &key, &archive).await?;

    let role = ensure_role(
        ctx.cloud.identity.as_ref(),
        &build_role_spec(config),
        &ctx.poll(PollConfig::fast()),
    )
    .await?
    .value;

    let builds = ctx.cloud.builds.as_ref();
    let project = config.app.build_project.as_str();
    let request = BuildProjectRequest {
        name: project.to_string(),
        source_bucket: bucket.clone(),
        source_key: key,
        service_role_arn: role.arn,
        environment: BTreeMap::from([
            ("AWS_REGION".to_string(), config.region.clone()),
            ("IMAGE_URI".to_string(), image.to_string()),
            ("REGISTRY".to_string(), repository.registry().to_string()),
        ]),
    };
    let label = format!("build project {project}");
    if builds.project_exists(project).await? {
        builds.update_project(&request).await
    } else {
        builds.create_project(&request).await
    }
    .map_err(|e| DeployError::creation(&label, e))?;

    let build_id = builds
        .start_build(project)
        .await
        .map_err(|e| DeployError::creation(&label, e))?;
    tracing::info!(project, build_id, "managed build started");

    let label = format!("build {build_id}");
    let poll = ctx.poll(PollConfig::provisioning());
    let id = build_id.as_str();
    wait(
        &label,
        &poll,
        move || async move {
            builds
                .get_build(id)
                .await
                .map(|found| ResourceState::from_lookup(found, |b| b.status.clone()))
        },
        |state: &ResourceState| state.is_in(&[BUILD_SUCCEEDED]),
        |state: &ResourceState| state.is_in(&BUILD_FAILED),
    )
    .await
    .into_result(&label, &poll)?;
    Ok(())
}

/// Creates or updates the service, then waits for it to run.
async fn deploy_service(ctx: &DeployContext, request: &ServiceRequest) -> Result<ServiceSummary> {
    let hosting = ctx.cloud.hosting.as_ref();
    let label = format!("service {}", request.name);

    let started = match hosting.find_service(&request.name).await? {
        Some(existing) => {
            tracing::info!(service = %request.name, "updating existing service");
            hosting.update_service(&existing.arn, request).await
        }
        None => {
            tracing::info!(service = %request.name, "creating service");
            hosting.create_service(request).await
        }
    }
    .map_err(|e| DeployError::creation(&label, e))?;

    let poll = ctx.poll(PollConfig::provisioning());
    let arn = started.arn.as_str();
    wait(
        &label,
        &poll,
        move || async move {
            hosting
                .describe_service(arn)
                .await
                .map(|found| ResourceState::from_lookup(found, |s| s.status.clone()))
        },
        |state: &ResourceState| state.is_in(&[SERVICE_RUNNING]),
        |state: &ResourceState| state.is_in(&SERVICE_FAILED),
    )
    .await
    .into_result(&label, &poll)?;

    let service = hosting
        .describe_service(arn)
        .await?
        .ok_or_else(|| DeployError::creation(&label, "vanished after reaching RUNNING"))?;
    tracing::info!(service = %service.name, url = ?service.url, "service running");
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, TestBed};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_local_build_uses_foundation_model_without_throughput() {
        let bed = TestBed::new().unwrap();
        bed.seed_knowledge_base();
        let ctx = bed.context();

        let output = AppStage.execute(&ctx).await.unwrap();

        assert_eq!(output.get_str("build"), Some("local"));
        assert_eq!(bed.pushed_images(), vec![output.get_str("image").unwrap().to_string()]);
        let env = bed
            .cloud()
            .service_environment(&ctx.config.app.service_name)
            .unwrap();
        assert_eq!(
            env["BEDROCK_MODEL_ARN"],
            "arn:aws:bedrock:us-east-1::foundation-model/amazon.nova-micro-v1:0"
        );
        assert_eq!(env["AWS_BEDROCK_MODE"], "1");
        assert_eq!(env["BEDROCK_KB_ID"], output.get_str("knowledge_base_id").unwrap());
    }

    #[tokio::test]
    async fn test_active_throughput_preferred() {
        let bed = TestBed::new().unwrap();
        bed.seed_knowledge_base();
        let pt_arn = bed.seed_active_throughput();
        let ctx = bed.context();

        let output = AppStage.execute(&ctx).await.unwrap();

        assert_eq!(output.get_str("model_arn"), Some(pt_arn.as_str()));
    }

    #[tokio::test]
    async fn test_managed_build_without_daemon() {
        let bed = TestBed::new().unwrap().without_image_daemon();
        bed.seed_knowledge_base();
        let ctx = bed.context();

        let output = AppStage.execute(&ctx).await.unwrap();

        assert_eq!(output.get_str("build"), Some("managed"));
        assert_eq!(bed.cloud().calls_to("create_project"), 1);
        assert_eq!(bed.cloud().calls_to("start_build"), 1);
        assert!(bed
            .cloud()
            .object(&ctx.config.buckets.deployment, "app-source/ofac-rag-app.zip")
            .is_some());
        assert!(bed.pushed_images().is_empty());
    }

    #[tokio::test]
    async fn test_failed_managed_build() {
        let bed = TestBed::new().unwrap().without_image_daemon();
        bed.seed_knowledge_base();
        bed.cloud().script(Scripted::Build, &["IN_PROGRESS", "FAULT"]);

        let err = AppStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "terminal_state");
        assert_eq!(bed.cloud().calls_to("create_service"), 0);
    }

    #[tokio::test]
    async fn test_rerun_updates_service() {
        let bed = TestBed::new().unwrap();
        bed.seed_knowledge_base();
        let ctx = bed.context();

        AppStage.execute(&ctx).await.unwrap();
        AppStage.execute(&ctx).await.unwrap();

        assert_eq!(bed.cloud().calls_to("create_service"), 1);
        assert_eq!(bed.cloud().calls_to("update_service"), 1);
        assert_eq!(bed.cloud().calls_to("create_repository"), 1);
    }

    #[tokio::test]
    async fn test_service_failure_is_terminal() {
        let bed = TestBed::new().unwrap();
        bed.seed_knowledge_base();
        bed.cloud()
            .script(Scripted::Service, &["OPERATION_IN_PROGRESS", "CREATE_FAILED"]);

        let err = AppStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "terminal_state");
    }

    #[tokio::test]
    async fn test_missing_knowledge_base() {
        let bed = TestBed::new().unwrap();

        let err = AppStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
    }
}

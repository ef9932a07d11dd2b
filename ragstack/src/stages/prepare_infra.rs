//! Deployment bucket, templates and the infrastructure stack.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;

use super::files::{files_under, has_extension};
use super::{Stage, StageOutput};
use crate::control::{CreateStackRequest, StackDescription};
use crate::core::StageName;
use crate::errors::{DeployError, Result};
use crate::pipeline::{ensure_bucket, wait, DeployContext, PollConfig, ResourceState};

const CAPABILITIES: [&str; 3] = [
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];

const TEMPLATE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Returns true for a settled, usable stack.
#[must_use]
pub fn is_stack_ready(status: &str) -> bool {
    matches!(status, "CREATE_COMPLETE" | "UPDATE_COMPLETE")
}

/// Returns true for a failed or rolled-back stack.
#[must_use]
pub fn is_stack_failed(status: &str) -> bool {
    status.ends_with("_FAILED") || status.contains("ROLLBACK")
}

/// Replaces bucket placeholders in template text.
#[derive(Debug, Clone)]
pub struct TemplateRewriter {
    rules: Vec<(Regex, String)>,
}

impl TemplateRewriter {
    /// Rules for `${DeploymentBucket}`/`__DEPLOYMENT_BUCKET__` and
    /// `${CorpusBucket}`/`__CORPUS_BUCKET__`.
    pub fn new(deployment_bucket: &str, corpus_bucket: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| DeployError::Config(format!("placeholder pattern: {e}")))
        };
        Ok(Self {
            rules: vec![
                (
                    compile(r"\$\{DeploymentBucket\}|__DEPLOYMENT_BUCKET__")?,
                    deployment_bucket.to_string(),
                ),
                (
                    compile(r"\$\{CorpusBucket\}|__CORPUS_BUCKET__")?,
                    corpus_bucket.to_string(),
                ),
            ],
        })
    }

    /// Rewrites one template.
    #[must_use]
    pub fn rewrite(&self, template: &str) -> String {
        self.rules
            .iter()
            .fold(template.to_string(), |text, (pattern, value)| {
                pattern.replace_all(&text, regex::NoExpand(value)).into_owned()
            })
    }
}

/// Uploads templates and artifacts, then creates the stack and waits for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareInfraStage;

#[async_trait]
impl Stage for PrepareInfraStage {
    fn name(&self) -> StageName {
        StageName::PrepareInfra
    }

    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput> {
        let config = &ctx.config;
        ensure_bucket(
            ctx.cloud.storage.as_ref(),
            &config.buckets.deployment,
            &config.region,
        )
        .await?;

        let artifacts = upload_artifacts(ctx).await?;
        let templates = upload_templates(ctx).await?;
        let (stack, created) = ensure_stack(ctx).await?;

        Ok(StageOutput::completed()
            .with("stack", json!(stack.name))
            .with("stack_id", json!(stack.stack_id))
            .with("stack_status", json!(stack.status))
            .with("created", json!(created))
            .with("templates", json!(templates))
            .with("artifacts", json!(artifacts)))
    }
}

async fn upload_artifacts(ctx: &DeployContext) -> Result<usize> {
    let dir = &ctx.config.paths.artifacts_dir;
    if !dir.is_dir() {
        tracing::info!(dir = %dir.display(), "no artifacts directory, nothing to upload");
        return Ok(0);
    }

    let files = files_under(dir, |_| true)?;
    for (path, key) in &files {
        let body = tokio::fs::read(path).await?;
        let key = format!("artifacts/{key}");
        ctx.cloud
            .storage
            .put_object(&ctx.config.buckets.deployment, &key, &body)
            .await?;
        tracing::debug!(key, bytes = body.len(), "uploaded artifact");
    }
    tracing::info!(count = files.len(), "artifacts uploaded");
    Ok(files.len())
}

async fn upload_templates(ctx: &DeployContext) -> Result<usize> {
    let config = &ctx.config;
    let dir = &config.paths.templates_dir;
    let root = dir.join(&config.paths.root_template);
    if !root.is_file() {
        return Err(DeployError::missing(
            format!("root template {}", root.display()),
            "set TEMPLATES_DIR and ROOT_TEMPLATE to the stack templates",
        ));
    }

    let rewriter = TemplateRewriter::new(&config.buckets.deployment, &config.buckets.corpus)?;
    let files = files_under(dir, |p| has_extension(p, &TEMPLATE_EXTENSIONS))?;
    for (path, key) in &files {
        let text = tokio::fs::read_to_string(path).await?;
        let key = format!("templates/{key}");
        ctx.cloud
            .storage
            .put_object(
                &config.buckets.deployment,
                &key,
                rewriter.rewrite(&text).as_bytes(),
            )
            .await?;
        tracing::debug!(key, "uploaded template");
    }
    tracing::info!(count = files.len(), "templates uploaded");
    Ok(files.len())
}

async fn ensure_stack(ctx: &DeployContext) -> Result<(StackDescription, bool)> {
    let config = &ctx.config;
    let stacks = ctx.cloud.stacks.as_ref();
    let name = &config.stack_name;
    let label = format!("stack {name}");

    let existing = stacks.describe_stack(name).await?;
    let created = match existing.as_ref().map(|s| s.status.as_str()) {
        Some(status) if is_stack_ready(status) => {
            tracing::info!(stack = %name, status, "stack already complete");
            false
        }
        Some(status) if is_stack_failed(status) => {
            return Err(DeployError::terminal(&label, status));
        }
        Some(status) if status != "DELETE_COMPLETE" => {
            tracing::info!(stack = %name, status, "stack operation in progress, waiting");
            false
        }
        _ => {
            let template_url = config.deployment_object_url(&config.root_template_key());
            stacks.validate_template(&template_url).await?;
            let request = CreateStackRequest {
                name: name.clone(),
                template_url,
                parameters: BTreeMap::new(),
                capabilities: CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
            };
            let stack_id = stacks
                .create_stack(&request)
                .await
                .map_err(|e| DeployError::creation(&label, e))?;
            tracing::info!(stack = %name, stack_id, "stack creation started");
            true
        }
    };

    let stack = wait_for_stack(ctx).await?;
    Ok((stack, created))
}

/// Blocks until the deployment stack is ready; a missing stack is a
/// prerequisite error.
pub(crate) async fn wait_for_stack(ctx: &DeployContext) -> Result<StackDescription> {
    let stacks = ctx.cloud.stacks.as_ref();
    let name = ctx.config.stack_name.as_str();
    let label = format!("stack {name}");
    let poll = ctx.poll(PollConfig::provisioning());

    wait(
        &label,
        &poll,
        move || async move {
            stacks
                .describe_stack(name)
                .await
                .map(|found| ResourceState::from_lookup(found, |s| s.status.clone()))
        },
        |state: &ResourceState| state.status().is_some_and(is_stack_ready),
        |state: &ResourceState| state.is_absent() || state.status().is_some_and(is_stack_failed),
    )
    .await
    .into_result(&label, &poll)?;

    stacks.describe_stack(name).await?.ok_or_else(|| {
        DeployError::missing(&label, "run `ragstack deploy embedding` to create the stack")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, TestBed};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rewriter_replaces_both_forms() {
        let rewriter = TemplateRewriter::new("deploy-b", "corpus-b").unwrap();
        let text = "Bucket: ${DeploymentBucket}\nAlt: __DEPLOYMENT_BUCKET__\nCorpus: ${CorpusBucket}/__CORPUS_BUCKET__\nKeep: ${Other}";

        assert_eq!(
            rewriter.rewrite(text),
            "Bucket: deploy-b\nAlt: deploy-b\nCorpus: corpus-b/corpus-b\nKeep: ${Other}"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(is_stack_ready("CREATE_COMPLETE"));
        assert!(!is_stack_ready("CREATE_IN_PROGRESS"));
        assert!(is_stack_failed("ROLLBACK_COMPLETE"));
        assert!(is_stack_failed("CREATE_FAILED"));
        assert!(is_stack_failed("UPDATE_ROLLBACK_IN_PROGRESS"));
        assert!(!is_stack_failed("DELETE_IN_PROGRESS"));
    }

    #[tokio::test]
    async fn test_creates_stack_and_uploads_rewritten_templates() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();

        let output = PrepareInfraStage.execute(&ctx).await.unwrap();

        assert_eq!(output.data["created"], json!(true));
        assert_eq!(output.get_str("stack_status"), Some("CREATE_COMPLETE"));
        assert_eq!(output.data["templates"], json!(2));
        assert_eq!(output.data["artifacts"], json!(1));

        let template = bed
            .cloud()
            .object(&ctx.config.buckets.deployment, "templates/main.yaml")
            .unwrap();
        let text = String::from_utf8(template).unwrap();
        assert!(text.contains(&ctx.config.buckets.deployment));
        assert!(text.contains(&ctx.config.buckets.corpus));
        assert!(!text.contains("${DeploymentBucket}"));
    }

    #[tokio::test]
    async fn test_rerun_reuses_complete_stack() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();

        PrepareInfraStage.execute(&ctx).await.unwrap();
        let second = PrepareInfraStage.execute(&ctx).await.unwrap();

        assert_eq!(second.data["created"], json!(false));
        assert_eq!(bed.cloud().calls_to("create_stack"), 1);
        assert_eq!(bed.cloud().calls_to("create_bucket"), 1);
    }

    #[tokio::test]
    async fn test_rolled_back_stack_is_terminal() {
        let bed = TestBed::new().unwrap();
        bed.cloud().put_stack(bed.stack_name(), "ROLLBACK_COMPLETE");

        let err = PrepareInfraStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "terminal_state");
        assert_eq!(bed.cloud().calls_to("create_stack"), 0);
    }

    #[tokio::test]
    async fn test_failed_creation_surfaces_state() {
        let bed = TestBed::new().unwrap();
        bed.cloud()
            .script(Scripted::Stack, &["CREATE_IN_PROGRESS", "ROLLBACK_IN_PROGRESS"]);

        let err = PrepareInfraStage.execute(&bed.context()).await.unwrap_err();
        match err {
            DeployError::TerminalState { state, .. } => assert_eq!(state, "ROLLBACK_IN_PROGRESS"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_root_template() {
        let bed = TestBed::new().unwrap();
        std::fs::remove_file(bed.config().paths.templates_dir.join("main.yaml")).unwrap();

        let err = PrepareInfraStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
        assert_eq!(bed.cloud().calls_to("create_stack"), 0);
    }
}

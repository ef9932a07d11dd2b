//! Ingestion jobs for every discovered knowledge-base data source.

use async_trait::async_trait;
use serde_json::json;

use super::prepare_infra::wait_for_stack;
use super::{Stage, StageOutput};
use crate::core::StageName;
use crate::errors::{DeployError, Result};
use crate::pipeline::DeployContext;

/// Walks the stack graph and starts ingestion for matched data sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingStage;

#[async_trait]
impl Stage for EmbeddingStage {
    fn name(&self) -> StageName {
        StageName::Embedding
    }

    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput> {
        let stack = &ctx.config.stack_name;
        if ctx.cloud.stacks.describe_stack(stack).await?.is_none() {
            return Err(DeployError::missing(
                format!("stack {stack}"),
                "run `ragstack deploy embedding` to create it",
            ));
        }
        wait_for_stack(ctx).await?;

        let inventory = ctx.walker().walk(stack).await?;
        let pairs = inventory.match_pairs();
        for pair in &pairs.skipped {
            tracing::warn!(
                knowledge_base = %pair.knowledge_base_id,
                data_source = %pair.data_source_id,
                "data source's knowledge base not found in this stack, skipping"
            );
        }
        if pairs.matched.is_empty() {
            tracing::warn!(stack = %stack, "no knowledge-base data sources to ingest");
        }

        let mut jobs = Vec::with_capacity(pairs.matched.len());
        for pair in &pairs.matched {
            let job = ctx
                .cloud
                .knowledge_bases
                .start_ingestion_job(pair)
                .await?;
            tracing::info!(pair = %pair, job_id = %job.job_id, status = %job.status, "ingestion started");
            jobs.push(json!({"pair": pair.to_string(), "job_id": job.job_id}));
        }

        Ok(StageOutput::completed()
            .with("resources", json!(inventory.len()))
            .with("knowledge_bases", json!(inventory.knowledge_base_ids()))
            .with("started", json!(jobs.len()))
            .with(
                "skipped",
                json!(pairs
                    .skipped
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()),
            )
            .with("jobs", json!(jobs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PrepareInfraStage;
    use crate::testing::TestBed;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_starts_one_job_per_matched_pair() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        PrepareInfraStage.execute(&ctx).await.unwrap();

        let output = EmbeddingStage.execute(&ctx).await.unwrap();

        assert_eq!(output.data["started"], json!(1));
        assert_eq!(output.data["skipped"].as_array().map(Vec::len), Some(1));
        assert_eq!(bed.cloud().calls_to("start_ingestion_job"), 1);
    }

    #[tokio::test]
    async fn test_missing_stack() {
        let bed = TestBed::new().unwrap();

        let err = EmbeddingStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
    }

    #[tokio::test]
    async fn test_ingestion_error_is_fatal() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        PrepareInfraStage.execute(&ctx).await.unwrap();
        bed.cloud().fail_on("start_ingestion_job");

        let err = EmbeddingStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), "control_plane");
    }
}

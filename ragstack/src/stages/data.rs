//! Source documents and the pre-chunked corpus.

use async_trait::async_trait;
use serde_json::json;

use super::files::{files_under, has_extension};
use super::{Stage, StageOutput};
use crate::collaborators::IngestRequest;
use crate::core::StageName;
use crate::errors::{DeployError, Result};
use crate::pipeline::{ensure_bucket, DeployContext};

/// Uploads raw documents and runs corpus ingestion.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataStage;

#[async_trait]
impl Stage for DataStage {
    fn name(&self) -> StageName {
        StageName::Data
    }

    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput> {
        let config = &ctx.config;
        let storage = ctx.cloud.storage.as_ref();

        ensure_bucket(storage, &config.buckets.source, &config.region).await?;
        let (uploaded, skipped) = upload_documents(ctx).await?;

        ensure_bucket(storage, &config.buckets.corpus, &config.region).await?;
        ctx.collaborators
            .ingestor
            .ingest(&IngestRequest {
                source_bucket: config.buckets.source.clone(),
                corpus_bucket: config.buckets.corpus.clone(),
                context: ctx.cloud_context(),
            })
            .await?;

        let corpus = storage
            .list_objects(&config.buckets.corpus, None, None)
            .await?;
        if corpus.items.is_empty() {
            return Err(DeployError::creation(
                format!("corpus in bucket {}", config.buckets.corpus),
                "ingestion finished but the bucket is empty",
            ));
        }
        tracing::info!(
            bucket = %config.buckets.corpus,
            objects = corpus.items.len(),
            "corpus ready"
        );

        Ok(StageOutput::completed()
            .with("uploaded", json!(uploaded))
            .with("already_present", json!(skipped))
            .with("corpus_bucket", json!(config.buckets.corpus)))
    }
}

/// Uploads every PDF under the data directory, skipping objects that
/// already exist.
async fn upload_documents(ctx: &DeployContext) -> Result<(usize, usize)> {
    let config = &ctx.config;
    let dir = &config.paths.data_dir;
    if !dir.is_dir() {
        return Err(DeployError::missing(
            format!("data directory {}", dir.display()),
            "set DATA_DIR to the folder of source PDFs",
        ));
    }

    let storage = ctx.cloud.storage.as_ref();
    let bucket = &config.buckets.source;
    let files = files_under(dir, |p| has_extension(p, &["pdf"]))?;
    if files.is_empty() {
        tracing::warn!(dir = %dir.display(), "no PDF documents found");
    }

    let (mut uploaded, mut skipped) = (0, 0);
    for (path, key) in files {
        if storage.object_exists(bucket, &key).await? {
            tracing::debug!(key, "document already uploaded");
            skipped += 1;
            continue;
        }
        let body = tokio::fs::read(&path).await?;
        storage.put_object(bucket, &key, &body).await?;
        tracing::info!(key, bytes = body.len(), "document uploaded");
        uploaded += 1;
    }
    Ok((uploaded, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBed;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_uploads_documents_and_fills_corpus() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();

        let output = DataStage.execute(&ctx).await.unwrap();

        assert_eq!(output.data["uploaded"], json!(2));
        assert_eq!(output.data["already_present"], json!(0));
        assert_eq!(
            bed.cloud().object_keys(&ctx.config.buckets.source),
            vec!["annex/sanctions.PDF".to_string(), "guide.pdf".to_string()]
        );
        assert!(!bed.cloud().object_keys(&ctx.config.buckets.corpus).is_empty());
        assert_eq!(bed.ingest_calls(), 1);
    }

    #[tokio::test]
    async fn test_rerun_skips_existing_documents() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();

        DataStage.execute(&ctx).await.unwrap();
        let puts = bed.cloud().calls_to("put_object");
        let second = DataStage.execute(&ctx).await.unwrap();

        assert_eq!(second.data["uploaded"], json!(0));
        assert_eq!(second.data["already_present"], json!(2));
        assert_eq!(bed.cloud().calls_to("put_object"), puts);
        assert_eq!(bed.ingest_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_corpus_is_creation_error() {
        let bed = TestBed::new().unwrap().with_silent_ingestor();

        let err = DataStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "creation");
    }

    #[tokio::test]
    async fn test_missing_data_directory() {
        let bed = TestBed::new().unwrap();
        std::fs::remove_dir_all(&bed.config().paths.data_dir).unwrap();

        let err = DataStage.execute(&bed.context()).await.unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
    }
}

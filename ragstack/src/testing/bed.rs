//! A ready-made deployment context over the in-memory cloud.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::InMemoryCloud;
use crate::collaborators::{
    Collaborators, CorpusIngestor, ImageBuilder, ImageRequest, IngestRequest, SourcePackager,
    TuningDataGenerator, TuningDataRequest,
};
use crate::config::{ConfigSource, DeployConfig};
use crate::confirm::{AutoConfirm, Confirmer};
use crate::control::ControlPlane;
use crate::errors::{DeployError, Result};
use crate::pipeline::DeployContext;

const ROOT_TEMPLATE: &str = "\
AWSTemplateFormatVersion: '2010-09-09'
Resources:
  SearchStack:
    Type: AWS::CloudFormation::Stack
    Properties:
      TemplateURL: https://${DeploymentBucket}.s3.amazonaws.com/templates/nested/search.yaml
  CorpusBucketPolicy:
    Type: AWS::S3::BucketPolicy
    Properties:
      Bucket: ${CorpusBucket}
      Artifacts: __DEPLOYMENT_BUCKET__
";

const NESTED_TEMPLATE: &str = "\
Resources:
  VectorCollection:
    Type: AWS::OpenSearchServerless::Collection
";

/// Writes fake corpus files next to every uploaded document.
#[derive(Debug)]
pub struct FakeIngestor {
    cloud: Arc<InMemoryCloud>,
    silent: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl CorpusIngestor for FakeIngestor {
    async fn ingest(&self, request: &IngestRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.silent {
            return Ok(());
        }
        for key in self.cloud.object_keys(&request.source_bucket) {
            let chunk = format!("{{\"source\": \"{key}\", \"text\": \"chunk\"}}\n");
            self.cloud.put_object_now(
                &request.corpus_bucket,
                &format!("chunks/{key}.jsonl"),
                chunk.as_bytes(),
            );
        }
        Ok(())
    }
}

/// Writes a one-line dataset.
#[derive(Debug)]
pub struct FakeTuningGenerator {
    cloud: Arc<InMemoryCloud>,
}

#[async_trait]
impl TuningDataGenerator for FakeTuningGenerator {
    async fn generate(&self, request: &TuningDataRequest) -> Result<()> {
        self.cloud.put_object_now(
            &request.tuning_bucket,
            &request.key,
            b"{\"prompt\": \"q\", \"completion\": \"a\"}\n",
        );
        Ok(())
    }
}

/// Records pushes and stores an image digest in the repository.
#[derive(Debug)]
pub struct FakeImageBuilder {
    cloud: Arc<InMemoryCloud>,
    available: bool,
    pushed: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageBuilder for FakeImageBuilder {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn build_and_push(&self, request: &ImageRequest) -> Result<()> {
        let repository = request
            .image
            .rsplit_once(':')
            .map_or(request.image.as_str(), |(name, _)| name)
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let mut pushed = self.pushed.lock();
        pushed.push(request.image.clone());
        self.cloud
            .put_image(repository, &format!("sha256:{:064x}", pushed.len()));
        Ok(())
    }
}

/// Returns a fixed archive for any existing directory.
#[derive(Debug)]
pub struct FakePackager {
    tool_installed: bool,
}

impl Default for FakePackager {
    fn default() -> Self {
        Self {
            tool_installed: true,
        }
    }
}

#[async_trait]
impl SourcePackager for FakePackager {
    async fn check(&self) -> Result<()> {
        if self.tool_installed {
            Ok(())
        } else {
            Err(DeployError::missing("zip", "install zip to package the app source"))
        }
    }

    async fn package(&self, dir: &Path) -> Result<Vec<u8>> {
        self.check().await?;
        if !dir.is_dir() {
            return Err(DeployError::missing(
                format!("application directory {}", dir.display()),
                "set APP_DIR",
            ));
        }
        Ok(b"PK\x05\x06fake-archive".to_vec())
    }
}

/// A temporary workspace, an in-memory cloud and fake collaborators wired
/// into a [`DeployContext`].
///
/// The workspace holds two PDFs, a root and a nested template, one artifact
/// and an application directory. Polls never sleep and every gate is
/// pre-approved.
#[derive(Debug)]
pub struct TestBed {
    cloud: Arc<InMemoryCloud>,
    config: DeployConfig,
    ingestor: Arc<FakeIngestor>,
    images: Arc<FakeImageBuilder>,
    packager: Arc<FakePackager>,
    _workspace: TempDir,
}

impl TestBed {
    /// Builds the workspace and configuration.
    pub fn new() -> Result<Self> {
        let workspace = tempfile::tempdir()?;
        let root = workspace.path();
        write(root, "data/guide.pdf", b"%PDF-1.4 guide")?;
        write(root, "data/annex/sanctions.PDF", b"%PDF-1.4 annex")?;
        write(root, "data/notes.txt", b"not a pdf")?;
        write(root, "infra/main.yaml", ROOT_TEMPLATE.as_bytes())?;
        write(root, "infra/nested/search.yaml", NESTED_TEMPLATE.as_bytes())?;
        write(root, "build/ingest.zip", b"PK\x05\x06")?;
        write(root, "app/Dockerfile", b"FROM python:3.12-slim\n")?;

        let dir = |name: &str| root.join(name).display().to_string();
        let source = ConfigSource::from_pairs([
            ("AWS_REGION", "us-east-1".to_string()),
            ("DATA_DIR", dir("data")),
            ("TEMPLATES_DIR", dir("infra")),
            ("ARTIFACTS_DIR", dir("build")),
            ("APP_DIR", dir("app")),
        ]);

        let cloud = Arc::new(InMemoryCloud::new());
        let config = DeployConfig::resolve(&source, cloud.account())?
            .with_poll_interval(Duration::ZERO)
            .with_auto_approve(true);

        Ok(Self {
            ingestor: Arc::new(FakeIngestor {
                cloud: cloud.clone(),
                silent: false,
                calls: AtomicUsize::new(0),
            }),
            images: Arc::new(FakeImageBuilder {
                cloud: cloud.clone(),
                available: true,
                pushed: Mutex::new(Vec::new()),
            }),
            packager: Arc::new(FakePackager::default()),
            cloud,
            config,
            _workspace: workspace,
        })
    }

    /// Ingestion runs but writes nothing.
    #[must_use]
    pub fn with_silent_ingestor(mut self) -> Self {
        self.ingestor = Arc::new(FakeIngestor {
            cloud: self.cloud.clone(),
            silent: true,
            calls: AtomicUsize::new(0),
        });
        self
    }

    /// No local image daemon; the managed build path is taken.
    #[must_use]
    pub fn without_image_daemon(mut self) -> Self {
        self.images = Arc::new(FakeImageBuilder {
            cloud: self.cloud.clone(),
            available: false,
            pushed: Mutex::new(Vec::new()),
        });
        self
    }

    /// The archive tool is not installed.
    #[must_use]
    pub fn without_zip(mut self) -> Self {
        self.packager = Arc::new(FakePackager {
            tool_installed: false,
        });
        self
    }

    /// A context with every gate pre-approved.
    #[must_use]
    pub fn context(&self) -> DeployContext {
        self.context_with(Arc::new(AutoConfirm(true)))
    }

    /// A context with a specific confirmer.
    #[must_use]
    pub fn context_with(&self, confirmer: Arc<dyn Confirmer>) -> DeployContext {
        let collaborators = Collaborators {
            ingestor: self.ingestor.clone(),
            tuning: Arc::new(FakeTuningGenerator {
                cloud: self.cloud.clone(),
            }),
            images: self.images.clone(),
            packager: self.packager.clone(),
        };
        DeployContext::new(
            self.config.clone(),
            ControlPlane::uniform(self.cloud.clone()),
            collaborators,
            confirmer,
        )
    }

    /// The in-memory cloud.
    #[must_use]
    pub fn cloud(&self) -> &Arc<InMemoryCloud> {
        &self.cloud
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// The deployment stack name.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.config.stack_name
    }

    /// Times ingestion ran.
    #[must_use]
    pub fn ingest_calls(&self) -> usize {
        self.ingestor.calls.load(Ordering::SeqCst)
    }

    /// Images pushed by the local builder.
    #[must_use]
    pub fn pushed_images(&self) -> Vec<String> {
        self.images.pushed.lock().clone()
    }

    /// Registers a knowledge base named after the stack; returns its id.
    pub fn seed_knowledge_base(&self) -> String {
        let id = "kb-seeded".to_string();
        self.cloud
            .put_knowledge_base(&id, &self.config.naming.knowledge_base_name());
        id
    }

    /// Registers today's custom model with an in-service throughput;
    /// returns the throughput ARN.
    pub fn seed_active_throughput(&self) -> String {
        let naming = &self.config.naming;
        let prefix = &self.config.model.prefix;
        let model = self.cloud.put_custom_model(&naming.custom_model_name(prefix));
        self.cloud
            .put_throughput(
                &naming.provisioned_throughput_name(prefix),
                &model.arn,
                "InService",
            )
            .arn
    }
}

fn write(root: &Path, relative: &str, body: &[u8]) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bed_resolves_paths_inside_workspace() {
        let bed = TestBed::new().unwrap();
        let config = bed.config();

        assert!(config.paths.data_dir.join("guide.pdf").is_file());
        assert!(config.paths.templates_dir.join("main.yaml").is_file());
        assert_eq!(config.poll_interval(), Duration::ZERO);
        assert_eq!(bed.stack_name(), "ofac-rag");
    }

    #[tokio::test]
    async fn test_packager_requires_directory() {
        let err = FakePackager::default()
            .package(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
    }
}

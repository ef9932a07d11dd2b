//! External data collaborators.
//!
//! Corpus chunking, tuning-data generation and image building happen outside
//! this crate. Stages reach them through the traits below; the default
//! implementations run configured commands.

mod command;
mod image;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{CollaboratorConfig, DeployConfig};
use crate::errors::Result;

pub use command::{CommandIngestor, CommandTuningGenerator};
pub use image::{DockerImageBuilder, ZipPackager};

/// Region and credentials context handed to a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudContext {
    /// Region.
    pub region: String,
    /// Credential profile.
    pub profile: Option<String>,
}

impl CloudContext {
    /// Context of a deployment.
    #[must_use]
    pub fn of(config: &DeployConfig) -> Self {
        Self {
            region: config.region.clone(),
            profile: config.profile.clone(),
        }
    }
}

/// Input/output buckets for corpus ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Bucket holding raw documents.
    pub source_bucket: String,
    /// Bucket receiving pre-chunked corpus files.
    pub corpus_bucket: String,
    /// Cloud context.
    pub context: CloudContext,
}

/// Location of the tuning dataset to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningDataRequest {
    /// Bucket holding the corpus to sample from.
    pub corpus_bucket: String,
    /// Bucket receiving the dataset.
    pub tuning_bucket: String,
    /// Object key of the dataset.
    pub key: String,
    /// Cloud context.
    pub context: CloudContext,
}

/// A container image to build and push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Build context directory.
    pub context_dir: PathBuf,
    /// Full image reference, `registry/repo:tag`.
    pub image: String,
    /// Registry host to log in to.
    pub registry: String,
    /// Registry password.
    pub password: String,
}

/// Turns raw documents into corpus files.
#[async_trait]
pub trait CorpusIngestor: Send + Sync {
    /// Runs ingestion; returns once corpus files are written.
    async fn ingest(&self, request: &IngestRequest) -> Result<()>;
}

/// Produces the fine-tuning dataset.
#[async_trait]
pub trait TuningDataGenerator: Send + Sync {
    /// Writes the dataset to `request.tuning_bucket/request.key`.
    async fn generate(&self, request: &TuningDataRequest) -> Result<()>;
}

/// Builds and pushes container images locally.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Returns true if a local build daemon is usable.
    async fn is_available(&self) -> bool;

    /// Builds `request.image` from `request.context_dir` and pushes it.
    async fn build_and_push(&self, request: &ImageRequest) -> Result<()>;
}

/// Archives a build context for a managed build.
#[async_trait]
pub trait SourcePackager: Send + Sync {
    /// Returns the archive bytes.
    async fn package(&self, dir: &Path) -> Result<Vec<u8>>;

    /// Fails with a missing-prerequisite error when packaging cannot run.
    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Handles to every collaborator.
#[derive(Clone)]
pub struct Collaborators {
    /// Corpus ingestion.
    pub ingestor: Arc<dyn CorpusIngestor>,
    /// Tuning-data generation.
    pub tuning: Arc<dyn TuningDataGenerator>,
    /// Local image builds.
    pub images: Arc<dyn ImageBuilder>,
    /// Source archives for managed builds.
    pub packager: Arc<dyn SourcePackager>,
}

impl Collaborators {
    /// Command-backed collaborators.
    pub fn from_config(config: &CollaboratorConfig) -> Result<Self> {
        Ok(Self {
            ingestor: Arc::new(CommandIngestor::parse(&config.ingest_command)?),
            tuning: Arc::new(CommandTuningGenerator::parse(&config.tuning_data_command)?),
            images: Arc::new(DockerImageBuilder::new()),
            packager: Arc::new(ZipPackager::new()),
        })
    }

    /// Verifies the tools an image build will need: none with a local
    /// daemon, the packager's otherwise.
    pub async fn check_image_prerequisites(&self) -> Result<()> {
        if self.images.is_available().await {
            return Ok(());
        }
        self.packager.check().await
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

//! Control-plane seams.
//!
//! Every external service the orchestrator drives is reached through one
//! `async_trait` trait. Existence checks return `Ok(None)`/`Ok(false)` for an
//! absent resource; only genuine failures surface as errors.

mod aws_cli;
mod types;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::core::DataSourcePair;
use crate::errors::ControlPlaneResult;

pub use aws_cli::AwsCli;
pub use types::{
    BuildProjectRequest, BuildStatus, CollectionSummary, CreateStackRequest, CustomModelSummary,
    CustomizationJob, CustomizationJobRequest, DataSourceSummary, IngestionJobSummary,
    KnowledgeBaseSummary, Page, ProvisionRequest, ProvisionedThroughput, RepositorySummary,
    RoleSummary, ServiceRequest, ServiceSummary, StackDescription, StackResourceSummary,
};

/// Declarative stack service.
#[async_trait]
pub trait StackService: Send + Sync {
    /// Describes a stack; `None` when it does not exist.
    async fn describe_stack(&self, name: &str) -> ControlPlaneResult<Option<StackDescription>>;

    /// Validates a template by URL.
    async fn validate_template(&self, template_url: &str) -> ControlPlaneResult<()>;

    /// Starts a stack creation and returns the stack id.
    async fn create_stack(&self, request: &CreateStackRequest) -> ControlPlaneResult<String>;

    /// Starts a stack deletion.
    async fn delete_stack(&self, name: &str) -> ControlPlaneResult<()>;

    /// Lists one page of a stack's resources.
    async fn list_stack_resources(
        &self,
        stack: &str,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<StackResourceSummary>>;
}

/// Object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Returns true if the bucket exists and is reachable.
    async fn bucket_exists(&self, bucket: &str) -> ControlPlaneResult<bool>;

    /// Creates a bucket, with a location constraint outside the default region.
    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> ControlPlaneResult<()>;

    /// Returns true if the object exists.
    async fn object_exists(&self, bucket: &str, key: &str) -> ControlPlaneResult<bool>;

    /// Uploads an object.
    async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> ControlPlaneResult<()>;

    /// Lists one page of object keys.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<String>>;

    /// Deletes one object.
    async fn delete_object(&self, bucket: &str, key: &str) -> ControlPlaneResult<()>;

    /// Recursively deletes every object in the bucket.
    async fn empty_bucket(&self, bucket: &str) -> ControlPlaneResult<()>;

    /// Deletes an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> ControlPlaneResult<()>;
}

/// Managed knowledge-base service.
#[async_trait]
pub trait KnowledgeBaseService: Send + Sync {
    /// Lists one page of knowledge bases.
    async fn list_knowledge_bases(
        &self,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<KnowledgeBaseSummary>>;

    /// Gets a knowledge base.
    async fn get_knowledge_base(&self, id: &str)
        -> ControlPlaneResult<Option<KnowledgeBaseSummary>>;

    /// Deletes a knowledge base.
    async fn delete_knowledge_base(&self, id: &str) -> ControlPlaneResult<()>;

    /// Lists one page of a knowledge base's data sources.
    async fn list_data_sources(
        &self,
        knowledge_base_id: &str,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<DataSourceSummary>>;

    /// Gets a data source.
    async fn get_data_source(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<Option<DataSourceSummary>>;

    /// Deletes a data source.
    async fn delete_data_source(&self, pair: &DataSourcePair) -> ControlPlaneResult<()>;

    /// Starts an ingestion job for a data source.
    async fn start_ingestion_job(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<IngestionJobSummary>;

    /// Lists ingestion jobs of a data source.
    async fn list_ingestion_jobs(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<Vec<IngestionJobSummary>>;
}

/// Vector-search collections.
#[async_trait]
pub trait VectorSearchService: Send + Sync {
    /// Lists collections whose name starts with `name_prefix`.
    async fn list_collections(&self, name_prefix: &str)
        -> ControlPlaneResult<Vec<CollectionSummary>>;

    /// Gets a collection by id.
    async fn get_collection(&self, id: &str) -> ControlPlaneResult<Option<CollectionSummary>>;

    /// Deletes a collection.
    async fn delete_collection(&self, id: &str) -> ControlPlaneResult<()>;
}

/// Model customization (fine-tuning).
#[async_trait]
pub trait ModelCustomizationService: Send + Sync {
    /// Resolves a foundation model id to its ARN; `None` if unavailable.
    async fn get_foundation_model(&self, model_id: &str) -> ControlPlaneResult<Option<String>>;

    /// Lists custom models whose name contains `name_contains`.
    async fn list_custom_models(
        &self,
        name_contains: &str,
    ) -> ControlPlaneResult<Vec<CustomModelSummary>>;

    /// Gets a custom model by name or ARN.
    async fn get_custom_model(&self, id: &str) -> ControlPlaneResult<Option<CustomModelSummary>>;

    /// Deletes a custom model.
    async fn delete_custom_model(&self, id: &str) -> ControlPlaneResult<()>;

    /// Submits a fine-tuning job and returns its ARN.
    async fn create_customization_job(
        &self,
        request: &CustomizationJobRequest,
    ) -> ControlPlaneResult<String>;

    /// Gets a fine-tuning job by name or ARN.
    async fn get_customization_job(&self, id: &str)
        -> ControlPlaneResult<Option<CustomizationJob>>;

    /// Lists fine-tuning jobs whose name contains `name_contains`.
    async fn list_customization_jobs(
        &self,
        name_contains: &str,
    ) -> ControlPlaneResult<Vec<CustomizationJob>>;
}

/// Provisioned inference capacity.
#[async_trait]
pub trait InferenceProvisioningService: Send + Sync {
    /// Requests a provisioned throughput and returns its ARN.
    async fn create_provisioned_throughput(
        &self,
        request: &ProvisionRequest,
    ) -> ControlPlaneResult<String>;

    /// Gets a provisioned throughput by name or ARN.
    async fn get_provisioned_throughput(
        &self,
        id: &str,
    ) -> ControlPlaneResult<Option<ProvisionedThroughput>>;

    /// Deletes a provisioned throughput.
    async fn delete_provisioned_throughput(&self, id: &str) -> ControlPlaneResult<()>;

    /// Lists every provisioned throughput in the region.
    async fn list_provisioned_throughputs(&self) -> ControlPlaneResult<Vec<ProvisionedThroughput>>;
}

/// Identity and access management.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Account id of the calling credentials.
    async fn account_id(&self) -> ControlPlaneResult<String>;

    /// Gets a role.
    async fn get_role(&self, name: &str) -> ControlPlaneResult<Option<RoleSummary>>;

    /// Creates a role with a trust policy.
    async fn create_role(
        &self,
        name: &str,
        trust_policy: &Value,
        description: &str,
    ) -> ControlPlaneResult<RoleSummary>;

    /// Deletes a role with no policies left.
    async fn delete_role(&self, name: &str) -> ControlPlaneResult<()>;

    /// Writes an inline policy.
    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        document: &Value,
    ) -> ControlPlaneResult<()>;

    /// Lists inline policy names.
    async fn list_role_policies(&self, role: &str) -> ControlPlaneResult<Vec<String>>;

    /// Deletes an inline policy.
    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> ControlPlaneResult<()>;

    /// Attaches a managed policy.
    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ControlPlaneResult<()>;

    /// Lists attached managed policy ARNs.
    async fn list_attached_role_policies(&self, role: &str) -> ControlPlaneResult<Vec<String>>;

    /// Detaches a managed policy.
    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ControlPlaneResult<()>;
}

/// Container image registry.
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Describes a repository.
    async fn describe_repository(&self, name: &str)
        -> ControlPlaneResult<Option<RepositorySummary>>;

    /// Creates a repository.
    async fn create_repository(&self, name: &str) -> ControlPlaneResult<RepositorySummary>;

    /// Lists image digests in a repository.
    async fn list_images(&self, name: &str) -> ControlPlaneResult<Vec<String>>;

    /// Deletes images by digest.
    async fn delete_images(&self, name: &str, digests: &[String]) -> ControlPlaneResult<()>;

    /// Deletes an empty repository.
    async fn delete_repository(&self, name: &str) -> ControlPlaneResult<()>;

    /// Short-lived password for `docker login`.
    async fn login_password(&self) -> ControlPlaneResult<String>;
}

/// Managed build service.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Returns true if the project exists.
    async fn project_exists(&self, name: &str) -> ControlPlaneResult<bool>;

    /// Creates a project.
    async fn create_project(&self, request: &BuildProjectRequest) -> ControlPlaneResult<()>;

    /// Updates a project.
    async fn update_project(&self, request: &BuildProjectRequest) -> ControlPlaneResult<()>;

    /// Starts a build and returns its id.
    async fn start_build(&self, project: &str) -> ControlPlaneResult<String>;

    /// Gets a build's status.
    async fn get_build(&self, id: &str) -> ControlPlaneResult<Option<BuildStatus>>;

    /// Deletes a project.
    async fn delete_project(&self, name: &str) -> ControlPlaneResult<()>;
}

/// Hosted application service.
#[async_trait]
pub trait HostingService: Send + Sync {
    /// Finds a service by name through the service listing.
    async fn find_service(&self, name: &str) -> ControlPlaneResult<Option<ServiceSummary>>;

    /// Describes a service by ARN.
    async fn describe_service(&self, arn: &str) -> ControlPlaneResult<Option<ServiceSummary>>;

    /// Creates a service.
    async fn create_service(&self, request: &ServiceRequest) -> ControlPlaneResult<ServiceSummary>;

    /// Updates a service in place.
    async fn update_service(
        &self,
        arn: &str,
        request: &ServiceRequest,
    ) -> ControlPlaneResult<ServiceSummary>;

    /// Deletes a service.
    async fn delete_service(&self, arn: &str) -> ControlPlaneResult<()>;
}

/// A client that implements every service seam.
pub trait CloudClient:
    StackService
    + ObjectStorage
    + KnowledgeBaseService
    + VectorSearchService
    + ModelCustomizationService
    + InferenceProvisioningService
    + IdentityService
    + ContainerRegistry
    + BuildService
    + HostingService
{
}

impl<T> CloudClient for T where
    T: StackService
        + ObjectStorage
        + KnowledgeBaseService
        + VectorSearchService
        + ModelCustomizationService
        + InferenceProvisioningService
        + IdentityService
        + ContainerRegistry
        + BuildService
        + HostingService
{
}

/// Handles to every control-plane service.
#[derive(Clone)]
pub struct ControlPlane {
    /// Stack service.
    pub stacks: Arc<dyn StackService>,
    /// Object storage.
    pub storage: Arc<dyn ObjectStorage>,
    /// Knowledge bases.
    pub knowledge_bases: Arc<dyn KnowledgeBaseService>,
    /// Vector search.
    pub vector_search: Arc<dyn VectorSearchService>,
    /// Model customization.
    pub models: Arc<dyn ModelCustomizationService>,
    /// Provisioned throughput.
    pub throughput: Arc<dyn InferenceProvisioningService>,
    /// Identity.
    pub identity: Arc<dyn IdentityService>,
    /// Container registry.
    pub registry: Arc<dyn ContainerRegistry>,
    /// Managed builds.
    pub builds: Arc<dyn BuildService>,
    /// Hosted services.
    pub hosting: Arc<dyn HostingService>,
}

impl ControlPlane {
    /// Routes every service to one client.
    #[must_use]
    pub fn uniform<C>(client: Arc<C>) -> Self
    where
        C: CloudClient + 'static,
    {
        Self {
            stacks: client.clone(),
            storage: client.clone(),
            knowledge_bases: client.clone(),
            vector_search: client.clone(),
            models: client.clone(),
            throughput: client.clone(),
            identity: client.clone(),
            registry: client.clone(),
            builds: client.clone(),
            hosting: client,
        }
    }
}

impl fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlane").finish_non_exhaustive()
    }
}

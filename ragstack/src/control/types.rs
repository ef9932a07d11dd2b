//! Request and response shapes exchanged with the control plane.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// A final page.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    /// A page followed by more.
    #[must_use]
    pub fn more(items: Vec<T>, next_token: impl Into<String>) -> Self {
        Self {
            items,
            next_token: Some(next_token.into()),
        }
    }
}

/// Current description of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    /// Stack name.
    pub name: String,
    /// Stack id.
    pub stack_id: String,
    /// Lifecycle status, e.g. `CREATE_COMPLETE`.
    pub status: String,
    /// Reason attached to the status, if any.
    pub status_reason: Option<String>,
}

/// One entry of a stack's resource listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResourceSummary {
    /// Template-declared name.
    pub logical_id: String,
    /// Assigned identifier, possibly empty.
    pub physical_id: String,
    /// Raw resource type tag.
    pub resource_type: String,
    /// Lifecycle status.
    pub status: String,
}

/// Parameters of a stack creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStackRequest {
    /// Stack name.
    pub name: String,
    /// URL of the root template.
    pub template_url: String,
    /// Template parameters.
    pub parameters: BTreeMap<String, String>,
    /// Acknowledged capabilities.
    pub capabilities: Vec<String>,
}

/// A knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    /// Id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Status, e.g. `ACTIVE`.
    pub status: String,
}

/// A knowledge-base data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceSummary {
    /// Id.
    pub id: String,
    /// Owning knowledge base.
    pub knowledge_base_id: String,
    /// Name.
    pub name: String,
    /// Status, e.g. `AVAILABLE`.
    pub status: String,
}

/// An ingestion job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJobSummary {
    /// Job id.
    pub job_id: String,
    /// Status, e.g. `STARTING`.
    pub status: String,
}

/// A vector-search collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// Id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Status, e.g. `ACTIVE`.
    pub status: String,
}

/// A custom model produced by fine-tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomModelSummary {
    /// ARN.
    pub arn: String,
    /// Name.
    pub name: String,
}

/// A fine-tuning job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomizationJob {
    /// Job ARN.
    pub arn: String,
    /// Job name.
    pub name: String,
    /// Status: `InProgress`, `Completed`, `Failed`, `Stopping`, `Stopped`.
    pub status: String,
    /// Output model ARN, once known.
    pub output_model_arn: Option<String>,
    /// Output model name.
    pub output_model_name: Option<String>,
    /// Failure message for failed jobs.
    pub failure_message: Option<String>,
}

/// Parameters of a fine-tuning job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomizationJobRequest {
    /// Job name.
    pub job_name: String,
    /// Name of the resulting custom model.
    pub custom_model_name: String,
    /// Role assumed by the customization service.
    pub role_arn: String,
    /// Base model identifier.
    pub base_model_id: String,
    /// `s3://` URI of the training dataset.
    pub training_data_uri: String,
    /// `s3://` URI for job outputs.
    pub output_data_uri: String,
    /// Hyperparameters.
    pub hyperparameters: BTreeMap<String, String>,
    /// Idempotency token.
    pub client_token: String,
}

/// A provisioned-throughput allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedThroughput {
    /// ARN.
    pub arn: String,
    /// Name.
    pub name: String,
    /// Model the allocation serves.
    pub model_arn: String,
    /// Status: `Creating`, `InService`, `Updating`, `Failed`.
    pub status: String,
    /// Failure message, if any.
    pub failure_message: Option<String>,
}

/// Parameters of a provisioned-throughput request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Allocation name.
    pub name: String,
    /// Model to serve.
    pub model_arn: String,
    /// Model units.
    pub model_units: u32,
    /// Idempotency token.
    pub client_token: String,
}

/// An identity role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    /// Role name.
    pub name: String,
    /// Role ARN.
    pub arn: String,
}

/// A container repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    /// Repository name.
    pub name: String,
    /// Push/pull URI.
    pub uri: String,
}

impl RepositorySummary {
    /// Registry host part of the URI.
    #[must_use]
    pub fn registry(&self) -> &str {
        self.uri.split_once('/').map_or(self.uri.as_str(), |(host, _)| host)
    }

    /// Fully qualified image reference for `tag`.
    #[must_use]
    pub fn image(&self, tag: &str) -> String {
        format!("{}:{tag}", self.uri)
    }
}

/// Parameters of a managed build project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProjectRequest {
    /// Project name.
    pub name: String,
    /// Source archive bucket.
    pub source_bucket: String,
    /// Source archive key.
    pub source_key: String,
    /// Role assumed by the build.
    pub service_role_arn: String,
    /// Environment variables passed to the build.
    pub environment: BTreeMap<String, String>,
}

/// Status of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Build id.
    pub id: String,
    /// Status: `IN_PROGRESS`, `SUCCEEDED`, `FAILED`, `FAULT`, `STOPPED`, `TIMED_OUT`.
    pub status: String,
}

/// A hosted application service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Service name.
    pub name: String,
    /// Service ARN.
    pub arn: String,
    /// Status: `OPERATION_IN_PROGRESS`, `RUNNING`, `CREATE_FAILED`, ...
    pub status: String,
    /// Public URL, once assigned.
    pub url: Option<String>,
}

/// Desired configuration of a hosted service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Service name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Container port.
    pub port: u16,
    /// Runtime environment variables.
    pub environment: BTreeMap<String, String>,
    /// Role assumed by running instances.
    pub instance_role_arn: String,
    /// Role used to pull the image.
    pub access_role_arn: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_registry() {
        let repo = RepositorySummary {
            name: "ofac-rag-app".to_string(),
            uri: "111122223333.dkr.ecr.us-east-1.amazonaws.com/ofac-rag-app".to_string(),
        };
        assert_eq!(repo.registry(), "111122223333.dkr.ecr.us-east-1.amazonaws.com");
        assert!(repo.image("latest").ends_with("/ofac-rag-app:latest"));
    }

    #[test]
    fn test_page_constructors() {
        let page = Page::more(vec![1, 2], "t1");
        assert_eq!(page.next_token.as_deref(), Some("t1"));
        assert_eq!(Page::last(vec![3]).next_token, None);
    }
}

//! Service trait implementations for [`AwsCli`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};
use serde_json::{json, Value};

use super::{items, opt_text, required, text, AwsCli};
use crate::control::{
    BuildProjectRequest, BuildService, BuildStatus, CollectionSummary, ContainerRegistry,
    CreateStackRequest, CustomModelSummary, CustomizationJob, CustomizationJobRequest,
    DataSourceSummary, HostingService, IdentityService, InferenceProvisioningService,
    IngestionJobSummary, KnowledgeBaseService, KnowledgeBaseSummary, ModelCustomizationService,
    ObjectStorage, Page, ProvisionRequest, ProvisionedThroughput, RepositorySummary, RoleSummary,
    ServiceRequest, ServiceSummary, StackDescription, StackResourceSummary, StackService,
    VectorSearchService,
};
use crate::core::DataSourcePair;
use crate::errors::{ControlPlaneError, ControlPlaneResult};

const PAGE_SIZE: &str = "100";

/// Appends `--starting-token` when continuing a listing.
fn paged<'a>(mut args: Vec<&'a str>, next_token: Option<&'a str>) -> Vec<&'a str> {
    args.extend(["--max-items", PAGE_SIZE]);
    if let Some(token) = next_token {
        args.extend(["--starting-token", token]);
    }
    args
}

fn next_token(value: &Value) -> Option<String> {
    opt_text(value, "NextToken").or_else(|| opt_text(value, "nextToken"))
}

/// Base64 MD5 digest sent as `Content-MD5`.
pub(crate) fn content_md5(body: &[u8]) -> String {
    STANDARD.encode(Md5::digest(body))
}

#[async_trait]
impl StackService for AwsCli {
    async fn describe_stack(&self, name: &str) -> ControlPlaneResult<Option<StackDescription>> {
        let Some(response) = self
            .call_optional("cloudformation", "describe-stacks", &["--stack-name", name])
            .await?
        else {
            return Ok(None);
        };
        Ok(items(&response, "Stacks").first().map(|stack| StackDescription {
            name: text(stack, "StackName"),
            stack_id: text(stack, "StackId"),
            status: text(stack, "StackStatus"),
            status_reason: opt_text(stack, "StackStatusReason"),
        }))
    }

    async fn validate_template(&self, template_url: &str) -> ControlPlaneResult<()> {
        self.call_unit(
            "cloudformation",
            "validate-template",
            &["--template-url", template_url],
        )
        .await
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> ControlPlaneResult<String> {
        let parameters: Vec<String> = request
            .parameters
            .iter()
            .map(|(k, v)| format!("ParameterKey={k},ParameterValue={v}"))
            .collect();

        let mut args = vec![
            "--stack-name",
            request.name.as_str(),
            "--template-url",
            request.template_url.as_str(),
        ];
        if !request.capabilities.is_empty() {
            args.push("--capabilities");
            args.extend(request.capabilities.iter().map(String::as_str));
        }
        if !parameters.is_empty() {
            args.push("--parameters");
            args.extend(parameters.iter().map(String::as_str));
        }

        let response = self.call("cloudformation", "create-stack", &args).await?;
        required(&response, "StackId", "cloudformation", "create-stack")
    }

    async fn delete_stack(&self, name: &str) -> ControlPlaneResult<()> {
        self.call_unit("cloudformation", "delete-stack", &["--stack-name", name])
            .await
    }

    async fn list_stack_resources(
        &self,
        stack: &str,
        next_token_in: Option<&str>,
    ) -> ControlPlaneResult<Page<StackResourceSummary>> {
        let args = paged(vec!["--stack-name", stack], next_token_in);
        let response = self
            .call("cloudformation", "list-stack-resources", &args)
            .await?;

        let resources = items(&response, "StackResourceSummaries")
            .iter()
            .map(|r| StackResourceSummary {
                logical_id: text(r, "LogicalResourceId"),
                physical_id: text(r, "PhysicalResourceId"),
                resource_type: text(r, "ResourceType"),
                status: text(r, "ResourceStatus"),
            })
            .collect();
        Ok(Page {
            items: resources,
            next_token: next_token(&response),
        })
    }
}

#[async_trait]
impl ObjectStorage for AwsCli {
    async fn bucket_exists(&self, bucket: &str) -> ControlPlaneResult<bool> {
        Ok(self
            .call_optional("s3api", "head-bucket", &["--bucket", bucket])
            .await?
            .is_some())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> ControlPlaneResult<()> {
        let constraint = location_constraint.map(|region| format!("LocationConstraint={region}"));
        let mut args = vec!["--bucket", bucket];
        if let Some(constraint) = &constraint {
            args.extend(["--create-bucket-configuration", constraint.as_str()]);
        }
        self.call_unit("s3api", "create-bucket", &args).await
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> ControlPlaneResult<bool> {
        Ok(self
            .call_optional("s3api", "head-object", &["--bucket", bucket, "--key", key])
            .await?
            .is_some())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> ControlPlaneResult<()> {
        let staged = tempfile::NamedTempFile::new()
            .map_err(|e| ControlPlaneError::Spawn(format!("staging upload: {e}")))?;
        tokio::fs::write(staged.path(), body)
            .await
            .map_err(|e| ControlPlaneError::Spawn(format!("staging upload: {e}")))?;
        let path = staged.path().to_string_lossy().into_owned();
        let digest = content_md5(body);

        self.call_unit(
            "s3api",
            "put-object",
            &[
                "--bucket",
                bucket,
                "--key",
                key,
                "--body",
                &path,
                "--content-md5",
                &digest,
            ],
        )
        .await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        next_token_in: Option<&str>,
    ) -> ControlPlaneResult<Page<String>> {
        let mut args = vec!["--bucket", bucket];
        if let Some(prefix) = prefix {
            args.extend(["--prefix", prefix]);
        }
        let args = paged(args, next_token_in);
        let response = self.call("s3api", "list-objects-v2", &args).await?;

        Ok(Page {
            items: items(&response, "Contents")
                .iter()
                .map(|o| text(o, "Key"))
                .filter(|k| !k.is_empty())
                .collect(),
            next_token: next_token(&response),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ControlPlaneResult<()> {
        self.call_unit("s3api", "delete-object", &["--bucket", bucket, "--key", key])
            .await
    }

    async fn empty_bucket(&self, bucket: &str) -> ControlPlaneResult<()> {
        let uri = format!("s3://{bucket}");
        self.run("s3", "rm", &[&uri, "--recursive"]).await.map(|_| ())
    }

    async fn delete_bucket(&self, bucket: &str) -> ControlPlaneResult<()> {
        self.call_unit("s3api", "delete-bucket", &["--bucket", bucket])
            .await
    }
}

fn knowledge_base(value: &Value) -> KnowledgeBaseSummary {
    KnowledgeBaseSummary {
        id: text(value, "knowledgeBaseId"),
        name: text(value, "name"),
        status: text(value, "status"),
    }
}

fn data_source(value: &Value) -> DataSourceSummary {
    DataSourceSummary {
        id: text(value, "dataSourceId"),
        knowledge_base_id: text(value, "knowledgeBaseId"),
        name: text(value, "name"),
        status: text(value, "status"),
    }
}

fn ingestion_job(value: &Value) -> IngestionJobSummary {
    IngestionJobSummary {
        job_id: text(value, "ingestionJobId"),
        status: text(value, "status"),
    }
}

#[async_trait]
impl KnowledgeBaseService for AwsCli {
    async fn list_knowledge_bases(
        &self,
        next_token_in: Option<&str>,
    ) -> ControlPlaneResult<Page<KnowledgeBaseSummary>> {
        let args = paged(Vec::new(), next_token_in);
        let response = self
            .call("bedrock-agent", "list-knowledge-bases", &args)
            .await?;
        Ok(Page {
            items: items(&response, "knowledgeBaseSummaries")
                .iter()
                .map(knowledge_base)
                .collect(),
            next_token: next_token(&response),
        })
    }

    async fn get_knowledge_base(
        &self,
        id: &str,
    ) -> ControlPlaneResult<Option<KnowledgeBaseSummary>> {
        let response = self
            .call_optional("bedrock-agent", "get-knowledge-base", &["--knowledge-base-id", id])
            .await?;
        Ok(response
            .as_ref()
            .and_then(|r| r.get("knowledgeBase"))
            .map(knowledge_base))
    }

    async fn delete_knowledge_base(&self, id: &str) -> ControlPlaneResult<()> {
        self.call_unit(
            "bedrock-agent",
            "delete-knowledge-base",
            &["--knowledge-base-id", id],
        )
        .await
    }

    async fn list_data_sources(
        &self,
        knowledge_base_id: &str,
        next_token_in: Option<&str>,
    ) -> ControlPlaneResult<Page<DataSourceSummary>> {
        let args = paged(vec!["--knowledge-base-id", knowledge_base_id], next_token_in);
        let response = self
            .call("bedrock-agent", "list-data-sources", &args)
            .await?;
        Ok(Page {
            items: items(&response, "dataSourceSummaries")
                .iter()
                .map(data_source)
                .collect(),
            next_token: next_token(&response),
        })
    }

    async fn get_data_source(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<Option<DataSourceSummary>> {
        let response = self
            .call_optional(
                "bedrock-agent",
                "get-data-source",
                &[
                    "--knowledge-base-id",
                    &pair.knowledge_base_id,
                    "--data-source-id",
                    &pair.data_source_id,
                ],
            )
            .await?;
        Ok(response
            .as_ref()
            .and_then(|r| r.get("dataSource"))
            .map(data_source))
    }

    async fn delete_data_source(&self, pair: &DataSourcePair) -> ControlPlaneResult<()> {
        self.call_unit(
            "bedrock-agent",
            "delete-data-source",
            &[
                "--knowledge-base-id",
                &pair.knowledge_base_id,
                "--data-source-id",
                &pair.data_source_id,
            ],
        )
        .await
    }

    async fn start_ingestion_job(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<IngestionJobSummary> {
        let response = self
            .call(
                "bedrock-agent",
                "start-ingestion-job",
                &[
                    "--knowledge-base-id",
                    &pair.knowledge_base_id,
                    "--data-source-id",
                    &pair.data_source_id,
                ],
            )
            .await?;
        response
            .get("ingestionJob")
            .map(ingestion_job)
            .ok_or_else(|| {
                ControlPlaneError::malformed("bedrock-agent", "start-ingestion-job", "missing ingestionJob")
            })
    }

    async fn list_ingestion_jobs(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<Vec<IngestionJobSummary>> {
        let response = self
            .call(
                "bedrock-agent",
                "list-ingestion-jobs",
                &[
                    "--knowledge-base-id",
                    &pair.knowledge_base_id,
                    "--data-source-id",
                    &pair.data_source_id,
                ],
            )
            .await?;
        Ok(items(&response, "ingestionJobSummaries")
            .iter()
            .map(ingestion_job)
            .collect())
    }
}

fn collection(value: &Value) -> CollectionSummary {
    CollectionSummary {
        id: text(value, "id"),
        name: text(value, "name"),
        status: text(value, "status"),
    }
}

#[async_trait]
impl VectorSearchService for AwsCli {
    async fn list_collections(
        &self,
        name_prefix: &str,
    ) -> ControlPlaneResult<Vec<CollectionSummary>> {
        let response = self
            .call("opensearchserverless", "list-collections", &[])
            .await?;
        Ok(items(&response, "collectionSummaries")
            .iter()
            .map(collection)
            .filter(|c| c.name.starts_with(name_prefix))
            .collect())
    }

    async fn get_collection(&self, id: &str) -> ControlPlaneResult<Option<CollectionSummary>> {
        let response = self
            .call("opensearchserverless", "batch-get-collection", &["--ids", id])
            .await?;
        Ok(items(&response, "collectionDetails").first().map(collection))
    }

    async fn delete_collection(&self, id: &str) -> ControlPlaneResult<()> {
        self.call_unit("opensearchserverless", "delete-collection", &["--id", id])
            .await
    }
}

fn customization_job(value: &Value) -> CustomizationJob {
    CustomizationJob {
        arn: text(value, "jobArn"),
        name: text(value, "jobName"),
        status: text(value, "status"),
        output_model_arn: opt_text(value, "outputModelArn")
            .or_else(|| opt_text(value, "customModelArn")),
        output_model_name: opt_text(value, "outputModelName")
            .or_else(|| opt_text(value, "customModelName")),
        failure_message: opt_text(value, "failureMessage"),
    }
}

#[async_trait]
impl ModelCustomizationService for AwsCli {
    async fn get_foundation_model(&self, model_id: &str) -> ControlPlaneResult<Option<String>> {
        let response = self
            .call_optional("bedrock", "get-foundation-model", &["--model-identifier", model_id])
            .await?;
        Ok(response
            .as_ref()
            .and_then(|r| r.get("modelDetails"))
            .and_then(|d| opt_text(d, "modelArn")))
    }

    async fn list_custom_models(
        &self,
        name_contains: &str,
    ) -> ControlPlaneResult<Vec<CustomModelSummary>> {
        let response = self
            .call("bedrock", "list-custom-models", &["--name-contains", name_contains])
            .await?;
        Ok(items(&response, "modelSummaries")
            .iter()
            .map(|m| CustomModelSummary {
                arn: text(m, "modelArn"),
                name: text(m, "modelName"),
            })
            .collect())
    }

    async fn get_custom_model(&self, id: &str) -> ControlPlaneResult<Option<CustomModelSummary>> {
        let response = self
            .call_optional("bedrock", "get-custom-model", &["--model-identifier", id])
            .await?;
        Ok(response.map(|m| CustomModelSummary {
            arn: text(&m, "modelArn"),
            name: text(&m, "modelName"),
        }))
    }

    async fn delete_custom_model(&self, id: &str) -> ControlPlaneResult<()> {
        self.call_unit("bedrock", "delete-custom-model", &["--model-identifier", id])
            .await
    }

    async fn create_customization_job(
        &self,
        request: &CustomizationJobRequest,
    ) -> ControlPlaneResult<String> {
        let training = format!("s3Uri={}", request.training_data_uri);
        let output = format!("s3Uri={}", request.output_data_uri);
        let hyperparameters = request
            .hyperparameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .call(
                "bedrock",
                "create-model-customization-job",
                &[
                    "--job-name",
                    &request.job_name,
                    "--custom-model-name",
                    &request.custom_model_name,
                    "--role-arn",
                    &request.role_arn,
                    "--base-model-identifier",
                    &request.base_model_id,
                    "--customization-type",
                    "FINE_TUNING",
                    "--training-data-config",
                    &training,
                    "--output-data-config",
                    &output,
                    "--hyper-parameters",
                    &hyperparameters,
                    "--client-request-token",
                    &request.client_token,
                ],
            )
            .await?;
        required(&response, "jobArn", "bedrock", "create-model-customization-job")
    }

    async fn get_customization_job(
        &self,
        id: &str,
    ) -> ControlPlaneResult<Option<CustomizationJob>> {
        let response = self
            .call_optional(
                "bedrock",
                "get-model-customization-job",
                &["--job-identifier", id],
            )
            .await?;
        Ok(response.as_ref().map(customization_job))
    }

    async fn list_customization_jobs(
        &self,
        name_contains: &str,
    ) -> ControlPlaneResult<Vec<CustomizationJob>> {
        let response = self
            .call(
                "bedrock",
                "list-model-customization-jobs",
                &["--name-contains", name_contains],
            )
            .await?;
        Ok(items(&response, "modelCustomizationJobSummaries")
            .iter()
            .map(customization_job)
            .collect())
    }
}

fn throughput(value: &Value) -> ProvisionedThroughput {
    ProvisionedThroughput {
        arn: text(value, "provisionedModelArn"),
        name: text(value, "provisionedModelName"),
        model_arn: text(value, "modelArn"),
        status: text(value, "status"),
        failure_message: opt_text(value, "failureMessage"),
    }
}

#[async_trait]
impl InferenceProvisioningService for AwsCli {
    async fn create_provisioned_throughput(
        &self,
        request: &ProvisionRequest,
    ) -> ControlPlaneResult<String> {
        let units = request.model_units.to_string();
        let response = self
            .call(
                "bedrock",
                "create-provisioned-model-throughput",
                &[
                    "--model-units",
                    &units,
                    "--provisioned-model-name",
                    &request.name,
                    "--model-id",
                    &request.model_arn,
                    "--client-request-token",
                    &request.client_token,
                ],
            )
            .await?;
        required(
            &response,
            "provisionedModelArn",
            "bedrock",
            "create-provisioned-model-throughput",
        )
    }

    async fn get_provisioned_throughput(
        &self,
        id: &str,
    ) -> ControlPlaneResult<Option<ProvisionedThroughput>> {
        let response = self
            .call_optional(
                "bedrock",
                "get-provisioned-model-throughput",
                &["--provisioned-model-id", id],
            )
            .await?;
        Ok(response.as_ref().map(throughput))
    }

    async fn delete_provisioned_throughput(&self, id: &str) -> ControlPlaneResult<()> {
        self.call_unit(
            "bedrock",
            "delete-provisioned-model-throughput",
            &["--provisioned-model-id", id],
        )
        .await
    }

    async fn list_provisioned_throughputs(&self) -> ControlPlaneResult<Vec<ProvisionedThroughput>> {
        let response = self
            .call("bedrock", "list-provisioned-model-throughputs", &[])
            .await?;
        Ok(items(&response, "provisionedModelSummaries")
            .iter()
            .map(throughput)
            .collect())
    }
}

fn role(value: &Value) -> RoleSummary {
    RoleSummary {
        name: text(value, "RoleName"),
        arn: text(value, "Arn"),
    }
}

#[async_trait]
impl IdentityService for AwsCli {
    async fn account_id(&self) -> ControlPlaneResult<String> {
        let response = self.call("sts", "get-caller-identity", &[]).await?;
        required(&response, "Account", "sts", "get-caller-identity")
    }

    async fn get_role(&self, name: &str) -> ControlPlaneResult<Option<RoleSummary>> {
        let response = self
            .call_optional("iam", "get-role", &["--role-name", name])
            .await?;
        Ok(response.as_ref().and_then(|r| r.get("Role")).map(role))
    }

    async fn create_role(
        &self,
        name: &str,
        trust_policy: &Value,
        description: &str,
    ) -> ControlPlaneResult<RoleSummary> {
        let document = trust_policy.to_string();
        let response = self
            .call(
                "iam",
                "create-role",
                &[
                    "--role-name",
                    name,
                    "--assume-role-policy-document",
                    &document,
                    "--description",
                    description,
                ],
            )
            .await?;
        response
            .get("Role")
            .map(role)
            .ok_or_else(|| ControlPlaneError::malformed("iam", "create-role", "missing Role"))
    }

    async fn delete_role(&self, name: &str) -> ControlPlaneResult<()> {
        self.call_unit("iam", "delete-role", &["--role-name", name])
            .await
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: &Value,
    ) -> ControlPlaneResult<()> {
        let document = document.to_string();
        self.call_unit(
            "iam",
            "put-role-policy",
            &[
                "--role-name",
                role_name,
                "--policy-name",
                policy_name,
                "--policy-document",
                &document,
            ],
        )
        .await
    }

    async fn list_role_policies(&self, role_name: &str) -> ControlPlaneResult<Vec<String>> {
        let response = self
            .call("iam", "list-role-policies", &["--role-name", role_name])
            .await?;
        Ok(items(&response, "PolicyNames")
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> ControlPlaneResult<()> {
        self.call_unit(
            "iam",
            "delete-role-policy",
            &["--role-name", role_name, "--policy-name", policy_name],
        )
        .await
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> ControlPlaneResult<()> {
        self.call_unit(
            "iam",
            "attach-role-policy",
            &["--role-name", role_name, "--policy-arn", policy_arn],
        )
        .await
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> ControlPlaneResult<Vec<String>> {
        let response = self
            .call("iam", "list-attached-role-policies", &["--role-name", role_name])
            .await?;
        Ok(items(&response, "AttachedPolicies")
            .iter()
            .map(|p| text(p, "PolicyArn"))
            .filter(|arn| !arn.is_empty())
            .collect())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> ControlPlaneResult<()> {
        self.call_unit(
            "iam",
            "detach-role-policy",
            &["--role-name", role_name, "--policy-arn", policy_arn],
        )
        .await
    }
}

fn repository(value: &Value) -> RepositorySummary {
    RepositorySummary {
        name: text(value, "repositoryName"),
        uri: text(value, "repositoryUri"),
    }
}

#[async_trait]
impl ContainerRegistry for AwsCli {
    async fn describe_repository(
        &self,
        name: &str,
    ) -> ControlPlaneResult<Option<RepositorySummary>> {
        let response = self
            .call_optional("ecr", "describe-repositories", &["--repository-names", name])
            .await?;
        Ok(response
            .as_ref()
            .and_then(|r| items(r, "repositories").first())
            .map(repository))
    }

    async fn create_repository(&self, name: &str) -> ControlPlaneResult<RepositorySummary> {
        let response = self
            .call("ecr", "create-repository", &["--repository-name", name])
            .await?;
        response
            .get("repository")
            .map(repository)
            .ok_or_else(|| ControlPlaneError::malformed("ecr", "create-repository", "missing repository"))
    }

    async fn list_images(&self, name: &str) -> ControlPlaneResult<Vec<String>> {
        let response = self
            .call("ecr", "list-images", &["--repository-name", name])
            .await?;
        Ok(items(&response, "imageIds")
            .iter()
            .map(|i| text(i, "imageDigest"))
            .filter(|d| !d.is_empty())
            .collect())
    }

    async fn delete_images(&self, name: &str, digests: &[String]) -> ControlPlaneResult<()> {
        if digests.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = digests.iter().map(|d| format!("imageDigest={d}")).collect();
        let mut args = vec!["--repository-name", name, "--image-ids"];
        args.extend(ids.iter().map(String::as_str));
        self.call_unit("ecr", "batch-delete-image", &args).await
    }

    async fn delete_repository(&self, name: &str) -> ControlPlaneResult<()> {
        self.call_unit("ecr", "delete-repository", &["--repository-name", name])
            .await
    }

    async fn login_password(&self) -> ControlPlaneResult<String> {
        let password = self.run("ecr", "get-login-password", &[]).await?;
        Ok(password.trim().to_string())
    }
}

fn build_environment(request: &BuildProjectRequest) -> Value {
    let variables: Vec<Value> = request
        .environment
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value, "type": "PLAINTEXT"}))
        .collect();
    json!({
        "type": "LINUX_CONTAINER",
        "image": "aws/codebuild/standard:7.0",
        "computeType": "BUILD_GENERAL1_SMALL",
        "privilegedMode": true,
        "environmentVariables": variables,
    })
}

impl AwsCli {
    async fn write_project(
        &self,
        operation: &str,
        request: &BuildProjectRequest,
    ) -> ControlPlaneResult<()> {
        let source = format!(
            "type=S3,location={}/{}",
            request.source_bucket, request.source_key
        );
        let environment = build_environment(request).to_string();
        self.call_unit(
            "codebuild",
            operation,
            &[
                "--name",
                &request.name,
                "--source",
                &source,
                "--artifacts",
                "type=NO_ARTIFACTS",
                "--environment",
                &environment,
                "--service-role",
                &request.service_role_arn,
            ],
        )
        .await
    }
}

#[async_trait]
impl BuildService for AwsCli {
    async fn project_exists(&self, name: &str) -> ControlPlaneResult<bool> {
        let response = self
            .call("codebuild", "batch-get-projects", &["--names", name])
            .await?;
        Ok(!items(&response, "projects").is_empty())
    }

    async fn create_project(&self, request: &BuildProjectRequest) -> ControlPlaneResult<()> {
        self.write_project("create-project", request).await
    }

    async fn update_project(&self, request: &BuildProjectRequest) -> ControlPlaneResult<()> {
        self.write_project("update-project", request).await
    }

    async fn start_build(&self, project: &str) -> ControlPlaneResult<String> {
        let response = self
            .call("codebuild", "start-build", &["--project-name", project])
            .await?;
        response
            .get("build")
            .and_then(|b| opt_text(b, "id"))
            .ok_or_else(|| ControlPlaneError::malformed("codebuild", "start-build", "missing build id"))
    }

    async fn get_build(&self, id: &str) -> ControlPlaneResult<Option<BuildStatus>> {
        let response = self
            .call("codebuild", "batch-get-builds", &["--ids", id])
            .await?;
        Ok(items(&response, "builds").first().map(|b| BuildStatus {
            id: text(b, "id"),
            status: text(b, "buildStatus"),
        }))
    }

    async fn delete_project(&self, name: &str) -> ControlPlaneResult<()> {
        self.call_unit("codebuild", "delete-project", &["--name", name])
            .await
    }
}

fn service(value: &Value) -> ServiceSummary {
    ServiceSummary {
        name: text(value, "ServiceName"),
        arn: text(value, "ServiceArn"),
        status: text(value, "Status"),
        url: opt_text(value, "ServiceUrl"),
    }
}

fn source_configuration(request: &ServiceRequest) -> Value {
    json!({
        "AuthenticationConfiguration": {"AccessRoleArn": request.access_role_arn},
        "AutoDeploymentsEnabled": false,
        "ImageRepository": {
            "ImageIdentifier": request.image,
            "ImageRepositoryType": "ECR",
            "ImageConfiguration": {
                "Port": request.port.to_string(),
                "RuntimeEnvironmentVariables": request.environment,
            },
        },
    })
}

#[async_trait]
impl HostingService for AwsCli {
    async fn find_service(&self, name: &str) -> ControlPlaneResult<Option<ServiceSummary>> {
        let response = self.call("apprunner", "list-services", &[]).await?;
        Ok(items(&response, "ServiceSummaryList")
            .iter()
            .map(service)
            .find(|s| s.name == name))
    }

    async fn describe_service(&self, arn: &str) -> ControlPlaneResult<Option<ServiceSummary>> {
        let response = self
            .call_optional("apprunner", "describe-service", &["--service-arn", arn])
            .await?;
        Ok(response.as_ref().and_then(|r| r.get("Service")).map(service))
    }

    async fn create_service(&self, request: &ServiceRequest) -> ControlPlaneResult<ServiceSummary> {
        let source = source_configuration(request).to_string();
        let instance = format!("InstanceRoleArn={}", request.instance_role_arn);
        let response = self
            .call(
                "apprunner",
                "create-service",
                &[
                    "--service-name",
                    &request.name,
                    "--source-configuration",
                    &source,
                    "--instance-configuration",
                    &instance,
                ],
            )
            .await?;
        response
            .get("Service")
            .map(service)
            .ok_or_else(|| ControlPlaneError::malformed("apprunner", "create-service", "missing Service"))
    }

    async fn update_service(
        &self,
        arn: &str,
        request: &ServiceRequest,
    ) -> ControlPlaneResult<ServiceSummary> {
        let source = source_configuration(request).to_string();
        let instance = format!("InstanceRoleArn={}", request.instance_role_arn);
        let response = self
            .call(
                "apprunner",
                "update-service",
                &[
                    "--service-arn",
                    arn,
                    "--source-configuration",
                    &source,
                    "--instance-configuration",
                    &instance,
                ],
            )
            .await?;
        response
            .get("Service")
            .map(service)
            .ok_or_else(|| ControlPlaneError::malformed("apprunner", "update-service", "missing Service"))
    }

    async fn delete_service(&self, arn: &str) -> ControlPlaneResult<()> {
        self.call_unit("apprunner", "delete-service", &["--service-arn", arn])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_content_md5() {
        // RFC 1321 test vector for the empty string.
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_paged_arguments() {
        assert_eq!(
            paged(vec!["--stack-name", "s"], None),
            vec!["--stack-name", "s", "--max-items", "100"]
        );
        assert_eq!(
            paged(Vec::new(), Some("tok")),
            vec!["--max-items", "100", "--starting-token", "tok"]
        );
    }

    #[test]
    fn test_job_parsing_falls_back_to_summary_fields() {
        let summary = json!({
            "jobArn": "arn:job",
            "jobName": "ofac-nova-custom-job-20240315",
            "status": "Completed",
            "customModelArn": "arn:model",
            "customModelName": "ofac-nova-custom-20240315",
        });
        let job = customization_job(&summary);
        assert_eq!(job.output_model_arn.as_deref(), Some("arn:model"));
        assert_eq!(job.output_model_name.as_deref(), Some("ofac-nova-custom-20240315"));
        assert_eq!(job.failure_message, None);
    }

    #[test]
    fn test_service_source_configuration() {
        let request = ServiceRequest {
            name: "svc".to_string(),
            image: "repo:latest".to_string(),
            port: 8080,
            environment: BTreeMap::from([("AWS_BEDROCK_MODE".to_string(), "1".to_string())]),
            instance_role_arn: "arn:instance".to_string(),
            access_role_arn: "arn:access".to_string(),
        };
        let config = source_configuration(&request);
        assert_eq!(config["ImageRepository"]["ImageConfiguration"]["Port"], "8080");
        assert_eq!(
            config["ImageRepository"]["ImageConfiguration"]["RuntimeEnvironmentVariables"]
                ["AWS_BEDROCK_MODE"],
            "1"
        );
        assert_eq!(config["AuthenticationConfiguration"]["AccessRoleArn"], "arn:access");
    }

    #[test]
    fn test_build_environment_variables() {
        let request = BuildProjectRequest {
            name: "p".to_string(),
            source_bucket: "b".to_string(),
            source_key: "app-source/app.zip".to_string(),
            service_role_arn: "arn:role".to_string(),
            environment: BTreeMap::from([("IMAGE_TAG".to_string(), "latest".to_string())]),
        };
        let env = build_environment(&request);
        assert_eq!(env["privilegedMode"], true);
        assert_eq!(env["environmentVariables"][0]["name"], "IMAGE_TAG");
    }
}

//! An in-memory control plane.
//!
//! Implements every service seam over plain maps behind one lock. Resources
//! with a lifecycle advance one scripted state per observation, so polling
//! code sees the same progressions it would see against the real services.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::control::{
    BuildProjectRequest, BuildService, BuildStatus, CollectionSummary, ContainerRegistry,
    CreateStackRequest, CustomModelSummary, CustomizationJob, CustomizationJobRequest,
    DataSourceSummary, HostingService, IdentityService, InferenceProvisioningService,
    IngestionJobSummary, KnowledgeBaseService, KnowledgeBaseSummary, ModelCustomizationService,
    ObjectStorage, Page, ProvisionRequest, ProvisionedThroughput, RepositorySummary, RoleSummary,
    ServiceRequest, ServiceSummary, StackDescription, StackResourceSummary, StackService,
    VectorSearchService,
};
use crate::core::{DataSourcePair, NESTED_STACK_TYPE};
use crate::errors::{ControlPlaneError, ControlPlaneResult};

use super::fixtures::nested_stack_fixture;

const SERVICE: &str = "in-memory";
const STACK_DELETED: &str = "DELETE_COMPLETE";
const JOB_COMPLETED: &str = "Completed";

/// Lifecycles that can be scripted before the resource is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scripted {
    /// The next stack creation.
    Stack,
    /// The next stack deletion.
    StackDeletion,
    /// The next fine-tuning job.
    CustomizationJob,
    /// The next provisioned throughput.
    Throughput,
    /// The next managed build.
    Build,
    /// The next service creation or update.
    Service,
}

impl Scripted {
    const fn default_states(self) -> &'static [&'static str] {
        match self {
            Self::Stack => &["CREATE_IN_PROGRESS", "CREATE_COMPLETE"],
            Self::StackDeletion => &["DELETE_IN_PROGRESS", STACK_DELETED],
            Self::CustomizationJob => &["InProgress", JOB_COMPLETED],
            Self::Throughput => &["Creating", "InService"],
            Self::Build => &["IN_PROGRESS", "SUCCEEDED"],
            Self::Service => &["OPERATION_IN_PROGRESS", "RUNNING"],
        }
    }
}

/// One journaled call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Trait method name, e.g. `delete_bucket`.
    pub operation: String,
    /// Primary resource the call addressed.
    pub target: String,
}

/// States a resource moves through, one per observation. The last state
/// sticks.
#[derive(Debug, Clone)]
struct Lifecycle(VecDeque<String>);

impl Lifecycle {
    fn of(states: &[&str]) -> Self {
        Self(states.iter().map(|s| (*s).to_string()).collect())
    }

    fn fixed(state: &str) -> Self {
        Self::of(&[state])
    }

    fn observe(&mut self) -> String {
        let current = self.peek();
        if self.0.len() > 1 {
            self.0.pop_front();
        }
        current
    }

    fn peek(&self) -> String {
        self.0.front().cloned().unwrap_or_default()
    }

    fn settle(&mut self) {
        while self.0.len() > 1 {
            self.0.pop_front();
        }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    location: Option<String>,
    objects: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
struct Stack {
    stack_id: String,
    lifecycle: Lifecycle,
}

#[derive(Debug)]
struct Job {
    arn: String,
    model_name: String,
    lifecycle: Lifecycle,
}

#[derive(Debug)]
struct Throughput {
    arn: String,
    name: String,
    model_arn: String,
    lifecycle: Lifecycle,
}

#[derive(Debug, Default)]
struct Role {
    arn: String,
    inline: BTreeMap<String, Value>,
    attached: BTreeSet<String>,
}

#[derive(Debug)]
struct Repository {
    uri: String,
    images: BTreeSet<String>,
}

#[derive(Debug)]
struct Build {
    lifecycle: Lifecycle,
}

#[derive(Debug)]
struct Service {
    name: String,
    url: String,
    lifecycle: Lifecycle,
    request: ServiceRequest,
}

#[derive(Debug, Default)]
struct State {
    journal: Vec<Call>,
    failing: HashSet<String>,
    scripts: HashMap<Scripted, Vec<String>>,
    omit_job_output_model: bool,
    sequence: u64,

    stacks: BTreeMap<String, Stack>,
    stack_resources: HashMap<String, Vec<StackResourceSummary>>,
    buckets: BTreeMap<String, Bucket>,
    knowledge_bases: BTreeMap<String, KnowledgeBaseSummary>,
    data_sources: BTreeMap<DataSourcePair, DataSourceSummary>,
    ingestion_jobs: BTreeMap<DataSourcePair, Vec<IngestionJobSummary>>,
    collections: BTreeMap<String, CollectionSummary>,
    custom_models: BTreeMap<String, CustomModelSummary>,
    jobs: BTreeMap<String, Job>,
    throughputs: BTreeMap<String, Throughput>,
    roles: BTreeMap<String, Role>,
    repositories: BTreeMap<String, Repository>,
    projects: BTreeMap<String, BuildProjectRequest>,
    builds: HashMap<String, Build>,
    services: BTreeMap<String, Service>,
}

impl State {
    /// Journals a call, then fails it if a failure was injected.
    fn record(&mut self, operation: &str, target: &str) -> ControlPlaneResult<()> {
        self.journal.push(Call {
            operation: operation.to_string(),
            target: target.to_string(),
        });
        if self.failing.contains(operation) {
            return Err(ControlPlaneError::command(
                SERVICE,
                operation,
                "injected failure",
            ));
        }
        Ok(())
    }

    fn lifecycle(&mut self, kind: Scripted) -> Lifecycle {
        match self.scripts.remove(&kind) {
            Some(states) => Lifecycle(states.into()),
            None => Lifecycle::of(kind.default_states()),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn remove_stack_tree(&mut self, root: &str) {
        let mut pending = vec![root.to_string()];
        while let Some(stack) = pending.pop() {
            if let Some(resources) = self.stack_resources.remove(&stack) {
                pending.extend(
                    resources
                        .into_iter()
                        .filter(|r| r.resource_type == NESTED_STACK_TYPE)
                        .map(|r| r.physical_id),
                );
            }
        }
        self.stacks.remove(root);
    }

    fn customization_job(&mut self, name: &str, account: &str, region: &str, observe: bool) -> CustomizationJob {
        let omit = self.omit_job_output_model;
        let Some(job) = self.jobs.get_mut(name) else {
            return CustomizationJob {
                arn: String::new(),
                name: name.to_string(),
                status: String::new(),
                output_model_arn: None,
                output_model_name: None,
                failure_message: None,
            };
        };
        let status = if observe {
            job.lifecycle.observe()
        } else {
            job.lifecycle.peek()
        };
        let arn = job.arn.clone();
        let model_name = job.model_name.clone();

        let completed = status == JOB_COMPLETED;
        if completed {
            self.custom_models
                .entry(model_name.clone())
                .or_insert_with(|| CustomModelSummary {
                    arn: format!("arn:aws:bedrock:{region}:{account}:custom-model/{model_name}"),
                    name: model_name.clone(),
                });
        }
        let output_model_arn = if completed && !omit {
            self.custom_models.get(&model_name).map(|m| m.arn.clone())
        } else {
            None
        };
        CustomizationJob {
            arn,
            name: name.to_string(),
            failure_message: (status == "Failed").then(|| "training failed".to_string()),
            output_model_name: (completed && !omit).then_some(model_name),
            output_model_arn,
            status,
        }
    }

    fn throughput(&mut self, id: &str, observe: bool) -> Option<ProvisionedThroughput> {
        let key = self.throughput_key(id)?;
        let pt = self.throughputs.get_mut(&key)?;
        let status = if observe {
            pt.lifecycle.observe()
        } else {
            pt.lifecycle.peek()
        };
        Some(ProvisionedThroughput {
            arn: pt.arn.clone(),
            name: pt.name.clone(),
            model_arn: pt.model_arn.clone(),
            failure_message: (status == "Failed").then(|| "capacity unavailable".to_string()),
            status,
        })
    }

    fn throughput_key(&self, id: &str) -> Option<String> {
        self.throughputs
            .values()
            .find(|pt| pt.arn == id || pt.name == id)
            .map(|pt| pt.arn.clone())
    }

    fn custom_model_key(&self, id: &str) -> Option<String> {
        self.custom_models
            .values()
            .find(|m| m.arn == id || m.name == id)
            .map(|m| m.name.clone())
    }

    fn job_key(&self, id: &str) -> Option<String> {
        self.jobs
            .iter()
            .find(|(name, job)| name.as_str() == id || job.arn == id)
            .map(|(name, _)| name.clone())
    }

    fn service_summary(&mut self, arn: &str, observe: bool) -> Option<ServiceSummary> {
        let service = self.services.get_mut(arn)?;
        let status = if observe {
            service.lifecycle.observe()
        } else {
            service.lifecycle.peek()
        };
        Some(ServiceSummary {
            name: service.name.clone(),
            arn: arn.to_string(),
            status,
            url: Some(service.url.clone()),
        })
    }
}

fn paginate<T>(items: Vec<T>, token: Option<&str>, page_size: usize) -> ControlPlaneResult<Page<T>> {
    let offset = match token {
        None => 0,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ControlPlaneError::malformed(SERVICE, "paginate", format!("bad token '{raw}'")))?,
    };
    let total = items.len();
    let end = offset.saturating_add(page_size).min(total);
    let page: Vec<T> = items.into_iter().skip(offset).take(end.saturating_sub(offset)).collect();
    if end < total {
        Ok(Page::more(page, end.to_string()))
    } else {
        Ok(Page::last(page))
    }
}

/// In-memory implementation of every control-plane seam.
#[derive(Debug)]
pub struct InMemoryCloud {
    state: Mutex<State>,
    page_size: usize,
    account: String,
    region: String,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    /// An empty cloud for account `111122223333` in `us-east-1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: usize::MAX,
            account: "111122223333".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    /// Limits every paginated listing to `page_size` items per page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Account id reported by the identity service.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Makes every later call to `operation` fail.
    pub fn fail_on(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    /// Scripts the lifecycle of the next resource of `kind`.
    pub fn script(&self, kind: Scripted, states: &[&str]) {
        self.state
            .lock()
            .scripts
            .insert(kind, states.iter().map(|s| (*s).to_string()).collect());
    }

    /// Completed jobs will not report their output model.
    pub fn omit_job_output_model(&self) {
        self.state.lock().omit_job_output_model = true;
    }

    /// Moves every provisioned throughput to its final state.
    pub fn settle_throughputs(&self) {
        for pt in self.state.lock().throughputs.values_mut() {
            pt.lifecycle.settle();
        }
    }

    /// Every call so far.
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        self.state.lock().journal.clone()
    }

    /// Number of calls to `operation`.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Journal position of the first `operation` call addressing `target`.
    #[must_use]
    pub fn index_of(&self, operation: &str, target: &str) -> Option<usize> {
        self.state
            .lock()
            .journal
            .iter()
            .position(|c| c.operation == operation && c.target == target)
    }

    /// Writes an object without journaling, creating the bucket if needed.
    pub fn put_object_now(&self, bucket: &str, key: &str, body: &[u8]) {
        self.state
            .lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .objects
            .insert(key.to_string(), body.to_vec());
    }

    /// Contents of an object.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key).cloned())
    }

    /// Sorted keys of a bucket; empty when the bucket is missing.
    #[must_use]
    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if the bucket exists.
    #[must_use]
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state.lock().buckets.contains_key(bucket)
    }

    /// Location constraint a bucket was created with; `None` if missing.
    #[must_use]
    pub fn bucket_location(&self, bucket: &str) -> Option<Option<String>> {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .map(|b| b.location.clone())
    }

    /// Installs a stack that stays in `status`.
    pub fn put_stack(&self, name: &str, status: &str) {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.stacks.insert(
            name.to_string(),
            Stack {
                stack_id: format!(
                    "arn:aws:cloudformation:{}:{}:stack/{name}/{id}",
                    self.region, self.account
                ),
                lifecycle: Lifecycle::fixed(status),
            },
        );
    }

    /// Sets the resource listing of a stack.
    pub fn put_stack_resources(&self, stack: &str, resources: Vec<StackResourceSummary>) {
        self.state
            .lock()
            .stack_resources
            .insert(stack.to_string(), resources);
    }

    /// Registers a knowledge base.
    pub fn put_knowledge_base(&self, id: &str, name: &str) {
        self.state.lock().knowledge_bases.insert(
            id.to_string(),
            KnowledgeBaseSummary {
                id: id.to_string(),
                name: name.to_string(),
                status: "ACTIVE".to_string(),
            },
        );
    }

    /// Registers a data source.
    pub fn put_data_source(&self, pair: &DataSourcePair, name: &str) {
        self.state.lock().data_sources.insert(
            pair.clone(),
            DataSourceSummary {
                id: pair.data_source_id.clone(),
                knowledge_base_id: pair.knowledge_base_id.clone(),
                name: name.to_string(),
                status: "AVAILABLE".to_string(),
            },
        );
    }

    /// Registers a vector-search collection.
    pub fn put_collection(&self, id: &str, name: &str) {
        self.state.lock().collections.insert(
            id.to_string(),
            CollectionSummary {
                id: id.to_string(),
                name: name.to_string(),
                status: "ACTIVE".to_string(),
            },
        );
    }

    /// Registers a custom model.
    pub fn put_custom_model(&self, name: &str) -> CustomModelSummary {
        let model = CustomModelSummary {
            arn: format!(
                "arn:aws:bedrock:{}:{}:custom-model/{name}",
                self.region, self.account
            ),
            name: name.to_string(),
        };
        self.state
            .lock()
            .custom_models
            .insert(name.to_string(), model.clone());
        model
    }

    /// Registers a provisioned throughput that stays in `status`.
    pub fn put_throughput(&self, name: &str, model_arn: &str, status: &str) -> ProvisionedThroughput {
        let mut state = self.state.lock();
        let id = state.next_id();
        let arn = format!(
            "arn:aws:bedrock:{}:{}:provisioned-model/pt{id}",
            self.region, self.account
        );
        state.throughputs.insert(
            arn.clone(),
            Throughput {
                arn: arn.clone(),
                name: name.to_string(),
                model_arn: model_arn.to_string(),
                lifecycle: Lifecycle::fixed(status),
            },
        );
        ProvisionedThroughput {
            arn,
            name: name.to_string(),
            model_arn: model_arn.to_string(),
            status: status.to_string(),
            failure_message: None,
        }
    }

    /// Adds an image digest to a repository, creating it if needed.
    pub fn put_image(&self, repository: &str, digest: &str) {
        let uri = self.repository_uri(repository);
        self.state
            .lock()
            .repositories
            .entry(repository.to_string())
            .or_insert_with(|| Repository {
                uri,
                images: BTreeSet::new(),
            })
            .images
            .insert(digest.to_string());
    }

    /// Names of a role's inline policies.
    #[must_use]
    pub fn role_inline_policies(&self, role: &str) -> Vec<String> {
        self.state
            .lock()
            .roles
            .get(role)
            .map(|r| r.inline.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Runtime environment the named service was last deployed with.
    #[must_use]
    pub fn service_environment(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .services
            .values()
            .find(|s| s.name == name)
            .map(|s| s.request.environment.clone())
    }

    fn repository_uri(&self, name: &str) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com/{name}", self.account, self.region)
    }

    fn role_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:role/{name}", self.account)
    }
}

/// Splits `https://{bucket}.s3[.region].amazonaws.com/{key}`.
fn parse_object_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("https://")?;
    let (host, key) = rest.split_once('/')?;
    let (bucket, _) = host.split_once(".s3.")?;
    Some((bucket, key))
}

#[async_trait]
impl StackService for InMemoryCloud {
    async fn describe_stack(&self, name: &str) -> ControlPlaneResult<Option<StackDescription>> {
        let mut state = self.state.lock();
        state.record("describe_stack", name)?;
        let Some(stack) = state.stacks.get_mut(name) else {
            return Ok(None);
        };
        let status = stack.lifecycle.observe();
        let stack_id = stack.stack_id.clone();
        if status == STACK_DELETED {
            state.remove_stack_tree(name);
            return Ok(None);
        }
        Ok(Some(StackDescription {
            name: name.to_string(),
            stack_id,
            status_reason: status.contains("ROLLBACK").then(|| "resource creation failed".to_string()),
            status,
        }))
    }

    async fn validate_template(&self, template_url: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("validate_template", template_url)?;
        let found = parse_object_url(template_url).is_some_and(|(bucket, key)| {
            state
                .buckets
                .get(bucket)
                .is_some_and(|b| b.objects.contains_key(key))
        });
        if found {
            Ok(())
        } else {
            Err(ControlPlaneError::command(
                SERVICE,
                "validate_template",
                format!("template not found at {template_url}"),
            ))
        }
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> ControlPlaneResult<String> {
        let mut state = self.state.lock();
        state.record("create_stack", &request.name)?;
        if state.stacks.contains_key(&request.name) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_stack",
                format!("AlreadyExistsException: stack {} exists", request.name),
            ));
        }
        let id = state.next_id();
        let stack_id = format!(
            "arn:aws:cloudformation:{}:{}:stack/{}/{id}",
            self.region, self.account, request.name
        );
        let lifecycle = state.lifecycle(Scripted::Stack);
        state.stacks.insert(
            request.name.clone(),
            Stack {
                stack_id: stack_id.clone(),
                lifecycle,
            },
        );

        if !state.stack_resources.contains_key(&request.name) {
            let fixture = nested_stack_fixture(&request.name);
            for (stack, resources) in fixture.stacks {
                state.stack_resources.insert(stack, resources);
            }
            for kb in fixture.knowledge_bases {
                state.knowledge_bases.insert(kb.id.clone(), kb);
            }
            for ds in fixture.data_sources {
                let pair = DataSourcePair::new(&ds.knowledge_base_id, &ds.id);
                state.data_sources.insert(pair, ds);
            }
            for collection in fixture.collections {
                state.collections.insert(collection.id.clone(), collection);
            }
        }
        Ok(stack_id)
    }

    async fn delete_stack(&self, name: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_stack", name)?;
        if !state.stacks.contains_key(name) {
            return Err(ControlPlaneError::not_found(SERVICE, "delete_stack"));
        }
        let lifecycle = state.lifecycle(Scripted::StackDeletion);
        if let Some(stack) = state.stacks.get_mut(name) {
            stack.lifecycle = lifecycle;
        }
        Ok(())
    }

    async fn list_stack_resources(
        &self,
        stack: &str,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<StackResourceSummary>> {
        let mut state = self.state.lock();
        state.record("list_stack_resources", stack)?;
        let resources = state
            .stack_resources
            .get(stack)
            .cloned()
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "list_stack_resources"))?;
        paginate(resources, next_token, self.page_size)
    }
}

#[async_trait]
impl ObjectStorage for InMemoryCloud {
    async fn bucket_exists(&self, bucket: &str) -> ControlPlaneResult<bool> {
        let mut state = self.state.lock();
        state.record("bucket_exists", bucket)?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("create_bucket", bucket)?;
        if state.buckets.contains_key(bucket) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_bucket",
                "BucketAlreadyOwnedByYou",
            ));
        }
        state.buckets.insert(
            bucket.to_string(),
            Bucket {
                location: location_constraint.map(str::to_string),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> ControlPlaneResult<bool> {
        let mut state = self.state.lock();
        state.record("object_exists", bucket)?;
        Ok(state
            .buckets
            .get(bucket)
            .is_some_and(|b| b.objects.contains_key(key)))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("put_object", bucket)?;
        let target = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "put_object"))?;
        target.objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<String>> {
        let mut state = self.state.lock();
        state.record("list_objects", bucket)?;
        let keys: Vec<String> = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "list_objects"))?
            .objects
            .keys()
            .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
            .cloned()
            .collect();
        paginate(keys, next_token, self.page_size)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_object", bucket)?;
        let target = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_object"))?;
        target.objects.remove(key);
        Ok(())
    }

    async fn empty_bucket(&self, bucket: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("empty_bucket", bucket)?;
        let target = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "empty_bucket"))?;
        target.objects.clear();
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_bucket", bucket)?;
        match state.buckets.get(bucket) {
            None => Err(ControlPlaneError::not_found(SERVICE, "delete_bucket")),
            Some(b) if !b.objects.is_empty() => Err(ControlPlaneError::command(
                SERVICE,
                "delete_bucket",
                "BucketNotEmpty",
            )),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl KnowledgeBaseService for InMemoryCloud {
    async fn list_knowledge_bases(
        &self,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<KnowledgeBaseSummary>> {
        let mut state = self.state.lock();
        state.record("list_knowledge_bases", "")?;
        let all = state.knowledge_bases.values().cloned().collect();
        paginate(all, next_token, self.page_size)
    }

    async fn get_knowledge_base(
        &self,
        id: &str,
    ) -> ControlPlaneResult<Option<KnowledgeBaseSummary>> {
        let mut state = self.state.lock();
        state.record("get_knowledge_base", id)?;
        Ok(state.knowledge_bases.get(id).cloned())
    }

    async fn delete_knowledge_base(&self, id: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_knowledge_base", id)?;
        if state.knowledge_bases.remove(id).is_none() {
            return Err(ControlPlaneError::not_found(SERVICE, "delete_knowledge_base"));
        }
        state.data_sources.retain(|pair, _| pair.knowledge_base_id != id);
        Ok(())
    }

    async fn list_data_sources(
        &self,
        knowledge_base_id: &str,
        next_token: Option<&str>,
    ) -> ControlPlaneResult<Page<DataSourceSummary>> {
        let mut state = self.state.lock();
        state.record("list_data_sources", knowledge_base_id)?;
        if !state.knowledge_bases.contains_key(knowledge_base_id) {
            return Err(ControlPlaneError::not_found(SERVICE, "list_data_sources"));
        }
        let sources = state
            .data_sources
            .values()
            .filter(|ds| ds.knowledge_base_id == knowledge_base_id)
            .cloned()
            .collect();
        paginate(sources, next_token, self.page_size)
    }

    async fn get_data_source(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<Option<DataSourceSummary>> {
        let mut state = self.state.lock();
        state.record("get_data_source", &pair.to_string())?;
        Ok(state.data_sources.get(pair).cloned())
    }

    async fn delete_data_source(&self, pair: &DataSourcePair) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_data_source", &pair.to_string())?;
        state
            .data_sources
            .remove(pair)
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_data_source"))
    }

    async fn start_ingestion_job(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<IngestionJobSummary> {
        let mut state = self.state.lock();
        state.record("start_ingestion_job", &pair.to_string())?;
        if !state.data_sources.contains_key(pair) {
            return Err(ControlPlaneError::not_found(SERVICE, "start_ingestion_job"));
        }
        let id = state.next_id();
        let job = IngestionJobSummary {
            job_id: format!("ingest-{id}"),
            status: "STARTING".to_string(),
        };
        state
            .ingestion_jobs
            .entry(pair.clone())
            .or_default()
            .push(job.clone());
        Ok(job)
    }

    async fn list_ingestion_jobs(
        &self,
        pair: &DataSourcePair,
    ) -> ControlPlaneResult<Vec<IngestionJobSummary>> {
        let mut state = self.state.lock();
        state.record("list_ingestion_jobs", &pair.to_string())?;
        Ok(state.ingestion_jobs.get(pair).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl VectorSearchService for InMemoryCloud {
    async fn list_collections(
        &self,
        name_prefix: &str,
    ) -> ControlPlaneResult<Vec<CollectionSummary>> {
        let mut state = self.state.lock();
        state.record("list_collections", name_prefix)?;
        Ok(state
            .collections
            .values()
            .filter(|c| c.name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    async fn get_collection(&self, id: &str) -> ControlPlaneResult<Option<CollectionSummary>> {
        let mut state = self.state.lock();
        state.record("get_collection", id)?;
        Ok(state.collections.get(id).cloned())
    }

    async fn delete_collection(&self, id: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_collection", id)?;
        state
            .collections
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_collection"))
    }
}

#[async_trait]
impl ModelCustomizationService for InMemoryCloud {
    async fn get_foundation_model(&self, model_id: &str) -> ControlPlaneResult<Option<String>> {
        let mut state = self.state.lock();
        state.record("get_foundation_model", model_id)?;
        Ok(Some(format!(
            "arn:aws:bedrock:{}::foundation-model/{model_id}",
            self.region
        )))
    }

    async fn list_custom_models(
        &self,
        name_contains: &str,
    ) -> ControlPlaneResult<Vec<CustomModelSummary>> {
        let mut state = self.state.lock();
        state.record("list_custom_models", name_contains)?;
        Ok(state
            .custom_models
            .values()
            .filter(|m| m.name.contains(name_contains))
            .cloned()
            .collect())
    }

    async fn get_custom_model(&self, id: &str) -> ControlPlaneResult<Option<CustomModelSummary>> {
        let mut state = self.state.lock();
        state.record("get_custom_model", id)?;
        Ok(state
            .custom_model_key(id)
            .and_then(|name| state.custom_models.get(&name).cloned()))
    }

    async fn delete_custom_model(&self, id: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_custom_model", id)?;
        let name = state
            .custom_model_key(id)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_custom_model"))?;
        let arn = state
            .custom_models
            .get(&name)
            .map(|m| m.arn.clone())
            .unwrap_or_default();
        if state.throughputs.values().any(|pt| pt.model_arn == arn) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "delete_custom_model",
                "ResourceInUseException: model has provisioned throughput",
            ));
        }
        state.custom_models.remove(&name);
        Ok(())
    }

    async fn create_customization_job(
        &self,
        request: &CustomizationJobRequest,
    ) -> ControlPlaneResult<String> {
        let mut state = self.state.lock();
        state.record("create_customization_job", &request.job_name)?;
        if state.jobs.contains_key(&request.job_name) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_customization_job",
                format!("ValidationException: job {} exists", request.job_name),
            ));
        }
        let arn = format!(
            "arn:aws:bedrock:{}:{}:model-customization-job/{}",
            self.region, self.account, request.job_name
        );
        let lifecycle = state.lifecycle(Scripted::CustomizationJob);
        state.jobs.insert(
            request.job_name.clone(),
            Job {
                arn: arn.clone(),
                model_name: request.custom_model_name.clone(),
                lifecycle,
            },
        );
        Ok(arn)
    }

    async fn get_customization_job(
        &self,
        id: &str,
    ) -> ControlPlaneResult<Option<CustomizationJob>> {
        let mut state = self.state.lock();
        state.record("get_customization_job", id)?;
        let Some(name) = state.job_key(id) else {
            return Ok(None);
        };
        Ok(Some(state.customization_job(&name, &self.account, &self.region, true)))
    }

    async fn list_customization_jobs(
        &self,
        name_contains: &str,
    ) -> ControlPlaneResult<Vec<CustomizationJob>> {
        let mut state = self.state.lock();
        state.record("list_customization_jobs", name_contains)?;
        let names: Vec<String> = state
            .jobs
            .keys()
            .filter(|n| n.contains(name_contains))
            .cloned()
            .collect();
        Ok(names
            .iter()
            .map(|name| state.customization_job(name, &self.account, &self.region, false))
            .collect())
    }
}

#[async_trait]
impl InferenceProvisioningService for InMemoryCloud {
    async fn create_provisioned_throughput(
        &self,
        request: &ProvisionRequest,
    ) -> ControlPlaneResult<String> {
        let mut state = self.state.lock();
        state.record("create_provisioned_throughput", &request.name)?;
        if state.throughput_key(&request.name).is_some() {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_provisioned_throughput",
                format!("ValidationException: {} exists", request.name),
            ));
        }
        let id = state.next_id();
        let arn = format!(
            "arn:aws:bedrock:{}:{}:provisioned-model/pt{id}",
            self.region, self.account
        );
        let lifecycle = state.lifecycle(Scripted::Throughput);
        state.throughputs.insert(
            arn.clone(),
            Throughput {
                arn: arn.clone(),
                name: request.name.clone(),
                model_arn: request.model_arn.clone(),
                lifecycle,
            },
        );
        Ok(arn)
    }

    async fn get_provisioned_throughput(
        &self,
        id: &str,
    ) -> ControlPlaneResult<Option<ProvisionedThroughput>> {
        let mut state = self.state.lock();
        state.record("get_provisioned_throughput", id)?;
        Ok(state.throughput(id, true))
    }

    async fn delete_provisioned_throughput(&self, id: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_provisioned_throughput", id)?;
        let key = state
            .throughput_key(id)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_provisioned_throughput"))?;
        state.throughputs.remove(&key);
        Ok(())
    }

    async fn list_provisioned_throughputs(&self) -> ControlPlaneResult<Vec<ProvisionedThroughput>> {
        let mut state = self.state.lock();
        state.record("list_provisioned_throughputs", "")?;
        let arns: Vec<String> = state.throughputs.keys().cloned().collect();
        Ok(arns
            .iter()
            .filter_map(|arn| state.throughput(arn, false))
            .collect())
    }
}

#[async_trait]
impl IdentityService for InMemoryCloud {
    async fn account_id(&self) -> ControlPlaneResult<String> {
        self.state.lock().record("account_id", "")?;
        Ok(self.account.clone())
    }

    async fn get_role(&self, name: &str) -> ControlPlaneResult<Option<RoleSummary>> {
        let mut state = self.state.lock();
        state.record("get_role", name)?;
        Ok(state.roles.get(name).map(|r| RoleSummary {
            name: name.to_string(),
            arn: r.arn.clone(),
        }))
    }

    async fn create_role(
        &self,
        name: &str,
        _trust_policy: &Value,
        _description: &str,
    ) -> ControlPlaneResult<RoleSummary> {
        let mut state = self.state.lock();
        state.record("create_role", name)?;
        if state.roles.contains_key(name) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_role",
                "EntityAlreadyExists",
            ));
        }
        let arn = self.role_arn(name);
        state.roles.insert(
            name.to_string(),
            Role {
                arn: arn.clone(),
                ..Role::default()
            },
        );
        Ok(RoleSummary {
            name: name.to_string(),
            arn,
        })
    }

    async fn delete_role(&self, name: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_role", name)?;
        match state.roles.get(name) {
            None => Err(ControlPlaneError::not_found(SERVICE, "delete_role")),
            Some(role) if !role.inline.is_empty() || !role.attached.is_empty() => {
                Err(ControlPlaneError::command(
                    SERVICE,
                    "delete_role",
                    "DeleteConflict: role still has policies",
                ))
            }
            Some(_) => {
                state.roles.remove(name);
                Ok(())
            }
        }
    }

    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        document: &Value,
    ) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("put_role_policy", role)?;
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "put_role_policy"))?;
        entry.inline.insert(policy_name.to_string(), document.clone());
        Ok(())
    }

    async fn list_role_policies(&self, role: &str) -> ControlPlaneResult<Vec<String>> {
        let mut state = self.state.lock();
        state.record("list_role_policies", role)?;
        state
            .roles
            .get(role)
            .map(|r| r.inline.keys().cloned().collect())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "list_role_policies"))
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_role_policy", role)?;
        state
            .roles
            .get_mut(role)
            .and_then(|r| r.inline.remove(policy_name))
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_role_policy"))
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("attach_role_policy", role)?;
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "attach_role_policy"))?;
        entry.attached.insert(policy_arn.to_string());
        Ok(())
    }

    async fn list_attached_role_policies(&self, role: &str) -> ControlPlaneResult<Vec<String>> {
        let mut state = self.state.lock();
        state.record("list_attached_role_policies", role)?;
        state
            .roles
            .get(role)
            .map(|r| r.attached.iter().cloned().collect())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "list_attached_role_policies"))
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("detach_role_policy", role)?;
        let removed = state
            .roles
            .get_mut(role)
            .is_some_and(|r| r.attached.remove(policy_arn));
        if removed {
            Ok(())
        } else {
            Err(ControlPlaneError::not_found(SERVICE, "detach_role_policy"))
        }
    }
}

#[async_trait]
impl ContainerRegistry for InMemoryCloud {
    async fn describe_repository(
        &self,
        name: &str,
    ) -> ControlPlaneResult<Option<RepositorySummary>> {
        let mut state = self.state.lock();
        state.record("describe_repository", name)?;
        Ok(state.repositories.get(name).map(|r| RepositorySummary {
            name: name.to_string(),
            uri: r.uri.clone(),
        }))
    }

    async fn create_repository(&self, name: &str) -> ControlPlaneResult<RepositorySummary> {
        let mut state = self.state.lock();
        state.record("create_repository", name)?;
        if state.repositories.contains_key(name) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_repository",
                "RepositoryAlreadyExistsException",
            ));
        }
        let uri = self.repository_uri(name);
        state.repositories.insert(
            name.to_string(),
            Repository {
                uri: uri.clone(),
                images: BTreeSet::new(),
            },
        );
        Ok(RepositorySummary {
            name: name.to_string(),
            uri,
        })
    }

    async fn list_images(&self, name: &str) -> ControlPlaneResult<Vec<String>> {
        let mut state = self.state.lock();
        state.record("list_images", name)?;
        state
            .repositories
            .get(name)
            .map(|r| r.images.iter().cloned().collect())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "list_images"))
    }

    async fn delete_images(&self, name: &str, digests: &[String]) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_images", name)?;
        let repository = state
            .repositories
            .get_mut(name)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_images"))?;
        for digest in digests {
            repository.images.remove(digest);
        }
        Ok(())
    }

    async fn delete_repository(&self, name: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_repository", name)?;
        match state.repositories.get(name) {
            None => Err(ControlPlaneError::not_found(SERVICE, "delete_repository")),
            Some(r) if !r.images.is_empty() => Err(ControlPlaneError::command(
                SERVICE,
                "delete_repository",
                "RepositoryNotEmptyException",
            )),
            Some(_) => {
                state.repositories.remove(name);
                Ok(())
            }
        }
    }

    async fn login_password(&self) -> ControlPlaneResult<String> {
        self.state.lock().record("login_password", "")?;
        Ok("fake-password".to_string())
    }
}

#[async_trait]
impl BuildService for InMemoryCloud {
    async fn project_exists(&self, name: &str) -> ControlPlaneResult<bool> {
        let mut state = self.state.lock();
        state.record("project_exists", name)?;
        Ok(state.projects.contains_key(name))
    }

    async fn create_project(&self, request: &BuildProjectRequest) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("create_project", &request.name)?;
        if state.projects.contains_key(&request.name) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_project",
                "ResourceAlreadyExistsException",
            ));
        }
        state.projects.insert(request.name.clone(), request.clone());
        Ok(())
    }

    async fn update_project(&self, request: &BuildProjectRequest) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("update_project", &request.name)?;
        let project = state
            .projects
            .get_mut(&request.name)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "update_project"))?;
        *project = request.clone();
        Ok(())
    }

    async fn start_build(&self, project: &str) -> ControlPlaneResult<String> {
        let mut state = self.state.lock();
        state.record("start_build", project)?;
        if !state.projects.contains_key(project) {
            return Err(ControlPlaneError::not_found(SERVICE, "start_build"));
        }
        let id = format!("{project}:{}", state.next_id());
        let lifecycle = state.lifecycle(Scripted::Build);
        state.builds.insert(id.clone(), Build { lifecycle });
        Ok(id)
    }

    async fn get_build(&self, id: &str) -> ControlPlaneResult<Option<BuildStatus>> {
        let mut state = self.state.lock();
        state.record("get_build", id)?;
        Ok(state.builds.get_mut(id).map(|b| BuildStatus {
            id: id.to_string(),
            status: b.lifecycle.observe(),
        }))
    }

    async fn delete_project(&self, name: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_project", name)?;
        state
            .projects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_project"))
    }
}

#[async_trait]
impl HostingService for InMemoryCloud {
    async fn find_service(&self, name: &str) -> ControlPlaneResult<Option<ServiceSummary>> {
        let mut state = self.state.lock();
        state.record("find_service", name)?;
        let arn = state
            .services
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(arn, _)| arn.clone());
        Ok(arn.and_then(|arn| state.service_summary(&arn, false)))
    }

    async fn describe_service(&self, arn: &str) -> ControlPlaneResult<Option<ServiceSummary>> {
        let mut state = self.state.lock();
        state.record("describe_service", arn)?;
        Ok(state.service_summary(arn, true))
    }

    async fn create_service(&self, request: &ServiceRequest) -> ControlPlaneResult<ServiceSummary> {
        let mut state = self.state.lock();
        state.record("create_service", &request.name)?;
        if state.services.values().any(|s| s.name == request.name) {
            return Err(ControlPlaneError::command(
                SERVICE,
                "create_service",
                "InvalidRequestException: service exists",
            ));
        }
        let id = state.next_id();
        let arn = format!(
            "arn:aws:apprunner:{}:{}:service/{}/{id}",
            self.region, self.account, request.name
        );
        let lifecycle = state.lifecycle(Scripted::Service);
        state.services.insert(
            arn.clone(),
            Service {
                name: request.name.clone(),
                url: format!("svc{id}.{}.awsapprunner.com", self.region),
                lifecycle,
                request: request.clone(),
            },
        );
        state
            .service_summary(&arn, false)
            .ok_or_else(|| ControlPlaneError::malformed(SERVICE, "create_service", "service vanished"))
    }

    async fn update_service(
        &self,
        arn: &str,
        request: &ServiceRequest,
    ) -> ControlPlaneResult<ServiceSummary> {
        let mut state = self.state.lock();
        state.record("update_service", arn)?;
        if !state.services.contains_key(arn) {
            return Err(ControlPlaneError::not_found(SERVICE, "update_service"));
        }
        let lifecycle = state.lifecycle(Scripted::Service);
        if let Some(service) = state.services.get_mut(arn) {
            service.lifecycle = lifecycle;
            service.request = request.clone();
        }
        state
            .service_summary(arn, false)
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "update_service"))
    }

    async fn delete_service(&self, arn: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        state.record("delete_service", arn)?;
        state
            .services
            .remove(arn)
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::not_found(SERVICE, "delete_service"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_lifecycle_advances_per_observation() {
        let cloud = InMemoryCloud::new();
        let request = ProvisionRequest {
            name: "pt".to_string(),
            model_arn: "m".to_string(),
            model_units: 1,
            client_token: "t".to_string(),
        };
        let arn = cloud.create_provisioned_throughput(&request).await.unwrap();

        let listed = cloud.list_provisioned_throughputs().await.unwrap();
        assert_eq!(listed[0].status, "Creating");
        let first = cloud.get_provisioned_throughput(&arn).await.unwrap().unwrap();
        let second = cloud.get_provisioned_throughput(&arn).await.unwrap().unwrap();
        let third = cloud.get_provisioned_throughput("pt").await.unwrap().unwrap();

        assert_eq!(first.status, "Creating");
        assert_eq!(second.status, "InService");
        assert_eq!(third.status, "InService");
    }

    #[tokio::test]
    async fn test_injected_failure_is_journaled() {
        let cloud = InMemoryCloud::new();
        cloud.fail_on("bucket_exists");

        let err = cloud.bucket_exists("b").await.unwrap_err();

        assert!(!err.is_not_found());
        assert_eq!(cloud.calls_to("bucket_exists"), 1);
        assert_eq!(cloud.index_of("bucket_exists", "b"), Some(0));
    }

    #[tokio::test]
    async fn test_non_empty_bucket_refuses_deletion() {
        let cloud = InMemoryCloud::new();
        cloud.put_object_now("b", "k", b"x");

        assert!(cloud.delete_bucket("b").await.is_err());
        cloud.empty_bucket("b").await.unwrap();
        cloud.delete_bucket("b").await.unwrap();
        assert!(!cloud.has_bucket("b"));
    }

    #[tokio::test]
    async fn test_stack_deletion_removes_tree() {
        let cloud = InMemoryCloud::new();
        cloud.put_object_now("deploy", "templates/main.yaml", b"{}");
        cloud
            .validate_template("https://deploy.s3.amazonaws.com/templates/main.yaml")
            .await
            .unwrap();
        cloud
            .create_stack(&CreateStackRequest {
                name: "s".to_string(),
                template_url: String::new(),
                parameters: BTreeMap::new(),
                capabilities: Vec::new(),
            })
            .await
            .unwrap();
        cloud.delete_stack("s").await.unwrap();

        let first = cloud.describe_stack("s").await.unwrap().unwrap();
        assert_eq!(first.status, "DELETE_IN_PROGRESS");
        assert!(cloud.describe_stack("s").await.unwrap().is_none());
        assert!(cloud.list_stack_resources("s-RagStack", None).await.is_err());
        assert!(cloud.get_knowledge_base("kb-s").await.unwrap().is_some());
    }

    #[test]
    fn test_paginate_offsets() {
        let page = paginate(vec![1, 2, 3], None, 2).unwrap();
        assert_eq!(page, Page::more(vec![1, 2], "2"));
        let rest = paginate(vec![1, 2, 3], Some("2"), 2).unwrap();
        assert_eq!(rest, Page::last(vec![3]));
        assert!(paginate(vec![1], Some("x"), 2).is_err());
    }
}

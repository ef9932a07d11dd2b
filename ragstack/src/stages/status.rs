//! Read-only report of what currently exists.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

use super::lookup::{
    all_data_sources, collection_ids, custom_models, knowledge_base_ids, stack_inventory,
    throughputs,
};
use super::{Stage, StageOutput};
use crate::core::StageName;
use crate::discovery::Inventory;
use crate::errors::{DeployError, Result};
use crate::pipeline::DeployContext;

const ABSENT: &str = "ABSENT";
const EXISTS: &str = "EXISTS";
const ERROR: &str = "ERROR";

/// A reportable part of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// The root stack.
    Stack,
    /// Deployment bucket.
    DeploymentBucket,
    /// Source document bucket.
    SourceBucket,
    /// Corpus bucket.
    CorpusBucket,
    /// Tuning bucket.
    TuningBucket,
    /// Knowledge bases owned by the stack.
    KnowledgeBases,
    /// Data sources of those knowledge bases.
    DataSources,
    /// Vector-search collections.
    Collections,
    /// Custom models with the model prefix.
    CustomModel,
    /// Provisioned throughputs with the throughput prefix.
    ProvisionedThroughput,
    /// The tuning role.
    TuningRole,
    /// Container repository.
    Repository,
    /// Hosted application service.
    HostedService,
}

impl Component {
    /// Every component, in report order.
    pub const ALL: [Self; 13] = [
        Self::Stack,
        Self::DeploymentBucket,
        Self::SourceBucket,
        Self::CorpusBucket,
        Self::TuningBucket,
        Self::KnowledgeBases,
        Self::DataSources,
        Self::Collections,
        Self::CustomModel,
        Self::ProvisionedThroughput,
        Self::TuningRole,
        Self::Repository,
        Self::HostedService,
    ];

    /// Returns the component label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stack => "stack",
            Self::DeploymentBucket => "deployment-bucket",
            Self::SourceBucket => "source-bucket",
            Self::CorpusBucket => "corpus-bucket",
            Self::TuningBucket => "tuning-bucket",
            Self::KnowledgeBases => "knowledge-bases",
            Self::DataSources => "data-sources",
            Self::Collections => "collections",
            Self::CustomModel => "custom-model",
            Self::ProvisionedThroughput => "provisioned-throughput",
            Self::TuningRole => "tuning-role",
            Self::Repository => "repository",
            Self::HostedService => "hosted-service",
        }
    }

    const fn needs_inventory(self) -> bool {
        matches!(
            self,
            Self::KnowledgeBases | Self::DataSources | Self::Collections
        )
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Which component.
    pub component: Component,
    /// Whether anything was found.
    pub present: bool,
    /// Short state, e.g. `CREATE_COMPLETE`, `ABSENT` or `ERROR`.
    pub state: String,
    /// Identifiers or an error message.
    pub detail: Option<String>,
}

impl ComponentStatus {
    fn found(component: Component, state: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            component,
            present: true,
            state: state.into(),
            detail,
        }
    }

    fn absent(component: Component) -> Self {
        Self {
            component,
            present: false,
            state: ABSENT.to_string(),
            detail: None,
        }
    }

    fn counted(component: Component, ids: &[String]) -> Self {
        if ids.is_empty() {
            Self::absent(component)
        } else {
            Self::found(component, format!("{} found", ids.len()), Some(ids.join(", ")))
        }
    }

    /// Returns true when the lookup itself failed, so presence is unknown.
    #[must_use]
    pub fn is_unverified(&self) -> bool {
        self.state == ERROR
    }

    fn failed(component: Component, error: impl fmt::Display) -> Self {
        Self {
            component,
            present: false,
            state: ERROR.to_string(),
            detail: Some(error.to_string()),
        }
    }
}

/// A snapshot of every requested component.
///
/// Collecting a report never fails; a lookup error is recorded against the
/// component it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Component states in report order.
    pub components: Vec<ComponentStatus>,
}

impl StatusReport {
    /// Checks every component.
    pub async fn collect(ctx: &DeployContext) -> Self {
        Self::collect_only(ctx, &Component::ALL).await
    }

    /// Checks the given components.
    pub async fn collect_only(ctx: &DeployContext, components: &[Component]) -> Self {
        let inventory = if components.iter().any(|c| c.needs_inventory()) {
            Some(stack_inventory(ctx).await.map_err(|e| e.to_string()))
        } else {
            None
        };

        let mut statuses = Vec::with_capacity(components.len());
        for &component in components {
            let status = match (component.needs_inventory(), &inventory) {
                (true, Some(Err(e))) => Ok(ComponentStatus::failed(component, e)),
                (true, Some(Ok(inventory))) => check(ctx, component, inventory).await,
                _ => check(ctx, component, &Inventory::default()).await,
            }
            .unwrap_or_else(|e| ComponentStatus::failed(component, e));
            statuses.push(status);
        }
        Self {
            components: statuses,
        }
    }

    /// State of one component, if it was checked.
    #[must_use]
    pub fn get(&self, component: Component) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.component == component)
    }

    /// Returns true if every checked component was found.
    #[must_use]
    pub fn all_present(&self) -> bool {
        self.components.iter().all(|c| c.present)
    }

    /// Components that are still present.
    #[must_use]
    pub fn present(&self) -> Vec<Component> {
        self.components
            .iter()
            .filter(|c| c.present)
            .map(|c| c.component)
            .collect()
    }

    /// Plain-text table for terminals.
    #[must_use]
    pub fn render_table(&self) -> String {
        let width = self
            .components
            .iter()
            .map(|c| c.component.as_str().len())
            .max()
            .unwrap_or(0)
            .max("COMPONENT".len());

        let mut out = format!("{:<width$}  {:<7}  {:<24}  DETAIL\n", "COMPONENT", "PRESENT", "STATE");
        for c in &self.components {
            let _ = writeln!(
                out,
                "{:<width$}  {:<7}  {:<24}  {}",
                c.component.as_str(),
                if c.present { "yes" } else { "no" },
                c.state,
                c.detail.as_deref().unwrap_or("-"),
            );
        }
        out
    }
}

async fn check(
    ctx: &DeployContext,
    component: Component,
    inventory: &Inventory,
) -> Result<ComponentStatus> {
    let config = &ctx.config;
    let cloud = &ctx.cloud;

    let bucket = |name: &str| {
        let name = name.to_string();
        async move {
            Ok::<_, DeployError>(if cloud.storage.bucket_exists(&name).await? {
                ComponentStatus::found(component, EXISTS, Some(name))
            } else {
                ComponentStatus::absent(component)
            })
        }
    };

    match component {
        Component::Stack => Ok(match cloud.stacks.describe_stack(&config.stack_name).await? {
            Some(stack) => ComponentStatus::found(component, stack.status, Some(stack.stack_id)),
            None => ComponentStatus::absent(component),
        }),
        Component::DeploymentBucket => bucket(&config.buckets.deployment).await,
        Component::SourceBucket => bucket(&config.buckets.source).await,
        Component::CorpusBucket => bucket(&config.buckets.corpus).await,
        Component::TuningBucket => bucket(&config.buckets.tuning).await,
        Component::KnowledgeBases => {
            let live = live_knowledge_bases(ctx, inventory).await?;
            Ok(ComponentStatus::counted(component, &live))
        }
        Component::DataSources => {
            let mut pairs = Vec::new();
            for kb in live_knowledge_bases(ctx, inventory).await? {
                for ds in all_data_sources(cloud.knowledge_bases.as_ref(), &kb).await? {
                    pairs.push(format!("{kb}/{}", ds.id));
                }
            }
            Ok(ComponentStatus::counted(component, &pairs))
        }
        Component::Collections => {
            let mut live = Vec::new();
            for id in collection_ids(ctx, inventory).await? {
                if cloud.vector_search.get_collection(&id).await?.is_some() {
                    live.push(id);
                }
            }
            Ok(ComponentStatus::counted(component, &live))
        }
        Component::CustomModel => {
            let names: Vec<String> = custom_models(ctx).await?.into_iter().map(|m| m.name).collect();
            Ok(ComponentStatus::counted(component, &names))
        }
        Component::ProvisionedThroughput => {
            let found: Vec<String> = throughputs(ctx)
                .await?
                .into_iter()
                .map(|pt| format!("{} ({})", pt.name, pt.status))
                .collect();
            Ok(ComponentStatus::counted(component, &found))
        }
        Component::TuningRole => Ok(match cloud.identity.get_role(&config.model.tuning_role).await? {
            Some(role) => ComponentStatus::found(component, EXISTS, Some(role.arn)),
            None => ComponentStatus::absent(component),
        }),
        Component::Repository => Ok(
            match cloud.registry.describe_repository(&config.app.repository_name).await? {
                Some(repo) => ComponentStatus::found(component, EXISTS, Some(repo.uri)),
                None => ComponentStatus::absent(component),
            },
        ),
        Component::HostedService => Ok(
            match cloud.hosting.find_service(&config.app.service_name).await? {
                Some(service) => ComponentStatus::found(component, service.status, service.url),
                None => ComponentStatus::absent(component),
            },
        ),
    }
}

/// Knowledge-base ids that still resolve.
async fn live_knowledge_bases(ctx: &DeployContext, inventory: &Inventory) -> Result<Vec<String>> {
    let mut live = Vec::new();
    for id in knowledge_base_ids(ctx, inventory).await? {
        if ctx.cloud.knowledge_bases.get_knowledge_base(&id).await?.is_some() {
            live.push(id);
        }
    }
    Ok(live)
}

/// Reports the deployment state without changing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusStage;

#[async_trait]
impl Stage for StatusStage {
    fn name(&self) -> StageName {
        StageName::Status
    }

    async fn execute(&self, ctx: &DeployContext) -> Result<StageOutput> {
        let report = StatusReport::collect(ctx).await;
        for c in &report.components {
            tracing::info!(
                component = %c.component,
                present = c.present,
                state = %c.state,
                detail = c.detail.as_deref().unwrap_or("-"),
                "component status"
            );
        }

        Ok(StageOutput::completed()
            .with("all_present", serde_json::json!(report.all_present()))
            .with("report", serde_json::to_value(&report)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PrepareInfraStage;
    use crate::testing::TestBed;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_nothing_present_before_deploy() {
        let bed = TestBed::new().unwrap();

        let report = StatusReport::collect(&bed.context()).await;

        assert_eq!(report.components.len(), Component::ALL.len());
        assert!(report.present().is_empty());
        assert_eq!(report.get(Component::Stack).unwrap().state, "ABSENT");
    }

    #[tokio::test]
    async fn test_stack_resources_reported_after_infra() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        PrepareInfraStage.execute(&ctx).await.unwrap();

        let report = StatusReport::collect(&ctx).await;

        assert_eq!(report.get(Component::Stack).unwrap().state, "CREATE_COMPLETE");
        for component in [
            Component::DeploymentBucket,
            Component::KnowledgeBases,
            Component::DataSources,
            Component::Collections,
        ] {
            assert!(report.get(component).unwrap().present, "{component} missing");
        }
        assert!(!report.get(Component::TuningRole).unwrap().present);
    }

    #[tokio::test]
    async fn test_lookup_error_recorded_per_component() {
        let bed = TestBed::new().unwrap();
        bed.cloud().fail_on("describe_stack");

        let ctx = bed.context();
        let report =
            StatusReport::collect_only(&ctx, &[Component::Stack, Component::TuningRole]).await;

        let stack = report.get(Component::Stack).unwrap();
        assert_eq!(stack.state, "ERROR");
        assert!(!stack.present);
        assert_eq!(report.get(Component::TuningRole).unwrap().state, "ABSENT");
    }

    #[tokio::test]
    async fn test_stage_output_carries_report() {
        let bed = TestBed::new().unwrap();

        let output = StatusStage.execute(&bed.context()).await.unwrap();

        assert_eq!(output.data["all_present"], serde_json::json!(false));
        assert_eq!(output.data["report"]["components"][0]["component"], "stack");
    }

    #[test]
    fn test_render_table_lists_components() {
        let report = StatusReport {
            components: vec![ComponentStatus::absent(Component::HostedService)],
        };
        let table = report.render_table();
        assert!(table.starts_with("COMPONENT"));
        assert!(table.contains("hosted-service"));
        assert!(table.contains("ABSENT"));
    }
}

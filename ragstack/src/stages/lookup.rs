//! Read-only lookups shared by stages, status and teardown.

use std::collections::BTreeSet;
use std::future::Future;

use crate::control::{
    CustomModelSummary, DataSourceSummary, KnowledgeBaseService, KnowledgeBaseSummary,
    ObjectStorage, Page, ProvisionedThroughput,
};
use crate::core::{normalize_id, select_latest, NamingConvention};
use crate::discovery::Inventory;
use crate::errors::{ControlPlaneResult, Result};
use crate::pipeline::DeployContext;

/// Status of a provisioned throughput that serves traffic.
pub const IN_SERVICE: &str = "InService";

/// Follows continuation tokens until the listing is exhausted.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> ControlPlaneResult<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ControlPlaneResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut token = None;
    loop {
        let page = fetch(token.take()).await?;
        items.extend(page.items);
        match page.next_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => return Ok(items),
        }
    }
}

/// Every knowledge base in the region.
pub async fn all_knowledge_bases(
    service: &dyn KnowledgeBaseService,
) -> ControlPlaneResult<Vec<KnowledgeBaseSummary>> {
    collect_pages(move |token| async move { service.list_knowledge_bases(token.as_deref()).await })
        .await
}

/// Every data source of one knowledge base.
pub async fn all_data_sources(
    service: &dyn KnowledgeBaseService,
    knowledge_base_id: &str,
) -> ControlPlaneResult<Vec<DataSourceSummary>> {
    collect_pages(move |token| async move {
        service
            .list_data_sources(knowledge_base_id, token.as_deref())
            .await
    })
    .await
}

/// Every object key in a bucket.
pub async fn all_object_keys(
    storage: &dyn ObjectStorage,
    bucket: &str,
) -> ControlPlaneResult<Vec<String>> {
    collect_pages(move |token| async move {
        storage.list_objects(bucket, None, token.as_deref()).await
    })
    .await
}

/// Resources of the deployment stack; empty when the stack does not exist.
pub async fn stack_inventory(ctx: &DeployContext) -> Result<Inventory> {
    let stack = &ctx.config.stack_name;
    if ctx.cloud.stacks.describe_stack(stack).await?.is_none() {
        return Ok(Inventory::default());
    }
    ctx.walker().walk(stack).await
}

/// Knowledge bases owned by the stack: those in the graph plus the one
/// carrying the stack's exact knowledge-base name.
pub async fn knowledge_base_ids(
    ctx: &DeployContext,
    inventory: &Inventory,
) -> Result<BTreeSet<String>> {
    let mut ids = inventory.knowledge_base_ids();
    let name = ctx.config.naming.knowledge_base_name();
    let listed = all_knowledge_bases(ctx.cloud.knowledge_bases.as_ref()).await?;
    ids.extend(
        listed
            .into_iter()
            .filter(|kb| kb.name == name)
            .map(|kb| normalize_id(&kb.id)),
    );
    Ok(ids)
}

/// Vector-search collections owned by the stack, matched the same way.
pub async fn collection_ids(ctx: &DeployContext, inventory: &Inventory) -> Result<BTreeSet<String>> {
    let mut ids = inventory.collection_ids();
    let name = ctx.config.naming.collection_name();
    let listed = ctx.cloud.vector_search.list_collections(&name).await?;
    ids.extend(
        listed
            .into_iter()
            .filter(|c| c.name == name)
            .map(|c| normalize_id(&c.id)),
    );
    Ok(ids)
}

/// Custom models carrying the model prefix.
pub async fn custom_models(ctx: &DeployContext) -> Result<Vec<CustomModelSummary>> {
    let prefix = &ctx.config.model.prefix;
    let models = ctx.cloud.models.list_custom_models(prefix).await?;
    Ok(models
        .into_iter()
        .filter(|m| m.name.starts_with(prefix.as_str()))
        .collect())
}

/// The most recent custom model by name.
pub async fn latest_custom_model(ctx: &DeployContext) -> Result<Option<CustomModelSummary>> {
    let prefix = &ctx.config.model.prefix;
    Ok(select_latest(custom_models(ctx).await?, prefix, |m| {
        m.name.as_str()
    }))
}

/// Provisioned throughputs carrying the throughput prefix.
pub async fn throughputs(ctx: &DeployContext) -> Result<Vec<ProvisionedThroughput>> {
    let prefix = NamingConvention::provisioned_throughput_prefix(&ctx.config.model.prefix);
    let all = ctx.cloud.throughput.list_provisioned_throughputs().await?;
    Ok(all
        .into_iter()
        .filter(|pt| pt.name.starts_with(&prefix))
        .collect())
}

/// The most recent in-service throughput, if any.
pub async fn active_throughput(ctx: &DeployContext) -> Result<Option<ProvisionedThroughput>> {
    let prefix = NamingConvention::provisioned_throughput_prefix(&ctx.config.model.prefix);
    let serving = throughputs(ctx)
        .await?
        .into_iter()
        .filter(|pt| pt.status == IN_SERVICE);
    Ok(select_latest(serving, &prefix, |pt| pt.name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ProvisionRequest;
    use crate::testing::{InMemoryCloud, TestBed};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_collect_pages_follows_tokens() {
        let cloud = InMemoryCloud::new().with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            cloud.put_object_now("bucket", key, b"x");
        }

        let keys = all_object_keys(&cloud, "bucket").await.unwrap();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(cloud.calls_to("list_objects"), 3);
    }

    #[tokio::test]
    async fn test_stack_inventory_empty_without_stack() {
        let bed = TestBed::new().unwrap();
        let inventory = stack_inventory(&bed.context()).await.unwrap();
        assert!(inventory.is_empty());
    }

    #[tokio::test]
    async fn test_neighbouring_stack_resources_not_claimed() {
        let bed = TestBed::new().unwrap();
        let own = bed.seed_knowledge_base();
        bed.cloud().put_knowledge_base("OTHERKB", "ofac-rag-staging-kb");
        bed.cloud().put_collection("own-coll", "ofac-rag-vectors");
        bed.cloud().put_collection("other-coll", "ofac-rag-vectors-staging");
        let ctx = bed.context();
        let inventory = Inventory::default();

        let kbs = knowledge_base_ids(&ctx, &inventory).await.unwrap();
        assert_eq!(kbs.into_iter().collect::<Vec<_>>(), vec![own]);
        let collections = collection_ids(&ctx, &inventory).await.unwrap();
        assert_eq!(collections.into_iter().collect::<Vec<_>>(), vec!["own-coll"]);
    }

    #[tokio::test]
    async fn test_latest_custom_model_by_name() {
        let bed = TestBed::new().unwrap();
        for name in [
            "ofac-nova-custom-20240101",
            "ofac-nova-custom-20240315",
            "ofac-nova-custom-20231231",
            "someone-else-20991231",
        ] {
            bed.cloud().put_custom_model(name);
        }

        let latest = latest_custom_model(&bed.context()).await.unwrap().unwrap();
        assert_eq!(latest.name, "ofac-nova-custom-20240315");
    }

    #[tokio::test]
    async fn test_active_throughput_requires_in_service() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        let model = bed.cloud().put_custom_model("ofac-nova-custom-20240315");
        ctx.cloud
            .throughput
            .create_provisioned_throughput(&ProvisionRequest {
                name: "ofac-nova-custom-pt-20240315".to_string(),
                model_arn: model.arn,
                model_units: 1,
                client_token: "t".to_string(),
            })
            .await
            .unwrap();

        assert!(active_throughput(&ctx).await.unwrap().is_none());
        bed.cloud().settle_throughputs();
        let active = active_throughput(&ctx).await.unwrap().unwrap();
        assert_eq!(active.name, "ofac-nova-custom-pt-20240315");
    }
}

//! Synthetic nested-stack fixture.

use super::InMemoryCloud;
use crate::control::{
    CollectionSummary, DataSourceSummary, KnowledgeBaseSummary, StackResourceSummary,
};
use crate::core::{DataSourcePair, NESTED_STACK_TYPE};

const COMPLETE: &str = "CREATE_COMPLETE";

fn resource(logical_id: &str, physical_id: &str, resource_type: &str) -> StackResourceSummary {
    StackResourceSummary {
        logical_id: logical_id.to_string(),
        physical_id: physical_id.to_string(),
        resource_type: resource_type.to_string(),
        status: COMPLETE.to_string(),
    }
}

/// A three-level stack tree with one knowledge base, one collection and
/// a data source whose knowledge base no longer exists.
#[derive(Debug, Clone)]
pub struct StackFixture {
    /// Root stack name.
    pub root: String,
    /// Resource listing per stack name.
    pub stacks: Vec<(String, Vec<StackResourceSummary>)>,
    /// Knowledge bases the tree owns.
    pub knowledge_bases: Vec<KnowledgeBaseSummary>,
    /// Data sources of those knowledge bases.
    pub data_sources: Vec<DataSourceSummary>,
    /// Vector-search collections.
    pub collections: Vec<CollectionSummary>,
}

/// Builds the fixture rooted at `root`.
///
/// ```text
/// root                       depth 0
/// ├── ServiceRole
/// ├── StorageStack           depth 1: LogBucket, CorpusBucketPolicy
/// └── RagStack               depth 1: VectorCollection
///     └── KnowledgeStack     depth 2: KnowledgeBase, DataSource, LegacyDataSource
/// ```
#[must_use]
pub fn nested_stack_fixture(root: &str) -> StackFixture {
    let storage = format!("{root}-StorageStack");
    let rag = format!("{root}-RagStack");
    let knowledge = format!("{root}-KnowledgeStack");
    let kb_id = format!("kb-{root}");
    let ds_id = format!("ds-{root}");
    let collection_id = format!("coll-{root}");

    let stacks = vec![
        (
            root.to_string(),
            vec![
                resource("ServiceRole", &format!("{root}-service-role"), "AWS::IAM::Role"),
                resource("StorageStack", &storage, NESTED_STACK_TYPE),
                resource("RagStack", &rag, NESTED_STACK_TYPE),
            ],
        ),
        (
            storage.clone(),
            vec![
                resource("LogBucket", &format!("{root}-logs"), "AWS::S3::Bucket"),
                resource(
                    "CorpusBucketPolicy",
                    &format!("{root}-corpus-policy"),
                    "AWS::S3::BucketPolicy",
                ),
            ],
        ),
        (
            rag,
            vec![
                resource(
                    "VectorCollection",
                    &collection_id,
                    "AWS::OpenSearchServerless::Collection",
                ),
                resource("KnowledgeStack", &knowledge, NESTED_STACK_TYPE),
            ],
        ),
        (
            knowledge,
            vec![
                resource("KnowledgeBase", &kb_id, "AWS::Bedrock::KnowledgeBase"),
                resource(
                    "DataSource",
                    &format!("{kb_id}|{ds_id}"),
                    "AWS::Bedrock::DataSource",
                ),
                resource("LegacyDataSource", "KBGONE|DSOLD", "AWS::Bedrock::DataSource"),
            ],
        ),
    ];

    StackFixture {
        root: root.to_string(),
        stacks,
        knowledge_bases: vec![KnowledgeBaseSummary {
            id: kb_id.clone(),
            name: format!("{root}-kb"),
            status: "ACTIVE".to_string(),
        }],
        data_sources: vec![DataSourceSummary {
            id: ds_id,
            knowledge_base_id: kb_id,
            name: format!("{root}-corpus"),
            status: "AVAILABLE".to_string(),
        }],
        collections: vec![CollectionSummary {
            id: collection_id,
            name: format!("{root}-vectors"),
            status: "ACTIVE".to_string(),
        }],
    }
}

impl StackFixture {
    /// Registers every listing and owned resource with `cloud`.
    pub fn install(&self, cloud: &InMemoryCloud) {
        for (stack, resources) in &self.stacks {
            cloud.put_stack_resources(stack, resources.clone());
        }
        for kb in &self.knowledge_bases {
            cloud.put_knowledge_base(&kb.id, &kb.name);
        }
        for ds in &self.data_sources {
            cloud.put_data_source(&DataSourcePair::new(&ds.knowledge_base_id, &ds.id), &ds.name);
        }
        for collection in &self.collections {
            cloud.put_collection(&collection.id, &collection.name);
        }
    }

    /// Resources across every stack, nested-stack entries included.
    #[must_use]
    pub fn total_resources(&self) -> usize {
        self.stacks.iter().map(|(_, resources)| resources.len()).sum()
    }

    /// Names of the nested stacks, root excluded.
    #[must_use]
    pub fn nested_stacks(&self) -> Vec<&str> {
        self.stacks
            .iter()
            .skip(1)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixture_shape() {
        let fixture = nested_stack_fixture("root");
        assert_eq!(fixture.total_resources(), 10);
        assert_eq!(
            fixture.nested_stacks(),
            vec!["root-StorageStack", "root-RagStack", "root-KnowledgeStack"]
        );
        assert_eq!(fixture.knowledge_bases[0].name, "root-kb");
    }
}

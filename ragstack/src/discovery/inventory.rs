//! Flat resource inventory and knowledge-base pairing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::{normalize_id, DataSourcePair, ResourceKind, ResourceRecord};

/// Every record found by one traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    records: Vec<ResourceRecord>,
}

impl Inventory {
    /// Wraps a set of records.
    #[must_use]
    pub const fn new(records: Vec<ResourceRecord>) -> Self {
        Self { records }
    }

    /// All records, in discovery order.
    #[must_use]
    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deepest nesting level seen.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.records.iter().map(|r| r.depth).max().unwrap_or(0)
    }

    /// Records of one kind.
    pub fn of_kind<'a>(&'a self, kind: &'a ResourceKind) -> impl Iterator<Item = &'a ResourceRecord> {
        self.records.iter().filter(move |r| &r.kind() == kind)
    }

    fn physical_ids(&self, kind: &ResourceKind) -> BTreeSet<String> {
        self.of_kind(kind)
            .map(|r| normalize_id(&r.physical_id))
            .filter(|id| !id.is_empty())
            .collect()
    }

    /// Normalized knowledge-base ids.
    #[must_use]
    pub fn knowledge_base_ids(&self) -> BTreeSet<String> {
        self.physical_ids(&ResourceKind::KnowledgeBase)
    }

    /// Normalized vector-search collection ids.
    #[must_use]
    pub fn collection_ids(&self) -> BTreeSet<String> {
        self.physical_ids(&ResourceKind::Collection)
    }

    /// Data-source pairs parsed from compound physical ids.
    ///
    /// Records whose id does not parse are logged and left out.
    #[must_use]
    pub fn data_source_pairs(&self) -> Vec<DataSourcePair> {
        let mut pairs = Vec::new();
        for record in self.of_kind(&ResourceKind::DataSource) {
            match DataSourcePair::parse(&record.physical_id) {
                Some(pair) => pairs.push(pair),
                None => tracing::warn!(
                    logical_id = %record.logical_id,
                    physical_id = %record.physical_id,
                    "data source id is not a KB|DS pair"
                ),
            }
        }
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Pairs whose knowledge base was found in this same traversal.
    #[must_use]
    pub fn match_pairs(&self) -> PairMatch {
        match_pairs(&self.knowledge_base_ids(), self.data_source_pairs())
    }
}

/// Data-source pairs split by whether their knowledge base is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairMatch {
    /// Pairs to act on.
    pub matched: Vec<DataSourcePair>,
    /// Pairs whose knowledge base was not discovered.
    pub skipped: Vec<DataSourcePair>,
}

/// Splits `pairs` by membership of their knowledge-base half in `kb_ids`.
///
/// Comparison is on normalized ids, so decorated and bare forms match.
#[must_use]
pub fn match_pairs<I>(kb_ids: &BTreeSet<String>, pairs: I) -> PairMatch
where
    I: IntoIterator<Item = DataSourcePair>,
{
    let known: BTreeSet<String> = kb_ids.iter().map(|id| normalize_id(id)).collect();
    let mut result = PairMatch::default();
    for pair in pairs {
        if known.contains(&normalize_id(&pair.knowledge_base_id)) {
            result.matched.push(pair);
        } else {
            result.skipped.push(pair);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(kind: &str, logical: &str, physical: &str) -> ResourceRecord {
        ResourceRecord {
            path: vec!["root".to_string()],
            depth: 0,
            logical_id: logical.to_string(),
            physical_id: physical.to_string(),
            resource_type: kind.to_string(),
            status: "CREATE_COMPLETE".to_string(),
        }
    }

    #[test]
    fn test_pairing_skips_unknown_knowledge_bases() {
        let kb_ids: BTreeSet<String> = ["A", "B"].iter().map(|s| (*s).to_string()).collect();
        let pairs = ["A|1", "C|2", "B|3"]
            .iter()
            .filter_map(|s| DataSourcePair::parse(s));

        let result = match_pairs(&kb_ids, pairs);

        assert_eq!(
            result.matched,
            vec![DataSourcePair::new("A", "1"), DataSourcePair::new("B", "3")]
        );
        assert_eq!(result.skipped, vec![DataSourcePair::new("C", "2")]);
    }

    #[test]
    fn test_pairing_normalizes_decorated_ids() {
        let inventory = Inventory::new(vec![
            record(
                "AWS::Bedrock::KnowledgeBase",
                "Kb",
                "arn:aws:bedrock:us-east-1:1:knowledge-base/KB1",
            ),
            record("AWS::Bedrock::DataSource", "Ds", "KB1|DS1 "),
            record("AWS::Bedrock::DataSource", "Broken", "DS-only"),
        ]);

        let result = inventory.match_pairs();
        assert_eq!(result.matched, vec![DataSourcePair::new("KB1", "DS1")]);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_kind_filters() {
        let inventory = Inventory::new(vec![
            record("AWS::OpenSearchServerless::Collection", "Coll", "c-123"),
            record("AWS::S3::Bucket", "Bucket", "b"),
            record("AWS::Bedrock::KnowledgeBase", "Pending", ""),
        ]);

        assert_eq!(inventory.collection_ids().into_iter().collect::<Vec<_>>(), vec!["c-123"]);
        assert!(inventory.knowledge_base_ids().is_empty());
        assert_eq!(inventory.of_kind(&ResourceKind::Bucket).count(), 1);
    }
}

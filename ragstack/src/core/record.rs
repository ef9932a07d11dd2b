//! Discovered resources and typed identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource type tag of a nested stack.
pub const NESTED_STACK_TYPE: &str = "AWS::CloudFormation::Stack";

/// Category of a discovered resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A (nested) stack.
    Stack,
    /// A managed knowledge base.
    KnowledgeBase,
    /// A knowledge-base data source.
    DataSource,
    /// A vector-search collection.
    Collection,
    /// An object-storage bucket.
    Bucket,
    /// An identity role.
    Role,
    /// Anything else, keyed by its raw type tag.
    Other(String),
}

impl ResourceKind {
    /// Classifies a raw resource type tag.
    #[must_use]
    pub fn from_type(resource_type: &str) -> Self {
        match resource_type {
            NESTED_STACK_TYPE => Self::Stack,
            "AWS::Bedrock::KnowledgeBase" => Self::KnowledgeBase,
            "AWS::Bedrock::DataSource" => Self::DataSource,
            "AWS::OpenSearchServerless::Collection" => Self::Collection,
            "AWS::S3::Bucket" => Self::Bucket,
            "AWS::IAM::Role" => Self::Role,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stack => write!(f, "stack"),
            Self::KnowledgeBase => write!(f, "knowledge-base"),
            Self::DataSource => write!(f, "data-source"),
            Self::Collection => write!(f, "collection"),
            Self::Bucket => write!(f, "bucket"),
            Self::Role => write!(f, "role"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// One resource discovered by a graph traversal.
///
/// Records are immutable snapshots; a new traversal produces a fresh set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Stack identifiers from the root to the stack owning this resource.
    pub path: Vec<String>,
    /// Nesting level, root = 0.
    pub depth: usize,
    /// Template-declared name.
    pub logical_id: String,
    /// Control-plane assigned identifier, empty when not yet assigned.
    pub physical_id: String,
    /// Raw resource type tag.
    pub resource_type: String,
    /// Last observed lifecycle status.
    pub status: String,
}

impl ResourceRecord {
    /// Returns the resource category.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_type(&self.resource_type)
    }

    /// Returns true if this record is a nested stack to descend into.
    #[must_use]
    pub fn is_nested_stack(&self) -> bool {
        self.resource_type == NESTED_STACK_TYPE && !self.physical_id.is_empty()
    }

    /// The stack that owns this record.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }
}

/// Strips decorations from an identifier.
///
/// ARN prefixes (`arn:...:knowledge-base/ID`), trailing slashes and
/// surrounding whitespace are removed so that ids taken from different
/// control-plane responses compare equal.
#[must_use]
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// A knowledge base and one of its data sources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataSourcePair {
    /// Owning knowledge base id.
    pub knowledge_base_id: String,
    /// Data source id.
    pub data_source_id: String,
}

impl DataSourcePair {
    /// Creates a pair from already-normalized ids.
    #[must_use]
    pub fn new(knowledge_base_id: impl Into<String>, data_source_id: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            data_source_id: data_source_id.into(),
        }
    }

    /// Parses a compound `KB|DS` physical id.
    ///
    /// Returns `None` unless both halves are non-empty after normalization.
    #[must_use]
    pub fn parse(compound: &str) -> Option<Self> {
        let (kb, ds) = compound.split_once('|')?;
        let kb = normalize_id(kb);
        let ds = normalize_id(ds);
        if kb.is_empty() || ds.is_empty() {
            return None;
        }
        Some(Self::new(kb, ds))
    }
}

impl fmt::Display for DataSourcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.knowledge_base_id, self.data_source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(ResourceKind::from_type(NESTED_STACK_TYPE), ResourceKind::Stack);
        assert_eq!(
            ResourceKind::from_type("AWS::Bedrock::DataSource"),
            ResourceKind::DataSource
        );
        assert_eq!(
            ResourceKind::from_type("AWS::Lambda::Function"),
            ResourceKind::Other("AWS::Lambda::Function".to_string())
        );
        assert_eq!(ResourceKind::KnowledgeBase.to_string(), "knowledge-base");
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("KB123"), "KB123");
        assert_eq!(normalize_id("  KB123 "), "KB123");
        assert_eq!(
            normalize_id("arn:aws:bedrock:us-east-1:111122223333:knowledge-base/KB123"),
            "KB123"
        );
        assert_eq!(normalize_id("KB123/"), "KB123");
    }

    #[test]
    fn test_pair_parse() {
        assert_eq!(
            DataSourcePair::parse("KB1|DS1"),
            Some(DataSourcePair::new("KB1", "DS1"))
        );
        assert_eq!(
            DataSourcePair::parse("arn:aws:bedrock:us-east-1:1:knowledge-base/KB1 | DS9 "),
            Some(DataSourcePair::new("KB1", "DS9"))
        );
        assert_eq!(DataSourcePair::parse("KB1"), None);
        assert_eq!(DataSourcePair::parse("|DS1"), None);
    }

    #[test]
    fn test_nested_stack_requires_physical_id() {
        let mut record = ResourceRecord {
            path: vec!["root".to_string()],
            depth: 0,
            logical_id: "Child".to_string(),
            physical_id: String::new(),
            resource_type: NESTED_STACK_TYPE.to_string(),
            status: "CREATE_IN_PROGRESS".to_string(),
        };
        assert!(!record.is_nested_stack());

        record.physical_id = "child-stack".to_string();
        assert!(record.is_nested_stack());
        assert_eq!(record.owner(), Some("root"));
    }
}

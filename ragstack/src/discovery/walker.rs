//! Level-order traversal of nested stacks.

use std::collections::{HashSet, VecDeque};

use super::Inventory;
use crate::control::StackService;
use crate::core::ResourceRecord;
use crate::errors::Result;

/// A stack waiting to be listed.
#[derive(Debug)]
struct Pending {
    stack: String,
    path: Vec<String>,
    depth: usize,
}

/// Flattens a root stack and every nested stack into one inventory.
///
/// Traversal is breadth-first: a stack's pages are exhausted before any of
/// its children are listed. A listing error aborts the whole walk; a partial
/// graph is never returned.
#[derive(Clone, Copy)]
pub struct ResourceGraphWalker<'a> {
    stacks: &'a dyn StackService,
}

impl std::fmt::Debug for ResourceGraphWalker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGraphWalker").finish_non_exhaustive()
    }
}

impl<'a> ResourceGraphWalker<'a> {
    /// Creates a walker over a stack service.
    #[must_use]
    pub fn new(stacks: &'a dyn StackService) -> Self {
        Self { stacks }
    }

    /// Walks from `root`.
    pub async fn walk(&self, root: &str) -> Result<Inventory> {
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([Pending {
            stack: root.to_string(),
            path: vec![root.to_string()],
            depth: 0,
        }]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.stack.clone()) {
                continue;
            }

            let mut next_token: Option<String> = None;
            let mut pages = 0usize;
            loop {
                let page = self
                    .stacks
                    .list_stack_resources(&current.stack, next_token.as_deref())
                    .await?;
                pages += 1;

                for summary in page.items {
                    let record = ResourceRecord {
                        path: current.path.clone(),
                        depth: current.depth,
                        logical_id: summary.logical_id,
                        physical_id: summary.physical_id,
                        resource_type: summary.resource_type,
                        status: summary.status,
                    };
                    if record.is_nested_stack() {
                        let mut path = current.path.clone();
                        path.push(record.physical_id.clone());
                        queue.push_back(Pending {
                            stack: record.physical_id.clone(),
                            path,
                            depth: current.depth + 1,
                        });
                    }
                    records.push(record);
                }

                match page.next_token {
                    Some(token) if !token.is_empty() => next_token = Some(token),
                    _ => break,
                }
            }

            tracing::debug!(
                stack = %current.stack,
                depth = current.depth,
                pages,
                "listed stack resources"
            );
        }

        tracing::info!(
            root,
            stacks = visited.len(),
            resources = records.len(),
            "resource graph discovered"
        );
        Ok(Inventory::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceKind;
    use crate::testing::{nested_stack_fixture, InMemoryCloud};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_walk_counts_every_stack() {
        let cloud = InMemoryCloud::new().with_page_size(2);
        let fixture = nested_stack_fixture("root");
        fixture.install(&cloud);

        let inventory = ResourceGraphWalker::new(&cloud).walk("root").await.unwrap();

        assert_eq!(inventory.len(), fixture.total_resources());
        let mut ids: Vec<_> = inventory
            .records()
            .iter()
            .map(|r| (r.owner().unwrap_or_default().to_string(), r.logical_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), fixture.total_resources());
    }

    #[tokio::test]
    async fn test_walk_is_level_order() {
        let cloud = InMemoryCloud::new().with_page_size(1);
        nested_stack_fixture("root").install(&cloud);

        let inventory = ResourceGraphWalker::new(&cloud).walk("root").await.unwrap();

        let depths: Vec<usize> = inventory.records().iter().map(|r| r.depth).collect();
        let mut sorted = depths.clone();
        sorted.sort_unstable();
        assert_eq!(depths, sorted);
        assert_eq!(inventory.max_depth(), 2);
    }

    #[tokio::test]
    async fn test_nested_path_trail() {
        let cloud = InMemoryCloud::new();
        let fixture = nested_stack_fixture("root");
        fixture.install(&cloud);

        let inventory = ResourceGraphWalker::new(&cloud).walk("root").await.unwrap();
        let kb = inventory
            .of_kind(&ResourceKind::KnowledgeBase)
            .next()
            .unwrap();

        assert_eq!(kb.depth, 2);
        assert_eq!(kb.path.len(), 3);
        assert_eq!(kb.path[0], "root");
    }

    #[tokio::test]
    async fn test_empty_stack() {
        let cloud = InMemoryCloud::new();
        cloud.put_stack_resources("lonely", Vec::new());

        let inventory = ResourceGraphWalker::new(&cloud).walk("lonely").await.unwrap();
        assert!(inventory.is_empty());
    }

    #[tokio::test]
    async fn test_listing_error_aborts_walk() {
        let cloud = InMemoryCloud::new().with_page_size(1);
        nested_stack_fixture("root").install(&cloud);
        cloud.fail_on("list_stack_resources");

        let result = ResourceGraphWalker::new(&cloud).walk("root").await;
        assert_eq!(result.unwrap_err().kind(), "control_plane");
    }
}

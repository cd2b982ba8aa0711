//! Splitting a tree region into visible and off-screen nodes.

use crate::cancel::{CancellationToken, Cancelled};
use crate::range::TextRange;
use crate::tree::{NodeId, SyntaxTree, TreeId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_CACHED_WALKS: usize = 64;

/// Hook deciding whether the descendants of a node are walked at all.
pub trait SubtreeFilter: Send + Sync {
    /// Return `true` to skip the descendants of `node`. The node itself is still collected.
    fn skip_descendants(&self, tree: &dyn SyntaxTree, node: NodeId) -> bool;
}

/// Nodes of a tree region, split by priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePartition {
    /// Tree the partition was computed for.
    pub tree: TreeId,
    /// Node the walk started from.
    pub root: NodeId,
    /// Region that was walked.
    pub restrict_range: TextRange,
    /// High-priority sub-range.
    pub priority_range: TextRange,
    /// Nodes fully inside the priority range, children before parents.
    pub inside: Vec<NodeId>,
    /// Other nodes intersecting the restrict range, children before parents.
    pub outside: Vec<NodeId>,
    /// Ancestors of the last collected node, innermost first, up to the tree root (excluded).
    ///
    /// When nothing was collected the chain starts above the innermost node covering the
    /// restrict range.
    pub ancestors: Vec<NodeId>,
}

impl TreePartition {
    /// Number of collected nodes.
    pub fn len(&self) -> usize {
        self.inside.len() + self.outside.len()
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.inside.is_empty() && self.outside.is_empty()
    }

    /// Inside nodes followed by outside nodes.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inside.iter().chain(self.outside.iter()).copied()
    }
}

#[derive(Debug, Clone)]
struct CachedPartition {
    stamp: u64,
    partition: TreePartition,
}

/// Computes [`TreePartition`]s, caching them per tree, walk root and restrict range.
///
/// A cached partition remembers the modification stamp it was computed for and is replaced once
/// the stamp moves on. It is reused only when its priority range contains the requested one, in
/// which case the caller gets the cached split unchanged.
#[derive(Default)]
pub struct TreePartitioner {
    cache: Mutex<HashMap<(TreeId, NodeId, TextRange), CachedPartition>>,
    filters: Vec<Arc<dyn SubtreeFilter>>,
}

impl TreePartitioner {
    /// Create a partitioner without subtree filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subtree filter.
    pub fn with_filter(mut self, filter: Arc<dyn SubtreeFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Partition the nodes of `tree` intersecting `restrict` by whether they lie inside
    /// `priority`.
    pub fn partition(
        &self,
        tree: &dyn SyntaxTree,
        restrict: TextRange,
        priority: TextRange,
        token: &CancellationToken,
    ) -> Result<TreePartition, Cancelled> {
        self.partition_from(tree, tree.root(), restrict, priority, token)
    }

    /// Like [`Self::partition`], walking only the subtree of `root`.
    ///
    /// Used for fragments hosted inside a larger tree; the nodes between `root` and the tree
    /// root then show up as ancestors.
    pub fn partition_from(
        &self,
        tree: &dyn SyntaxTree,
        root: NodeId,
        restrict: TextRange,
        priority: TextRange,
        token: &CancellationToken,
    ) -> Result<TreePartition, Cancelled> {
        let key = (tree.identity(), root, restrict);
        let stamp = tree.modification_stamp();

        let cached = self
            .cache
            .lock()
            .get(&key)
            .filter(|cached| {
                cached.stamp == stamp && cached.partition.priority_range.contains_range(&priority)
            })
            .map(|cached| cached.partition.clone());
        if let Some(partition) = cached {
            tracing::trace!(tree = key.0.0, %restrict, "reusing cached partition");
            return Ok(partition);
        }

        let partition = self.walk(tree, root, restrict, priority, token)?;
        let mut cache = self.cache.lock();
        if cache.len() >= MAX_CACHED_WALKS && !cache.contains_key(&key) {
            cache.clear();
        }
        cache.insert(
            key,
            CachedPartition {
                stamp,
                partition: partition.clone(),
            },
        );
        Ok(partition)
    }

    /// Drop every cached partition of `tree`.
    pub fn invalidate(&self, tree: TreeId) {
        self.cache.lock().retain(|(id, _, _), _| *id != tree);
    }

    /// Number of cached partitions.
    pub fn cached_walks(&self) -> usize {
        self.cache.lock().len()
    }

    fn walk(
        &self,
        tree: &dyn SyntaxTree,
        root: NodeId,
        restrict: TextRange,
        priority: TextRange,
        token: &CancellationToken,
    ) -> Result<TreePartition, Cancelled> {
        let mut inside = Vec::new();
        let mut outside = Vec::new();
        let mut last_collected = None;
        let mut stack = vec![(root, false)];
        let mut children = Vec::new();

        while let Some((node, visited)) = stack.pop() {
            token.check()?;
            if visited {
                if priority.contains_range(&tree.range(node)) {
                    inside.push(node);
                } else {
                    outside.push(node);
                }
                last_collected = Some(node);
                continue;
            }
            if !tree.range(node).intersects(&restrict) {
                continue;
            }
            stack.push((node, true));
            if self
                .filters
                .iter()
                .any(|filter| filter.skip_descendants(tree, node))
            {
                continue;
            }

            children.clear();
            // Children are ordered by start offset.
            children.extend(
                tree.children(node)
                    .take_while(|child| tree.range(*child).start <= restrict.end),
            );
            stack.extend(children.iter().rev().map(|child| (*child, false)));
        }

        let from = last_collected.unwrap_or_else(|| common_ancestor(tree, root, restrict));
        let ancestors: Vec<NodeId> = tree
            .ancestors(from)
            .take_while(|node| *node != tree.root())
            .collect();
        tracing::trace!(
            nodes = inside.len() + outside.len(),
            ancestors = ancestors.len(),
            %restrict,
            "walked tree region"
        );
        Ok(TreePartition {
            tree: tree.identity(),
            root,
            restrict_range: restrict,
            priority_range: priority,
            inside,
            outside,
            ancestors,
        })
    }
}

/// Innermost node under `root` covering `restrict`.
fn common_ancestor(tree: &dyn SyntaxTree, root: NodeId, restrict: TextRange) -> NodeId {
    let mut innermost = root;
    while let Some(child) = tree
        .children(innermost)
        .find(|child| tree.range(*child).contains_range(&restrict))
    {
        innermost = child;
    }
    innermost
}

impl std::fmt::Debug for TreePartitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreePartitioner")
            .field("cached_walks", &self.cached_walks())
            .field("filters", &self.filters.len())
            .finish()
    }
}

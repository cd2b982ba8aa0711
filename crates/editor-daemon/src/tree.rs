//! Syntax tree interface consumed by the engine.
//!
//! The engine never parses anything itself: hosts provide a [`SyntaxTree`] with stable node
//! identity, range queries and a modification stamp. [`ArenaTree`] is a small in-memory
//! implementation used by hosts that already have their own parser output, and by the tests.

use crate::range::TextRange;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a node within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Index of the node in arena-backed trees.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Identity of a tree root. Survives modification-stamp changes of the same document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeId(pub u64);

impl TreeId {
    /// Allocate a process-unique tree id.
    pub fn next() -> Self {
        Self(NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Language of a node (`"rust"`, `"html"`, ...). Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LanguageId(Arc<str>);

impl LanguageId {
    /// Create a language id.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// Language name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LanguageId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for LanguageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A syntax tree with stable node identity and range queries.
///
/// Children of a node must lie within the node's range and be ordered by start offset.
pub trait SyntaxTree: Send + Sync {
    /// Identity of the tree root.
    fn identity(&self) -> TreeId;

    /// Stamp that changes whenever the tree is modified.
    fn modification_stamp(&self) -> u64;

    /// Root node (the file).
    fn root(&self) -> NodeId;

    /// Text range of a node.
    fn range(&self, node: NodeId) -> TextRange;

    /// First child of a node.
    fn first_child(&self, node: NodeId) -> Option<NodeId>;

    /// Next sibling of a node.
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    /// Parent of a node (`None` for the root).
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Grammar kind of a node.
    fn kind(&self, node: NodeId) -> &str;

    /// Language of a node.
    fn language(&self, node: NodeId) -> &LanguageId;

    /// Whether the parser flagged this node as an error or missing node.
    fn is_error(&self, _node: NodeId) -> bool {
        false
    }

    /// Document length covered by the tree.
    fn text_len(&self) -> usize {
        self.range(self.root()).end
    }
}

impl<'a> dyn SyntaxTree + 'a {
    /// Iterate over the direct children of `node`.
    pub fn children(&self, node: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(node),
        }
    }

    /// Iterate from `node`'s parent up to the root.
    pub fn ancestors(&self, node: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(node),
        }
    }
}

/// Iterator over direct children, see [`SyntaxTree`].
pub struct Children<'a> {
    tree: &'a dyn SyntaxTree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.next_sibling(current);
        Some(current)
    }
}

/// Iterator over the ancestors of a node, innermost first.
pub struct Ancestors<'a> {
    tree: &'a dyn SyntaxTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

#[derive(Debug, Clone)]
struct ArenaNode {
    kind: String,
    range: TextRange,
    language: LanguageId,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    is_error: bool,
}

/// Arena-backed [`SyntaxTree`].
#[derive(Debug, Clone)]
pub struct ArenaTree {
    id: TreeId,
    stamp: u64,
    nodes: Vec<ArenaNode>,
}

impl ArenaTree {
    /// Start building a tree whose nodes default to `language`.
    pub fn builder(language: impl Into<LanguageId>) -> ArenaTreeBuilder {
        ArenaTreeBuilder::new(language)
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All node ids in creation (pre-)order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|idx| NodeId(idx as u32))
    }

    /// Record a modification: the identity is kept, the stamp changes.
    pub fn bump_stamp(&mut self) {
        self.stamp = self.stamp.wrapping_add(1);
    }

    /// Set an explicit modification stamp.
    pub fn with_stamp(mut self, stamp: u64) -> Self {
        self.stamp = stamp;
        self
    }

    /// Present this tree as a later revision of the tree identified by `id`.
    pub fn with_identity(mut self, id: TreeId) -> Self {
        self.id = id;
        self
    }
}

impl SyntaxTree for ArenaTree {
    fn identity(&self) -> TreeId {
        self.id
    }

    fn modification_stamp(&self) -> u64 {
        self.stamp
    }

    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn range(&self, node: NodeId) -> TextRange {
        self.nodes[node.index()].range
    }

    fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].first_child
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].next_sibling
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].parent
    }

    fn kind(&self, node: NodeId) -> &str {
        &self.nodes[node.index()].kind
    }

    fn language(&self, node: NodeId) -> &LanguageId {
        &self.nodes[node.index()].language
    }

    fn is_error(&self, node: NodeId) -> bool {
        self.nodes[node.index()].is_error
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    id: NodeId,
    last_child: Option<NodeId>,
}

/// Incremental builder for [`ArenaTree`], in document order.
///
/// ```rust
/// use editor_daemon::tree::{ArenaTree, SyntaxTree};
///
/// let mut builder = ArenaTree::builder("rust");
/// builder.start_node("file", 0);
/// builder.leaf("fn_item", 0..10);
/// builder.finish_node(10);
/// let tree = builder.finish();
/// assert_eq!(tree.node_count(), 2);
/// assert_eq!(tree.text_len(), 10);
/// ```
#[derive(Debug)]
pub struct ArenaTreeBuilder {
    nodes: Vec<ArenaNode>,
    open: Vec<OpenNode>,
    language: LanguageId,
    max_end: usize,
}

impl ArenaTreeBuilder {
    /// Create a builder whose nodes default to `language`.
    pub fn new(language: impl Into<LanguageId>) -> Self {
        Self {
            nodes: Vec::new(),
            open: Vec::new(),
            language: language.into(),
            max_end: 0,
        }
    }

    /// Language of nodes created from now on (for injected fragments).
    pub fn set_language(&mut self, language: impl Into<LanguageId>) -> &mut Self {
        self.language = language.into();
        self
    }

    fn push_node(&mut self, kind: &str, range: TextRange, is_error: bool) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = self.open.last().map(|open| open.id);
        self.nodes.push(ArenaNode {
            kind: kind.to_string(),
            range,
            language: self.language.clone(),
            parent,
            first_child: None,
            next_sibling: None,
            is_error,
        });

        if let Some(open) = self.open.last_mut() {
            match open.last_child {
                Some(prev) => self.nodes[prev.index()].next_sibling = Some(id),
                None => self.nodes[open.id.index()].first_child = Some(id),
            }
            open.last_child = Some(id);
        }

        self.max_end = self.max_end.max(range.end);
        id
    }

    /// Open a node starting at `start`; children follow until [`Self::finish_node`].
    pub fn start_node(&mut self, kind: &str, start: usize) -> NodeId {
        let id = self.push_node(kind, TextRange::empty(start), false);
        self.open.push(OpenNode {
            id,
            last_child: None,
        });
        id
    }

    /// Like [`Self::start_node`], for a node flagged as a parse error.
    pub fn start_error_node(&mut self, kind: &str, start: usize) -> NodeId {
        let id = self.push_node(kind, TextRange::empty(start), true);
        self.open.push(OpenNode {
            id,
            last_child: None,
        });
        id
    }

    /// Close the innermost open node at `end`.
    pub fn finish_node(&mut self, end: usize) -> Option<NodeId> {
        let open = self.open.pop()?;
        let node = &mut self.nodes[open.id.index()];
        node.range = TextRange::new(node.range.start, end);
        self.max_end = self.max_end.max(end);
        Some(open.id)
    }

    /// Add a childless node.
    pub fn leaf(&mut self, kind: &str, range: impl Into<TextRange>) -> NodeId {
        self.push_node(kind, range.into(), false)
    }

    /// Add a childless node flagged as a parse error.
    pub fn error_leaf(&mut self, kind: &str, range: impl Into<TextRange>) -> NodeId {
        self.push_node(kind, range.into(), true)
    }

    /// Finish the tree. Nodes still open are closed at the largest offset seen.
    pub fn finish(mut self) -> ArenaTree {
        if self.nodes.is_empty() {
            self.push_node("file", TextRange::empty(0), false);
        }
        while !self.open.is_empty() {
            let end = self.max_end;
            self.finish_node(end);
        }
        ArenaTree {
            id: TreeId::next(),
            stamp: 0,
            nodes: self.nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArenaTree {
        let mut b = ArenaTree::builder("rust");
        b.start_node("file", 0);
        b.start_node("fn", 0);
        b.leaf("ident", 3..6);
        b.leaf("block", 7..12);
        b.finish_node(12);
        b.leaf("comment", 13..20);
        b.finish_node(20);
        b.finish()
    }

    #[test]
    fn test_builder_links_children_and_siblings() {
        let tree = sample();
        let tree: &dyn SyntaxTree = &tree;
        let root = tree.root();
        let children: Vec<NodeId> = tree.children(root).collect();
        assert_eq!(children, vec![NodeId(1), NodeId(4)]);
        let grandchildren: Vec<&str> = tree.children(NodeId(1)).map(|n| tree.kind(n)).collect();
        assert_eq!(grandchildren, vec!["ident", "block"]);
        assert_eq!(tree.range(NodeId(1)), TextRange::new(0, 12));
        assert_eq!(tree.text_len(), 20);
    }

    #[test]
    fn test_ancestors_walk_to_root() {
        let tree = sample();
        let tree: &dyn SyntaxTree = &tree;
        let ancestors: Vec<NodeId> = tree.ancestors(NodeId(2)).collect();
        assert_eq!(ancestors, vec![NodeId(1), NodeId(0)]);
    }

    #[test]
    fn test_bump_stamp_keeps_identity() {
        let mut tree = sample();
        let id = tree.identity();
        let stamp = tree.modification_stamp();
        tree.bump_stamp();
        assert_eq!(tree.identity(), id);
        assert_ne!(tree.modification_stamp(), stamp);
    }

    #[test]
    fn test_empty_builder_yields_root() {
        let tree = ArenaTree::builder("text").finish();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.text_len(), 0);
    }
}

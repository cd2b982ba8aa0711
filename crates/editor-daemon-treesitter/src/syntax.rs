use editor_daemon::{ArenaTree, LanguageId, TextRange};
use tree_sitter::{Node, Tree};

/// Byte-offset to character-offset mapping for one text.
#[derive(Debug, Clone, Default)]
pub struct CharIndex {
    char_starts: Vec<usize>,
    byte_len: usize,
}

impl CharIndex {
    /// Index `text`.
    pub fn new(text: &str) -> Self {
        Self {
            char_starts: text.char_indices().map(|(byte, _)| byte).collect(),
            byte_len: text.len(),
        }
    }

    /// Number of characters.
    pub fn char_count(&self) -> usize {
        self.char_starts.len()
    }

    /// Character offset of `byte`. Offsets inside a character round up to the next one.
    pub fn char_offset(&self, byte: usize) -> usize {
        if byte >= self.byte_len {
            return self.char_count();
        }
        self.char_starts.partition_point(|&start| start < byte)
    }

    /// Byte offset of character `offset`, or `None` past the end of the text.
    pub fn byte_offset(&self, offset: usize) -> Option<usize> {
        match self.char_starts.get(offset) {
            Some(byte) => Some(*byte),
            None if offset == self.char_count() => Some(self.byte_len),
            None => None,
        }
    }

    fn range(&self, node: &Node<'_>) -> TextRange {
        TextRange::new(self.char_offset(node.start_byte()), self.char_offset(node.end_byte()))
    }
}

fn is_kept(node: &Node<'_>) -> bool {
    node.is_named() || node.is_error() || node.is_missing()
}

fn is_error(node: &Node<'_>) -> bool {
    node.is_error() || node.is_missing()
}

/// Flatten `tree` (parsed from `text`) into an [`ArenaTree`] with character offsets.
///
/// Anonymous tokens are dropped unless they are missing; their children, if any, are attached to
/// the nearest kept ancestor. The root always spans the whole text.
pub fn convert_tree(tree: &Tree, text: &str, language: impl Into<LanguageId>) -> ArenaTree {
    let index = CharIndex::new(text);
    let mut builder = ArenaTree::builder(language);
    let mut cursor = tree.walk();
    // One entry per open Tree-sitter node: whether it produced an arena node.
    let mut opened: Vec<bool> = Vec::new();

    'walk: loop {
        let node = cursor.node();
        let is_root = opened.is_empty();
        let keep = is_root || is_kept(&node);
        let range = if is_root {
            TextRange::new(0, index.char_count())
        } else {
            index.range(&node)
        };

        if node.child_count() > 0 {
            if keep {
                if is_error(&node) {
                    builder.start_error_node(node.kind(), range.start);
                } else {
                    builder.start_node(node.kind(), range.start);
                }
            }
            opened.push(keep);
            if cursor.goto_first_child() {
                continue;
            }
            opened.pop();
            if keep {
                builder.finish_node(range.end);
            }
        } else if keep {
            if is_root {
                builder.start_node(node.kind(), range.start);
                builder.finish_node(range.end);
            } else if is_error(&node) {
                builder.error_leaf(node.kind(), range);
            } else {
                builder.leaf(node.kind(), range);
            }
        }

        loop {
            if cursor.goto_next_sibling() {
                continue 'walk;
            }
            if !cursor.goto_parent() {
                break 'walk;
            }
            if opened.pop() == Some(true) {
                let parent = cursor.node();
                let end = if opened.is_empty() {
                    index.char_count()
                } else {
                    index.char_offset(parent.end_byte())
                };
                builder.finish_node(end);
            }
        }
    }

    builder.finish()
}

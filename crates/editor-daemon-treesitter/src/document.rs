use crate::syntax::{CharIndex, convert_tree};
use editor_daemon::{ArenaTree, LanguageId, SyntaxTree, TextDelta, TreeId};
use std::sync::Arc;
use tree_sitter::{InputEdit, Language, Parser, Point, Tree};

/// Errors produced by [`TreeSitterDocument`].
#[derive(Debug)]
pub enum TreeSitterError {
    /// Setting the Tree-sitter language failed.
    Language(String),
    /// The parser produced no tree.
    Parse,
    /// The delta did not match the document text.
    DeltaMismatch,
}

impl std::fmt::Display for TreeSitterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Language(msg) => write!(f, "tree-sitter language error: {msg}"),
            Self::Parse => write!(f, "tree-sitter produced no tree"),
            Self::DeltaMismatch => write!(f, "tree-sitter delta mismatch"),
        }
    }
}

impl std::error::Error for TreeSitterError {}

/// How the document updated its parse tree last time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSitterUpdateMode {
    /// First parse.
    Initial,
    /// Applied `TextDelta` edits and re-parsed incrementally.
    Incremental,
    /// Replaced the text and re-parsed from scratch.
    FullReparse,
}

/// A document kept parsed by Tree-sitter.
///
/// Every update bumps a modification stamp; [`Self::snapshot`] hands out trees that share one
/// [`TreeId`] across revisions, so the daemon recognises them as the same document tree.
pub struct TreeSitterDocument {
    parser: Parser,
    language_id: LanguageId,
    tree: Tree,
    text: String,
    index: CharIndex,
    identity: TreeId,
    stamp: u64,
    last_update_mode: TreeSitterUpdateMode,
}

impl std::fmt::Debug for TreeSitterDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSitterDocument")
            .field("language", &self.language_id)
            .field("identity", &self.identity)
            .field("stamp", &self.stamp)
            .field("chars", &self.index.char_count())
            .field("last_update_mode", &self.last_update_mode)
            .finish()
    }
}

impl TreeSitterDocument {
    /// Parse `text` with `language`. Nodes of the snapshots are tagged with `language_id`.
    pub fn new(
        language: &Language,
        language_id: impl Into<LanguageId>,
        text: impl Into<String>,
    ) -> Result<Self, TreeSitterError> {
        let mut parser = Parser::new();
        parser
            .set_language(language)
            .map_err(|e| TreeSitterError::Language(e.to_string()))?;

        let text = text.into();
        let tree = parser.parse(&text, None).ok_or(TreeSitterError::Parse)?;
        Ok(Self {
            parser,
            language_id: language_id.into(),
            tree,
            index: CharIndex::new(&text),
            text,
            identity: TreeId::next(),
            stamp: 0,
            last_update_mode: TreeSitterUpdateMode::Initial,
        })
    }

    /// Current text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current length in characters.
    pub fn char_count(&self) -> usize {
        self.index.char_count()
    }

    /// Modification stamp of the current revision.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// The underlying Tree-sitter tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// How the last update was performed.
    pub fn last_update_mode(&self) -> TreeSitterUpdateMode {
        self.last_update_mode
    }

    /// Apply `delta` and re-parse incrementally.
    ///
    /// The document is left untouched if the delta does not match its text.
    pub fn apply_delta(&mut self, delta: &TextDelta) -> Result<(), TreeSitterError> {
        if self.index.char_count() != delta.before_char_count {
            return Err(TreeSitterError::DeltaMismatch);
        }

        let mut text = self.text.clone();
        let mut tree = self.tree.clone();
        for edit in &delta.edits {
            let index = CharIndex::new(&text);
            let start_byte = index
                .byte_offset(edit.start)
                .ok_or(TreeSitterError::DeltaMismatch)?;
            let old_end_byte = start_byte.saturating_add(edit.deleted_text.len());
            let new_end_byte = start_byte.saturating_add(edit.inserted_text.len());

            if text.get(start_byte..old_end_byte) != Some(edit.deleted_text.as_str()) {
                return Err(TreeSitterError::DeltaMismatch);
            }

            let start_position = point_for_byte(&text, start_byte);
            tree.edit(&InputEdit {
                start_byte,
                old_end_byte,
                new_end_byte,
                start_position,
                old_end_position: advance_point(start_position, &edit.deleted_text),
                new_end_position: advance_point(start_position, &edit.inserted_text),
            });
            text.replace_range(start_byte..old_end_byte, &edit.inserted_text);
        }

        let index = CharIndex::new(&text);
        if index.char_count() != delta.after_char_count {
            return Err(TreeSitterError::DeltaMismatch);
        }

        let tree = self
            .parser
            .parse(&text, Some(&tree))
            .ok_or(TreeSitterError::Parse)?;
        self.commit(text, index, tree, TreeSitterUpdateMode::Incremental);
        Ok(())
    }

    /// Replace the whole text and re-parse from scratch.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), TreeSitterError> {
        let text = text.into();
        let tree = self.parser.parse(&text, None).ok_or(TreeSitterError::Parse)?;
        let index = CharIndex::new(&text);
        self.commit(text, index, tree, TreeSitterUpdateMode::FullReparse);
        Ok(())
    }

    fn commit(&mut self, text: String, index: CharIndex, tree: Tree, mode: TreeSitterUpdateMode) {
        self.text = text;
        self.index = index;
        self.tree = tree;
        self.stamp = self.stamp.wrapping_add(1);
        self.last_update_mode = mode;
        tracing::trace!(stamp = self.stamp, ?mode, "re-parsed document");
    }

    /// Arena copy of the current revision.
    pub fn to_arena(&self) -> ArenaTree {
        convert_tree(&self.tree, &self.text, self.language_id.clone())
            .with_identity(self.identity)
            .with_stamp(self.stamp)
    }

    /// Immutable snapshot of the current revision for the daemon.
    pub fn snapshot(&self) -> Arc<dyn SyntaxTree> {
        Arc::new(self.to_arena())
    }
}

fn point_for_byte(text: &str, byte: usize) -> Point {
    let before = &text[..byte];
    let row = before.matches('\n').count();
    let column = before.rfind('\n').map_or(byte, |newline| byte - newline - 1);
    Point { row, column }
}

fn advance_point(mut point: Point, text: &str) -> Point {
    let mut parts = text.split('\n');
    let Some(first) = parts.next() else {
        return point;
    };

    point.column = point.column.saturating_add(first.len());
    for part in parts {
        point.row = point.row.saturating_add(1);
        point.column = part.len();
    }

    point
}

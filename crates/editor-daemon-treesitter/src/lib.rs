#![warn(missing_docs)]
//! `editor-daemon-treesitter` - Tree-sitter integration for `editor-daemon`.
//!
//! This crate provides:
//!
//! - [`TreeSitterDocument`]: an incrementally re-parsed document that turns `TextDelta` edits into
//!   Tree-sitter `InputEdit`s and hands out [`editor_daemon::SyntaxTree`] snapshots
//! - [`convert_tree`]: flattening of a Tree-sitter parse tree into an
//!   [`editor_daemon::ArenaTree`] with character offsets
//! - [`SyntaxErrorRule`]: a rule reporting `ERROR` and missing nodes as error diagnostics

mod document;
mod rule;
mod syntax;

pub use document::{TreeSitterDocument, TreeSitterError, TreeSitterUpdateMode};
pub use rule::SyntaxErrorRule;
pub use syntax::{CharIndex, convert_tree};

#![warn(missing_docs)]
//! Editor Daemon - incremental, concurrent live diagnostics.
//!
//! # Overview
//!
//! The daemon keeps the diagnostics of open documents current while they are edited. It records
//! which regions need re-analysis, walks only the syntax nodes touching those regions (visible
//! ones first), runs independent analysis rules over them on a worker pool, and merges the
//! results into a per-document overlay without removing and re-adding diagnostics that did not
//! change.
//!
//! # Core Features
//!
//! - **Dirty-scope tracking**: per document and stage, widened by edits and trimmed by passes
//! - **Tree partitioning**: visible nodes before off-screen ones, cached per tree stamp
//! - **Parallel rules**: one task per rule, cooperative cancellation, isolated failures
//! - **Diagnostic builder**: set-once fields, post-filters, leak detection
//! - **Overlay reconciliation**: severity-coverage suppression and entry recycling
//!
//! # Architecture
//!
//! ```text
//! DiagnosticsDaemon
//! ├── DirtyScopeTracker   (what needs re-analysis)
//! ├── TreePartitioner     (which nodes, in what order)
//! ├── RuleRunner          (rayon pool running Rule implementations)
//! └── DocumentSlot        (tree snapshot + OverlayStore per document)
//!
//! HighlightingPass: partition -> run rules -> reconcile -> apply
//! ```
//!
//! # Example
//!
//! ```rust
//! use editor_daemon::{
//!     ArenaTree, CancellationToken, DaemonConfig, DiagnosticKind, DiagnosticsDaemon,
//!     DocumentId, NodeId, Rule, RuleContext, RuleError, StageId, TextRange,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct NoTodo;
//!
//! impl Rule for NoTodo {
//!     fn id(&self) -> &str {
//!         "no-todo"
//!     }
//!
//!     fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
//!         if ctx.tree().kind(node) == "todo" {
//!             let mut builder = ctx.node_builder(DiagnosticKind::Warning, node);
//!             builder.description("unfinished work");
//!             ctx.emit(builder)?;
//!         }
//!         Ok(())
//!     }
//!
//!     fn clone_rule(&self) -> Box<dyn Rule> {
//!         Box::new(NoTodo)
//!     }
//! }
//!
//! let daemon = DiagnosticsDaemon::builder(DaemonConfig::default())
//!     .stage(StageId::INSPECTIONS, vec![Box::new(NoTodo)])
//!     .build()
//!     .unwrap();
//!
//! let mut tree = ArenaTree::builder("text");
//! tree.start_node("file", 0);
//! tree.leaf("todo", 3..7);
//! tree.finish_node(12);
//! let doc = DocumentId(1);
//! daemon.open_document(doc, Arc::new(tree.finish()));
//!
//! let outcome = daemon
//!     .run_highlighting_pass(
//!         doc,
//!         StageId::INSPECTIONS,
//!         TextRange::new(0, 12),
//!         &CancellationToken::new(),
//!     )
//!     .unwrap();
//! assert_eq!(outcome.diagnostics.len(), 1);
//! assert!(daemon.is_fully_clean(doc));
//! ```

pub mod builder;
pub mod cancel;
pub mod config;
pub mod daemon;
pub mod delta;
pub mod diagnostic;
pub mod dirty;
pub mod error;
pub mod overlay;
pub mod partition;
pub mod pass;
pub mod range;
pub mod reconcile;
pub mod recycler;
pub mod rules;
pub mod session;
pub mod severity;
pub mod tree;

pub use builder::{
    BuilderLeak, BuilderLedger, DiagnosticBuilder, DiagnosticFactory, DiagnosticFilter,
    MinSeverityFilter,
};
pub use cancel::{CancellationToken, Cancelled};
pub use config::{CoverThreshold, CoveragePolicy, DaemonConfig, RecyclingStrategy};
pub use daemon::{DaemonBuilder, DiagnosticsDaemon};
pub use delta::{EditSpan, TextDelta, TextDeltaEdit};
pub use diagnostic::{
    DiagnosticRecord, FixAction, FixComputer, FixDescriptor, LazyFixes, TextEdit, TextEditFix,
};
pub use dirty::{DirtyScope, DirtyScopeTracker};
pub use error::{BuilderError, ConfigError, DirtyScopeError, OverlayError, PassError, RuleError};
pub use overlay::{
    EntryHandle, MarkerHandle, OverlayChange, OverlayChangeCallback, OverlayEntry,
    OverlayMutation, OverlayStore,
};
pub use partition::{SubtreeFilter, TreePartition, TreePartitioner};
pub use pass::{DocumentSlot, HighlightingPass, PassContext, PassOutcome, PassState};
pub use range::{DocumentId, StageId, TextRange};
pub use reconcile::{OverlayReconciler, ReconcileStats};
pub use recycler::{ManagedOverlayRecycler, OverlayRecycler, RecycledEntry, Recycler, recycler_for};
pub use rules::{Rule, RuleContext, RuleRunner, RunOutput};
pub use session::{IndexStatus, Session};
pub use severity::{
    AttributesKey, DiagnosticKind, EffectType, GutterMarker, Layer, Severity, TextAttributes,
};
pub use tree::{ArenaTree, ArenaTreeBuilder, LanguageId, NodeId, SyntaxTree, TreeId};

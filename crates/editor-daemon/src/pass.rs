//! One highlighting pass: partition, run rules, reconcile, apply.

use crate::builder::BuilderLeak;
use crate::config::DaemonConfig;
use crate::diagnostic::DiagnosticRecord;
use crate::dirty::DirtyScopeTracker;
use crate::error::PassError;
use crate::overlay::OverlayStore;
use crate::partition::TreePartitioner;
use crate::range::{DocumentId, StageId, TextRange};
use crate::reconcile::{OverlayReconciler, ReconcileStats};
use crate::recycler::{Recycler, recycler_for};
use crate::rules::{Rule, RuleRunner, RunOutput};
use crate::session::Session;
use crate::tree::SyntaxTree;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of a [`HighlightingPass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Not started.
    Created,
    /// Collecting nodes.
    Partitioning,
    /// Rules are running.
    RunningRules,
    /// Diffing results against the overlay.
    Reconciling,
    /// Results are visible.
    Applied,
    /// Cancelled or inconsistent; nothing was applied.
    Aborted,
}

/// Live state of an open document.
pub struct DocumentSlot {
    tree: RwLock<Arc<dyn SyntaxTree>>,
    overlay: Mutex<OverlayStore>,
    force_check_parents: AtomicBool,
}

impl DocumentSlot {
    /// Create a slot showing an empty overlay for `tree`.
    pub fn new(tree: Arc<dyn SyntaxTree>) -> Self {
        Self {
            tree: RwLock::new(tree),
            overlay: Mutex::new(OverlayStore::new()),
            force_check_parents: AtomicBool::new(false),
        }
    }

    /// Current tree snapshot.
    pub fn tree(&self) -> Arc<dyn SyntaxTree> {
        self.tree.read().clone()
    }

    /// Replace the tree, returning the previous one.
    pub fn set_tree(&self, tree: Arc<dyn SyntaxTree>) -> Arc<dyn SyntaxTree> {
        std::mem::replace(&mut *self.tree.write(), tree)
    }

    /// The document's overlay.
    pub fn overlay(&self) -> &Mutex<OverlayStore> {
        &self.overlay
    }

    /// Whether rules re-check parents of nodes with errors.
    pub fn force_check_parents(&self) -> bool {
        self.force_check_parents.load(Ordering::Relaxed)
    }

    /// Set the force-check-parents override.
    pub fn set_force_check_parents(&self, force: bool) {
        self.force_check_parents.store(force, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for DocumentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSlot")
            .field("tree", &self.tree.read().identity())
            .field("entries", &self.overlay.lock().len())
            .finish()
    }
}

/// Result of a highlighting pass.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// Document.
    pub document: DocumentId,
    /// Stage.
    pub stage: StageId,
    /// Region that was re-analyzed; `None` when the stage was already clean.
    pub processed_range: Option<TextRange>,
    /// Overlay diagnostics of the stage after the pass, by start offset.
    pub diagnostics: Vec<Arc<DiagnosticRecord>>,
    /// File-level annotations of the stage.
    pub file_level: Vec<Arc<DiagnosticRecord>>,
    /// Whether every rule finished, so the processed range was marked clean.
    pub complete: bool,
    /// Restarts needed before the pass applied.
    pub restarts: u32,
    /// Reconciliation counters.
    pub stats: ReconcileStats,
    /// Rules whose output was discarded or abandoned.
    pub failed_rules: Vec<Arc<str>>,
    /// Builders the rules never finalized.
    pub leaked_builders: Vec<BuilderLeak>,
}

impl PassOutcome {
    pub(crate) fn unchanged(
        document: DocumentId,
        stage: StageId,
        store: &OverlayStore,
        restarts: u32,
    ) -> Self {
        Self {
            document,
            stage,
            processed_range: None,
            diagnostics: stage_diagnostics(store, stage),
            file_level: store.file_level(stage).to_vec(),
            complete: true,
            restarts,
            stats: ReconcileStats::default(),
            failed_rules: Vec::new(),
            leaked_builders: Vec::new(),
        }
    }
}

fn stage_diagnostics(store: &OverlayStore, stage: StageId) -> Vec<Arc<DiagnosticRecord>> {
    store
        .entries()
        .filter(|entry| entry.group == stage)
        .map(|entry| entry.record.clone())
        .collect()
}

/// Shared machinery a pass runs on.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    /// Dirty scopes.
    pub tracker: &'a DirtyScopeTracker,
    /// Tree partitioner.
    pub partitioner: &'a TreePartitioner,
    /// Rule runner.
    pub runner: &'a RuleRunner,
    /// Daemon settings.
    pub config: &'a DaemonConfig,
}

/// A single attempt at highlighting one stage of one document.
///
/// The pass samples the document's modification count when created and checks it, together with
/// the tree identity, after the rules ran and again under the overlay lock before applying. A
/// mismatch aborts with [`PassError::Inconsistent`] and leaves the overlay untouched.
pub struct HighlightingPass<'a> {
    session: Session,
    slot: &'a DocumentSlot,
    rules: &'a [Box<dyn Rule>],
    ctx: PassContext<'a>,
    expected_count: u64,
    state: PassState,
}

impl<'a> HighlightingPass<'a> {
    /// Prepare a pass.
    pub fn new(
        session: Session,
        slot: &'a DocumentSlot,
        rules: &'a [Box<dyn Rule>],
        ctx: PassContext<'a>,
    ) -> Self {
        ctx.tracker.track_document(session.document());
        let expected_count = ctx.tracker.modification_count(session.document());
        Self {
            session,
            slot,
            rules,
            ctx,
            expected_count,
            state: PassState::Created,
        }
    }

    /// Compare against a modification count sampled before the session's dirty range was read.
    ///
    /// Marks landing between that read and the start of the pass then abort it.
    pub fn with_expected_count(mut self, expected_count: u64) -> Self {
        self.expected_count = expected_count;
        self
    }

    /// Current state.
    pub fn state(&self) -> PassState {
        self.state
    }

    /// The pass session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the pass to completion.
    pub fn run(&mut self) -> Result<PassOutcome, PassError> {
        let result = self.execute();
        self.state = match &result {
            Ok(_) => PassState::Applied,
            Err(err) => {
                tracing::debug!(
                    document = %self.session.document(),
                    stage = %self.session.stage(),
                    error = %err,
                    "highlighting pass aborted"
                );
                PassState::Aborted
            }
        };
        result
    }

    fn execute(&mut self) -> Result<PassOutcome, PassError> {
        let session = &self.session;
        tracing::debug!(
            document = %session.document(),
            stage = %session.stage(),
            restrict = %session.restrict_range(),
            priority = %session.priority_range(),
            "starting highlighting pass"
        );

        self.state = PassState::Partitioning;
        let partition = self.ctx.partitioner.partition(
            session.tree().as_ref(),
            session.restrict_range(),
            session.priority_range(),
            session.token(),
        )?;

        self.state = PassState::RunningRules;
        let run = self.ctx.runner.run(self.rules, &partition, session)?;
        let leaked_builders = session.ledger().check_leaks();
        self.verify_unmodified()?;

        self.state = PassState::Reconciling;
        let mut recycler = recycler_for(self.ctx.config.recycling, session.token().clone());
        let applied = self.reconcile_and_apply(&run, recycler.as_mut());
        let (stats, outcome_store) = match applied {
            Ok(applied) => applied,
            Err(err) => {
                let released = recycler.release_all(&mut self.slot.overlay().lock());
                let discarded = session.discard_deferred();
                tracing::debug!(released, discarded, "released recycled entries");
                return Err(err);
            }
        };

        let session = &self.session;
        let stage = session.stage();
        let complete = run.is_complete() && !(session.essential_only() && !stage.is_essential());
        if complete {
            self.ctx.tracker.mark_range_clean_if_unmodified(
                session.document(),
                stage,
                session.restrict_range(),
                session.doc_len(),
                self.expected_count,
            );
        }
        if complete && session.is_whole_document() {
            self.ctx
                .tracker
                .set_errors_found(session.document(), outcome_store.has_errors);
        }

        let mut failed_rules: Vec<Arc<str>> = run.preserved_tools().into_iter().collect();
        failed_rules.sort();
        tracing::debug!(
            document = %session.document(),
            %stage,
            complete,
            diagnostics = outcome_store.diagnostics.len(),
            "highlighting pass applied"
        );
        Ok(PassOutcome {
            document: session.document(),
            stage,
            processed_range: Some(session.restrict_range()),
            diagnostics: outcome_store.diagnostics,
            file_level: outcome_store.file_level,
            complete,
            restarts: 0,
            stats,
            failed_rules,
            leaked_builders,
        })
    }

    fn reconcile_and_apply(
        &self,
        run: &RunOutput,
        recycler: &mut dyn Recycler,
    ) -> Result<(ReconcileStats, AppliedStore), PassError> {
        let session = &self.session;
        let stats = OverlayReconciler::new(session, self.ctx.config.coverage).reconcile(
            self.slot.overlay(),
            recycler,
            &run.diagnostics,
            &run.preserved_tools(),
        )?;

        let mut store = self.slot.overlay().lock();
        store.batch(|store| -> Result<(), PassError> {
            session.token().check()?;
            self.verify_unmodified()?;
            session.flush(store)?;
            let disposed = recycler.incinerate(store, session.essential_only());
            tracing::trace!(disposed = disposed.len(), "disposed stale entries");
            Ok(())
        })?;

        let stage = session.stage();
        Ok((
            stats,
            AppliedStore {
                diagnostics: stage_diagnostics(&store, stage),
                file_level: store.file_level(stage).to_vec(),
                has_errors: store.has_errors(),
            },
        ))
    }

    fn verify_unmodified(&self) -> Result<(), PassError> {
        let session = &self.session;
        let count = self.ctx.tracker.modification_count(session.document());
        let reason = if count != self.expected_count {
            format!(
                "document marked dirty during the pass ({} -> {count})",
                self.expected_count
            )
        } else if !Arc::ptr_eq(&self.slot.tree(), session.tree()) {
            "tree replaced during the pass".to_string()
        } else {
            return Ok(());
        };
        tracing::debug!(
            document = %session.document(),
            stage = %session.stage(),
            %reason,
            "pass is stale"
        );
        Err(PassError::Inconsistent {
            document: session.document(),
            stage: session.stage(),
            reason,
        })
    }
}

impl std::fmt::Debug for HighlightingPass<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightingPass")
            .field("session", &self.session)
            .field("rules", &self.rules.len())
            .field("state", &self.state)
            .finish()
    }
}

struct AppliedStore {
    diagnostics: Vec<Arc<DiagnosticRecord>>,
    file_level: Vec<Arc<DiagnosticRecord>>,
    has_errors: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::error::RuleError;
    use crate::rules::RuleContext;
    use crate::severity::DiagnosticKind;
    use crate::tree::{ArenaTree, NodeId};

    #[derive(Clone)]
    struct FlagErrors;

    impl Rule for FlagErrors {
        fn id(&self) -> &str {
            "flag-errors"
        }

        fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
            if ctx.tree().is_error(node) {
                let builder = ctx.node_builder(DiagnosticKind::Error, node);
                ctx.emit(builder)?;
            }
            Ok(())
        }

        fn clone_rule(&self) -> Box<dyn Rule> {
            Box::new(FlagErrors)
        }
    }

    struct Fixture {
        tracker: DirtyScopeTracker,
        partitioner: TreePartitioner,
        runner: RuleRunner,
        config: DaemonConfig,
        slot: DocumentSlot,
        rules: Vec<Box<dyn Rule>>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut b = ArenaTree::builder("rust");
            b.start_node("file", 0);
            b.error_leaf("bad", 4..6);
            b.leaf("ok", 8..10);
            b.finish_node(12);
            Self {
                tracker: DirtyScopeTracker::new([StageId::SYNTAX]),
                partitioner: TreePartitioner::new(),
                runner: RuleRunner::new(1, 100).unwrap(),
                config: DaemonConfig::default(),
                slot: DocumentSlot::new(Arc::new(b.finish())),
                rules: vec![Box::new(FlagErrors)],
            }
        }

        fn ctx(&self) -> PassContext<'_> {
            PassContext {
                tracker: &self.tracker,
                partitioner: &self.partitioner,
                runner: &self.runner,
                config: &self.config,
            }
        }

        fn session(&self, token: CancellationToken) -> Session {
            Session::new(
                DocumentId(1),
                StageId::SYNTAX,
                self.slot.tree(),
                TextRange::new(0, 12),
                token,
            )
        }
    }

    #[test]
    fn test_pass_applies_and_cleans() {
        let fx = Fixture::new();
        let mut pass = HighlightingPass::new(
            fx.session(CancellationToken::new()),
            &fx.slot,
            &fx.rules,
            fx.ctx(),
        );
        assert_eq!(pass.state(), PassState::Created);
        let outcome = pass.run().unwrap();
        assert_eq!(pass.state(), PassState::Applied);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].range, TextRange::new(4, 6));
        assert!(outcome.complete);
        assert!(fx.tracker.is_fully_clean(DocumentId(1)));
        assert!(fx.tracker.errors_found(DocumentId(1)));
    }

    #[test]
    fn test_cancelled_pass_changes_nothing() {
        let fx = Fixture::new();
        let token = CancellationToken::new();
        let mut pass =
            HighlightingPass::new(fx.session(token.clone()), &fx.slot, &fx.rules, fx.ctx());
        token.cancel();
        assert!(matches!(pass.run(), Err(PassError::Cancelled(_))));
        assert_eq!(pass.state(), PassState::Aborted);
        assert!(fx.slot.overlay().lock().is_empty());
        assert!(!fx.tracker.is_fully_clean(DocumentId(1)));
    }

    #[test]
    fn test_tree_swap_is_inconsistent() {
        let fx = Fixture::new();
        let mut pass = HighlightingPass::new(
            fx.session(CancellationToken::new()),
            &fx.slot,
            &fx.rules,
            fx.ctx(),
        );
        let mut b = ArenaTree::builder("rust");
        b.leaf("file", 0..12);
        fx.slot.set_tree(Arc::new(b.finish()));
        assert!(matches!(pass.run(), Err(PassError::Inconsistent { .. })));
        assert!(fx.slot.overlay().lock().is_empty());
    }

    #[test]
    fn test_mark_after_dirty_read_is_not_cleared() {
        let fx = Fixture::new();
        let doc = DocumentId(1);
        fx.tracker.track_document(doc);
        let sampled = fx.tracker.modification_count(doc);
        let session = fx.session(CancellationToken::new());
        fx.tracker
            .mark_range_dirty(doc, TextRange::new(8, 10), 12, "typing")
            .unwrap();

        let mut pass = HighlightingPass::new(session, &fx.slot, &fx.rules, fx.ctx())
            .with_expected_count(sampled);
        assert!(matches!(pass.run(), Err(PassError::Inconsistent { .. })));
        assert!(fx.slot.overlay().lock().is_empty());
        assert!(fx.tracker.get_dirty_range(doc, StageId::SYNTAX, 12).is_some());
    }
}

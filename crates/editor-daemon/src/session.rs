//! Per-pass context.

use crate::builder::{BuilderLedger, DiagnosticFactory, MinSeverityFilter};
use crate::cancel::CancellationToken;
use crate::error::OverlayError;
use crate::overlay::{OverlayMutation, OverlayStore};
use crate::range::{DocumentId, StageId, TextRange};
use crate::severity::Severity;
use crate::tree::SyntaxTree;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Whether index data is available to rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexStatus {
    /// Indexes are up to date.
    #[default]
    Smart,
    /// Indexes are being rebuilt; only rules that work without them may run.
    Dumb,
}

/// Everything one highlighting pass needs to know, shared with the rules it runs.
///
/// Overlay mutations produced while reconciling are queued with [`Session::defer`] and applied
/// together by [`Session::flush`], so the overlay never shows a half-updated region.
pub struct Session {
    document: DocumentId,
    stage: StageId,
    tree: Arc<dyn SyntaxTree>,
    restrict_range: TextRange,
    priority_range: TextRange,
    visible_range: TextRange,
    min_severity: Severity,
    token: CancellationToken,
    essential_only: bool,
    index_status: IndexStatus,
    force_check_parents: bool,
    ledger: Arc<BuilderLedger>,
    progress_total: AtomicUsize,
    progress_done: AtomicUsize,
    deferred: Mutex<Vec<OverlayMutation>>,
}

impl Session {
    /// Create a session processing `restrict_range` of `document`.
    ///
    /// The restrict range is clamped to the tree. Until [`Session::with_visible_range`] is
    /// called, the whole restrict range has priority.
    pub fn new(
        document: DocumentId,
        stage: StageId,
        tree: Arc<dyn SyntaxTree>,
        restrict_range: TextRange,
        token: CancellationToken,
    ) -> Self {
        let restrict_range = restrict_range.clamp_to(tree.text_len());
        Self {
            document,
            stage,
            tree,
            restrict_range,
            priority_range: restrict_range,
            visible_range: restrict_range,
            min_severity: Severity::TextAttributes,
            token,
            essential_only: false,
            index_status: IndexStatus::Smart,
            force_check_parents: false,
            ledger: Arc::new(BuilderLedger::new()),
            progress_total: AtomicUsize::new(0),
            progress_done: AtomicUsize::new(0),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Set the editor's visible range; the priority range becomes its part inside the restrict
    /// range (empty at the restrict start when they are disjoint).
    pub fn with_visible_range(mut self, visible: TextRange) -> Self {
        self.visible_range = visible;
        self.priority_range = visible
            .intersection(&self.restrict_range)
            .unwrap_or(TextRange::empty(self.restrict_range.start));
        self
    }

    /// Drop diagnostics below `severity`.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Run in reduced mode: only entries of essential stages are disposed.
    pub fn with_essential_only(mut self, essential_only: bool) -> Self {
        self.essential_only = essential_only;
        self
    }

    /// Set the index status seen by rules.
    pub fn with_index_status(mut self, status: IndexStatus) -> Self {
        self.index_status = status;
        self
    }

    /// Let rules check parents even when a child reported an error.
    pub fn with_force_check_parents(mut self, force: bool) -> Self {
        self.force_check_parents = force;
        self
    }

    /// Document being processed.
    pub fn document(&self) -> DocumentId {
        self.document
    }

    /// Stage of the pass; also the group of produced diagnostics.
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Tree snapshot of the pass.
    pub fn tree(&self) -> &Arc<dyn SyntaxTree> {
        &self.tree
    }

    /// Document length covered by the tree.
    pub fn doc_len(&self) -> usize {
        self.tree.text_len()
    }

    /// Region being re-analyzed.
    pub fn restrict_range(&self) -> TextRange {
        self.restrict_range
    }

    /// High-priority part of the restrict range.
    pub fn priority_range(&self) -> TextRange {
        self.priority_range
    }

    /// Editor's visible range.
    pub fn visible_range(&self) -> TextRange {
        self.visible_range
    }

    /// Whether the restrict range is the whole document.
    pub fn is_whole_document(&self) -> bool {
        self.restrict_range == TextRange::whole(self.doc_len())
    }

    /// Severity floor.
    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reduced mode flag.
    pub fn essential_only(&self) -> bool {
        self.essential_only
    }

    /// Index status.
    pub fn index_status(&self) -> IndexStatus {
        self.index_status
    }

    /// Force-check-parents override.
    pub fn force_check_parents(&self) -> bool {
        self.force_check_parents
    }

    /// Builders created during this pass.
    pub fn ledger(&self) -> &Arc<BuilderLedger> {
        &self.ledger
    }

    /// A factory for diagnostics of this pass, filtering by the severity floor.
    pub fn factory(&self) -> DiagnosticFactory {
        DiagnosticFactory::new(self.stage, self.ledger.clone())
            .with_filter(Arc::new(MinSeverityFilter(self.min_severity)))
    }

    /// Add `amount` units of expected work.
    pub fn add_progress_total(&self, amount: usize) {
        self.progress_total.fetch_add(amount, Ordering::Relaxed);
    }

    /// Record `amount` units of finished work.
    pub fn advance_progress(&self, amount: usize) {
        self.progress_done.fetch_add(amount, Ordering::Relaxed);
    }

    /// `(done, total)` progress units.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.progress_done.load(Ordering::Relaxed),
            self.progress_total.load(Ordering::Relaxed),
        )
    }

    /// Queue an overlay mutation.
    pub fn defer(&self, mutation: OverlayMutation) {
        self.deferred.lock().push(mutation);
    }

    /// Number of queued mutations.
    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Drop queued mutations without applying them.
    pub fn discard_deferred(&self) -> usize {
        let mut deferred = self.deferred.lock();
        let count = deferred.len();
        deferred.clear();
        count
    }

    /// Apply all queued mutations to `store` as one batch, in queue order.
    pub fn flush(&self, store: &mut OverlayStore) -> Result<usize, OverlayError> {
        let mutations = std::mem::take(&mut *self.deferred.lock());
        let count = mutations.len();
        store.batch(|store| -> Result<usize, OverlayError> {
            for mutation in mutations {
                store.apply(mutation)?;
            }
            Ok(count)
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("document", &self.document)
            .field("stage", &self.stage)
            .field("restrict_range", &self.restrict_range)
            .field("priority_range", &self.priority_range)
            .field("essential_only", &self.essential_only)
            .field("index_status", &self.index_status)
            .finish_non_exhaustive()
    }
}

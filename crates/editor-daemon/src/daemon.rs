//! The diagnostics daemon: open documents, their overlays and the passes that keep them current.

use crate::cancel::CancellationToken;
use crate::config::DaemonConfig;
use crate::delta::TextDelta;
use crate::diagnostic::DiagnosticRecord;
use crate::dirty::DirtyScopeTracker;
use crate::error::PassError;
use crate::overlay::{OverlayChange, OverlayStore};
use crate::partition::{SubtreeFilter, TreePartitioner};
use crate::pass::{DocumentSlot, HighlightingPass, PassContext, PassOutcome};
use crate::range::{DocumentId, StageId, TextRange};
use crate::rules::{Rule, RuleRunner};
use crate::session::{IndexStatus, Session};
use crate::severity::Severity;
use crate::tree::SyntaxTree;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Builder for [`DiagnosticsDaemon`].
pub struct DaemonBuilder {
    config: DaemonConfig,
    stages: BTreeMap<StageId, Vec<Box<dyn Rule>>>,
    filters: Vec<Arc<dyn SubtreeFilter>>,
}

impl DaemonBuilder {
    /// Register `rules` for `stage`. Registering a stage again appends to its rules.
    pub fn stage(mut self, stage: StageId, rules: Vec<Box<dyn Rule>>) -> Self {
        self.stages.entry(stage).or_default().extend(rules);
        self
    }

    /// Add a subtree filter to the partitioner.
    pub fn subtree_filter(mut self, filter: Arc<dyn SubtreeFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Validate the configuration and start the worker pool.
    pub fn build(self) -> Result<DiagnosticsDaemon, PassError> {
        self.config.validate()?;
        let runner = RuleRunner::new(self.config.worker_threads, self.config.progress_chunks)?;
        let partitioner = self
            .filters
            .into_iter()
            .fold(TreePartitioner::new(), TreePartitioner::with_filter);
        let tracker = DirtyScopeTracker::new(self.stages.keys().copied());
        tracing::debug!(
            stages = self.stages.len(),
            workers = runner.worker_threads(),
            "diagnostics daemon started"
        );
        Ok(DiagnosticsDaemon {
            config: self.config,
            tracker: Arc::new(tracker),
            partitioner,
            runner,
            stages: self.stages,
            documents: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashSet::new()),
            dumb: AtomicBool::new(false),
        })
    }
}

/// Keeps the diagnostics of open documents up to date.
///
/// Edits are reported with [`DiagnosticsDaemon::document_changed`] and new trees with
/// [`DiagnosticsDaemon::update_tree`]; [`DiagnosticsDaemon::run_highlighting_pass`] then
/// re-analyzes whatever is dirty. Passes for different documents may run concurrently.
pub struct DiagnosticsDaemon {
    config: DaemonConfig,
    tracker: Arc<DirtyScopeTracker>,
    partitioner: TreePartitioner,
    runner: RuleRunner,
    stages: BTreeMap<StageId, Vec<Box<dyn Rule>>>,
    documents: RwLock<HashMap<DocumentId, Arc<DocumentSlot>>>,
    disabled: RwLock<HashSet<DocumentId>>,
    dumb: AtomicBool,
}

impl DiagnosticsDaemon {
    /// Start building a daemon.
    pub fn builder(config: DaemonConfig) -> DaemonBuilder {
        DaemonBuilder {
            config,
            stages: BTreeMap::new(),
            filters: Vec::new(),
        }
    }

    /// Settings.
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// The dirty-scope tracker.
    pub fn tracker(&self) -> &Arc<DirtyScopeTracker> {
        &self.tracker
    }

    /// Registered stages, in execution order.
    pub fn stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages.keys().copied()
    }

    fn slot(&self, doc: DocumentId) -> Result<Arc<DocumentSlot>, PassError> {
        self.documents
            .read()
            .get(&doc)
            .cloned()
            .ok_or(PassError::UnknownDocument(doc))
    }

    /// Start tracking `doc`. It is fully dirty until its first pass.
    pub fn open_document(&self, doc: DocumentId, tree: Arc<dyn SyntaxTree>) {
        let previous = self
            .documents
            .write()
            .insert(doc, Arc::new(DocumentSlot::new(tree)));
        if let Some(previous) = previous {
            tracing::debug!(document = %doc, "reopened document; dropping its overlay");
            self.partitioner.invalidate(previous.tree().identity());
            self.tracker.dispose_document(doc);
        }
    }

    /// Stop tracking `doc`.
    pub fn close_document(&self, doc: DocumentId) -> bool {
        let Some(slot) = self.documents.write().remove(&doc) else {
            return false;
        };
        self.partitioner.invalidate(slot.tree().identity());
        self.tracker.dispose_document(doc);
        true
    }

    /// Whether `doc` is open.
    pub fn is_open(&self, doc: DocumentId) -> bool {
        self.documents.read().contains_key(&doc)
    }

    /// Install a new tree for `doc`.
    pub fn update_tree(&self, doc: DocumentId, tree: Arc<dyn SyntaxTree>) -> Result<(), PassError> {
        let slot = self.slot(doc)?;
        let identity = tree.identity();
        let previous = slot.set_tree(tree);
        if previous.identity() != identity {
            self.partitioner.invalidate(previous.identity());
        }
        Ok(())
    }

    /// Record a text change: the changed range becomes dirty and overlay entries follow the edit.
    ///
    /// Recorded dirty ranges move with the text. Every entry the edit touches widens the dirty
    /// scope of its own stage to the whole entry, so the next pass of that stage owns it.
    pub fn document_changed(&self, doc: DocumentId, delta: &TextDelta) -> Result<(), PassError> {
        let slot = self.slot(doc)?;
        let Some(changed) = delta.changed_range() else {
            return Ok(());
        };
        self.tracker.mark_delta_dirty(doc, delta, "document changed")?;
        let touched = {
            let mut store = slot.overlay().lock();
            store.apply_delta(delta);
            store.stage_extents(changed)
        };
        for (stage, extent) in touched {
            self.tracker.mark_stage_range_dirty(
                doc,
                stage,
                extent,
                delta.after_char_count,
                "edit touched a diagnostic",
            )?;
        }
        Ok(())
    }

    /// Mark `range` of `doc` dirty for every stage.
    pub fn mark_range_dirty(
        &self,
        doc: DocumentId,
        range: TextRange,
        reason: &str,
    ) -> Result<(), PassError> {
        let doc_len = self.slot(doc)?.tree().text_len();
        self.tracker.mark_range_dirty(doc, range, doc_len, reason)?;
        Ok(())
    }

    /// Mark the whole of `doc` dirty for every stage.
    pub fn mark_whole_document_dirty(
        &self,
        doc: DocumentId,
        reason: &str,
    ) -> Result<(), PassError> {
        self.tracker.mark_whole_document_dirty(doc, reason)?;
        Ok(())
    }

    /// Dirty range of `stage` in `doc`, or `None` if clean.
    pub fn get_dirty_range(
        &self,
        doc: DocumentId,
        stage: StageId,
    ) -> Result<Option<TextRange>, PassError> {
        let doc_len = self.slot(doc)?.tree().text_len();
        Ok(self.tracker.get_dirty_range(doc, stage, doc_len))
    }

    /// Whether every stage of `doc` is clean.
    pub fn is_fully_clean(&self, doc: DocumentId) -> bool {
        self.tracker.is_fully_clean(doc)
    }

    /// Run `f` with the overlay of `doc`.
    pub fn with_overlay<R>(
        &self,
        doc: DocumentId,
        f: impl FnOnce(&OverlayStore) -> R,
    ) -> Result<R, PassError> {
        let slot = self.slot(doc)?;
        let store = slot.overlay().lock();
        Ok(f(&store))
    }

    /// Every diagnostic currently shown for `doc`, by start offset.
    pub fn diagnostics(&self, doc: DocumentId) -> Result<Vec<Arc<DiagnosticRecord>>, PassError> {
        self.with_overlay(doc, |store| {
            store.entries().map(|entry| entry.record.clone()).collect()
        })
    }

    /// Diagnostics of `doc` at `offset` with at least `min_severity`, by start offset.
    ///
    /// A diagnostic matches when its range contains `offset`, ends included, or with
    /// `include_fix_range` when the tracked range of one of its fixes does.
    pub fn diagnostics_near_offset(
        &self,
        doc: DocumentId,
        offset: usize,
        min_severity: Severity,
        include_fix_range: bool,
    ) -> Result<Vec<Arc<DiagnosticRecord>>, PassError> {
        self.with_overlay(doc, |store| {
            store
                .entries_at_offset(offset, include_fix_range)
                .into_iter()
                .filter(|entry| entry.severity >= min_severity)
                .map(|entry| entry.record.clone())
                .collect()
        })
    }

    /// The most severe diagnostics of `doc` at `offset`; symbol-type colorings are ignored.
    ///
    /// Matching follows [`Self::diagnostics_near_offset`]. Empty when nothing of at least
    /// `min_severity` is there.
    pub fn find_diagnostics_at_offset(
        &self,
        doc: DocumentId,
        offset: usize,
        min_severity: Severity,
        include_fix_range: bool,
    ) -> Result<Vec<Arc<DiagnosticRecord>>, PassError> {
        let mut found =
            self.diagnostics_near_offset(doc, offset, min_severity, include_fix_range)?;
        found.retain(|record| !record.is_symbol_type());
        let Some(highest) = found.iter().map(|record| record.severity).max() else {
            return Ok(found);
        };
        found.retain(|record| record.severity == highest);
        Ok(found)
    }

    /// Turn highlighting of `doc` on or off. Works for documents that are not open yet.
    pub fn set_highlighting_enabled(&self, doc: DocumentId, enabled: bool) {
        let mut disabled = self.disabled.write();
        if enabled {
            disabled.remove(&doc);
        } else {
            disabled.insert(doc);
        }
        tracing::debug!(document = %doc, enabled, "highlighting switched");
    }

    /// Whether passes run for `doc`: it is open and highlighting was not turned off.
    pub fn is_highlighting_available(&self, doc: DocumentId) -> bool {
        self.is_open(doc) && !self.disabled.read().contains(&doc)
    }

    /// Whether every registered stage of the open document `doc` is clean.
    pub fn is_error_analysis_finished(&self, doc: DocumentId) -> bool {
        let Ok(slot) = self.slot(doc) else {
            return false;
        };
        let doc_len = slot.tree().text_len();
        self.stages
            .keys()
            .all(|stage| self.tracker.get_dirty_range(doc, *stage, doc_len).is_none())
    }

    /// Subscribe to overlay changes of `doc`.
    pub fn subscribe<F>(&self, doc: DocumentId, callback: F) -> Result<(), PassError>
    where
        F: FnMut(&OverlayChange) + Send + 'static,
    {
        self.slot(doc)?.overlay().lock().subscribe(callback);
        Ok(())
    }

    /// Current index status.
    pub fn index_status(&self) -> IndexStatus {
        if self.dumb.load(Ordering::Acquire) {
            IndexStatus::Dumb
        } else {
            IndexStatus::Smart
        }
    }

    /// Switch index status. Leaving dumb mode makes every document dirty again, since rules
    /// needing indexes were skipped meanwhile.
    pub fn set_index_status(&self, status: IndexStatus) {
        let was_dumb = self.dumb.swap(status == IndexStatus::Dumb, Ordering::AcqRel);
        if was_dumb && status == IndexStatus::Smart {
            self.tracker.mark_all_documents_dirty("indexes are ready");
        }
    }

    /// Let rules check parents of nodes that reported errors in `doc`.
    pub fn set_force_check_parents(&self, doc: DocumentId, force: bool) -> Result<(), PassError> {
        self.slot(doc)?.set_force_check_parents(force);
        Ok(())
    }

    /// Re-analyze the dirty part of `stage` in `doc`.
    ///
    /// `visible` is the editor's viewport; nodes inside it are visited first. A clean stage, or a
    /// document whose highlighting is turned off, returns the current diagnostics without running
    /// anything. A pass that observes a
    /// concurrent modification is restarted after a random delay, up to `max_restarts` times.
    pub fn run_highlighting_pass(
        &self,
        doc: DocumentId,
        stage: StageId,
        visible: TextRange,
        token: &CancellationToken,
    ) -> Result<PassOutcome, PassError> {
        let slot = self.slot(doc)?;
        let rules = self
            .stages
            .get(&stage)
            .ok_or(PassError::UnknownStage(stage))?;
        let ctx = PassContext {
            tracker: &self.tracker,
            partitioner: &self.partitioner,
            runner: &self.runner,
            config: &self.config,
        };

        if self.disabled.read().contains(&doc) {
            tracing::trace!(document = %doc, %stage, "highlighting is off; skipping pass");
            let store = slot.overlay().lock();
            return Ok(PassOutcome::unchanged(doc, stage, &store, 0));
        }

        let mut restarts = 0;
        loop {
            token.check()?;
            let tree = slot.tree();
            self.tracker.track_document(doc);
            let expected_count = self.tracker.modification_count(doc);
            let Some(dirty) = self.tracker.get_dirty_range(doc, stage, tree.text_len()) else {
                let store = slot.overlay().lock();
                return Ok(PassOutcome::unchanged(doc, stage, &store, restarts));
            };

            let session = Session::new(doc, stage, tree, dirty, token.clone())
                .with_visible_range(visible)
                .with_min_severity(self.config.min_severity)
                .with_essential_only(self.config.essential_only)
                .with_index_status(self.index_status())
                .with_force_check_parents(slot.force_check_parents());
            let mut pass = HighlightingPass::new(session, &slot, rules, ctx)
                .with_expected_count(expected_count);
            match pass.run() {
                Ok(mut outcome) => {
                    outcome.restarts = restarts;
                    return Ok(outcome);
                }
                Err(err @ (PassError::Inconsistent { .. } | PassError::Overlay(_))) => {
                    restarts += 1;
                    if restarts > self.config.max_restarts {
                        tracing::error!(
                            document = %doc,
                            %stage,
                            restarts,
                            error = %err,
                            "giving up on highlighting pass"
                        );
                        return Err(PassError::RestartLimit {
                            document: doc,
                            stage,
                            restarts,
                        });
                    }
                    let delay = self.restart_delay();
                    tracing::debug!(
                        document = %doc,
                        %stage,
                        restarts,
                        ?delay,
                        reason = %err,
                        "restarting highlighting pass"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run every registered stage of `doc` in order.
    pub fn run_all_stages(
        &self,
        doc: DocumentId,
        visible: TextRange,
        token: &CancellationToken,
    ) -> Result<Vec<PassOutcome>, PassError> {
        self.stages
            .keys()
            .map(|stage| self.run_highlighting_pass(doc, *stage, visible, token))
            .collect()
    }

    fn restart_delay(&self) -> Duration {
        let millis = rand::thread_rng()
            .gen_range(self.config.restart_jitter_min_ms..=self.config.restart_jitter_max_ms);
        Duration::from_millis(millis)
    }
}

impl std::fmt::Debug for DiagnosticsDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsDaemon")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .field("documents", &self.documents.read().len())
            .field("runner", &self.runner)
            .finish()
    }
}

//! Per-document, per-stage dirty scopes.
//!
//! A document without an entry is fully dirty for every stage. Entries are created on the first
//! pass that finishes for the document, and edits widen the recorded ranges afterwards.
//!
//! ```rust
//! use editor_daemon::dirty::DirtyScopeTracker;
//! use editor_daemon::range::{DocumentId, StageId, TextRange};
//!
//! let tracker = DirtyScopeTracker::new([StageId::SYNTAX]);
//! let doc = DocumentId(1);
//! assert_eq!(tracker.get_dirty_range(doc, StageId::SYNTAX, 100), Some(TextRange::new(0, 100)));
//!
//! tracker.mark_stage_clean(doc, StageId::SYNTAX);
//! assert!(tracker.is_fully_clean(doc));
//!
//! tracker.mark_range_dirty(doc, TextRange::new(10, 12), 100, "typing").unwrap();
//! assert_eq!(tracker.get_dirty_range(doc, StageId::SYNTAX, 100), Some(TextRange::new(10, 12)));
//! ```

use crate::delta::TextDelta;
use crate::error::DirtyScopeError;
use crate::range::{DocumentId, StageId, TextRange};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Dirty region of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyScope {
    /// The whole document, whatever its current length.
    WholeFile,
    /// A concrete range.
    Range(TextRange),
}

impl DirtyScope {
    /// Resolve to a concrete range for a document of `doc_len` characters.
    pub fn resolve(&self, doc_len: usize) -> TextRange {
        match self {
            DirtyScope::WholeFile => TextRange::whole(doc_len),
            DirtyScope::Range(range) => range.clamp_to(doc_len),
        }
    }

    fn combine(self, range: TextRange, doc_len: usize) -> DirtyScope {
        match self {
            DirtyScope::WholeFile => DirtyScope::WholeFile,
            DirtyScope::Range(old) => widen(old.union(&range), doc_len),
        }
    }
}

fn widen(range: TextRange, doc_len: usize) -> DirtyScope {
    if range.end > doc_len || (range.start == 0 && range.end == doc_len) {
        DirtyScope::WholeFile
    } else {
        DirtyScope::Range(range)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StageStatus {
    scope: Option<DirtyScope>,
    defensive: bool,
}

impl StageStatus {
    /// Union `range` into the scope. A precise mark ends defensive marking.
    fn widen_by(&mut self, range: TextRange, doc_len: usize) {
        self.scope = Some(match self.scope {
            None => widen(range, doc_len),
            Some(scope) => scope.combine(range, doc_len),
        });
        self.defensive = false;
    }
}

#[derive(Debug, Default)]
struct FileStatus {
    stages: HashMap<StageId, StageStatus>,
    errors_found: bool,
    modification_count: u64,
}

impl FileStatus {
    fn clean(stages: &[StageId]) -> Self {
        Self {
            stages: stages
                .iter()
                .map(|stage| (*stage, StageStatus::default()))
                .collect(),
            errors_found: false,
            modification_count: 0,
        }
    }

    fn clean_range(&mut self, stage: StageId, processed: TextRange, doc_len: usize) {
        let entry = self.stages.entry(stage).or_default();
        if entry.defensive && processed.contains_range(&TextRange::whole(doc_len)) {
            entry.defensive = false;
        }
        let Some(scope) = entry.scope else {
            return;
        };
        let dirty = scope.resolve(doc_len);
        entry.scope = if processed.contains_range(&dirty) {
            None
        } else if processed.start <= dirty.start && processed.end > dirty.start {
            Some(DirtyScope::Range(TextRange::new(processed.end, dirty.end)))
        } else if processed.start < dirty.end && processed.end >= dirty.end {
            Some(DirtyScope::Range(TextRange::new(dirty.start, processed.start)))
        } else {
            Some(scope)
        };
    }

    fn is_clean(&self) -> bool {
        self.stages
            .values()
            .all(|status| status.scope.is_none() && !status.defensive)
    }
}

/// Records which text ranges need re-analysis, per document and stage.
///
/// The document map sits behind one `RwLock`; each document has its own `Mutex`, so passes on
/// independent documents do not contend. Range-widening calls are expected off the UI thread.
pub struct DirtyScopeTracker {
    stages: Vec<StageId>,
    documents: RwLock<HashMap<DocumentId, Arc<Mutex<FileStatus>>>>,
    dirt_allowed: AtomicBool,
}

impl DirtyScopeTracker {
    /// Create a tracker for the given stages.
    pub fn new(stages: impl IntoIterator<Item = StageId>) -> Self {
        let mut stages: Vec<StageId> = stages.into_iter().collect();
        stages.sort();
        stages.dedup();
        Self {
            stages,
            documents: RwLock::new(HashMap::new()),
            dirt_allowed: AtomicBool::new(true),
        }
    }

    /// Stages tracked by this instance.
    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    fn status(&self, doc: DocumentId) -> Option<Arc<Mutex<FileStatus>>> {
        self.documents.read().get(&doc).cloned()
    }

    fn status_or_create(&self, doc: DocumentId) -> Arc<Mutex<FileStatus>> {
        if let Some(status) = self.status(doc) {
            return status;
        }
        // A fresh entry starts fully dirty: absence already meant that.
        let mut documents = self.documents.write();
        documents
            .entry(doc)
            .or_insert_with(|| {
                let mut status = FileStatus::clean(&self.stages);
                for stage in status.stages.values_mut() {
                    stage.scope = Some(DirtyScope::WholeFile);
                }
                Arc::new(Mutex::new(status))
            })
            .clone()
    }

    fn ensure_dirt_allowed(&self, doc: DocumentId, reason: &str) -> Result<(), DirtyScopeError> {
        if self.dirt_allowed.load(Ordering::Acquire) {
            return Ok(());
        }
        tracing::error!(document = %doc, reason, "document marked dirty while dirt is disallowed");
        Err(DirtyScopeError::ModificationDisallowed {
            document: doc,
            reason: reason.to_string(),
        })
    }

    /// Apply a dirty mark to the stages of `doc` and count it.
    ///
    /// Marks on a document without an entry are dropped: it is fully dirty already.
    fn update_stages(
        &self,
        doc: DocumentId,
        reason: &str,
        mut update: impl FnMut(StageId, &mut StageStatus),
    ) -> Result<(), DirtyScopeError> {
        self.ensure_dirt_allowed(doc, reason)?;
        let Some(status) = self.status(doc) else {
            return Ok(());
        };
        let mut status = status.lock();
        for (id, stage) in status.stages.iter_mut() {
            update(*id, stage);
        }
        status.modification_count += 1;
        Ok(())
    }

    /// Toggle whether dirty marks are accepted. Returns the previous setting.
    ///
    /// Passes that must not observe concurrent modification disable dirt for their duration;
    /// tests re-enable it explicitly.
    pub fn allow_dirt(&self, allowed: bool) -> bool {
        self.dirt_allowed.swap(allowed, Ordering::AcqRel)
    }

    /// Mark every stage of `doc` dirty for the whole document.
    pub fn mark_whole_document_dirty(
        &self,
        doc: DocumentId,
        reason: &str,
    ) -> Result<(), DirtyScopeError> {
        tracing::debug!(document = %doc, reason, "marking whole document dirty");
        self.update_stages(doc, reason, |_, stage| stage.scope = Some(DirtyScope::WholeFile))
    }

    /// Widen the dirty scope of every stage of `doc` by `range`.
    ///
    /// The union widens to [`DirtyScope::WholeFile`] when it would exceed `doc_len` or cover the
    /// whole document. A precise mark ends defensive marking (the preserved range is kept).
    pub fn mark_range_dirty(
        &self,
        doc: DocumentId,
        range: TextRange,
        doc_len: usize,
        reason: &str,
    ) -> Result<(), DirtyScopeError> {
        tracing::trace!(document = %doc, %range, reason, "marking range dirty");
        self.update_stages(doc, reason, |_, stage| stage.widen_by(range, doc_len))
    }

    /// Like [`Self::mark_range_dirty`], restricted to `stage`.
    pub fn mark_stage_range_dirty(
        &self,
        doc: DocumentId,
        stage: StageId,
        range: TextRange,
        doc_len: usize,
        reason: &str,
    ) -> Result<(), DirtyScopeError> {
        tracing::trace!(document = %doc, %stage, %range, reason, "marking stage range dirty");
        self.update_stages(doc, reason, |id, status| {
            if id == stage {
                status.widen_by(range, doc_len);
            }
        })
    }

    /// Record a text change of `doc`.
    ///
    /// Recorded ranges are first moved through the edits so they keep covering the same text,
    /// then widened by the changed range. An empty delta changes nothing.
    pub fn mark_delta_dirty(
        &self,
        doc: DocumentId,
        delta: &TextDelta,
        reason: &str,
    ) -> Result<(), DirtyScopeError> {
        let Some(changed) = delta.changed_range() else {
            return Ok(());
        };
        tracing::trace!(document = %doc, %changed, reason, "marking edit dirty");
        self.update_stages(doc, reason, |_, stage| {
            if let Some(DirtyScope::Range(old)) = stage.scope {
                stage.scope = Some(DirtyScope::Range(delta.map_range(old)));
            }
            stage.widen_by(changed, delta.after_char_count);
        })
    }

    /// Force whole-document re-analysis without discarding the recorded ranges.
    ///
    /// Used when edits may have been missed; the next precise [`Self::mark_range_dirty`] or a
    /// stage finishing cleanly ends it.
    pub fn mark_defensively(&self, doc: DocumentId, reason: &str) -> Result<(), DirtyScopeError> {
        tracing::debug!(document = %doc, reason, "marking document dirty defensively");
        self.update_stages(doc, reason, |_, stage| stage.defensive = true)
    }

    /// Forget every document: all become fully dirty.
    pub fn mark_all_documents_dirty(&self, reason: &str) {
        tracing::debug!(reason, "marking all documents dirty");
        self.documents.write().clear();
    }

    /// Drop all state for a closed document.
    pub fn dispose_document(&self, doc: DocumentId) {
        self.documents.write().remove(&doc);
    }

    /// Create the entry of `doc` (fully dirty) if it is absent.
    ///
    /// Marks on an absent document are dropped, so a pass registers the document before it
    /// samples [`DirtyScopeTracker::modification_count`].
    pub fn track_document(&self, doc: DocumentId) {
        self.status_or_create(doc);
    }

    /// Mark `stage` of `doc` clean.
    pub fn mark_stage_clean(&self, doc: DocumentId, stage: StageId) {
        let status = self.status_or_create(doc);
        let mut status = status.lock();
        let entry = status.stages.entry(stage).or_default();
        entry.scope = None;
        entry.defensive = false;
    }

    /// Clear the part of `stage`'s dirty scope covered by `processed`.
    ///
    /// Dirty scopes are single ranges, so only a scope fully covered by `processed` becomes clean
    /// and a scope overlapping one end of it is trimmed; anything else stays as it was.
    pub fn mark_range_clean(
        &self,
        doc: DocumentId,
        stage: StageId,
        processed: TextRange,
        doc_len: usize,
    ) {
        let status = self.status_or_create(doc);
        status.lock().clean_range(stage, processed, doc_len);
    }

    /// Like [`DirtyScopeTracker::mark_range_clean`], but only if no dirty mark reached `doc`
    /// since the modification count was `expected_count`.
    ///
    /// The check and the update happen under the document's lock. Returns whether the range was
    /// marked clean.
    pub fn mark_range_clean_if_unmodified(
        &self,
        doc: DocumentId,
        stage: StageId,
        processed: TextRange,
        doc_len: usize,
        expected_count: u64,
    ) -> bool {
        let status = self.status_or_create(doc);
        let mut status = status.lock();
        if status.modification_count != expected_count {
            tracing::debug!(
                document = %doc,
                %stage,
                expected = expected_count,
                actual = status.modification_count,
                "document changed during pass; keeping it dirty"
            );
            return false;
        }
        status.clean_range(stage, processed, doc_len);
        true
    }

    /// Dirty range of `stage` in `doc`, or `None` if the stage is clean.
    ///
    /// [`DirtyScope::WholeFile`] and defensive marks are normalized to `0..doc_len`.
    pub fn get_dirty_range(
        &self,
        doc: DocumentId,
        stage: StageId,
        doc_len: usize,
    ) -> Option<TextRange> {
        let Some(status) = self.status(doc) else {
            return Some(TextRange::whole(doc_len));
        };
        let status = status.lock();
        let Some(entry) = status.stages.get(&stage) else {
            return Some(TextRange::whole(doc_len));
        };
        if entry.defensive {
            return Some(TextRange::whole(doc_len));
        }
        entry.scope.map(|scope| scope.resolve(doc_len))
    }

    /// `true` if every tracked stage of `doc` is clean.
    pub fn is_fully_clean(&self, doc: DocumentId) -> bool {
        self.status(doc)
            .is_some_and(|status| status.lock().is_clean())
    }

    /// Number of dirty marks applied to `doc` so far.
    ///
    /// A pass samples it before running rules and compares afterwards; a difference means the
    /// document changed under the pass.
    pub fn modification_count(&self, doc: DocumentId) -> u64 {
        self.status(doc)
            .map_or(0, |status| status.lock().modification_count)
    }

    /// Record whether the last whole-document pass found errors.
    pub fn set_errors_found(&self, doc: DocumentId, errors_found: bool) {
        let status = self.status_or_create(doc);
        status.lock().errors_found = errors_found;
    }

    /// Whether the last whole-document pass found errors.
    pub fn errors_found(&self, doc: DocumentId) -> bool {
        self.status(doc)
            .is_some_and(|status| status.lock().errors_found)
    }
}

impl Default for DirtyScopeTracker {
    fn default() -> Self {
        Self::new([StageId::SYNTAX, StageId::INSPECTIONS, StageId::EXTERNAL])
    }
}

//! The persistent diagnostics overlay of one document.
//!
//! Entries are kept sorted by start offset together with a prefix maximum of their end offsets,
//! which keeps range queries at `O(log n + k)` even with many long entries. Edits shift entries
//! the same way styled intervals are shifted in the editor kernel.

use crate::cancel::CancellationToken;
use crate::delta::TextDelta;
use crate::diagnostic::DiagnosticRecord;
use crate::error::OverlayError;
use crate::range::{StageId, TextRange};
use crate::severity::{AttributesKey, GutterMarker, Layer, Severity, TextAttributes};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Handle of an overlay entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryHandle(pub u64);

impl std::fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry#{}", self.0)
    }
}

/// Handle of a range marker that follows edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerHandle(pub u64);

/// A displayed diagnostic.
#[derive(Debug, Clone)]
pub struct OverlayEntry {
    /// Handle.
    pub handle: EntryHandle,
    /// Current range (follows edits).
    pub range: TextRange,
    /// Z-order.
    pub layer: Layer,
    /// Severity of the displayed record.
    pub severity: Severity,
    /// Attributes key.
    pub attributes_key: AttributesKey,
    /// Forced attributes.
    pub forced_attributes: Option<TextAttributes>,
    /// Gutter icon.
    pub gutter: Option<GutterMarker>,
    /// Owning stage.
    pub group: StageId,
    /// Producing rule.
    pub tool_id: Option<Arc<str>>,
    /// The record displayed by this entry.
    pub record: Arc<DiagnosticRecord>,
    claim: Option<CancellationToken>,
}

impl OverlayEntry {
    fn new(handle: EntryHandle, range: TextRange, record: Arc<DiagnosticRecord>) -> Self {
        Self {
            handle,
            range,
            layer: record.layer(),
            severity: record.severity,
            attributes_key: record.attributes_key,
            forced_attributes: record.forced_attributes,
            gutter: record.gutter.clone(),
            group: record.group,
            tool_id: record.tool_id.clone(),
            record,
            claim: None,
        }
    }

    /// Id of the cancellation token of the session currently recycling this entry.
    pub fn claimed_by(&self) -> Option<u64> {
        self.claim.as_ref().map(CancellationToken::id)
    }
}

/// Summary of overlay changes delivered to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayChange {
    /// Overlay version after the change.
    pub version: u64,
    /// Entries created.
    pub added: Vec<EntryHandle>,
    /// Entries that now display a different record.
    pub updated: Vec<EntryHandle>,
    /// Entries disposed.
    pub removed: Vec<EntryHandle>,
    /// Stages whose file-level annotations changed.
    pub file_level: Vec<StageId>,
    /// Entries were shifted by an edit.
    pub shifted: bool,
}

impl OverlayChange {
    /// Whether the change carries anything.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.file_level.is_empty()
            && !self.shifted
    }
}

/// Overlay change callback.
pub type OverlayChangeCallback = Box<dyn FnMut(&OverlayChange) + Send>;

/// A queued overlay mutation, applied in one batch at the end of a pass.
#[derive(Debug, Clone)]
pub enum OverlayMutation {
    /// Create an entry for `record` at `range`.
    Add {
        /// Entry range (may differ from the record's when widened).
        range: TextRange,
        /// The record.
        record: Arc<DiagnosticRecord>,
    },
    /// Let an existing entry display `record` and drop its recycling claim.
    Rebind {
        /// The recycled entry.
        handle: EntryHandle,
        /// The record.
        record: Arc<DiagnosticRecord>,
    },
    /// Replace or extend the file-level annotations of a stage.
    FileLevel {
        /// Owning stage.
        stage: StageId,
        /// The annotations.
        records: Vec<Arc<DiagnosticRecord>>,
        /// Replace the stage's annotations instead of merging.
        replace: bool,
    },
}

/// Range-indexed store of overlay entries for one document.
pub struct OverlayStore {
    /// Kept sorted by `range.start`.
    entries: Vec<OverlayEntry>,
    /// `prefix_max_end[i] = max(entries[0..=i].range.end)`.
    prefix_max_end: Vec<usize>,
    next_handle: u64,
    markers: HashMap<MarkerHandle, TextRange>,
    file_level: BTreeMap<StageId, Vec<Arc<DiagnosticRecord>>>,
    callbacks: Vec<OverlayChangeCallback>,
    version: u64,
    pending: Option<OverlayChange>,
}

impl OverlayStore {
    /// Create an empty overlay.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            prefix_max_end: Vec::new(),
            next_handle: 1,
            markers: HashMap::new(),
            file_level: BTreeMap::new(),
            callbacks: Vec::new(),
            version: 0,
            pending: None,
        }
    }

    fn rebuild_prefix_max_end_from(&mut self, start_idx: usize) {
        if self.entries.is_empty() {
            self.prefix_max_end.clear();
            return;
        }

        if self.prefix_max_end.len() != self.entries.len() {
            self.prefix_max_end.resize(self.entries.len(), 0);
        }

        let mut max_end = if start_idx == 0 {
            0
        } else {
            self.prefix_max_end[start_idx - 1]
        };

        for (idx, entry) in self.entries.iter().enumerate().skip(start_idx) {
            max_end = max_end.max(entry.range.end);
            self.prefix_max_end[idx] = max_end;
        }
    }

    fn position(&self, handle: EntryHandle) -> Option<usize> {
        self.entries.iter().position(|entry| entry.handle == handle)
    }

    fn record_change(&mut self, apply: impl FnOnce(&mut OverlayChange)) {
        match self.pending.as_mut() {
            Some(pending) => apply(pending),
            None => {
                let mut change = OverlayChange::default();
                apply(&mut change);
                self.notify(change);
            }
        }
    }

    fn notify(&mut self, mut change: OverlayChange) {
        if change.is_empty() {
            return;
        }
        self.version += 1;
        change.version = self.version;
        for callback in &mut self.callbacks {
            callback(&change);
        }
    }

    /// Run `f` as one batch: subscribers see a single [`OverlayChange`] once it returns.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.pending.is_some() {
            return f(self);
        }
        self.pending = Some(OverlayChange::default());
        let result = f(self);
        if let Some(change) = self.pending.take() {
            self.notify(change);
        }
        result
    }

    /// Subscribe to overlay changes.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&OverlayChange) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Monotonic version, bumped once per notified change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Create an entry displaying `record` at `range` and bind the record to it.
    pub fn add_entry(
        &mut self,
        range: TextRange,
        record: Arc<DiagnosticRecord>,
    ) -> Result<EntryHandle, OverlayError> {
        let handle = EntryHandle(self.next_handle);
        record.bind_entry(handle)?;
        self.next_handle += 1;

        let pos = self
            .entries
            .partition_point(|entry| entry.range.start <= range.start);
        self.entries.insert(pos, OverlayEntry::new(handle, range, record));
        self.prefix_max_end.insert(pos, 0);
        self.rebuild_prefix_max_end_from(pos);
        self.track_fixes(handle);
        self.record_change(|change| change.added.push(handle));
        Ok(handle)
    }

    fn track_fixes(&mut self, handle: EntryHandle) {
        let Some(pos) = self.position(handle) else {
            return;
        };
        let record = self.entries[pos].record.clone();
        for fix in &record.fixes {
            if let Some(range) = fix.range {
                let marker = self.add_range_marker(range);
                if !fix.track(marker) {
                    self.markers.remove(&marker);
                }
            }
        }
    }

    /// Dispose an entry.
    pub fn remove_entry(&mut self, handle: EntryHandle) -> Result<OverlayEntry, OverlayError> {
        let pos = self
            .position(handle)
            .ok_or(OverlayError::UnknownEntry(handle.0))?;
        let entry = self.entries.remove(pos);
        self.prefix_max_end.remove(pos);
        if pos < self.entries.len() {
            self.rebuild_prefix_max_end_from(pos);
        }
        for fix in &entry.record.fixes {
            if let Some(marker) = fix.tracking_marker() {
                self.markers.remove(&marker);
            }
        }
        self.record_change(|change| change.removed.push(handle));
        Ok(entry)
    }

    /// Let an existing entry display `record`, keeping its identity and range.
    ///
    /// Clears the entry's recycling claim.
    pub fn rebind(
        &mut self,
        handle: EntryHandle,
        record: Arc<DiagnosticRecord>,
    ) -> Result<(), OverlayError> {
        let pos = self
            .position(handle)
            .ok_or(OverlayError::UnknownEntry(handle.0))?;
        record.bind_entry(handle)?;
        for fix in &self.entries[pos].record.fixes {
            if let Some(marker) = fix.tracking_marker() {
                self.markers.remove(&marker);
            }
        }
        let range = self.entries[pos].range;
        self.entries[pos] = OverlayEntry::new(handle, range, record);
        self.track_fixes(handle);
        self.record_change(|change| change.updated.push(handle));
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, handle: EntryHandle) -> Option<&OverlayEntry> {
        self.entries.iter().find(|entry| entry.handle == handle)
    }

    /// All entries, sorted by start offset.
    pub fn entries(&self) -> impl Iterator<Item = &OverlayEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sharing at least one character with `range`.
    pub fn query_overlapping(&self, range: TextRange) -> Vec<&OverlayEntry> {
        if range.is_empty() {
            return Vec::new();
        }
        self.scan(range, |entry| entry.range.overlaps(&range))
    }

    /// Entries intersecting `range`, touching ones included.
    pub fn query_intersecting(&self, range: TextRange) -> Vec<&OverlayEntry> {
        self.scan(range, |entry| entry.range.intersects(&range))
    }

    /// Entries whose range contains `offset`, ends included.
    ///
    /// With `include_fix_range`, entries with a fix whose tracked range contains `offset` match
    /// too. Results are ordered by start offset.
    pub fn entries_at_offset(&self, offset: usize, include_fix_range: bool) -> Vec<&OverlayEntry> {
        let point = TextRange::empty(offset);
        if !include_fix_range {
            return self.query_intersecting(point);
        }
        self.entries
            .iter()
            .filter(|entry| {
                entry.range.intersects(&point)
                    || entry.record.fixes.iter().any(|fix| {
                        fix.tracking_marker()
                            .and_then(|marker| self.marker_range(marker))
                            .is_some_and(|range| range.intersects(&point))
                    })
            })
            .collect()
    }

    /// Per owning stage, the union of the entries intersecting `range`.
    pub fn stage_extents(&self, range: TextRange) -> BTreeMap<StageId, TextRange> {
        let mut extents: BTreeMap<StageId, TextRange> = BTreeMap::new();
        for entry in self.query_intersecting(range) {
            extents
                .entry(entry.group)
                .and_modify(|extent| *extent = extent.union(&entry.range))
                .or_insert(entry.range);
        }
        extents
    }

    fn scan(&self, range: TextRange, keep: impl Fn(&OverlayEntry) -> bool) -> Vec<&OverlayEntry> {
        let mut result = Vec::new();
        if self.entries.is_empty() {
            return result;
        }

        // Everything that may intersect starts at or before `range.end`.
        let search_end = self
            .entries
            .partition_point(|entry| entry.range.start <= range.end);
        if search_end == 0 {
            return result;
        }

        let mut scan_start = self
            .entries
            .partition_point(|entry| entry.range.start < range.start)
            .min(search_end);
        while scan_start > 0 && self.prefix_max_end[scan_start - 1] >= range.start {
            scan_start -= 1;
        }

        for entry in &self.entries[scan_start..search_end] {
            if keep(entry) {
                result.push(entry);
            }
        }
        result
    }

    /// Whether any entry has error severity.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|entry| entry.severity.is_error())
            || self
                .file_level
                .values()
                .flatten()
                .any(|record| record.severity.is_error())
    }

    /// Claim an entry for recycling on behalf of the session owning `token`.
    ///
    /// Fails (returns `false`) while another live session holds the claim. A claim held by a
    /// cancelled token is stale and is taken over.
    pub fn try_claim(
        &mut self,
        handle: EntryHandle,
        token: &CancellationToken,
    ) -> Result<bool, OverlayError> {
        let pos = self
            .position(handle)
            .ok_or(OverlayError::UnknownEntry(handle.0))?;
        let entry = &mut self.entries[pos];
        match &entry.claim {
            Some(holder) if holder.id() != token.id() && !holder.is_cancelled() => Ok(false),
            _ => {
                entry.claim = Some(token.clone());
                Ok(true)
            }
        }
    }

    /// Drop the claim of `token_id` on an entry. Returns whether a claim was dropped.
    pub fn release_claim(&mut self, handle: EntryHandle, token_id: u64) -> bool {
        let Some(pos) = self.position(handle) else {
            return false;
        };
        let entry = &mut self.entries[pos];
        if entry.claimed_by() == Some(token_id) {
            entry.claim = None;
            true
        } else {
            false
        }
    }

    /// Create a marker that follows edits.
    pub fn add_range_marker(&mut self, range: TextRange) -> MarkerHandle {
        let handle = MarkerHandle(self.next_handle);
        self.next_handle += 1;
        self.markers.insert(handle, range);
        handle
    }

    /// Current range of a marker; `None` once disposed or deleted by an edit.
    pub fn marker_range(&self, handle: MarkerHandle) -> Option<TextRange> {
        self.markers.get(&handle).copied()
    }

    /// Dispose a marker.
    pub fn remove_range_marker(&mut self, handle: MarkerHandle) -> bool {
        self.markers.remove(&handle).is_some()
    }

    /// File-level annotations of a stage.
    pub fn file_level(&self, stage: StageId) -> &[Arc<DiagnosticRecord>] {
        self.file_level
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace (or merge into) the file-level annotations of a stage.
    pub fn set_file_level(
        &mut self,
        stage: StageId,
        records: Vec<Arc<DiagnosticRecord>>,
        replace: bool,
    ) {
        let current = self.file_level.entry(stage).or_default();
        let before = current.clone();
        if replace {
            *current = records;
        } else {
            for record in records {
                if !current.iter().any(|existing| **existing == *record) {
                    current.push(record);
                }
            }
        }
        if *current != before {
            self.record_change(|change| change.file_level.push(stage));
        }
    }

    /// Apply one queued mutation.
    pub fn apply(&mut self, mutation: OverlayMutation) -> Result<(), OverlayError> {
        match mutation {
            OverlayMutation::Add { range, record } => self.add_entry(range, record).map(|_| ()),
            OverlayMutation::Rebind { handle, record } => self.rebind(handle, record),
            OverlayMutation::FileLevel {
                stage,
                records,
                replace,
            } => {
                self.set_file_level(stage, records, replace);
                Ok(())
            }
        }
    }

    /// Shift entries and markers for a text change.
    ///
    /// Entries entirely inside deleted text are disposed; entries spanning an edit grow or shrink.
    /// Entries whose record needs an update on typing are disposed as soon as an edit touches
    /// them.
    pub fn apply_delta(&mut self, delta: &TextDelta) {
        if delta.is_empty() {
            return;
        }
        self.batch(|store| {
            for span in delta.spans() {
                let removed = span.removed_range();
                store.drop_touched_volatile(removed);
                if span.removed > 0 {
                    store.update_for_deletion(removed.start, removed.end);
                }
                if span.added > 0 {
                    store.update_for_insertion(span.start, span.added);
                }
            }
            store.rebuild_prefix_max_end_from(0);
            store.record_change(|change| change.shifted = true);
        });
    }

    fn drop_touched_volatile(&mut self, edited: TextRange) {
        let touched: Vec<EntryHandle> = self
            .entries
            .iter()
            .filter(|entry| entry.record.needs_update_on_typing && entry.range.intersects(&edited))
            .map(|entry| entry.handle)
            .collect();
        for handle in touched {
            let _ = self.remove_entry(handle);
        }
    }

    fn update_for_insertion(&mut self, pos: usize, delta: usize) {
        let shift = |range: &mut TextRange| {
            if range.start >= pos {
                range.start += delta;
                range.end += delta;
            } else if range.end > pos {
                range.end += delta;
            }
        };
        for entry in &mut self.entries {
            shift(&mut entry.range);
        }
        for range in self.markers.values_mut() {
            shift(range);
        }
    }

    fn update_for_deletion(&mut self, start: usize, end: usize) {
        let delta = end - start;
        // Returns `false` when the range was swallowed by the deletion.
        let shift = |range: &mut TextRange| -> bool {
            if range.end <= start {
                true
            } else if range.start >= end {
                range.start -= delta;
                range.end -= delta;
                true
            } else if range.start >= start && range.end <= end {
                false
            } else if range.start < start && range.end > end {
                range.end -= delta;
                true
            } else if range.start < start {
                range.end = start;
                true
            } else {
                range.start = start;
                range.end -= delta;
                true
            }
        };

        let mut removed = Vec::new();
        self.entries.retain_mut(|entry| {
            let keep = shift(&mut entry.range);
            if !keep {
                removed.push(entry.handle);
            }
            keep
        });
        self.markers.retain(|_, range| shift(range));
        self.prefix_max_end.truncate(self.entries.len());
        if !removed.is_empty() {
            self.record_change(|change| change.removed.extend(removed));
        }
    }
}

impl Default for OverlayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OverlayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayStore")
            .field("entries", &self.entries.len())
            .field("markers", &self.markers.len())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

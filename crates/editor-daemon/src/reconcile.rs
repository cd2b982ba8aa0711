//! Merging freshly produced diagnostics into the overlay.

use crate::config::{CoveragePolicy, CoverThreshold};
use crate::diagnostic::DiagnosticRecord;
use crate::error::PassError;
use crate::overlay::{OverlayMutation, OverlayStore};
use crate::range::TextRange;
use crate::recycler::Recycler;
use crate::session::Session;
use crate::severity::Severity;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Counters of one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Diagnostics that will be displayed.
    pub accepted: usize,
    /// Accepted diagnostics that get a fresh entry.
    pub created: usize,
    /// Accepted diagnostics that reuse a recycled entry.
    pub reused: usize,
    /// Diagnostics hidden by a covering diagnostic.
    pub suppressed: usize,
    /// Duplicates of another diagnostic or of a kept entry.
    pub deduplicated: usize,
    /// Diagnostics below the severity floor, outside the region or at the end of the document.
    pub dropped: usize,
    /// File-level annotations.
    pub file_level: usize,
    /// Existing entries claimed for recycling.
    pub recycled: usize,
    /// Existing entries another session was already recycling.
    pub contended: usize,
}

#[derive(Debug, Clone)]
struct Coverer {
    range: TextRange,
    severity: Severity,
    symbol_type: bool,
    after_end_of_line: bool,
}

impl Coverer {
    fn of(range: TextRange, record: &DiagnosticRecord) -> Self {
        Self {
            range,
            severity: record.severity,
            symbol_type: record.is_symbol_type(),
            after_end_of_line: record.after_end_of_line,
        }
    }
}

/// Diffs the diagnostics of one pass against the overlay.
///
/// Existing entries of the pass's stage inside the restrict range are claimed by the recycler
/// first. Candidates are then swept in start order together with the entries that stay; each one
/// is suppressed, deduplicated, moved to the file-level channel, or queued on the session as a
/// rebind of a recycled entry or a new entry. Nothing touches the overlay until the session is
/// flushed.
#[derive(Debug)]
pub struct OverlayReconciler<'a> {
    session: &'a Session,
    policy: CoveragePolicy,
}

impl<'a> OverlayReconciler<'a> {
    /// Create a reconciler for `session`.
    pub fn new(session: &'a Session, policy: CoveragePolicy) -> Self {
        Self { session, policy }
    }

    /// Queue the mutations that make the overlay show `diagnostics` for the restrict range.
    ///
    /// Entries produced by rules in `preserve_tools` are neither recycled nor disposed.
    pub fn reconcile(
        &self,
        store: &Mutex<OverlayStore>,
        recycler: &mut dyn Recycler,
        diagnostics: &[Arc<DiagnosticRecord>],
        preserve_tools: &HashSet<Arc<str>>,
    ) -> Result<ReconcileStats, PassError> {
        let session = self.session;
        let restrict = session.restrict_range();
        let mut stats = ReconcileStats::default();

        // Entries that stay on screen: other stages, preserved rules, partly outside the
        // region, or claimed by another session. Sorted by start.
        let mut kept: Vec<(TextRange, Arc<DiagnosticRecord>)> = Vec::new();
        {
            let mut store = store.lock();
            let existing: Vec<_> = store
                .query_intersecting(restrict)
                .into_iter()
                .map(|entry| (entry.handle, entry.range, entry.record.clone()))
                .collect();
            for (handle, range, record) in existing {
                let preserved = record
                    .tool_id
                    .as_ref()
                    .is_some_and(|tool| preserve_tools.contains(tool));
                let owned = record.group == session.stage()
                    && !preserved
                    && restrict.contains_range(&range);
                if owned {
                    if recycler.recycle(&mut store, handle)? {
                        stats.recycled += 1;
                        continue;
                    }
                    stats.contended += 1;
                }
                kept.push((range, record));
            }
        }

        let mut file_level: Vec<Arc<DiagnosticRecord>> = Vec::new();
        let mut candidates = self.prepare(diagnostics, &mut file_level, &mut stats);

        let before = candidates.len();
        candidates
            .dedup_by(|(range, record), (prev_range, prev)| range == prev_range && record == prev);
        stats.deduplicated += before - candidates.len();

        let mut pending = kept.iter().peekable();
        let mut active: Vec<Coverer> = Vec::new();
        for (range, record) in candidates {
            while let Some((kept_range, kept_record)) =
                pending.next_if(|entry| entry.0.start <= range.start)
            {
                active.push(Coverer::of(*kept_range, kept_record));
            }
            active.retain(|coverer| coverer.range.end >= range.start);

            // Already shown by an entry that stays.
            if kept
                .iter()
                .any(|(kept_range, kept_record)| *kept_range == range && **kept_record == *record)
            {
                stats.deduplicated += 1;
                continue;
            }
            if self.is_covered(range, &record, &active) {
                tracing::trace!(%range, %record, "suppressed by covering diagnostic");
                stats.suppressed += 1;
                continue;
            }

            active.push(Coverer::of(range, &record));
            stats.accepted += 1;
            match recycler.pickup(range, record.layer(), record.tool_id.as_ref()) {
                Some(recycled) => {
                    stats.reused += 1;
                    session.defer(OverlayMutation::Rebind {
                        handle: recycled.handle,
                        record,
                    });
                }
                None => {
                    stats.created += 1;
                    session.defer(OverlayMutation::Add { range, record });
                }
            }
        }

        if !file_level.is_empty() || session.is_whole_document() {
            let mut unique: Vec<Arc<DiagnosticRecord>> = Vec::with_capacity(file_level.len());
            for record in file_level {
                if !unique.iter().any(|seen| **seen == *record) {
                    unique.push(record);
                }
            }
            stats.file_level = unique.len();
            session.defer(OverlayMutation::FileLevel {
                stage: session.stage(),
                records: unique,
                replace: session.is_whole_document(),
            });
        }

        tracing::debug!(
            document = %session.document(),
            stage = %session.stage(),
            restrict = %restrict,
            accepted = stats.accepted,
            reused = stats.reused,
            suppressed = stats.suppressed,
            recycled = stats.recycled,
            "reconciled diagnostics"
        );
        Ok(stats)
    }

    /// Filter, clamp and sort candidates; file-level records go to `file_level`.
    fn prepare(
        &self,
        diagnostics: &[Arc<DiagnosticRecord>],
        file_level: &mut Vec<Arc<DiagnosticRecord>>,
        stats: &mut ReconcileStats,
    ) -> Vec<(TextRange, Arc<DiagnosticRecord>)> {
        let session = self.session;
        let doc_len = session.doc_len();
        let restrict = session.restrict_range();

        let mut candidates = Vec::with_capacity(diagnostics.len());
        for record in diagnostics {
            if record.severity < session.min_severity() {
                stats.dropped += 1;
                continue;
            }
            if record.file_level {
                file_level.push(record.clone());
                continue;
            }
            let mut range = record.range.clamp_to(doc_len);
            if !range.intersects(&restrict) {
                stats.dropped += 1;
                continue;
            }
            if range.is_empty() && !record.after_end_of_line {
                if range.start >= doc_len {
                    stats.dropped += 1;
                    continue;
                }
                range = TextRange::new(range.start, range.start + 1);
            }
            candidates.push((range, record.clone()));
        }
        candidates.sort_by(|(range, record), (other_range, other)| {
            DiagnosticRecord::sweep_order(*range, record, *other_range, other)
        });
        candidates
    }

    fn is_covered(&self, range: TextRange, record: &DiagnosticRecord, active: &[Coverer]) -> bool {
        let policy = &self.policy;
        if !policy.enabled
            || record.severity.is_error()
            || (policy.exempt_gutter && record.gutter.is_some())
            || (policy.exempt_symbol_type && record.is_symbol_type())
        {
            return false;
        }
        active.iter().any(|coverer| {
            !coverer.symbol_type
                && !coverer.after_end_of_line
                && coverer.range.contains_range(&range)
                && match policy.threshold {
                    CoverThreshold::SameOrHigher => coverer.severity >= record.severity,
                    CoverThreshold::ErrorOnly => coverer.severity.is_error(),
                }
        })
    }
}

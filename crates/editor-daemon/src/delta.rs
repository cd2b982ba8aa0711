//! Text changes as seen by the daemon.
//!
//! The daemon never holds document text. An edit matters to it only through where it happened
//! and how many characters it removed and added, so every [`TextDeltaEdit`] is reduced to an
//! [`EditSpan`] before overlay entries are shifted or dirty scopes are moved. Offsets count
//! Unicode scalar values.

use crate::range::TextRange;

/// One edit of a [`TextDelta`], with its text.
///
/// `start` refers to the document as left by the previous edits of the same delta. The text is
/// kept for adapters that re-parse incrementally; the daemon itself only uses [`Self::span`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDeltaEdit {
    /// Offset of the edit.
    pub start: usize,
    /// Text that was removed at `start`.
    pub deleted_text: String,
    /// Text that was put at `start`.
    pub inserted_text: String,
}

impl TextDeltaEdit {
    /// Create an edit.
    pub fn new(
        start: usize,
        deleted_text: impl Into<String>,
        inserted_text: impl Into<String>,
    ) -> Self {
        Self {
            start,
            deleted_text: deleted_text.into(),
            inserted_text: inserted_text.into(),
        }
    }

    /// Character counts of this edit.
    pub fn span(&self) -> EditSpan {
        EditSpan {
            start: self.start,
            removed: self.deleted_text.chars().count(),
            added: self.inserted_text.chars().count(),
        }
    }
}

/// Position and size of an edit, without its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditSpan {
    /// Offset of the edit.
    pub start: usize,
    /// Characters removed.
    pub removed: usize,
    /// Characters added.
    pub added: usize,
}

impl EditSpan {
    /// Removed characters, in offsets before the edit.
    pub fn removed_range(&self) -> TextRange {
        TextRange::new(self.start, self.start.saturating_add(self.removed))
    }

    /// Added characters, in offsets after the edit.
    pub fn added_range(&self) -> TextRange {
        TextRange::new(self.start, self.start.saturating_add(self.added))
    }

    /// Where `offset` ends up after the edit.
    ///
    /// Offsets up to the edit stay, offsets inside the removed text collapse to the edit start
    /// and later offsets move by the size difference.
    pub fn map_offset(&self, offset: usize) -> usize {
        let removed_end = self.start.saturating_add(self.removed);
        if offset <= self.start {
            offset
        } else if offset < removed_end {
            self.start
        } else {
            offset - self.removed + self.added
        }
    }

    /// Where `range` ends up after the edit. A range starting at the edit covers the added text.
    pub fn map_range(&self, range: TextRange) -> TextRange {
        TextRange::new(self.map_offset(range.start), self.map_offset(range.end))
    }
}

/// An ordered list of edits turning one document revision into the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    /// Document length before the edits.
    pub before_char_count: usize,
    /// Document length after the edits.
    pub after_char_count: usize,
    /// Edits, in application order.
    pub edits: Vec<TextDeltaEdit>,
}

impl TextDelta {
    /// Build a delta, computing the resulting length.
    pub fn new(before_char_count: usize, edits: Vec<TextDeltaEdit>) -> Self {
        let after_char_count = edits.iter().map(TextDeltaEdit::span).fold(
            before_char_count,
            |count, span| count.saturating_sub(span.removed) + span.added,
        );
        Self {
            before_char_count,
            after_char_count,
            edits,
        }
    }

    /// A single insertion.
    pub fn insert(before_char_count: usize, offset: usize, text: impl Into<String>) -> Self {
        Self::new(before_char_count, vec![TextDeltaEdit::new(offset, "", text)])
    }

    /// A single deletion.
    pub fn delete(before_char_count: usize, offset: usize, deleted: impl Into<String>) -> Self {
        Self::new(before_char_count, vec![TextDeltaEdit::new(offset, deleted, "")])
    }

    /// Whether there are no edits.
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Spans of the edits, in application order.
    pub fn spans(&self) -> impl Iterator<Item = EditSpan> + '_ {
        self.edits.iter().map(TextDeltaEdit::span)
    }

    /// Map a range of the previous revision through every edit.
    pub fn map_range(&self, range: TextRange) -> TextRange {
        self.spans()
            .fold(range, |range, span| span.map_range(range))
            .clamp_to(self.after_char_count)
    }

    /// Smallest range of the new revision covering every changed position.
    ///
    /// Pure deletions leave a zero-width range at the deletion point.
    pub fn changed_range(&self) -> Option<TextRange> {
        let covered = self.spans().fold(None, |covered: Option<TextRange>, span| {
            let added = span.added_range();
            Some(match covered {
                Some(range) => span.map_range(range).union(&added),
                None => added,
            })
        });
        covered.map(|range| range.clamp_to(self.after_char_count))
    }
}

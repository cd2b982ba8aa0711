//! Text ranges and document/stage identifiers.
//!
//! All offsets are character offsets (Unicode scalar values) from the start of the document, and
//! all ranges are half-open (`start..end`).

use serde::{Deserialize, Serialize};

/// A half-open character-offset range (`start..end`) in the document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TextRange {
    /// Range start offset (inclusive).
    pub start: usize,
    /// Range end offset (exclusive).
    pub end: usize,
}

impl std::fmt::Display for TextRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl TextRange {
    /// Create a new range. `end` is raised to `start` if it is smaller.
    pub const fn new(start: usize, end: usize) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    /// Create a zero-width range at an offset.
    pub const fn empty(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Range covering a whole document of `len` characters.
    pub const fn whole(len: usize) -> Self {
        Self { start: 0, end: len }
    }

    /// Length of the range in characters.
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` for zero-width ranges.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if the range contains an offset.
    pub const fn contains_offset(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Check if `other` lies fully inside this range (bounds inclusive).
    pub const fn contains_range(&self, other: &TextRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Closed-interval intersection test: touching ranges intersect.
    ///
    /// This is the test used for dirty regions and tree partitioning, so that zero-width nodes and
    /// diagnostics sitting exactly on a boundary are never lost.
    pub const fn intersects(&self, other: &TextRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Strict overlap test: the ranges share at least one character.
    pub const fn overlaps(&self, other: &TextRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Smallest range covering both ranges.
    pub fn union(&self, other: &TextRange) -> TextRange {
        TextRange::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Common part of both ranges, if they intersect.
    pub fn intersection(&self, other: &TextRange) -> Option<TextRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(TextRange { start, end })
    }

    /// Clamp both ends to `len`.
    pub fn clamp_to(&self, len: usize) -> TextRange {
        TextRange::new(self.start.min(len), self.end.min(len))
    }
}

impl From<std::ops::Range<usize>> for TextRange {
    fn from(range: std::ops::Range<usize>) -> Self {
        TextRange::new(range.start, range.end)
    }
}

/// Identifies one open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Identifies one analysis stage (a pass with its own dirty tracking).
///
/// The stage id doubles as the ownership `group` of the diagnostics a pass produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub u32);

impl StageId {
    /// Structural/syntax stage: parser errors and annotator-style rules.
    pub const SYNTAX: Self = Self(1);
    /// Local inspections stage.
    pub const INSPECTIONS: Self = Self(2);
    /// Results from external tools.
    pub const EXTERNAL: Self = Self(3);

    /// Create a stage id from a raw numeric identifier.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Whether entries of this stage are "essential", i.e. disposed even by reduced passes.
    pub const fn is_essential(&self) -> bool {
        self.0 == Self::SYNTAX.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::SYNTAX => write!(f, "syntax"),
            Self::INSPECTIONS => write!(f, "inspections"),
            Self::EXTERNAL => write!(f, "external"),
            Self(id) => write!(f, "stage#{id}"),
        }
    }
}

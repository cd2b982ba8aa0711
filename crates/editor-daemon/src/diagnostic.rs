//! The finalized diagnostic value and its fixes.
//!
//! A [`DiagnosticRecord`] is produced by a [`DiagnosticBuilder`](crate::builder::DiagnosticBuilder)
//! and never changes afterwards, apart from two set-once bindings installed by the reconciler:
//! the overlay entry that displays it and the tracking markers of its fixes.

use crate::error::OverlayError;
use crate::overlay::{EntryHandle, MarkerHandle};
use crate::range::{StageId, TextRange};
use crate::severity::{AttributesKey, DiagnosticKind, GutterMarker, Layer, Severity, TextAttributes};
use crate::tree::SyntaxTree;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// A text replacement proposed by a fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Range to replace.
    pub range: TextRange,
    /// Replacement text (empty means deletion).
    pub new_text: String,
}

impl TextEdit {
    /// Replace `range` with `new_text`.
    pub fn new(range: TextRange, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }

    /// Delete `range`.
    pub fn delete(range: TextRange) -> Self {
        Self::new(range, "")
    }

    /// Insert `text` at `offset`.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(TextRange::empty(offset), text)
    }
}

/// An action offered to the user for a diagnostic ("quick fix").
pub trait FixAction: Send + Sync + std::fmt::Debug {
    /// Label shown in the fix menu.
    fn label(&self) -> &str;

    /// Edits applied when the user picks this fix.
    fn edits(&self) -> Vec<TextEdit>;
}

/// A fix made of a fixed list of text edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEditFix {
    /// Label shown in the fix menu.
    pub label: String,
    /// Edits applied in order.
    pub edits: Vec<TextEdit>,
}

impl TextEditFix {
    /// Create a fix.
    pub fn new(label: impl Into<String>, edits: Vec<TextEdit>) -> Self {
        Self {
            label: label.into(),
            edits,
        }
    }
}

impl FixAction for TextEditFix {
    fn label(&self) -> &str {
        &self.label
    }

    fn edits(&self) -> Vec<TextEdit> {
        self.edits.clone()
    }
}

/// A fix registered on a diagnostic.
#[derive(Debug, Clone)]
pub struct FixDescriptor {
    /// The action.
    pub action: Arc<dyn FixAction>,
    /// Explicit range the fix applies to; the diagnostic range when `None`.
    pub range: Option<TextRange>,
    /// Optional identity key, used by hosts to group fixes across diagnostics.
    pub key: Option<String>,
    /// Severity of the owning diagnostic.
    pub severity: Option<Severity>,
    /// Problem group of the owning diagnostic.
    pub problem_group: Option<String>,
    tracked: OnceLock<MarkerHandle>,
}

impl FixDescriptor {
    /// Create a descriptor for `action`.
    pub fn new(action: Arc<dyn FixAction>) -> Self {
        Self {
            action,
            range: None,
            key: None,
            severity: None,
            problem_group: None,
            tracked: OnceLock::new(),
        }
    }

    /// Restrict the fix to an explicit range.
    pub fn with_range(mut self, range: TextRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Attach an identity key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Tracking marker of the explicit range, once the owning diagnostic is displayed.
    pub fn tracking_marker(&self) -> Option<MarkerHandle> {
        self.tracked.get().copied()
    }

    pub(crate) fn track(&self, marker: MarkerHandle) -> bool {
        self.tracked.set(marker).is_ok()
    }
}

/// Computes fixes on demand from the tree they were registered against.
pub type FixComputer = Box<dyn Fn(&dyn SyntaxTree) -> Vec<FixDescriptor> + Send + Sync>;

/// Deferred fix computation, valid for one tree modification stamp.
pub struct LazyFixes {
    stamp: u64,
    compute: FixComputer,
    computed: OnceLock<Vec<FixDescriptor>>,
}

impl LazyFixes {
    /// Defer `compute` until fixes are first requested for a tree with `stamp`.
    pub fn new(
        stamp: u64,
        compute: impl Fn(&dyn SyntaxTree) -> Vec<FixDescriptor> + Send + Sync + 'static,
    ) -> Self {
        Self {
            stamp,
            compute: Box::new(compute),
            computed: OnceLock::new(),
        }
    }

    /// Modification stamp the computation belongs to.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Fixes for `tree`, computed on the first call.
    ///
    /// Returns `None` once the tree has moved past the registered stamp.
    pub fn resolve(&self, tree: &dyn SyntaxTree) -> Option<&[FixDescriptor]> {
        if tree.modification_stamp() != self.stamp {
            return None;
        }
        Some(self.computed.get_or_init(|| (self.compute)(tree)))
    }

    /// Whether the computation already ran.
    pub fn is_computed(&self) -> bool {
        self.computed.get().is_some()
    }
}

impl std::fmt::Debug for LazyFixes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyFixes")
            .field("stamp", &self.stamp)
            .field("computed", &self.is_computed())
            .finish()
    }
}

/// A finalized diagnostic.
///
/// Equality and hashing cover what is visible to the user: range, severity, kind, attributes,
/// gutter marker and description. Two records that compare equal are interchangeable in the
/// overlay.
#[derive(Debug)]
pub struct DiagnosticRecord {
    /// Range in the document.
    pub range: TextRange,
    /// Severity.
    pub severity: Severity,
    /// Kind.
    pub kind: DiagnosticKind,
    /// Short description (problems view).
    pub description: Option<String>,
    /// Tooltip text.
    pub tooltip: Option<String>,
    /// Render after the end of the line instead of over the range.
    pub after_end_of_line: bool,
    /// Show as a file-level banner instead of an inline marker.
    pub file_level: bool,
    /// The diagnostic must be removed as soon as its range is edited.
    pub needs_update_on_typing: bool,
    /// Attributes key used for rendering.
    pub attributes_key: AttributesKey,
    /// Attributes overriding the key's look.
    pub forced_attributes: Option<TextAttributes>,
    /// Gutter icon.
    pub gutter: Option<GutterMarker>,
    /// Problem group shared by related diagnostics.
    pub problem_group: Option<String>,
    /// Stage that produced the record; ownership for removal.
    pub group: StageId,
    /// Rule that produced the record.
    pub tool_id: Option<Arc<str>>,
    /// Registered fixes.
    pub fixes: Vec<FixDescriptor>,
    /// Deferred fixes.
    pub lazy_fixes: Option<LazyFixes>,
    pub(crate) entry: OnceLock<EntryHandle>,
}

impl DiagnosticRecord {
    /// Overlay layer for this record.
    pub fn layer(&self) -> Layer {
        Layer::for_severity(self.severity)
    }

    /// Symbol-type coloring (no problem attached).
    pub fn is_symbol_type(&self) -> bool {
        self.kind == DiagnosticKind::SymbolType || self.severity == Severity::TextAttributes
    }

    /// Overlay entry displaying this record.
    pub fn entry(&self) -> Option<EntryHandle> {
        self.entry.get().copied()
    }

    /// Bind the record to the overlay entry that displays it. A record is bound at most once.
    pub fn bind_entry(&self, handle: EntryHandle) -> Result<(), OverlayError> {
        match self.entry.set(handle) {
            Ok(()) => Ok(()),
            Err(_) => Err(OverlayError::AlreadyBound(
                self.entry.get().map_or(handle.0, |bound| bound.0),
            )),
        }
    }

    /// Registered fixes followed by the deferred ones, if they are still valid for `tree`.
    pub fn all_fixes<'a>(&'a self, tree: &dyn SyntaxTree) -> Vec<&'a FixDescriptor> {
        let mut fixes: Vec<&FixDescriptor> = self.fixes.iter().collect();
        if let Some(lazy) = &self.lazy_fixes
            && let Some(computed) = lazy.resolve(tree)
        {
            fixes.extend(computed.iter());
        }
        fixes
    }

    /// Order used by the reconciliation sweep, for a record placed at `range`.
    ///
    /// Start ascending, end ascending, severity descending, then kind, gutter, attributes and
    /// description, so errors are always seen before the warnings they might cover.
    pub fn sweep_order(range: TextRange, a: &Self, other_range: TextRange, b: &Self) -> Ordering {
        range
            .start
            .cmp(&other_range.start)
            .then(range.end.cmp(&other_range.end))
            .then(b.severity.cmp(&a.severity))
            .then(a.kind.cmp(&b.kind))
            .then(a.gutter.cmp(&b.gutter))
            .then(a.attributes_key.cmp(&b.attributes_key))
            .then(a.forced_attributes.cmp(&b.forced_attributes))
            .then(a.description.cmp(&b.description))
    }
}

impl PartialEq for DiagnosticRecord {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range
            && self.severity == other.severity
            && self.kind == other.kind
            && self.attributes_key == other.attributes_key
            && self.forced_attributes == other.forced_attributes
            && self.gutter == other.gutter
            && self.description == other.description
    }
}

impl Eq for DiagnosticRecord {}

impl Hash for DiagnosticRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.range.hash(state);
        self.severity.hash(state);
        self.kind.hash(state);
        self.attributes_key.hash(state);
        self.forced_attributes.hash(state);
        self.gutter.hash(state);
        self.description.hash(state);
    }
}

impl std::fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.severity, self.range)?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}

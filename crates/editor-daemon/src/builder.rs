//! Constructing diagnostics.
//!
//! Rules never build a [`DiagnosticRecord`] directly. They ask a [`DiagnosticFactory`] for a
//! [`DiagnosticBuilder`], set each field at most once and finalize the builder exactly once:
//!
//! ```rust
//! use editor_daemon::builder::{BuilderLedger, DiagnosticFactory};
//! use editor_daemon::range::{StageId, TextRange};
//! use editor_daemon::severity::{DiagnosticKind, Severity};
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(BuilderLedger::new());
//! let factory = DiagnosticFactory::new(StageId::INSPECTIONS, ledger.clone());
//!
//! let mut builder = factory.builder(DiagnosticKind::Warning);
//! builder.range(TextRange::new(4, 9)).description("unused variable");
//! let record = builder.create().unwrap().unwrap();
//! assert_eq!(record.severity, Severity::Warning);
//! assert!(ledger.check_leaks().is_empty());
//! ```
//!
//! Setting a field twice is a bug in the calling rule and panics. Finalizing twice returns
//! [`BuilderError::AlreadyFinalized`]. Builders dropped without being finalized stay registered in
//! the [`BuilderLedger`] and are reported by [`BuilderLedger::check_leaks`].

use crate::diagnostic::{DiagnosticRecord, FixAction, FixDescriptor, LazyFixes};
use crate::error::BuilderError;
use crate::range::{StageId, TextRange};
use crate::severity::{AttributesKey, DiagnosticKind, GutterMarker, Severity, TextAttributes};
use crate::tree::{NodeId, SyntaxTree};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Post-filter deciding whether a finalized diagnostic is kept.
pub trait DiagnosticFilter: Send + Sync {
    /// Return `false` to reject the record.
    fn accept(&self, record: &DiagnosticRecord) -> bool;
}

/// Rejects diagnostics below a severity floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinSeverityFilter(pub Severity);

impl DiagnosticFilter for MinSeverityFilter {
    fn accept(&self, record: &DiagnosticRecord) -> bool {
        record.severity >= self.0
    }
}

impl<F> DiagnosticFilter for F
where
    F: Fn(&DiagnosticRecord) -> bool + Send + Sync,
{
    fn accept(&self, record: &DiagnosticRecord) -> bool {
        self(record)
    }
}

/// A builder that was created but never finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderLeak {
    /// Ledger-assigned id.
    pub id: u64,
    /// Where the builder was created.
    pub location: &'static Location<'static>,
}

impl std::fmt::Display for BuilderLeak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "diagnostic builder #{} created at {}:{} was never finalized",
            self.id,
            self.location.file(),
            self.location.line()
        )
    }
}

/// Outstanding builders of one pass.
#[derive(Debug, Default)]
pub struct BuilderLedger {
    next_id: AtomicU64,
    outstanding: Mutex<BTreeMap<u64, &'static Location<'static>>>,
}

impl BuilderLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, location: &'static Location<'static>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outstanding.lock().insert(id, location);
        id
    }

    fn finalize(&self, id: u64) {
        self.outstanding.lock().remove(&id);
    }

    /// Number of builders not finalized yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Report every builder that was never finalized, logging each one.
    ///
    /// Call this once rules are done; the leaks stay registered so repeated checks agree.
    pub fn check_leaks(&self) -> Vec<BuilderLeak> {
        let leaks: Vec<BuilderLeak> = self
            .outstanding
            .lock()
            .iter()
            .map(|(id, location)| BuilderLeak {
                id: *id,
                location,
            })
            .collect();
        for leak in &leaks {
            tracing::warn!(builder = leak.id, location = %leak.location, "{leak}");
        }
        leaks
    }
}

/// Creates builders that share a stage, a producing rule, a ledger and a set of post-filters.
#[derive(Clone)]
pub struct DiagnosticFactory {
    group: StageId,
    tool_id: Option<Arc<str>>,
    ledger: Arc<BuilderLedger>,
    filters: Vec<Arc<dyn DiagnosticFilter>>,
}

impl DiagnosticFactory {
    /// Create a factory for diagnostics owned by `group`.
    pub fn new(group: StageId, ledger: Arc<BuilderLedger>) -> Self {
        Self {
            group,
            tool_id: None,
            ledger,
            filters: Vec::new(),
        }
    }

    /// Attribute created diagnostics to a rule.
    pub fn with_tool(mut self, tool_id: impl Into<Arc<str>>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    /// Add a post-filter applied by [`DiagnosticBuilder::create`].
    pub fn with_filter(mut self, filter: Arc<dyn DiagnosticFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Ledger the builders register with.
    pub fn ledger(&self) -> &Arc<BuilderLedger> {
        &self.ledger
    }

    /// Start a diagnostic of `kind`. The caller's location is recorded for leak reports.
    #[track_caller]
    pub fn builder(&self, kind: DiagnosticKind) -> DiagnosticBuilder {
        let id = self.ledger.register(Location::caller());
        DiagnosticBuilder::new(
            kind,
            self.group,
            self.tool_id.clone(),
            Some((self.ledger.clone(), id)),
            self.filters.clone(),
        )
    }
}

impl std::fmt::Debug for DiagnosticFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticFactory")
            .field("group", &self.group)
            .field("tool_id", &self.tool_id)
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[track_caller]
fn set_once<T>(slot: &mut Option<T>, value: T, field: &str) {
    assert!(slot.is_none(), "diagnostic builder field `{field}` set twice");
    *slot = Some(value);
}

/// Mutable scratch object producing one [`DiagnosticRecord`].
pub struct DiagnosticBuilder {
    kind: DiagnosticKind,
    group: StageId,
    tool_id: Option<Arc<str>>,
    ledger: Option<(Arc<BuilderLedger>, u64)>,
    filters: Vec<Arc<dyn DiagnosticFilter>>,
    range: Option<TextRange>,
    node: Option<NodeId>,
    severity: Option<Severity>,
    description: Option<String>,
    tooltip: Option<String>,
    after_end_of_line: Option<bool>,
    file_level: Option<bool>,
    needs_update_on_typing: Option<bool>,
    attributes_key: Option<AttributesKey>,
    forced_attributes: Option<TextAttributes>,
    gutter: Option<GutterMarker>,
    problem_group: Option<String>,
    fixes: Vec<FixDescriptor>,
    lazy_fixes: Option<LazyFixes>,
    finalized: bool,
}

impl DiagnosticBuilder {
    fn new(
        kind: DiagnosticKind,
        group: StageId,
        tool_id: Option<Arc<str>>,
        ledger: Option<(Arc<BuilderLedger>, u64)>,
        filters: Vec<Arc<dyn DiagnosticFilter>>,
    ) -> Self {
        Self {
            kind,
            group,
            tool_id,
            ledger,
            filters,
            range: None,
            node: None,
            severity: None,
            description: None,
            tooltip: None,
            after_end_of_line: None,
            file_level: None,
            needs_update_on_typing: None,
            attributes_key: None,
            forced_attributes: None,
            gutter: None,
            problem_group: None,
            fixes: Vec::new(),
            lazy_fixes: None,
            finalized: false,
        }
    }

    /// A builder that is not tracked by any ledger and has no post-filters.
    pub fn detached(kind: DiagnosticKind, group: StageId) -> Self {
        Self::new(kind, group, None, None, Vec::new())
    }

    /// Set the range.
    #[track_caller]
    pub fn range(&mut self, range: impl Into<TextRange>) -> &mut Self {
        set_once(&mut self.range, range.into(), "range");
        self
    }

    /// Set the range from a syntax node and remember the node for attribute inference.
    #[track_caller]
    pub fn node(&mut self, tree: &dyn SyntaxTree, node: NodeId) -> &mut Self {
        set_once(&mut self.range, tree.range(node), "range");
        self.node = Some(node);
        self
    }

    /// Override the kind's default severity.
    #[track_caller]
    pub fn severity(&mut self, severity: Severity) -> &mut Self {
        set_once(&mut self.severity, severity, "severity");
        self
    }

    /// Set the description.
    #[track_caller]
    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        set_once(&mut self.description, description.into(), "description");
        self
    }

    /// Set the tooltip.
    #[track_caller]
    pub fn tooltip(&mut self, tooltip: impl Into<String>) -> &mut Self {
        set_once(&mut self.tooltip, tooltip.into(), "tooltip");
        self
    }

    /// Render the diagnostic after the end of the line.
    #[track_caller]
    pub fn after_end_of_line(&mut self) -> &mut Self {
        set_once(&mut self.after_end_of_line, true, "after_end_of_line");
        self
    }

    /// Show the diagnostic as a file-level banner.
    #[track_caller]
    pub fn file_level(&mut self) -> &mut Self {
        set_once(&mut self.file_level, true, "file_level");
        self
    }

    /// Remove the diagnostic as soon as its range is edited.
    #[track_caller]
    pub fn needs_update_on_typing(&mut self, value: bool) -> &mut Self {
        set_once(&mut self.needs_update_on_typing, value, "needs_update_on_typing");
        self
    }

    /// Set the attributes key explicitly.
    #[track_caller]
    pub fn attributes_key(&mut self, key: AttributesKey) -> &mut Self {
        set_once(&mut self.attributes_key, key, "attributes_key");
        self
    }

    /// Force explicit visual attributes.
    #[track_caller]
    pub fn forced_attributes(&mut self, attributes: TextAttributes) -> &mut Self {
        set_once(&mut self.forced_attributes, attributes, "forced_attributes");
        self
    }

    /// Attach a gutter icon.
    #[track_caller]
    pub fn gutter(&mut self, gutter: GutterMarker) -> &mut Self {
        set_once(&mut self.gutter, gutter, "gutter");
        self
    }

    /// Set the problem group.
    #[track_caller]
    pub fn problem_group(&mut self, group: impl Into<String>) -> &mut Self {
        set_once(&mut self.problem_group, group.into(), "problem_group");
        self
    }

    /// Register a fix.
    pub fn fix(&mut self, action: Arc<dyn FixAction>) -> &mut Self {
        self.fixes.push(FixDescriptor::new(action));
        self
    }

    /// Register a fix with an explicit range or key.
    pub fn fix_descriptor(&mut self, descriptor: FixDescriptor) -> &mut Self {
        self.fixes.push(descriptor);
        self
    }

    /// Register fixes computed on demand for the tree with modification stamp `stamp`.
    #[track_caller]
    pub fn lazy_fixes(
        &mut self,
        stamp: u64,
        compute: impl Fn(&dyn SyntaxTree) -> Vec<FixDescriptor> + Send + Sync + 'static,
    ) -> &mut Self {
        set_once(&mut self.lazy_fixes, LazyFixes::new(stamp, compute), "lazy_fixes");
        self
    }

    /// Whether `create` or `create_unconditionally` already ran.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Finalize and run post-filters. `Ok(None)` means a filter rejected the diagnostic.
    pub fn create(&mut self) -> Result<Option<Arc<DiagnosticRecord>>, BuilderError> {
        let record = self.finalize()?;
        if self.filters.iter().all(|filter| filter.accept(&record)) {
            Ok(Some(Arc::new(record)))
        } else {
            tracing::trace!(%record, "diagnostic rejected by post-filter");
            Ok(None)
        }
    }

    /// Finalize without running post-filters.
    pub fn create_unconditionally(&mut self) -> Result<Arc<DiagnosticRecord>, BuilderError> {
        self.finalize().map(Arc::new)
    }

    fn finalize(&mut self) -> Result<DiagnosticRecord, BuilderError> {
        if self.finalized {
            return Err(BuilderError::AlreadyFinalized);
        }
        self.finalized = true;
        if let Some((ledger, id)) = &self.ledger {
            ledger.finalize(*id);
        }
        let range = self.range.ok_or(BuilderError::MissingRange)?;

        let default_severity = self.kind.default_severity();
        let severity = self.severity.unwrap_or(default_severity);
        let attributes_key = match self.attributes_key {
            Some(key) => key,
            None if severity == default_severity => self.kind.default_attributes(),
            None if self.node.is_some() => severity.default_attributes(),
            None => {
                tracing::error!(
                    kind = ?self.kind,
                    %severity,
                    %range,
                    "custom severity without a syntax node; using the kind's default attributes"
                );
                self.kind.default_attributes()
            }
        };

        let mut fixes = std::mem::take(&mut self.fixes);
        for fix in &mut fixes {
            if fix.severity.is_none() {
                fix.severity = Some(severity);
            }
            if fix.problem_group.is_none() {
                fix.problem_group.clone_from(&self.problem_group);
            }
        }

        Ok(DiagnosticRecord {
            range,
            severity,
            kind: self.kind,
            description: self.description.take(),
            tooltip: self.tooltip.take(),
            after_end_of_line: self.after_end_of_line.unwrap_or(false),
            file_level: self.file_level.unwrap_or(false),
            needs_update_on_typing: self.needs_update_on_typing.unwrap_or(false),
            attributes_key,
            forced_attributes: self.forced_attributes,
            gutter: self.gutter.take(),
            problem_group: self.problem_group.take(),
            group: self.group,
            tool_id: self.tool_id.clone(),
            fixes,
            lazy_fixes: self.lazy_fixes.take(),
            entry: OnceLock::new(),
        })
    }
}

impl std::fmt::Debug for DiagnosticBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticBuilder")
            .field("kind", &self.kind)
            .field("group", &self.group)
            .field("range", &self.range)
            .field("severity", &self.severity)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

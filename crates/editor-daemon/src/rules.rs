//! Rules and their concurrent execution.
//!
//! A [`Rule`] is visited once per collected node. The [`RuleRunner`] runs every applicable rule
//! as one task on a bounded worker pool; each task works on its own clone of the rule, so a rule
//! object is never invoked concurrently with itself.

use crate::builder::{DiagnosticBuilder, DiagnosticFactory};
use crate::cancel::Cancelled;
use crate::diagnostic::DiagnosticRecord;
use crate::error::RuleError;
use crate::partition::TreePartition;
use crate::session::{IndexStatus, Session};
use crate::severity::DiagnosticKind;
use crate::tree::{LanguageId, NodeId, SyntaxTree};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// An analysis rule.
///
/// `visit` is called for every collected node whose language the rule accepts, children before
/// parents. Rules report findings through the [`RuleContext`].
pub trait Rule: Send + Sync {
    /// Stable identifier; becomes the `tool_id` of produced diagnostics.
    fn id(&self) -> &str;

    /// Whether nodes of `language` should be visited.
    fn is_applicable(&self, _language: &LanguageId) -> bool {
        true
    }

    /// Whether the rule can run while indexes are being rebuilt.
    fn is_dumb_aware(&self) -> bool {
        false
    }

    /// Inspect one node.
    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError>;

    /// An independent copy for one run.
    fn clone_rule(&self) -> Box<dyn Rule>;
}

/// What a rule sees while visiting a node.
pub struct RuleContext<'a> {
    session: &'a Session,
    factory: DiagnosticFactory,
    reported: Vec<Arc<DiagnosticRecord>>,
    node: Option<NodeId>,
    error_reported: bool,
}

impl<'a> RuleContext<'a> {
    /// Create a context reporting through `factory`.
    pub fn new(session: &'a Session, factory: DiagnosticFactory) -> Self {
        Self {
            session,
            factory,
            reported: Vec::new(),
            node: None,
            error_reported: false,
        }
    }

    fn begin(&mut self, node: NodeId) {
        self.node = Some(node);
        self.error_reported = false;
    }

    /// The pass session.
    pub fn session(&self) -> &'a Session {
        self.session
    }

    /// The tree being analyzed.
    pub fn tree(&self) -> &'a dyn SyntaxTree {
        self.session.tree().as_ref()
    }

    /// Node currently visited.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Index status of the pass.
    pub fn index_status(&self) -> IndexStatus {
        self.session.index_status()
    }

    /// Return `Err(Cancelled)` once the pass is cancelled.
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        self.session.token().check()
    }

    /// Start a diagnostic.
    #[track_caller]
    pub fn builder(&self, kind: DiagnosticKind) -> DiagnosticBuilder {
        self.factory.builder(kind)
    }

    /// Start a diagnostic covering `node`.
    #[track_caller]
    pub fn node_builder(&self, kind: DiagnosticKind, node: NodeId) -> DiagnosticBuilder {
        let mut builder = self.factory.builder(kind);
        builder.node(self.tree(), node);
        builder
    }

    /// Report a finalized diagnostic.
    pub fn report(&mut self, record: Arc<DiagnosticRecord>) {
        if record.severity.is_error() {
            self.error_reported = true;
        }
        self.reported.push(record);
    }

    /// Finalize `builder` and report the result unless a post-filter rejected it.
    pub fn emit(&mut self, mut builder: DiagnosticBuilder) -> Result<(), RuleError> {
        if let Some(record) = builder.create()? {
            self.report(record);
        }
        Ok(())
    }

    /// Diagnostics reported so far.
    pub fn reported(&self) -> &[Arc<DiagnosticRecord>] {
        &self.reported
    }

    fn into_reported(self) -> Vec<Arc<DiagnosticRecord>> {
        self.reported
    }
}

/// Result of running the rules of one pass.
#[derive(Debug, Default)]
pub struct RunOutput {
    /// Diagnostics of rules that finished, in rule order.
    pub diagnostics: Vec<Arc<DiagnosticRecord>>,
    /// Rules that hit a defect; their output was discarded.
    pub failed: HashSet<Arc<str>>,
    /// Rules abandoned because index data was not ready.
    pub abandoned: HashSet<Arc<str>>,
    /// Rules that had nothing to visit.
    pub skipped: usize,
    /// Rules that visited every node.
    pub finished: usize,
}

impl RunOutput {
    /// `false` when some rule was abandoned and the region must be analyzed again.
    pub fn is_complete(&self) -> bool {
        self.abandoned.is_empty()
    }

    /// Rules whose previous diagnostics must be kept.
    pub fn preserved_tools(&self) -> HashSet<Arc<str>> {
        self.failed.union(&self.abandoned).cloned().collect()
    }
}

#[derive(Debug)]
enum RuleOutcome {
    Finished(Vec<Arc<DiagnosticRecord>>),
    Skipped,
    Failed,
    Abandoned,
}

/// Runs rules on a bounded worker pool.
pub struct RuleRunner {
    pool: rayon::ThreadPool,
    progress_chunks: usize,
}

impl RuleRunner {
    /// Create a runner with `worker_threads` workers (`0` = number of CPUs).
    pub fn new(
        worker_threads: usize,
        progress_chunks: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|idx| format!("diagnostics-worker-{idx}"))
            .build()?;
        Ok(Self {
            pool,
            progress_chunks: progress_chunks.max(1),
        })
    }

    /// Number of worker threads.
    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Nodes visited between two progress updates of a rule applicable to `total` nodes.
    pub fn chunk_size(&self, total: usize) -> usize {
        chunk_size(total, self.progress_chunks)
    }

    /// Run `rules` over the nodes of `partition`, inside nodes first.
    ///
    /// Cancellation aborts the whole run. A failing or panicking rule is logged once and its
    /// output dropped; a rule reporting [`RuleError::IndexNotReady`] is abandoned and the run is
    /// marked incomplete. Other rules are unaffected by either.
    pub fn run(
        &self,
        rules: &[Box<dyn Rule>],
        partition: &TreePartition,
        session: &Session,
    ) -> Result<RunOutput, Cancelled> {
        let nodes: Vec<NodeId> = partition.nodes().collect();
        let progress_chunks = self.progress_chunks;
        tracing::debug!(
            document = %session.document(),
            stage = %session.stage(),
            rules = rules.len(),
            nodes = nodes.len(),
            inside = partition.inside.len(),
            "running rules"
        );

        let results: Vec<(Arc<str>, Result<RuleOutcome, Cancelled>)> = self.pool.install(|| {
            rules
                .par_iter()
                .map(|rule| {
                    let id: Arc<str> = Arc::from(rule.id());
                    let outcome =
                        run_rule(rule.as_ref(), id.clone(), &nodes, session, progress_chunks);
                    (id, outcome)
                })
                .collect()
        });

        let mut output = RunOutput::default();
        for (id, outcome) in results {
            match outcome? {
                RuleOutcome::Finished(records) => {
                    output.finished += 1;
                    output.diagnostics.extend(records);
                }
                RuleOutcome::Skipped => output.skipped += 1,
                RuleOutcome::Failed => {
                    output.failed.insert(id);
                }
                RuleOutcome::Abandoned => {
                    output.abandoned.insert(id);
                }
            }
        }
        Ok(output)
    }
}

impl std::fmt::Debug for RuleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRunner")
            .field("worker_threads", &self.worker_threads())
            .field("progress_chunks", &self.progress_chunks)
            .finish()
    }
}

fn chunk_size(total: usize, progress_chunks: usize) -> usize {
    (total / progress_chunks.max(1)).max(1)
}

fn run_rule(
    prototype: &dyn Rule,
    id: Arc<str>,
    nodes: &[NodeId],
    session: &Session,
    progress_chunks: usize,
) -> Result<RuleOutcome, Cancelled> {
    if session.index_status() == IndexStatus::Dumb && !prototype.is_dumb_aware() {
        tracing::trace!(rule = %id, "skipping rule that needs indexes");
        return Ok(RuleOutcome::Skipped);
    }

    let tree = session.tree().as_ref();
    let mut languages: HashMap<LanguageId, bool> = HashMap::new();
    let applicable: Vec<NodeId> = nodes
        .iter()
        .copied()
        .filter(|node| {
            let language = tree.language(*node);
            if let Some(accepted) = languages.get(language) {
                return *accepted;
            }
            let accepted = prototype.is_applicable(language);
            languages.insert(language.clone(), accepted);
            accepted
        })
        .collect();
    if applicable.is_empty() {
        return Ok(RuleOutcome::Skipped);
    }
    session.add_progress_total(applicable.len());
    let chunk = chunk_size(applicable.len(), progress_chunks);

    let mut rule = prototype.clone_rule();
    let mut ctx = RuleContext::new(session, session.factory().with_tool(id.clone()));
    let force_check_parents = session.force_check_parents();
    let mut skip: HashSet<NodeId> = HashSet::new();
    let mut since_progress = 0;

    for node in applicable {
        session.token().check()?;
        since_progress += 1;
        if since_progress == chunk {
            session.advance_progress(chunk);
            since_progress = 0;
        }

        if !force_check_parents && skip.contains(&node) {
            if let Some(parent) = tree.parent(node) {
                skip.insert(parent);
            }
            continue;
        }

        ctx.begin(node);
        match catch_unwind(AssertUnwindSafe(|| rule.visit(node, &mut ctx))) {
            Ok(Ok(())) => {}
            Ok(Err(RuleError::Cancelled(cancelled))) => return Err(cancelled),
            Ok(Err(RuleError::IndexNotReady(reason))) => {
                tracing::debug!(rule = %id, %reason, "index not ready; abandoning rule");
                return Ok(RuleOutcome::Abandoned);
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    rule = %id,
                    node = node.0,
                    error = %err,
                    "rule failed; discarding its output"
                );
                return Ok(RuleOutcome::Failed);
            }
            Err(payload) => {
                tracing::warn!(
                    rule = %id,
                    node = node.0,
                    panic = panic_message(payload.as_ref()),
                    "rule panicked; discarding its output"
                );
                return Ok(RuleOutcome::Failed);
            }
        }

        if !force_check_parents
            && ctx.error_reported
            && let Some(parent) = tree.parent(node)
        {
            skip.insert(parent);
        }
    }

    session.advance_progress(since_progress);
    Ok(RuleOutcome::Finished(ctx.into_reported()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

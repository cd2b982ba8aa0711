mod common;

use editor_daemon::{
    CancellationToken, DaemonConfig, DiagnosticKind, DiagnosticsDaemon, DirtyScopeTracker,
    DocumentId, NodeId, PassError, Rule, RuleContext, RuleError, StageId, TextDelta, TextRange,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

const DOC: DocumentId = DocumentId(1);

fn config() -> DaemonConfig {
    DaemonConfig {
        worker_threads: 2,
        restart_jitter_min_ms: 0,
        restart_jitter_max_ms: 1,
        ..DaemonConfig::default()
    }
}

/// 100 characters, one ident every 10 characters.
fn document() -> Arc<dyn editor_daemon::SyntaxTree> {
    let idents: Vec<(usize, usize)> = (0..10).map(|i| (i * 10 + 1, i * 10 + 7)).collect();
    common::flat_tree(&idents, 100)
}

#[test]
fn test_whole_document_pass_visits_priority_first_and_cleans() {
    common::init_tracing();
    let recording = common::RecordingRule::default();
    let daemon = DiagnosticsDaemon::builder(DaemonConfig {
        worker_threads: 1,
        ..config()
    })
    .stage(StageId::INSPECTIONS, vec![Box::new(recording.clone())])
    .build()
    .unwrap();
    daemon.open_document(DOC, document());
    assert_eq!(
        daemon.get_dirty_range(DOC, StageId::INSPECTIONS).unwrap(),
        Some(TextRange::new(0, 100))
    );

    let outcome = daemon
        .run_highlighting_pass(
            DOC,
            StageId::INSPECTIONS,
            TextRange::new(20, 40),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(outcome.processed_range, Some(TextRange::new(0, 100)));
    assert!(outcome.complete);
    assert!(daemon.is_fully_clean(DOC));

    let visited = recording.visited.lock().unwrap();
    assert_eq!(visited.len(), 11);
    let priority = TextRange::new(20, 40);
    assert_eq!(
        visited[..2].to_vec(),
        vec![TextRange::new(21, 27), TextRange::new(31, 37)]
    );
    assert!(visited[2..].iter().all(|range| !priority.contains_range(range)));
    assert_eq!(visited.last(), Some(&TextRange::new(0, 100)));
}

#[test]
fn test_second_run_without_edits_is_a_no_op() {
    let daemon = DiagnosticsDaemon::builder(config())
        .stage(StageId::INSPECTIONS, vec![Box::new(common::LongIdentRule { max: 3 })])
        .build()
        .unwrap();
    daemon.open_document(DOC, document());
    let token = CancellationToken::new();

    let first = daemon
        .run_highlighting_pass(DOC, StageId::INSPECTIONS, TextRange::new(0, 100), &token)
        .unwrap();
    assert_eq!(first.diagnostics.len(), 10);
    let handles: Vec<_> = first.diagnostics.iter().map(|d| d.entry()).collect();

    let second = daemon
        .run_highlighting_pass(DOC, StageId::INSPECTIONS, TextRange::new(0, 100), &token)
        .unwrap();
    assert_eq!(second.processed_range, None);
    assert_eq!(second.diagnostics, first.diagnostics);

    // Forcing a full re-run keeps every entry in place.
    daemon
        .mark_whole_document_dirty(DOC, "settings changed")
        .unwrap();
    let third = daemon
        .run_highlighting_pass(DOC, StageId::INSPECTIONS, TextRange::new(0, 100), &token)
        .unwrap();
    assert_eq!(third.stats.reused, 10);
    assert_eq!(third.stats.created, 0);
    let rehandled: Vec<_> = third.diagnostics.iter().map(|d| d.entry()).collect();
    assert_eq!(rehandled, handles);
    assert_eq!(third.diagnostics, first.diagnostics);
}

#[test]
fn test_edit_reanalyzes_only_the_changed_region() {
    let recording = common::RecordingRule::default();
    let daemon = DiagnosticsDaemon::builder(config())
        .stage(StageId::INSPECTIONS, vec![Box::new(recording.clone())])
        .build()
        .unwrap();
    daemon.open_document(DOC, document());
    let token = CancellationToken::new();
    daemon
        .run_highlighting_pass(DOC, StageId::INSPECTIONS, TextRange::new(0, 100), &token)
        .unwrap();
    recording.visited.lock().unwrap().clear();

    daemon
        .document_changed(DOC, &TextDelta::insert(100, 53, "x"))
        .unwrap();
    let idents: Vec<(usize, usize)> = (0..10)
        .map(|i| if i < 5 { (i * 10 + 1, i * 10 + 7) } else { (i * 10 + 2, i * 10 + 8) })
        .collect();
    daemon
        .update_tree(DOC, common::flat_tree(&idents, 101))
        .unwrap();

    let outcome = daemon
        .run_highlighting_pass(DOC, StageId::INSPECTIONS, TextRange::new(0, 101), &token)
        .unwrap();
    assert_eq!(outcome.processed_range, Some(TextRange::new(53, 54)));
    assert_eq!(
        *recording.visited.lock().unwrap(),
        vec![TextRange::new(52, 58), TextRange::new(0, 101)]
    );
}

/// Cancels the pass while visiting the root, i.e. after every other node.
#[derive(Clone)]
struct CancelAtRoot {
    armed: Arc<AtomicBool>,
}

impl Rule for CancelAtRoot {
    fn id(&self) -> &str {
        "cancel-at-root"
    }

    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let tree = ctx.tree();
        if tree.kind(node) == "ident" {
            let builder = ctx.node_builder(DiagnosticKind::Warning, node);
            ctx.emit(builder)?;
        }
        if node == tree.root() && self.armed.load(Ordering::SeqCst) {
            ctx.session().token().cancel();
        }
        Ok(())
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(self.clone())
    }
}

#[test]
fn test_cancelled_pass_releases_claims_and_stays_dirty() {
    common::init_tracing();
    let armed = Arc::new(AtomicBool::new(false));
    let daemon = DiagnosticsDaemon::builder(config())
        .stage(StageId::INSPECTIONS, vec![Box::new(CancelAtRoot { armed: armed.clone() })])
        .build()
        .unwrap();
    daemon.open_document(DOC, document());
    daemon
        .run_highlighting_pass(
            DOC,
            StageId::INSPECTIONS,
            TextRange::new(0, 100),
            &CancellationToken::new(),
        )
        .unwrap();

    armed.store(true, Ordering::SeqCst);
    daemon.mark_whole_document_dirty(DOC, "rerun").unwrap();
    let before = daemon.diagnostics(DOC).unwrap();
    let result = daemon.run_highlighting_pass(
        DOC,
        StageId::INSPECTIONS,
        TextRange::new(0, 100),
        &CancellationToken::new(),
    );
    assert!(matches!(result, Err(PassError::Cancelled(_))));

    let claimed = daemon
        .with_overlay(DOC, |store| store.entries().filter(|e| e.claimed_by().is_some()).count())
        .unwrap();
    assert_eq!(claimed, 0);
    assert_eq!(daemon.diagnostics(DOC).unwrap(), before);
    assert!(!daemon.is_fully_clean(DOC));

    armed.store(false, Ordering::SeqCst);
    let outcome = daemon
        .run_highlighting_pass(
            DOC,
            StageId::INSPECTIONS,
            TextRange::new(0, 100),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(outcome.diagnostics, before);
    assert!(daemon.is_fully_clean(DOC));
}

/// Marks the document dirty from inside the pass the first `times` times it runs.
#[derive(Clone)]
struct Meddler {
    tracker: Arc<OnceLock<Arc<DirtyScopeTracker>>>,
    remaining: Arc<AtomicUsize>,
}

impl Rule for Meddler {
    fn id(&self) -> &str {
        "meddler"
    }

    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        if node != ctx.tree().root() {
            return Ok(());
        }
        let meddle = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if meddle && let Some(tracker) = self.tracker.get() {
            tracker
                .mark_range_dirty(ctx.session().document(), TextRange::new(0, 1), 100, "meddling")
                .map_err(|err| RuleError::Failed(err.to_string()))?;
        }
        let mut builder = ctx.node_builder(DiagnosticKind::Information, node);
        builder.description("checked");
        ctx.emit(builder)
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(self.clone())
    }
}

fn meddling_daemon(times: usize, max_restarts: u32) -> DiagnosticsDaemon {
    let tracker = Arc::new(OnceLock::new());
    let daemon = DiagnosticsDaemon::builder(DaemonConfig {
        max_restarts,
        ..config()
    })
    .stage(
        StageId::INSPECTIONS,
        vec![Box::new(Meddler {
            tracker: tracker.clone(),
            remaining: Arc::new(AtomicUsize::new(times)),
        })],
    )
    .build()
    .unwrap();
    let _ = tracker.set(daemon.tracker().clone());
    daemon
}

#[test]
fn test_concurrent_modification_restarts_the_pass() {
    common::init_tracing();
    let daemon = meddling_daemon(1, 8);
    daemon.open_document(DOC, document());
    let outcome = daemon
        .run_highlighting_pass(
            DOC,
            StageId::INSPECTIONS,
            TextRange::new(0, 100),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(outcome.restarts, 1);
    assert_eq!(outcome.diagnostics.len(), 1);
    assert!(daemon.is_fully_clean(DOC));
}

#[test]
fn test_restart_limit() {
    let daemon = meddling_daemon(usize::MAX, 2);
    daemon.open_document(DOC, document());
    let result = daemon.run_highlighting_pass(
        DOC,
        StageId::INSPECTIONS,
        TextRange::new(0, 100),
        &CancellationToken::new(),
    );
    assert!(matches!(
        result,
        Err(PassError::RestartLimit { restarts: 3, .. })
    ));
    assert!(daemon.diagnostics(DOC).unwrap().is_empty());
}

#[derive(Clone)]
struct Panicky;

impl Rule for Panicky {
    fn id(&self) -> &str {
        "panicky"
    }

    fn visit(&mut self, _node: NodeId, _ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        panic!("rule bug");
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(Panicky)
    }
}

#[test]
fn test_panicking_rule_does_not_affect_others() {
    common::init_tracing();
    let daemon = DiagnosticsDaemon::builder(config())
        .stage(
            StageId::INSPECTIONS,
            vec![Box::new(Panicky), Box::new(common::LongIdentRule { max: 3 })],
        )
        .build()
        .unwrap();
    daemon.open_document(DOC, document());
    let outcome = daemon
        .run_highlighting_pass(
            DOC,
            StageId::INSPECTIONS,
            TextRange::new(0, 100),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(outcome.diagnostics.len(), 10);
    assert_eq!(outcome.failed_rules, vec![Arc::<str>::from("panicky")]);
    assert!(outcome.complete);
}

#[test]
fn test_stages_run_in_order_and_errors_flag_follows_whole_document_passes() {
    let daemon = DiagnosticsDaemon::builder(config())
        .stage(StageId::INSPECTIONS, vec![Box::new(common::LongIdentRule { max: 3 })])
        .stage(StageId::SYNTAX, vec![Box::new(CancelAtRoot { armed: Arc::default() })])
        .build()
        .unwrap();
    daemon.open_document(DOC, document());
    let outcomes = daemon
        .run_all_stages(DOC, TextRange::new(0, 100), &CancellationToken::new())
        .unwrap();
    let stages: Vec<StageId> = outcomes.iter().map(|o| o.stage).collect();
    assert_eq!(stages, vec![StageId::SYNTAX, StageId::INSPECTIONS]);
    assert!(daemon.is_fully_clean(DOC));
    assert!(!daemon.tracker().errors_found(DOC));
}

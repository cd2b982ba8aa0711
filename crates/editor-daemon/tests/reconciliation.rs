mod common;

use editor_daemon::{
    CancellationToken, CoveragePolicy, CoverThreshold, DiagnosticBuilder, DiagnosticKind,
    DiagnosticRecord, DocumentId, GutterMarker, ManagedOverlayRecycler, OverlayChange,
    OverlayReconciler, OverlayRecycler, OverlayStore, Recycler, Session, Severity, StageId,
    TextRange,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;

const LEN: usize = 40;

fn session() -> Session {
    Session::new(
        DocumentId(1),
        StageId::INSPECTIONS,
        common::flat_tree(&[], LEN),
        TextRange::whole(LEN),
        CancellationToken::new(),
    )
}

fn record(
    kind: DiagnosticKind,
    range: TextRange,
    tool: &str,
    configure: impl FnOnce(&mut DiagnosticBuilder),
) -> Arc<DiagnosticRecord> {
    let mut builder = DiagnosticBuilder::detached(kind, StageId::INSPECTIONS);
    builder.range(range);
    configure(&mut builder);
    let mut record = builder.create_unconditionally().unwrap();
    Arc::get_mut(&mut record).unwrap().tool_id = Some(Arc::from(tool));
    record
}

fn apply(
    session: &Session,
    store: &Mutex<OverlayStore>,
    recycler: &mut dyn Recycler,
    policy: CoveragePolicy,
    diagnostics: &[Arc<DiagnosticRecord>],
    preserve: &HashSet<Arc<str>>,
) -> editor_daemon::ReconcileStats {
    let stats = OverlayReconciler::new(session, policy)
        .reconcile(store, recycler, diagnostics, preserve)
        .unwrap();
    let mut store = store.lock();
    store.batch(|store| {
        session.flush(store).unwrap();
        recycler.incinerate(store, session.essential_only());
    });
    stats
}

fn reconcile(store: &Mutex<OverlayStore>, diagnostics: &[Arc<DiagnosticRecord>]) {
    let session = session();
    let mut recycler = OverlayRecycler::new(session.token().clone());
    apply(
        &session,
        store,
        &mut recycler,
        CoveragePolicy::default(),
        diagnostics,
        &HashSet::new(),
    );
}

fn shown(store: &Mutex<OverlayStore>) -> Vec<(TextRange, Severity)> {
    store
        .lock()
        .entries()
        .map(|entry| (entry.range, entry.severity))
        .collect()
}

#[test]
fn test_warning_under_error_is_suppressed() {
    common::init_tracing();
    let store = Mutex::new(OverlayStore::new());
    reconcile(
        &store,
        &[
            record(DiagnosticKind::Warning, TextRange::new(2, 5), "lint", |_| {}),
            record(DiagnosticKind::Error, TextRange::new(0, 10), "check", |_| {}),
        ],
    );
    assert_eq!(shown(&store), vec![(TextRange::new(0, 10), Severity::Error)]);
}

#[test]
fn test_warning_with_gutter_marker_is_not_suppressed() {
    let store = Mutex::new(OverlayStore::new());
    reconcile(
        &store,
        &[
            record(DiagnosticKind::Error, TextRange::new(0, 10), "check", |_| {}),
            record(DiagnosticKind::Warning, TextRange::new(2, 5), "lint", |b| {
                b.gutter(GutterMarker::new("bulb").with_tooltip("quick fix"));
            }),
        ],
    );
    assert_eq!(
        shown(&store),
        vec![
            (TextRange::new(0, 10), Severity::Error),
            (TextRange::new(2, 5), Severity::Warning),
        ]
    );
}

#[test]
fn test_coverage_policy_variants() {
    let diagnostics = [
        record(DiagnosticKind::Warning, TextRange::new(0, 10), "a", |_| {}),
        record(DiagnosticKind::WeakWarning, TextRange::new(2, 5), "b", |_| {}),
        record(DiagnosticKind::SymbolType, TextRange::new(3, 4), "c", |_| {}),
    ];

    // Default: the weak warning is covered by the warning; symbol coloring is exempt.
    let store = Mutex::new(OverlayStore::new());
    reconcile(&store, &diagnostics);
    assert_eq!(store.lock().len(), 2);

    // Only errors cover.
    let store = Mutex::new(OverlayStore::new());
    let session = session();
    let mut recycler = OverlayRecycler::new(session.token().clone());
    let policy = CoveragePolicy {
        threshold: CoverThreshold::ErrorOnly,
        ..CoveragePolicy::default()
    };
    let stats = apply(&session, &store, &mut recycler, policy, &diagnostics, &HashSet::new());
    assert_eq!(stats.suppressed, 0);
    assert_eq!(store.lock().len(), 3);

    // Disabled.
    let store = Mutex::new(OverlayStore::new());
    let session = self::session();
    let mut recycler = OverlayRecycler::new(session.token().clone());
    let policy = CoveragePolicy {
        enabled: false,
        ..CoveragePolicy::default()
    };
    apply(&session, &store, &mut recycler, policy, &diagnostics, &HashSet::new());
    assert_eq!(store.lock().len(), 3);
}

#[test]
fn test_unchanged_entry_is_reused_not_incinerated() {
    common::init_tracing();
    let store = Mutex::new(OverlayStore::new());
    reconcile(
        &store,
        &[
            record(DiagnosticKind::Warning, TextRange::new(5, 8), "lint", |_| {}),
            record(DiagnosticKind::Warning, TextRange::new(12, 15), "lint", |_| {}),
        ],
    );
    let handles: Vec<_> = store.lock().entries().map(|entry| entry.handle).collect();

    let changes: Arc<Mutex<Vec<OverlayChange>>> = Arc::default();
    let sink = changes.clone();
    store
        .lock()
        .subscribe(move |change| sink.lock().push(change.clone()));

    // Second pass: [5,8) is still reported, [12,15) is gone, [20,22) is new.
    reconcile(
        &store,
        &[
            record(DiagnosticKind::Warning, TextRange::new(5, 8), "lint", |_| {}),
            record(DiagnosticKind::Warning, TextRange::new(20, 22), "lint", |_| {}),
        ],
    );

    let changes = changes.lock();
    assert_eq!(changes.len(), 1, "one batched notification");
    let change = &changes[0];
    assert_eq!(change.updated, vec![handles[0]]);
    assert_eq!(change.removed, vec![handles[1]]);
    assert_eq!(change.added.len(), 1);
    assert!(store.lock().get(handles[0]).is_some());
    assert_eq!(store.lock().get(handles[0]).unwrap().claimed_by(), None);
}

#[test]
fn test_managed_recycler_does_not_reuse_across_rules() {
    let store = Mutex::new(OverlayStore::new());
    reconcile(
        &store,
        &[record(DiagnosticKind::Warning, TextRange::new(5, 8), "first", |_| {})],
    );
    let old = store.lock().entries().next().unwrap().handle;

    let session = session();
    let mut recycler = ManagedOverlayRecycler::new(session.token().clone());
    let stats = apply(
        &session,
        &store,
        &mut recycler,
        CoveragePolicy::default(),
        &[record(DiagnosticKind::Warning, TextRange::new(5, 8), "second", |_| {})],
        &HashSet::new(),
    );
    assert_eq!(stats.reused, 0);
    assert_eq!(stats.created, 1);
    assert!(store.lock().get(old).is_none());
}

#[test]
fn test_entries_of_failed_rules_are_preserved() {
    let store = Mutex::new(OverlayStore::new());
    reconcile(
        &store,
        &[
            record(DiagnosticKind::Warning, TextRange::new(1, 3), "flaky", |_| {}),
            record(DiagnosticKind::Warning, TextRange::new(6, 9), "stable", |_| {}),
        ],
    );

    let session = session();
    let mut recycler = OverlayRecycler::new(session.token().clone());
    let preserve: HashSet<Arc<str>> = [Arc::from("flaky")].into_iter().collect();
    apply(
        &session,
        &store,
        &mut recycler,
        CoveragePolicy::default(),
        &[],
        &preserve,
    );
    let tools: Vec<String> = store
        .lock()
        .entries()
        .filter_map(|entry| entry.tool_id.as_deref().map(str::to_string))
        .collect();
    assert_eq!(tools, vec!["flaky".to_string()]);
}

#[test]
fn test_equal_records_are_deduplicated() {
    let store = Mutex::new(OverlayStore::new());
    let make = || {
        record(DiagnosticKind::Error, TextRange::new(4, 6), "check", |b| {
            b.description("unresolved reference");
        })
    };
    let a = make();
    let b = make();
    assert_eq!(a, b);
    reconcile(&store, &[a, b]);
    assert_eq!(store.lock().len(), 1);
}

#[test]
fn test_reconciling_the_same_results_twice_is_stable() {
    let store = Mutex::new(OverlayStore::new());
    let diagnostics = || {
        vec![
            record(DiagnosticKind::Error, TextRange::new(0, 4), "check", |_| {}),
            record(DiagnosticKind::Information, TextRange::new(10, 30), "hint", |_| {}),
            record(DiagnosticKind::Warning, TextRange::new(32, 40), "lint", |b| {
                b.description("trailing");
            }),
        ]
    };
    reconcile(&store, &diagnostics());
    let first: Vec<_> = store
        .lock()
        .entries()
        .map(|entry| (entry.handle, entry.range, entry.record.description.clone()))
        .collect();
    reconcile(&store, &diagnostics());
    let second: Vec<_> = store
        .lock()
        .entries()
        .map(|entry| (entry.handle, entry.range, entry.record.description.clone()))
        .collect();
    assert_eq!(first, second);
}

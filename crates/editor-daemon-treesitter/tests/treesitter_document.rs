use editor_daemon::{
    CancellationToken, DaemonConfig, DiagnosticsDaemon, DocumentId, Severity, StageId, SyntaxTree,
    TextDelta, TextRange,
};
use editor_daemon_treesitter::{
    SyntaxErrorRule, TreeSitterDocument, TreeSitterError, TreeSitterUpdateMode,
};
use pretty_assertions::assert_eq;
use tree_sitter_rust::LANGUAGE;

const SAMPLE: &str = include_str!("fixtures/rust_sample.rs");
const DOC: DocumentId = DocumentId(1);

fn document() -> TreeSitterDocument {
    TreeSitterDocument::new(&LANGUAGE.into(), "rust", SAMPLE).unwrap()
}

fn daemon() -> DiagnosticsDaemon {
    DiagnosticsDaemon::builder(DaemonConfig::default())
        .stage(StageId::SYNTAX, vec![Box::new(SyntaxErrorRule)])
        .build()
        .unwrap()
}

fn run(daemon: &DiagnosticsDaemon, len: usize) -> Vec<TextRange> {
    let outcome = daemon
        .run_highlighting_pass(
            DOC,
            StageId::SYNTAX,
            TextRange::new(0, len),
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(outcome.complete);
    let mut ranges: Vec<TextRange> = daemon
        .diagnostics(DOC)
        .unwrap()
        .iter()
        .map(|record| {
            assert_eq!(record.severity, Severity::Error);
            assert_eq!(record.tool_id.as_deref(), Some(SyntaxErrorRule::ID));
            record.range
        })
        .collect();
    ranges.sort();
    ranges
}

#[test]
fn test_valid_fixture_has_no_syntax_errors() {
    let doc = document();
    assert_eq!(doc.last_update_mode(), TreeSitterUpdateMode::Initial);
    let snapshot = doc.snapshot();
    assert_eq!(snapshot.text_len(), SAMPLE.chars().count());
    assert!(!snapshot.is_error(snapshot.root()));

    let daemon = daemon();
    daemon.open_document(DOC, snapshot);
    assert!(run(&daemon, doc.char_count()).is_empty());
    assert!(daemon.is_fully_clean(DOC));
}

#[test]
fn test_incremental_edit_reports_and_clears_syntax_error() {
    let mut doc = document();
    let daemon = daemon();
    daemon.open_document(DOC, doc.snapshot());
    assert!(run(&daemon, doc.char_count()).is_empty());

    let first = doc.snapshot();
    let offset = SAMPLE.find("    let total").unwrap();
    let delta = TextDelta::insert(doc.char_count(), offset, "    let = ;\n");
    doc.apply_delta(&delta).unwrap();
    assert_eq!(doc.last_update_mode(), TreeSitterUpdateMode::Incremental);
    assert!(doc.tree().root_node().has_error());

    let second = doc.snapshot();
    assert_eq!(second.identity(), first.identity());
    assert_eq!(second.modification_stamp(), first.modification_stamp() + 1);

    daemon.document_changed(DOC, &delta).unwrap();
    daemon.update_tree(DOC, second).unwrap();
    let errors = run(&daemon, doc.char_count());
    assert!(!errors.is_empty());
    let inserted = TextRange::new(offset, offset + "    let = ;\n".len());
    assert!(errors.iter().all(|range| range.intersects(&inserted)));

    doc.set_text(SAMPLE).unwrap();
    assert_eq!(doc.last_update_mode(), TreeSitterUpdateMode::FullReparse);
    daemon.update_tree(DOC, doc.snapshot()).unwrap();
    daemon.mark_whole_document_dirty(DOC, "reparsed").unwrap();
    assert!(run(&daemon, doc.char_count()).is_empty());
}

#[test]
fn test_mismatched_delta_leaves_document_untouched() {
    let mut doc = document();
    let stamp = doc.stamp();

    let wrong_text = TextDelta::delete(doc.char_count(), 0, "fn");
    assert!(matches!(
        doc.apply_delta(&wrong_text),
        Err(TreeSitterError::DeltaMismatch)
    ));
    let wrong_count = TextDelta::insert(doc.char_count() + 1, 0, "x");
    assert!(matches!(
        doc.apply_delta(&wrong_count),
        Err(TreeSitterError::DeltaMismatch)
    ));

    assert_eq!(doc.stamp(), stamp);
    assert_eq!(doc.text(), SAMPLE);
    assert_eq!(doc.last_update_mode(), TreeSitterUpdateMode::Initial);
}

#[test]
fn test_multibyte_edit_keeps_char_offsets() {
    let mut doc = document();
    let delta = TextDelta::insert(doc.char_count(), 0, "// héllo 😀\n");
    doc.apply_delta(&delta).unwrap();
    assert_eq!(doc.char_count(), SAMPLE.chars().count() + 11);

    let snapshot = doc.snapshot();
    assert_eq!(snapshot.text_len(), doc.char_count());
    let comment = snapshot
        .children(snapshot.root())
        .find(|&node| snapshot.kind(node) == "line_comment")
        .unwrap();
    assert_eq!(snapshot.range(comment).start, 0);
    assert!(!snapshot.is_error(snapshot.root()));
}

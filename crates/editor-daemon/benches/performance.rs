use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use editor_daemon::{
    ArenaTree, CancellationToken, DaemonConfig, DiagnosticKind, DiagnosticsDaemon, DocumentId,
    NodeId, Rule, RuleContext, RuleError, StageId, SyntaxTree, TextRange, TreePartitioner,
};
use std::sync::Arc;

const DOC: DocumentId = DocumentId(1);

#[derive(Clone)]
struct LongIdent;

impl Rule for LongIdent {
    fn id(&self) -> &str {
        "long-ident"
    }

    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let tree = ctx.tree();
        if tree.kind(node) == "ident" && tree.range(node).len() > 6 {
            let mut builder = ctx.node_builder(DiagnosticKind::WeakWarning, node);
            builder.description("identifier too long");
            ctx.emit(builder)?;
        }
        Ok(())
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(self.clone())
    }
}

/// `fn_count` functions of ten statements, each statement holding two identifiers.
fn large_tree(fn_count: usize) -> (Arc<dyn SyntaxTree>, usize) {
    let mut b = ArenaTree::builder("rust");
    b.start_node("file", 0);
    let mut offset = 0;
    for f in 0..fn_count {
        b.start_node("function", offset);
        for s in 0..10 {
            b.start_node("statement", offset);
            let short = 4;
            let long = if (f + s) % 3 == 0 { 12 } else { 5 };
            b.leaf("ident", offset..offset + short);
            b.leaf("ident", offset + short + 3..offset + short + 3 + long);
            offset += short + 3 + long + 2;
            b.finish_node(offset);
        }
        offset += 2;
        b.finish_node(offset);
    }
    b.finish_node(offset);
    (Arc::new(b.finish()), offset)
}

fn daemon() -> DiagnosticsDaemon {
    DiagnosticsDaemon::builder(DaemonConfig::default())
        .stage(StageId::INSPECTIONS, vec![Box::new(LongIdent)])
        .build()
        .unwrap()
}

fn bench_full_pass(c: &mut Criterion) {
    let (tree, len) = large_tree(2_000);
    c.bench_function("full_pass/20k_statements", |b| {
        b.iter_batched(
            || {
                let daemon = daemon();
                daemon.open_document(DOC, tree.clone());
                daemon
            },
            |daemon| {
                let outcome = daemon
                    .run_highlighting_pass(
                        DOC,
                        StageId::INSPECTIONS,
                        TextRange::new(len / 2, len / 2 + 2_000),
                        &CancellationToken::new(),
                    )
                    .unwrap();
                black_box(outcome.diagnostics.len());
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_incremental_pass(c: &mut Criterion) {
    let (tree, len) = large_tree(2_000);
    let daemon = daemon();
    daemon.open_document(DOC, tree);
    let visible = TextRange::new(len / 2, len / 2 + 2_000);
    daemon
        .run_highlighting_pass(DOC, StageId::INSPECTIONS, visible, &CancellationToken::new())
        .unwrap();

    c.bench_function("incremental_pass/single_statement", |b| {
        b.iter(|| {
            daemon
                .mark_range_dirty(DOC, TextRange::new(len / 2, len / 2 + 3), "bench")
                .unwrap();
            let outcome = daemon
                .run_highlighting_pass(
                    DOC,
                    StageId::INSPECTIONS,
                    visible,
                    &CancellationToken::new(),
                )
                .unwrap();
            black_box(outcome.stats.reused);
        })
    });
}

fn bench_partition_cached(c: &mut Criterion) {
    let (tree, len) = large_tree(2_000);
    let partitioner = TreePartitioner::new();
    let token = CancellationToken::new();
    let restrict = TextRange::new(0, len);

    c.bench_function("partition/cached_walk", |b| {
        b.iter(|| {
            let partition = partitioner
                .partition(
                    tree.as_ref(),
                    restrict,
                    TextRange::new(len / 2, len / 2 + 2_000),
                    &token,
                )
                .unwrap();
            black_box(partition.len());
        })
    });
}

criterion_group!(
    benches,
    bench_full_pass,
    bench_incremental_pass,
    bench_partition_cached
);
criterion_main!(benches);

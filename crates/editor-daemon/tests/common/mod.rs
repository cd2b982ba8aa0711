#![allow(dead_code)]

use editor_daemon::{
    ArenaTree, DiagnosticKind, NodeId, Rule, RuleContext, RuleError, SyntaxTree, TextRange,
};
use rand::Rng;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex, Once};

/// Route `tracing` output to the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A file node spanning `len` with one `ident` leaf per range.
pub fn flat_tree(idents: &[(usize, usize)], len: usize) -> Arc<dyn SyntaxTree> {
    let mut b = ArenaTree::builder("rust");
    b.start_node("file", 0);
    for (start, end) in idents {
        b.leaf("ident", *start..*end);
    }
    b.finish_node(len);
    Arc::new(b.finish())
}

/// A random, properly nested tree over `0..len`.
pub fn random_tree(rng: &mut StdRng, len: usize) -> ArenaTree {
    let mut b = ArenaTree::builder("rust");
    b.start_node("file", 0);
    grow(&mut b, rng, 0, len, 0);
    b.finish_node(len);
    b.finish()
}

fn grow(
    b: &mut editor_daemon::ArenaTreeBuilder,
    rng: &mut StdRng,
    start: usize,
    end: usize,
    depth: usize,
) {
    let mut offset = start;
    while depth < 5 && offset < end {
        let child_start = offset + rng.gen_range(0..=2);
        if child_start >= end {
            break;
        }
        let child_end = rng.gen_range(child_start + 1..=end.min(child_start + 30));
        if child_end - child_start > 1 && rng.gen_bool(0.5) {
            b.start_node("inner", child_start);
            grow(b, rng, child_start, child_end, depth + 1);
            b.finish_node(child_end);
        } else {
            b.leaf("leaf", child_start..child_end);
        }
        offset = child_end;
    }
}

/// Reports every `ident` longer than `max` characters as a weak warning.
#[derive(Clone)]
pub struct LongIdentRule {
    pub max: usize,
}

impl Rule for LongIdentRule {
    fn id(&self) -> &str {
        "long-ident"
    }

    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let tree = ctx.tree();
        if tree.kind(node) == "ident" && tree.range(node).len() > self.max {
            let mut builder = ctx.node_builder(DiagnosticKind::WeakWarning, node);
            builder.description(format!("identifier longer than {}", self.max));
            ctx.emit(builder)?;
        }
        Ok(())
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(self.clone())
    }
}

/// Records the range of every visited node, in visiting order.
#[derive(Clone, Default)]
pub struct RecordingRule {
    pub visited: Arc<Mutex<Vec<TextRange>>>,
}

impl Rule for RecordingRule {
    fn id(&self) -> &str {
        "recording"
    }

    fn is_dumb_aware(&self) -> bool {
        true
    }

    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let range = ctx.tree().range(node);
        self.visited
            .lock()
            .map_err(|_| RuleError::Failed("poisoned".to_string()))?
            .push(range);
        Ok(())
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(self.clone())
    }
}

/// Reports every node the parser flagged as an error.
#[derive(Clone)]
pub struct ErrorNodeRule;

impl Rule for ErrorNodeRule {
    fn id(&self) -> &str {
        "error-node"
    }

    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        if ctx.tree().is_error(node) {
            let mut builder = ctx.node_builder(DiagnosticKind::Error, node);
            builder.description(format!("bad {}", ctx.tree().kind(node)));
            ctx.emit(builder)?;
        }
        Ok(())
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(ErrorNodeRule)
    }
}

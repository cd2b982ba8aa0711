use editor_daemon::{DiagnosticKind, NodeId, Rule, RuleContext, RuleError, TextRange};

const ERROR_KIND: &str = "ERROR";

/// Reports parse errors: `ERROR` nodes and tokens the parser had to insert.
///
/// Nested error nodes are reported once, at the outermost one. The rule does not need indexes,
/// so it also runs in dumb mode.
#[derive(Debug, Clone, Default)]
pub struct SyntaxErrorRule;

impl SyntaxErrorRule {
    /// Tool id of the produced diagnostics.
    pub const ID: &'static str = "syntax-errors";
}

impl Rule for SyntaxErrorRule {
    fn id(&self) -> &str {
        Self::ID
    }

    fn is_dumb_aware(&self) -> bool {
        true
    }

    fn visit(&mut self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let tree = ctx.tree();
        if !tree.is_error(node) {
            return Ok(());
        }
        if tree.parent(node).is_some_and(|parent| tree.is_error(parent)) {
            return Ok(());
        }

        let kind = tree.kind(node);
        let mut range = tree.range(node);
        let doc_len = tree.text_len();
        if range.is_empty() && range.start == doc_len && doc_len > 0 {
            range = TextRange::new(doc_len - 1, doc_len);
        }

        let mut builder = ctx.builder(DiagnosticKind::Error);
        builder.range(range);
        if kind == ERROR_KIND {
            builder.description("syntax error");
        } else {
            builder.description(format!("missing `{kind}`"));
        }
        ctx.emit(builder)
    }

    fn clone_rule(&self) -> Box<dyn Rule> {
        Box::new(self.clone())
    }
}

//! Error types.
//!
//! Cancellation and data-unready conditions are ordinary values here; only builder setter
//! misuse panics, since it can only be a bug in the calling rule.

use crate::cancel::Cancelled;
use crate::range::{DocumentId, StageId};
use thiserror::Error;

/// Error returned by a rule's `visit`.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The pass was cancelled while the rule was running.
    #[error("cancelled")]
    Cancelled(#[from] Cancelled),

    /// Index data the rule needs is not available yet.
    #[error("index not ready: {0}")]
    IndexNotReady(String),

    /// The rule hit an internal defect.
    #[error("rule failed: {0}")]
    Failed(String),

    /// The rule misused a diagnostic builder.
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// Misuse of a [`DiagnosticBuilder`](crate::builder::DiagnosticBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// `create()` (or `create_unconditionally()`) was called a second time.
    #[error("diagnostic builder was already finalized")]
    AlreadyFinalized,

    /// No range was set before finalization.
    #[error("diagnostic builder has no range")]
    MissingRange,
}

/// Errors from the dirty-scope tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirtyScopeError {
    /// A dirty mark arrived while a pass asserted that no modification may happen.
    #[error("{document} was marked dirty while modifications are disallowed ({reason})")]
    ModificationDisallowed {
        /// The document being marked.
        document: DocumentId,
        /// Reason passed by the caller.
        reason: String,
    },
}

/// Errors from the overlay store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// A diagnostic record was bound to a second overlay entry.
    #[error("diagnostic is already bound to overlay entry {0}")]
    AlreadyBound(u64),

    /// The overlay entry does not exist (anymore).
    #[error("unknown overlay entry {0}")]
    UnknownEntry(u64),
}

/// Why a highlighting pass did not apply.
#[derive(Debug, Error)]
pub enum PassError {
    /// The session was cancelled; recycled entries were released.
    #[error("highlighting pass cancelled")]
    Cancelled(#[from] Cancelled),

    /// A consistency violation was observed; the pass must be restarted from scratch.
    #[error("{stage} pass for {document} is inconsistent: {reason}")]
    Inconsistent {
        /// Document being highlighted.
        document: DocumentId,
        /// Stage of the pass.
        stage: StageId,
        /// What went wrong.
        reason: String,
    },

    /// Too many restarts in a row.
    #[error("{stage} pass for {document} gave up after {restarts} restarts")]
    RestartLimit {
        /// Document being highlighted.
        document: DocumentId,
        /// Stage of the pass.
        stage: StageId,
        /// Number of restarts attempted.
        restarts: u32,
    },

    /// The document was never opened or has been closed.
    #[error("unknown document {0}")]
    UnknownDocument(DocumentId),

    /// No rules are registered for the stage.
    #[error("unknown stage {0}")]
    UnknownStage(StageId),

    /// The dirty-scope tracker refused a mark.
    #[error(transparent)]
    Dirty(#[from] DirtyScopeError),

    /// The daemon configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Building the rule worker pool failed.
    #[error("failed to build rule worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// The overlay rejected a mutation.
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

/// Errors loading a [`DaemonConfig`](crate::config::DaemonConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON parse error.
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error reading a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value is out of its allowed range.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Explanation.
        message: String,
    },
}

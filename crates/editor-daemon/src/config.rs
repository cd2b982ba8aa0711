//! Engine configuration.
//!
//! [`DaemonConfig`] deserializes from JSON; every field has a default, so hosts only spell out
//! what they change:
//!
//! ```rust
//! use editor_daemon::config::{DaemonConfig, RecyclingStrategy};
//!
//! let config = DaemonConfig::from_json_str(r#"{ "worker_threads": 2, "recycling": "by_tool" }"#)
//!     .unwrap();
//! assert_eq!(config.worker_threads, 2);
//! assert_eq!(config.recycling, RecyclingStrategy::ByTool);
//! assert_eq!(config.max_restarts, DaemonConfig::default().max_restarts);
//! ```

use crate::error::ConfigError;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How overlay entries slated for removal are matched for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecyclingStrategy {
    /// Reuse by `(range, layer)`.
    #[default]
    ByRange,
    /// Reuse only by the same producing rule: `(tool, range, layer)`.
    ByTool,
}

/// Minimum severity an overlapping diagnostic needs to hide a covered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverThreshold {
    /// Any diagnostic of the same or higher severity covers.
    #[default]
    SameOrHigher,
    /// Only errors cover.
    ErrorOnly,
}

/// Severity-coverage suppression policy applied during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoveragePolicy {
    /// Turn suppression off entirely.
    pub enabled: bool,
    /// Which overlapping diagnostics are allowed to cover.
    pub threshold: CoverThreshold,
    /// Diagnostics carrying a gutter marker are never suppressed.
    pub exempt_gutter: bool,
    /// Symbol-type coloring is never suppressed and never covers.
    pub exempt_symbol_type: bool,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: CoverThreshold::SameOrHigher,
            exempt_gutter: true,
            exempt_symbol_type: true,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Size of the rule worker pool. `0` uses the number of available CPUs.
    pub worker_threads: usize,
    /// Number of progress steps per rule run; the chunk size is `max(1, total / progress_chunks)`.
    pub progress_chunks: usize,
    /// Lower bound of the random delay before restarting an aborted pass.
    pub restart_jitter_min_ms: u64,
    /// Upper bound of the random delay before restarting an aborted pass.
    pub restart_jitter_max_ms: u64,
    /// Consecutive restarts before a pass gives up.
    pub max_restarts: u32,
    /// Diagnostics below this severity are dropped by the default post-filter.
    pub min_severity: Severity,
    /// Recycling strategy.
    pub recycling: RecyclingStrategy,
    /// Coverage suppression policy.
    pub coverage: CoveragePolicy,
    /// Run passes in reduced ("essential-only") mode.
    pub essential_only: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            progress_chunks: 100,
            restart_jitter_min_ms: 5,
            restart_jitter_max_ms: 50,
            max_restarts: 8,
            min_severity: Severity::TextAttributes,
            recycling: RecyclingStrategy::ByRange,
            coverage: CoveragePolicy::default(),
            essential_only: false,
        }
    }
}

impl DaemonConfig {
    /// Parse a config from JSON text and validate it.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress_chunks == 0 {
            return Err(ConfigError::Invalid {
                field: "progress_chunks",
                message: "must be at least 1".to_string(),
            });
        }
        if self.restart_jitter_min_ms > self.restart_jitter_max_ms {
            return Err(ConfigError::Invalid {
                field: "restart_jitter_min_ms",
                message: format!(
                    "{} exceeds restart_jitter_max_ms ({})",
                    self.restart_jitter_min_ms, self.restart_jitter_max_ms
                ),
            });
        }
        Ok(())
    }

    /// Jitter bounds as durations.
    pub fn restart_jitter(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.restart_jitter_min_ms),
            Duration::from_millis(self.restart_jitter_max_ms),
        )
    }
}

//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// When writes propagate to their subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// A write outside any batch propagates before `set` returns.
    #[default]
    Immediate,

    /// Writes only mark the graph. Propagation happens when the outermost
    /// `batch` returns or when `Runtime::flush` is called.
    Batched,
}

/// Configuration of the per-thread reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub flush_mode: FlushMode,

    /// Upper bound on propagation rounds in one flush. Exceeding it means
    /// effects keep re-dirtying each other.
    pub max_flush_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Immediate,
            max_flush_rounds: 100,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn batched() -> Self {
        Self {
            flush_mode: FlushMode::Batched,
            ..Self::default()
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::engine::CcMode;

/// Graph store tuning knobs. The concurrency-control mode is fixed for the
/// life of the engine; the scan limits bound how many rows a single cascade
/// or neighbor scan pulls per vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cc_mode: CcMode,
    pub vertex_scan_limit: usize,
    pub edge_scan_limit: usize,
    pub max_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cc_mode: CcMode::Optimistic,
            vertex_scan_limit: 1000,
            edge_scan_limit: 10_000,
            max_retries: 3,
        }
    }
}

impl Config {
    /// Lock-based mode: conflicts fail fast instead of at commit.
    pub fn pessimistic() -> Self {
        Self {
            cc_mode: CcMode::TwoPhaseLocking,
            ..Self::default()
        }
    }

    /// One writer at a time; useful for bulk loads.
    pub fn single_writer() -> Self {
        Self {
            cc_mode: CcMode::Simple,
            ..Self::default()
        }
    }

    /// No isolation at all. Bring-up and comparison only.
    pub fn unchecked() -> Self {
        Self {
            cc_mode: CcMode::NoCc,
            ..Self::default()
        }
    }
}

//! Pool tallies and the ingest recommendation.

use serde::Serialize;

/// Per-range static tallies. Dynamic nodes are counted globally only;
/// range gating never applies to them.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RangeTally {
    pub static_statics: usize,
    pub static_nodes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolCounts {
    pub ranges: Vec<RangeTally>,
    pub static_statics: usize,
    pub static_nodes: usize,
    pub dynamic_nodes: usize,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// Present when the scan is expected to run long
    pub warning: Option<String>,
    /// Always true: sticky same-value pointers rarely pay for the extra
    /// base pointers they add
    pub skip_sticky: bool,
}

/// Base-pointer count in range 0 below which no advice is worth giving.
pub(crate) const QUIET_BASE_POINTER_COUNT: usize = 30_000;

pub(crate) fn recommend(ranges: &[RangeTally], threshold: usize) -> Recommendation {
    let range0 = ranges.first().copied().unwrap_or_default();
    let candidates = range0.static_statics + range0.static_nodes;
    let warning = if candidates <= QUIET_BASE_POINTER_COUNT {
        None
    } else if candidates > threshold {
        Some(format!(
            "{} base-pointer candidates in range 0; scan time will be high, \
             keep skip_sticky_pointers enabled",
            candidates
        ))
    } else {
        None
    };
    Recommendation {
        warning,
        skip_sticky: true,
    }
}

//! Host-facing event surface.
//!
//! The pipeline is a single cooperative task: it reports progress and polls
//! for cancellation through one sink passed in by the host. Suspension
//! points are stage boundaries, every 100 base pointers during the scan,
//! and every 3 descent depths inside a chain walk.

use strum::Display;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Static,
    Dynamic,
    Precompute,
    Scan,
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StageStatus {
    Active,
    Completed,
    Skipped,
    Error,
}

/// Receives progress, stage transitions, and finding counts.
///
/// `cancelled` is polled at every suspension point; returning true stops
/// the pipeline cleanly at the next boundary with partial findings kept.
pub trait EventSink {
    fn progress(&mut self, percent: u8, status: &str);

    fn stage(&mut self, stage: Stage, status: StageStatus);

    fn counts(&mut self, static_lists: usize, dynamic_lists: usize);

    fn cancelled(&self) -> bool {
        false
    }
}

/// Sink that discards everything, for hosts that only want the summary.
pub struct NullSink;

impl EventSink for NullSink {
    fn progress(&mut self, _percent: u8, _status: &str) {}

    fn stage(&mut self, _stage: Stage, _status: StageStatus) {}

    fn counts(&mut self, _static_lists: usize, _dynamic_lists: usize) {}
}

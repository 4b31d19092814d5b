//! Console event sink: renders pipeline progress on stderr.

use dowser_core::{EventSink, Stage, StageStatus};

#[derive(Default)]
pub struct ConsoleSink {
    last_percent: u8,
}

impl EventSink for ConsoleSink {
    fn progress(&mut self, percent: u8, status: &str) {
        // Scan progress arrives every 100 base pointers; only redraw on
        // whole-percent movement
        if percent != self.last_percent {
            self.last_percent = percent;
            eprintln!("  {:>3}% {}", percent, status);
        }
    }

    fn stage(&mut self, stage: Stage, status: StageStatus) {
        match status {
            StageStatus::Active => eprintln!("[{}]", stage),
            StageStatus::Skipped => eprintln!("[{}] skipped", stage),
            StageStatus::Error => eprintln!("[{}] failed", stage),
            StageStatus::Completed => {}
        }
    }

    fn counts(&mut self, static_lists: usize, dynamic_lists: usize) {
        eprintln!(
            "  detected {} static, {} dynamic lists",
            static_lists, dynamic_lists
        );
    }
}

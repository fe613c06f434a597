//! Collision-free output file names.

use chrono::Local;
use std::sync::atomic::{AtomicU64, Ordering};

/// Produces `<prefix>_<YYYYmmdd_HHMMSS_mmm>_<seq>` stems.
///
/// The millisecond timestamp keeps names sortable and readable; the
/// process-wide sequence guarantees uniqueness within the same millisecond.
#[derive(Debug, Default)]
pub struct FileNamer {
    sequence: AtomicU64,
}

impl FileNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unique file stem for `prefix`.
    pub fn next_stem(&self, prefix: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!(
            "{prefix}_{}_{seq:04}",
            Local::now().format("%Y%m%d_%H%M%S_%3f")
        )
    }
}

//! Performance metrics reported to the control surface

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Mean processing time over the last window as a fraction of the cycle period
    pub cpu_usage: f64,
    /// Cycles that overran their period or hit a device read/write failure
    pub underruns: u64,
    pub active_track_count: usize,
    /// Per-track processing faults isolated by the audio loop
    pub track_faults: u64,
    /// Captured frames discarded because the recorder fell behind
    pub dropped_capture_frames: u64,
}

impl PerformanceMetrics {
    pub fn cpu_percent(&self) -> f64 {
        self.cpu_usage * 100.0
    }
}

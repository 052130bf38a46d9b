//! Cycle timing and fault counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_core::{EngineFormat, PerformanceMetrics};

/// Counters published by the audio thread, read from anywhere
#[derive(Debug, Default)]
pub struct PerformanceCounters {
    cpu_bits: AtomicU64,
    underruns: AtomicU64,
    track_faults: AtomicU64,
    device_faults: AtomicU64,
    dropped_capture: AtomicU64,
    active_tracks: AtomicUsize,
    cycles: AtomicU64,
}

impl PerformanceCounters {
    pub fn cpu_usage(&self) -> f64 {
        f64::from_bits(self.cpu_bits.load(Ordering::Relaxed))
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn track_faults(&self) -> u64 {
        self.track_faults.load(Ordering::Relaxed)
    }

    /// Device reads or writes that failed or timed out. Each is also an underrun.
    pub fn device_faults(&self) -> u64 {
        self.device_faults.load(Ordering::Relaxed)
    }

    pub fn dropped_capture_frames(&self) -> u64 {
        self.dropped_capture.load(Ordering::Relaxed)
    }

    pub fn active_tracks(&self) -> usize {
        self.active_tracks.load(Ordering::Relaxed)
    }

    /// Completed cycles since the engine was created
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            cpu_usage: self.cpu_usage(),
            underruns: self.underruns(),
            active_track_count: self.active_tracks(),
            track_faults: self.track_faults(),
            dropped_capture_frames: self.dropped_capture_frames(),
        }
    }

    pub(crate) fn set_active_tracks(&self, count: usize) {
        self.active_tracks.store(count, Ordering::Relaxed);
    }
}

/// Measures each cycle's processing time against the period.
///
/// Lives on the audio thread. CPU usage is the mean busy time over a window
/// of one second of audio divided by the period, published once per window.
#[derive(Debug)]
pub struct PerformanceMonitor {
    period: Duration,
    window_cycles: u32,
    cycles_in_window: u32,
    busy_in_window: Duration,
    cycle_start: Option<Instant>,
    counters: Arc<PerformanceCounters>,
}

impl PerformanceMonitor {
    pub fn new(format: &EngineFormat) -> Self {
        Self {
            period: format.period(),
            window_cycles: format.cycles_per_second(),
            cycles_in_window: 0,
            busy_in_window: Duration::ZERO,
            cycle_start: None,
            counters: Arc::new(PerformanceCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<PerformanceCounters> {
        self.counters.clone()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn begin_cycle(&mut self) {
        self.cycle_start = Some(Instant::now());
    }

    pub fn end_cycle(&mut self) {
        if let Some(start) = self.cycle_start.take() {
            self.record_cycle(start.elapsed());
        }
    }

    /// Account one cycle that was busy for `busy`
    pub fn record_cycle(&mut self, busy: Duration) {
        if busy > self.period {
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        self.busy_in_window += busy;
        self.cycles_in_window += 1;

        if self.cycles_in_window >= self.window_cycles {
            let budget = self.period.as_secs_f64() * self.cycles_in_window as f64;
            let usage = self.busy_in_window.as_secs_f64() / budget;
            self.counters.cpu_bits.store(usage.to_bits(), Ordering::Relaxed);
            self.cycles_in_window = 0;
            self.busy_in_window = Duration::ZERO;
        }
    }

    /// A device read or write failed or timed out
    pub fn record_device_fault(&mut self) {
        self.counters.device_faults.fetch_add(1, Ordering::Relaxed);
        self.counters.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// The recorder queue had no room for a captured buffer
    pub fn record_dropped_capture(&mut self, frames: u64) {
        self.counters.dropped_capture.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_track_fault(&mut self) {
        self.counters.track_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_tracks(&mut self, count: usize) {
        self.counters.set_active_tracks(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> PerformanceMonitor {
        // 100 cycles per window, 10 ms period
        PerformanceMonitor::new(&EngineFormat::new(48000, 2, 480))
    }

    #[test]
    fn test_overrun_counts_as_underrun() {
        let mut m = monitor();
        m.record_cycle(Duration::from_millis(5));
        m.record_cycle(Duration::from_millis(11));
        m.record_cycle(Duration::from_millis(10));
        assert_eq!(m.counters().underruns(), 1);
        assert_eq!(m.counters().cycles(), 3);
    }

    #[test]
    fn test_cpu_published_per_window() {
        let mut m = monitor();
        for _ in 0..99 {
            m.record_cycle(Duration::from_millis(5));
        }
        assert_eq!(m.counters().cpu_usage(), 0.0);
        m.record_cycle(Duration::from_millis(5));
        assert!((m.counters().cpu_usage() - 0.5).abs() < 1e-9);

        for _ in 0..100 {
            m.record_cycle(Duration::from_millis(2));
        }
        assert!((m.counters().cpu_usage() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_faults_and_snapshot() {
        let mut m = monitor();
        m.record_device_fault();
        m.record_track_fault();
        m.record_track_fault();
        m.set_active_tracks(3);
        m.record_dropped_capture(256);
        let snap = m.counters().snapshot();
        assert_eq!(snap.underruns, 1);
        assert_eq!(m.counters().device_faults(), 1);
        assert_eq!(snap.dropped_capture_frames, 256);
        assert_eq!(snap.track_faults, 2);
        assert_eq!(snap.active_track_count, 3);
    }

    #[test]
    fn test_begin_end_measures_wall_clock() {
        let mut m = monitor();
        m.begin_cycle();
        m.end_cycle();
        // no begin, nothing recorded
        m.end_cycle();
        assert_eq!(m.counters().cycles(), 1);
    }
}

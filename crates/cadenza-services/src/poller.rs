//! Non-real-time status polling
//!
//! Samples the cursor, transport state and performance counters on a fixed
//! interval and publishes them on a channel. Only atomics written by the
//! audio thread are read, so polling never contends with a cycle. Counter
//! increases are logged here, since the audio thread itself never logs.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cadenza_core::{PerformanceMetrics, TransportState};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, warn};

use crate::io_loop::SharedState;
use crate::performance::PerformanceCounters;

const STATUS_QUEUE: usize = 16;

/// One polled snapshot of the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStatus {
    pub state: TransportState,
    pub position_samples: u64,
    pub position_secs: f64,
    pub metrics: PerformanceMetrics,
}

pub struct StatusPoller {
    rx: Receiver<EngineStatus>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub(crate) fn spawn(
        shared: Arc<SharedState>,
        counters: Arc<PerformanceCounters>,
        sample_rate: u32,
        interval: Duration,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded(STATUS_QUEUE);
        let (stop_tx, stop_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("cadenza-poller".into())
            .spawn(move || poll_loop(&shared, &counters, sample_rate, interval, &tx, &stop_rx))?;
        debug!(interval_ms = interval.as_millis() as u64, "Status poller started");
        Ok(Self {
            rx,
            stop_tx,
            handle: Some(handle),
        })
    }

    pub fn receiver(&self) -> &Receiver<EngineStatus> {
        &self.rx
    }

    /// Most recent queued status, discarding older ones
    pub fn latest(&self) -> Option<EngineStatus> {
        self.rx.try_iter().last()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(
    shared: &SharedState,
    counters: &PerformanceCounters,
    sample_rate: u32,
    interval: Duration,
    tx: &Sender<EngineStatus>,
    stop_rx: &Receiver<()>,
) {
    let ticker = tick(interval);
    let mut last = counters.snapshot();
    let mut last_device_faults = counters.device_faults();
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                let metrics = counters.snapshot();
                let device_faults = counters.device_faults();
                report_increases(&last, &metrics, device_faults - last_device_faults);
                last = metrics;
                last_device_faults = device_faults;

                let position_samples = shared.position();
                let status = EngineStatus {
                    state: shared.state(),
                    position_samples,
                    position_secs: position_samples as f64 / sample_rate.max(1) as f64,
                    metrics,
                };
                // a slow reader misses snapshots rather than stalling the poller
                let _ = tx.try_send(status);
            }
        }
    }
}

fn report_increases(prev: &PerformanceMetrics, now: &PerformanceMetrics, new_device_faults: u64) {
    if new_device_faults > 0 {
        warn!(count = new_device_faults, "Audio device read/write failed or timed out");
    }
    let overruns = (now.underruns - prev.underruns).saturating_sub(new_device_faults);
    if overruns > 0 {
        warn!(count = overruns, total = now.underruns, cpu = now.cpu_usage, "Audio cycle overran its period");
    }
    if now.track_faults > prev.track_faults {
        warn!(count = now.track_faults - prev.track_faults, "Track processing fault, track silenced");
    }
    if now.dropped_capture_frames > prev.dropped_capture_frames {
        warn!(
            frames = now.dropped_capture_frames - prev.dropped_capture_frames,
            "Recorder fell behind, captured audio dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use cadenza_core::EngineFormat;

    use super::*;
    use crate::performance::PerformanceMonitor;

    #[test]
    fn test_poller_publishes_snapshots() {
        let shared = Arc::new(SharedState::default());
        shared.set_position(44100);
        shared.set_state(TransportState::Playing);
        let mut monitor = PerformanceMonitor::new(&EngineFormat::default());
        monitor.set_active_tracks(2);

        let poller = StatusPoller::spawn(shared, monitor.counters(), 44100, Duration::from_millis(5)).unwrap();
        let status = poller.receiver().recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(status.state, TransportState::Playing);
        assert_eq!(status.position_samples, 44100);
        assert!((status.position_secs - 1.0).abs() < 1e-9);
        assert_eq!(status.metrics.active_track_count, 2);
        poller.stop();
    }

    #[test]
    fn test_drop_stops_thread() {
        let shared = Arc::new(SharedState::default());
        let counters = Arc::new(PerformanceCounters::default());
        let poller = StatusPoller::spawn(shared, counters, 44100, Duration::from_millis(1)).unwrap();
        let rx = poller.receiver().clone();
        drop(poller);
        // the sender is gone once the thread has exited
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}

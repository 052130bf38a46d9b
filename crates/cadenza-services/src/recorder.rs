//! Capture-to-file recorder
//!
//! The audio thread pushes captured buffers into a lock-free ring through a
//! [`CaptureTap`]; a dedicated worker thread drains the ring into a WAV file.
//! When the worker falls behind and the ring cannot take a whole buffer, that
//! buffer is dropped and counted. The audio thread never waits on file I/O.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cadenza_core::{EngineFormat, RECORD_BITS_PER_SAMPLE};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::wav_writer::{WavHeader, WavWriter};

const WORKER_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Cannot create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Write failed: {0}")]
    Io(#[from] io::Error),
    #[error("Recording exceeds the 4 GiB container limit")]
    ContainerFull,
    #[error("Failed to spawn recorder worker: {0}")]
    WorkerSpawn(#[source] io::Error),
    #[error("Recorder worker panicked")]
    WorkerPanicked,
}

/// Audio-thread end of the capture queue
pub struct CaptureTap {
    producer: Producer<f32>,
    channels: usize,
    dropped_frames: Arc<AtomicU64>,
}

impl CaptureTap {
    /// Queue one captured buffer. Returns false, dropping the whole buffer,
    /// when the queue cannot take it.
    pub fn push(&mut self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return true;
        }
        if self.producer.slots() < samples.len() {
            self.dropped_frames
                .fetch_add((samples.len() / self.channels) as u64, Ordering::Relaxed);
            return false;
        }
        match self.producer.write_chunk_uninit(samples.len()) {
            Ok(chunk) => {
                chunk.fill_from_iter(samples.iter().copied());
                true
            }
            Err(_) => {
                self.dropped_frames
                    .fetch_add((samples.len() / self.channels) as u64, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CaptureTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureTap")
            .field("free_slots", &self.producer.slots())
            .field("dropped_frames", &self.dropped_frames())
            .finish()
    }
}

/// Result of a finished recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub data_bytes: u64,
    pub dropped_frames: u64,
}

/// Control-side handle of a running recording
#[derive(Debug)]
pub struct ActiveRecording {
    path: PathBuf,
    block_align: u64,
    dropped_frames: Arc<AtomicU64>,
    finish_tx: Sender<()>,
    worker: Option<JoinHandle<Result<u64, RecorderError>>>,
}

pub struct Recorder;

impl Recorder {
    /// Create the destination, write the provisional header and start the
    /// worker. On failure no file is left behind.
    pub fn start(
        path: &Path,
        format: &EngineFormat,
        queue_samples: usize,
    ) -> Result<(ActiveRecording, CaptureTap), RecorderError> {
        let file = File::create(path).map_err(|source| RecorderError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        let header = WavHeader {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: RECORD_BITS_PER_SAMPLE,
        };
        let writer = match WavWriter::new(BufWriter::new(file), header) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = std::fs::remove_file(path);
                return Err(e);
            }
        };

        let (producer, consumer) = RingBuffer::<f32>::new(queue_samples.max(format.samples_per_buffer()));
        let (finish_tx, finish_rx) = bounded(1);
        let dropped_frames = Arc::new(AtomicU64::new(0));

        let worker = thread::Builder::new()
            .name("cadenza-recorder".into())
            .spawn(move || worker_loop(consumer, writer, finish_rx));
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                let _ = std::fs::remove_file(path);
                return Err(RecorderError::WorkerSpawn(e));
            }
        };

        info!(
            path = %path.display(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Recording started"
        );

        let tap = CaptureTap {
            producer,
            channels: format.channels.max(1) as usize,
            dropped_frames: dropped_frames.clone(),
        };
        let active = ActiveRecording {
            path: path.to_path_buf(),
            block_align: header.block_align().max(1) as u64,
            dropped_frames,
            finish_tx,
            worker: Some(worker),
        };
        Ok((active, tap))
    }
}

impl ActiveRecording {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Drain the queue, patch the header and close the file
    pub fn finish(mut self) -> Result<RecordingSummary, RecorderError> {
        let data_bytes = self.join_worker()?;
        let summary = RecordingSummary {
            path: self.path.clone(),
            frames: data_bytes / self.block_align,
            data_bytes,
            dropped_frames: self.dropped_frames(),
        };
        info!(
            path = %summary.path.display(),
            frames = summary.frames,
            dropped_frames = summary.dropped_frames,
            "Recording finished"
        );
        Ok(summary)
    }

    fn join_worker(&mut self) -> Result<u64, RecorderError> {
        let Some(handle) = self.worker.take() else {
            return Ok(0);
        };
        let _ = self.finish_tx.send(());
        handle.join().map_err(|_| RecorderError::WorkerPanicked)?
    }
}

impl Drop for ActiveRecording {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.join_worker() {
                error!(path = %self.path.display(), error = %e, "Recording closed with error");
            }
        }
    }
}

fn worker_loop(
    mut consumer: Consumer<f32>,
    mut writer: WavWriter<BufWriter<File>>,
    finish_rx: Receiver<()>,
) -> Result<u64, RecorderError> {
    let mut failure: Option<RecorderError> = None;
    loop {
        drain(&mut consumer, &mut writer, &mut failure);
        match finish_rx.recv_timeout(WORKER_POLL) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drain(&mut consumer, &mut writer, &mut failure);

    // a failed file is still closed with consistent sizes when possible
    let (buf, data_bytes) = writer.finalize()?;
    let file = buf.into_inner().map_err(|e| RecorderError::Io(e.into_error()))?;
    file.sync_all()?;
    match failure {
        Some(e) => Err(e),
        None => Ok(data_bytes),
    }
}

fn drain(
    consumer: &mut Consumer<f32>,
    writer: &mut WavWriter<BufWriter<File>>,
    failure: &mut Option<RecorderError>,
) {
    let available = consumer.slots();
    if available == 0 {
        return;
    }
    let Ok(chunk) = consumer.read_chunk(available) else {
        return;
    };
    if failure.is_none() {
        let (first, second) = chunk.as_slices();
        let result = writer
            .write_samples(first)
            .and_then(|()| writer.write_samples(second));
        if let Err(e) = result {
            warn!(error = %e, "Recorder write failed, discarding further audio");
            *failure = Some(e);
        }
    }
    chunk.commit_all();
}

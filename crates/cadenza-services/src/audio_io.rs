//! Audio device session: output sink, capture source and backends
//!
//! The audio loop talks to devices only through [`AudioSink`] and
//! [`AudioSource`], both bounded by a timeout. [`CpalBackend`] bridges them to
//! cpal callback streams through lock-free rings; [`NullBackend`] paces the
//! loop with the system clock when no device is wanted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cadenza_core::EngineFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;
use tracing::{error, info};

/// Buffers of slack between the loop and a device callback
const RING_BUFFERS: usize = 4;
const WAIT_STEP: Duration = Duration::from_micros(250);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No audio devices found")]
    NoDevices,
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Failed to configure device: {0}")]
    ConfigError(String),
    #[error("Failed to build stream: {0}")]
    StreamError(String),
    #[error("Device did not respond within the cycle period")]
    Timeout,
    #[error("Device disconnected")]
    Disconnected,
}

/// Audio device info
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
}

/// Destination of rendered buffers
pub trait AudioSink: Send {
    /// Write one interleaved buffer, waiting at most `timeout` for room
    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<(), DeviceError>;
}

/// Origin of captured buffers
pub trait AudioSource: Send {
    /// Fill `out` with one interleaved buffer, waiting at most `timeout`.
    /// Returns the number of frames read.
    fn read(&mut self, out: &mut [f32], timeout: Duration) -> Result<usize, DeviceError>;

    /// Throw away whatever the device delivered before now, so the next
    /// read starts at the current instant.
    fn discard_pending(&mut self) {}
}

/// Opens and closes the device session for the engine format
pub trait AudioBackend {
    fn name(&self) -> &str;
    fn open_output(&mut self, format: &EngineFormat) -> Result<Box<dyn AudioSink>, DeviceError>;
    fn open_input(&mut self, format: &EngineFormat) -> Result<Box<dyn AudioSource>, DeviceError>;
    /// Release device resources. Sinks and sources handed out earlier fail
    /// with [`DeviceError::Disconnected`] afterwards.
    fn close(&mut self);
}

fn wait_until(deadline: Instant, mut ready: impl FnMut() -> bool) -> bool {
    loop {
        if ready() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(WAIT_STEP);
    }
}

/// Loop side of an output ring drained by a device callback
struct RingSink {
    producer: Producer<f32>,
    failed: Arc<AtomicBool>,
}

impl AudioSink for RingSink {
    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<(), DeviceError> {
        if self.failed.load(Ordering::Relaxed) || self.producer.is_abandoned() {
            return Err(DeviceError::Disconnected);
        }
        let needed = samples.len();
        let producer = &self.producer;
        if !wait_until(Instant::now() + timeout, || producer.slots() >= needed) {
            return Err(DeviceError::Timeout);
        }
        let chunk = self
            .producer
            .write_chunk_uninit(needed)
            .map_err(|_| DeviceError::Timeout)?;
        chunk.fill_from_iter(samples.iter().copied());
        Ok(())
    }
}

/// Loop side of an input ring filled by a device callback
struct RingSource {
    consumer: Consumer<f32>,
    channels: usize,
    failed: Arc<AtomicBool>,
}

impl AudioSource for RingSource {
    fn read(&mut self, out: &mut [f32], timeout: Duration) -> Result<usize, DeviceError> {
        if self.failed.load(Ordering::Relaxed) || self.consumer.is_abandoned() {
            return Err(DeviceError::Disconnected);
        }
        let needed = out.len();
        let consumer = &self.consumer;
        if !wait_until(Instant::now() + timeout, || consumer.slots() >= needed) {
            return Err(DeviceError::Timeout);
        }
        let chunk = self.consumer.read_chunk(needed).map_err(|_| DeviceError::Timeout)?;
        let (first, second) = chunk.as_slices();
        out[..first.len()].copy_from_slice(first);
        out[first.len()..first.len() + second.len()].copy_from_slice(second);
        chunk.commit_all();
        Ok(needed / self.channels)
    }

    fn discard_pending(&mut self) {
        let stale = self.consumer.slots();
        if let Ok(chunk) = self.consumer.read_chunk(stale) {
            chunk.commit_all();
        }
    }
}

/// Backend over the default cpal host
pub struct CpalBackend {
    host: cpal::Host,
    output_device: Option<String>,
    input_device: Option<String>,
    output_stream: Option<cpal::Stream>,
    input_stream: Option<cpal::Stream>,
    failed: Arc<AtomicBool>,
}

impl CpalBackend {
    /// Use the default input and output devices
    pub fn new() -> Self {
        Self::with_devices(None, None)
    }

    /// Select devices by name; `None` means the host default
    pub fn with_devices(output_device: Option<String>, input_device: Option<String>) -> Self {
        Self {
            host: cpal::default_host(),
            output_device,
            input_device,
            output_stream: None,
            input_stream: None,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// List available output devices
    pub fn list_output_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let devices: Vec<_> = host
            .output_devices()
            .map_err(|e| DeviceError::ConfigError(e.to_string()))?
            .filter_map(|device| {
                let name = device.name().ok()?;
                let config = device.default_output_config().ok()?;
                Some(DeviceInfo {
                    id: name.clone(),
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rate: config.sample_rate().0,
                    channels: config.channels(),
                })
            })
            .collect();

        if devices.is_empty() {
            return Err(DeviceError::NoDevices);
        }
        info!(count = devices.len(), "Found audio output devices");
        Ok(devices)
    }

    /// List available input devices
    pub fn list_input_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let devices: Vec<_> = host
            .input_devices()
            .map_err(|e| DeviceError::ConfigError(e.to_string()))?
            .filter_map(|device| {
                let name = device.name().ok()?;
                let config = device.default_input_config().ok()?;
                Some(DeviceInfo {
                    id: name.clone(),
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rate: config.sample_rate().0,
                    channels: config.channels(),
                })
            })
            .collect();

        if devices.is_empty() {
            return Err(DeviceError::NoDevices);
        }
        info!(count = devices.len(), "Found audio input devices");
        Ok(devices)
    }

    fn find_device(&self, wanted: Option<&str>, input: bool) -> Result<Device, DeviceError> {
        let Some(wanted) = wanted.filter(|w| *w != "default") else {
            let device = if input {
                self.host.default_input_device()
            } else {
                self.host.default_output_device()
            };
            return device.ok_or(DeviceError::NoDevices);
        };

        let matches = |device: &Device| device.name().is_ok_and(|name| name == wanted);
        let found = if input {
            self.host
                .input_devices()
                .map_err(|e| DeviceError::ConfigError(e.to_string()))?
                .find(matches)
        } else {
            self.host
                .output_devices()
                .map_err(|e| DeviceError::ConfigError(e.to_string()))?
                .find(matches)
        };
        found.ok_or_else(|| DeviceError::DeviceNotFound(wanted.to_string()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a device config matching the engine's channel count and rate,
/// preferring f32 samples
fn pick_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    format: &EngineFormat,
) -> Result<SupportedStreamConfig, DeviceError> {
    ranges
        .filter(|r| {
            r.channels() == format.channels
                && r.min_sample_rate().0 <= format.sample_rate
                && format.sample_rate <= r.max_sample_rate().0
        })
        .max_by_key(|r| r.sample_format() == SampleFormat::F32)
        .map(|r| r.with_sample_rate(SampleRate(format.sample_rate)))
        .ok_or_else(|| {
            DeviceError::ConfigError(format!(
                "no config with {} channels at {} Hz",
                format.channels, format.sample_rate
            ))
        })
}

fn stream_config(format: &EngineFormat) -> StreamConfig {
    StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    }
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: Consumer<f32>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // whole frames only, so channels never swap after a short read
                let available = consumer.slots().min(data.len()) / channels * channels;
                let mut written = 0;
                if let Ok(chunk) = consumer.read_chunk(available) {
                    let (first, second) = chunk.as_slices();
                    for (out, &s) in data.iter_mut().zip(first.iter().chain(second)) {
                        *out = T::from_sample_(s);
                    }
                    written = available;
                    chunk.commit_all();
                }
                data[written..].fill(T::EQUILIBRIUM);
            },
            move |err| {
                error!("Output stream error: {}", err);
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| DeviceError::StreamError(e.to_string()))
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: Producer<f32>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // overflow drops the newest samples; the loop only reads while recording
                let room = producer.slots().min(data.len()) / channels * channels;
                if let Ok(chunk) = producer.write_chunk_uninit(room) {
                    chunk.fill_from_iter(data.iter().map(|s| f32::from_sample_(*s)));
                }
            },
            move |err| {
                error!("Input stream error: {}", err);
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| DeviceError::StreamError(e.to_string()))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open_output(&mut self, format: &EngineFormat) -> Result<Box<dyn AudioSink>, DeviceError> {
        let device = self.find_device(self.output_device.as_deref(), false)?;
        let ranges = device
            .supported_output_configs()
            .map_err(|e| DeviceError::ConfigError(e.to_string()))?;
        let supported = pick_config(ranges, format)?;
        let config = stream_config(format);

        let (producer, consumer) = RingBuffer::<f32>::new(format.samples_per_buffer() * RING_BUFFERS);
        self.failed.store(false, Ordering::Relaxed);
        let failed = self.failed.clone();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_output::<f32>(&device, &config, consumer, failed),
            SampleFormat::I16 => build_output::<i16>(&device, &config, consumer, failed),
            SampleFormat::I32 => build_output::<i32>(&device, &config, consumer, failed),
            other => return Err(DeviceError::ConfigError(format!("Unsupported format: {:?}", other))),
        }?;
        stream.play().map_err(|e| DeviceError::StreamError(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            sample_format = ?supported.sample_format(),
            "Started output stream"
        );
        self.output_stream = Some(stream);
        Ok(Box::new(RingSink { producer, failed: self.failed.clone() }))
    }

    fn open_input(&mut self, format: &EngineFormat) -> Result<Box<dyn AudioSource>, DeviceError> {
        let device = self.find_device(self.input_device.as_deref(), true)?;
        let ranges = device
            .supported_input_configs()
            .map_err(|e| DeviceError::ConfigError(e.to_string()))?;
        let supported = pick_config(ranges, format)?;
        let config = stream_config(format);

        let (producer, consumer) = RingBuffer::<f32>::new(format.samples_per_buffer() * RING_BUFFERS);
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_input::<f32>(&device, &config, producer, failed.clone()),
            SampleFormat::I16 => build_input::<i16>(&device, &config, producer, failed.clone()),
            SampleFormat::I32 => build_input::<i32>(&device, &config, producer, failed.clone()),
            other => return Err(DeviceError::ConfigError(format!("Unsupported format: {:?}", other))),
        }?;
        stream.play().map_err(|e| DeviceError::StreamError(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Started input stream"
        );
        self.input_stream = Some(stream);
        Ok(Box::new(RingSource {
            consumer,
            channels: format.channels.max(1) as usize,
            failed,
        }))
    }

    fn close(&mut self) {
        // dropping a stream drops its ring end, so loop-side handles see Disconnected
        let input = self.input_stream.take();
        let output = self.output_stream.take();
        if input.is_some() || output.is_some() {
            info!("Closed audio device streams");
        }
    }
}

/// Device-less backend. The sink sleeps out each period so the loop runs in
/// real time; the source yields silence.
#[derive(Debug)]
pub struct NullBackend {
    closed: Arc<AtomicBool>,
    paced: bool,
}

impl NullBackend {
    pub fn new() -> Self {
        Self { closed: Arc::new(AtomicBool::new(false)), paced: true }
    }

    /// Run as fast as possible instead of in real time
    pub fn unpaced() -> Self {
        Self { closed: Arc::new(AtomicBool::new(false)), paced: false }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct NullSink {
    period: Duration,
    paced: bool,
    next_deadline: Option<Instant>,
    closed: Arc<AtomicBool>,
}

impl AudioSink for NullSink {
    fn write(&mut self, _samples: &[f32], _timeout: Duration) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(DeviceError::Disconnected);
        }
        if !self.paced {
            return Ok(());
        }
        let now = Instant::now();
        let deadline = match self.next_deadline {
            // fell more than a period behind: resync instead of bursting
            Some(d) if d + self.period >= now => d,
            _ => now,
        };
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline + self.period);
        Ok(())
    }
}

struct NullSource {
    channels: usize,
    closed: Arc<AtomicBool>,
}

impl AudioSource for NullSource {
    fn read(&mut self, out: &mut [f32], _timeout: Duration) -> Result<usize, DeviceError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(DeviceError::Disconnected);
        }
        out.fill(0.0);
        Ok(out.len() / self.channels)
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn open_output(&mut self, format: &EngineFormat) -> Result<Box<dyn AudioSink>, DeviceError> {
        if self.closed.load(Ordering::Relaxed) {
            // handles from the previous session stay disconnected
            self.closed = Arc::new(AtomicBool::new(false));
        }
        Ok(Box::new(NullSink {
            period: format.period(),
            paced: self.paced,
            next_deadline: None,
            closed: self.closed.clone(),
        }))
    }

    fn open_input(&mut self, format: &EngineFormat) -> Result<Box<dyn AudioSource>, DeviceError> {
        Ok(Box::new(NullSource {
            channels: format.channels.max(1) as usize,
            closed: self.closed.clone(),
        }))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_paces_to_period() {
        let format = EngineFormat::new(44100, 2, 441); // 10 ms
        let mut backend = NullBackend::new();
        let mut sink = backend.open_output(&format).unwrap();
        let buf = vec![0.0; format.samples_per_buffer()];
        let start = Instant::now();
        for _ in 0..5 {
            sink.write(&buf, format.period()).unwrap();
        }
        // first write returns immediately, four more periods follow
        assert!(start.elapsed() >= Duration::from_millis(39));
    }

    #[test]
    fn test_null_source_silence_and_close() {
        let format = EngineFormat::new(44100, 2, 64);
        let mut backend = NullBackend::unpaced();
        let mut source = backend.open_input(&format).unwrap();
        let mut out = vec![1.0; 128];
        assert_eq!(source.read(&mut out, format.period()).unwrap(), 64);
        assert!(out.iter().all(|&s| s == 0.0));

        backend.close();
        assert!(matches!(source.read(&mut out, format.period()), Err(DeviceError::Disconnected)));
    }

    #[test]
    fn test_ring_sink_times_out_when_full() {
        let (producer, mut consumer) = RingBuffer::<f32>::new(8);
        let mut sink = RingSink { producer, failed: Arc::new(AtomicBool::new(false)) };
        sink.write(&[0.5; 8], Duration::from_millis(1)).unwrap();
        assert!(matches!(sink.write(&[0.5; 8], Duration::from_millis(2)), Err(DeviceError::Timeout)));
        assert_eq!(consumer.pop(), Ok(0.5));
    }

    #[test]
    fn test_ring_source_reads_whole_buffer() {
        let (mut producer, consumer) = RingBuffer::<f32>::new(16);
        let mut source = RingSource { consumer, channels: 2, failed: Arc::new(AtomicBool::new(false)) };
        let mut out = [0.0; 4];
        assert!(matches!(source.read(&mut out, Duration::from_millis(1)), Err(DeviceError::Timeout)));
        for s in [0.1, 0.2, 0.3, 0.4] {
            producer.push(s).unwrap();
        }
        assert_eq!(source.read(&mut out, Duration::from_millis(1)).unwrap(), 2);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_ring_source_discards_stale_input() {
        let (mut producer, consumer) = RingBuffer::<f32>::new(16);
        let mut source = RingSource { consumer, channels: 2, failed: Arc::new(AtomicBool::new(false)) };
        for _ in 0..12 {
            producer.push(0.9).unwrap();
        }
        source.discard_pending();
        for s in [0.1, 0.2, 0.3, 0.4] {
            producer.push(s).unwrap();
        }
        let mut out = [0.0; 4];
        assert_eq!(source.read(&mut out, Duration::from_millis(1)).unwrap(), 2);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }
}

//! Engine configuration and buffer format

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CadenzaError, Result};

/// Bits per sample of the captured-audio container
pub const RECORD_BITS_PER_SAMPLE: u16 = 16;

/// Buffer shape shared by every stage of the engine.
///
/// Immutable once the engine is initialized; changing it requires a full
/// shutdown and re-initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_frames: u32,
}

impl EngineFormat {
    pub fn new(sample_rate: u32, channels: u16, buffer_frames: u32) -> Self {
        Self { sample_rate, channels, buffer_frames }
    }

    /// Cycle period P = buffer_frames / sample_rate
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_frames as f64 / self.sample_rate as f64)
    }

    /// Interleaved samples per buffer
    pub fn samples_per_buffer(&self) -> usize {
        self.buffer_frames as usize * self.channels as usize
    }

    /// Cycles in one second of audio (the monitoring window), at least 1
    pub fn cycles_per_second(&self) -> u32 {
        (self.sample_rate / self.buffer_frames).max(1)
    }
}

impl Default for EngineFormat {
    fn default() -> Self {
        Self::new(44100, 2, 256)
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_frames: u32,
    pub master_gain: f32,
    pub max_tracks: usize,
    pub max_effects_per_track: usize,
    /// Capacity of the control -> audio command queue
    pub command_queue_capacity: usize,
    /// Seconds of audio the recorder queue can hold before dropping
    pub recorder_queue_secs: f32,
    pub recordings_dir: PathBuf,
    pub poll_interval_ms: u64,
    /// Try to elevate the audio thread's scheduling priority
    pub realtime_priority: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_frames: 256,
            master_gain: 1.0,
            max_tracks: 64,
            max_effects_per_track: 8,
            command_queue_capacity: 1024,
            recorder_queue_secs: 2.0,
            recordings_dir: PathBuf::from("recordings"),
            poll_interval_ms: 50,
            realtime_priority: true,
        }
    }
}

impl EngineConfig {
    pub fn format(&self) -> EngineFormat {
        EngineFormat::new(self.sample_rate, self.channels, self.buffer_frames)
    }

    /// Interleaved sample capacity of the recorder queue
    pub fn recorder_queue_samples(&self) -> usize {
        let samples = self.sample_rate as f32 * self.channels as f32 * self.recorder_queue_secs;
        (samples as usize).max(self.format().samples_per_buffer())
    }

    pub fn validate(&self) -> Result<()> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(invalid(format!("sample_rate {} outside 8000..=192000", self.sample_rate)));
        }
        if !(1..=8).contains(&self.channels) {
            return Err(invalid(format!("channels {} outside 1..=8", self.channels)));
        }
        if !(16..=8192).contains(&self.buffer_frames) {
            return Err(invalid(format!("buffer_frames {} outside 16..=8192", self.buffer_frames)));
        }
        if !self.master_gain.is_finite() || self.master_gain < 0.0 {
            return Err(invalid(format!("master_gain {} must be a non-negative number", self.master_gain)));
        }
        if self.max_tracks == 0 || self.max_effects_per_track == 0 {
            return Err(invalid("track and effect limits must be positive".to_string()));
        }
        if self.command_queue_capacity == 0 {
            return Err(invalid("command_queue_capacity must be positive".to_string()));
        }
        if self.recorder_queue_secs.is_nan() || self.recorder_queue_secs <= 0.0 {
            return Err(invalid(format!("recorder_queue_secs {} must be positive", self.recorder_queue_secs)));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> CadenzaError {
    CadenzaError::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_period() {
        let format = EngineFormat::new(44100, 2, 256);
        let period = format.period().as_secs_f64();
        assert!((period - 256.0 / 44100.0).abs() < 1e-9);
        assert_eq!(format.samples_per_buffer(), 512);
        assert_eq!(format.cycles_per_second(), 172);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig { channels: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(CadenzaError::InvalidConfig(_))));

        let config = EngineConfig { buffer_frames: 4, ..Default::default() };
        assert!(config.validate().is_err());

        let config = EngineConfig { recorder_queue_secs: f32::NAN, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recorder_queue_never_smaller_than_a_buffer() {
        let config = EngineConfig { recorder_queue_secs: 0.0001, ..Default::default() };
        assert_eq!(config.recorder_queue_samples(), 512);
    }
}

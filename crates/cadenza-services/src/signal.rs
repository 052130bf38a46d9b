//! Internally generated track signals
//!
//! Tracks that do not take the captured input render their working buffer
//! from a [`SignalGenerator`]. Generators are addressed by transport position
//! so seeking lands on the right sample.

use std::path::Path;

use tracing::{info, warn};

use crate::audio_buffer::AudioBuffer;

/// Produces one buffer of audio starting at `position` (in frames)
pub trait SignalGenerator: Send {
    fn name(&self) -> &str;
    /// Overwrite every sample of `out`. Must not allocate.
    fn render(&mut self, position: u64, out: &mut AudioBuffer);
}

/// Sine tone, identical on every channel
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    frequency_hz: f64,
    amplitude: f32,
    sample_rate: f64,
}

impl ToneGenerator {
    pub fn new(frequency_hz: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            frequency_hz: frequency_hz.max(0.0) as f64,
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate: sample_rate.max(1) as f64,
        }
    }
}

impl SignalGenerator for ToneGenerator {
    fn name(&self) -> &str {
        "Tone"
    }

    fn render(&mut self, position: u64, out: &mut AudioBuffer) {
        let step = self.frequency_hz / self.sample_rate;
        for (i, frame) in out.frames_iter_mut().enumerate() {
            // phase from the absolute frame index keeps blocks seamless
            let phase = ((position + i as u64) as f64 * step).fract();
            let value = (phase * std::f64::consts::TAU).sin() as f32 * self.amplitude;
            frame.fill(value);
        }
    }
}

/// Plays a preloaded clip from frame 0 of the timeline, then silence
#[derive(Debug, Clone)]
pub struct ClipPlayer {
    name: String,
    samples: Vec<f32>,
    channels: usize,
}

impl ClipPlayer {
    pub fn new(name: impl Into<String>, samples: Vec<f32>, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let mut samples = samples;
        samples.truncate(samples.len() / channels * channels);
        Self {
            name: name.into(),
            samples,
            channels,
        }
    }

    /// Load a WAV file. The clip is not resampled.
    pub fn from_wav(path: &Path, engine_sample_rate: u32) -> Result<Self, hound::Error> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect::<Result<_, _>>()?
            }
        };
        if spec.sample_rate != engine_sample_rate {
            warn!(
                clip_rate = spec.sample_rate,
                engine_rate = engine_sample_rate,
                "Clip sample rate differs from engine, playing unresampled"
            );
        }
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("clip")
            .to_string();
        info!(name = %name, frames = samples.len() / spec.channels.max(1) as usize, "Loaded clip");
        Ok(Self::new(name, samples, spec.channels))
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

impl SignalGenerator for ClipPlayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, position: u64, out: &mut AudioBuffer) {
        let total = self.frames() as u64;
        for (i, frame) in out.frames_iter_mut().enumerate() {
            let index = position + i as u64;
            if index >= total {
                frame.fill(0.0);
                continue;
            }
            let start = index as usize * self.channels;
            let src = &self.samples[start..start + self.channels];
            if self.channels == 1 {
                frame.fill(src[0]);
            } else {
                for (ch, sample) in frame.iter_mut().enumerate() {
                    *sample = if ch < self.channels { src[ch] } else { 0.0 };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_blocks_are_seamless() {
        let mut tone = ToneGenerator::new(440.0, 0.3, 44100);
        let mut whole = AudioBuffer::new(512, 2);
        tone.render(0, &mut whole);

        let mut a = AudioBuffer::new(256, 2);
        let mut b = AudioBuffer::new(256, 2);
        tone.render(0, &mut a);
        tone.render(256, &mut b);
        assert_eq!(&whole.as_slice()[..512], a.as_slice());
        assert_eq!(&whole.as_slice()[512..], b.as_slice());
        assert!(whole.peak() <= 0.3 + 1e-6);
    }

    #[test]
    fn test_clip_plays_then_silence() {
        let mut clip = ClipPlayer::new("c", vec![0.5, 0.25, 0.125], 1);
        let mut out = AudioBuffer::new(4, 2);
        clip.render(1, &mut out);
        assert_eq!(out.as_slice(), &[0.25, 0.25, 0.125, 0.125, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clip_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(-16384i16).unwrap();
        }
        writer.finalize().unwrap();

        let mut clip = ClipPlayer::from_wav(&path, 44100).unwrap();
        assert_eq!(clip.frames(), 10);
        assert_eq!(clip.name(), "kick");
        let mut out = AudioBuffer::new(2, 2);
        clip.render(0, &mut out);
        assert_eq!(out.as_slice(), &[0.5, -0.5, 0.5, -0.5]);
    }
}

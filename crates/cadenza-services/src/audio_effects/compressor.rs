//! Feed-forward compressor driven by a peak envelope follower

use cadenza_core::EngineFormat;
use fundsp::math::{amp_db, db_amp};

use super::EffectParam;
use crate::audio_buffer::AudioBuffer;

/// Envelope floor below which no gain reduction is computed
const ENVELOPE_FLOOR: f32 = 1.0e-6;

/// One-pole smoothing coefficient for a time constant in milliseconds
fn time_coeff(ms: f32, sample_rate: f32) -> f32 {
    (-1.0 / (ms.max(0.01) * 0.001 * sample_rate)).exp()
}

/// Compressor with stereo-linked detection.
///
/// Above threshold the gain reduction is `excess * (1 - 1/ratio)` dB, followed
/// by makeup gain. The envelope carries over between calls so block
/// boundaries are seamless.
#[derive(Debug)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
    makeup_gain_db: f32,
    sample_rate: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    reduction_db: f32,
    bypassed: bool,
}

impl Compressor {
    pub fn new(
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
        makeup_gain_db: f32,
        format: &EngineFormat,
    ) -> Self {
        let sample_rate = format.sample_rate as f32;
        Self {
            threshold_db,
            ratio: ratio.max(1.0),
            attack_ms,
            release_ms,
            makeup_gain_db,
            sample_rate,
            attack_coeff: time_coeff(attack_ms, sample_rate),
            release_coeff: time_coeff(release_ms, sample_rate),
            envelope: 0.0,
            reduction_db: 0.0,
            bypassed: false,
        }
    }

    pub fn set_params(
        &mut self,
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
        makeup_gain_db: f32,
    ) {
        self.threshold_db = threshold_db;
        self.ratio = ratio.max(1.0);
        self.makeup_gain_db = makeup_gain_db;
        if attack_ms != self.attack_ms {
            self.attack_ms = attack_ms;
            self.attack_coeff = time_coeff(attack_ms, self.sample_rate);
        }
        if release_ms != self.release_ms {
            self.release_ms = release_ms;
            self.release_coeff = time_coeff(release_ms, self.sample_rate);
        }
    }

    pub fn params(&self) -> (f32, f32, f32, f32, f32) {
        (self.threshold_db, self.ratio, self.attack_ms, self.release_ms, self.makeup_gain_db)
    }

    /// Gain reduction applied to the last processed frame, in dB
    pub fn reduction_db(&self) -> f32 {
        self.reduction_db
    }

    /// Static gain reduction in dB for a detector level in dB
    pub fn gain_reduction_db(&self, level_db: f32) -> f32 {
        let excess = level_db - self.threshold_db;
        if excess <= 0.0 {
            return 0.0;
        }
        excess * (1.0 - 1.0 / self.ratio)
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        for frame in buffer.frames_iter_mut() {
            let level = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            let coeff = if level > self.envelope { self.attack_coeff } else { self.release_coeff };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            self.reduction_db = if self.envelope > ENVELOPE_FLOOR {
                self.gain_reduction_db(amp_db(self.envelope))
            } else {
                0.0
            };
            let gain = db_amp(self.makeup_gain_db - self.reduction_db);
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.reduction_db = 0.0;
    }

    pub fn get_params(&self) -> Vec<EffectParam> {
        vec![
            EffectParam::new("threshold", self.threshold_db, -60.0, 0.0, "dB"),
            EffectParam::new("ratio", self.ratio, 1.0, 20.0, ":1"),
            EffectParam::new("attack", self.attack_ms, 0.1, 200.0, "ms"),
            EffectParam::new("release", self.release_ms, 1.0, 2000.0, "ms"),
            EffectParam::new("makeup", self.makeup_gain_db, 0.0, 24.0, "dB"),
        ]
    }

    pub fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    pub fn is_bypassed(&self) -> bool { self.bypassed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> EngineFormat {
        EngineFormat::new(44100, 2, 256)
    }

    fn tone(frames: usize, amplitude: f32) -> AudioBuffer {
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 44100.0).sin() * amplitude;
            samples.push(s);
            samples.push(s);
        }
        AudioBuffer::from_interleaved(samples, 2)
    }

    #[test]
    fn test_static_curve() {
        let comp = Compressor::new(-20.0, 4.0, 10.0, 100.0, 0.0, &format());
        assert_eq!(comp.gain_reduction_db(-30.0), 0.0);
        assert!((comp.gain_reduction_db(-8.0) - 9.0).abs() < 1e-5);
    }

    #[test]
    fn test_below_threshold_is_untouched() {
        let mut comp = Compressor::new(-6.0, 4.0, 5.0, 50.0, 0.0, &format());
        let input = tone(1024, 0.1);
        let mut out = input.clone();
        comp.process(&mut out);
        for (a, b) in input.as_slice().iter().zip(out.as_slice()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = Compressor::new(-20.0, 8.0, 1.0, 50.0, 0.0, &format());
        let mut buf = tone(4410, 0.9);
        comp.process(&mut buf);
        let tail_peak = buf.as_slice()[4000..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail_peak < 0.5, "tail peak {tail_peak}");
        assert!(comp.reduction_db() > 6.0);
    }

    #[test]
    fn test_block_boundary_is_continuous() {
        let input = tone(512, 0.8);

        let mut whole = Compressor::new(-18.0, 4.0, 10.0, 100.0, 3.0, &format());
        let mut expected = input.clone();
        whole.process(&mut expected);

        let mut split = Compressor::new(-18.0, 4.0, 10.0, 100.0, 3.0, &format());
        let (first, second) = input.as_slice().split_at(512);
        let mut a = AudioBuffer::from_interleaved(first.to_vec(), 2);
        let mut b = AudioBuffer::from_interleaved(second.to_vec(), 2);
        split.process(&mut a);
        split.process(&mut b);

        let joined: Vec<f32> = a.as_slice().iter().chain(b.as_slice()).copied().collect();
        assert_eq!(joined, expected.as_slice());

        // the step across the boundary is no larger than the steepest step of the input
        let max_input_step = input
            .as_slice()
            .windows(4)
            .map(|w| (w[2] - w[0]).abs())
            .fold(0.0f32, f32::max);
        let boundary_step = (b.as_slice()[0] - a.as_slice()[510]).abs();
        assert!(boundary_step <= max_input_step * db_amp(3.0) + 1e-4);
    }
}

//! Comb/allpass network reverb

use std::fmt;

use cadenza_core::EngineFormat;

use super::EffectParam;
use crate::audio_buffer::AudioBuffer;

/// Comb lengths in samples at 44.1 kHz
const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
/// Offset applied to odd channels to decorrelate them
const STEREO_SPREAD: usize = 23;
const ALLPASS_FEEDBACK: f32 = 0.5;
/// One-pole damping inside each comb loop
const DAMPING: f32 = 0.2;

/// Loop gain for a decay/room pair. Never reaches 1.0 inside the legal
/// parameter ranges, so the combs always decay.
pub fn loop_feedback(room_size: f32, decay: f32) -> f32 {
    decay.clamp(0.0, 1.0) * (0.5 + 0.48 * room_size.clamp(0.0, 1.0))
}

#[derive(Clone)]
struct Comb {
    buf: Vec<f32>,
    pos: usize,
    filter_store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self { buf: vec![0.0; len.max(1)], pos: 0, filter_store: 0.0 }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32) -> f32 {
        let out = self.buf[self.pos];
        self.filter_store = out * (1.0 - DAMPING) + self.filter_store * DAMPING;
        self.buf[self.pos] = input + self.filter_store * feedback;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
        }
        out
    }

    fn clear(&mut self) {
        self.buf.fill(0.0);
        self.pos = 0;
        self.filter_store = 0.0;
    }
}

#[derive(Clone)]
struct Allpass {
    buf: Vec<f32>,
    pos: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self { buf: vec![0.0; len.max(1)], pos: 0 }
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        let delayed = self.buf[self.pos];
        self.buf[self.pos] = input + delayed * ALLPASS_FEEDBACK;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
        }
        delayed - input
    }

    fn clear(&mut self) {
        self.buf.fill(0.0);
        self.pos = 0;
    }
}

struct ReverbChannel {
    combs: [Comb; 4],
    allpasses: [Allpass; 2],
}

impl ReverbChannel {
    fn new(sample_rate: u32, spread: usize) -> Self {
        let scale = |len: usize| (len as f64 * sample_rate as f64 / 44100.0) as usize + spread;
        Self {
            combs: std::array::from_fn(|i| Comb::new(scale(COMB_TUNING[i]))),
            allpasses: std::array::from_fn(|i| Allpass::new(scale(ALLPASS_TUNING[i]))),
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32) -> f32 {
        let mut wet = 0.0;
        for comb in &mut self.combs {
            wet += comb.tick(input, feedback);
        }
        // unity gain at DC whatever the feedback
        wet *= (1.0 - feedback) / self.combs.len() as f32;
        for allpass in &mut self.allpasses {
            wet = allpass.tick(wet);
        }
        wet
    }
}

/// Reverb with one comb/allpass network per channel.
///
/// Delay lines are sized once at construction; parameter changes only move
/// the loop gain and the mix.
pub struct Reverb {
    room_size: f32,
    decay: f32,
    wet_level: f32,
    feedback: f32,
    channels: Vec<ReverbChannel>,
    bypassed: bool,
}

impl Reverb {
    pub fn new(room_size: f32, decay: f32, wet_level: f32, format: &EngineFormat) -> Self {
        let channels = (0..format.channels.max(1) as usize)
            .map(|ch| ReverbChannel::new(format.sample_rate, if ch % 2 == 1 { STEREO_SPREAD } else { 0 }))
            .collect();
        Self {
            room_size: room_size.clamp(0.0, 1.0),
            decay: decay.clamp(0.0, 1.0),
            wet_level: wet_level.clamp(0.0, 1.0),
            feedback: loop_feedback(room_size, decay),
            channels,
            bypassed: false,
        }
    }

    pub fn set_params(&mut self, room_size: f32, decay: f32, wet_level: f32) {
        self.room_size = room_size.clamp(0.0, 1.0);
        self.decay = decay.clamp(0.0, 1.0);
        self.wet_level = wet_level.clamp(0.0, 1.0);
        self.feedback = loop_feedback(self.room_size, self.decay);
    }

    pub fn params(&self) -> (f32, f32, f32) {
        (self.room_size, self.decay, self.wet_level)
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        let dry_gain = 1.0 - self.wet_level;
        for frame in buffer.frames_iter_mut() {
            for (sample, channel) in frame.iter_mut().zip(self.channels.iter_mut()) {
                let dry = *sample;
                let wet = channel.tick(dry, self.feedback);
                *sample = dry * dry_gain + wet * self.wet_level;
            }
        }
    }

    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.combs.iter_mut().for_each(Comb::clear);
            channel.allpasses.iter_mut().for_each(Allpass::clear);
        }
    }

    pub fn get_params(&self) -> Vec<EffectParam> {
        vec![
            EffectParam::new("room_size", self.room_size, 0.0, 1.0, ""),
            EffectParam::new("decay", self.decay, 0.0, 1.0, ""),
            EffectParam::new("wet", self.wet_level, 0.0, 1.0, ""),
        ]
    }

    pub fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    pub fn is_bypassed(&self) -> bool { self.bypassed }
}

impl fmt::Debug for Reverb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reverb")
            .field("room_size", &self.room_size)
            .field("decay", &self.decay)
            .field("wet_level", &self.wet_level)
            .field("bypassed", &self.bypassed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> EngineFormat {
        EngineFormat::new(44100, 2, 256)
    }

    #[test]
    fn test_feedback_below_unity_everywhere() {
        for r in 0..=10 {
            for d in 0..=10 {
                let fb = loop_feedback(r as f32 / 10.0, d as f32 / 10.0);
                assert!((0.0..1.0).contains(&fb), "room {r} decay {d} -> {fb}");
            }
        }
        // out of range inputs are clamped first
        assert!(loop_feedback(5.0, 5.0) < 1.0);
    }

    #[test]
    fn test_impulse_decays_at_max_settings() {
        let mut reverb = Reverb::new(1.0, 1.0, 1.0, &format());
        let mut buf = AudioBuffer::new(256, 2);
        buf.as_mut_slice()[0] = 1.0;
        buf.as_mut_slice()[1] = 1.0;
        reverb.process(&mut buf);

        let mut last_peak = 0.0;
        for _ in 0..2000 {
            buf.silence();
            reverb.process(&mut buf);
            assert!(buf.is_finite());
            last_peak = buf.peak();
        }
        // roughly 11.6 s of tail
        assert!(last_peak < 1e-3, "tail {last_peak}");
    }

    #[test]
    fn test_dry_only_when_wet_is_zero() {
        let mut reverb = Reverb::new(0.8, 0.9, 0.0, &format());
        let input = AudioBuffer::from_interleaved((0..512).map(|i| (i as f32 * 0.01).sin()).collect(), 2);
        let mut out = input.clone();
        reverb.process(&mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn test_split_blocks_match_single_pass() {
        let samples: Vec<f32> = (0..1024)
            .map(|i| (2.0 * std::f32::consts::PI * 330.0 * (i / 2) as f32 / 44100.0).sin() * 0.5)
            .collect();
        let input = AudioBuffer::from_interleaved(samples, 2);

        let mut whole = Reverb::new(0.6, 0.7, 0.4, &format());
        let mut expected = input.clone();
        whole.process(&mut expected);

        let mut split = Reverb::new(0.6, 0.7, 0.4, &format());
        let (first, second) = input.as_slice().split_at(512);
        let mut a = AudioBuffer::from_interleaved(first.to_vec(), 2);
        let mut b = AudioBuffer::from_interleaved(second.to_vec(), 2);
        split.process(&mut a);
        split.process(&mut b);

        let joined: Vec<f32> = a.as_slice().iter().chain(b.as_slice()).copied().collect();
        assert_eq!(joined, expected.as_slice());
    }

    #[test]
    fn test_set_params_keeps_tail() {
        let mut reverb = Reverb::new(0.5, 0.8, 1.0, &format());
        let mut buf = AudioBuffer::new(2048, 2);
        buf.as_mut_slice().fill(0.5);
        reverb.process(&mut buf);
        reverb.set_params(0.9, 0.9, 1.0);
        buf.silence();
        reverb.process(&mut buf);
        assert!(buf.peak() > 0.0);
    }
}

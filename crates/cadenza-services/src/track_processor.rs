//! Per-track signal path: source, effect chain, pan and gain

use std::fmt;

use cadenza_core::{
    pan_gains, validate_gain, validate_pan, EngineFormat, SourceConfig, Track, TrackId, TrackKind,
};

use crate::audio_buffer::AudioBuffer;
use crate::audio_effects::EffectChain;
use crate::signal::{SignalGenerator, ToneGenerator};

/// Where the working buffer is filled from each cycle
pub enum TrackInput {
    /// The cycle's capture buffer (silence when nothing was captured)
    Capture,
    Generator(Box<dyn SignalGenerator>),
    Silence,
}

impl TrackInput {
    pub fn from_source(source: &SourceConfig, format: &EngineFormat) -> Self {
        match *source {
            SourceConfig::Input => Self::Capture,
            SourceConfig::Tone { frequency_hz, amplitude } => {
                Self::Generator(Box::new(ToneGenerator::new(frequency_hz, amplitude, format.sample_rate)))
            }
            SourceConfig::Silence => Self::Silence,
        }
    }
}

impl fmt::Debug for TrackInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => f.write_str("Capture"),
            Self::Generator(g) => f.debug_tuple("Generator").field(&g.name()).finish(),
            Self::Silence => f.write_str("Silence"),
        }
    }
}

/// Failure of one track for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFault {
    /// The chain produced NaN or infinity; its state has been cleared
    NonFinite,
}

/// Owns one track's working buffer, mix parameters and effect chain.
///
/// Built on the control side and handed to the audio thread whole. Every
/// buffer is sized at construction, so [`TrackProcessor::process`] never
/// allocates.
#[derive(Debug)]
pub struct TrackProcessor {
    id: TrackId,
    index: u32,
    kind: TrackKind,
    gain: f32,
    pan: f32,
    pan_gains: (f32, f32),
    mute: bool,
    solo: bool,
    record_enabled: bool,
    chain: EffectChain,
    work: AudioBuffer,
    input: TrackInput,
}

impl TrackProcessor {
    pub fn new(track: &Track, format: &EngineFormat, max_effects: usize) -> Self {
        Self::with_input(track, format, max_effects, TrackInput::from_source(&track.source, format))
    }

    pub fn with_input(track: &Track, format: &EngineFormat, max_effects: usize, input: TrackInput) -> Self {
        Self {
            id: track.id,
            index: track.index,
            kind: track.kind,
            gain: track.gain,
            pan: track.pan,
            pan_gains: pan_gains(track.pan),
            mute: track.mute,
            solo: track.solo,
            record_enabled: track.record_enabled,
            chain: EffectChain::from_configs(&track.effects, format, max_effects),
            work: AudioBuffer::for_format(format),
            input,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    pub fn is_record_enabled(&self) -> bool {
        self.record_enabled
    }

    /// Non-finite values leave the gain unchanged
    pub fn set_gain(&mut self, gain: f32) {
        if let Ok(gain) = validate_gain(gain) {
            self.gain = gain;
        }
    }

    /// Non-finite values leave the pan unchanged
    pub fn set_pan(&mut self, pan: f32) {
        if let Ok(pan) = validate_pan(pan) {
            self.pan = pan;
            self.pan_gains = pan_gains(pan);
        }
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    pub fn set_record_enabled(&mut self, enabled: bool) {
        self.record_enabled = enabled;
    }

    pub fn is_audible(&self, any_solo: bool) -> bool {
        cadenza_core::is_audible(self.mute, self.solo, any_solo)
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut EffectChain {
        &mut self.chain
    }

    /// Render this track's contribution and add it into `accumulator`.
    ///
    /// `input` is the cycle's interleaved capture buffer, possibly empty.
    /// On a fault nothing is added and the chain state is cleared.
    pub fn process(
        &mut self,
        input: &[f32],
        accumulator: &mut AudioBuffer,
        position: u64,
    ) -> Result<(), TrackFault> {
        match &mut self.input {
            TrackInput::Capture => self.work.copy_from(input),
            TrackInput::Generator(generator) => generator.render(position, &mut self.work),
            TrackInput::Silence => self.work.silence(),
        }

        self.chain.process(&mut self.work);

        if !self.work.is_finite() {
            self.chain.reset();
            return Err(TrackFault::NonFinite);
        }

        let (left, right) = self.pan_gains;
        let (left, right) = (left * self.gain, right * self.gain);
        let gain = self.gain;
        let stereo = self.work.channels() >= 2;

        for (acc, frame) in accumulator.frames_iter_mut().zip(self.work.frames_iter()) {
            if stereo {
                acc[0] += frame[0] * left;
                acc[1] += frame[1] * right;
                for (a, s) in acc.iter_mut().zip(frame).skip(2) {
                    *a += s * gain;
                }
            } else {
                for (a, s) in acc.iter_mut().zip(frame) {
                    *a += s * gain;
                }
            }
        }
        Ok(())
    }

    /// Clear effect state, e.g. after a seek
    pub fn reset(&mut self) {
        self.chain.reset();
    }
}

#[cfg(test)]
mod tests {
    use cadenza_core::{EffectConfig, TrackConfig};

    use super::*;

    fn format() -> EngineFormat {
        EngineFormat::new(44100, 2, 64)
    }

    fn processor(config: TrackConfig) -> TrackProcessor {
        let track = Track::new(TrackId(1), 0, config).unwrap();
        TrackProcessor::new(&track, &format(), 4)
    }

    struct NanGenerator;

    impl SignalGenerator for NanGenerator {
        fn name(&self) -> &str {
            "nan"
        }

        fn render(&mut self, _position: u64, out: &mut AudioBuffer) {
            out.as_mut_slice().fill(f32::NAN);
        }
    }

    #[test]
    fn test_output_never_exceeds_input_times_gain() {
        let input = vec![1.0f32; 128];
        for gain in [0.0, 0.5, 1.0, 1.7, 2.0] {
            for pan in [-1.0, -0.3, 0.0, 0.6, 1.0] {
                let mut config = TrackConfig::new("t");
                config.gain = gain;
                config.pan = pan;
                let mut track = processor(config);
                let mut acc = AudioBuffer::for_format(&format());
                track.process(&input, &mut acc, 0).unwrap();
                assert!(acc.peak() <= gain + 1e-6, "gain {gain} pan {pan} peak {}", acc.peak());
            }
        }
    }

    #[test]
    fn test_hard_left_pan() {
        let mut config = TrackConfig::new("t");
        config.pan = -1.0;
        let mut track = processor(config);
        let mut acc = AudioBuffer::for_format(&format());
        track.process(&[0.5; 128], &mut acc, 0).unwrap();
        for frame in acc.frames_iter() {
            assert!((frame[0] - 0.5).abs() < 1e-6);
            assert!(frame[1].abs() < 1e-6);
        }
    }

    #[test]
    fn test_accumulates_instead_of_overwriting() {
        let mut track = processor(TrackConfig::new("t"));
        let mut acc = AudioBuffer::for_format(&format());
        acc.as_mut_slice().fill(0.25);
        track.process(&[], &mut acc, 0).unwrap();
        // empty capture means silence, so the accumulator is untouched
        assert!(acc.as_slice().iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_non_finite_output_is_rejected() {
        let track = Track::new(TrackId(3), 0, TrackConfig::new("bad").with_effect(EffectConfig::reverb_default())).unwrap();
        let mut proc = TrackProcessor::with_input(&track, &format(), 4, TrackInput::Generator(Box::new(NanGenerator)));
        let mut acc = AudioBuffer::for_format(&format());
        assert_eq!(proc.process(&[], &mut acc, 0), Err(TrackFault::NonFinite));
        assert!(acc.as_slice().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_tone_source() {
        let mut track = processor(TrackConfig::new("tone").with_source(SourceConfig::test_tone()));
        let mut acc = AudioBuffer::for_format(&format());
        track.process(&[], &mut acc, 100).unwrap();
        assert!(acc.peak() > 0.0);
        assert!(acc.peak() <= 0.3);
    }

    #[test]
    fn test_setters_ignore_non_finite() {
        let mut track = processor(TrackConfig::new("t"));
        track.set_gain(1.5);
        track.set_gain(f32::NAN);
        assert_eq!(track.gain(), 1.5);
        track.set_pan(9.0);
        assert_eq!(track.pan(), 1.0);
        track.set_pan(f32::INFINITY);
        assert_eq!(track.pan(), 1.0);
    }
}

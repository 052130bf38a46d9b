//! Master bus: gain, hard clamp and metering

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio_buffer::AudioBuffer;

/// Shared master metering state (lock-free reads from the control side)
pub struct MeterState {
    peak_raw: AtomicU32,
    rms_raw: AtomicU32,
    clipped: AtomicBool,
}

impl MeterState {
    fn new() -> Self {
        Self {
            peak_raw: AtomicU32::new(0),
            rms_raw: AtomicU32::new(0),
            clipped: AtomicBool::new(false),
        }
    }

    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak_raw.load(Ordering::Relaxed))
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms_raw.load(Ordering::Relaxed))
    }

    /// Whether the master clamp engaged since the last [`MeterState::clear_clip`]
    pub fn is_clipped(&self) -> bool {
        self.clipped.load(Ordering::Relaxed)
    }

    pub fn clear_clip(&self) {
        self.clipped.store(false, Ordering::Relaxed);
    }

    fn set_peak(&self, val: f32) {
        self.peak_raw.store(val.to_bits(), Ordering::Relaxed);
    }

    fn set_rms(&self, val: f32) {
        self.rms_raw.store(val.to_bits(), Ordering::Relaxed);
    }

    fn set_clipped(&self) {
        self.clipped.store(true, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.set_peak(0.0);
        self.set_rms(0.0);
    }
}

impl Default for MeterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies master gain to the summed tracks and clamps to [-1, 1].
///
/// Overflow is clamped, never renormalized.
pub struct Mixer {
    master_gain: f32,
    meter: Arc<MeterState>,
    peak_hold: f32,
}

const PEAK_DECAY: f32 = 0.95;

impl Mixer {
    pub fn new(master_gain: f32) -> Self {
        Self {
            master_gain: sanitize_gain(master_gain),
            meter: Arc::new(MeterState::new()),
            peak_hold: 0.0,
        }
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = sanitize_gain(gain);
    }

    pub fn meter(&self) -> Arc<MeterState> {
        self.meter.clone()
    }

    /// Returns the number of samples that had to be clamped
    pub fn process(&mut self, mix: &mut AudioBuffer) -> usize {
        let mut clipped = 0;
        let mut peak = 0.0f32;
        let mut sum_sq = 0.0f32;

        for sample in mix.as_mut_slice() {
            let scaled = *sample * self.master_gain;
            // NaN also lands here and is silenced
            let out = if scaled.is_nan() { 0.0 } else { scaled.clamp(-1.0, 1.0) };
            if out != scaled {
                clipped += 1;
            }
            peak = peak.max(out.abs());
            sum_sq += out * out;
            *sample = out;
        }

        self.peak_hold = peak.max(self.peak_hold * PEAK_DECAY);
        self.meter.set_peak(self.peak_hold);
        if !mix.is_empty() {
            self.meter.set_rms((sum_sq / mix.len() as f32).sqrt());
        }
        if clipped > 0 {
            self.meter.set_clipped();
        }
        clipped
    }
}

fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_finite() { gain.max(0.0) } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_gain_clamps_not_wraps() {
        let mut mixer = Mixer::new(1.5);
        let mut mix = AudioBuffer::from_interleaved(vec![1.0, -1.0, 0.5, -0.5], 2);
        let clipped = mixer.process(&mut mix);
        assert_eq!(mix.as_slice(), &[1.0, -1.0, 0.75, -0.75]);
        assert_eq!(clipped, 2);
        assert!(mixer.meter().is_clipped());
        assert_eq!(mixer.meter().peak(), 1.0);
    }

    #[test]
    fn test_unity_gain_passes_through() {
        let mut mixer = Mixer::new(1.0);
        let mut mix = AudioBuffer::from_interleaved(vec![0.1, -0.2, 0.3, -0.4], 2);
        assert_eq!(mixer.process(&mut mix), 0);
        assert_eq!(mix.as_slice(), &[0.1, -0.2, 0.3, -0.4]);
        assert!(!mixer.meter().is_clipped());
    }

    #[test]
    fn test_nan_is_silenced() {
        let mut mixer = Mixer::new(1.0);
        let mut mix = AudioBuffer::from_interleaved(vec![f32::NAN, 0.5], 2);
        mixer.process(&mut mix);
        assert_eq!(mix.as_slice(), &[0.0, 0.5]);
    }

    #[test]
    fn test_invalid_master_gain_falls_back() {
        let mut mixer = Mixer::new(f32::NAN);
        assert_eq!(mixer.master_gain(), 1.0);
        mixer.set_master_gain(-2.0);
        assert_eq!(mixer.master_gain(), 0.0);
    }
}

//! Three-band equalizer: low shelf, mid peak, high shelf in series

use cadenza_core::EngineFormat;

use super::EffectParam;
use crate::audio_buffer::AudioBuffer;

const LOW_SHELF_HZ: f64 = 100.0;
const MID_PEAK_HZ: f64 = 1000.0;
const MID_Q: f64 = 0.7;
const HIGH_SHELF_HZ: f64 = 10_000.0;
/// Shelf slope
const SHELF_S: f64 = 0.9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    fn low_shelf(freq: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let (cos_w0, alpha) = shelf_terms(freq, a, sample_rate);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha) / a0,
        }
    }

    fn peaking(freq: f64, gain_db: f64, q: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * clamp_freq(freq, sample_rate) / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn high_shelf(freq: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let (cos_w0, alpha) = shelf_terms(freq, a, sample_rate);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha) / a0,
        }
    }
}

fn shelf_terms(freq: f64, a: f64, sample_rate: f64) -> (f64, f64) {
    let w0 = 2.0 * std::f64::consts::PI * clamp_freq(freq, sample_rate) / sample_rate;
    let alpha = w0.sin() / 2.0 * ((a + 1.0 / a) * (1.0 / SHELF_S - 1.0) + 2.0).sqrt();
    (w0.cos(), alpha)
}

/// Keep band centers below Nyquist at low sample rates
fn clamp_freq(freq: f64, sample_rate: f64) -> f64 {
    freq.min(sample_rate * 0.45)
}

/// Transposed direct form II state
#[derive(Debug, Clone, Copy, Default)]
struct TdfState {
    s1: f64,
    s2: f64,
}

impl TdfState {
    #[inline]
    fn tick(&mut self, x: f64, c: &BiquadCoeffs) -> f64 {
        let y = c.b0 * x + self.s1;
        self.s1 = c.b1 * x - c.a1 * y + self.s2;
        self.s2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// 3-band EQ with per-channel filter state.
///
/// Coefficients are derived only when a band gain changes.
#[derive(Debug)]
pub struct Eq3Band {
    low_gain_db: f32,
    mid_gain_db: f32,
    high_gain_db: f32,
    sample_rate: f64,
    coeffs: [BiquadCoeffs; 3],
    state: Vec<[TdfState; 3]>,
    bypassed: bool,
}

impl Eq3Band {
    pub fn new(low_gain_db: f32, mid_gain_db: f32, high_gain_db: f32, format: &EngineFormat) -> Self {
        let sample_rate = format.sample_rate as f64;
        let mut eq = Self {
            low_gain_db,
            mid_gain_db,
            high_gain_db,
            sample_rate,
            coeffs: [BiquadCoeffs::default(); 3],
            state: vec![[TdfState::default(); 3]; format.channels.max(1) as usize],
            bypassed: false,
        };
        eq.coeffs = [
            BiquadCoeffs::low_shelf(LOW_SHELF_HZ, low_gain_db as f64, sample_rate),
            BiquadCoeffs::peaking(MID_PEAK_HZ, mid_gain_db as f64, MID_Q, sample_rate),
            BiquadCoeffs::high_shelf(HIGH_SHELF_HZ, high_gain_db as f64, sample_rate),
        ];
        eq
    }

    pub fn gains_db(&self) -> (f32, f32, f32) {
        (self.low_gain_db, self.mid_gain_db, self.high_gain_db)
    }

    /// Update band gains, recomputing only the sections that changed
    pub fn set_gains(&mut self, low_gain_db: f32, mid_gain_db: f32, high_gain_db: f32) {
        if low_gain_db != self.low_gain_db {
            self.low_gain_db = low_gain_db;
            self.coeffs[0] = BiquadCoeffs::low_shelf(LOW_SHELF_HZ, low_gain_db as f64, self.sample_rate);
        }
        if mid_gain_db != self.mid_gain_db {
            self.mid_gain_db = mid_gain_db;
            self.coeffs[1] = BiquadCoeffs::peaking(MID_PEAK_HZ, mid_gain_db as f64, MID_Q, self.sample_rate);
        }
        if high_gain_db != self.high_gain_db {
            self.high_gain_db = high_gain_db;
            self.coeffs[2] = BiquadCoeffs::high_shelf(HIGH_SHELF_HZ, high_gain_db as f64, self.sample_rate);
        }
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        for frame in buffer.frames_iter_mut() {
            for (sample, state) in frame.iter_mut().zip(self.state.iter_mut()) {
                let mut x = *sample as f64;
                for (section, coeffs) in state.iter_mut().zip(self.coeffs.iter()) {
                    x = section.tick(x, coeffs);
                }
                *sample = x as f32;
            }
        }
    }

    pub fn reset(&mut self) {
        for channel in &mut self.state {
            *channel = [TdfState::default(); 3];
        }
    }

    pub fn get_params(&self) -> Vec<EffectParam> {
        vec![
            EffectParam::new("low", self.low_gain_db, -24.0, 24.0, "dB"),
            EffectParam::new("mid", self.mid_gain_db, -24.0, 24.0, "dB"),
            EffectParam::new("high", self.high_gain_db, -24.0, 24.0, "dB"),
        ]
    }

    pub fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    pub fn is_bypassed(&self) -> bool { self.bypassed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, channels: usize, freq: f32, sample_rate: f32) -> AudioBuffer {
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let s = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin() * 0.5;
            samples.extend(std::iter::repeat_n(s, channels));
        }
        AudioBuffer::from_interleaved(samples, channels)
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let format = EngineFormat::new(44100, 2, 256);
        let mut eq = Eq3Band::new(0.0, 0.0, 0.0, &format);
        let input = sine(256, 2, 440.0, 44100.0);
        let mut out = input.clone();
        eq.process(&mut out);
        for (a, b) in input.as_slice().iter().zip(out.as_slice()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_split_blocks_match_single_pass() {
        let format = EngineFormat::new(44100, 2, 256);
        let input = sine(512, 2, 220.0, 44100.0);

        let mut whole = Eq3Band::new(6.0, -3.0, 4.0, &format);
        let mut expected = input.clone();
        whole.process(&mut expected);

        let mut split = Eq3Band::new(6.0, -3.0, 4.0, &format);
        let (first, second) = input.as_slice().split_at(512);
        let mut a = AudioBuffer::from_interleaved(first.to_vec(), 2);
        let mut b = AudioBuffer::from_interleaved(second.to_vec(), 2);
        split.process(&mut a);
        split.process(&mut b);

        let joined: Vec<f32> = a.as_slice().iter().chain(b.as_slice()).copied().collect();
        assert_eq!(joined, expected.as_slice());
    }

    #[test]
    fn test_low_boost_raises_bass() {
        let format = EngineFormat::new(44100, 1, 256);
        let mut eq = Eq3Band::new(12.0, 0.0, 0.0, &format);
        let mut buf = sine(8192, 1, 40.0, 44100.0);
        eq.process(&mut buf);
        // skip the transient, then compare against the 0.5 input amplitude
        let settled = &buf.as_slice()[4096..];
        let peak = settled.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 1.0, "peak {peak}");
    }

    #[test]
    fn test_set_gains_only_touches_changed_band() {
        let format = EngineFormat::new(48000, 2, 128);
        let mut eq = Eq3Band::new(0.0, 0.0, 0.0, &format);
        let before = eq.coeffs;
        eq.set_gains(0.0, 5.0, 0.0);
        assert_eq!(eq.coeffs[0], before[0]);
        assert_ne!(eq.coeffs[1], before[1]);
        assert_eq!(eq.coeffs[2], before[2]);
        assert_eq!(eq.gains_db(), (0.0, 5.0, 0.0));
    }
}

//! Effect unit configuration

use serde::{Deserialize, Serialize};

/// Gain range of each EQ band in dB
pub const EQ_GAIN_RANGE_DB: (f32, f32) = (-24.0, 24.0);

/// Kind of a configured effect unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    Eq3Band,
    Compressor,
    Reverb,
}

/// Parameters of one effect unit in a track's chain.
///
/// Plain data only so an update can be handed to the audio thread by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectConfig {
    Eq3Band {
        low_gain_db: f32,
        mid_gain_db: f32,
        high_gain_db: f32,
    },
    Compressor {
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
        makeup_gain_db: f32,
    },
    Reverb {
        room_size: f32,
        decay: f32,
        wet_level: f32,
    },
}

impl EffectConfig {
    pub fn eq_flat() -> Self {
        Self::Eq3Band {
            low_gain_db: 0.0,
            mid_gain_db: 0.0,
            high_gain_db: 0.0,
        }
    }

    pub fn compressor_default() -> Self {
        Self::Compressor {
            threshold_db: -18.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            makeup_gain_db: 0.0,
        }
    }

    pub fn reverb_default() -> Self {
        Self::Reverb {
            room_size: 0.5,
            decay: 0.5,
            wet_level: 0.25,
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Eq3Band { .. } => EffectKind::Eq3Band,
            Self::Compressor { .. } => EffectKind::Compressor,
            Self::Reverb { .. } => EffectKind::Reverb,
        }
    }

    /// Copy with every parameter forced into its legal range. NaN falls back
    /// to the lower bound.
    pub fn clamped(&self) -> Self {
        match *self {
            Self::Eq3Band {
                low_gain_db,
                mid_gain_db,
                high_gain_db,
            } => {
                let (lo, hi) = EQ_GAIN_RANGE_DB;
                Self::Eq3Band {
                    low_gain_db: clamp(low_gain_db, lo, hi),
                    mid_gain_db: clamp(mid_gain_db, lo, hi),
                    high_gain_db: clamp(high_gain_db, lo, hi),
                }
            }
            Self::Compressor {
                threshold_db,
                ratio,
                attack_ms,
                release_ms,
                makeup_gain_db,
            } => Self::Compressor {
                threshold_db: clamp(threshold_db, -60.0, 0.0),
                ratio: clamp(ratio, 1.0, 20.0),
                attack_ms: clamp(attack_ms, 0.1, 200.0),
                release_ms: clamp(release_ms, 1.0, 2000.0),
                makeup_gain_db: clamp(makeup_gain_db, 0.0, 24.0),
            },
            Self::Reverb {
                room_size,
                decay,
                wet_level,
            } => Self::Reverb {
                room_size: clamp(room_size, 0.0, 1.0),
                decay: clamp(decay, 0.0, 1.0),
                wet_level: clamp(wet_level, 0.0, 1.0),
            },
        }
    }
}

fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

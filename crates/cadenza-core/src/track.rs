//! Track representation

use std::f32::consts::FRAC_PI_4;

use serde::{Deserialize, Serialize};

use crate::effect::EffectConfig;
use crate::error::{CadenzaError, Result};

/// Legal track gain range
pub const GAIN_RANGE: (f32, f32) = (0.0, 2.0);
/// Legal pan range (-1.0 left, 0.0 center, 1.0 right)
pub const PAN_RANGE: (f32, f32) = (-1.0, 1.0);

/// Unique identifier for tracks. Never reused within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

/// Track type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackKind {
    #[default]
    Audio,
    Midi,
    Instrument,
    Bus,
}

/// Where a track's signal comes from each cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Copy of the captured input buffer (silence unless recording)
    #[default]
    Input,
    /// Sine test tone
    Tone { frequency_hz: f32, amplitude: f32 },
    Silence,
}

impl SourceConfig {
    pub fn test_tone() -> Self {
        Self::Tone {
            frequency_hz: 440.0,
            amplitude: 0.3,
        }
    }
}

/// Everything needed to create a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub name: String,
    pub kind: TrackKind,
    pub gain: f32,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
    pub record_enabled: bool,
    pub color: u32,
    pub source: SourceConfig,
    pub effects: Vec<EffectConfig>,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            name: "Audio".to_string(),
            kind: TrackKind::Audio,
            gain: 1.0,
            pan: 0.0,
            mute: false,
            solo: false,
            record_enabled: false,
            color: 0xFF4C_AF50,
            source: SourceConfig::Input,
            effects: Vec::new(),
        }
    }
}

impl TrackConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    pub fn with_effect(mut self, effect: EffectConfig) -> Self {
        self.effects.push(effect);
        self
    }
}

/// A track registered with the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// Stable position for the track's lifetime
    pub index: u32,
    pub name: String,
    pub kind: TrackKind,
    /// Volume (0.0 to 2.0)
    pub gain: f32,
    /// Pan (-1.0 left, 0.0 center, 1.0 right)
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
    /// Armed for recording
    pub record_enabled: bool,
    pub color: u32,
    pub source: SourceConfig,
    pub effects: Vec<EffectConfig>,
}

impl Track {
    pub fn new(id: TrackId, index: u32, config: TrackConfig) -> Result<Self> {
        Ok(Self {
            id,
            index,
            name: config.name,
            kind: config.kind,
            gain: validate_gain(config.gain)?,
            pan: validate_pan(config.pan)?,
            mute: config.mute,
            solo: config.solo,
            record_enabled: config.record_enabled,
            color: config.color,
            source: config.source,
            effects: config.effects.iter().map(EffectConfig::clamped).collect(),
        })
    }

    pub fn is_audible(&self, any_solo: bool) -> bool {
        is_audible(self.mute, self.solo, any_solo)
    }
}

/// Audibility rule: with any solo active only soloed tracks play (mute is
/// ignored), otherwise every unmuted track plays.
pub fn is_audible(mute: bool, solo: bool, any_solo: bool) -> bool {
    if any_solo { solo } else { !mute }
}

/// Clamp a gain into [`GAIN_RANGE`], rejecting non-finite values
pub fn validate_gain(gain: f32) -> Result<f32> {
    if !gain.is_finite() {
        return Err(CadenzaError::InvalidParameter { name: "gain", value: gain });
    }
    Ok(gain.clamp(GAIN_RANGE.0, GAIN_RANGE.1))
}

/// Clamp a pan into [`PAN_RANGE`], rejecting non-finite values
pub fn validate_pan(pan: f32) -> Result<f32> {
    if !pan.is_finite() {
        return Err(CadenzaError::InvalidParameter { name: "pan", value: pan });
    }
    Ok(pan.clamp(PAN_RANGE.0, PAN_RANGE.1))
}

/// Equal-power pan law. Returns (left, right) gains, each at most 1.0;
/// center is -3 dB on both sides.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(PAN_RANGE.0, PAN_RANGE.1) + 1.0) * FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// Smallest index not present in `taken`
pub fn next_free_index(taken: impl IntoIterator<Item = u32>) -> u32 {
    let mut taken: Vec<u32> = taken.into_iter().collect();
    taken.sort_unstable();
    taken.dedup();
    let mut candidate = 0;
    for index in taken {
        if index != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

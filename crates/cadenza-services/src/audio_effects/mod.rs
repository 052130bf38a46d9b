//! Effect units and the per-track effect chain

mod compressor;
mod eq;
mod reverb;

pub use compressor::Compressor;
pub use eq::Eq3Band;
pub use reverb::{loop_feedback, Reverb};

use cadenza_core::{EffectConfig, EffectKind, EngineFormat};

use crate::audio_buffer::AudioBuffer;

#[derive(Debug, Clone)]
pub struct EffectParam {
    pub name: String,
    pub value: f32,
    pub min: f32,
    pub max: f32,
    pub unit: String,
}

impl EffectParam {
    pub fn new(name: &str, value: f32, min: f32, max: f32, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            min,
            max,
            unit: unit.to_string(),
        }
    }
}

/// One effect unit with its processing state.
///
/// A closed set of kinds, dispatched by `match`.
#[derive(Debug)]
pub enum EffectUnit {
    Eq3Band(Eq3Band),
    Compressor(Compressor),
    Reverb(Reverb),
}

impl EffectUnit {
    /// Build a unit with fresh state. Parameters are clamped to their legal ranges.
    pub fn from_config(config: &EffectConfig, format: &EngineFormat) -> Self {
        match config.clamped() {
            EffectConfig::Eq3Band { low_gain_db, mid_gain_db, high_gain_db } => {
                Self::Eq3Band(Eq3Band::new(low_gain_db, mid_gain_db, high_gain_db, format))
            }
            EffectConfig::Compressor {
                threshold_db,
                ratio,
                attack_ms,
                release_ms,
                makeup_gain_db,
            } => Self::Compressor(Compressor::new(
                threshold_db,
                ratio,
                attack_ms,
                release_ms,
                makeup_gain_db,
                format,
            )),
            EffectConfig::Reverb { room_size, decay, wet_level } => {
                Self::Reverb(Reverb::new(room_size, decay, wet_level, format))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Eq3Band(_) => "EQ",
            Self::Compressor(_) => "Compressor",
            Self::Reverb(_) => "Reverb",
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Eq3Band(_) => EffectKind::Eq3Band,
            Self::Compressor(_) => EffectKind::Compressor,
            Self::Reverb(_) => EffectKind::Reverb,
        }
    }

    /// Current parameters as plain data
    pub fn config(&self) -> EffectConfig {
        match self {
            Self::Eq3Band(eq) => {
                let (low_gain_db, mid_gain_db, high_gain_db) = eq.gains_db();
                EffectConfig::Eq3Band { low_gain_db, mid_gain_db, high_gain_db }
            }
            Self::Compressor(c) => {
                let (threshold_db, ratio, attack_ms, release_ms, makeup_gain_db) = c.params();
                EffectConfig::Compressor {
                    threshold_db,
                    ratio,
                    attack_ms,
                    release_ms,
                    makeup_gain_db,
                }
            }
            Self::Reverb(r) => {
                let (room_size, decay, wet_level) = r.params();
                EffectConfig::Reverb { room_size, decay, wet_level }
            }
        }
    }

    /// Apply new parameters while keeping processing state. Returns false,
    /// changing nothing, when `config` is for a different kind.
    pub fn apply(&mut self, config: &EffectConfig) -> bool {
        match (self, config.clamped()) {
            (Self::Eq3Band(eq), EffectConfig::Eq3Band { low_gain_db, mid_gain_db, high_gain_db }) => {
                eq.set_gains(low_gain_db, mid_gain_db, high_gain_db);
                true
            }
            (
                Self::Compressor(c),
                EffectConfig::Compressor {
                    threshold_db,
                    ratio,
                    attack_ms,
                    release_ms,
                    makeup_gain_db,
                },
            ) => {
                c.set_params(threshold_db, ratio, attack_ms, release_ms, makeup_gain_db);
                true
            }
            (Self::Reverb(r), EffectConfig::Reverb { room_size, decay, wet_level }) => {
                r.set_params(room_size, decay, wet_level);
                true
            }
            _ => false,
        }
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        match self {
            Self::Eq3Band(eq) => eq.process(buffer),
            Self::Compressor(c) => c.process(buffer),
            Self::Reverb(r) => r.process(buffer),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Eq3Band(eq) => eq.reset(),
            Self::Compressor(c) => c.reset(),
            Self::Reverb(r) => r.reset(),
        }
    }

    pub fn get_params(&self) -> Vec<EffectParam> {
        match self {
            Self::Eq3Band(eq) => eq.get_params(),
            Self::Compressor(c) => c.get_params(),
            Self::Reverb(r) => r.get_params(),
        }
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        match self {
            Self::Eq3Band(eq) => eq.set_bypass(bypass),
            Self::Compressor(c) => c.set_bypass(bypass),
            Self::Reverb(r) => r.set_bypass(bypass),
        }
    }

    pub fn is_bypassed(&self) -> bool {
        match self {
            Self::Eq3Band(eq) => eq.is_bypassed(),
            Self::Compressor(c) => c.is_bypassed(),
            Self::Reverb(r) => r.is_bypassed(),
        }
    }
}

/// Chain of effect units processed in order.
///
/// Storage is reserved up front; inserts beyond capacity are refused rather
/// than reallocating on the audio thread.
#[derive(Debug)]
pub struct EffectChain {
    units: Vec<EffectUnit>,
    limit: usize,
    bypass_all: bool,
}

impl EffectChain {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            units: Vec::with_capacity(capacity),
            limit: capacity,
            bypass_all: false,
        }
    }

    /// Build a chain from configs. Configs beyond `capacity` are ignored.
    pub fn from_configs(configs: &[EffectConfig], format: &EngineFormat, capacity: usize) -> Self {
        let mut chain = Self::with_capacity(capacity);
        for config in configs.iter().take(capacity) {
            chain.units.push(EffectUnit::from_config(config, format));
        }
        chain
    }

    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Append a unit; hands it back when the chain is full
    pub fn add(&mut self, unit: EffectUnit) -> Result<(), EffectUnit> {
        let index = self.units.len();
        self.insert(index, unit)
    }

    /// Insert at `index` (clamped to the end); hands the unit back when full
    pub fn insert(&mut self, index: usize, unit: EffectUnit) -> Result<(), EffectUnit> {
        if self.units.len() >= self.limit {
            return Err(unit);
        }
        let index = index.min(self.units.len());
        self.units.insert(index, unit);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<EffectUnit> {
        if index >= self.units.len() {
            return None;
        }
        Some(self.units.remove(index))
    }

    /// Move the unit at `from` so it ends up at `to`
    pub fn move_unit(&mut self, from: usize, to: usize) -> bool {
        let len = self.units.len();
        if from >= len || to >= len {
            return false;
        }
        if from < to {
            self.units[from..=to].rotate_left(1);
        } else {
            self.units[to..=from].rotate_right(1);
        }
        true
    }

    pub fn get(&self, index: usize) -> Option<&EffectUnit> {
        self.units.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut EffectUnit> {
        self.units.get_mut(index)
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.bypass_all {
            return;
        }
        for unit in &mut self.units {
            if !unit.is_bypassed() {
                unit.process(buffer);
            }
        }
    }

    /// Clear every unit's filter, envelope and delay state
    pub fn reset(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
    }

    pub fn set_bypass_all(&mut self, bypass: bool) {
        self.bypass_all = bypass;
    }

    pub fn is_bypass_all(&self) -> bool {
        self.bypass_all
    }

    pub fn units(&self) -> &[EffectUnit] {
        &self.units
    }

    pub fn configs(&self) -> Vec<EffectConfig> {
        self.units.iter().map(EffectUnit::config).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> EngineFormat {
        EngineFormat::new(44100, 2, 256)
    }

    fn kinds(chain: &EffectChain) -> Vec<EffectKind> {
        chain.units().iter().map(EffectUnit::kind).collect()
    }

    #[test]
    fn test_chain_refuses_past_capacity() {
        let mut chain = EffectChain::with_capacity(2);
        assert!(chain.add(EffectUnit::from_config(&EffectConfig::eq_flat(), &format())).is_ok());
        assert!(chain.add(EffectUnit::from_config(&EffectConfig::reverb_default(), &format())).is_ok());
        let refused = chain.add(EffectUnit::from_config(&EffectConfig::compressor_default(), &format()));
        assert!(matches!(refused, Err(EffectUnit::Compressor(_))));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.capacity(), 2);
    }

    #[test]
    fn test_insert_move_remove_preserve_order() {
        let configs = [EffectConfig::eq_flat(), EffectConfig::compressor_default()];
        let mut chain = EffectChain::from_configs(&configs, &format(), 4);
        chain
            .insert(0, EffectUnit::from_config(&EffectConfig::reverb_default(), &format()))
            .unwrap();
        assert_eq!(kinds(&chain), vec![EffectKind::Reverb, EffectKind::Eq3Band, EffectKind::Compressor]);

        assert!(chain.move_unit(0, 2));
        assert_eq!(kinds(&chain), vec![EffectKind::Eq3Band, EffectKind::Compressor, EffectKind::Reverb]);
        assert!(chain.move_unit(2, 0));
        assert_eq!(kinds(&chain), vec![EffectKind::Reverb, EffectKind::Eq3Band, EffectKind::Compressor]);
        assert!(!chain.move_unit(0, 3));

        let removed = chain.remove(1).unwrap();
        assert_eq!(removed.kind(), EffectKind::Eq3Band);
        assert!(chain.remove(5).is_none());
        assert_eq!(kinds(&chain), vec![EffectKind::Reverb, EffectKind::Compressor]);
    }

    #[test]
    fn test_apply_rejects_other_kind() {
        let mut unit = EffectUnit::from_config(&EffectConfig::eq_flat(), &format());
        assert!(!unit.apply(&EffectConfig::reverb_default()));
        assert_eq!(unit.config(), EffectConfig::eq_flat());

        let boosted = EffectConfig::Eq3Band { low_gain_db: 3.0, mid_gain_db: 0.0, high_gain_db: 40.0 };
        assert!(unit.apply(&boosted));
        assert_eq!(
            unit.config(),
            EffectConfig::Eq3Band { low_gain_db: 3.0, mid_gain_db: 0.0, high_gain_db: 24.0 }
        );
    }

    #[test]
    fn test_bypassed_unit_is_skipped() {
        let mut chain = EffectChain::from_configs(
            &[EffectConfig::Reverb { room_size: 1.0, decay: 1.0, wet_level: 1.0 }],
            &format(),
            1,
        );
        chain.get_mut(0).unwrap().set_bypass(true);
        let input = AudioBuffer::from_interleaved(vec![0.25; 512], 2);
        let mut out = input.clone();
        chain.process(&mut out);
        assert_eq!(out, input);

        chain.get_mut(0).unwrap().set_bypass(false);
        chain.set_bypass_all(true);
        chain.process(&mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn test_params_listing() {
        let unit = EffectUnit::from_config(&EffectConfig::compressor_default(), &format());
        let names: Vec<_> = unit.get_params().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["threshold", "ratio", "attack", "release", "makeup"]);
        assert_eq!(unit.name(), "Compressor");
    }
}

//! Host configuration file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cadenza_core::{EngineConfig, TrackConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub engine: EngineConfig,
    /// Tracks added at startup, in order
    pub tracks: Vec<TrackConfig>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadenza")
        .join("config.toml")
}

/// Read `path`, or the default location when none is given. A missing
/// default file means defaults; a missing explicit file is an error.
pub fn load(path: Option<&Path>) -> Result<HostConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_path(), false),
    };
    if !explicit && !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(HostConfig::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: HostConfig =
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
    config
        .engine
        .validate()
        .with_context(|| format!("invalid engine settings in {}", path.display()))?;
    tracing::info!(path = %path.display(), tracks = config.tracks.len(), "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use cadenza_core::{EffectConfig, SourceConfig};

    use super::*;

    const SAMPLE: &str = r#"
[engine]
sample_rate = 48000
buffer_frames = 128
recordings_dir = "/tmp/takes"

[[tracks]]
name = "Tone"
pan = -0.5
source = { type = "tone", frequency_hz = 220.0, amplitude = 0.2 }

[[tracks.effects]]
type = "reverb"
room_size = 0.8
decay = 0.6
wet_level = 0.3

[[tracks]]
name = "Mic"
record_enabled = true
"#;

    #[test]
    fn test_parse_sample() {
        let config: HostConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.engine.sample_rate, 48000);
        assert_eq!(config.engine.buffer_frames, 128);
        assert_eq!(config.engine.channels, 2);
        assert_eq!(config.tracks.len(), 2);

        let tone = &config.tracks[0];
        assert_eq!(
            tone.source,
            SourceConfig::Tone {
                frequency_hz: 220.0,
                amplitude: 0.2
            }
        );
        assert_eq!(
            tone.effects,
            vec![EffectConfig::Reverb {
                room_size: 0.8,
                decay: 0.6,
                wet_level: 0.3
            }]
        );
        assert_eq!(config.tracks[1].source, SourceConfig::Input);
        assert!(config.tracks[1].record_enabled);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_engine_settings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nchannels = 0\n").unwrap();
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = HostConfig::default();
        config.tracks.push(TrackConfig::new("Drums").with_effect(EffectConfig::compressor_default()));
        let text = toml::to_string_pretty(&config).unwrap();
        let back: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}

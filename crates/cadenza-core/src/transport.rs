//! Transport state and controls

use serde::{Deserialize, Serialize};

use crate::error::{CadenzaError, Result};

/// Transport playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
    Paused,
}

impl TransportState {
    /// Whether the audio loop runs in this state
    pub fn is_running(self) -> bool {
        matches!(self, Self::Playing | Self::Recording)
    }

    /// Compact encoding for lock-free publication
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Playing => 1,
            Self::Recording => 2,
            Self::Paused => 3,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Playing,
            2 => Self::Recording,
            3 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

/// Transport state machine and playback cursor.
///
/// The transition methods are the only mutators of [`TransportState`]. Each
/// returns `Ok(true)` when the state changed, `Ok(false)` for a no-op repeat
/// and an error for an illegal transition, in which case nothing changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transport {
    state: TransportState,
    /// Current position in samples (frames)
    pub position_samples: u64,
    /// Sample rate for time conversion
    pub sample_rate: u32,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            state: TransportState::Stopped,
            position_samples: 0,
            sample_rate: 44100,
        }
    }
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Default::default()
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Stopped -> Playing, Paused -> Playing
    pub fn play(&mut self) -> Result<bool> {
        match self.state {
            TransportState::Playing => Ok(false),
            TransportState::Stopped | TransportState::Paused => {
                self.state = TransportState::Playing;
                Ok(true)
            }
            from => Err(CadenzaError::InvalidTransition {
                from,
                to: TransportState::Playing,
            }),
        }
    }

    /// Playing -> Paused
    pub fn pause(&mut self) -> Result<bool> {
        match self.state {
            TransportState::Paused => Ok(false),
            TransportState::Playing => {
                self.state = TransportState::Paused;
                Ok(true)
            }
            from => Err(CadenzaError::InvalidTransition {
                from,
                to: TransportState::Paused,
            }),
        }
    }

    /// Stopped -> Recording
    pub fn record(&mut self) -> Result<bool> {
        match self.state {
            TransportState::Recording => Ok(false),
            TransportState::Stopped => {
                self.state = TransportState::Recording;
                Ok(true)
            }
            from => Err(CadenzaError::InvalidTransition {
                from,
                to: TransportState::Recording,
            }),
        }
    }

    /// Any state -> Stopped, rewinding the cursor. A no-op when already stopped.
    pub fn stop(&mut self) -> bool {
        if self.state == TransportState::Stopped {
            return false;
        }
        self.state = TransportState::Stopped;
        self.position_samples = 0;
        true
    }

    /// Check that a record transition would be accepted without taking it
    pub fn can_record(&self) -> Result<()> {
        match self.state {
            TransportState::Stopped | TransportState::Recording => Ok(()),
            from => Err(CadenzaError::InvalidTransition {
                from,
                to: TransportState::Recording,
            }),
        }
    }

    /// Reposition the cursor. Rejected while recording.
    pub fn seek(&mut self, position_samples: u64) -> Result<()> {
        if self.state == TransportState::Recording {
            return Err(CadenzaError::SeekWhileRecording);
        }
        self.position_samples = position_samples;
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_running()
    }

    /// Position in seconds
    pub fn position_secs(&self) -> f64 {
        self.position_samples as f64 / self.sample_rate as f64
    }
}

/// Format a position in seconds as MM:SS.mm
pub fn format_time(secs: f64) -> String {
    let secs = secs.max(0.0);
    let mins = (secs / 60.0) as u32;
    let secs_rem = secs % 60.0;
    format!("{:02}:{:05.2}", mins, secs_rem)
}

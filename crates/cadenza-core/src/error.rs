//! Error types for cadenza

use thiserror::Error;

use crate::transport::TransportState;

#[derive(Debug, Error)]
pub enum CadenzaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Track not found: {0}")]
    TrackNotFound(u64),
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
    #[error("Illegal transport transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransportState,
        to: TransportState,
    },
    #[error("Cannot seek while recording")]
    SeekWhileRecording,
    #[error("Invalid value {value} for parameter '{name}'")]
    InvalidParameter { name: &'static str, value: f32 },
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CadenzaError>;

//! cadenza-core: Domain types for the cadenza audio engine

pub mod config;
mod effect;
mod error;
pub mod metrics;
pub mod store;
mod track;
mod transport;

pub use config::{EngineConfig, EngineFormat, RECORD_BITS_PER_SAMPLE};
pub use effect::{EffectConfig, EffectKind, EQ_GAIN_RANGE_DB};
pub use error::{CadenzaError, Result};
pub use metrics::PerformanceMetrics;
pub use store::{MemoryStore, ProjectRecord, ProjectStore, TrackRecord, TrackStore};
pub use track::{
    is_audible, next_free_index, pan_gains, validate_gain, validate_pan, SourceConfig, Track,
    TrackConfig, TrackId, TrackKind, GAIN_RANGE, PAN_RANGE,
};
pub use transport::{format_time, Transport, TransportState};

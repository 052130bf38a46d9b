//! cadenza-services: Real-time audio engine, effects and device layer

pub mod audio_buffer;
pub mod audio_effects;
pub mod audio_engine;
pub mod audio_io;
pub mod command;
pub mod io_loop;
pub mod mixer;
pub mod performance;
pub mod poller;
pub mod recorder;
pub mod signal;
pub mod thread_priority;
pub mod track_processor;
pub mod transport_controller;
pub mod wav_writer;

pub use audio_buffer::AudioBuffer;
pub use audio_effects::{Compressor, EffectChain, EffectParam, EffectUnit, Eq3Band, Reverb};
pub use audio_engine::{AudioEngine, AudioEngineError};
pub use audio_io::{
    AudioBackend, AudioSink, AudioSource, CpalBackend, DeviceError, DeviceInfo, NullBackend,
};
pub use io_loop::AudioIoLoop;
pub use mixer::{MeterState, Mixer};
pub use performance::{PerformanceCounters, PerformanceMonitor};
pub use poller::{EngineStatus, StatusPoller};
pub use recorder::{Recorder, RecorderError, RecordingSummary};
pub use signal::{ClipPlayer, SignalGenerator, ToneGenerator};
pub use track_processor::{TrackInput, TrackProcessor};
pub use transport_controller::{TransportController, TransportError};

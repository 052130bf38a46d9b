//! Audio engine control surface
//!
//! [`AudioEngine`] is the one object a UI or host talks to. It keeps a
//! control-side copy of every track's descriptor, validates each request
//! against it, and forwards only well-formed commands to the audio thread.
//! Lifecycle: `new` -> `initialize` -> transport calls -> `shutdown` (or drop).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cadenza_core::{
    next_free_index, validate_gain, validate_pan, CadenzaError, EffectConfig, EngineConfig,
    EngineFormat, PerformanceMetrics, Track, TrackConfig, TrackId, TrackStore, TransportState,
    GAIN_RANGE,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::audio_effects::EffectUnit;
use crate::audio_io::{AudioBackend, DeviceError};
use crate::command::{command_channel, garbage_channel, EngineCommand};
use crate::io_loop::{AudioIoLoop, LoopPorts, SharedState};
use crate::mixer::MeterState;
use crate::performance::PerformanceCounters;
use crate::poller::StatusPoller;
use crate::recorder::{ActiveRecording, Recorder, RecorderError, RecordingSummary};
use crate::track_processor::{TrackInput, TrackProcessor};
use crate::transport_controller::{TransportController, TransportError};

#[derive(Debug, Error)]
pub enum AudioEngineError {
    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Core(#[from] CadenzaError),
    #[error("Engine not initialized")]
    NotInitialized,
    #[error("Engine already initialized")]
    AlreadyInitialized,
    #[error("No input device available for recording")]
    NoInputDevice,
    #[error("Track limit of {0} reached")]
    TrackLimit(usize),
    #[error("Effect limit of {0} per track reached")]
    EffectLimit(usize),
    #[error("Track {track} has no effect at index {index}")]
    EffectIndex { track: u64, index: usize },
    #[error("Effect update does not match the effect's kind")]
    EffectKindMismatch,
    #[error("Command queue is full")]
    CommandQueueFull,
    #[error("Audio thread failed: {0}")]
    AudioThread(String),
}

impl From<TransportError> for AudioEngineError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Transition(e) => Self::Core(e),
            TransportError::QueueFull => Self::CommandQueueFull,
            TransportError::AudioThread(msg) => Self::AudioThread(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AudioEngineError>;

/// Handles that exist only between `initialize` and `shutdown`
struct Session {
    controller: TransportController,
    shared: Arc<SharedState>,
    counters: Arc<PerformanceCounters>,
    meter: Arc<MeterState>,
    has_input: bool,
    /// Removed tracks the audio thread still held when the wait ran out,
    /// with the index each keeps reserved
    releasing: Vec<(TrackId, u32)>,
}

pub struct AudioEngine {
    config: EngineConfig,
    format: EngineFormat,
    backend: Box<dyn AudioBackend>,
    session: Option<Session>,
    /// Registration order, mirrored on the audio thread
    tracks: Vec<Track>,
    next_id: u64,
    master_gain: f32,
    recording: Option<ActiveRecording>,
    last_recording: Option<RecordingSummary>,
}

impl AudioEngine {
    pub fn new(config: EngineConfig, backend: Box<dyn AudioBackend>) -> Result<Self> {
        config.validate()?;
        let format = config.format();
        let master_gain = config.master_gain.clamp(GAIN_RANGE.0, GAIN_RANGE.1);
        Ok(Self {
            config,
            format,
            backend,
            session: None,
            tracks: Vec::new(),
            next_id: 1,
            master_gain,
            recording: None,
            last_recording: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn format(&self) -> &EngineFormat {
        &self.format
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Replace the configuration. Buffer shape is fixed while a device
    /// session is open, so this requires the engine to be uninitialized.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<()> {
        if self.session.is_some() {
            return Err(AudioEngineError::AlreadyInitialized);
        }
        config.validate()?;
        self.format = config.format();
        self.master_gain = config.master_gain.clamp(GAIN_RANGE.0, GAIN_RANGE.1);
        self.config = config;
        Ok(())
    }

    /// Open the device session and build the audio loop. Output is required;
    /// a missing input only disables recording. On failure the engine stays
    /// uninitialized and the call may be retried.
    pub fn initialize(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(AudioEngineError::AlreadyInitialized);
        }

        let sink = self.backend.open_output(&self.format)?;
        let source = match self.backend.open_input(&self.format) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(error = %e, "No capture input, recording disabled");
                None
            }
        };

        let (tx, commands) = command_channel(self.config.command_queue_capacity);
        let (garbage_tx, garbage) =
            garbage_channel(self.config.command_queue_capacity + self.config.max_tracks);
        let shared = Arc::new(SharedState::default());
        let ports = LoopPorts {
            sink,
            source,
            commands,
            garbage: garbage_tx,
        };
        let io = AudioIoLoop::new(&self.config, ports, shared.clone());
        let has_input = io.has_input();
        let counters = io.counters();
        let meter = io.meter();
        let mut controller = TransportController::new(io, tx, garbage, shared.clone());

        // tracks registered before a shutdown come back with fresh state
        let restored = std::iter::once(EngineCommand::SetMasterGain(self.master_gain))
            .chain(self.tracks.iter().map(|track| {
                let processor = TrackProcessor::new(track, &self.format, self.config.max_effects_per_track);
                EngineCommand::AddTrack(Box::new(processor))
            }))
            .try_for_each(|command| controller.dispatch(command));
        if let Err(e) = restored {
            drop(controller);
            self.backend.close();
            return Err(e.into());
        }

        self.session = Some(Session {
            controller,
            shared,
            counters,
            meter,
            has_input,
            releasing: Vec::new(),
        });
        info!(
            backend = self.backend.name(),
            sample_rate = self.format.sample_rate,
            channels = self.format.channels,
            buffer_frames = self.format.buffer_frames,
            has_input,
            "Audio engine initialized"
        );
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        if self.controller()?.play()? {
            info!("Playback started");
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.controller()?.pause()? {
            info!(position = self.position(), "Playback paused");
        }
        Ok(())
    }

    /// Stop the transport, wait for the in-flight cycle and finish any
    /// recording. Repeated calls are no-ops.
    pub fn stop(&mut self) -> Result<()> {
        let controller = self.controller()?;
        let stopped = controller.stop();

        let finished = match self.recording.take() {
            Some(active) => {
                let detached = self.controller()?.dispatch(EngineCommand::StopCapture);
                let summary = active.finish();
                detached?;
                Some(summary?)
            }
            None => None,
        };
        if let Some(summary) = finished {
            self.last_recording = Some(summary);
        }

        if stopped? {
            info!("Transport stopped");
        }
        Ok(())
    }

    /// Start recording to an auto-named file in the recordings directory:
    /// `<trackName>_<unixMillis>.wav`, named after the first record-enabled
    /// track. Returns the destination path.
    pub fn record(&mut self) -> Result<PathBuf> {
        if let Some(active) = &self.recording {
            return Ok(active.path().to_path_buf());
        }
        let dir = self.config.recordings_dir.clone();
        std::fs::create_dir_all(&dir).map_err(CadenzaError::Io)?;
        let path = dir.join(self.recording_file_name());
        self.record_to(&path)
    }

    /// Start recording to `path`. On failure the transport is unchanged and
    /// no file is left behind.
    pub fn record_to(&mut self, path: &Path) -> Result<PathBuf> {
        if let Some(active) = &self.recording {
            return Ok(active.path().to_path_buf());
        }
        let session = self.session.as_mut().ok_or(AudioEngineError::NotInitialized)?;
        session.controller.can_record()?;
        if !session.has_input {
            return Err(AudioEngineError::NoInputDevice);
        }

        let (active, tap) = Recorder::start(path, &self.format, self.config.recorder_queue_samples())?;
        let started = session
            .controller
            .dispatch(EngineCommand::StartCapture(tap))
            .and_then(|()| session.controller.record());
        if let Err(e) = started {
            let _ = session.controller.dispatch(EngineCommand::StopCapture);
            drop(active);
            let _ = std::fs::remove_file(path);
            return Err(e.into());
        }

        info!(path = %path.display(), "Recording started");
        self.recording = Some(active);
        Ok(path.to_path_buf())
    }

    /// Move the playback cursor. Rejected while recording.
    pub fn seek(&mut self, position_samples: u64) -> Result<()> {
        self.controller()?.seek(position_samples)?;
        Ok(())
    }

    pub fn add_track(&mut self, config: TrackConfig) -> Result<TrackId> {
        self.register_track(config, None)
    }

    /// Add a track fed by a caller-supplied input, e.g. a clip player
    pub fn add_track_with_input(&mut self, config: TrackConfig, input: TrackInput) -> Result<TrackId> {
        self.register_track(config, Some(input))
    }

    fn register_track(&mut self, config: TrackConfig, input: Option<TrackInput>) -> Result<TrackId> {
        if self.session.is_none() {
            return Err(AudioEngineError::NotInitialized);
        }
        if self.tracks.len() >= self.config.max_tracks {
            return Err(AudioEngineError::TrackLimit(self.config.max_tracks));
        }
        let max_effects = self.config.max_effects_per_track;
        if config.effects.len() > max_effects {
            return Err(AudioEngineError::EffectLimit(max_effects));
        }

        let id = TrackId(self.next_id);
        let reserved = self.reserved_indices();
        let index = next_free_index(self.tracks.iter().map(|t| t.index).chain(reserved));
        let track = Track::new(id, index, config)?;
        let processor = match input {
            Some(input) => TrackProcessor::with_input(&track, &self.format, max_effects, input),
            None => TrackProcessor::new(&track, &self.format, max_effects),
        };
        self.controller()?.dispatch(EngineCommand::AddTrack(Box::new(processor)))?;

        info!(id = id.0, index, name = %track.name, "Track added");
        self.next_id += 1;
        self.tracks.push(track);
        Ok(id)
    }

    /// Remove a track. Returns once the audio thread has released it, or
    /// after a timeout; its index is free for reuse only once released.
    pub fn remove_track(&mut self, id: TrackId) -> Result<()> {
        let slot = self.slot(id)?;
        let timeout = self.release_timeout();
        let controller = self.controller()?;
        controller.dispatch(EngineCommand::RemoveTrack(id))?;
        let released = !controller.is_running() || controller.wait_for_release(&[id], timeout);
        let track = self.tracks.remove(slot);
        if !released {
            warn!(id = id.0, index = track.index, "Audio thread did not release track in time");
            if let Some(session) = self.session.as_mut() {
                session.releasing.push((id, track.index));
            }
        }
        info!(id = id.0, name = %track.name, "Track removed");
        Ok(())
    }

    /// Remove every track
    pub fn clear_tracks(&mut self) -> Result<()> {
        let ids: Vec<TrackId> = self.tracks.iter().map(|t| t.id).collect();
        let timeout = self.release_timeout();
        let controller = self.controller()?;
        controller.dispatch(EngineCommand::ClearTracks)?;
        let released = !controller.is_running() || controller.wait_for_release(&ids, timeout);
        let removed: Vec<(TrackId, u32)> = self.tracks.drain(..).map(|t| (t.id, t.index)).collect();
        if !released {
            warn!(count = ids.len(), "Audio thread did not release tracks in time");
            if let Some(session) = self.session.as_mut() {
                session.releasing.extend(removed);
            }
        }
        Ok(())
    }

    /// Replace the current tracks with a project's tracks, in index order
    pub fn load_project(&mut self, store: &dyn TrackStore, project_id: &str) -> Result<Vec<TrackId>> {
        let records = store.tracks_for_project(project_id)?;
        if records.len() > self.config.max_tracks {
            return Err(AudioEngineError::TrackLimit(self.config.max_tracks));
        }
        self.clear_tracks()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.add_track(record.config)?);
        }
        info!(project_id, tracks = ids.len(), "Project loaded");
        Ok(ids)
    }

    pub fn set_track_volume(&mut self, id: TrackId, gain: f32) -> Result<()> {
        let slot = self.slot(id)?;
        let gain = validate_gain(gain)?;
        self.controller()?.dispatch(EngineCommand::SetGain { track: id, gain })?;
        self.tracks[slot].gain = gain;
        Ok(())
    }

    pub fn set_track_pan(&mut self, id: TrackId, pan: f32) -> Result<()> {
        let slot = self.slot(id)?;
        let pan = validate_pan(pan)?;
        self.controller()?.dispatch(EngineCommand::SetPan { track: id, pan })?;
        self.tracks[slot].pan = pan;
        Ok(())
    }

    pub fn set_track_mute(&mut self, id: TrackId, mute: bool) -> Result<()> {
        let slot = self.slot(id)?;
        self.controller()?.dispatch(EngineCommand::SetMute { track: id, mute })?;
        self.tracks[slot].mute = mute;
        Ok(())
    }

    pub fn set_track_solo(&mut self, id: TrackId, solo: bool) -> Result<()> {
        let slot = self.slot(id)?;
        self.controller()?.dispatch(EngineCommand::SetSolo { track: id, solo })?;
        self.tracks[slot].solo = solo;
        Ok(())
    }

    pub fn set_track_record_enabled(&mut self, id: TrackId, enabled: bool) -> Result<()> {
        let slot = self.slot(id)?;
        self.controller()?
            .dispatch(EngineCommand::SetRecordEnabled { track: id, enabled })?;
        self.tracks[slot].record_enabled = enabled;
        Ok(())
    }

    /// Master gain, clamped to the track gain range
    pub fn set_master_volume(&mut self, gain: f32) -> Result<()> {
        let gain = validate_gain(gain)?;
        self.controller()?.dispatch(EngineCommand::SetMasterGain(gain))?;
        self.master_gain = gain;
        Ok(())
    }

    pub fn master_volume(&self) -> f32 {
        self.master_gain
    }

    /// Append an effect to the end of a track's chain. Returns its index.
    pub fn add_effect(&mut self, id: TrackId, config: EffectConfig) -> Result<usize> {
        let len = self.tracks[self.slot(id)?].effects.len();
        self.insert_effect(id, len, config)
    }

    /// Insert an effect; `index` past the end appends. Returns the index used.
    pub fn insert_effect(&mut self, id: TrackId, index: usize, config: EffectConfig) -> Result<usize> {
        let slot = self.slot(id)?;
        let max_effects = self.config.max_effects_per_track;
        if self.tracks[slot].effects.len() >= max_effects {
            return Err(AudioEngineError::EffectLimit(max_effects));
        }
        let index = index.min(self.tracks[slot].effects.len());
        let config = config.clamped();
        let unit = EffectUnit::from_config(&config, &self.format);
        self.controller()?
            .dispatch(EngineCommand::InsertEffect { track: id, index, unit })?;
        self.tracks[slot].effects.insert(index, config);
        Ok(index)
    }

    pub fn remove_effect(&mut self, id: TrackId, index: usize) -> Result<EffectConfig> {
        let slot = self.effect_slot(id, index)?;
        self.controller()?
            .dispatch(EngineCommand::RemoveEffect { track: id, index })?;
        Ok(self.tracks[slot].effects.remove(index))
    }

    /// Move the effect at `from` so it ends up at `to`
    pub fn move_effect(&mut self, id: TrackId, from: usize, to: usize) -> Result<()> {
        let slot = self.effect_slot(id, from)?;
        self.effect_slot(id, to)?;
        self.controller()?
            .dispatch(EngineCommand::MoveEffect { track: id, from, to })?;
        let effects = &mut self.tracks[slot].effects;
        let moved = effects.remove(from);
        effects.insert(to, moved);
        Ok(())
    }

    /// Change an effect's parameters, keeping its running state
    pub fn update_effect(&mut self, id: TrackId, index: usize, config: EffectConfig) -> Result<()> {
        let slot = self.effect_slot(id, index)?;
        if self.tracks[slot].effects[index].kind() != config.kind() {
            return Err(AudioEngineError::EffectKindMismatch);
        }
        let config = config.clamped();
        self.controller()?
            .dispatch(EngineCommand::UpdateEffect { track: id, index, config })?;
        self.tracks[slot].effects[index] = config;
        Ok(())
    }

    pub fn set_effect_bypass(&mut self, id: TrackId, index: usize, bypass: bool) -> Result<()> {
        self.effect_slot(id, index)?;
        self.controller()?
            .dispatch(EngineCommand::SetEffectBypass { track: id, index, bypass })?;
        Ok(())
    }

    pub fn state(&self) -> TransportState {
        self.session
            .as_ref()
            .map_or(TransportState::Stopped, |s| s.controller.state())
    }

    /// Playback cursor in samples
    pub fn position(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.shared.position())
    }

    pub fn position_secs(&self) -> f64 {
        self.position() as f64 / self.format.sample_rate as f64
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.session
            .as_ref()
            .map(|s| s.counters.snapshot())
            .unwrap_or_default()
    }

    /// Master output meter
    pub fn meter(&self) -> Option<Arc<MeterState>> {
        self.session.as_ref().map(|s| s.meter.clone())
    }

    pub fn recording_path(&self) -> Option<&Path> {
        self.recording.as_ref().map(|r| r.path())
    }

    pub fn last_recording(&self) -> Option<&RecordingSummary> {
        self.last_recording.as_ref()
    }

    /// Start a thread publishing [`crate::poller::EngineStatus`] every
    /// `poll_interval_ms`
    pub fn spawn_status_poller(&self) -> Result<StatusPoller> {
        let session = self.session.as_ref().ok_or(AudioEngineError::NotInitialized)?;
        let poller = StatusPoller::spawn(
            session.shared.clone(),
            session.counters.clone(),
            self.format.sample_rate,
            Duration::from_millis(self.config.poll_interval_ms),
        )
        .map_err(|e| AudioEngineError::AudioThread(e.to_string()))?;
        Ok(poller)
    }

    /// Stop, drain the recorder, close the device session and return to the
    /// uninitialized state. Tracks are kept and rebuilt by the next
    /// `initialize`.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        let stopped = self.stop();
        if let Some(session) = self.session.take() {
            // dropping the loop releases the sink and source before the backend closes
            drop(session.controller.into_loop());
        }
        self.backend.close();
        info!("Audio engine shut down");
        stopped
    }

    fn controller(&mut self) -> Result<&mut TransportController> {
        self.session
            .as_mut()
            .map(|s| &mut s.controller)
            .ok_or(AudioEngineError::NotInitialized)
    }

    /// Indices still held by removed tracks the audio thread has not
    /// handed back
    fn reserved_indices(&mut self) -> Vec<u32> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.releasing.is_empty() {
            return Vec::new();
        }
        session.controller.collect_garbage();
        let unreleased = session.controller.unreleased();
        session.releasing.retain(|(id, _)| unreleased.contains(id));
        session.releasing.iter().map(|(_, index)| *index).collect()
    }

    fn slot(&self, id: TrackId) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(AudioEngineError::Core(CadenzaError::TrackNotFound(id.0)))
    }

    fn effect_slot(&self, id: TrackId, index: usize) -> Result<usize> {
        let slot = self.slot(id)?;
        if index >= self.tracks[slot].effects.len() {
            return Err(AudioEngineError::EffectIndex { track: id.0, index });
        }
        Ok(slot)
    }

    fn release_timeout(&self) -> Duration {
        self.format.period() * 4 + Duration::from_millis(100)
    }

    fn recording_file_name(&self) -> String {
        let name = self
            .tracks
            .iter()
            .find(|t| t.record_enabled)
            .map_or("recording", |t| t.name.as_str());
        let name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("{name}_{millis}.wav")
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Audio engine shut down with error");
        }
    }
}

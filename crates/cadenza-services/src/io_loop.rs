//! The fixed-period audio loop
//!
//! One [`AudioIoLoop::cycle`] processes exactly one buffer: apply pending
//! commands, read capture (when a capture tap is installed), render every
//! audible track in registration order, run the master bus, write the
//! output and hand the capture to the recorder. Nothing in a cycle
//! allocates, locks or logs; faults become counters.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadenza_core::{EngineConfig, EngineFormat, TrackId, TransportState};
use rtrb::{Consumer, Producer, PushError};

use crate::audio_buffer::AudioBuffer;
use crate::audio_io::{AudioSink, AudioSource};
use crate::command::{EngineCommand, Garbage};
use crate::mixer::{MeterState, Mixer};
use crate::performance::{PerformanceCounters, PerformanceMonitor};
use crate::recorder::CaptureTap;
use crate::thread_priority;
use crate::track_processor::TrackProcessor;

/// Cursor and transport state published for lock-free reads
#[derive(Debug, Default)]
pub struct SharedState {
    position: AtomicU64,
    state: AtomicU8,
}

impl SharedState {
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Release);
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Queue ends and device handles the loop is built from
pub struct LoopPorts {
    pub sink: Box<dyn AudioSink>,
    pub source: Option<Box<dyn AudioSource>>,
    pub commands: Consumer<EngineCommand>,
    pub garbage: Producer<Garbage>,
}

pub struct AudioIoLoop {
    format: EngineFormat,
    period: Duration,
    realtime_priority: bool,
    tracks: Vec<Box<TrackProcessor>>,
    max_tracks: usize,
    mixer: Mixer,
    monitor: PerformanceMonitor,
    sink: Box<dyn AudioSink>,
    source: Option<Box<dyn AudioSource>>,
    capture: Option<CaptureTap>,
    capture_buf: Vec<f32>,
    mix: AudioBuffer,
    commands: Consumer<EngineCommand>,
    garbage: Producer<Garbage>,
    /// Released values waiting for room in the garbage queue
    spill: Vec<Garbage>,
    shared: Arc<SharedState>,
    position: u64,
}

impl AudioIoLoop {
    pub fn new(config: &EngineConfig, ports: LoopPorts, shared: Arc<SharedState>) -> Self {
        let format = config.format();
        Self {
            format,
            period: format.period(),
            realtime_priority: config.realtime_priority,
            tracks: Vec::with_capacity(config.max_tracks),
            max_tracks: config.max_tracks,
            mixer: Mixer::new(config.master_gain),
            monitor: PerformanceMonitor::new(&format),
            sink: ports.sink,
            source: ports.source,
            capture: None,
            capture_buf: vec![0.0; format.samples_per_buffer()],
            mix: AudioBuffer::for_format(&format),
            commands: ports.commands,
            garbage: ports.garbage,
            // at least as large as anything the command queue can release
            spill: Vec::with_capacity(config.command_queue_capacity + config.max_tracks),
            shared,
            position: 0,
        }
    }

    pub fn format(&self) -> &EngineFormat {
        &self.format
    }

    pub fn counters(&self) -> Arc<PerformanceCounters> {
        self.monitor.counters()
    }

    pub fn meter(&self) -> Arc<MeterState> {
        self.mixer.meter()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn has_input(&self) -> bool {
        self.source.is_some()
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.iter().map(|t| t.id())
    }

    pub fn track(&self, id: TrackId) -> Option<&TrackProcessor> {
        self.tracks.iter().find(|t| t.id() == id).map(|t| &**t)
    }

    /// Last rendered master buffer
    pub fn mix(&self) -> &AudioBuffer {
        &self.mix
    }

    /// Run cycles until `stop` is raised. The in-flight cycle always
    /// completes before this returns.
    pub fn run(mut self, stop: Arc<AtomicBool>) -> Self {
        if self.realtime_priority {
            thread_priority::promote_current_thread();
        }
        while !stop.load(Ordering::Acquire) {
            self.cycle();
        }
        self.drain_commands();
        self.mixer.meter().reset();
        self
    }

    /// Process one buffer
    pub fn cycle(&mut self) {
        self.drain_commands();

        let mut captured = 0;
        if self.capture.is_some() {
            if let Some(source) = self.source.as_mut() {
                match source.read(&mut self.capture_buf, self.period) {
                    Ok(frames) => captured = (frames * self.format.channels as usize).min(self.capture_buf.len()),
                    Err(_) => {
                        // skip the cycle; the poller reports the counter
                        self.monitor.record_device_fault();
                        return;
                    }
                }
            }
        }

        self.monitor.begin_cycle();
        self.mix.silence();

        let any_solo = self.tracks.iter().any(|t| t.is_solo());
        let input = &self.capture_buf[..captured];
        let position = self.position;
        for track in self.tracks.iter_mut() {
            if !track.is_audible(any_solo) {
                continue;
            }
            let mix = &mut self.mix;
            let outcome = catch_unwind(AssertUnwindSafe(|| track.process(input, mix, position)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(_)) => self.monitor.record_track_fault(),
                Err(_) => {
                    track.reset();
                    self.monitor.record_track_fault();
                }
            }
        }

        self.mixer.process(&mut self.mix);
        self.monitor.set_active_tracks(self.tracks.len());
        self.monitor.end_cycle();

        if self.sink.write(self.mix.as_slice(), self.period).is_err() {
            self.monitor.record_device_fault();
        }

        if captured > 0 {
            if let Some(tap) = self.capture.as_mut() {
                if !tap.push(&self.capture_buf[..captured]) {
                    let frames = captured / self.format.channels.max(1) as usize;
                    self.monitor.record_dropped_capture(frames as u64);
                }
            }
        }

        self.position += self.format.buffer_frames as u64;
        self.shared.set_position(self.position);
    }

    /// Apply every queued command
    pub fn drain_commands(&mut self) {
        self.flush_spill();
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::AddTrack(track) => {
                if self.tracks.len() < self.max_tracks {
                    self.tracks.push(track);
                } else {
                    self.release(Garbage::Track(track));
                }
            }
            EngineCommand::RemoveTrack(id) => {
                if let Some(i) = self.tracks.iter().position(|t| t.id() == id) {
                    let track = self.tracks.remove(i);
                    self.release(Garbage::Track(track));
                }
            }
            EngineCommand::ClearTracks => {
                while let Some(track) = self.tracks.pop() {
                    self.release(Garbage::Track(track));
                }
            }
            EngineCommand::SetGain { track, gain } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_gain(gain);
                }
            }
            EngineCommand::SetPan { track, pan } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_pan(pan);
                }
            }
            EngineCommand::SetMute { track, mute } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_mute(mute);
                }
            }
            EngineCommand::SetSolo { track, solo } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_solo(solo);
                }
            }
            EngineCommand::SetRecordEnabled { track, enabled } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_record_enabled(enabled);
                }
            }
            EngineCommand::InsertEffect { track, index, unit } => {
                let rejected = match self.track_mut(track) {
                    Some(t) => t.chain_mut().insert(index, unit).err(),
                    None => Some(unit),
                };
                if let Some(unit) = rejected {
                    self.release(Garbage::Effect(unit));
                }
            }
            EngineCommand::RemoveEffect { track, index } => {
                let removed = self.track_mut(track).and_then(|t| t.chain_mut().remove(index));
                if let Some(unit) = removed {
                    self.release(Garbage::Effect(unit));
                }
            }
            EngineCommand::MoveEffect { track, from, to } => {
                if let Some(t) = self.track_mut(track) {
                    t.chain_mut().move_unit(from, to);
                }
            }
            EngineCommand::UpdateEffect { track, index, config } => {
                if let Some(unit) = self.track_mut(track).and_then(|t| t.chain_mut().get_mut(index)) {
                    unit.apply(&config);
                }
            }
            EngineCommand::SetEffectBypass { track, index, bypass } => {
                if let Some(unit) = self.track_mut(track).and_then(|t| t.chain_mut().get_mut(index)) {
                    unit.set_bypass(bypass);
                }
            }
            EngineCommand::SetMasterGain(gain) => self.mixer.set_master_gain(gain),
            EngineCommand::Seek(position) => {
                self.position = position;
                self.shared.set_position(position);
            }
            EngineCommand::StartCapture(tap) => {
                if let Some(source) = self.source.as_mut() {
                    source.discard_pending();
                }
                if let Some(old) = self.capture.replace(tap) {
                    self.release(Garbage::Capture(old));
                }
            }
            EngineCommand::StopCapture => {
                if let Some(tap) = self.capture.take() {
                    self.release(Garbage::Capture(tap));
                }
            }
        }
    }

    fn track_mut(&mut self, id: TrackId) -> Option<&mut TrackProcessor> {
        self.tracks.iter_mut().find(|t| t.id() == id).map(|t| &mut **t)
    }

    /// Hand a value back to the control side. When the garbage queue is
    /// full the value waits in the spill until a later cycle; nothing is
    /// freed on this thread.
    fn release(&mut self, garbage: Garbage) {
        if let Err(PushError::Full(garbage)) = self.garbage.push(garbage) {
            self.spill.push(garbage);
        }
    }

    fn flush_spill(&mut self) {
        while let Some(garbage) = self.spill.pop() {
            if let Err(PushError::Full(garbage)) = self.garbage.push(garbage) {
                self.spill.push(garbage);
                break;
            }
        }
    }
}

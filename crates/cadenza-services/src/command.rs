//! Lock-free control -> audio handoff
//!
//! The control side builds everything a command needs (track processors,
//! effect units, capture taps) before pushing it, so the audio thread only
//! moves values into place at the start of a cycle. Whatever the audio thread
//! takes out of its active set travels back as [`Garbage`] and is dropped on
//! the control side, keeping deallocation off the audio thread.

use cadenza_core::{EffectConfig, TrackId};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::audio_effects::EffectUnit;
use crate::recorder::CaptureTap;
use crate::track_processor::TrackProcessor;

/// Commands sent from the control thread to the audio thread
#[derive(Debug)]
pub enum EngineCommand {
    AddTrack(Box<TrackProcessor>),
    RemoveTrack(TrackId),
    ClearTracks,
    SetGain { track: TrackId, gain: f32 },
    SetPan { track: TrackId, pan: f32 },
    SetMute { track: TrackId, mute: bool },
    SetSolo { track: TrackId, solo: bool },
    SetRecordEnabled { track: TrackId, enabled: bool },
    InsertEffect { track: TrackId, index: usize, unit: EffectUnit },
    RemoveEffect { track: TrackId, index: usize },
    MoveEffect { track: TrackId, from: usize, to: usize },
    UpdateEffect { track: TrackId, index: usize, config: EffectConfig },
    SetEffectBypass { track: TrackId, index: usize, bypass: bool },
    SetMasterGain(f32),
    Seek(u64),
    StartCapture(CaptureTap),
    StopCapture,
}

/// Values released by the audio thread
#[derive(Debug)]
pub enum Garbage {
    Track(Box<TrackProcessor>),
    Effect(EffectUnit),
    Capture(CaptureTap),
}

pub fn command_channel(capacity: usize) -> (Producer<EngineCommand>, Consumer<EngineCommand>) {
    RingBuffer::new(capacity.max(1))
}

pub fn garbage_channel(capacity: usize) -> (Producer<Garbage>, Consumer<Garbage>) {
    RingBuffer::new(capacity.max(1))
}

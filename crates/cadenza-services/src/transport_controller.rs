//! Transport state machine driving the audio thread
//!
//! The audio loop runs on its own thread only while the transport is Playing
//! or Recording. Pausing or stopping raises the loop's stop flag and joins the
//! thread, which hands the loop back; the in-flight cycle always completes
//! first. While the loop is parked here, queued commands are applied
//! immediately on the calling thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cadenza_core::{CadenzaError, TrackId, Transport, TransportState};
use rtrb::{Consumer, Producer};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::command::{EngineCommand, Garbage};
use crate::io_loop::{AudioIoLoop, SharedState};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Transition(#[from] CadenzaError),
    #[error("Command queue is full")]
    QueueFull,
    #[error("Audio thread failed: {0}")]
    AudioThread(String),
}

enum LoopSlot {
    Idle(Box<AudioIoLoop>),
    Running {
        handle: JoinHandle<Box<AudioIoLoop>>,
        stop: Arc<AtomicBool>,
    },
    /// The loop was lost to a panic or a failed spawn
    Poisoned,
}

pub struct TransportController {
    transport: Transport,
    slot: LoopSlot,
    commands: Producer<EngineCommand>,
    garbage: Consumer<Garbage>,
    /// Tracks whose removal timed out and that the loop has not handed back
    unreleased: Vec<TrackId>,
    shared: Arc<SharedState>,
}

impl TransportController {
    pub fn new(
        io: AudioIoLoop,
        commands: Producer<EngineCommand>,
        garbage: Consumer<Garbage>,
        shared: Arc<SharedState>,
    ) -> Self {
        let transport = Transport::new(io.format().sample_rate);
        shared.set_state(transport.state());
        Self {
            transport,
            slot: LoopSlot::Idle(Box::new(io)),
            commands,
            garbage,
            unreleased: Vec::new(),
            shared,
        }
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn position(&self) -> u64 {
        self.shared.position()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.slot, LoopSlot::Running { .. })
    }

    /// The parked loop, when the audio thread is not running
    pub fn idle_loop(&self) -> Option<&AudioIoLoop> {
        match &self.slot {
            LoopSlot::Idle(io) => Some(io),
            _ => None,
        }
    }

    /// Queue a command for the next cycle boundary
    pub fn dispatch(&mut self, command: EngineCommand) -> Result<(), TransportError> {
        self.collect_garbage();
        if self.commands.push(command).is_err() {
            return Err(TransportError::QueueFull);
        }
        if let LoopSlot::Idle(io) = &mut self.slot {
            io.drain_commands();
            self.collect_garbage();
        }
        Ok(())
    }

    pub fn play(&mut self) -> Result<bool, TransportError> {
        if !self.transport.play()? {
            return Ok(false);
        }
        self.after_start()
    }

    pub fn record(&mut self) -> Result<bool, TransportError> {
        if !self.transport.record()? {
            return Ok(false);
        }
        self.after_start()
    }

    pub fn pause(&mut self) -> Result<bool, TransportError> {
        if !self.transport.pause()? {
            return Ok(false);
        }
        let halted = self.halt();
        self.transport.position_samples = self.shared.position();
        self.shared.set_state(self.transport.state());
        halted.map(|()| true)
    }

    /// Stop, waiting for the in-flight cycle, and rewind. A no-op when
    /// already stopped.
    pub fn stop(&mut self) -> Result<bool, TransportError> {
        if !self.transport.stop() {
            return Ok(false);
        }
        let halted = self.halt();
        self.shared.set_state(self.transport.state());
        halted?;
        self.dispatch(EngineCommand::Seek(0))?;
        Ok(true)
    }

    /// Reposition the shared cursor. Rejected while recording.
    pub fn seek(&mut self, position: u64) -> Result<(), TransportError> {
        self.transport.seek(position)?;
        self.dispatch(EngineCommand::Seek(position))
    }

    /// Check that `record` would be accepted without taking the transition
    pub fn can_record(&self) -> Result<(), TransportError> {
        Ok(self.transport.can_record()?)
    }

    /// Wait until the audio thread hands back every listed track, so their
    /// buffers and effect state are freed before this returns. Returns false
    /// on timeout; the missing ids stay in [`Self::unreleased`] until the loop
    /// hands them back.
    pub fn wait_for_release(&mut self, ids: &[TrackId], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = ids.to_vec();
        loop {
            while let Ok(garbage) = self.garbage.pop() {
                if let Garbage::Track(track) = &garbage {
                    pending.retain(|id| *id != track.id());
                }
                self.note_released(&garbage);
            }
            if pending.is_empty() {
                return true;
            }
            if !self.is_running() {
                return false;
            }
            if Instant::now() >= deadline {
                self.unreleased.extend(pending);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Tracks removed on the control side that the audio thread still holds
    pub fn unreleased(&self) -> &[TrackId] {
        &self.unreleased
    }

    /// Drop everything the audio thread released. Returns how many values
    /// were freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut freed = 0;
        while let Ok(garbage) = self.garbage.pop() {
            self.note_released(&garbage);
            drop(garbage);
            freed += 1;
        }
        if freed > 0 {
            debug!(freed, "Released audio-thread garbage");
        }
        freed
    }

    /// Stop the audio thread and take the loop back, leaving the transport
    /// Stopped
    pub fn into_loop(mut self) -> Option<AudioIoLoop> {
        self.transport.stop();
        let _ = self.halt();
        self.collect_garbage();
        match std::mem::replace(&mut self.slot, LoopSlot::Poisoned) {
            LoopSlot::Idle(io) => Some(*io),
            _ => None,
        }
    }

    fn note_released(&mut self, garbage: &Garbage) {
        if let Garbage::Track(track) = garbage {
            if !self.unreleased.is_empty() {
                self.unreleased.retain(|id| *id != track.id());
            }
        }
    }

    fn after_start(&mut self) -> Result<bool, TransportError> {
        match self.start_thread() {
            Ok(()) => {
                self.shared.set_state(self.transport.state());
                Ok(true)
            }
            Err(e) => {
                self.transport.stop();
                self.shared.set_state(self.transport.state());
                Err(e)
            }
        }
    }

    fn start_thread(&mut self) -> Result<(), TransportError> {
        match std::mem::replace(&mut self.slot, LoopSlot::Poisoned) {
            LoopSlot::Idle(io) => {
                let stop = Arc::new(AtomicBool::new(false));
                let flag = stop.clone();
                let spawned = thread::Builder::new()
                    .name("cadenza-audio".into())
                    .spawn(move || Box::new((*io).run(flag)));
                match spawned {
                    Ok(handle) => {
                        self.slot = LoopSlot::Running { handle, stop };
                        info!(state = ?self.transport.state(), "Audio thread started");
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to spawn audio thread");
                        Err(TransportError::AudioThread(e.to_string()))
                    }
                }
            }
            running @ LoopSlot::Running { .. } => {
                self.slot = running;
                Ok(())
            }
            LoopSlot::Poisoned => Err(TransportError::AudioThread("audio loop unavailable".into())),
        }
    }

    fn halt(&mut self) -> Result<(), TransportError> {
        match std::mem::replace(&mut self.slot, LoopSlot::Poisoned) {
            LoopSlot::Running { handle, stop } => {
                stop.store(true, Ordering::Release);
                match handle.join() {
                    Ok(io) => {
                        self.slot = LoopSlot::Idle(io);
                        info!("Audio thread stopped");
                        Ok(())
                    }
                    Err(_) => {
                        error!("Audio thread panicked");
                        Err(TransportError::AudioThread("audio thread panicked".into()))
                    }
                }
            }
            LoopSlot::Idle(io) => {
                self.slot = LoopSlot::Idle(io);
                Ok(())
            }
            LoopSlot::Poisoned => Err(TransportError::AudioThread("audio loop unavailable".into())),
        }
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.halt();
        }
    }
}

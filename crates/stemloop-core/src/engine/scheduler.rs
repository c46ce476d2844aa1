//! Playback scheduler
//!
//! Drives the `Stopped → Scheduled → Playing` lifecycle for the mix.
//! Starting resets the transport, places every eligible voice at the next
//! bar boundary past the scheduling lead, and starts the clock; `Playing`
//! is reached once the transport crosses that boundary. `stop()` halts the
//! transport and force-stops every voice, audition included, and has fully
//! taken effect when it returns.

use std::sync::Arc;

use super::buffer::AudioBuffer;
use super::error::{AudioError, AudioResult};
use super::mixer::MixSlot;
use super::resource::GainCell;
use super::AudioEngine;

/// Lifecycle of the synchronized mix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    /// Transport running, bar boundary not yet reached
    Scheduled,
    Playing,
}

/// One voice to place at the shared bar boundary
pub struct ScheduledVoice {
    pub slot: MixSlot,
    pub buffer: Arc<AudioBuffer>,
    pub gain: Arc<GainCell>,
}

pub struct PlaybackScheduler {
    engine: Arc<AudioEngine>,
    scheduled_at: Option<u64>,
}

impl PlaybackScheduler {
    pub fn new(engine: Arc<AudioEngine>) -> Self {
        Self {
            engine,
            scheduled_at: None,
        }
    }

    /// Current state, derived from the live transport position
    pub fn state(&self) -> PlaybackState {
        match self.scheduled_at {
            None => PlaybackState::Stopped,
            Some(at) => {
                let transport = self.engine.transport();
                if transport.is_running() && transport.frame() >= at {
                    PlaybackState::Playing
                } else {
                    PlaybackState::Scheduled
                }
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduled_at.is_none()
    }

    /// Schedule every voice at the same upcoming bar boundary and start
    /// the transport. Fails with `NothingToPlay` when no voice is given;
    /// the transport is left stopped in that case.
    ///
    /// Any previous schedule and any sounding audition are stopped first,
    /// so back-to-back calls behave like a restart.
    pub fn start(&mut self, voices: Vec<ScheduledVoice>) -> AudioResult<u64> {
        self.stop();
        if voices.is_empty() {
            return Err(AudioError::NothingToPlay);
        }

        let start_at = self.engine.next_bar_after_lead();
        for voice in voices {
            self.engine
                .schedule_voice(voice.slot, voice.buffer, voice.gain, start_at);
        }
        self.engine.start_transport();
        self.scheduled_at = Some(start_at);

        log::debug!(
            "Scheduled {} voice(s) at transport frame {}",
            self.engine.voice_count(),
            start_at
        );
        Ok(start_at)
    }

    /// Halt the transport, clear the schedule, and force-stop every
    /// active voice. Idempotent and infallible.
    pub fn stop(&mut self) {
        self.engine.force_stop_all();
        self.engine.reset_transport();
        self.scheduled_at = None;
    }
}

//! Audio engine
//!
//! ```text
//!  session thread                    audio callback
//!  ┌─────────────┐   Mutex<Mixer>   ┌─────────────┐
//!  │ AudioEngine │ ───────────────► │   process() │
//!  └─────────────┘                  └──────┬──────┘
//!         ▲        crossbeam channel       │
//!         └─────────────────────────────────┘
//! ```
//!
//! `AudioEngine` is the session-facing handle: it owns the mixer behind a
//! mutex, shares the lock-free transport view, and exposes the engine
//! event receiver. The CPAL stream itself lives in `output::OutputHandle`
//! so the engine stays `Send`.

pub mod buffer;
pub mod error;
pub mod mixer;
pub mod output;
pub mod resource;
pub mod scheduler;
pub mod transport;

use std::sync::{Arc, Mutex};

use crossbeam::channel::{unbounded, Receiver};

use self::buffer::AudioBuffer;
use self::error::AudioResult;
use self::mixer::{EngineEvent, Mixer, MixSlot};
use self::output::OutputHandle;
use self::resource::GainCell;
use self::transport::TransportShared;

use crate::types::{StereoSample, TrackId};

pub struct AudioEngine {
    sample_rate: u32,
    master_gain: Arc<GainCell>,
    mixer: Arc<Mutex<Mixer>>,
    transport: Arc<TransportShared>,
    events: Receiver<EngineEvent>,
}

impl AudioEngine {
    pub fn new(bpm: u32, sample_rate: u32) -> Self {
        let master_gain = Arc::new(GainCell::new(1.0));
        let (tx, rx) = unbounded();
        let mixer = Mixer::new(bpm, sample_rate, Arc::clone(&master_gain), tx);
        let transport = mixer.transport_shared();
        Self {
            sample_rate,
            master_gain,
            mixer: Arc::new(Mutex::new(mixer)),
            transport,
            events: rx,
        }
    }

    /// Open the default output device and start streaming
    pub fn start_output(&self) -> AudioResult<OutputHandle> {
        output::start_output(Arc::clone(&self.mixer))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn master_gain(&self) -> Arc<GainCell> {
        Arc::clone(&self.master_gain)
    }

    /// Engine events produced inside the audio callback
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Lock-free transport view
    pub fn transport(&self) -> &TransportShared {
        &self.transport
    }

    pub fn bpm(&self) -> u32 {
        self.lock().bpm()
    }

    pub fn set_bpm(&self, bpm: u32) {
        self.lock().set_bpm(bpm);
    }

    /// Stop and rewind the transport, dropping every mix voice
    pub fn reset_transport(&self) {
        self.lock().reset_transport();
    }

    pub fn start_transport(&self) {
        self.lock().start_transport();
    }

    pub fn next_bar_after_lead(&self) -> u64 {
        self.lock().next_bar_after_lead()
    }

    pub fn schedule_voice(
        &self,
        slot: MixSlot,
        buffer: Arc<AudioBuffer>,
        gain: Arc<GainCell>,
        start_at: u64,
    ) {
        self.lock().schedule_voice(slot, buffer, gain, start_at);
    }

    pub fn voice_count(&self) -> usize {
        self.lock().voice_count()
    }

    /// Stop everything, mix voices and auditions alike
    pub fn force_stop_all(&self) {
        self.lock().force_stop_all();
    }

    pub fn start_audition(
        &self,
        track: TrackId,
        buffer: Arc<AudioBuffer>,
        gain: Arc<GainCell>,
        offset_frames: usize,
        budget_frames: u64,
    ) -> Option<TrackId> {
        self.lock()
            .start_audition(track, buffer, gain, offset_frames, budget_frames)
    }

    pub fn stop_audition(&self, track: TrackId) -> bool {
        self.lock().stop_audition(track)
    }

    pub fn stop_any_audition(&self) -> Option<TrackId> {
        self.lock().stop_any_audition()
    }

    pub fn active_audition(&self) -> Option<TrackId> {
        self.lock().active_audition()
    }

    /// Drive the mixer directly. Used by tests and offline rendering; the
    /// live path goes through the CPAL callback instead.
    pub fn process(&self, out: &mut [StereoSample]) {
        self.lock().process(out);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Mixer> {
        self.mixer.lock().expect("mixer lock poisoned")
    }
}

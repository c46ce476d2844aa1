//! Voice mixer
//!
//! Owns every sounding voice and the transport clock. The output backend
//! (or a test) calls `process()` to fill a buffer; the session thread
//! manipulates voices through the `AudioEngine` wrapper, which holds this
//! struct behind a mutex.
//!
//! Two kinds of voices exist:
//! - **mix voices**: looping, gated on the transport, started at a
//!   scheduled bar boundary
//! - **the audition voice**: at most one system-wide, one-shot, bounded by
//!   a frame budget, independent of the transport

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::Sender;

use super::buffer::AudioBuffer;
use super::resource::GainCell;
use super::transport::{TransportClock, TransportShared};
use crate::types::{StereoSample, TrackId};

/// A `(track, stem)` voice slot in the mix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixSlot {
    pub track: TrackId,
    pub stem: usize,
}

/// Events produced inside `process()` and drained by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The audition voice ran out of its frame budget (or its buffer)
    AuditionEnded { track: TrackId },
}

struct Voice {
    buffer: Arc<AudioBuffer>,
    gain: Arc<GainCell>,
    playhead: usize,
    looping: bool,
    /// Transport frame at which to begin sounding; None once started
    start_at: Option<u64>,
    /// Remaining frame budget for one-shot voices
    remaining: Option<u64>,
}

impl Voice {
    /// Produce the next frame, or None if the voice is finished
    #[inline]
    fn next_frame(&mut self) -> Option<StereoSample> {
        if let Some(rem) = self.remaining.as_mut() {
            if *rem == 0 {
                return None;
            }
            *rem -= 1;
        }
        if self.playhead >= self.buffer.len() {
            if self.looping {
                self.playhead = 0;
            } else {
                return None;
            }
        }
        let frame = self.buffer.frames[self.playhead].scale(self.gain.get());
        self.playhead += 1;
        Some(frame)
    }
}

/// The mixer behind the audio callback
pub struct Mixer {
    transport: TransportClock,
    shared: Arc<TransportShared>,
    master_gain: Arc<GainCell>,
    voices: HashMap<MixSlot, Voice>,
    audition: Option<(TrackId, Voice)>,
    events: Sender<EngineEvent>,
}

impl Mixer {
    pub fn new(
        bpm: u32,
        sample_rate: u32,
        master_gain: Arc<GainCell>,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            transport: TransportClock::new(bpm, sample_rate),
            shared: Arc::new(TransportShared::default()),
            master_gain,
            voices: HashMap::new(),
            audition: None,
            events,
        }
    }

    /// Lock-free transport view for the scheduler
    pub fn transport_shared(&self) -> Arc<TransportShared> {
        Arc::clone(&self.shared)
    }

    pub fn bpm(&self) -> u32 {
        self.transport.bpm()
    }

    pub fn set_bpm(&mut self, bpm: u32) {
        self.transport.set_bpm(bpm);
    }

    /// Stop the transport, rewind it, and drop every scheduled mix voice.
    /// Idempotent; called before every re-schedule.
    pub fn reset_transport(&mut self) {
        self.transport.reset();
        self.voices.clear();
        self.publish_shared();
    }

    /// Schedule a looping mix voice to begin at an absolute transport frame
    pub fn schedule_voice(
        &mut self,
        slot: MixSlot,
        buffer: Arc<AudioBuffer>,
        gain: Arc<GainCell>,
        start_at: u64,
    ) {
        self.voices.insert(
            slot,
            Voice {
                buffer,
                gain,
                playhead: 0,
                looping: true,
                start_at: Some(start_at),
                remaining: None,
            },
        );
    }

    /// Begin advancing the transport
    pub fn start_transport(&mut self) {
        self.transport.start();
        self.publish_shared();
    }

    /// First bar boundary after the scheduling lead, at the current tempo
    pub fn next_bar_after_lead(&self) -> u64 {
        self.transport.next_bar_after_lead()
    }

    /// Number of scheduled or sounding mix voices
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Force-stop every voice, mix and audition alike. Never fails; missing
    /// voices are a no-op.
    pub fn force_stop_all(&mut self) {
        self.voices.clear();
        self.audition = None;
    }

    /// Replace the audition voice. Returns the track whose audition was
    /// displaced, if any.
    pub fn start_audition(
        &mut self,
        track: TrackId,
        buffer: Arc<AudioBuffer>,
        gain: Arc<GainCell>,
        offset_frames: usize,
        budget_frames: u64,
    ) -> Option<TrackId> {
        let displaced = self.audition.take().map(|(t, _)| t);
        self.audition = Some((
            track,
            Voice {
                playhead: offset_frames.min(buffer.len()),
                buffer,
                gain,
                looping: false,
                start_at: None,
                remaining: Some(budget_frames),
            },
        ));
        displaced
    }

    /// Stop the audition voice if it belongs to `track`
    pub fn stop_audition(&mut self, track: TrackId) -> bool {
        if matches!(self.audition, Some((t, _)) if t == track) {
            self.audition = None;
            true
        } else {
            false
        }
    }

    /// Stop whatever audition voice is active. Returns its track.
    pub fn stop_any_audition(&mut self) -> Option<TrackId> {
        self.audition.take().map(|(t, _)| t)
    }

    /// Track of the currently sounding audition voice, if any
    pub fn active_audition(&self) -> Option<TrackId> {
        self.audition.as_ref().map(|(t, _)| *t)
    }

    /// Fill an output buffer, advancing the transport and all voices
    pub fn process(&mut self, out: &mut [StereoSample]) {
        let master = self.master_gain.get();

        for sample in out.iter_mut() {
            let mut acc = StereoSample::silence();

            if self.transport.is_running() {
                let now = self.transport.frame();
                for voice in self.voices.values_mut() {
                    if let Some(at) = voice.start_at {
                        if now < at {
                            continue;
                        }
                        voice.start_at = None;
                    }
                    if let Some(frame) = voice.next_frame() {
                        acc += frame;
                    }
                }
                self.transport.tick();
            }

            let mut ended = None;
            if let Some((track, voice)) = self.audition.as_mut() {
                match voice.next_frame() {
                    Some(frame) => acc += frame,
                    None => ended = Some(*track),
                }
            }
            if let Some(track) = ended {
                self.audition = None;
                // Callback-side send; the session drains this on its own
                // thread
                let _ = self.events.send(EngineEvent::AuditionEnded { track });
            }

            *sample = acc.scale(master);
        }

        self.publish_shared();
    }

    fn publish_shared(&self) {
        use std::sync::atomic::Ordering;
        self.shared
            .frame
            .store(self.transport.frame(), Ordering::Relaxed);
        self.shared
            .running
            .store(self.transport.is_running(), Ordering::Relaxed);
    }
}

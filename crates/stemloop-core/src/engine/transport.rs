//! Shared transport clock
//!
//! One transport drives the whole session. Its virtual time is a frame
//! counter advanced by the mixer while running; it is fully stopped and its
//! schedule cleared before every re-schedule. Auditions do not use the
//! transport at all.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::{BEATS_PER_BAR, TRANSPORT_LEAD_MS};

/// Lock-free transport state readable from any thread
///
/// The mixer writes these from the audio callback; the scheduler reads them
/// to derive its `Scheduled -> Playing` transition without locking.
#[derive(Debug, Default)]
pub struct TransportShared {
    /// Virtual time in frames since the last transport start
    pub frame: AtomicU64,
    /// Whether the transport is running
    pub running: AtomicBool,
}

impl TransportShared {
    /// Current virtual time in frames (lock-free)
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Whether the transport is running (lock-free)
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// The mixer-owned side of the transport
#[derive(Debug)]
pub struct TransportClock {
    /// Tempo in beats per minute
    bpm: u32,
    /// Sample rate of the audio stream
    sample_rate: u32,
    /// Virtual time in frames since the last start
    frame: u64,
    /// Whether the transport is advancing
    running: bool,
}

impl TransportClock {
    /// Create a stopped transport at the given tempo
    pub fn new(bpm: u32, sample_rate: u32) -> Self {
        Self {
            bpm,
            sample_rate,
            frame: 0,
            running: false,
        }
    }

    /// Current tempo
    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    /// Change tempo. Bar geometry from the new tempo applies to the next
    /// schedule; an already-running schedule is never retimed.
    pub fn set_bpm(&mut self, bpm: u32) {
        self.bpm = bpm.max(1);
    }

    /// Whether the transport is advancing
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current virtual time in frames
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Begin advancing virtual time
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop and rewind virtual time to zero
    pub fn reset(&mut self) {
        self.running = false;
        self.frame = 0;
    }

    /// Advance one frame; returns the new virtual time
    #[inline]
    pub fn tick(&mut self) -> u64 {
        if self.running {
            self.frame += 1;
        }
        self.frame
    }

    /// Length of one bar in frames at the current tempo
    pub fn frames_per_bar(&self) -> u64 {
        let frames_per_beat = self.sample_rate as f64 * 60.0 / self.bpm as f64;
        (frames_per_beat * BEATS_PER_BAR as f64).round().max(1.0) as u64
    }

    /// The first bar boundary at or after the scheduling lead time.
    ///
    /// Called right after `reset()`, so virtual time is zero and the next
    /// boundary is simply the first bar that clears the lead window.
    pub fn next_bar_after_lead(&self) -> u64 {
        let bar = self.frames_per_bar();
        let lead = self.sample_rate as u64 * TRANSPORT_LEAD_MS as u64 / 1000;
        bar * lead.div_ceil(bar).max(1)
    }
}

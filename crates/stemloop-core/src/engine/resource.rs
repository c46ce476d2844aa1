//! Playable resources
//!
//! A `PlayableResource` is a decoded, ready-to-start buffer for one
//! `(track, stem)` slot, paired with its own gain cell. The gain cell is an
//! atomic so the session thread can flip mute state while the audio thread
//! is reading it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::buffer::AudioBuffer;

/// Lock-free gain value shared between the session and the audio callback
///
/// Stores the f32 bit pattern in an `AtomicU32`. `Ordering::Relaxed` is
/// sufficient: only visibility matters, not ordering against other writes.
#[derive(Debug)]
pub struct GainCell(AtomicU32);

impl GainCell {
    /// Create a gain cell with an initial value
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// Read the current gain (lock-free)
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Set the gain (lock-free)
    #[inline]
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// A loaded, ready-to-start audio resource for one `(track, stem)` slot
///
/// Exactly one resource may exist per slot; the orchestrator disposes the
/// previous one before installing a replacement. The buffer is shared with
/// any active voices through `Arc`, so a superseded resource's audio drains
/// naturally once its voices are stopped.
#[derive(Debug)]
pub struct PlayableResource {
    /// Decoded audio
    pub buffer: Arc<AudioBuffer>,
    /// Per-slot gain (0.0 = muted, 1.0 = active)
    pub gain: Arc<GainCell>,
    /// The processed URL this resource was built from
    pub source_url: String,
}

impl PlayableResource {
    /// Create a resource with gain derived from the slot's mute state
    pub fn new(buffer: Arc<AudioBuffer>, source_url: String, muted: bool) -> Self {
        Self {
            buffer,
            gain: Arc::new(GainCell::new(if muted { 0.0 } else { 1.0 })),
            source_url,
        }
    }

    /// Apply a mute flag to the gain cell
    pub fn set_muted(&self, muted: bool) {
        self.gain.set(if muted { 0.0 } else { 1.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn test_buffer() -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer {
            frames: vec![StereoSample::new(0.5, 0.5); 100],
            sample_rate: 48_000,
        })
    }

    #[test]
    fn test_gain_cell_roundtrip() {
        let cell = GainCell::new(1.0);
        assert_eq!(cell.get(), 1.0);
        cell.set(0.0);
        assert_eq!(cell.get(), 0.0);
    }

    #[test]
    fn test_resource_mute_gain() {
        let res = PlayableResource::new(test_buffer(), "/p/a.wav".into(), true);
        assert_eq!(res.gain.get(), 0.0);
        res.set_muted(false);
        assert_eq!(res.gain.get(), 1.0);
        res.set_muted(true);
        assert_eq!(res.gain.get(), 0.0);
    }
}

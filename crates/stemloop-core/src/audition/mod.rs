//! Audition controller
//!
//! Plays a bounded excerpt of one stem, independent of the synchronized
//! mix. Each track carries an `AuditionHandle` moving through
//! `Idle → Loading → Previewing → Idle`; at most one audition sounds at a
//! time across the session.
//!
//! Two source paths:
//! - a rendered `PlayableResource` already installed at the slot is reused
//!   directly, through the engine's separate audition playhead (so the mix
//!   voice's looping position is untouched)
//! - otherwise the original stem file is fetched raw over HTTP on a worker
//!   thread, decoded, and cached on the handle for replay
//!
//! Excerpt start offsets, from the section setting: start of the stem,
//! `dur/2 - 1 s`, or `dur - excerpt * 1.2`, clamped to zero.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::catalog::{CatalogClient, StemFetcher};
use crate::engine::buffer::{decode_bytes, AudioBuffer};
use crate::engine::resource::GainCell;
use crate::engine::AudioEngine;
use crate::types::{is_placeholder, PreviewQuality, PreviewSection, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditionState {
    #[default]
    Idle,
    Loading,
    Previewing,
}

/// What a toggle call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditionOutcome {
    /// Excerpt is sounding
    Started,
    /// Raw fetch in progress; a Loaded/Failed event will follow
    LoadStarted,
    /// This track was previewing (or loading) and has been stopped
    Stopped,
    /// Placeholder stem or no selection; nothing to audition
    Unavailable,
}

/// Worker-thread results, drained by the session and fed back through
/// `apply_event`
pub enum AuditionEvent {
    Loaded {
        track: TrackId,
        generation: u64,
        url: String,
        buffer: Arc<AudioBuffer>,
    },
    Failed {
        track: TrackId,
        generation: u64,
        reason: String,
    },
}

#[derive(Default)]
struct AuditionHandle {
    state: AuditionState,
    /// Bumped on every toggle so stale load results are discarded
    generation: u64,
    /// Last raw stem decoded for this track, kept for replay
    cached: Option<(String, Arc<AudioBuffer>)>,
}

/// Start offset in seconds for an excerpt of `total` seconds
pub fn section_offset(section: PreviewSection, total: f64, excerpt: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    match section {
        PreviewSection::Start => 0.0,
        PreviewSection::Middle => (total / 2.0 - 1.0).max(0.0),
        PreviewSection::End => (total - excerpt * 1.2).max(0.0),
    }
}

pub struct AuditionController {
    engine: Arc<AudioEngine>,
    fetcher: Arc<dyn StemFetcher>,
    catalog: CatalogClient,
    handles: HashMap<TrackId, AuditionHandle>,
    tx: Sender<AuditionEvent>,
    rx: Receiver<AuditionEvent>,
}

impl AuditionController {
    pub fn new(
        engine: Arc<AudioEngine>,
        fetcher: Arc<dyn StemFetcher>,
        catalog: CatalogClient,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            engine,
            fetcher,
            catalog,
            handles: HashMap::new(),
            tx,
            rx,
        }
    }

    pub fn state(&self, track: TrackId) -> AuditionState {
        self.handles
            .get(&track)
            .map(|h| h.state)
            .unwrap_or(AuditionState::Idle)
    }

    /// Load results from the fetch workers
    pub fn events(&self) -> &Receiver<AuditionEvent> {
        &self.rx
    }

    /// Toggle the audition for one track. `rendered` is the installed
    /// resource buffer at the slot, if any; `track_name` and `stem_path`
    /// identify the original file for the raw-fetch fallback.
    pub fn toggle(
        &mut self,
        track: TrackId,
        track_name: &str,
        stem_path: Option<&str>,
        rendered: Option<Arc<AudioBuffer>>,
        quality: PreviewQuality,
        section: PreviewSection,
    ) -> AuditionOutcome {
        let state = self.state(track);
        if state != AuditionState::Idle {
            self.stop(track);
            return AuditionOutcome::Stopped;
        }

        let Some(path) = stem_path else {
            return AuditionOutcome::Unavailable;
        };
        if is_placeholder(path) {
            log::warn!("Cannot audition placeholder stem for {}", track_name);
            return AuditionOutcome::Unavailable;
        }

        // One audible audition at a time
        self.stop_all();
        let url = raw_url(&self.catalog, path);

        let handle = self.handles.entry(track).or_default();
        handle.generation += 1;

        if let Some(buffer) = rendered {
            log::info!("Auditioning rendered stem for {}", track_name);
            self.play(track, buffer, quality, section);
            return AuditionOutcome::Started;
        }

        // Replay a previously fetched raw stem without another round trip
        if let Some((cached_url, buffer)) = handle.cached.clone() {
            if cached_url == url {
                log::info!("Auditioning cached raw stem for {}", track_name);
                self.play(track, buffer, quality, section);
                return AuditionOutcome::Started;
            }
        }

        log::info!("Fetching raw stem for audition of {}: {}", track_name, url);
        handle.state = AuditionState::Loading;
        let generation = handle.generation;
        self.spawn_fetch(track, generation, url);
        AuditionOutcome::LoadStarted
    }

    /// Fold a worker result back in. Stale results (the user toggled in
    /// the meantime) are dropped silently.
    pub fn apply_event(
        &mut self,
        event: AuditionEvent,
        quality: PreviewQuality,
        section: PreviewSection,
    ) -> Option<AuditionOutcome> {
        match event {
            AuditionEvent::Loaded {
                track,
                generation,
                url,
                buffer,
            } => {
                let handle = self.handles.entry(track).or_default();
                if handle.generation != generation || handle.state != AuditionState::Loading {
                    return None;
                }
                handle.cached = Some((url, Arc::clone(&buffer)));
                self.play(track, buffer, quality, section);
                Some(AuditionOutcome::Started)
            }
            AuditionEvent::Failed {
                track,
                generation,
                reason,
            } => {
                let handle = self.handles.entry(track).or_default();
                if handle.generation != generation {
                    return None;
                }
                log::warn!("Audition load failed for {}: {}", track, reason);
                handle.state = AuditionState::Idle;
                Some(AuditionOutcome::Unavailable)
            }
        }
    }

    /// The engine finished an excerpt on its own
    pub fn note_ended(&mut self, track: TrackId) {
        if let Some(handle) = self.handles.get_mut(&track) {
            if handle.state == AuditionState::Previewing {
                handle.state = AuditionState::Idle;
            }
        }
    }

    /// Stop one track's audition; other tracks are untouched
    pub fn stop(&mut self, track: TrackId) {
        self.engine.stop_audition(track);
        if let Some(handle) = self.handles.get_mut(&track) {
            handle.state = AuditionState::Idle;
            handle.generation += 1;
        }
    }

    /// Stop every audition, sounding or loading
    pub fn stop_all(&mut self) {
        self.engine.stop_any_audition();
        for handle in self.handles.values_mut() {
            if handle.state != AuditionState::Idle {
                handle.state = AuditionState::Idle;
                handle.generation += 1;
            }
        }
    }

    fn play(
        &mut self,
        track: TrackId,
        buffer: Arc<AudioBuffer>,
        quality: PreviewQuality,
        section: PreviewSection,
    ) {
        let rate = f64::from(buffer.sample_rate);
        let excerpt = quality.duration_secs();
        let offset = section_offset(section, buffer.duration_secs(), excerpt);
        let offset_frames = (offset * rate) as usize;
        let budget_frames = (excerpt * rate) as u64;

        self.engine.start_audition(
            track,
            buffer,
            Arc::new(GainCell::new(1.0)),
            offset_frames,
            budget_frames,
        );
        let handle = self.handles.entry(track).or_default();
        handle.state = AuditionState::Previewing;
    }

    fn spawn_fetch(&self, track: TrackId, generation: u64, url: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.tx.clone();
        let builder = thread::Builder::new().name("audition-fetch".to_string());
        let spawned = builder.spawn(move || {
            let result = fetcher
                .fetch(&url)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    let ext = url.rsplit('.').next().filter(|e| e.len() <= 4);
                    decode_bytes(bytes, ext).map_err(|e| e.to_string())
                });
            let event = match result {
                Ok(buffer) => AuditionEvent::Loaded {
                    track,
                    generation,
                    url,
                    buffer,
                },
                Err(reason) => AuditionEvent::Failed {
                    track,
                    generation,
                    reason,
                },
            };
            let _ = tx.send(event);
        });
        if let Err(e) = spawned {
            log::error!("Failed to spawn audition fetch worker: {}", e);
        }
    }
}

/// Resolve a catalog stem path to its raw fetch URL. Paths shaped
/// `stems/<category>/<file>` go through the dedicated backend route;
/// anything else is fetched as-is relative to the backend.
pub fn raw_url(catalog: &CatalogClient, path: &str) -> String {
    if path.starts_with("http") {
        return path.to_string();
    }
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.splitn(3, '/');
    if let (Some("stems"), Some(category), Some(file)) = (parts.next(), parts.next(), parts.next())
    {
        catalog.raw_stem_url(category, file)
    } else {
        format!("/{}", trimmed)
    }
}

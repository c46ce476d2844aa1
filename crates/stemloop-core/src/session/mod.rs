//! Stem session
//!
//! The source of truth for the loop being assembled: the fixed track list
//! with candidate stems, selections, mute flags, and installed playable
//! resources. Every mutation goes through a session method on the owner's
//! thread; worker results arrive over channels and are folded in by
//! `pump_events`, so there is exactly one serialized mutation boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::{rng, Rng};

use crate::audition::{AuditionController, AuditionOutcome, AuditionState};
use crate::catalog::{CatalogClient, CatalogTrack, StemFetcher};
use crate::engine::buffer::AudioBuffer;
use crate::engine::error::AudioResult;
use crate::engine::mixer::{EngineEvent, MixSlot};
use crate::engine::resource::PlayableResource;
use crate::engine::scheduler::{PlaybackScheduler, PlaybackState, ScheduledVoice};
use crate::engine::AudioEngine;
use crate::export::{ExportError, ExportRequest};
use crate::music::{parse_stem_info, stem_file_name, StemInfo};
use crate::render::{
    build_request, CacheDecision, PreviewInvalidator, RenderBackend, RenderCompletion,
    RenderError, RenderMode, RenderOrchestrator, StemOutcome, TrackView,
};
use crate::types::{
    is_placeholder, PreviewQuality, PreviewSection, TrackId, DEFAULT_UNMUTED, KEY_CHOICES,
    RANDOM_BPM_MAX, RANDOM_BPM_MIN, SAMPLE_RATE,
};

/// One candidate stem on a track
#[derive(Debug, Clone)]
pub struct StemRef {
    pub path: String,
    pub info: StemInfo,
}

/// One instrument layer
pub struct Track {
    pub id: TrackId,
    pub name: &'static str,
    pub stems: Vec<StemRef>,
    pub selected: Option<usize>,
    pub muted: bool,
    pub default_unmuted: bool,
    /// Installed playable resources, keyed by stem index. Insertion
    /// replaces (and thereby disposes) a superseded resource.
    resources: HashMap<usize, PlayableResource>,
}

impl Track {
    fn selected_path(&self) -> Option<&str> {
        self.selected
            .and_then(|i| self.stems.get(i))
            .map(|s| s.path.as_str())
    }

    fn selected_resource(&self) -> Option<&PlayableResource> {
        self.selected.and_then(|i| self.resources.get(&i))
    }

    pub fn resource_at(&self, stem: usize) -> Option<&PlayableResource> {
        self.resources.get(&stem)
    }
}

/// What `toggle_mute` did (it never fails)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteOutcome {
    Muted,
    Unmuted,
    /// Unmuted a selection with no rendered audio; a render of the given
    /// kind would make it audible. Never auto-triggered.
    RenderSuggested(RenderHint),
    /// Invalid track id; nothing changed
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderHint {
    Preview,
    Full,
}

/// Notifications produced while folding worker results back in
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RenderFinished {
        preview: bool,
        installed: usize,
        /// (track name, reason) for every slot that could not be resolved
        failures: Vec<(String, String)>,
    },
    RenderFailed {
        preview: bool,
        error: String,
    },
    PreviewCacheInvalidated,
    AuditionStarted {
        track: TrackId,
    },
    AuditionEnded {
        track: TrackId,
    },
    AuditionUnavailable {
        track: TrackId,
    },
}

pub struct StemSession {
    engine: Arc<AudioEngine>,
    scheduler: PlaybackScheduler,
    audition: AuditionController,
    orchestrator: RenderOrchestrator,
    invalidator: PreviewInvalidator,
    tracks: Vec<Track>,
    bpm: u32,
    key: String,
    preview_quality: PreviewQuality,
    preview_section: PreviewSection,
    preview_processed: bool,
    full_processed: bool,
    /// Muted stems tagged for deferred background rendering by past
    /// preview requests
    deferred_muted: Vec<String>,
}

impl StemSession {
    /// Assemble a session over explicit backend parts. The catalog listing
    /// defines the stems per track; the fixed layout and default mute
    /// state come from the track table.
    pub fn new(
        catalog: Vec<CatalogTrack>,
        backend: Arc<dyn RenderBackend>,
        fetcher: Arc<dyn StemFetcher>,
        catalog_client: CatalogClient,
        bpm: u32,
        key: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let engine = Arc::new(AudioEngine::new(bpm, SAMPLE_RATE));
        let tracks = catalog
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let unmuted = DEFAULT_UNMUTED.contains(&entry.name);
                let stems: Vec<StemRef> = entry
                    .stems
                    .into_iter()
                    .map(|path| StemRef {
                        info: parse_stem_info(&path),
                        path,
                    })
                    .collect();
                Track {
                    id: TrackId(index),
                    name: entry.name,
                    selected: if stems.is_empty() { None } else { Some(0) },
                    stems,
                    muted: !unmuted,
                    default_unmuted: unmuted,
                    resources: HashMap::new(),
                }
            })
            .collect();

        Self {
            scheduler: PlaybackScheduler::new(Arc::clone(&engine)),
            audition: AuditionController::new(
                Arc::clone(&engine),
                Arc::clone(&fetcher),
                catalog_client,
            ),
            orchestrator: RenderOrchestrator::new(backend, fetcher),
            invalidator: PreviewInvalidator::new(bpm, key.clone()),
            engine,
            tracks,
            bpm,
            key,
            preview_quality: PreviewQuality::Short,
            preview_section: PreviewSection::Start,
            preview_processed: false,
            full_processed: false,
            deferred_muted: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn preview_quality(&self) -> PreviewQuality {
        self.preview_quality
    }

    pub fn preview_section(&self) -> PreviewSection {
        self.preview_section
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    pub fn audition_state(&self, track: TrackId) -> AuditionState {
        self.audition.state(track)
    }

    pub fn deferred_muted(&self) -> &[String] {
        &self.deferred_muted
    }

    // --- selection ---

    /// Set a track's selection. Out-of-range indices and unknown tracks
    /// are silent no-ops.
    pub fn select_stem(&mut self, track: TrackId, index: usize) {
        let Some(entry) = self.tracks.get(track.0) else {
            log::debug!("select_stem: unknown {}", track);
            return;
        };
        if index >= entry.stems.len() {
            log::debug!("select_stem: index {} out of range for {}", index, track);
            return;
        }
        // Never hot-swap a running mix
        if !self.scheduler.is_stopped() {
            self.stop_playback();
        }

        let entry = &mut self.tracks[track.0];
        entry.selected = Some(index);
        if let Some(resource) = entry.resources.get(&index) {
            resource.set_muted(entry.muted);
        }
        log::info!("{}: selected stem {}", entry.name, index);
    }

    /// Pick a uniformly random stem for one track
    pub fn randomize_stem(&mut self, track: TrackId) {
        let Some(entry) = self.tracks.get(track.0) else {
            return;
        };
        if entry.stems.is_empty() {
            return;
        }
        let index = rng().random_range(0..entry.stems.len());
        self.select_stem(track, index);
    }

    /// Randomize every track's selection plus the session tempo and key
    pub fn randomize_all(&mut self, now: Instant) {
        if !self.scheduler.is_stopped() {
            self.stop_playback();
        }
        let mut generator = rng();
        for entry in &mut self.tracks {
            if entry.stems.is_empty() {
                continue;
            }
            let index = generator.random_range(0..entry.stems.len());
            entry.selected = Some(index);
            if let Some(resource) = entry.resources.get(&index) {
                resource.set_muted(entry.muted);
            }
        }
        let bpm = generator.random_range(RANDOM_BPM_MIN..RANDOM_BPM_MAX);
        let key = KEY_CHOICES[generator.random_range(0..KEY_CHOICES.len())].to_string();
        log::info!("Randomized all tracks: {} BPM, {}", bpm, key);
        self.set_bpm(bpm, now);
        self.set_key(&key, now);
    }

    // --- mute ---

    /// Flip a track's mute flag and apply it to the installed resource.
    /// Never fails; a missing resource yields a render hint instead.
    pub fn toggle_mute(&mut self, track: TrackId) -> MuteOutcome {
        if track.0 >= self.tracks.len() {
            return MuteOutcome::Ignored;
        }
        if !self.scheduler.is_stopped() {
            self.stop_playback();
        }

        let preview_processed = self.preview_processed;
        let full_processed = self.full_processed;
        let pending = self.orchestrator.has_pending();

        let entry = &mut self.tracks[track.0];
        let unmuting = entry.muted;
        entry.muted = !entry.muted;
        log::info!(
            "{}: {}",
            entry.name,
            if entry.muted { "muted" } else { "unmuted" }
        );

        if let Some(selected) = entry.selected {
            if let Some(resource) = entry.resources.get(&selected) {
                resource.set_muted(entry.muted);
            } else if unmuting {
                // The stem was skipped by preview rendering (or nothing
                // has been rendered yet); the caller may want to render
                if preview_processed && !full_processed {
                    return MuteOutcome::RenderSuggested(RenderHint::Full);
                }
                if !pending && !preview_processed {
                    return MuteOutcome::RenderSuggested(RenderHint::Preview);
                }
            }
        }
        if entry.muted {
            MuteOutcome::Muted
        } else {
            MuteOutcome::Unmuted
        }
    }

    /// Restore the default mute vector, independent of prior state
    pub fn reset_to_defaults(&mut self) {
        for entry in &mut self.tracks {
            entry.muted = !entry.default_unmuted;
            if let Some(resource) = entry.selected_resource() {
                resource.set_muted(entry.muted);
            }
        }
        log::info!("Mute state reset to defaults");
    }

    // --- tempo and key ---

    pub fn set_bpm(&mut self, bpm: u32, now: Instant) {
        self.bpm = bpm;
        self.engine.set_bpm(bpm);
        self.invalidator.note_bpm(bpm, now);
    }

    pub fn set_key(&mut self, key: &str, now: Instant) {
        self.key = key.to_string();
        self.invalidator.note_key(key, now);
    }

    pub fn set_preview_quality(&mut self, quality: PreviewQuality) {
        self.preview_quality = quality;
    }

    /// Changing the excerpt section stops ongoing auditions and drops
    /// cached previews (they were cut from a different part of the stem)
    pub fn set_preview_section(&mut self, section: PreviewSection) {
        if section == self.preview_section {
            return;
        }
        self.preview_section = section;
        self.audition.stop_all();
        self.orchestrator.invalidate_previews();
        self.preview_processed = false;
    }

    // --- fingerprint ---

    /// Deterministic identity of the current configuration:
    /// `Key:<compact> | BPM:<n>` then `<track>:<stem file>` per selected
    /// track, in track declaration order
    pub fn build_fingerprint(&self) -> String {
        let mut components = vec![
            format!("Key:{}", self.key.replace(' ', "")),
            format!("BPM:{}", self.bpm),
        ];
        for entry in &self.tracks {
            if let Some(path) = entry.selected_path() {
                components.push(format!("{}:{}", entry.name, stem_file_name(path)));
            }
        }
        components.join(" | ")
    }

    // --- rendering ---

    /// Request a render of the current configuration. Parameters are
    /// snapshotted now; an identical in-flight or completed request is
    /// joined rather than re-issued.
    pub fn generate(&mut self, preview: bool) -> Result<CacheDecision, RenderError> {
        if !self.scheduler.is_stopped() {
            self.stop_playback();
        }

        let views: Vec<TrackView> = self
            .tracks
            .iter()
            .map(|entry| TrackView {
                track: entry.id,
                stem_index: entry.selected,
                path: entry.selected_path().map(str::to_string),
                muted: entry.muted,
            })
            .collect();

        let mode = if preview {
            RenderMode::Preview {
                quality: self.preview_quality,
                section: self.preview_section,
            }
        } else {
            RenderMode::Full
        };
        let request = build_request(&views, self.build_fingerprint(), self.bpm, &self.key, mode)?;

        if preview {
            self.preview_processed = true;
        } else {
            self.full_processed = true;
        }
        Ok(self.orchestrator.request_render(request))
    }

    fn apply_render_completion(&mut self, completion: RenderCompletion) -> Option<SessionEvent> {
        if !self.orchestrator.note_completion(&completion) {
            log::info!("Discarding render result for an invalidated preview");
            return None;
        }
        match completion.slots {
            Ok(slots) => {
                let mut installed = 0;
                let mut failures: Vec<(String, String)> = Vec::new();
                for (target, outcome) in slots {
                    let Some(entry) = self.tracks.get_mut(target.track.0) else {
                        continue;
                    };
                    match outcome {
                        StemOutcome::Loaded { buffer, url } => {
                            // Insertion drops the superseded resource
                            entry.resources.insert(
                                target.stem_index,
                                PlayableResource::new(buffer, url, entry.muted),
                            );
                            installed += 1;
                        }
                        StemOutcome::Failed { reason } => {
                            entry.resources.remove(&target.stem_index);
                            failures.push((entry.name.to_string(), reason));
                        }
                    }
                }
                for (name, reason) in &failures {
                    log::warn!("Render left {} unresolved: {}", name, reason);
                }
                for path in completion.deferred_muted {
                    if !self.deferred_muted.contains(&path) {
                        self.deferred_muted.push(path);
                    }
                }
                if completion.preview
                    && completion.target_bpm == self.bpm
                    && completion.target_key == self.key
                {
                    // The session still sits at the rendered parameters,
                    // so they become the staleness baseline. A completion
                    // for parameters the session has since moved away
                    // from must not disarm a pending invalidation.
                    self.invalidator
                        .rebase(completion.target_bpm, &completion.target_key);
                }
                log::info!(
                    "Render complete: {} resource(s) installed, {} failed",
                    installed,
                    failures.len()
                );
                Some(SessionEvent::RenderFinished {
                    preview: completion.preview,
                    installed,
                    failures,
                })
            }
            Err(error) => {
                log::error!("Render failed: {}", error);
                Some(SessionEvent::RenderFailed {
                    preview: completion.preview,
                    error: error.to_string(),
                })
            }
        }
    }

    // --- playback ---

    /// Schedule every unmuted, selected, loaded track at the same bar
    /// boundary and start the transport. Fails with `NothingToPlay` when
    /// no track qualifies.
    pub fn start_playback(&mut self) -> AudioResult<()> {
        self.audition.stop_all();

        let voices: Vec<ScheduledVoice> = self
            .tracks
            .iter()
            .filter(|entry| !entry.muted)
            .filter_map(|entry| {
                let selected = entry.selected?;
                let resource = entry.resources.get(&selected)?;
                Some(ScheduledVoice {
                    slot: MixSlot {
                        track: entry.id,
                        stem: selected,
                    },
                    buffer: Arc::clone(&resource.buffer),
                    gain: Arc::clone(&resource.gain),
                })
            })
            .collect();

        let count = voices.len();
        self.scheduler.start(voices)?;
        log::info!("Playback scheduled: {} track(s)", count);
        Ok(())
    }

    /// Stop the mix and every audition. Fully resolved on return; never
    /// fails.
    pub fn stop_playback(&mut self) {
        self.audition.stop_all();
        self.scheduler.stop();
        log::info!("Playback stopped");
    }

    // --- audition ---

    /// Toggle a bounded excerpt of one track's selected stem
    pub fn toggle_audition(&mut self, track: TrackId) -> AuditionOutcome {
        let Some(entry) = self.tracks.get(track.0) else {
            return AuditionOutcome::Unavailable;
        };
        let rendered: Option<Arc<AudioBuffer>> = entry
            .selected_resource()
            .map(|resource| Arc::clone(&resource.buffer));
        let name = entry.name;
        let path = entry.selected_path().map(str::to_string);
        self.audition.toggle(
            track,
            name,
            path.as_deref(),
            rendered,
            self.preview_quality,
            self.preview_section,
        )
    }

    // --- event pump ---

    /// Fold in everything the worker threads and the audio callback have
    /// produced, and run the debounced preview invalidation check.
    /// Returns the notifications in arrival order.
    pub fn pump_events(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if self.invalidator.poll(now) {
            let dropped = self.orchestrator.invalidate_previews();
            self.preview_processed = false;
            log::info!("Dropped {} stale preview render(s)", dropped);
            events.push(SessionEvent::PreviewCacheInvalidated);
        }

        while let Ok(event) = self.engine.events().try_recv() {
            match event {
                EngineEvent::AuditionEnded { track } => {
                    self.audition.note_ended(track);
                    events.push(SessionEvent::AuditionEnded { track });
                }
            }
        }

        while let Ok(event) = self.audition.events().try_recv() {
            let track = match &event {
                crate::audition::AuditionEvent::Loaded { track, .. } => *track,
                crate::audition::AuditionEvent::Failed { track, .. } => *track,
            };
            match self
                .audition
                .apply_event(event, self.preview_quality, self.preview_section)
            {
                Some(AuditionOutcome::Started) => {
                    events.push(SessionEvent::AuditionStarted { track });
                }
                Some(AuditionOutcome::Unavailable) => {
                    events.push(SessionEvent::AuditionUnavailable { track });
                }
                _ => {}
            }
        }

        while let Ok(completion) = self.orchestrator.completions().try_recv() {
            if let Some(event) = self.apply_render_completion(completion) {
                events.push(event);
            }
        }

        events
    }

    // --- export ---

    /// Payload for the export handoff: unmuted, selected, non-placeholder
    /// stems plus the session parameters
    pub fn export_payload(&self) -> Result<ExportRequest, ExportError> {
        let stems: Vec<String> = self
            .tracks
            .iter()
            .filter(|entry| !entry.muted)
            .filter_map(|entry| entry.selected_path())
            .filter(|path| !is_placeholder(path))
            .map(str::to_string)
            .collect();
        if stems.is_empty() {
            return Err(ExportError::NoStemsSelected);
        }
        Ok(ExportRequest {
            beat_fingerprint: self.build_fingerprint(),
            stem_count: stems.len(),
            stems,
            target_bpm: self.bpm,
            target_key: self.key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::render::{RenderJob, RenderResponse};
    use crate::types::StereoSample;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeBackend {
        calls: Mutex<usize>,
    }

    impl RenderBackend for FakeBackend {
        fn process_stems(&self, job: &RenderJob) -> crate::render::Result<RenderResponse> {
            *self.calls.lock().unwrap() += 1;
            Ok(RenderResponse {
                processed_urls: job
                    .stems
                    .iter()
                    .map(|path| format!("/processed/{}", stem_file_name(path)))
                    .collect(),
                errors: Vec::new(),
                error: None,
            })
        }
    }

    struct WavFetcher;

    impl StemFetcher for WavFetcher {
        fn fetch(&self, _url: &str) -> crate::catalog::Result<Vec<u8>> {
            let spec = hound::WavSpec {
                channels: 2,
                sample_rate: 48_000,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            let mut cursor = std::io::Cursor::new(Vec::new());
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
                for _ in 0..4_800 {
                    writer.write_sample(0.25f32).unwrap();
                    writer.write_sample(0.25f32).unwrap();
                }
                writer.finalize().unwrap();
            }
            Ok(cursor.into_inner())
        }
    }

    struct OfflineFetcher;

    impl StemFetcher for OfflineFetcher {
        fn fetch(&self, url: &str) -> crate::catalog::Result<Vec<u8>> {
            Err(CatalogError::Fetch {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn catalog() -> Vec<CatalogTrack> {
        crate::types::TRACK_ORDER
            .iter()
            .map(|name| CatalogTrack {
                name,
                stems: vec![
                    format!("/stems/{}/01.{} 100 Bpm.wav", name, name),
                    format!("/stems/{}/{} 90 Bpm.wav", name, name),
                ],
            })
            .collect()
    }

    fn session() -> StemSession {
        StemSession::new(
            catalog(),
            Arc::new(FakeBackend {
                calls: Mutex::new(0),
            }),
            Arc::new(WavFetcher),
            CatalogClient::new("http://localhost:5001"),
            120,
            "C Minor",
        )
    }

    fn drain_until_render(session: &mut StemSession) -> SessionEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            for event in session.pump_events(Instant::now()) {
                if matches!(
                    event,
                    SessionEvent::RenderFinished { .. } | SessionEvent::RenderFailed { .. }
                ) {
                    return event;
                }
            }
            assert!(Instant::now() < deadline, "render never completed");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_defaults_mirror_track_table() {
        let s = session();
        for entry in s.tracks() {
            assert_eq!(entry.muted, !entry.default_unmuted);
            assert_eq!(entry.selected, Some(0));
        }
        assert!(s.tracks()[0].default_unmuted); // Chords
        assert!(!s.tracks()[8].default_unmuted); // Clap
    }

    #[test]
    fn test_fingerprint_exact_scenario() {
        let mut s = session();
        // Only Chords and Kick selected
        for entry in &mut s.tracks {
            entry.selected = None;
        }
        s.tracks[0].selected = Some(0);
        s.tracks[1].selected = Some(1);

        assert_eq!(
            s.build_fingerprint(),
            "Key:CMinor | BPM:120 | Chords:01.Chords 100 Bpm.wav | Kick:Kick 90 Bpm.wav"
        );
        // Deterministic
        assert_eq!(s.build_fingerprint(), s.build_fingerprint());
    }

    #[test]
    fn test_select_stem_invalid_is_silent_noop() {
        let mut s = session();
        s.select_stem(TrackId(1), 99);
        assert_eq!(s.tracks()[1].selected, Some(0));
        s.select_stem(TrackId(42), 0);
    }

    #[test]
    fn test_toggle_mute_round_trip() {
        let mut s = session();
        let before = s.tracks()[1].muted;
        s.toggle_mute(TrackId(1));
        assert_eq!(s.tracks()[1].muted, !before);
        s.toggle_mute(TrackId(1));
        assert_eq!(s.tracks()[1].muted, before);
    }

    #[test]
    fn test_toggle_mute_round_trip_restores_gain() {
        let mut s = session();
        let event = {
            s.generate(true).unwrap();
            drain_until_render(&mut s)
        };
        assert!(matches!(event, SessionEvent::RenderFinished { .. }));

        let gain_of = |s: &StemSession| {
            s.tracks()[1]
                .selected_resource()
                .map(|r| r.gain.get())
                .unwrap()
        };
        let original = gain_of(&s);
        s.toggle_mute(TrackId(1));
        assert_ne!(gain_of(&s), original);
        s.toggle_mute(TrackId(1));
        assert_eq!(gain_of(&s), original);
    }

    #[test]
    fn test_unmute_without_resource_suggests_preview() {
        let mut s = session();
        // Clap starts muted with no resource installed
        let outcome = s.toggle_mute(TrackId(8));
        assert_eq!(outcome, MuteOutcome::RenderSuggested(RenderHint::Preview));
        assert!(!s.tracks()[8].muted);
    }

    #[test]
    fn test_unmute_after_preview_suggests_full() {
        let mut s = session();
        s.generate(true).unwrap();
        drain_until_render(&mut s);

        // Clap was muted during the preview, so it has no resource
        let outcome = s.toggle_mute(TrackId(8));
        assert_eq!(outcome, MuteOutcome::RenderSuggested(RenderHint::Full));
    }

    #[test]
    fn test_reset_to_defaults_is_idempotent() {
        let mut s = session();
        s.toggle_mute(TrackId(0));
        s.toggle_mute(TrackId(8));
        s.reset_to_defaults();
        let first: Vec<bool> = s.tracks().iter().map(|t| t.muted).collect();
        s.reset_to_defaults();
        let second: Vec<bool> = s.tracks().iter().map(|t| t.muted).collect();
        assert_eq!(first, second);
        assert_eq!(first[8], true);
        assert_eq!(first[0], false);
    }

    #[test]
    fn test_start_playback_without_resources_is_nothing_to_play() {
        let mut s = session();
        let result = s.start_playback();
        assert!(matches!(
            result,
            Err(crate::engine::error::AudioError::NothingToPlay)
        ));
        assert_eq!(s.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_render_installs_resources_and_playback_starts() {
        let mut s = session();
        s.generate(true).unwrap();
        let event = drain_until_render(&mut s);
        let SessionEvent::RenderFinished {
            installed,
            failures,
            preview,
        } = event
        else {
            panic!("expected RenderFinished");
        };
        assert!(preview);
        // Six unmuted defaults
        assert_eq!(installed, 6);
        assert!(failures.is_empty());

        s.start_playback().unwrap();
        assert_eq!(s.playback_state(), PlaybackState::Scheduled);
        s.stop_playback();
        assert_eq!(s.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_duplicate_generate_joins_pending() {
        let mut s = session();
        assert_eq!(s.generate(true).unwrap(), CacheDecision::Issue);
        assert_eq!(s.generate(true).unwrap(), CacheDecision::JoinPending);
        drain_until_render(&mut s);
        assert_eq!(s.generate(true).unwrap(), CacheDecision::AlreadyComplete);
    }

    #[test]
    fn test_selection_change_stops_running_mix() {
        let mut s = session();
        s.generate(true).unwrap();
        drain_until_render(&mut s);
        s.start_playback().unwrap();
        assert_ne!(s.playback_state(), PlaybackState::Stopped);

        s.select_stem(TrackId(1), 1);
        assert_eq!(s.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_bpm_drift_invalidates_previews_after_debounce() {
        let mut s = session();
        s.generate(true).unwrap();
        drain_until_render(&mut s);
        assert_eq!(s.generate(true).unwrap(), CacheDecision::AlreadyComplete);

        let t0 = Instant::now();
        s.set_bpm(127, t0);
        let events = s.pump_events(t0 + Duration::from_millis(600));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::PreviewCacheInvalidated)));
        // The same configuration at the new tempo is a fresh request
        assert_eq!(s.generate(true).unwrap(), CacheDecision::Issue);
    }

    #[test]
    fn test_small_bpm_drift_keeps_previews() {
        let mut s = session();
        s.generate(true).unwrap();
        drain_until_render(&mut s);

        let t0 = Instant::now();
        s.set_bpm(124, t0);
        let events = s.pump_events(t0 + Duration::from_secs(1));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::PreviewCacheInvalidated)));
    }

    #[test]
    fn test_bpm_change_during_pending_preview_still_invalidates() {
        let mut s = session();
        s.generate(true).unwrap();
        let t0 = Instant::now();
        s.set_bpm(127, t0);

        // The completion lands inside the debounce window; it was rendered
        // at 120 and must not rebase the invalidator to the old tempo
        let deadline = Instant::now() + Duration::from_secs(5);
        'drained: loop {
            for event in s.pump_events(t0) {
                if matches!(event, SessionEvent::RenderFinished { .. }) {
                    break 'drained;
                }
            }
            assert!(Instant::now() < deadline, "render never completed");
            std::thread::sleep(Duration::from_millis(5));
        }

        let events = s.pump_events(t0 + Duration::from_secs(10));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::PreviewCacheInvalidated)));
        assert_eq!(s.generate(true).unwrap(), CacheDecision::Issue);
    }

    #[test]
    fn test_invalidation_discards_in_flight_preview() {
        let mut s = session();
        let t0 = Instant::now();
        s.generate(true).unwrap();
        s.set_bpm(130, t0);

        // Fire the invalidation; the pending render is cancelled whether or
        // not its completion has been delivered yet
        let events = s.pump_events(t0 + Duration::from_millis(600));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::PreviewCacheInvalidated)));

        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            for event in s.pump_events(t0 + Duration::from_secs(10)) {
                assert!(
                    !matches!(event, SessionEvent::RenderFinished { .. }),
                    "cancelled preview still reported a finished render"
                );
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(s.tracks()[0].selected_resource().is_none());
    }

    #[test]
    fn test_audition_fallback_failure_reports_unavailable() {
        let mut s = StemSession::new(
            catalog(),
            Arc::new(FakeBackend {
                calls: Mutex::new(0),
            }),
            Arc::new(OfflineFetcher),
            CatalogClient::new("http://localhost:5001"),
            120,
            "C Minor",
        );
        assert_eq!(
            s.toggle_audition(TrackId(1)),
            AuditionOutcome::LoadStarted
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let events = s.pump_events(Instant::now());
            if events
                .iter()
                .any(|e| matches!(e, SessionEvent::AuditionUnavailable { .. }))
            {
                break;
            }
            assert!(Instant::now() < deadline, "no audition failure event");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(s.audition_state(TrackId(1)), AuditionState::Idle);
    }

    #[test]
    fn test_export_payload_takes_unmuted_only() {
        let s = session();
        let payload = s.export_payload().unwrap();
        assert_eq!(payload.stem_count, 6);
        assert_eq!(payload.target_bpm, 120);
        assert_eq!(payload.target_key, "C Minor");
        assert!(payload.beat_fingerprint.starts_with("Key:CMinor | BPM:120"));
    }

    #[test]
    fn test_export_with_everything_muted_fails() {
        let mut s = session();
        for index in 0..s.tracks().len() {
            if !s.tracks()[index].muted {
                s.toggle_mute(TrackId(index));
            }
        }
        assert!(matches!(
            s.export_payload(),
            Err(ExportError::NoStemsSelected)
        ));
    }

    #[test]
    fn test_randomize_all_stays_in_range() {
        let mut s = session();
        s.randomize_all(Instant::now());
        assert!((RANDOM_BPM_MIN..RANDOM_BPM_MAX).contains(&s.bpm()));
        assert!(KEY_CHOICES.contains(&s.key()));
        for entry in s.tracks() {
            let selected = entry.selected.unwrap();
            assert!(selected < entry.stems.len());
        }
    }

    #[test]
    fn test_stereo_silence_is_additive_identity() {
        let mut acc = StereoSample::new(0.3, -0.3);
        acc += StereoSample::silence();
        assert_eq!(acc, StereoSample::new(0.3, -0.3));
    }
}

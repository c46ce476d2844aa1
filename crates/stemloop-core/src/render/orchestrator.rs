//! Render orchestration
//!
//! ```text
//!  session thread         worker thread              backend
//!  ┌──────────────┐  spawn  ┌────────────┐  POST  ┌───────────┐
//!  │ request_render│ ─────► │ process    │ ─────► │ /api/     │
//!  │ (cache gate)  │        │ fetch+decode│ ◄───── │ process-  │
//!  └──────▲───────┘        └──────┬─────┘        │ stems     │
//!         │   RenderCompletion     │              └───────────┘
//!         └────────────────────────┘
//! ```
//!
//! `request_render` snapshots everything it needs at call time, consults
//! the cache, and spawns at most one worker per request key. The worker
//! calls the backend, then fetches and decodes each returned URL in
//! request order, and delivers a single `RenderCompletion`. The session
//! applies completions on its own thread: dispose the superseded resource
//! at each slot, install the new one, report per-slot failures without
//! rolling back the rest.

use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};

use super::backend::{RenderBackend, RenderJob};
use super::cache::{CacheDecision, RenderCache, RequestKey};
use super::error::{RenderError, Result};
use crate::catalog::StemFetcher;
use crate::engine::buffer::{decode_bytes, AudioBuffer};
use crate::types::{is_placeholder, PreviewQuality, PreviewSection, TrackId};

/// Per-track snapshot the session hands to `build_request`
#[derive(Debug, Clone)]
pub struct TrackView {
    pub track: TrackId,
    pub stem_index: Option<usize>,
    pub path: Option<String>,
    pub muted: bool,
}

/// What is being rendered
#[derive(Debug, Clone, Copy)]
pub enum RenderMode {
    Full,
    Preview {
        quality: PreviewQuality,
        section: PreviewSection,
    },
}

impl RenderMode {
    pub fn is_preview(&self) -> bool {
        matches!(self, RenderMode::Preview { .. })
    }
}

/// One slot a worker will resolve, index-aligned with the job's stems
#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub track: TrackId,
    pub stem_index: usize,
    pub path: String,
}

/// A fully snapshotted render request
pub struct RenderRequest {
    pub key: RequestKey,
    pub job: RenderJob,
    pub targets: Vec<RenderTarget>,
    /// Muted stems queued for deferred background rendering (preview only)
    pub deferred_muted: Vec<String>,
}

/// Per-slot result inside a completed render
pub enum StemOutcome {
    Loaded { buffer: Arc<AudioBuffer>, url: String },
    Failed { reason: String },
}

/// Delivered once per issued render, success or not
pub struct RenderCompletion {
    pub key: RequestKey,
    pub preview: bool,
    pub target_bpm: u32,
    pub target_key: String,
    pub slots: std::result::Result<Vec<(RenderTarget, StemOutcome)>, RenderError>,
    /// Per-stem errors the service reported alongside partial success
    pub backend_errors: Vec<String>,
    pub deferred_muted: Vec<String>,
}

/// Build a render request from a track snapshot. Full renders take every
/// selected non-placeholder stem; previews take only the unmuted ones.
/// Parameters are captured now, so later edits cannot leak in.
pub fn build_request(
    views: &[TrackView],
    fingerprint: String,
    bpm: u32,
    key: &str,
    mode: RenderMode,
) -> Result<RenderRequest> {
    let preview = mode.is_preview();
    let mut targets = Vec::new();
    for view in views {
        let (Some(stem_index), Some(path)) = (view.stem_index, view.path.as_ref()) else {
            continue;
        };
        if is_placeholder(path) {
            continue;
        }
        if preview && view.muted {
            continue;
        }
        targets.push(RenderTarget {
            track: view.track,
            stem_index,
            path: path.clone(),
        });
    }
    if targets.is_empty() {
        return Err(RenderError::NoStemsSelected);
    }

    let muted_tracks: Vec<String> = views
        .iter()
        .filter(|view| view.muted)
        .filter_map(|view| view.path.clone())
        .filter(|path| !is_placeholder(path))
        .collect();

    let (quality, section) = match mode {
        RenderMode::Full => (PreviewQuality::Short, PreviewSection::Start),
        RenderMode::Preview { quality, section } => (quality, section),
    };
    let params = quality.render_params();

    let job = RenderJob {
        stems: targets.iter().map(|t| t.path.clone()).collect(),
        target_bpm: bpm,
        target_key: key.to_string(),
        preview_only: preview,
        preview_duration: preview.then(|| quality.duration_secs() as f32),
        preview_section: section.as_str().to_string(),
        sample_rate: params.sample_rate,
        bit_depth: u32::from(params.bit_depth),
        compression_ratio: params.compression_ratio,
        monophonic: params.monophonic,
        only_process_unmuted: preview,
        process_muted_tracks_later: preview,
        muted_tracks: muted_tracks.clone(),
    };

    Ok(RenderRequest {
        key: RequestKey {
            fingerprint,
            preview,
            quality: preview.then_some(quality),
        },
        job,
        targets,
        deferred_muted: if preview { muted_tracks } else { Vec::new() },
    })
}

pub struct RenderOrchestrator {
    backend: Arc<dyn RenderBackend>,
    fetcher: Arc<dyn StemFetcher>,
    cache: RenderCache,
    tx: Sender<RenderCompletion>,
    rx: Receiver<RenderCompletion>,
}

impl RenderOrchestrator {
    pub fn new(backend: Arc<dyn RenderBackend>, fetcher: Arc<dyn StemFetcher>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            backend,
            fetcher,
            cache: RenderCache::new(),
            tx,
            rx,
        }
    }

    /// Completed renders, delivered from worker threads
    pub fn completions(&self) -> &Receiver<RenderCompletion> {
        &self.rx
    }

    pub fn has_pending(&self) -> bool {
        self.cache.has_pending()
    }

    /// Drop cached preview entries after a tempo/key invalidation
    pub fn invalidate_previews(&mut self) -> usize {
        self.cache.invalidate_previews()
    }

    /// Issue a render unless the cache already covers it. Joining a
    /// pending entry or hitting a completed one spawns nothing.
    pub fn request_render(&mut self, request: RenderRequest) -> CacheDecision {
        let decision = self.cache.begin(&request.key);
        match decision {
            CacheDecision::JoinPending => {
                log::info!("Render already in flight for this configuration, joining");
            }
            CacheDecision::AlreadyComplete => {
                log::info!("Render already cached for this configuration");
            }
            CacheDecision::Issue => self.spawn_worker(request),
        }
        decision
    }

    /// Fold a drained completion back into the cache. The session calls
    /// this for every completion before applying it; `false` means the
    /// entry was cancelled and the completion must be discarded.
    pub fn note_completion(&mut self, completion: &RenderCompletion) -> bool {
        self.cache.complete(&completion.key, completion.slots.is_ok())
    }

    fn spawn_worker(&self, request: RenderRequest) {
        let backend = Arc::clone(&self.backend);
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.tx.clone();

        let builder = thread::Builder::new().name("render-worker".to_string());
        let spawned = builder.spawn(move || {
            let RenderRequest {
                key,
                job,
                targets,
                deferred_muted,
            } = request;

            let mut backend_errors = Vec::new();
            let slots = match backend.process_stems(&job) {
                Ok(response) => {
                    backend_errors = response.errors;
                    if !backend_errors.is_empty() {
                        log::warn!(
                            "Render service reported {} stem error(s)",
                            backend_errors.len()
                        );
                    }
                    if response.processed_urls.is_empty() {
                        Err(match response.error {
                            Some(message) => RenderError::Backend(message),
                            None => RenderError::InvalidResponse,
                        })
                    } else {
                        Ok(resolve_slots(&*fetcher, targets, &response.processed_urls))
                    }
                }
                Err(e) => Err(e),
            };

            let completion = RenderCompletion {
                preview: key.preview,
                key,
                target_bpm: job.target_bpm,
                target_key: job.target_key,
                slots,
                backend_errors,
                deferred_muted,
            };
            let _ = tx.send(completion);
        });
        if let Err(e) = spawned {
            log::error!("Failed to spawn render worker: {}", e);
        }
    }
}

/// Fetch and decode each processed URL, strictly in request order. A URL
/// the service did not return, or one that fails to fetch or decode,
/// becomes a `Failed` slot; the rest proceed.
fn resolve_slots(
    fetcher: &dyn StemFetcher,
    targets: Vec<RenderTarget>,
    urls: &[String],
) -> Vec<(RenderTarget, StemOutcome)> {
    targets
        .into_iter()
        .enumerate()
        .map(|(index, target)| {
            let outcome = match urls.get(index) {
                Some(url) => load_resource(fetcher, url),
                None => StemOutcome::Failed {
                    reason: "no processed URL returned for this stem".to_string(),
                },
            };
            (target, outcome)
        })
        .collect()
}

fn load_resource(fetcher: &dyn StemFetcher, url: &str) -> StemOutcome {
    let bytes = match fetcher.fetch(url) {
        Ok(bytes) => bytes,
        Err(e) => return load_failure(url, e.to_string()),
    };
    match decode_bytes(bytes, extension_of(url)) {
        Ok(buffer) => StemOutcome::Loaded {
            buffer,
            url: url.to_string(),
        },
        Err(e) => load_failure(url, e.to_string()),
    }
}

fn load_failure(url: &str, reason: String) -> StemOutcome {
    StemOutcome::Failed {
        reason: RenderError::ResourceLoad {
            url: url.to_string(),
            reason,
        }
        .to_string(),
    }
}

fn extension_of(url: &str) -> Option<&str> {
    url.rsplit('/').next()?.rsplit_once('.').map(|(_, ext)| ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::render::backend::RenderResponse;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeBackend {
        urls: Vec<String>,
        errors: Vec<String>,
        calls: Mutex<usize>,
    }

    impl FakeBackend {
        fn returning(urls: &[&str]) -> Self {
            Self {
                urls: urls.iter().map(|s| s.to_string()).collect(),
                errors: Vec::new(),
                calls: Mutex::new(0),
            }
        }
    }

    impl RenderBackend for FakeBackend {
        fn process_stems(&self, _job: &RenderJob) -> Result<RenderResponse> {
            *self.calls.lock().unwrap() += 1;
            Ok(RenderResponse {
                processed_urls: self.urls.clone(),
                errors: self.errors.clone(),
                error: None,
            })
        }
    }

    /// Serves a one-frame silent WAV for any URL
    struct FakeFetcher {
        fail_urls: Vec<String>,
    }

    impl FakeFetcher {
        fn ok() -> Self {
            Self {
                fail_urls: Vec::new(),
            }
        }

        fn wav_bytes() -> Vec<u8> {
            let spec = hound::WavSpec {
                channels: 2,
                sample_rate: 48_000,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            let mut cursor = std::io::Cursor::new(Vec::new());
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
                for _ in 0..64 {
                    writer.write_sample(0.25f32).unwrap();
                    writer.write_sample(0.25f32).unwrap();
                }
                writer.finalize().unwrap();
            }
            cursor.into_inner()
        }
    }

    impl StemFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> crate::catalog::Result<Vec<u8>> {
            if self.fail_urls.iter().any(|u| u == url) {
                return Err(CatalogError::Fetch {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(Self::wav_bytes())
        }
    }

    fn views() -> Vec<TrackView> {
        vec![
            TrackView {
                track: TrackId(0),
                stem_index: Some(0),
                path: Some("/stems/Piano/Piano c minor 100 Bpm.wav".to_string()),
                muted: false,
            },
            TrackView {
                track: TrackId(1),
                stem_index: Some(1),
                path: Some("/stems/Kick/Kick 90 Bpm.wav".to_string()),
                muted: false,
            },
            TrackView {
                track: TrackId(8),
                stem_index: Some(0),
                path: Some("/stems/Clap/Clap 100 Bpm.wav".to_string()),
                muted: true,
            },
            TrackView {
                track: TrackId(6),
                stem_index: None,
                path: None,
                muted: false,
            },
        ]
    }

    fn preview_mode() -> RenderMode {
        RenderMode::Preview {
            quality: PreviewQuality::Short,
            section: PreviewSection::Start,
        }
    }

    #[test]
    fn test_preview_request_takes_unmuted_only() {
        let request =
            build_request(&views(), "fp".to_string(), 120, "C Minor", preview_mode()).unwrap();
        assert_eq!(request.targets.len(), 2);
        assert!(request.job.preview_only);
        assert_eq!(request.job.preview_duration, Some(10.0));
        assert_eq!(request.deferred_muted.len(), 1);
        assert_eq!(request.job.muted_tracks[0], "/stems/Clap/Clap 100 Bpm.wav");
    }

    #[test]
    fn test_full_request_takes_muted_tracks_too() {
        let request =
            build_request(&views(), "fp".to_string(), 120, "C Minor", RenderMode::Full).unwrap();
        assert_eq!(request.targets.len(), 3);
        assert!(!request.job.preview_only);
        assert_eq!(request.job.preview_duration, None);
        assert!(request.deferred_muted.is_empty());
    }

    #[test]
    fn test_placeholder_stems_are_never_requested() {
        let views = vec![TrackView {
            track: TrackId(0),
            stem_index: Some(0),
            path: Some("/placeholder-chords.wav".to_string()),
            muted: false,
        }];
        let result = build_request(&views, "fp".to_string(), 120, "C Minor", RenderMode::Full);
        assert!(matches!(result, Err(RenderError::NoStemsSelected)));
    }

    #[test]
    fn test_duplicate_request_hits_backend_once() {
        let backend = Arc::new(FakeBackend::returning(&["/out/a.wav", "/out/b.wav"]));
        let backend_arc: Arc<dyn RenderBackend> = backend.clone();
        let mut orchestrator = RenderOrchestrator::new(backend_arc, Arc::new(FakeFetcher::ok()));

        let first =
            build_request(&views(), "fp".to_string(), 120, "C Minor", preview_mode()).unwrap();
        let second =
            build_request(&views(), "fp".to_string(), 120, "C Minor", preview_mode()).unwrap();

        assert_eq!(orchestrator.request_render(first), CacheDecision::Issue);
        assert_eq!(
            orchestrator.request_render(second),
            CacheDecision::JoinPending
        );

        let completion = orchestrator
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        orchestrator.note_completion(&completion);
        assert_eq!(*backend.calls.lock().unwrap(), 1);
        assert!(!orchestrator.has_pending());
    }

    #[test]
    fn test_completion_resolves_slots_in_request_order() {
        let backend = Arc::new(FakeBackend::returning(&["/out/a.wav", "/out/b.wav"]));
        let mut orchestrator = RenderOrchestrator::new(backend, Arc::new(FakeFetcher::ok()));

        let request =
            build_request(&views(), "fp".to_string(), 120, "C Minor", preview_mode()).unwrap();
        orchestrator.request_render(request);

        let completion = orchestrator
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let slots = completion.slots.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0.track, TrackId(0));
        assert_eq!(slots[1].0.track, TrackId(1));
        for (_, outcome) in &slots {
            assert!(matches!(outcome, StemOutcome::Loaded { .. }));
        }
    }

    #[test]
    fn test_short_url_list_degrades_only_missing_slots() {
        // Two targets, one URL returned
        let backend = Arc::new(FakeBackend::returning(&["/out/a.wav"]));
        let mut orchestrator = RenderOrchestrator::new(backend, Arc::new(FakeFetcher::ok()));

        let request =
            build_request(&views(), "fp".to_string(), 120, "C Minor", preview_mode()).unwrap();
        orchestrator.request_render(request);

        let completion = orchestrator
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let slots = completion.slots.unwrap();
        assert!(matches!(slots[0].1, StemOutcome::Loaded { .. }));
        assert!(matches!(slots[1].1, StemOutcome::Failed { .. }));
    }

    #[test]
    fn test_fetch_failure_degrades_one_slot() {
        let backend = Arc::new(FakeBackend::returning(&["/out/a.wav", "/out/b.wav"]));
        let fetcher = Arc::new(FakeFetcher {
            fail_urls: vec!["/out/b.wav".to_string()],
        });
        let mut orchestrator = RenderOrchestrator::new(backend, fetcher);

        let request =
            build_request(&views(), "fp".to_string(), 120, "C Minor", preview_mode()).unwrap();
        orchestrator.request_render(request);

        let completion = orchestrator
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let slots = completion.slots.unwrap();
        assert!(matches!(slots[0].1, StemOutcome::Loaded { .. }));
        match &slots[1].1 {
            StemOutcome::Failed { reason } => {
                // The failure names the resource it could not load
                assert!(reason.contains("/out/b.wav"), "reason was: {}", reason);
            }
            StemOutcome::Loaded { .. } => panic!("expected a failed slot"),
        }
    }

    #[test]
    fn test_failed_render_reaches_terminal_failed_state() {
        struct FailingBackend;
        impl RenderBackend for FailingBackend {
            fn process_stems(&self, _job: &RenderJob) -> Result<RenderResponse> {
                Err(RenderError::Timeout)
            }
        }

        let mut orchestrator =
            RenderOrchestrator::new(Arc::new(FailingBackend), Arc::new(FakeFetcher::ok()));
        let request =
            build_request(&views(), "fp".to_string(), 120, "C Minor", preview_mode()).unwrap();
        orchestrator.request_render(request);

        let completion = orchestrator
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert!(matches!(completion.slots, Err(RenderError::Timeout)));
        orchestrator.note_completion(&completion);
        assert!(!orchestrator.has_pending());
    }
}

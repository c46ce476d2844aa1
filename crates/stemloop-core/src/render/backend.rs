//! Render service wire protocol
//!
//! The render service takes a list of stem paths plus the target tempo and
//! key, time-stretches and pitch-shifts each stem, and returns one relative
//! URL per input stem. `RenderBackend` abstracts the transport so the
//! orchestrator can be tested against an in-process fake.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{RenderError, Result};

/// Preview requests get 2 minutes, full-quality requests 3
pub const PREVIEW_TIMEOUT: Duration = Duration::from_secs(120);
pub const FULL_TIMEOUT: Duration = Duration::from_secs(180);

/// One render request, serialized as the service's JSON payload.
/// `stems` and the response's `processed_urls` are index-aligned.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub stems: Vec<String>,
    pub target_bpm: u32,
    pub target_key: String,
    pub preview_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_duration: Option<f32>,
    pub preview_section: String,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub compression_ratio: f32,
    pub monophonic: bool,
    /// Preview mode renders audible tracks only
    pub only_process_unmuted: bool,
    /// Muted stems listed below are queued by the service, not rendered now
    pub process_muted_tracks_later: bool,
    pub muted_tracks: Vec<String>,
}

impl RenderJob {
    pub fn timeout(&self) -> Duration {
        if self.preview_only {
            PREVIEW_TIMEOUT
        } else {
            FULL_TIMEOUT
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    #[serde(default)]
    pub processed_urls: Vec<String>,
    /// Per-stem processing errors reported alongside partial success
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub trait RenderBackend: Send + Sync {
    fn process_stems(&self, job: &RenderJob) -> Result<RenderResponse>;
}

/// Blocking HTTP backend, used from the orchestrator's worker thread
pub struct HttpRenderBackend {
    base_url: String,
}

impl HttpRenderBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl RenderBackend for HttpRenderBackend {
    fn process_stems(&self, job: &RenderJob) -> Result<RenderResponse> {
        let url = format!("{}/api/process-stems", self.base_url);
        log::info!(
            "Requesting render of {} stem(s) at {} BPM in {} (preview: {})",
            job.stems.len(),
            job.target_bpm,
            job.target_key,
            job.preview_only
        );

        match ureq::post(&url).timeout(job.timeout()).send_json(job) {
            Ok(response) => response
                .into_json::<RenderResponse>()
                .map_err(|_| RenderError::InvalidResponse),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(RenderError::Http { status, body })
            }
            Err(ureq::Error::Transport(transport)) => {
                let message = transport.to_string();
                if message.contains("timed out") || message.contains("timeout") {
                    Err(RenderError::Timeout)
                } else {
                    Err(RenderError::Backend(message))
                }
            }
        }
    }
}

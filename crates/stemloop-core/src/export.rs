//! Export handoff
//!
//! The session does not render final mixes itself; it hands the selected
//! configuration to the export service and receives a download URL back.
//! Payments and beat CRUD stay on the service side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No unmuted stems selected for export")]
    NoStemsSelected,

    #[error("Export service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Export request failed: {0}")]
    Network(String),

    #[error("Malformed export response")]
    InvalidResponse,
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Everything the export service needs to reproduce the beat
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub beat_fingerprint: String,
    pub stem_count: usize,
    /// Unmuted, selected, non-placeholder stem paths
    pub stems: Vec<String>,
    pub target_bpm: u32,
    pub target_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReceipt {
    pub download_url: String,
}

pub struct ExportClient {
    base_url: String,
}

impl ExportClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn export(&self, request: &ExportRequest) -> Result<ExportReceipt> {
        let url = format!("{}/api/export-beat", self.base_url);
        log::info!(
            "Exporting {} stem(s) at {} BPM in {}",
            request.stem_count,
            request.target_bpm,
            request.target_key
        );

        match ureq::post(&url).send_json(request) {
            Ok(response) => response
                .into_json::<ExportReceipt>()
                .map_err(|_| ExportError::InvalidResponse),
            Err(ureq::Error::Status(status, response)) => Err(ExportError::Http {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(transport)) => {
                Err(ExportError::Network(transport.to_string()))
            }
        }
    }
}

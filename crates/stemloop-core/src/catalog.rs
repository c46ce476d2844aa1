//! Stem catalog client
//!
//! Fetches the category-to-stems listing from the backend and maps it onto
//! the fixed track layout. The backend's category names are matched
//! case-insensitively; a category the backend does not know simply yields
//! a track with zero stems. When the backend is unreachable an offline
//! fallback catalog keeps the session usable with placeholder entries.
//!
//! Also home to `StemFetcher`, the raw byte fetch used by the render
//! orchestrator (processed stem URLs) and the audition fallback (original
//! stem files via `/stems/<category>/<file>`).

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use thiserror::Error;

use crate::types::TRACK_ORDER;

/// Catalog listing timeout
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw stem byte fetch timeout
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on a single fetched stem (decoded previews are far smaller)
const MAX_STEM_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request timed out")]
    Timeout,

    #[error("Catalog service returned HTTP {status}")]
    Http { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed catalog response")]
    InvalidResponse,

    #[error("Catalog contains no stems")]
    Empty,

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// One fixed track slot with its available stems, in catalog order
#[derive(Debug, Clone)]
pub struct CatalogTrack {
    pub name: &'static str,
    pub stems: Vec<String>,
}

/// Raw audio byte fetch. Relative URLs are resolved against the backend
/// base URL.
pub trait StemFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct CatalogClient {
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// GET the category listing and map it onto `TRACK_ORDER`.
    /// Fails with `Empty` when every category comes back bare, so the
    /// caller can fall back to the offline catalog.
    pub fn fetch_catalog(&self) -> Result<Vec<CatalogTrack>> {
        let url = format!("{}/api/stems", self.base_url);
        log::info!("Fetching stem catalog from {}", url);

        let listing: HashMap<String, Vec<String>> =
            match ureq::get(&url).timeout(CATALOG_TIMEOUT).call() {
                Ok(response) => response
                    .into_json()
                    .map_err(|_| CatalogError::InvalidResponse)?,
                Err(ureq::Error::Status(status, _)) => {
                    return Err(CatalogError::Http { status });
                }
                Err(ureq::Error::Transport(transport)) => {
                    let message = transport.to_string();
                    if message.contains("timed out") || message.contains("timeout") {
                        return Err(CatalogError::Timeout);
                    }
                    return Err(CatalogError::Network(message));
                }
            };

        let tracks = map_catalog(&listing);
        if tracks.iter().all(|track| track.stems.is_empty()) {
            return Err(CatalogError::Empty);
        }
        Ok(tracks)
    }

    /// URL of an original (unprocessed) stem file
    pub fn raw_stem_url(&self, category: &str, file_name: &str) -> String {
        format!(
            "{}/stems/{}/{}",
            self.base_url,
            escape_component(category),
            escape_component(file_name)
        )
    }
}

/// Map a backend listing onto the fixed track layout, matching category
/// names case-insensitively
pub fn map_catalog(listing: &HashMap<String, Vec<String>>) -> Vec<CatalogTrack> {
    TRACK_ORDER
        .iter()
        .map(|name| {
            let stems = listing
                .iter()
                .find(|(category, _)| category.eq_ignore_ascii_case(name))
                .map(|(_, stems)| stems.clone())
                .unwrap_or_default();
            if stems.is_empty() {
                log::debug!("Catalog has no stems for '{}'", name);
            }
            CatalogTrack { name, stems }
        })
        .collect()
}

/// Offline catalog used when the backend is unreachable: the same fixed
/// track set with one placeholder entry each
pub fn fallback_catalog() -> Vec<CatalogTrack> {
    log::warn!("Catalog unavailable, using offline placeholder catalog");
    TRACK_ORDER
        .iter()
        .map(|name| CatalogTrack {
            name,
            stems: vec![format!("/placeholder-{}.wav", name.to_lowercase())],
        })
        .collect()
}

/// Percent-escape one path segment (spaces and `#` appear in stem names)
fn escape_component(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Blocking HTTP fetcher used from worker threads
pub struct HttpStemFetcher {
    base_url: String,
}

impl HttpStemFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            url.to_string()
        }
    }
}

impl StemFetcher for HttpStemFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let full_url = self.resolve(url);
        log::debug!("Fetching audio from {}", full_url);

        let response = ureq::get(&full_url)
            .timeout(FETCH_TIMEOUT)
            .call()
            .map_err(|e| CatalogError::Fetch {
                url: full_url.clone(),
                reason: e.to_string(),
            })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_STEM_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| CatalogError::Fetch {
                url: full_url,
                reason: e.to_string(),
            })?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_matches_categories_case_insensitively() {
        let mut listing = HashMap::new();
        listing.insert(
            "hi hat".to_string(),
            vec!["/stems/Hi hat/Hi Hat 90 Bpm.wav".to_string()],
        );
        listing.insert("KICK".to_string(), vec!["/stems/Kick/a.wav".to_string()]);

        let tracks = map_catalog(&listing);
        assert_eq!(tracks.len(), TRACK_ORDER.len());

        let hi_hat = tracks.iter().find(|t| t.name == "Hi Hat").unwrap();
        assert_eq!(hi_hat.stems.len(), 1);
        let kick = tracks.iter().find(|t| t.name == "Kick").unwrap();
        assert_eq!(kick.stems.len(), 1);
    }

    #[test]
    fn test_absent_category_yields_zero_stems() {
        let tracks = map_catalog(&HashMap::new());
        assert!(tracks.iter().all(|t| t.stems.is_empty()));
        // Layout is preserved even with nothing to offer
        let names: Vec<_> = tracks.iter().map(|t| t.name).collect();
        assert_eq!(names, TRACK_ORDER.to_vec());
    }

    #[test]
    fn test_fallback_catalog_is_all_placeholders() {
        let tracks = fallback_catalog();
        assert_eq!(tracks.len(), TRACK_ORDER.len());
        assert!(tracks
            .iter()
            .all(|t| t.stems.len() == 1 && crate::types::is_placeholder(&t.stems[0])));
    }

    #[test]
    fn test_raw_stem_url_escapes_segments() {
        let client = CatalogClient::new("http://localhost:5001");
        let url = client.raw_stem_url("Hi hat", "01.Hi Hat 100 Bpm.wav");
        assert_eq!(
            url,
            "http://localhost:5001/stems/Hi%20hat/01.Hi%20Hat%20100%20Bpm.wav"
        );

        let sharp = client.raw_stem_url("Chords", "Piano c# minor.wav");
        assert!(sharp.ends_with("/stems/Chords/Piano%20c%23%20minor.wav"));
    }

    #[test]
    fn test_fetcher_resolves_relative_urls() {
        let fetcher = HttpStemFetcher::new("http://localhost:5001");
        assert_eq!(
            fetcher.resolve("/processed/out.wav"),
            "http://localhost:5001/processed/out.wav"
        );
        assert_eq!(
            fetcher.resolve("http://elsewhere/x.wav"),
            "http://elsewhere/x.wav"
        );
    }
}

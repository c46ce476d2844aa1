//! Render cache and preview invalidation
//!
//! The cache keys every render request by the session fingerprint extended
//! with the preview flag and excerpt quality. At most one non-terminal
//! entry exists per key: a second identical request joins the in-flight
//! one instead of hitting the backend again, and a key that already
//! succeeded is served from the installed resources.
//!
//! `PreviewInvalidator` watches tempo and key edits. Preview renders are
//! baked at a specific BPM/key, so once the session drifts far enough
//! (more than 5 BPM, or any key change) the cached previews are stale.
//! The check debounces for 500 ms so slider scrubbing settles first.
//! Full-quality entries are never invalidated this way.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::PreviewQuality;

/// BPM drift beyond which cached previews are considered stale
pub const BPM_INVALIDATION_THRESHOLD: u32 = 5;

/// Settle time before an invalidation fires
pub const INVALIDATION_DEBOUNCE: Duration = Duration::from_millis(500);

/// Identity of one render request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub fingerprint: String,
    pub preview: bool,
    /// Excerpt quality; `None` for full renders
    pub quality: Option<PreviewQuality>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryState::Pending)
    }
}

/// What the orchestrator should do with an incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// No usable entry; issue a backend call
    Issue,
    /// An identical request is already in flight
    JoinPending,
    /// This exact request already completed; its resources are installed
    AlreadyComplete,
}

#[derive(Default)]
pub struct RenderCache {
    entries: HashMap<RequestKey, EntryState>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the intent to render. Inserts a pending entry only when a
    /// fresh backend call is warranted.
    pub fn begin(&mut self, key: &RequestKey) -> CacheDecision {
        match self.entries.get(key) {
            Some(EntryState::Pending) => CacheDecision::JoinPending,
            Some(EntryState::Succeeded) => CacheDecision::AlreadyComplete,
            _ => {
                self.entries.insert(key.clone(), EntryState::Pending);
                CacheDecision::Issue
            }
        }
    }

    /// Move a pending entry to its terminal state. Returns whether the
    /// result is still wanted; a cancelled entry is dropped instead.
    pub fn complete(&mut self, key: &RequestKey, success: bool) -> bool {
        if self.state(key) == Some(EntryState::Cancelled) {
            self.entries.remove(key);
            return false;
        }
        let state = if success {
            EntryState::Succeeded
        } else {
            EntryState::Failed
        };
        self.entries.insert(key.clone(), state);
        true
    }

    pub fn cancel(&mut self, key: &RequestKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            if !entry.is_terminal() {
                *entry = EntryState::Cancelled;
            }
        }
    }

    pub fn state(&self, key: &RequestKey) -> Option<EntryState> {
        self.entries.get(key).copied()
    }

    pub fn has_pending(&self) -> bool {
        self.entries
            .values()
            .any(|state| *state == EntryState::Pending)
    }

    /// Drop finished preview entries and cancel the in-flight ones, so
    /// their completions are discarded on arrival. Full renders survive
    /// tempo/key drift.
    pub fn invalidate_previews(&mut self) -> usize {
        let stale: Vec<RequestKey> = self
            .entries
            .keys()
            .filter(|key| key.preview)
            .cloned()
            .collect();
        for key in &stale {
            if self.state(key) == Some(EntryState::Pending) {
                self.cancel(key);
            } else {
                self.entries.remove(key);
            }
        }
        stale.len()
    }
}

/// Debounced staleness detector for preview renders.
///
/// Time is passed in explicitly so tests can drive the debounce without
/// sleeping.
pub struct PreviewInvalidator {
    baseline_bpm: u32,
    baseline_key: String,
    current_bpm: u32,
    current_key: String,
    pending_since: Option<Instant>,
}

impl PreviewInvalidator {
    pub fn new(bpm: u32, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            baseline_bpm: bpm,
            baseline_key: key.clone(),
            current_bpm: bpm,
            current_key: key,
            pending_since: None,
        }
    }

    pub fn note_bpm(&mut self, bpm: u32, now: Instant) {
        self.current_bpm = bpm;
        self.update_pending(now);
    }

    pub fn note_key(&mut self, key: &str, now: Instant) {
        self.current_key = key.to_string();
        self.update_pending(now);
    }

    /// Whether an invalidation is armed and waiting out the debounce
    pub fn is_armed(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Fire once the debounce has elapsed. On firing, the current values
    /// become the new baseline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending_since {
            Some(since) if now.duration_since(since) >= INVALIDATION_DEBOUNCE => {
                self.pending_since = None;
                self.baseline_bpm = self.current_bpm;
                self.baseline_key = self.current_key.clone();
                log::debug!(
                    "Preview cache stale: baseline now {} BPM, {}",
                    self.baseline_bpm,
                    self.baseline_key
                );
                true
            }
            _ => false,
        }
    }

    /// Adopt freshly rendered parameters as the baseline
    pub fn rebase(&mut self, bpm: u32, key: &str) {
        self.baseline_bpm = bpm;
        self.baseline_key = key.to_string();
        self.current_bpm = bpm;
        self.current_key = key.to_string();
        self.pending_since = None;
    }

    fn update_pending(&mut self, now: Instant) {
        let stale = self.current_bpm.abs_diff(self.baseline_bpm) > BPM_INVALIDATION_THRESHOLD
            || self.current_key != self.baseline_key;
        // Every edit restarts the debounce; edits back inside the
        // threshold disarm it
        self.pending_since = if stale { Some(now) } else { None };
    }
}

//! # stemloop-core
//!
//! Stem session engine: assemble a multi-track loop from pre-recorded
//! audio stems, audition bounded excerpts, and reconcile server-side
//! renders into playable per-stem resources.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        StemSession                         │
//! │  tracks / stems / mute state / fingerprint                 │
//! └───────┬───────────────┬────────────────┬───────────────────┘
//!         │               │                │
//!  ┌──────▼─────┐  ┌──────▼───────┐  ┌─────▼────────────┐
//!  │ Playback   │  │ Audition     │  │ Render           │
//!  │ Scheduler  │  │ Controller   │  │ Orchestrator     │
//!  └──────┬─────┘  └──────┬───────┘  └─────┬────────────┘
//!         │               │                │  worker threads
//!  ┌──────▼───────────────▼──────┐   ┌─────▼────────────┐
//!  │  AudioEngine (cpal mixer)   │   │ backend / fetch  │
//!  └─────────────────────────────┘   └──────────────────┘
//! ```
//!
//! All session state mutates on the owner's thread; worker threads report
//! over crossbeam channels drained by [`session::StemSession::pump_events`].

pub mod audition;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod export;
pub mod music;
pub mod render;
pub mod session;
pub mod types;

pub use crate::catalog::{CatalogClient, CatalogTrack, HttpStemFetcher, StemFetcher};
pub use crate::config::StudioConfig;
pub use crate::engine::scheduler::PlaybackState;
pub use crate::engine::AudioEngine;
pub use crate::render::HttpRenderBackend;
pub use crate::session::{MuteOutcome, RenderHint, SessionEvent, StemSession};
pub use crate::types::{PreviewQuality, PreviewSection, TrackId};

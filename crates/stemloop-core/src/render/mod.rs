//! Render request pipeline: wire protocol, fingerprint-keyed cache, and
//! the worker-thread orchestrator that turns backend responses into
//! decoded, playable resources.

pub mod backend;
pub mod cache;
pub mod error;
pub mod orchestrator;

pub use self::backend::{HttpRenderBackend, RenderBackend, RenderJob, RenderResponse};
pub use self::cache::{CacheDecision, PreviewInvalidator, RenderCache, RequestKey};
pub use self::error::{RenderError, Result};
pub use self::orchestrator::{
    build_request, RenderCompletion, RenderMode, RenderOrchestrator, RenderRequest, RenderTarget,
    StemOutcome, TrackView,
};

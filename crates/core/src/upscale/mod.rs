//! Content-addressed upscaling of loaded pages.
//!
//! Freshly loaded pages are handed to an [`UpscaleHandler`], which checks the
//! condition rules, reuses results from memory or the persistent store, and
//! otherwise queues a job for an [`UpscaleEngine`]. Identical pages share
//! one job: work is keyed by the SHA-256 of the page bytes.

mod conditions;
mod engine;
mod handler;
mod job;

use std::path::PathBuf;

use pageflow_cache::{ContentHash, PageBuffer, PageIndex};

pub use conditions::{
    ConditionVerdict, UpscaleCondition, UpscaleConditions, DEFAULT_MODEL, DEFAULT_SCALE,
};
pub use engine::{EngineOutcome, ResizeEngine, UpscaleEngine, UpscaleRequest};
pub use handler::{
    PageUpscaleRequest, UpscaleDisposition, UpscaleHandler, UpscaleHandlerBuilder, UpscaleStats,
};
pub use job::{JobState, UpscaleJob};

/// Per-page upscale status shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UpscaleStatus {
    #[default]
    None,
    Pending,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl UpscaleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UpscaleStatus::None => "none",
            UpscaleStatus::Pending => "pending",
            UpscaleStatus::Processing => "processing",
            UpscaleStatus::Done => "done",
            UpscaleStatus::Failed => "failed",
            UpscaleStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpscaleError {
    #[error("upscale engine is busy")]
    Busy,

    #[error("upscale engine failed: {0}")]
    Engine(String),

    #[error("upscale result store failed: {0}")]
    Store(String),

    #[error("upscale was cancelled")]
    Cancelled,
}

/// Where a finished result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Memory,
    Store,
    Engine,
}

/// A finished upscale, ready to replace the displayed page
#[derive(Debug, Clone)]
pub struct UpscaleCompletion {
    pub index: PageIndex,
    pub hash: ContentHash,
    pub buffer: PageBuffer,
    pub source: ResultSource,
    /// Location in the result store, when persisted
    pub path: Option<PathBuf>,
}

/// Receives upscale progress. Calls arrive on loader and upscale worker
/// threads; every method defaults to doing nothing.
pub trait UpscaleListener: Send + Sync {
    fn on_status(&self, _index: PageIndex, _status: UpscaleStatus) {}

    fn on_complete(&self, _completion: &UpscaleCompletion) {}

    fn on_failed(&self, _index: PageIndex, _hash: &ContentHash, _error: &UpscaleError) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUpscaleListener;

impl UpscaleListener for NoopUpscaleListener {}

//! Upscale job lifecycle

use pageflow_cache::{ContentHash, PageBuffer, PageIndex};
use tracing::warn;

use super::engine::UpscaleRequest;

/// State of one upscale job.
///
/// `Queued -> Running -> {Done | Failed | Requeued | Cancelled}` and
/// `Requeued -> Queued`. Queued and requeued jobs may also be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    Requeued,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Requeued)
                | (Running, Cancelled)
                | (Requeued, Queued)
                | (Requeued, Cancelled)
        )
    }
}

/// A unit of upscale work for one page
#[derive(Debug, Clone)]
pub struct UpscaleJob {
    pub id: u64,
    pub page: PageIndex,
    pub hash: ContentHash,
    pub input: PageBuffer,
    pub model: String,
    pub scale: u32,
    pub tile_size: u32,
    pub noise_level: i32,
    pub state: JobState,
    /// Times the engine asked for a retry
    pub attempts: u32,
    /// Handler epoch the job was created in; bumped when documents change
    pub epoch: u64,
}

impl UpscaleJob {
    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            warn!(job = self.id, page = self.page, from = ?self.state, to = ?next, "invalid upscale job transition");
            false
        }
    }

    pub fn request(&self) -> UpscaleRequest {
        UpscaleRequest {
            job_id: self.id,
            page: self.page,
            hash: self.hash.clone(),
            input: self.input.clone(),
            model: self.model.clone(),
            scale: self.scale,
            tile_size: self.tile_size,
            noise_level: self.noise_level,
        }
    }
}

//! Notifications from the loader to the renderer

use pageflow_cache::{BlobHandle, Dimensions, PageIndex};

use crate::error::LoadError;

/// Renderer hooks invoked by the loader.
///
/// Every method defaults to doing nothing. Calls arrive on loader worker
/// threads, so implementations must hand off to their own UI thread.
pub trait RendererCallbacks: Send + Sync {
    /// The current page's bytes are cached and displayable
    fn on_image_ready(&self, _index: PageIndex, _handle: &BlobHandle) {}

    /// Dimensions became known; `None` if they could not be determined
    fn on_dimensions_ready(&self, _index: PageIndex, _dimensions: Option<Dimensions>) {}

    /// A pre-decoded bitmap is attached to the cached page
    fn on_bitmap_ready(&self, _index: PageIndex) {}

    /// A load or decode failed for a reason other than navigation
    fn on_error(&self, _index: PageIndex, _error: &LoadError) {}
}

/// Callbacks that ignore every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl RendererCallbacks for NoopCallbacks {}

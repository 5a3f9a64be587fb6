//! Page pipeline for a paginated image reader.
//!
//! Pages flow from a [`PageSource`] through a bounded priority
//! [`LoadQueue`](pageflow_scheduler::LoadQueue) into a byte-budgeted
//! [`BlobCache`](pageflow_cache::BlobCache). A [`ReaderSession`] drives
//! navigation: it loads the current page first, preloads around it with a
//! direction-aware plan, and optionally hands cached pages to an
//! [`UpscaleHandler`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use pageflow_core::{FolderPageSource, PipelineConfig, ReaderSession};
//!
//! let mut session = ReaderSession::new(PipelineConfig::default())?;
//! session.open(Arc::new(FolderPageSource::open("chapter-01")?));
//! let nav = session.goto_page(0)?;
//! println!("page 0 is {:?}", nav.handle.wait()?.dimensions);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod loader;
pub mod pool;
pub mod session;
pub mod source;
pub mod upscale;

pub use config::{ConfigError, PipelineConfig, SharedConfig, UpscaleSettings};
pub use decode::{ImageCrateDecoder, ImageDecoder};
pub use error::{DecodeError, LoadError, LoadResult, SourceError};
pub use events::{NoopCallbacks, RendererCallbacks};
pub use loader::{ImageLoaderCore, LoadHandle, LoaderOptions, PageLoad, PreloadSummary};
pub use pool::LoaderPool;
pub use session::{Navigation, ReaderSession};
pub use source::{FolderPageSource, MemoryPageSource, PageSource, IMAGE_EXTENSIONS};
pub use upscale::{
    ResizeEngine, UpscaleDisposition, UpscaleEngine, UpscaleHandler, UpscaleListener,
    UpscaleStatus,
};

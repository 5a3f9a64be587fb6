//! Error types for page loading

use std::io;

use pageflow_cache::PageIndex;
use pageflow_scheduler::QueueError;

/// Why a page load did not produce a buffer.
///
/// Cancellation, queue clears and invalidation are ordinary control flow
/// during navigation; see [`LoadError::is_control_flow`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("page {index} not found")]
    PageNotFound { index: PageIndex },

    #[error("load of page {index} was cancelled")]
    TaskCancelled { index: PageIndex },

    #[error("load queue was cleared")]
    QueueCleared,

    #[error("loader was invalidated")]
    Invalidated,

    #[error("failed to decode page {index}: {message}")]
    Decode { index: PageIndex, message: String },

    #[error("failed to read page {index}: {message}")]
    Source { index: PageIndex, message: String },
}

impl LoadError {
    /// Whether this error is expected during normal navigation and should
    /// not be surfaced to the user
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            LoadError::TaskCancelled { .. } | LoadError::QueueCleared | LoadError::Invalidated
        )
    }

    /// Page the error concerns, when known
    pub fn page(&self) -> Option<PageIndex> {
        match self {
            LoadError::PageNotFound { index }
            | LoadError::TaskCancelled { index }
            | LoadError::Decode { index, .. }
            | LoadError::Source { index, .. } => Some(*index),
            LoadError::QueueCleared | LoadError::Invalidated => None,
        }
    }
}

impl From<QueueError> for LoadError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Cancelled { index } => LoadError::TaskCancelled { index },
            QueueError::Cleared => LoadError::QueueCleared,
            QueueError::WorkerUnavailable { index, message } => {
                LoadError::Source { index, message }
            }
            QueueError::Panicked { index } => LoadError::Source {
                index,
                message: "load task panicked".to_string(),
            },
        }
    }
}

/// Failure reported by a [`PageSource`](crate::source::PageSource).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Index out of range, or the document has been closed
    #[error("page {index} not found")]
    PageNotFound { index: PageIndex },

    #[error("failed to read page {index}")]
    Io {
        index: PageIndex,
        #[source]
        source: io::Error,
    },
}

impl From<SourceError> for LoadError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::PageNotFound { index } => LoadError::PageNotFound { index },
            SourceError::Io { index, source } => LoadError::Source {
                index,
                message: source.to_string(),
            },
        }
    }
}

/// Failure decoding image bytes.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty image buffer")]
    Empty,

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DecodeError {
    pub fn into_load_error(self, index: PageIndex) -> LoadError {
        LoadError::Decode {
            index,
            message: self.to_string(),
        }
    }
}

/// Result alias for page loads
pub type LoadResult<T> = Result<T, LoadError>;

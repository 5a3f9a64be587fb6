//! Pageflow Scheduler Library
//!
//! Bounded-concurrency priority loading for page images.
//!
//! [`LoadQueue`] runs page tasks in priority order with at most `concurrency`
//! in flight, handing each caller a settle-once [`TaskHandle`]. The
//! [`preload`] module decides which pages to queue, and at what priority,
//! as the reader moves through a document.
//!
//! # Example
//!
//! ```
//! use pageflow_scheduler::{
//!     calculate_preload_plan, plan_to_queue, LoadQueue, PreloadOptions, QueueError,
//! };
//!
//! let queue: LoadQueue<usize, QueueError> = LoadQueue::new(4);
//! let plan = calculate_preload_plan(5, 20, &PreloadOptions::default());
//!
//! let handles: Vec<_> = plan_to_queue(&plan)
//!     .into_iter()
//!     .map(|task| queue.enqueue(task.index, task.priority, move |_| Ok(task.index)))
//!     .collect();
//!
//! assert_eq!(handles[0].wait(), Ok(5));
//! ```

mod cancel;
mod handle;
pub mod preload;
mod queue;

/// Zero-based page index within a document.
pub type PageIndex = usize;

pub use cancel::CancellationToken;
pub use handle::TaskHandle;
pub use preload::{
    calculate_preload_plan, plan_to_queue, Direction, PreloadOptions, PreloadPlan,
    PreloadStrategy, PreloadTask, PreloadTier, PRIORITY_IMMEDIATE, PRIORITY_NEXT_HIGH,
    PRIORITY_NORMAL_FLOOR, PRIORITY_NORMAL_START, PRIORITY_PREV_HIGH,
};
pub use queue::{LoadQueue, Priority, QueueError, QueueStats, TaskId};

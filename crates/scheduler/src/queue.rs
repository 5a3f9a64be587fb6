//! Bounded-concurrency priority queue for page loads
//!
//! Tasks are ordered by priority, then by arrival. A task is admitted as
//! soon as a slot is free and runs on its own named thread; when it finishes
//! its slot is released before its handle settles, so the next task is
//! already dispatched by the time waiters wake up.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, trace, warn};

use crate::cancel::CancellationToken;
use crate::handle::TaskHandle;
use crate::PageIndex;

/// Task priority; larger runs first.
pub type Priority = u32;

/// Queue-assigned task identifier
pub type TaskId = u64;

/// Reasons the queue settles a task without a result from its executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task for page {index} was cancelled before it started")]
    Cancelled { index: PageIndex },

    #[error("load queue was cleared")]
    Cleared,

    #[error("failed to start worker for page {index}: {message}")]
    WorkerUnavailable { index: PageIndex, message: String },

    #[error("task for page {index} panicked")]
    Panicked { index: PageIndex },
}

type Executor<T, E> = Box<dyn FnOnce(&CancellationToken) -> Result<T, E> + Send>;

struct QueuedTask<T, E> {
    id: TaskId,
    page: PageIndex,
    priority: Priority,
    /// Arrival order; unchanged by priority boosts
    sequence: u64,
    executor: Executor<T, E>,
    handle: TaskHandle<T, E>,
}

impl<T, E> PartialEq for QueuedTask<T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T, E> Eq for QueuedTask<T, E> {}

impl<T, E> PartialOrd for QueuedTask<T, E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, E> Ord for QueuedTask<T, E> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so earlier arrivals must compare greater.
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Load queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub started: u64,
    pub completed: u64,
    /// Tasks removed by [`LoadQueue::cancel`] before starting
    pub cancelled: u64,
    /// Tasks rejected by [`LoadQueue::clear`]
    pub cleared: u64,
    pub running: usize,
    pub queued: usize,
    pub concurrency: usize,
}

struct Started<T, E> {
    task: QueuedTask<T, E>,
    generation: u64,
}

struct QueueState<T, E> {
    heap: BinaryHeap<QueuedTask<T, E>>,
    running: HashMap<TaskId, (PageIndex, CancellationToken)>,
    concurrency: usize,
    next_sequence: u64,
    next_id: TaskId,
    /// Bumped by clear; completions from older generations do not free slots
    generation: u64,
    stats: QueueStats,
}

impl<T, E> QueueState<T, E> {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            running: self.running.len(),
            queued: self.heap.len(),
            concurrency: self.concurrency,
            ..self.stats
        }
    }

    /// Admit queued tasks while slots are free.
    fn dispatch(&mut self) -> Vec<Started<T, E>> {
        let mut batch = Vec::new();
        while self.running.len() < self.concurrency {
            let Some(task) = self.heap.pop() else {
                break;
            };
            self.running
                .insert(task.id, (task.page, task.handle.token().clone()));
            self.stats.started += 1;
            batch.push(Started {
                task,
                generation: self.generation,
            });
        }
        batch
    }
}

struct QueueInner<T, E> {
    name: String,
    state: Mutex<QueueState<T, E>>,
}

impl<T, E> QueueInner<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<QueueError> + 'static,
{
    fn lock(&self) -> MutexGuard<'_, QueueState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch(self: &Arc<Self>, batch: Vec<Started<T, E>>) {
        for Started { task, generation } in batch {
            let id = task.id;
            let page = task.page;
            let handle = task.handle.clone();
            let inner = Arc::clone(self);

            trace!(queue = %self.name, page, priority = task.priority, "starting task");
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, page))
                .spawn(move || {
                    let QueuedTask {
                        executor, handle, ..
                    } = task;
                    let token = handle.token().clone();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| executor(&token)))
                        .unwrap_or_else(|_| {
                            warn!(page, "load task panicked");
                            Err(QueueError::Panicked { index: page }.into())
                        });
                    inner.finish(id, generation);
                    handle.settle(result);
                });

            if let Err(e) = spawned {
                warn!(queue = %self.name, page, error = %e, "failed to spawn load worker");
                self.finish(id, generation);
                handle.settle(Err(QueueError::WorkerUnavailable {
                    index: page,
                    message: e.to_string(),
                }
                .into()));
            }
        }
    }

    /// Release a slot and admit whatever can run next.
    fn finish(self: &Arc<Self>, id: TaskId, generation: u64) {
        let batch = {
            let mut state = self.lock();
            if state.generation == generation {
                state.running.remove(&id);
            }
            state.stats.completed += 1;
            state.dispatch()
        };
        self.launch(batch);
    }
}

/// Priority queue that runs at most `concurrency` tasks at once.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```
/// use pageflow_scheduler::{LoadQueue, QueueError};
///
/// let queue: LoadQueue<usize, QueueError> = LoadQueue::new(2);
/// let handle = queue.enqueue(3, 100, |_token| Ok(3 * 2));
/// assert_eq!(handle.wait(), Ok(6));
/// ```
pub struct LoadQueue<T, E> {
    inner: Arc<QueueInner<T, E>>,
}

impl<T, E> Clone for LoadQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> LoadQueue<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<QueueError> + 'static,
{
    /// Create a queue with worker threads named `pageflow-load-<page>`
    pub fn new(concurrency: usize) -> Self {
        Self::named("pageflow-load", concurrency)
    }

    /// Create a queue whose worker threads are named `<name>-<page>`
    pub fn named(name: impl Into<String>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                state: Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    running: HashMap::new(),
                    concurrency,
                    next_sequence: 0,
                    next_id: 0,
                    generation: 0,
                    stats: QueueStats::default(),
                }),
            }),
        }
    }

    /// Queue a task for `page` and return a handle to its outcome.
    ///
    /// The executor receives the task's cancellation token. It starts
    /// immediately if a slot is free.
    pub fn enqueue<F>(&self, page: PageIndex, priority: Priority, executor: F) -> TaskHandle<T, E>
    where
        F: FnOnce(&CancellationToken) -> Result<T, E> + Send + 'static,
    {
        let handle = TaskHandle::pending(page, CancellationToken::new());
        let batch = {
            let mut state = self.inner.lock();
            let id = state.next_id;
            state.next_id += 1;
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.stats.submitted += 1;
            state.heap.push(QueuedTask {
                id,
                page,
                priority,
                sequence,
                executor: Box::new(executor),
                handle: handle.clone(),
            });
            state.dispatch()
        };
        trace!(queue = %self.inner.name, page, priority, "enqueued task");
        self.inner.launch(batch);
        handle
    }

    /// Raise the priority of queued tasks for `page`.
    ///
    /// Never lowers a priority and keeps arrival order. Returns true if any
    /// task was raised.
    pub fn boost_priority(&self, page: PageIndex, priority: Priority) -> bool {
        let mut state = self.inner.lock();
        let raises = |task: &QueuedTask<T, E>| task.page == page && task.priority < priority;
        if !state.heap.iter().any(raises) {
            return false;
        }

        let mut tasks = std::mem::take(&mut state.heap).into_vec();
        for task in &mut tasks {
            if task.page == page {
                task.priority = task.priority.max(priority);
            }
        }
        state.heap = BinaryHeap::from(tasks);
        trace!(queue = %self.inner.name, page, priority, "boosted queued task");
        true
    }

    /// Remove queued tasks for `page`, settling them with
    /// [`QueueError::Cancelled`].
    ///
    /// Tasks that already started are not affected. Returns true if
    /// anything was removed.
    pub fn cancel(&self, page: PageIndex) -> bool {
        let removed = {
            let mut state = self.inner.lock();
            if !state.heap.iter().any(|task| task.page == page) {
                return false;
            }
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.heap)
                .into_vec()
                .into_iter()
                .partition(|task| task.page == page);
            state.heap = BinaryHeap::from(kept);
            state.stats.cancelled += removed.len() as u64;
            removed
        };

        debug!(queue = %self.inner.name, page, count = removed.len(), "cancelled queued tasks");
        for task in removed {
            task.handle.token().cancel();
            task.handle
                .settle(Err(QueueError::Cancelled { index: page }.into()));
        }
        true
    }

    /// Reject every queued task with [`QueueError::Cleared`] and forget
    /// running ones.
    ///
    /// Running tasks have their tokens cancelled but keep running; their
    /// completion no longer frees a slot. Returns the number of queued
    /// tasks rejected.
    pub fn clear(&self) -> usize {
        let (drained, running) = {
            let mut state = self.inner.lock();
            state.generation += 1;
            let drained: Vec<_> = state.heap.drain().collect();
            let running: Vec<_> = state.running.drain().map(|(_, (_, token))| token).collect();
            state.stats.cleared += drained.len() as u64;
            (drained, running)
        };

        for token in running {
            token.cancel();
        }
        let count = drained.len();
        for task in drained {
            task.handle.token().cancel();
            task.handle.settle(Err(QueueError::Cleared.into()));
        }
        debug!(queue = %self.inner.name, rejected = count, "cleared load queue");
        count
    }

    /// Change the concurrency limit (minimum 1), admitting tasks if it grew
    pub fn set_concurrency(&self, concurrency: usize) {
        let batch = {
            let mut state = self.inner.lock();
            state.concurrency = concurrency.max(1);
            state.dispatch()
        };
        self.inner.launch(batch);
    }

    pub fn concurrency(&self) -> usize {
        self.inner.lock().concurrency
    }

    /// Number of tasks currently occupying a slot
    pub fn running(&self) -> usize {
        self.inner.lock().running.len()
    }

    /// Number of tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.heap.is_empty() && state.running.is_empty()
    }

    /// Highest priority among queued tasks for `page`
    pub fn queued_priority(&self, page: PageIndex) -> Option<Priority> {
        self.inner
            .lock()
            .heap
            .iter()
            .filter(|task| task.page == page)
            .map(|task| task.priority)
            .max()
    }

    /// Whether a task for `page` currently occupies a slot
    pub fn is_running(&self, page: PageIndex) -> bool {
        self.inner
            .lock()
            .running
            .values()
            .any(|(running, _)| *running == page)
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().snapshot()
    }
}

impl<T, E> fmt::Debug for LoadQueue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("LoadQueue")
            .field("name", &self.inner.name)
            .field("stats", &state.snapshot())
            .finish()
    }
}

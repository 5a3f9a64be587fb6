//! Upscale job coordination
//!
//! One handler serves every document of a session. Jobs run on a small pool
//! of named worker threads; results are shared by content hash, so a page
//! that was already upscaled (in this process or an earlier one) is applied
//! without touching the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pageflow_cache::{ContentHash, Dimensions, FifoCache, PageBuffer, PageIndex, ResultStore};
use tracing::{debug, info, trace, warn};

use super::conditions::ConditionVerdict;
use super::engine::{EngineOutcome, UpscaleEngine};
use super::job::{JobState, UpscaleJob};
use super::{
    NoopUpscaleListener, ResultSource, UpscaleCompletion, UpscaleError, UpscaleListener,
    UpscaleStatus,
};
use crate::config::UpscaleSettings;

/// A loaded page offered for upscaling
#[derive(Debug, Clone)]
pub struct PageUpscaleRequest {
    pub index: PageIndex,
    pub buffer: PageBuffer,
    pub hash: ContentHash,
    pub dimensions: Option<Dimensions>,
    /// The reader is looking at this page; its job jumps the queue
    pub current: bool,
}

/// What [`UpscaleHandler::handle_page_upscale`] did with a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleDisposition {
    Disabled,
    /// A condition rule excluded the page
    Skipped,
    AppliedFromMemory,
    AppliedFromStore,
    Submitted,
    /// A job for the same content is already queued or running
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpscaleStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub requeued: u64,
    pub skipped: u64,
    pub duplicates: u64,
    pub memory_hits: u64,
    pub store_hits: u64,
    pub queued: usize,
    pub delayed: usize,
    pub running: usize,
}

/// A job the engine is working on
struct RunningJob {
    /// Page the engine was asked to upscale
    page: PageIndex,
    hash: ContentHash,
    epoch: u64,
}

struct HandlerState {
    queue: VecDeque<UpscaleJob>,
    /// Jobs the engine reported busy, with the instant they may run again
    delayed: Vec<(Instant, UpscaleJob)>,
    running: HashMap<u64, RunningJob>,
    /// Hashes with a queued, delayed or running job of the current epoch
    active: HashSet<ContentHash>,
    /// Running jobs whose page was navigated away from
    cancel_requested: HashSet<u64>,
    /// Running jobs passed on to another page with the same content
    handoffs: HashMap<u64, PageIndex>,
    /// Other pages with the same content, waiting on an active job
    followers: HashMap<ContentHash, Vec<PageIndex>>,
    results: FifoCache<ContentHash, PageBuffer>,
    statuses: HashMap<PageIndex, UpscaleStatus>,
    stats: UpscaleStats,
    next_job_id: u64,
    epoch: u64,
}

impl HandlerState {
    /// Move due delayed jobs back to the tail of the queue
    fn promote_due(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.delayed.len() {
            if self.delayed[index].0 <= now {
                let (_, mut job) = self.delayed.swap_remove(index);
                job.transition(JobState::Queued);
                self.queue.push_back(job);
            } else {
                index += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(due, _)| *due).min()
    }

    /// Move the queued job for `hash` to the front
    fn promote(&mut self, hash: &ContentHash) {
        if let Some(position) = self.queue.iter().position(|job| &job.hash == hash) {
            if let Some(job) = self.queue.remove(position) {
                self.queue.push_front(job);
            }
        }
    }

    fn set_status(&mut self, index: PageIndex, status: UpscaleStatus) {
        self.statuses.insert(index, status);
    }

    /// Attach `index` to the active job for `hash`. Returns true if the
    /// page's status changed to pending.
    fn follow(&mut self, hash: &ContentHash, index: PageIndex) -> bool {
        let followers = self.followers.entry(hash.clone()).or_default();
        if !followers.contains(&index) {
            followers.push(index);
        }
        match self.statuses.get(&index) {
            Some(UpscaleStatus::Pending | UpscaleStatus::Processing) => false,
            _ => {
                self.set_status(index, UpscaleStatus::Pending);
                true
            }
        }
    }

    /// Take another page waiting on `hash` to own its job once `previous`
    /// is left behind
    fn hand_over(&mut self, hash: &ContentHash, previous: PageIndex) -> Option<PageIndex> {
        let followers = self.followers.get_mut(hash)?;
        followers.retain(|page| *page != previous);
        if followers.is_empty() {
            None
        } else {
            Some(followers.remove(0))
        }
    }

    /// Forget a finished job and set `status` on its page and followers.
    ///
    /// Returns the pages to notify; none for jobs of an earlier epoch.
    fn retire(&mut self, job: &UpscaleJob, status: UpscaleStatus) -> Vec<PageIndex> {
        self.running.remove(&job.id);
        self.cancel_requested.remove(&job.id);
        let owner = self.handoffs.remove(&job.id).unwrap_or(job.page);
        if job.epoch != self.epoch {
            // `clear` already released the hash; it may belong to a newer job.
            return Vec::new();
        }
        self.active.remove(&job.hash);
        let followers = self.followers.remove(&job.hash).unwrap_or_default();

        let mut pages = vec![owner];
        pages.extend(followers.into_iter().filter(|page| *page != owner));
        for page in &pages {
            self.set_status(*page, status);
        }
        pages
    }
}

struct HandlerInner {
    engine: Arc<dyn UpscaleEngine>,
    store: Option<Arc<dyn ResultStore>>,
    listener: Arc<dyn UpscaleListener>,
    enabled: AtomicBool,
    settings: RwLock<UpscaleSettings>,
    state: Mutex<HandlerState>,
    work_ready: Condvar,
    shutdown: AtomicBool,
}

impl HandlerInner {
    fn lock(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> UpscaleSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until a job is runnable or the handler shuts down
    fn next_job(&self) -> Option<UpscaleJob> {
        let mut state = self.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            state.promote_due(Instant::now());

            if let Some(mut job) = state.queue.pop_front() {
                job.transition(JobState::Running);
                state.running.insert(
                    job.id,
                    RunningJob {
                        page: job.page,
                        hash: job.hash.clone(),
                        epoch: job.epoch,
                    },
                );
                state.set_status(job.page, UpscaleStatus::Processing);
                return Some(job);
            }

            state = match state.next_due() {
                Some(due) => {
                    let timeout = due.saturating_duration_since(Instant::now());
                    self.work_ready
                        .wait_timeout(state, timeout)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
                None => self
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn run_job(&self, job: UpscaleJob) {
        self.listener.on_status(job.page, UpscaleStatus::Processing);
        trace!(job = job.id, page = job.page, model = %job.model, scale = job.scale, "upscaling page");

        let request = job.request();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.engine.submit(&request)))
            .unwrap_or_else(|_| EngineOutcome::Failure("upscale engine panicked".to_string()));
        self.complete(job, outcome);
    }

    fn complete(&self, mut job: UpscaleJob, outcome: EngineOutcome) {
        match outcome {
            EngineOutcome::Success(output) => {
                let path = self.persist(&job.hash, &output);
                let pages = {
                    let mut state = self.lock();
                    job.transition(JobState::Done);
                    state.results.insert(job.hash.clone(), output.clone());
                    state.stats.completed += 1;
                    state.retire(&job, UpscaleStatus::Done)
                };
                debug!(page = job.page, hash = %job.hash, bytes = output.len(), "upscale finished");
                for page in pages {
                    self.listener.on_status(page, UpscaleStatus::Done);
                    self.listener.on_complete(&UpscaleCompletion {
                        index: page,
                        hash: job.hash.clone(),
                        buffer: output.clone(),
                        source: ResultSource::Engine,
                        path: path.clone(),
                    });
                }
            }
            EngineOutcome::Requeue => {
                let backoff = Duration::from_millis(self.settings().busy_backoff_ms);
                let mut state = self.lock();
                let abandoned = state.cancel_requested.remove(&job.id) || job.epoch != state.epoch;
                if abandoned {
                    job.transition(JobState::Cancelled);
                    state.stats.cancelled += 1;
                    let pages = state.retire(&job, UpscaleStatus::Cancelled);
                    drop(state);
                    self.notify(&pages, UpscaleStatus::Cancelled);
                    return;
                }

                state.running.remove(&job.id);
                if let Some(owner) = state.handoffs.remove(&job.id) {
                    job.page = owner;
                }
                job.transition(JobState::Requeued);
                job.attempts += 1;
                debug!(
                    page = job.page,
                    attempts = job.attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    reason = %UpscaleError::Busy,
                    "retrying upscale later"
                );
                let page = job.page;
                state.stats.requeued += 1;
                state.set_status(page, UpscaleStatus::Pending);
                state.delayed.push((Instant::now() + backoff, job));
                drop(state);
                // Idle workers recompute their wake-up time.
                self.work_ready.notify_all();
                self.listener.on_status(page, UpscaleStatus::Pending);
            }
            EngineOutcome::Failure(message) => {
                let pages = {
                    let mut state = self.lock();
                    job.transition(JobState::Failed);
                    state.stats.failed += 1;
                    state.retire(&job, UpscaleStatus::Failed)
                };
                let error = UpscaleError::Engine(message);
                warn!(page = job.page, hash = %job.hash, error = %error, "upscale failed");
                for page in pages {
                    self.listener.on_status(page, UpscaleStatus::Failed);
                    self.listener.on_failed(page, &job.hash, &error);
                }
            }
            EngineOutcome::Cancelled => {
                let pages = {
                    let mut state = self.lock();
                    job.transition(JobState::Cancelled);
                    state.stats.cancelled += 1;
                    state.retire(&job, UpscaleStatus::Cancelled)
                };
                debug!(page = job.page, "upscale cancelled by engine");
                self.notify(&pages, UpscaleStatus::Cancelled);
            }
        }
    }

    fn notify(&self, pages: &[PageIndex], status: UpscaleStatus) {
        for page in pages {
            self.listener.on_status(*page, status);
        }
    }

    fn persist(&self, hash: &ContentHash, output: &PageBuffer) -> Option<PathBuf> {
        let store = self.store.as_ref()?;
        let max_age = Duration::from_secs(self.settings().cache_max_age_secs);
        match store.write(hash, output, max_age) {
            Ok(path) => Some(path),
            Err(e) => {
                let error = UpscaleError::Store(e.to_string());
                warn!(%hash, error = %error, "failed to persist upscale result");
                None
            }
        }
    }

    /// Apply a finished result found outside the engine
    fn apply_cached(
        &self,
        request: &PageUpscaleRequest,
        buffer: PageBuffer,
        source: ResultSource,
        path: Option<PathBuf>,
    ) {
        {
            let mut state = self.lock();
            match source {
                ResultSource::Store => {
                    state.results.insert(request.hash.clone(), buffer.clone());
                    state.stats.store_hits += 1;
                }
                _ => state.stats.memory_hits += 1,
            }
            state.set_status(request.index, UpscaleStatus::Done);
        }
        debug!(page = request.index, hash = %request.hash, ?source, "applied cached upscale");
        self.listener.on_status(request.index, UpscaleStatus::Done);
        self.listener.on_complete(&UpscaleCompletion {
            index: request.index,
            hash: request.hash.clone(),
            buffer,
            source,
            path,
        });
    }
}

fn worker_loop(inner: Arc<HandlerInner>) {
    while let Some(job) = inner.next_job() {
        inner.run_job(job);
    }
    trace!("upscale worker exiting");
}

/// Builder for [`UpscaleHandler`]
pub struct UpscaleHandlerBuilder {
    engine: Arc<dyn UpscaleEngine>,
    store: Option<Arc<dyn ResultStore>>,
    listener: Arc<dyn UpscaleListener>,
    settings: UpscaleSettings,
    enabled: bool,
}

impl UpscaleHandlerBuilder {
    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn UpscaleListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn settings(mut self, settings: UpscaleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Start the worker threads
    pub fn build(self) -> UpscaleHandler {
        let worker_count = self.settings.workers.max(1);
        let inner = Arc::new(HandlerInner {
            engine: self.engine,
            store: self.store,
            listener: self.listener,
            enabled: AtomicBool::new(self.enabled),
            state: Mutex::new(HandlerState {
                queue: VecDeque::new(),
                delayed: Vec::new(),
                running: HashMap::new(),
                active: HashSet::new(),
                cancel_requested: HashSet::new(),
                handoffs: HashMap::new(),
                followers: HashMap::new(),
                results: FifoCache::new(self.settings.memory_results),
                statuses: HashMap::new(),
                stats: UpscaleStats::default(),
                next_job_id: 0,
                epoch: 0,
            }),
            settings: RwLock::new(self.settings),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker_inner = Arc::clone(&inner);
            match thread::Builder::new()
                .name(format!("pageflow-upscale-{id}"))
                .spawn(move || worker_loop(worker_inner))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(worker = id, error = %e, "failed to spawn upscale worker"),
            }
        }
        if workers.is_empty() {
            warn!("no upscale workers running; submitted jobs will stay queued");
        }
        info!(workers = workers.len(), "upscale handler started");

        UpscaleHandler {
            inner,
            workers: Mutex::new(workers),
        }
    }
}

/// Coordinates upscale jobs for loaded pages.
///
/// All methods may be called from any thread. Listener callbacks are never
/// invoked while internal locks are held.
pub struct UpscaleHandler {
    inner: Arc<HandlerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl UpscaleHandler {
    pub fn builder(engine: Arc<dyn UpscaleEngine>) -> UpscaleHandlerBuilder {
        UpscaleHandlerBuilder {
            engine,
            store: None,
            listener: Arc::new(NoopUpscaleListener),
            settings: UpscaleSettings::default(),
            enabled: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Turning upscaling off leaves queued jobs in place; they still run
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Replace rules, backoff, cache age and memory capacity.
    ///
    /// The worker count is fixed when the handler is built.
    pub fn apply_settings(&self, settings: UpscaleSettings) {
        let capacity = settings.memory_results;
        *self
            .inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
        let evicted = self.inner.lock().results.set_capacity(capacity);
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "shrank in-memory upscale results");
        }
    }

    /// Offer a freshly loaded page for upscaling
    pub fn handle_page_upscale(&self, request: PageUpscaleRequest) -> UpscaleDisposition {
        if !self.is_enabled() {
            return UpscaleDisposition::Disabled;
        }
        let settings = self.inner.settings();

        let (model, scale, tile_size, noise_level) =
            match settings.conditions.evaluate(request.dimensions) {
                ConditionVerdict::Skip { condition_id } => {
                    {
                        let mut state = self.inner.lock();
                        state.stats.skipped += 1;
                        state.set_status(request.index, UpscaleStatus::None);
                    }
                    debug!(page = request.index, condition = ?condition_id, "upscale skipped by condition");
                    self.inner.listener.on_status(request.index, UpscaleStatus::None);
                    return UpscaleDisposition::Skipped;
                }
                ConditionVerdict::Upscale {
                    model,
                    scale,
                    tile_size,
                    noise_level,
                    ..
                } => (model, scale, tile_size, noise_level),
            };

        {
            let mut state = self.inner.lock();
            let cached = state.results.get(&request.hash).cloned();
            if let Some(buffer) = cached {
                drop(state);
                self.inner
                    .apply_cached(&request, buffer, ResultSource::Memory, None);
                return UpscaleDisposition::AppliedFromMemory;
            }
            if state.active.contains(&request.hash) {
                state.stats.duplicates += 1;
                if request.current {
                    state.promote(&request.hash);
                }
                let pending = state.follow(&request.hash, request.index);
                drop(state);
                trace!(page = request.index, hash = %request.hash, "upscale already in flight");
                if pending {
                    self.inner
                        .listener
                        .on_status(request.index, UpscaleStatus::Pending);
                }
                return UpscaleDisposition::Duplicate;
            }
        }

        if let Some(store) = self.inner.store.as_ref() {
            let max_age = Duration::from_secs(settings.cache_max_age_secs);
            if let Some(path) = store.lookup(&request.hash, max_age) {
                match store.read(&path) {
                    Ok(bytes) => {
                        self.inner.apply_cached(
                            &request,
                            PageBuffer::from(bytes),
                            ResultSource::Store,
                            Some(path),
                        );
                        return UpscaleDisposition::AppliedFromStore;
                    }
                    Err(e) => {
                        let error = UpscaleError::Store(e.to_string());
                        warn!(path = %path.display(), error = %error, "unreadable upscale result, recomputing");
                    }
                }
            }
        }

        {
            let mut state = self.inner.lock();
            // Another thread may have submitted the same content meanwhile.
            if state.active.contains(&request.hash) {
                state.stats.duplicates += 1;
                let pending = state.follow(&request.hash, request.index);
                drop(state);
                if pending {
                    self.inner
                        .listener
                        .on_status(request.index, UpscaleStatus::Pending);
                }
                return UpscaleDisposition::Duplicate;
            }
            let job = UpscaleJob {
                id: state.next_job_id,
                page: request.index,
                hash: request.hash.clone(),
                input: request.buffer.clone(),
                model,
                scale,
                tile_size,
                noise_level,
                state: JobState::Queued,
                attempts: 0,
                epoch: state.epoch,
            };
            state.next_job_id += 1;
            state.active.insert(request.hash.clone());
            if request.current {
                state.queue.push_front(job);
            } else {
                state.queue.push_back(job);
            }
            state.stats.submitted += 1;
            state.set_status(request.index, UpscaleStatus::Pending);
        }
        self.inner.work_ready.notify_one();
        debug!(page = request.index, hash = %request.hash, current = request.current, "upscale submitted");
        self.inner
            .listener
            .on_status(request.index, UpscaleStatus::Pending);
        UpscaleDisposition::Submitted
    }

    /// Drop waiting work for the page the reader left and ask the engine to
    /// stop any in-flight run for it. A job whose content another page is
    /// still waiting on is passed to that page instead.
    pub fn on_page_changed(&self, previous: PageIndex, current: PageIndex) {
        if previous == current {
            return;
        }

        let (engine_cancels, cancelled, handed, notify) = {
            let mut state = self.inner.lock();
            let epoch = state.epoch;
            let leaving: Vec<(u64, PageIndex, ContentHash)> = state
                .running
                .iter()
                .filter(|(id, job)| {
                    job.epoch == epoch
                        && state.handoffs.get(*id).copied().unwrap_or(job.page) == previous
                })
                .map(|(id, job)| (*id, job.page, job.hash.clone()))
                .collect();

            let mut engine_cancels: Vec<PageIndex> = Vec::new();
            let mut handed = 0;
            for (id, engine_page, hash) in leaving {
                match state.hand_over(&hash, previous) {
                    Some(owner) => {
                        state.handoffs.insert(id, owner);
                        handed += 1;
                    }
                    None => {
                        state.cancel_requested.insert(id);
                        if !engine_cancels.contains(&engine_page) {
                            engine_cancels.push(engine_page);
                        }
                    }
                }
            }

            let mut cancelled = Vec::new();
            let queued: Vec<UpscaleJob> = state.queue.drain(..).collect();
            for mut job in queued {
                if job.page == previous {
                    match state.hand_over(&job.hash, previous) {
                        Some(owner) => {
                            job.page = owner;
                            handed += 1;
                        }
                        None => {
                            cancelled.push(job);
                            continue;
                        }
                    }
                }
                state.queue.push_back(job);
            }

            let delayed = std::mem::take(&mut state.delayed);
            for (due, mut job) in delayed {
                if job.page == previous {
                    match state.hand_over(&job.hash, previous) {
                        Some(owner) => {
                            job.page = owner;
                            handed += 1;
                        }
                        None => {
                            cancelled.push(job);
                            continue;
                        }
                    }
                }
                state.delayed.push((due, job));
            }

            let mut notify = Vec::new();
            for job in &mut cancelled {
                job.transition(JobState::Cancelled);
                state.stats.cancelled += 1;
                notify.extend(state.retire(job, UpscaleStatus::Cancelled));
            }
            if handed > 0 {
                state.set_status(previous, UpscaleStatus::Cancelled);
                if !notify.contains(&previous) {
                    notify.push(previous);
                }
            }
            (engine_cancels, cancelled.len(), handed, notify)
        };

        for page in &engine_cancels {
            self.inner.engine.cancel(*page);
        }
        self.inner.notify(&notify, UpscaleStatus::Cancelled);
        if cancelled > 0 || !engine_cancels.is_empty() || handed > 0 {
            debug!(
                previous,
                current,
                cancelled,
                running = engine_cancels.len(),
                handed,
                "cancelled upscale for previous page"
            );
        }
    }

    /// Forget the current document: waiting jobs are dropped, running ones
    /// are cancelled and their results are cached without notifying.
    pub fn clear(&self) {
        let pages: HashSet<PageIndex> = {
            let mut state = self.inner.lock();
            state.epoch += 1;
            let mut dropped: Vec<UpscaleJob> = state.queue.drain(..).collect();
            dropped.extend(state.delayed.drain(..).map(|(_, job)| job));
            for job in &mut dropped {
                job.transition(JobState::Cancelled);
                state.active.remove(&job.hash);
            }
            state.stats.cancelled += dropped.len() as u64;
            state.statuses.clear();
            state.followers.clear();
            state.handoffs.clear();
            // Running jobs finish in the old epoch; new requests must not
            // wait on them.
            state.active.clear();

            let running: Vec<(u64, PageIndex)> =
                state.running.iter().map(|(id, job)| (*id, job.page)).collect();
            state
                .cancel_requested
                .extend(running.iter().map(|(id, _)| *id));
            running.into_iter().map(|(_, page)| page).collect()
        };

        for page in &pages {
            self.inner.engine.cancel(*page);
        }
        debug!(running = pages.len(), "cleared upscale handler");
    }

    pub fn status(&self, index: PageIndex) -> UpscaleStatus {
        self.inner
            .lock()
            .statuses
            .get(&index)
            .copied()
            .unwrap_or_default()
    }

    /// Cached result for `hash`, if held in memory
    pub fn result(&self, hash: &ContentHash) -> Option<PageBuffer> {
        self.inner.lock().results.get(hash).cloned()
    }

    pub fn stats(&self) -> UpscaleStats {
        let state = self.inner.lock();
        UpscaleStats {
            queued: state.queue.len(),
            delayed: state.delayed.len(),
            running: state.running.len(),
            ..state.stats
        }
    }

    /// Whether no job is queued, delayed or running
    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.queue.is_empty() && state.delayed.is_empty() && state.running.is_empty()
    }

    /// Stop the workers and wait for them. Jobs still queued are dropped;
    /// a job the engine is running finishes first.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work_ready.notify_all();

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("upscale worker panicked during shutdown");
            }
        }
    }
}

impl Drop for UpscaleHandler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work_ready.notify_all();
    }
}

impl fmt::Debug for UpscaleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpscaleHandler")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats())
            .finish()
    }
}

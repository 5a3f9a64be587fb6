//! Page loader: cache, in-flight dedup, preload and thumbnails
//!
//! An [`ImageLoaderCore`] serves one document at a time. It is armed with
//! [`ImageLoaderCore::activate`] and disarmed with
//! [`ImageLoaderCore::invalidate`]; loads that outlive their document fail
//! fast with [`LoadError::Invalidated`] and never write to the cache.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;

use pageflow_cache::{
    BlobCache, BlobHandle, CacheStats, ContentHash, DecodedBitmap, Dimensions, FifoCache,
    PageBuffer, PageIndex,
};
use pageflow_scheduler::{
    calculate_preload_plan, plan_to_queue, CancellationToken, Direction, LoadQueue,
    PreloadOptions, PreloadPlan, PreloadTier, Priority, QueueStats, TaskHandle,
    PRIORITY_IMMEDIATE, PRIORITY_NORMAL_FLOOR,
};
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::decode::{ImageCrateDecoder, ImageDecoder};
use crate::error::LoadError;
use crate::events::{NoopCallbacks, RendererCallbacks};
use crate::source::PageSource;
use crate::upscale::{PageUpscaleRequest, UpscaleHandler};

/// Handle to an eventual page load
pub type LoadHandle = TaskHandle<PageLoad, LoadError>;

/// A page that is resident in the cache
#[derive(Debug, Clone)]
pub struct PageLoad {
    pub index: PageIndex,
    pub handle: BlobHandle,
    pub buffer: PageBuffer,
    pub dimensions: Option<Dimensions>,
    /// Served from the cache without a read
    pub from_cache: bool,
}

/// Outcome of a preload pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadSummary {
    pub plan: PreloadPlan,
    /// Immediate-tier pages that loaded before the call returned
    pub loaded_immediately: usize,
    pub failed_immediately: usize,
    /// Pages left loading in the background
    pub scheduled: usize,
}

/// Collaborators shared by every loader of a session
#[derive(Clone)]
pub struct LoaderOptions {
    pub decoder: Arc<dyn ImageDecoder>,
    pub callbacks: Arc<dyn RendererCallbacks>,
    pub upscale: Option<Arc<UpscaleHandler>>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            decoder: Arc::new(ImageCrateDecoder),
            callbacks: Arc::new(NoopCallbacks),
            upscale: None,
        }
    }
}

impl LoaderOptions {
    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn RendererCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_upscale(mut self, handler: Arc<UpscaleHandler>) -> Self {
        self.upscale = Some(handler);
        self
    }
}

impl fmt::Debug for LoaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("upscale", &self.upscale.is_some())
            .finish()
    }
}

struct Document {
    source: Arc<dyn PageSource>,
    generation: u64,
}

struct LoaderInner {
    cache: BlobCache,
    queue: LoadQueue<PageLoad, LoadError>,
    /// In-flight loads by page. Settled entries are stale and get replaced.
    pending: Mutex<HashMap<PageIndex, LoadHandle>>,
    thumbnails: Mutex<FifoCache<PageIndex, DecodedBitmap>>,
    /// Pages with a dimension read running
    measuring: Mutex<HashSet<PageIndex>>,
    /// Held for reading across every cache write, so invalidation cannot
    /// interleave with one
    document: RwLock<Option<Document>>,
    live: AtomicBool,
    generation: AtomicU64,
    preload: RwLock<PreloadOptions>,
    thumbnail_max_edge: AtomicU32,
    decoder: Arc<dyn ImageDecoder>,
    callbacks: Arc<dyn RendererCallbacks>,
    upscale: Option<Arc<UpscaleHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoaderInner {
    fn is_current(&self, generation: u64) -> bool {
        self.live.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    fn live_document(&self) -> Option<(Arc<dyn PageSource>, u64)> {
        let document = self.document.read().unwrap_or_else(PoisonError::into_inner);
        match document.as_ref() {
            Some(doc) if self.live.load(Ordering::Acquire) => {
                Some((Arc::clone(&doc.source), doc.generation))
            }
            _ => None,
        }
    }

    /// Body of a queued load
    fn execute(
        self: &Arc<Self>,
        index: PageIndex,
        generation: u64,
        source: &dyn PageSource,
        token: &CancellationToken,
    ) -> Result<PageLoad, LoadError> {
        let result = self.read_and_store(index, generation, source, token);
        self.forget_pending(index, token);
        if let Err(error) = &result {
            self.report_error(index, error);
        }
        result
    }

    fn read_and_store(
        &self,
        index: PageIndex,
        generation: u64,
        source: &dyn PageSource,
        token: &CancellationToken,
    ) -> Result<PageLoad, LoadError> {
        if !self.is_current(generation) {
            return Err(LoadError::Invalidated);
        }
        if token.is_cancelled() {
            return Err(LoadError::TaskCancelled { index });
        }

        let buffer = PageBuffer::from(source.read_page(index)?);
        let dimensions = match self.decoder.dimensions(&buffer) {
            Ok(dimensions) => Some(dimensions),
            Err(e) => {
                debug!(page = index, error = %e, "could not read page dimensions");
                None
            }
        };

        let handle = {
            let _document = self.document.read().unwrap_or_else(PoisonError::into_inner);
            if !self.is_current(generation) || token.is_cancelled() {
                trace!(page = index, "discarding load for stale document");
                return Err(LoadError::Invalidated);
            }
            let handle = self.cache.set(index, buffer.clone());
            if let Some(dimensions) = dimensions {
                self.cache.set_dimensions(index, dimensions);
            }
            handle
        };
        trace!(page = index, bytes = buffer.len(), "page cached");

        self.callbacks.on_dimensions_ready(index, dimensions);
        self.submit_upscale(index, &buffer, dimensions, false);

        Ok(PageLoad {
            index,
            handle,
            buffer,
            dimensions,
            from_cache: false,
        })
    }

    /// Drop the pending entry for `index` if it still belongs to this task
    fn forget_pending(&self, index: PageIndex, token: &CancellationToken) {
        let mut pending = lock(&self.pending);
        if pending
            .get(&index)
            .is_some_and(|handle| handle.token().same_as(token))
        {
            pending.remove(&index);
        }
    }

    fn report_error(&self, index: PageIndex, error: &LoadError) {
        if error.is_control_flow() {
            debug!(page = index, error = %error, "page load abandoned");
        } else {
            warn!(page = index, error = %error, "page load failed");
            self.callbacks.on_error(index, error);
        }
    }

    fn submit_upscale(
        &self,
        index: PageIndex,
        buffer: &PageBuffer,
        dimensions: Option<Dimensions>,
        current: bool,
    ) {
        let Some(handler) = self.upscale.as_ref() else {
            return;
        };
        if !handler.is_enabled() {
            return;
        }
        let disposition = handler.handle_page_upscale(PageUpscaleRequest {
            index,
            buffer: buffer.clone(),
            hash: ContentHash::of(buffer),
            dimensions,
            current,
        });
        trace!(page = index, ?disposition, "handed page to upscaler");
    }

    /// Read dimensions of a cached page whose size is still unknown
    fn revalidate_dimensions(
        self: &Arc<Self>,
        index: PageIndex,
        buffer: PageBuffer,
        generation: u64,
    ) {
        if !lock(&self.measuring).insert(index) {
            return;
        }
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("pageflow-measure-{index}"))
            .spawn(move || {
                let dimensions = inner.decoder.dimensions(&buffer).ok();
                lock(&inner.measuring).remove(&index);
                if !inner.is_current(generation) {
                    return;
                }
                if let Some(dimensions) = dimensions {
                    if !inner.cache.set_dimensions(index, dimensions) {
                        return;
                    }
                }
                inner.callbacks.on_dimensions_ready(index, dimensions);
            });
        if let Err(e) = spawned {
            lock(&self.measuring).remove(&index);
            warn!(page = index, error = %e, "failed to spawn dimension reader");
        }
    }

    /// The current page is resident: notify, pre-decode, prioritise upscale
    fn on_current_ready(self: &Arc<Self>, load: &PageLoad, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let index = load.index;
        self.callbacks.on_image_ready(index, &load.handle);
        self.submit_upscale(index, &load.buffer, load.dimensions, true);

        if self.cache.get_bitmap(index).is_some() {
            self.callbacks.on_bitmap_ready(index);
            return;
        }

        let inner = Arc::clone(self);
        let buffer = load.buffer.clone();
        let spawned = thread::Builder::new()
            .name(format!("pageflow-decode-{index}"))
            .spawn(move || match inner.decoder.decode(&buffer) {
                Ok(bitmap) => {
                    if !inner.is_current(generation) {
                        bitmap.close();
                        return;
                    }
                    if inner.cache.set_bitmap(index, bitmap) {
                        trace!(page = index, "bitmap pre-decoded");
                        inner.callbacks.on_bitmap_ready(index);
                    }
                }
                Err(e) => {
                    if inner.is_current(generation) {
                        inner.report_error(index, &e.into_load_error(index));
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(page = index, error = %e, "failed to spawn bitmap decode");
        }
    }

    fn close_thumbnails(&self) {
        for (_, thumbnail) in lock(&self.thumbnails).drain() {
            thumbnail.close();
        }
    }
}

/// Loads pages of one document through a bounded priority queue into a
/// byte-budgeted cache.
///
/// Cloning yields another handle to the same loader.
#[derive(Clone)]
pub struct ImageLoaderCore {
    inner: Arc<LoaderInner>,
}

impl ImageLoaderCore {
    /// Create an idle loader. Call [`activate`](Self::activate) before loading.
    pub fn new(config: &PipelineConfig, options: LoaderOptions) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                cache: BlobCache::new(config.cache_budget_bytes),
                queue: LoadQueue::new(config.concurrency),
                pending: Mutex::new(HashMap::new()),
                thumbnails: Mutex::new(FifoCache::new(config.thumbnail_capacity)),
                measuring: Mutex::new(HashSet::new()),
                document: RwLock::new(None),
                live: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                preload: RwLock::new(preload_options(config)),
                thumbnail_max_edge: AtomicU32::new(config.thumbnail_max_edge),
                decoder: options.decoder,
                callbacks: options.callbacks,
                upscale: options.upscale,
            }),
        }
    }

    /// Arm the loader for `source`. Loads from earlier generations are
    /// discarded when they finish.
    pub fn activate(&self, source: Arc<dyn PageSource>, generation: u64) {
        let pages = source.page_count();
        let mut document = self
            .inner
            .document
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.generation.store(generation, Ordering::Release);
        *document = Some(Document { source, generation });
        self.inner.live.store(true, Ordering::Release);
        info!(generation, pages, "loader activated");
    }

    /// Disarm the loader. Pending loads settle with
    /// [`LoadError::Invalidated`]; running reads finish but are discarded.
    pub fn invalidate(&self) {
        {
            let mut document = self
                .inner
                .document
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.live.store(false, Ordering::Release);
            *document = None;
        }

        let pending: Vec<LoadHandle> = lock(&self.inner.pending)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &pending {
            handle.token().cancel();
            handle.settle(Err(LoadError::Invalidated));
        }
        let cleared = self.inner.queue.clear();
        debug!(
            generation = self.generation(),
            pending = pending.len(),
            cleared,
            "loader invalidated"
        );
    }

    /// Invalidate and release every cached page and thumbnail
    pub fn reset(&self) {
        self.invalidate();
        self.inner.cache.clear();
        self.inner.close_thumbnails();
        lock(&self.inner.measuring).clear();
        debug!(generation = self.generation(), "loader reset");
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Pages in the active document, 0 when idle
    pub fn page_count(&self) -> usize {
        self.inner
            .live_document()
            .map_or(0, |(source, _)| source.page_count())
    }

    /// Load `index`, joining an in-flight load if there is one.
    ///
    /// Cache hits return an already settled handle. Joining raises the
    /// queued load to at least `priority`.
    pub fn load_page(&self, index: PageIndex, priority: Priority) -> LoadHandle {
        let Some((source, generation)) = self.inner.live_document() else {
            return LoadHandle::ready(index, Err(LoadError::Invalidated));
        };
        if index >= source.page_count() {
            let error = LoadError::PageNotFound { index };
            self.inner.report_error(index, &error);
            return LoadHandle::ready(index, Err(error));
        }

        if let Some(hit) = self.cached_load(index, generation) {
            return hit;
        }

        let mut pending = lock(&self.inner.pending);
        // A load may have cached the page and dropped its pending entry
        // since the check above.
        if let Some(hit) = self.cached_load(index, generation) {
            return hit;
        }
        if let Some(existing) = pending.get(&index) {
            if !existing.is_settled() {
                if self.inner.queue.boost_priority(index, priority) {
                    trace!(page = index, priority, "boosted in-flight load");
                }
                return existing.clone();
            }
        }

        let inner = Arc::clone(&self.inner);
        let handle = self.inner.queue.enqueue(index, priority, move |token| {
            inner.execute(index, generation, source.as_ref(), token)
        });
        pending.insert(index, handle.clone());
        handle
    }

    fn cached_load(&self, index: PageIndex, generation: u64) -> Option<LoadHandle> {
        let entry = self.inner.cache.get(index)?;
        if entry.dimensions.is_none() {
            self.inner
                .revalidate_dimensions(index, entry.buffer.clone(), generation);
        }
        Some(LoadHandle::ready(
            index,
            Ok(PageLoad {
                index,
                handle: entry.handle,
                buffer: entry.buffer,
                dimensions: entry.dimensions,
                from_cache: true,
            }),
        ))
    }

    /// Load the page the reader is looking at, at the top priority.
    ///
    /// Once resident the renderer is notified, a bitmap is decoded in the
    /// background and the page's upscale job moves to the front.
    pub fn load_current_page(&self, index: PageIndex) -> LoadHandle {
        let handle = self.load_page(index, PRIORITY_IMMEDIATE);
        let inner = Arc::clone(&self.inner);
        let generation = self.generation();
        handle.on_settle(move |result| {
            if let Ok(load) = result {
                inner.on_current_ready(load, generation);
            }
        });
        handle
    }

    /// Small preview of a page. Blocks while the page is read if it is not
    /// resident.
    pub fn get_thumbnail(&self, index: PageIndex) -> Result<DecodedBitmap, LoadError> {
        if !self.is_live() {
            return Err(LoadError::Invalidated);
        }
        if let Some(thumbnail) = lock(&self.inner.thumbnails).get(&index) {
            return Ok(thumbnail.clone());
        }

        let buffer = match self.inner.cache.get(index) {
            Some(entry) => entry.buffer,
            None => self.load_page(index, PRIORITY_NORMAL_FLOOR).wait()?.buffer,
        };
        let max_edge = self.inner.thumbnail_max_edge.load(Ordering::Relaxed);
        let thumbnail = self
            .inner
            .decoder
            .thumbnail(&buffer, max_edge)
            .map_err(|e| e.into_load_error(index))?;

        let evicted = lock(&self.inner.thumbnails).insert(index, thumbnail.clone());
        for (_, old) in evicted {
            old.close();
        }
        Ok(thumbnail)
    }

    /// Preload `radius` pages on each side of `center`
    pub fn preload_range(&self, center: PageIndex, radius: usize) -> PreloadSummary {
        let double_page = self.preload_options().double_page;
        let options = PreloadOptions {
            preload_size: radius.saturating_mul(2),
            forward_ratio: 0.5,
            double_page,
            direction: Direction::Forward,
        };
        self.run_plan(calculate_preload_plan(center, self.page_count(), &options))
    }

    /// Preload around `current` using the configured budget, skewed towards
    /// `direction`
    pub fn smart_preload(&self, current: PageIndex, direction: Direction) -> PreloadSummary {
        let options = PreloadOptions {
            direction,
            ..self.preload_options()
        };
        self.run_plan(calculate_preload_plan(current, self.page_count(), &options))
    }

    /// Submit every planned page, then wait for the immediate tier only
    fn run_plan(&self, plan: PreloadPlan) -> PreloadSummary {
        let tasks = plan_to_queue(&plan);
        let mut immediate = Vec::new();
        for task in &tasks {
            let handle = self.load_page(task.index, task.priority);
            if task.tier == PreloadTier::Immediate {
                immediate.push(handle);
            }
        }

        let scheduled = tasks.len() - immediate.len();
        let mut loaded_immediately = 0;
        let mut failed_immediately = 0;
        for handle in immediate {
            match handle.wait() {
                Ok(_) => loaded_immediately += 1,
                Err(_) => failed_immediately += 1,
            }
        }
        debug!(
            pages = tasks.len(),
            direction = plan.direction.as_str(),
            "preload submitted"
        );

        PreloadSummary {
            plan,
            loaded_immediately,
            failed_immediately,
            scheduled,
        }
    }

    /// Cancel a queued load. Returns false if it already started.
    pub fn cancel_page(&self, index: PageIndex) -> bool {
        self.inner.queue.cancel(index)
    }

    /// Hot-swap concurrency, budget, preload and thumbnail settings
    pub fn apply_config(&self, config: &PipelineConfig) {
        self.inner.queue.set_concurrency(config.concurrency);
        self.inner.cache.set_budget(config.cache_budget_bytes);
        *self
            .inner
            .preload
            .write()
            .unwrap_or_else(PoisonError::into_inner) = preload_options(config);
        self.inner
            .thumbnail_max_edge
            .store(config.thumbnail_max_edge, Ordering::Relaxed);
        let evicted = lock(&self.inner.thumbnails).set_capacity(config.thumbnail_capacity);
        for (_, thumbnail) in evicted {
            thumbnail.close();
        }
    }

    pub fn cache(&self) -> &BlobCache {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn thumbnail_count(&self) -> usize {
        lock(&self.inner.thumbnails).len()
    }

    fn preload_options(&self) -> PreloadOptions {
        *self
            .inner
            .preload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ImageLoaderCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageLoaderCore")
            .field("live", &self.is_live())
            .field("generation", &self.generation())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

fn preload_options(config: &PipelineConfig) -> PreloadOptions {
    PreloadOptions {
        preload_size: config.preload_size,
        forward_ratio: config.forward_ratio,
        double_page: config.double_page,
        direction: Direction::Forward,
    }
}

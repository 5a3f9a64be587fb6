//! Page blob cache with byte-budget LRU eviction
//!
//! Holds the raw bytes of loaded pages together with a releasable handle,
//! lazily derived dimensions and an optional pre-decoded bitmap. Recency is
//! tracked with a logical clock so that ordering never depends on wall time.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

/// Zero-based page index within a document.
pub type PageIndex = usize;

/// Default byte budget (512MB)
pub const DEFAULT_BUDGET_BYTES: usize = 512 * 1024 * 1024;

/// Eviction stops once usage drops to this fraction of the budget.
const EVICTION_TARGET_NUMERATOR: usize = 4;
const EVICTION_TARGET_DENOMINATOR: usize = 5;

/// Up to this many resident entries, victims are chosen from one sort.
const FULL_SORT_THRESHOLD: usize = 20;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable page bytes, cheap to clone and share across threads.
#[derive(Clone, PartialEq, Eq)]
pub struct PageBuffer(Arc<[u8]>);

impl PageBuffer {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for PageBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for PageBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl Deref for PageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PageBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuffer").field("len", &self.len()).finish()
    }
}

/// Pixel dimensions of a page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Area in megapixels.
    pub fn megapixels(&self) -> f64 {
        (self.width as f64 * self.height as f64) / 1_000_000.0
    }
}

/// Displayable reference to a cached page.
///
/// The handle is released when its entry leaves the cache (eviction,
/// deletion, replacement or clear). Holders must stop using a released
/// handle; the renderer typically reacts by requesting the page again.
#[derive(Clone)]
pub struct BlobHandle {
    id: u64,
    page: PageIndex,
    released: Arc<AtomicBool>,
}

impl BlobHandle {
    fn new(page: PageIndex) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            page,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Process-unique identifier of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn page(&self) -> PageIndex {
        self.page
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

impl PartialEq for BlobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BlobHandle {}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("id", &self.id)
            .field("page", &self.page)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A decoded RGBA bitmap that must be closed when discarded.
#[derive(Clone)]
pub struct DecodedBitmap {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
    closed: Arc<AtomicBool>,
}

impl DecodedBitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// RGBA pixel data, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn same_bitmap(&self, other: &DecodedBitmap) -> bool {
        Arc::ptr_eq(&self.closed, &other.closed)
    }
}

impl fmt::Debug for DecodedBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Snapshot of a resident cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub index: PageIndex,
    pub buffer: PageBuffer,
    pub handle: BlobHandle,
    /// Logical clock value of the last access
    pub last_accessed: u64,
    pub size_bytes: usize,
    pub dimensions: Option<Dimensions>,
    pub bitmap: Option<DecodedBitmap>,
}

impl CacheEntry {
    fn release(&self) {
        self.handle.release();
        if let Some(bitmap) = &self.bitmap {
            bitmap.close();
        }
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Number of resident pages
    pub entry_count: usize,

    /// Bytes held by resident page buffers
    pub current_size: usize,

    /// Byte budget
    pub budget: usize,

    pub hits: u64,
    pub misses: u64,

    /// Entries removed to get back under budget
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate budget utilization (0.0 to 1.0 while within budget)
    pub fn utilization(&self) -> f64 {
        if self.budget == 0 {
            0.0
        } else {
            self.current_size as f64 / self.budget as f64
        }
    }
}

struct CacheState {
    entries: HashMap<PageIndex, CacheEntry>,
    current_size: usize,
    budget: usize,
    clock: u64,
    stats: CacheStats,
}

impl CacheState {
    fn new(budget: usize) -> Self {
        Self {
            entries: HashMap::new(),
            current_size: 0,
            budget,
            clock: 0,
            stats: CacheStats {
                budget,
                ..Default::default()
            },
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.current_size = self.current_size;
        self.stats.budget = self.budget;
    }

    fn remove_entry(&mut self, index: PageIndex) -> Option<CacheEntry> {
        let entry = self.entries.remove(&index)?;
        self.current_size = self.current_size.saturating_sub(entry.size_bytes);
        entry.release();
        self.sync_stats();
        Some(entry)
    }

    fn eviction_target(&self) -> usize {
        self.budget / EVICTION_TARGET_DENOMINATOR * EVICTION_TARGET_NUMERATOR
            + self.budget % EVICTION_TARGET_DENOMINATOR * EVICTION_TARGET_NUMERATOR
                / EVICTION_TARGET_DENOMINATOR
    }

    /// Evict least recently used entries once usage exceeds the budget.
    ///
    /// Runs until usage falls to the eviction target. The last resident
    /// entry is never evicted, so a single oversized page stays loaded.
    fn enforce_budget(&mut self) -> usize {
        if self.current_size <= self.budget {
            return 0;
        }

        let target = self.eviction_target();
        let mut evicted = 0;

        if self.entries.len() <= FULL_SORT_THRESHOLD {
            let mut order: Vec<(u64, PageIndex)> = self
                .entries
                .values()
                .map(|entry| (entry.last_accessed, entry.index))
                .collect();
            order.sort_unstable();

            for (_, index) in order {
                if self.current_size <= target || self.entries.len() <= 1 {
                    break;
                }
                if self.evict(index) {
                    evicted += 1;
                }
            }
        } else {
            while self.current_size > target && self.entries.len() > 1 {
                let oldest = self
                    .entries
                    .values()
                    .min_by_key(|entry| entry.last_accessed)
                    .map(|entry| entry.index);
                match oldest {
                    Some(index) if self.evict(index) => evicted += 1,
                    _ => break,
                }
            }
        }

        if evicted > 0 {
            debug!(
                evicted,
                current_size = self.current_size,
                budget = self.budget,
                "evicted pages over budget"
            );
        }
        evicted
    }

    fn evict(&mut self, index: PageIndex) -> bool {
        if self.remove_entry(index).is_some() {
            self.stats.evictions += 1;
            trace!(page = index, "evicted page");
            true
        } else {
            false
        }
    }
}

/// Byte-bounded page cache.
///
/// Thread-safe; share it behind an `Arc`. Every method takes the internal
/// lock for a short, non-blocking critical section.
pub struct BlobCache {
    state: Mutex<CacheState>,
}

impl BlobCache {
    /// Create a cache with the given byte budget
    pub fn new(budget: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::new(budget)),
        }
    }

    /// Create a cache with the budget given in megabytes
    pub fn with_mb_budget(megabytes: usize) -> Self {
        Self::new(megabytes.saturating_mul(1024 * 1024))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the bytes for a page and return a fresh handle.
    ///
    /// A replaced entry has its handle released and its bitmap closed.
    /// Over-budget eviction runs after the insert.
    pub fn set(&self, index: PageIndex, buffer: PageBuffer) -> BlobHandle {
        let mut state = self.lock();
        state.remove_entry(index);

        let handle = BlobHandle::new(index);
        let last_accessed = state.tick();
        let size_bytes = buffer.len();
        state.entries.insert(
            index,
            CacheEntry {
                index,
                buffer,
                handle: handle.clone(),
                last_accessed,
                size_bytes,
                dimensions: None,
                bitmap: None,
            },
        );
        state.current_size += size_bytes;
        state.enforce_budget();
        state.sync_stats();
        handle
    }

    /// Look up a page, marking it most recently used.
    pub fn get(&self, index: PageIndex) -> Option<CacheEntry> {
        let mut state = self.lock();
        let now = state.tick();
        match state.entries.get_mut(&index) {
            Some(entry) => {
                entry.last_accessed = now;
                let entry = entry.clone();
                state.stats.hits += 1;
                Some(entry)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Check residency without affecting recency.
    pub fn has(&self, index: PageIndex) -> bool {
        self.lock().entries.contains_key(&index)
    }

    /// Mark a page most recently used. Returns false if it is not resident.
    pub fn touch(&self, index: PageIndex) -> bool {
        let mut state = self.lock();
        let now = state.tick();
        match state.entries.get_mut(&index) {
            Some(entry) => {
                entry.last_accessed = now;
                true
            }
            None => false,
        }
    }

    pub fn get_dimensions(&self, index: PageIndex) -> Option<Dimensions> {
        self.lock()
            .entries
            .get(&index)
            .and_then(|entry| entry.dimensions)
    }

    /// Record dimensions for a resident page. Returns false if not resident.
    pub fn set_dimensions(&self, index: PageIndex, dimensions: Dimensions) -> bool {
        match self.lock().entries.get_mut(&index) {
            Some(entry) => {
                entry.dimensions = Some(dimensions);
                true
            }
            None => false,
        }
    }

    pub fn get_bitmap(&self, index: PageIndex) -> Option<DecodedBitmap> {
        self.lock()
            .entries
            .get(&index)
            .and_then(|entry| entry.bitmap.clone())
    }

    /// Attach a decoded bitmap to a resident page.
    ///
    /// Any previous bitmap is closed. If the page is not resident the given
    /// bitmap is closed and false is returned.
    pub fn set_bitmap(&self, index: PageIndex, bitmap: DecodedBitmap) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(&index) {
            Some(entry) => {
                if let Some(previous) = entry.bitmap.replace(bitmap.clone()) {
                    if !previous.same_bitmap(&bitmap) {
                        previous.close();
                    }
                }
                true
            }
            None => {
                bitmap.close();
                false
            }
        }
    }

    /// Remove a page, releasing its handle and bitmap.
    pub fn delete(&self, index: PageIndex) -> bool {
        self.lock().remove_entry(index).is_some()
    }

    /// Remove every page, releasing all handles and bitmaps.
    pub fn clear(&self) {
        let mut state = self.lock();
        for (_, entry) in state.entries.drain() {
            entry.release();
        }
        state.current_size = 0;
        state.sync_stats();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Bytes held by resident page buffers
    pub fn current_size(&self) -> usize {
        self.lock().current_size
    }

    pub fn budget(&self) -> usize {
        self.lock().budget
    }

    /// Change the byte budget, evicting immediately if now over it.
    pub fn set_budget(&self, budget: usize) {
        let mut state = self.lock();
        state.budget = budget;
        state.enforce_budget();
        state.sync_stats();
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Resident page indices in ascending order
    pub fn resident_pages(&self) -> Vec<PageIndex> {
        let mut pages: Vec<PageIndex> = self.lock().entries.keys().copied().collect();
        pages.sort_unstable();
        pages
    }
}

impl Default for BlobCache {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_BYTES)
    }
}

impl fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;

    fn buffer(size: usize) -> PageBuffer {
        PageBuffer::from(vec![0u8; size])
    }

    #[test]
    fn test_set_and_get() {
        let cache = BlobCache::new(1024);
        let handle = cache.set(3, PageBuffer::from(vec![1, 2, 3]));

        let entry = cache.get(3).unwrap();
        assert_eq!(entry.index, 3);
        assert_eq!(entry.buffer.as_slice(), &[1, 2, 3]);
        assert_eq!(entry.handle, handle);
        assert_eq!(entry.size_bytes, 3);
        assert!(entry.dimensions.is_none());
        assert_eq!(cache.current_size(), 3);
    }

    #[test]
    fn test_miss_is_counted() {
        let cache = BlobCache::new(1024);
        assert!(cache.get(7).is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_over_budget_insert_evicts_oldest() {
        let cache = BlobCache::new(100);
        let first = cache.set(0, buffer(60));
        cache.set(1, buffer(60));

        assert!(!cache.has(0));
        assert!(cache.has(1));
        assert_eq!(cache.current_size(), 60);
        assert!(first.is_released());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_runs_down_to_eighty_percent() {
        let cache = BlobCache::new(100);
        for index in 0..5 {
            cache.set(index, buffer(20));
        }
        assert_eq!(cache.current_size(), 100);

        // 120 > 100, so eviction continues until usage is at most 80.
        cache.set(5, buffer(20));
        assert_eq!(cache.current_size(), 80);
        assert_eq!(cache.resident_pages(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = BlobCache::new(100);
        cache.set(0, buffer(40));
        cache.set(1, buffer(40));
        cache.get(0);

        cache.set(2, buffer(40));
        assert!(cache.has(0));
        assert!(!cache.has(1));
        assert!(cache.has(2));
    }

    #[test]
    fn test_has_does_not_refresh_recency() {
        let cache = BlobCache::new(100);
        cache.set(0, buffer(40));
        cache.set(1, buffer(40));
        assert!(cache.has(0));

        cache.set(2, buffer(40));
        assert!(!cache.has(0));
        assert!(cache.has(1));
    }

    #[test]
    fn test_touch_refreshes_recency() {
        let cache = BlobCache::new(100);
        cache.set(0, buffer(40));
        cache.set(1, buffer(40));
        assert!(cache.touch(0));
        assert!(!cache.touch(9));

        cache.set(2, buffer(40));
        assert!(cache.has(0));
        assert!(!cache.has(1));
    }

    #[test]
    fn test_single_oversized_entry_is_kept() {
        let cache = BlobCache::new(100);
        cache.set(0, buffer(30));
        let handle = cache.set(1, buffer(500));

        assert_eq!(cache.resident_pages(), vec![1]);
        assert_eq!(cache.current_size(), 500);
        assert!(!handle.is_released());
    }

    #[test]
    fn test_replacing_entry_releases_previous_handle() {
        let cache = BlobCache::new(1024);
        let old = cache.set(4, buffer(10));
        cache.set_dimensions(4, Dimensions::new(10, 20));
        let new = cache.set(4, buffer(30));

        assert!(old.is_released());
        assert!(!new.is_released());
        assert_ne!(old, new);
        assert_eq!(cache.current_size(), 30);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_dimensions(4).is_none());
    }

    #[test]
    fn test_delete_releases_handle_and_bitmap() {
        let cache = BlobCache::new(1024);
        let handle = cache.set(2, buffer(10));
        let bitmap = DecodedBitmap::new(1, 1, vec![0, 0, 0, 255]);
        assert!(cache.set_bitmap(2, bitmap.clone()));

        assert!(cache.delete(2));
        assert!(handle.is_released());
        assert!(bitmap.is_closed());
        assert!(!cache.delete(2));
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_set_bitmap_closes_previous() {
        let cache = BlobCache::new(1024);
        cache.set(0, buffer(10));
        let first = DecodedBitmap::new(1, 1, vec![0; 4]);
        let second = DecodedBitmap::new(1, 1, vec![1; 4]);

        cache.set_bitmap(0, first.clone());
        cache.set_bitmap(0, second.clone());
        assert!(first.is_closed());
        assert!(!second.is_closed());

        // Re-attaching the same bitmap must not close it.
        cache.set_bitmap(0, second.clone());
        assert!(!second.is_closed());
        assert_eq!(cache.get_bitmap(0).unwrap().pixels(), &[1, 1, 1, 1]);
    }

    #[test]
    fn test_set_bitmap_on_missing_page_closes_bitmap() {
        let cache = BlobCache::new(1024);
        let bitmap = DecodedBitmap::new(2, 2, vec![0; 16]);
        assert!(!cache.set_bitmap(5, bitmap.clone()));
        assert!(bitmap.is_closed());
    }

    #[test]
    fn test_dimensions_only_for_resident_pages() {
        let cache = BlobCache::new(1024);
        assert!(!cache.set_dimensions(0, Dimensions::new(1, 1)));
        cache.set(0, buffer(1));
        assert!(cache.set_dimensions(0, Dimensions::new(800, 1200)));
        assert_eq!(cache.get_dimensions(0), Some(Dimensions::new(800, 1200)));
    }

    #[test]
    fn test_clear_releases_everything() {
        let cache = BlobCache::new(1024);
        let handles: Vec<_> = (0..4).map(|i| cache.set(i, buffer(8))).collect();
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert!(handles.iter().all(BlobHandle::is_released));
    }

    #[test]
    fn test_set_budget_shrink_evicts() {
        let cache = BlobCache::new(1000);
        for index in 0..10 {
            cache.set(index, buffer(100));
        }
        assert_eq!(cache.len(), 10);

        cache.set_budget(500);
        assert!(cache.current_size() <= 400);
        assert_eq!(cache.budget(), 500);
        // Most recent pages survive.
        assert!(cache.has(9));
        assert!(!cache.has(0));
    }

    #[test]
    fn test_large_population_evicts_in_recency_order() {
        let cache = BlobCache::new(50 * 10);
        for index in 0..50 {
            cache.set(index, buffer(10));
        }
        // Refresh the oldest ten so they outlive pages 10..20.
        for index in 0..10 {
            cache.get(index);
        }

        cache.set(50, buffer(10));
        let resident = cache.resident_pages();
        assert!(cache.current_size() <= 400);
        for index in 0..10 {
            assert!(resident.contains(&index), "page {index} should survive");
        }
        for index in 10..20 {
            assert!(!resident.contains(&index), "page {index} should be evicted");
        }
    }

    #[test]
    fn test_budget_invariant_under_random_workload() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let cache = BlobCache::new(10_000);
        let mut expected: HashMap<PageIndex, usize> = HashMap::new();

        for _ in 0..2_000 {
            let index = rng.gen_range(0..40);
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let len = rng.gen_range(1..3_000);
                    cache.set(index, buffer(len));
                    expected.insert(index, len);
                }
                2 => {
                    cache.get(index);
                }
                _ => {
                    cache.delete(index);
                    expected.remove(&index);
                }
            }
            let resident = cache.resident_pages();
            expected.retain(|page, _| resident.contains(page));

            let size = cache.current_size();
            assert_eq!(size, expected.values().sum::<usize>());
            assert_eq!(cache.len(), expected.len());
            assert!(
                size <= cache.budget() || cache.len() == 1,
                "size {size} over budget with {} entries",
                cache.len()
            );
        }
    }

    #[test]
    fn test_stats_track_hits_and_size() {
        let cache = BlobCache::new(1024);
        cache.set(0, buffer(100));
        cache.set(1, buffer(200));
        cache.get(0);
        cache.get(1);
        cache.get(2);

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.current_size, 300);
        assert_eq!(stats.budget, 1024);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(BlobCache::new(64 * 1024));
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for round in 0..200 {
                        let index = (worker * 31 + round) % 64;
                        cache.set(index, buffer(512));
                        cache.get((index + 1) % 64);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert!(cache.current_size() <= 64 * 1024);
    }

    #[test]
    fn test_default_budget() {
        let cache = BlobCache::default();
        assert_eq!(cache.budget(), DEFAULT_BUDGET_BYTES);
        assert_eq!(BlobCache::with_mb_budget(2).budget(), 2 * 1024 * 1024);
    }
}

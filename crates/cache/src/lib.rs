//! Pageflow Cache Library
//!
//! Byte-bounded page blob cache with LRU eviction, count-bounded FIFO caches
//! for thumbnails and upscale results, and a write-once disk store for
//! upscaled pages.

pub mod blob;
pub mod disk;
pub mod fifo;
pub mod hash;

pub use blob::{
    BlobCache, BlobHandle, CacheEntry, CacheStats, DecodedBitmap, Dimensions, PageBuffer,
    PageIndex, DEFAULT_BUDGET_BYTES,
};
pub use disk::{DiskResultStore, DiskStoreStats, ResultStore};
pub use fifo::FifoCache;
pub use hash::ContentHash;

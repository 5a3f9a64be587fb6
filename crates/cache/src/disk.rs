//! Persistent store for upscaled page results.
//!
//! Results are content-addressed: each file is named after the hash of the
//! source page and written exactly once. A second write for the same hash
//! returns the existing file, so readers never observe a partially rewritten
//! entry. Freshness is judged from the file modification time.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::hash::ContentHash;

/// File extension for stored results
const RESULT_EXTENSION: &str = "upscaled";

/// Extension for in-progress writes
const TEMP_EXTENSION: &str = "partial";

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(0);

/// External store of upscale results keyed by content hash.
pub trait ResultStore: Send + Sync {
    /// Path of a stored result that is younger than `max_age`.
    fn lookup(&self, hash: &ContentHash, max_age: Duration) -> Option<PathBuf>;

    /// Read a stored result.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Persist a result, returning its path. A fresh entry is kept as is;
    /// one older than `max_age` is replaced.
    fn write(&self, hash: &ContentHash, bytes: &[u8], max_age: Duration) -> io::Result<PathBuf>;
}

/// Statistics for monitoring the result store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStoreStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries written by this process
    pub writes: u64,
    /// Entries removed by expiry cleanup
    pub expired: u64,
}

impl DiskStoreStats {
    /// Calculate the lookup hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Directory-backed [`ResultStore`].
///
/// Thread-safe; concurrent writers of the same hash race only on an atomic
/// rename of identical content.
#[derive(Debug)]
pub struct DiskResultStore {
    dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    expired: AtomicU64,
}

impl DiskResultStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a result for `hash` is stored under
    pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(format!("{hash}.{RESULT_EXTENSION}"))
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.path_for(hash).is_file()
    }

    pub fn stats(&self) -> DiskStoreStats {
        DiskStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    /// Number of stored results
    pub fn entry_count(&self) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if has_extension(&path, RESULT_EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Delete results (and abandoned partial writes) older than `max_age`.
    ///
    /// Returns the number of results removed.
    pub fn cleanup_expired(&self, max_age: Duration) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_result = has_extension(&path, RESULT_EXTENSION);
            if !is_result && !has_extension(&path, TEMP_EXTENSION) {
                continue;
            }
            if !is_expired(&path, max_age) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    if is_result {
                        removed += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove expired result");
                }
            }
        }

        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, dir = %self.dir.display(), "cleaned up expired upscale results");
        Ok(removed)
    }

    fn temp_path(&self, hash: &ContentHash) -> PathBuf {
        let id = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{hash}.{}-{id}.{TEMP_EXTENSION}",
            std::process::id()
        ))
    }
}

impl ResultStore for DiskResultStore {
    fn lookup(&self, hash: &ContentHash, max_age: Duration) -> Option<PathBuf> {
        let path = self.path_for(hash);
        let fresh = path.is_file() && !is_expired(&path, max_age);
        if fresh {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(path)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, hash: &ContentHash, bytes: &[u8], max_age: Duration) -> io::Result<PathBuf> {
        let path = self.path_for(hash);
        let existing = path.is_file();
        if existing && !is_expired(&path, max_age) {
            return Ok(path);
        }

        let temp = self.temp_path(hash);
        let written = fs::File::create(&temp).and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&temp, &path)) {
            fs::remove_file(&temp).ok();
            return Err(e);
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(%hash, bytes = bytes.len(), replaced = existing, "stored upscale result");
        Ok(path)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(extension)
}

/// Files with an unreadable or future modification time count as fresh.
fn is_expired(path: &Path, max_age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > max_age)
}

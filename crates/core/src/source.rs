//! Page sources: where page bytes come from

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use pageflow_cache::PageIndex;
use tracing::debug;

use crate::error::SourceError;

/// File extensions treated as pages
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "avif"];

/// A document as an ordered sequence of page images.
///
/// Reads may block and are always issued from loader worker threads.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Raw bytes of a page. Fails with [`SourceError::PageNotFound`] if the
    /// index is out of range or the document has been closed.
    fn read_page(&self, index: PageIndex) -> Result<Vec<u8>, SourceError>;
}

/// Pages read from the image files of one directory, in natural name order
/// (`page2` before `page10`).
#[derive(Debug)]
pub struct FolderPageSource {
    root: PathBuf,
    pages: Vec<PathBuf>,
    closed: AtomicBool,
}

impl FolderPageSource {
    /// Scan `dir` for image files. Subdirectories are not descended into.
    pub fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let root = dir.as_ref().to_path_buf();
        let mut pages = Vec::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                pages.push(path);
            }
        }
        pages.sort_by(|a, b| {
            let a = file_name(a);
            let b = file_name(b);
            natural_cmp(&a, &b).then_with(|| a.cmp(&b))
        });

        debug!(dir = %root.display(), pages = pages.len(), "opened folder source");
        Ok(Self {
            root,
            pages,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_path(&self, index: PageIndex) -> Option<&Path> {
        self.pages.get(index).map(PathBuf::as_path)
    }

    /// Close the document; later reads fail with `PageNotFound`
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }
}

impl PageSource for FolderPageSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn read_page(&self, index: PageIndex) -> Result<Vec<u8>, SourceError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(SourceError::PageNotFound { index });
        }
        let path = self
            .pages
            .get(index)
            .ok_or(SourceError::PageNotFound { index })?;
        fs::read(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => SourceError::PageNotFound { index },
            _ => SourceError::Io { index, source },
        })
    }
}

/// Pages held in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryPageSource {
    pages: Vec<Vec<u8>>,
    closed: AtomicBool,
}

impl MemoryPageSource {
    pub fn new(pages: Vec<Vec<u8>>) -> Self {
        Self {
            pages,
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }
}

impl PageSource for MemoryPageSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn read_page(&self, index: PageIndex) -> Result<Vec<u8>, SourceError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(SourceError::PageNotFound { index });
        }
        self.pages
            .get(index)
            .cloned()
            .ok_or(SourceError::PageNotFound { index })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Case-insensitive comparison treating digit runs as numbers
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();
    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let ordering = cmp_digits(&take_digits(&mut a_chars), &take_digits(&mut b_chars));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_lowercase().cmp(y.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                a_chars.next();
                b_chars.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order() {
        let mut names = vec!["page10.png", "Page2.png", "page1.png", "cover.jpg", "page02b.png"];
        names.sort_by(|a, b| natural_cmp(a, b).then_with(|| a.cmp(b)));
        assert_eq!(
            names,
            vec!["cover.jpg", "page1.png", "Page2.png", "page02b.png", "page10.png"]
        );
    }

    #[test]
    fn test_folder_source_lists_images_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("10.png"), b"ten").unwrap();
        fs::write(dir.path().join("2.JPG"), b"two").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip").unwrap();
        fs::create_dir(dir.path().join("extras.png")).unwrap();

        let source = FolderPageSource::open(dir.path()).unwrap();
        assert_eq!(source.page_count(), 2);
        assert_eq!(source.read_page(0).unwrap(), b"two");
        assert_eq!(source.read_page(1).unwrap(), b"ten");
        assert!(source.page_path(1).unwrap().ends_with("10.png"));
    }

    #[test]
    fn test_folder_source_out_of_range_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.png"), b"one").unwrap();
        let source = FolderPageSource::open(dir.path()).unwrap();

        assert!(matches!(
            source.read_page(5),
            Err(SourceError::PageNotFound { index: 5 })
        ));
        source.close();
        assert!(matches!(
            source.read_page(0),
            Err(SourceError::PageNotFound { index: 0 })
        ));
    }

    #[test]
    fn test_deleted_file_reads_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.png");
        fs::write(&path, b"one").unwrap();
        let source = FolderPageSource::open(dir.path()).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(matches!(
            source.read_page(0),
            Err(SourceError::PageNotFound { index: 0 })
        ));
    }

    #[test]
    fn test_missing_directory_fails() {
        assert!(FolderPageSource::open("/nonexistent/pageflow-pages").is_err());
    }

    #[test]
    fn test_memory_source() {
        let source = MemoryPageSource::new(vec![vec![1], vec![2, 2]]);
        assert_eq!(source.page_count(), 2);
        assert_eq!(source.read_page(1).unwrap(), vec![2, 2]);
        source.close();
        assert!(source.read_page(1).is_err());
    }
}

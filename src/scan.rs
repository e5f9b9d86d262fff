//! Directory scanning for displayable photos.
//!
//! Every call re-reads the filesystem. Nothing here remembers a previous
//! listing, so files dropped into the serving directory surface on the very
//! next scan and removed files disappear just as quickly.

use std::ffi::OsStr;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::ScanError;

/// Recognised image extensions (lowercase, without dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

/// Return `true` if `path` carries one of [`IMAGE_EXTENSIONS`], ignoring case.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|n| n.starts_with('.'))
}

/// One displayable photo as seen by a single scan.
///
/// Identity is the path alone; `modified` and `size` are a snapshot that is
/// only trusted until the next scan.
#[derive(Debug, Clone)]
pub struct PhotoRef {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

impl PhotoRef {
    pub fn new(path: PathBuf, modified: SystemTime, size: u64) -> Self {
        Self {
            path,
            modified,
            size,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl PartialEq for PhotoRef {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for PhotoRef {}

impl Hash for PhotoRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Ordered result of one scan, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoSet {
    photos: Vec<PhotoRef>,
}

impl PhotoSet {
    /// Build a set from arbitrary refs; sorts by path and drops duplicates.
    pub fn from_refs(mut photos: Vec<PhotoRef>) -> Self {
        photos.sort_by(|a, b| a.path.cmp(&b.path));
        photos.dedup_by(|a, b| a.path == b.path);
        Self { photos }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.photos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PhotoRef> {
        self.photos.iter()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&PhotoRef> {
        self.photos.get(idx)
    }

    /// Resolve a photo held from an earlier scan by path.
    #[must_use]
    pub fn position(&self, path: &Path) -> Option<usize> {
        self.photos
            .binary_search_by(|p| p.path.as_path().cmp(path))
            .ok()
    }

    /// Index of the entry that follows `path`, wrapping at the end. Falls back
    /// to the first entry when `path` is `None` or no longer present.
    #[must_use]
    pub fn successor_of(&self, path: Option<&Path>) -> Option<usize> {
        if self.photos.is_empty() {
            return None;
        }
        match path.and_then(|p| self.position(p)) {
            Some(idx) => Some((idx + 1) % self.photos.len()),
            None => Some(0),
        }
    }

    /// Every entry exactly once, starting at `start` and wrapping around.
    #[must_use]
    pub fn rotated_from(&self, start: usize) -> Vec<PhotoRef> {
        let len = self.photos.len();
        if len == 0 {
            return Vec::new();
        }
        (0..len)
            .map(|offset| self.photos[(start + offset) % len].clone())
            .collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.photos.iter().map(|p| p.path.as_path())
    }
}

impl<'a> IntoIterator for &'a PhotoSet {
    type Item = &'a PhotoRef;
    type IntoIter = std::slice::Iter<'a, PhotoRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.photos.iter()
    }
}

/// Anything that can produce a fresh [`PhotoSet`] on demand.
pub trait PhotoSource {
    fn scan(&self) -> Result<PhotoSet, ScanError>;
}

/// Lists the image files directly inside one directory.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    root: PathBuf,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PhotoSource for DirectoryScanner {
    fn scan(&self) -> Result<PhotoSet, ScanError> {
        scan_directory(&self.root)
    }
}

/// Scan `dir` (non-recursively) for eligible photos.
///
/// Hidden files are skipped, which also keeps in-progress temporary files of
/// the import pipeline out of the listing. Entries that vanish between the
/// listing and the `stat` are dropped silently.
///
/// # Errors
/// Returns [`ScanError`] if `dir` is missing, not a directory or unreadable.
pub fn scan_directory(dir: &Path) -> Result<PhotoSet, ScanError> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(ScanError::NotADirectory(dir.to_path_buf())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ScanError::Missing(dir.to_path_buf()));
        }
        Err(source) => {
            return Err(ScanError::Unreadable {
                path: dir.to_path_buf(),
                source,
            });
        }
    }

    let mut photos = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 || err.path() == Some(dir) => {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                return Err(ScanError::Unreadable {
                    path: dir.to_path_buf(),
                    source,
                });
            }
            Err(err) => {
                debug!(error = %err, "scan: skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || is_hidden(path) || !is_supported_image(path) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                photos.push(PhotoRef::new(path.to_path_buf(), modified, meta.len()));
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "scan: entry vanished");
            }
        }
    }

    Ok(PhotoSet::from_refs(photos))
}

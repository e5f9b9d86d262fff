//! Import pipeline: turns source photos into display-ready JPEGs in the
//! serving directory.
//!
//! Each eligible file in the import directory is decoded, fitted to the
//! screen bounds, encoded as JPEG and written into the serving directory via
//! a hidden temporary file that is renamed into place. The scanner therefore
//! only ever sees complete files.
//!
//! Output files are named `<stem>##<digest>.jpg`, where `<digest>` is the
//! leading 16 hex digits of the source's SHA-256. The `##<digest>.` marker
//! lets a pass recognise photos that are already being served even when the
//! import record was lost or the source was renamed.
//!
//! The [`ImportRecord`] remembers, per source path, the modification time and
//! size seen when it was last processed. Sources that have not changed since
//! are skipped without being hashed or decoded, which keeps repeated passes
//! idempotent and cheap.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{FileCodec, ImageCodec, encode_jpeg};
use crate::error::{Error, ImportError};
use crate::scan::{PhotoRef, scan_directory};

/// Name of the import record within the serving directory.
pub const RECORD_FILE_NAME: &str = ".import-record.json";

/// Bump to discard records written in an older format.
const RECORD_VERSION: u32 = 1;

const DIGEST_MARKER: &str = "##";
const DIGEST_LEN: usize = 16;
const DEFAULT_JPEG_QUALITY: u8 = 95;

/// What happened the last time a source was processed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordOutcome {
    Imported { output: String },
    /// Not a decodable photo; left alone until the source changes.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordEntry {
    pub modified: SystemTime,
    pub size: u64,
    pub digest: String,
    pub outcome: RecordOutcome,
}

impl RecordEntry {
    fn matches(&self, photo: &PhotoRef) -> bool {
        self.modified == photo.modified && self.size == photo.size
    }
}

/// Which sources have already been processed, keyed by source path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    version: u32,
    entries: BTreeMap<PathBuf, RecordEntry>,
}

impl Default for ImportRecord {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl ImportRecord {
    /// Load the record stored at `path`. A missing, unreadable or outdated
    /// record yields an empty one; the serving directory's digest markers
    /// still prevent duplicate output in that case.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "import record unreadable; starting fresh");
                return Self::default();
            }
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(record) if record.version == RECORD_VERSION => record,
            Ok(_) => {
                info!(path = %path.display(), "import record format changed; starting fresh");
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "import record corrupt; starting fresh");
                Self::default()
            }
        }
    }

    /// Write the record next to the photos, atomically.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    pub fn get(&self, source: &Path) -> Option<&RecordEntry> {
        self.entries.get(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when `photo` was processed before and has not changed since.
    pub fn is_current(&self, photo: &PhotoRef) -> bool {
        self.get(&photo.path).is_some_and(|entry| entry.matches(photo))
    }

    fn remember(&mut self, photo: &PhotoRef, digest: String, outcome: RecordOutcome) {
        self.entries.insert(
            photo.path.clone(),
            RecordEntry {
                modified: photo.modified,
                size: photo.size,
                digest,
                outcome,
            },
        );
    }

    fn retain_sources(&mut self, seen: &HashSet<PathBuf>) {
        self.entries.retain(|source, _| seen.contains(source));
    }
}

/// Outcome of one [`ImportPipeline::import_all`] pass.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub failed: Vec<(PathBuf, ImportError)>,
}

impl ImportReport {
    /// Nothing was written and nothing failed.
    pub fn is_quiet(&self) -> bool {
        self.imported == 0 && self.failed.is_empty()
    }
}

enum FileOutcome {
    Imported { output: String, digest: String },
    AlreadyPresent { output: String, digest: String },
}

/// Imports source photos into the serving directory.
pub struct ImportPipeline<C = FileCodec> {
    codec: C,
    quality: u8,
    persist_record: bool,
    record: Option<(PathBuf, ImportRecord)>,
    cancel: Option<CancellationToken>,
}

impl ImportPipeline<FileCodec> {
    pub fn new() -> Self {
        Self::with_codec(FileCodec)
    }
}

impl Default for ImportPipeline<FileCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ImageCodec> ImportPipeline<C> {
    pub fn with_codec(codec: C) -> Self {
        Self {
            codec,
            quality: DEFAULT_JPEG_QUALITY,
            persist_record: true,
            record: None,
            cancel: None,
        }
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Keep the record in memory only; it is rebuilt on every start.
    pub fn in_memory(mut self) -> Self {
        self.persist_record = false;
        self
    }

    /// Stop a pass between files once `cancel` fires.
    pub fn cancel_on(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn record(&self) -> Option<&ImportRecord> {
        self.record.as_ref().map(|(_, record)| record)
    }

    /// Import every new or changed photo from `import_dir` into `serving_dir`,
    /// fitting each into `target` (width, height).
    ///
    /// Per-file problems land in [`ImportReport::failed`] and never stop the
    /// pass. `import_dir` is only read.
    ///
    /// # Errors
    /// Directory-level failures: `import_dir` cannot be scanned or
    /// `serving_dir` cannot be created.
    pub fn import_all(
        &mut self,
        import_dir: &Path,
        serving_dir: &Path,
        target: (u32, u32),
    ) -> Result<ImportReport, Error> {
        let sources = scan_directory(import_dir)?;
        fs::create_dir_all(serving_dir).map_err(|source| Error::ServingDir {
            path: serving_dir.to_path_buf(),
            source,
        })?;
        let mut present = served_digests(serving_dir);
        let record_path = serving_dir.join(RECORD_FILE_NAME);
        let mut record = self.take_record(&record_path);

        debug!(
            sources = sources.len(),
            served = present.len(),
            "import pass starting"
        );

        let mut report = ImportReport::default();
        let mut seen = HashSet::with_capacity(sources.len());
        let mut interrupted = false;
        for photo in &sources {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                info!("import pass interrupted by shutdown");
                interrupted = true;
                break;
            }
            seen.insert(photo.path.clone());

            if let Some(entry) = record.get(&photo.path).filter(|e| e.matches(photo)) {
                debug!(path = %photo.path.display(), outcome = ?entry.outcome, "import: unchanged; skipping");
                report.skipped += 1;
                continue;
            }

            match self.import_one(photo, serving_dir, target, &present) {
                Ok(FileOutcome::Imported { output, digest }) => {
                    info!(source = %photo.path.display(), output = %output, "imported photo");
                    present.insert(digest.clone(), output.clone());
                    record.remember(photo, digest, RecordOutcome::Imported { output });
                    report.imported += 1;
                }
                Ok(FileOutcome::AlreadyPresent { output, digest }) => {
                    debug!(source = %photo.path.display(), output = %output, "import: already served");
                    record.remember(photo, digest, RecordOutcome::Imported { output });
                    report.skipped += 1;
                }
                Err((err, digest)) => {
                    warn!(path = %photo.path.display(), error = %err, "failed to import photo");
                    if let (Some(digest), true) = (digest, is_permanent(&err)) {
                        record.remember(photo, digest, RecordOutcome::Rejected);
                    }
                    report.failed.push((photo.path.clone(), err));
                }
            }
        }

        if !interrupted {
            record.retain_sources(&seen);
        }
        if self.persist_record {
            if let Err(source) = record.save(&record_path) {
                self.record = Some((record_path.clone(), record));
                return Err(Error::Record {
                    path: record_path,
                    source,
                });
            }
        }
        self.record = Some((record_path, record));
        Ok(report)
    }

    fn take_record(&mut self, record_path: &Path) -> ImportRecord {
        match self.record.take() {
            Some((path, record)) if path == record_path => record,
            _ if self.persist_record => ImportRecord::load(record_path),
            _ => ImportRecord::default(),
        }
    }

    fn import_one(
        &self,
        photo: &PhotoRef,
        serving_dir: &Path,
        target: (u32, u32),
        present: &HashMap<String, String>,
    ) -> Result<FileOutcome, (ImportError, Option<String>)> {
        let digest = fingerprint(&photo.path).map_err(|source| {
            (
                ImportError::Fingerprint {
                    path: photo.path.clone(),
                    source,
                },
                None,
            )
        })?;
        if let Some(output) = present.get(&digest) {
            return Ok(FileOutcome::AlreadyPresent {
                output: output.clone(),
                digest,
            });
        }

        let with_digest = |err: ImportError| (err, Some(digest.clone()));
        let bitmap = self
            .codec
            .decode(&photo.path)
            .map_err(|err| with_digest(err.into()))?;
        let fitted = self.codec.resize_to_fit(&bitmap, target.0, target.1);
        debug!(
            path = %photo.path.display(),
            from = ?bitmap.dimensions(),
            to = ?fitted.dimensions(),
            "fitted photo"
        );

        let output = output_name(&photo.path, &digest);
        write_atomically(&serving_dir.join(&output), |writer| {
            encode_jpeg(&fitted, self.quality, writer)
        })
        .map_err(with_digest)?;
        Ok(FileOutcome::Imported { output, digest })
    }
}

// Transient I/O problems are retried on the next pass; undecodable or
// unencodable photos wait until the source changes.
fn is_permanent(err: &ImportError) -> bool {
    matches!(err, ImportError::Decode(_) | ImportError::Encode { .. })
}

/// Leading hex digits of the SHA-256 of the file contents.
pub fn fingerprint(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(DIGEST_LEN);
    Ok(hex)
}

/// `<stem>##<digest>.jpg`
pub fn output_name(source: &Path, digest: &str) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    format!("{stem}{DIGEST_MARKER}{digest}.jpg")
}

/// Digest embedded in an output file name, if any.
pub fn digest_of(file_name: &str) -> Option<&str> {
    let (_, rest) = file_name.rsplit_once(DIGEST_MARKER)?;
    let (digest, _ext) = rest.split_once('.')?;
    (!digest.is_empty()).then_some(digest)
}

// digest -> file name for everything already in the serving directory
fn served_digests(serving_dir: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Ok(entries) = fs::read_dir(serving_dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if let Some(digest) = digest_of(&name) {
            out.insert(digest.to_string(), name);
        }
    }
    out
}

fn write_atomically<F>(target: &Path, write: F) -> Result<(), ImportError>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<(), image::ImageError>,
{
    let write_err = |source: io::Error| ImportError::Write {
        path: target.to_path_buf(),
        source,
    };
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer).map_err(|source| ImportError::Encode {
            path: target.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(write_err)?;
    }
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(target).map_err(|err| write_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_carries_digest() {
        let name = output_name(Path::new("/in/Holiday 01.PNG"), "0123456789abcdef");
        assert_eq!(name, "Holiday 01##0123456789abcdef.jpg");
        assert_eq!(digest_of(&name), Some("0123456789abcdef"));
    }

    #[test]
    fn names_without_marker_have_no_digest() {
        assert_eq!(digest_of("plain.jpg"), None);
        assert_eq!(digest_of("odd##.jpg"), None);
    }

    #[test]
    fn fingerprint_is_content_based() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.jpg");
        let b = tmp.path().join("b.jpg");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        let fa = fingerprint(&a).unwrap();
        assert_eq!(fa, fingerprint(&b).unwrap());
        assert_eq!(fa.len(), DIGEST_LEN);
    }

    #[test]
    fn record_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(RECORD_FILE_NAME);
        let photo = PhotoRef::new(PathBuf::from("/in/a.jpg"), SystemTime::UNIX_EPOCH, 42);

        let mut record = ImportRecord::default();
        record.remember(&photo, "abc".into(), RecordOutcome::Rejected);
        record.save(&path).unwrap();

        let loaded = ImportRecord::load(&path);
        assert!(loaded.is_current(&photo));
        assert_eq!(loaded.get(&photo.path).unwrap().outcome, RecordOutcome::Rejected);
    }

    #[test]
    fn corrupt_record_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(RECORD_FILE_NAME);
        fs::write(&path, b"{not json").unwrap();
        assert!(ImportRecord::load(&path).is_empty());
    }

    #[test]
    fn changed_source_is_not_current() {
        let photo = PhotoRef::new(PathBuf::from("/in/a.jpg"), SystemTime::UNIX_EPOCH, 42);
        let mut record = ImportRecord::default();
        record.remember(&photo, "abc".into(), RecordOutcome::Rejected);
        let grown = PhotoRef::new(photo.path.clone(), photo.modified, 43);
        assert!(!record.is_current(&grown));
    }
}

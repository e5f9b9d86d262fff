//! Off-tick decoding of the next photo.
//!
//! The engine hands a list of candidates to a [`DecodeWorker`] and gets back a
//! [`PendingDecode`] it polls on later ticks. The worker walks the candidates
//! in order and stops at the first one that decodes; everything that failed
//! on the way is reported so the engine can log and count it.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::codec::{FileCodec, ImageCodec};
use crate::error::DecodeError;
use crate::events::Photo;
use crate::scan::PhotoRef;

/// Result of one decode request.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    /// First candidate that decoded, if any.
    pub photo: Option<Photo>,
    /// Candidates that were tried and skipped, in order.
    pub failures: Vec<DecodeError>,
}

/// State of a [`PendingDecode`] after a non-blocking poll.
#[derive(Debug)]
pub enum DecodePoll {
    Pending,
    Ready(DecodeOutcome),
    /// The worker went away without answering (runtime shutting down).
    Abandoned,
}

/// Handle to an in-flight decode. Dropping it discards the result.
#[derive(Debug)]
pub struct PendingDecode {
    rx: oneshot::Receiver<DecodeOutcome>,
}

impl PendingDecode {
    pub fn poll(&mut self) -> DecodePoll {
        match self.rx.try_recv() {
            Ok(outcome) => DecodePoll::Ready(outcome),
            Err(TryRecvError::Empty) => DecodePoll::Pending,
            Err(TryRecvError::Closed) => DecodePoll::Abandoned,
        }
    }
}

enum Mode {
    Inline,
    Background(Handle),
}

/// Dispatches decodes either onto tokio's blocking pool or, for tests and
/// one-shot tools, synchronously on the caller's thread.
pub struct DecodeWorker {
    codec: Arc<dyn ImageCodec>,
    mode: Mode,
    display_bounds: Option<(u32, u32)>,
    cancel: CancellationToken,
}

impl DecodeWorker {
    /// Decode on tokio's blocking pool via `handle`.
    pub fn background(codec: Arc<dyn ImageCodec>, handle: Handle) -> Self {
        Self {
            codec,
            mode: Mode::Background(handle),
            display_bounds: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Decode synchronously inside [`DecodeWorker::dispatch`]. The returned
    /// [`PendingDecode`] is ready immediately.
    pub fn inline(codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            codec,
            mode: Mode::Inline,
            display_bounds: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn file_codec_inline() -> Self {
        Self::inline(Arc::new(FileCodec))
    }

    /// Fit every decoded photo into `bounds` before handing it over.
    pub fn with_display_bounds(mut self, bounds: (u32, u32)) -> Self {
        self.display_bounds = Some(bounds);
        self
    }

    /// Stop walking candidates once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn dispatch(&self, candidates: Vec<PhotoRef>) -> PendingDecode {
        let (tx, rx) = oneshot::channel();
        let codec = Arc::clone(&self.codec);
        let bounds = self.display_bounds;
        let cancel = self.cancel.clone();
        match &self.mode {
            Mode::Inline => {
                let _ = tx.send(decode_first(codec.as_ref(), candidates, bounds, &cancel));
            }
            Mode::Background(handle) => {
                handle.spawn_blocking(move || {
                    let outcome = decode_first(codec.as_ref(), candidates, bounds, &cancel);
                    // receiver gone means the engine moved on or shut down
                    let _ = tx.send(outcome);
                });
            }
        }
        PendingDecode { rx }
    }
}

fn decode_first(
    codec: &dyn ImageCodec,
    candidates: Vec<PhotoRef>,
    bounds: Option<(u32, u32)>,
    cancel: &CancellationToken,
) -> DecodeOutcome {
    let mut failures = Vec::new();
    for photo in candidates {
        if cancel.is_cancelled() {
            break;
        }
        match codec.decode(&photo.path) {
            Ok(bitmap) => {
                let bitmap = match bounds {
                    Some((w, h)) => codec.resize_to_fit(&bitmap, w, h),
                    None => bitmap,
                };
                return DecodeOutcome {
                    photo: Some(Photo::new(photo, bitmap)),
                    failures,
                };
            }
            Err(err) => failures.push(err),
        }
    }
    DecodeOutcome {
        photo: None,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> PhotoRef {
        let path = dir.join(name);
        image::RgbaImage::from_pixel(w, h, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        PhotoRef::new(path, SystemTime::UNIX_EPOCH, 0)
    }

    fn corrupt(dir: &Path, name: &str) -> PhotoRef {
        let path = dir.join(name);
        std::fs::write(&path, b"garbage").unwrap();
        PhotoRef::new(path, SystemTime::UNIX_EPOCH, 0)
    }

    #[test]
    fn inline_skips_failures_and_returns_first_good() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = corrupt(tmp.path(), "a.jpg");
        let good = write_png(tmp.path(), "b.png", 4, 2);
        let worker = DecodeWorker::file_codec_inline();

        let mut pending = worker.dispatch(vec![bad.clone(), good.clone()]);
        let DecodePoll::Ready(outcome) = pending.poll() else {
            panic!("inline decode should be ready");
        };
        assert_eq!(outcome.photo.unwrap().source, good);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, bad.path);
    }

    #[test]
    fn display_bounds_fit_the_bitmap() {
        let tmp = tempfile::tempdir().unwrap();
        let big = write_png(tmp.path(), "big.png", 40, 20);
        let worker = DecodeWorker::file_codec_inline().with_display_bounds((10, 10));
        let DecodePoll::Ready(outcome) = worker.dispatch(vec![big]).poll() else {
            panic!("inline decode should be ready");
        };
        assert_eq!(outcome.photo.unwrap().bitmap.dimensions(), (10, 5));
    }

    #[test]
    fn cancelled_worker_decodes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let good = write_png(tmp.path(), "a.png", 2, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let worker = DecodeWorker::file_codec_inline().with_cancel(cancel);
        let DecodePoll::Ready(outcome) = worker.dispatch(vec![good]).poll() else {
            panic!("inline decode should be ready");
        };
        assert!(outcome.photo.is_none());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_result_arrives_later() {
        let tmp = tempfile::tempdir().unwrap();
        let good = write_png(tmp.path(), "a.png", 2, 2);
        let worker = DecodeWorker::background(Arc::new(FileCodec), Handle::current());
        let mut pending = worker.dispatch(vec![good]);

        let outcome = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match pending.poll() {
                    DecodePoll::Ready(outcome) => break outcome,
                    DecodePoll::Pending => tokio::time::sleep(Duration::from_millis(5)).await,
                    DecodePoll::Abandoned => panic!("worker dropped the result"),
                }
            }
        })
        .await
        .expect("decode did not finish");
        assert_eq!(outcome.photo.unwrap().source.path, tmp.path().join("a.png"));
    }
}

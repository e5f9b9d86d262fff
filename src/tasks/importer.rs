use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::FrameConfig;
use crate::events::ImportRequest;
use crate::import::{ImportPipeline, ImportReport};
use crate::scan::is_supported_image;

/// Quiet period after the last filesystem event before a pass starts.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Where and how often the background importer works.
#[derive(Debug, Clone)]
pub struct ImporterSettings {
    pub import_dir: PathBuf,
    pub serving_dir: PathBuf,
    pub target: (u32, u32),
    pub interval: Duration,
    pub settle: Duration,
    pub jpeg_quality: u8,
}

impl ImporterSettings {
    /// `None` when the configuration has no import directory.
    pub fn from_config(cfg: &FrameConfig) -> Option<Self> {
        let import_dir = cfg.import_directory.clone()?;
        Some(Self {
            import_dir,
            serving_dir: cfg.photos_directory.clone(),
            target: cfg.screen_bounds(),
            interval: cfg.import_interval,
            settle: SETTLE_DELAY,
            jpeg_quality: cfg.jpeg_quality,
        })
    }
}

/// What became of an out-of-band import request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Queued,
    /// A pass is already waiting; this one is folded into it.
    AlreadyQueued,
    /// No importer is listening.
    Disabled,
}

/// Ask the import worker for a pass without waiting.
pub fn request_pass(requests: &Sender<ImportRequest>) -> RequestStatus {
    match requests.try_send(ImportRequest) {
        Ok(()) => RequestStatus::Queued,
        Err(TrySendError::Full(_)) => RequestStatus::AlreadyQueued,
        Err(TrySendError::Closed(_)) => RequestStatus::Disabled,
    }
}

/// Run import passes at startup, on every interval tick, on request and once
/// the import directory has been quiet for `settle` after a change.
#[instrument(
    skip(requests, cancel),
    fields(import = %settings.import_dir.display(), serving = %settings.serving_dir.display())
)]
pub async fn run(
    settings: ImporterSettings,
    mut requests: Receiver<ImportRequest>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut pipeline = Some(
        ImportPipeline::new()
            .quality(settings.jpeg_quality)
            .cancel_on(cancel.clone()),
    );

    // Bridge notify callback -> async channel
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Result<Event>>(128);
    let mut watcher = recommended_watcher(move |res| {
        let _ = watch_tx.blocking_send(res);
    })
    .context("failed to create import directory watcher")?;
    let mut watching = watch(&mut watcher, &settings.import_dir);

    info!(
        every = %humantime::format_duration(settings.interval),
        "import worker started"
    );
    let mut ticker = time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut settle_at: Option<Instant> = None;

    loop {
        let run_pass = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("cancel received; exiting import task");
                break;
            }
            _ = ticker.tick() => {
                debug!("import: interval tick");
                true
            }
            Some(ImportRequest) = requests.recv() => {
                debug!("import: pass requested");
                true
            }
            Some(res) = watch_rx.recv() => {
                match res {
                    Ok(event) if is_relevant(&event) => {
                        debug!(kind = ?event.kind, paths = ?event.paths, "import: notify event");
                        settle_at = Some(Instant::now() + settings.settle);
                    }
                    Ok(event) => debug!(kind = ?event.kind, "import: ignored event"),
                    Err(err) => error!("watch error: {err}"),
                }
                false
            }
            _ = sleep_until(settle_at) => {
                debug!("import: directory settled");
                true
            }
        };
        if !run_pass {
            continue;
        }
        settle_at = None;

        let Some(current) = pipeline.take() else {
            break;
        };
        let Some((returned, outcome)) = run_blocking_pass(current, &settings, &cancel).await
        else {
            break;
        };
        pipeline = Some(returned);
        match outcome {
            Ok(report) => log_report(&report),
            Err(err) => warn!(error = %err, "import pass failed; retrying on next interval"),
        }
        if !watching {
            watching = watch(&mut watcher, &settings.import_dir);
        }
    }
    Ok(())
}

type PassResult = (ImportPipeline, Result<ImportReport, crate::error::Error>);

// `None` when cancelled mid-pass; the blocking pass stops at the next file.
async fn run_blocking_pass(
    mut pipeline: ImportPipeline,
    settings: &ImporterSettings,
    cancel: &CancellationToken,
) -> Option<PassResult> {
    let import_dir = settings.import_dir.clone();
    let serving_dir = settings.serving_dir.clone();
    let target = settings.target;
    let handle = tokio::task::spawn_blocking(move || {
        let outcome = pipeline.import_all(&import_dir, &serving_dir, target);
        (pipeline, outcome)
    });
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("cancel received during import pass; not waiting for it");
            None
        }
        joined = handle => match joined {
            Ok(result) => Some(result),
            Err(err) => {
                error!("import pass panicked: {err}");
                None
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn watch(watcher: &mut RecommendedWatcher, dir: &Path) -> bool {
    match watcher.watch(dir, RecursiveMode::NonRecursive) {
        Ok(()) => {
            info!(watching = %dir.display(), "notify watcher initialized");
            true
        }
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "cannot watch import directory; polling only");
            false
        }
    }
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| {
        is_supported_image(p)
            && !p
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'))
    })
}

fn log_report(report: &ImportReport) {
    if report.is_quiet() {
        debug!(skipped = report.skipped, "import pass: nothing new");
    } else {
        info!(
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed.len(),
            "import pass complete"
        );
    }
}

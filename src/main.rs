use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use picture_frame::codec::FileCodec;
use picture_frame::config::FrameConfig;
use picture_frame::events::ImportRequest;
use picture_frame::import::ImportPipeline;
use picture_frame::scan::{DirectoryScanner, PhotoSource};
use picture_frame::sink::LogSink;
use picture_frame::slideshow::{DecodeWorker, SlideshowEngine, Timing};
use picture_frame::tasks::{
    self,
    importer::{ImporterSettings, RequestStatus},
};

#[derive(Debug, Parser)]
#[command(
    name = "picture-frame",
    version,
    about = "rotating photo slideshow with a background importer"
)]
struct Args {
    /// Path to a JSON or YAML config (default: ./frame-config.json, then
    /// ~/.picture-frame-ui/frame-config.json)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Print the photos the slideshow would rotate through and exit
    #[arg(long, conflicts_with = "import_once")]
    scan: bool,
    /// Run a single import pass, print the report and exit
    #[arg(long)]
    import_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        verbose,
        scan,
        import_once,
    } = Args::parse();

    // init tracing (RUST_LOG controls level, default = info)
    let default_level = match verbose {
        0 => "info",
        1 => "picture_frame=debug,info",
        _ => "picture_frame=trace,debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let cfg = FrameConfig::load(config.as_deref()).context("failed to load configuration")?;
    tracing::debug!("configuration: {cfg:#?}");

    if scan {
        return print_scan(&cfg);
    }
    if import_once {
        return run_import_once(&cfg);
    }

    let cancel = CancellationToken::new();

    // Ctrl-D/Ctrl-C cancel everything. A plain thread: the runtime would
    // wait on a blocking-pool task stuck in read() at shutdown.
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            let mut sink = Vec::new();
            match io::stdin().read_to_end(&mut sink) {
                Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
                Err(err) => tracing::warn!("stdin watcher failed: {err}"),
            }
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping shutdown watcher");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let (import_tx, import_rx) = mpsc::channel::<ImportRequest>(4);
    let importer = ImporterSettings::from_config(&cfg);

    // SIGUSR1 asks for an import pass right away (sent after an upload lands)
    #[cfg(unix)]
    {
        if importer.is_some() {
            let cancel = cancel.clone();
            let requests = import_tx.clone();
            tokio::spawn(async move {
                match signal(SignalKind::user_defined1()) {
                    Ok(mut sigusr1) => loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            received = sigusr1.recv() => {
                                if received.is_none() {
                                    break;
                                }
                                tracing::info!("SIGUSR1 received; requesting import pass");
                                match tasks::importer::request_pass(&requests) {
                                    RequestStatus::Queued => {}
                                    RequestStatus::AlreadyQueued => {
                                        tracing::debug!("import request already queued")
                                    }
                                    RequestStatus::Disabled => {
                                        tracing::debug!("import worker gone; ignoring SIGUSR1");
                                        break;
                                    }
                                }
                            }
                        }
                    },
                    Err(err) => tracing::warn!("failed to register SIGUSR1 handler: {err}"),
                }
            });
        }
    }
    drop(import_tx);

    let mut tasks = JoinSet::new();

    // Importer
    match importer {
        Some(settings) => {
            let cancel = cancel.clone();
            tasks.spawn(async move {
                tasks::importer::run(settings, import_rx, cancel)
                    .await
                    .context("import task failed")
            });
        }
        None => tracing::info!("no import_directory configured; importer disabled"),
    }

    // Slideshow
    tasks.spawn({
        let decoder = DecodeWorker::background(Arc::new(FileCodec), tokio::runtime::Handle::current())
            .with_display_bounds(cfg.screen_bounds())
            .with_cancel(cancel.clone());
        let engine = SlideshowEngine::new(
            DirectoryScanner::new(&cfg.photos_directory),
            decoder,
            Timing::new(cfg.hold_duration(), cfg.fade()),
        );
        let frame_interval = cfg.frame_interval();
        let cancel = cancel.clone();
        async move {
            tasks::slideshow::run(engine, LogSink::new(), frame_interval, cancel)
                .await
                .map(|_| ())
                .context("slideshow task failed")
        }
    });

    tracing::info!(
        photos = %cfg.photos_directory.display(),
        hold_s = cfg.slideshow_duration,
        fade_ms = cfg.fade_duration,
        rendering = %cfg.rendering_type,
        full_screen = cfg.full_screen,
        "picture frame running"
    );

    cancel.cancelled().await;

    // Drain JoinSet (wait for other tasks to complete)
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}

fn print_scan(cfg: &FrameConfig) -> Result<()> {
    let scanner = DirectoryScanner::new(&cfg.photos_directory);
    let set = scanner
        .scan()
        .with_context(|| format!("failed to scan {}", cfg.photos_directory.display()))?;
    println!("# {} photos in {}", set.len(), scanner.root().display());
    for (idx, photo) in set.iter().enumerate() {
        println!("  {:>4}: {} ({} bytes)", idx + 1, photo.file_name(), photo.size);
    }
    Ok(())
}

fn run_import_once(cfg: &FrameConfig) -> Result<()> {
    let import_dir = cfg
        .import_directory
        .as_deref()
        .context("--import-once requires import_directory in the configuration")?;
    let report = ImportPipeline::new()
        .quality(cfg.jpeg_quality)
        .import_all(import_dir, &cfg.photos_directory, cfg.screen_bounds())
        .context("import pass failed")?;
    println!(
        "imported: {}\nskipped: {}\nfailed: {}",
        report.imported,
        report.skipped,
        report.failed.len()
    );
    for (path, err) in &report.failed {
        println!("  {}: {err}", path.display());
    }
    Ok(())
}

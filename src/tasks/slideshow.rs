use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::memory::{MemoryMonitor, format_kb};
use crate::scan::PhotoSource;
use crate::sink::RenderSink;
use crate::slideshow::{Phase, SlideshowEngine};

/// Tick `engine` every `frame_interval` and hand each frame to `sink` until
/// `cancel` fires. Process memory is sampled whenever the shown photo changes.
/// Returns the engine so callers can inspect it afterwards.
#[instrument(skip_all, fields(frame_ms = frame_interval.as_millis() as u64))]
pub async fn run<S, K>(
    mut engine: SlideshowEngine<S>,
    mut sink: K,
    frame_interval: Duration,
    cancel: CancellationToken,
) -> Result<SlideshowEngine<S>>
where
    S: PhotoSource + Send,
    K: RenderSink + Send,
{
    let mut ticker = time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_phase = engine.phase();
    let mut last_shown: Option<PathBuf> = None;
    let mut memory = MemoryMonitor::new();
    info!("slideshow started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let stats = memory.check();
                info!(
                    transitions = engine.transitions(),
                    decode_failures = engine.decode_failures(),
                    peak = %format_kb(stats.peak_kb),
                    growth = %format_kb(stats.growth_kb),
                    "cancel received; stopping slideshow"
                );
                break;
            }
            _ = ticker.tick() => {
                let command = engine.tick(Instant::now());
                sink.present(&command);
                let phase = engine.phase();
                if phase != last_phase {
                    if phase == Phase::Idle {
                        info!("no photo to show; displaying placeholder");
                    }
                    last_phase = phase;
                }
                let shown = engine.current().map(|p| &p.source.path);
                if shown != last_shown.as_ref() {
                    last_shown = shown.cloned();
                    if last_shown.is_some() {
                        let stats = memory.check();
                        info!(
                            current = %format_kb(stats.current_kb),
                            peak = %format_kb(stats.peak_kb),
                            growth = %format_kb(stats.growth_kb),
                            "memory after photo change"
                        );
                    }
                }
            }
        }
    }
    Ok(engine)
}

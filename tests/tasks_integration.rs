use picture_frame::codec::FileCodec;
use picture_frame::events::{ImportRequest, RenderCommand};
use picture_frame::scan::{DirectoryScanner, scan_directory};
use picture_frame::sink::ChannelSink;
use picture_frame::slideshow::{DecodeWorker, Phase, SlideshowEngine, Timing};
use picture_frame::tasks::importer::{self, ImporterSettings};
use picture_frame::tasks::slideshow;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn write_png(dir: &Path, name: &str, shade: u8) {
    image::RgbaImage::from_pixel(64, 32, image::Rgba([shade, 0, 0, 255]))
        .save(dir.join(name))
        .unwrap();
}

async fn wait_for_served(dir: &Path, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if scan_directory(dir).map(|s| s.len()).unwrap_or(0) >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timeout waiting for imported photos");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn importer_runs_at_startup_and_on_request() {
    let tmp = tempdir().unwrap();
    let import = tmp.path().join("in");
    let serving = tmp.path().join("photos");
    fs::create_dir_all(&import).unwrap();
    write_png(&import, "a.png", 1);

    let settings = ImporterSettings {
        import_dir: import.clone(),
        serving_dir: serving.clone(),
        target: (32, 32),
        interval: Duration::from_secs(3600),
        settle: Duration::from_millis(50),
        jpeg_quality: 90,
    };
    let (req_tx, req_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(importer::run(settings, req_rx, cancel.clone()));

    wait_for_served(&serving, 1).await;

    write_png(&import, "b.png", 2);
    req_tx.send(ImportRequest).await.unwrap();
    wait_for_served(&serving, 2).await;

    for photo in &scan_directory(&serving).unwrap() {
        let img = image::open(&photo.path).unwrap();
        assert_eq!((img.width(), img.height()), (32, 16));
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("importer did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn importer_tolerates_missing_import_directory() {
    let tmp = tempdir().unwrap();
    let settings = ImporterSettings {
        import_dir: tmp.path().join("not-yet"),
        serving_dir: tmp.path().join("photos"),
        target: (32, 32),
        interval: Duration::from_millis(50),
        settle: Duration::from_millis(50),
        jpeg_quality: 90,
    };
    let (_req_tx, req_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(importer::run(settings, req_rx, cancel.clone()));

    fs::create_dir_all(tmp.path().join("not-yet")).unwrap();
    write_png(&tmp.path().join("not-yet"), "late.png", 3);
    wait_for_served(&tmp.path().join("photos"), 1).await;

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("importer did not stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slideshow_task_emits_frames_and_stops_on_cancel() {
    let tmp = tempdir().unwrap();
    write_png(tmp.path(), "a.png", 1);
    write_png(tmp.path(), "b.png", 2);

    let engine = SlideshowEngine::new(
        DirectoryScanner::new(tmp.path()),
        DecodeWorker::background(Arc::new(FileCodec), Handle::current()),
        Timing::new(Duration::from_millis(100), Duration::from_millis(50)),
    );
    let (sink, rx) = ChannelSink::bounded(256);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(slideshow::run(
        engine,
        sink,
        Duration::from_millis(5),
        cancel.clone(),
    ));

    let saw_blend = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.try_recv() {
                Ok(RenderCommand::ShowBlend { .. }) => break true,
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    })
    .await
    .expect("no crossfade within timeout");
    assert!(saw_blend);

    cancel.cancel();
    let engine = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("slideshow did not stop")
        .unwrap()
        .unwrap();
    assert!(engine.transitions() >= 1);
    assert_ne!(engine.phase(), Phase::Idle);
}

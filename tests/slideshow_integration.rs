use cached_photo_frame::config::ScreenSize;
use cached_photo_frame::events::{Displayed, PhotoId, SlideshowCommand};
use cached_photo_frame::provider::{Provider, ProviderOptions};
use cached_photo_frame::service::{LibraryService, SIDECAR_FILE};
use cached_photo_frame::tasks::slideshow::{self, SlideshowOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn write_png(dir: &Path, name: &str, width: u32, height: u32) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    image::RgbaImage::from_pixel(width, height, image::Rgba([200, 100, 50, 255]))
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
}

struct Harness {
    commands: mpsc::Sender<SlideshowCommand>,
    displayed: mpsc::Receiver<Displayed>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn launch(library: &Path, cache: &Path, interval: Duration) -> Harness {
    let cancel = CancellationToken::new();
    let provider = Provider::open(
        Arc::new(LibraryService::new(library)),
        ProviderOptions {
            prefetch_depth: 2,
            shuffle: false,
            shuffle_seed: None,
            cache_path: cache.to_path_buf(),
            cache_budget_bytes: 8 * 1024 * 1024,
        },
        cancel.clone(),
    )
    .await
    .unwrap();
    let (commands, command_rx) = mpsc::channel(8);
    let (displayed_tx, displayed) = mpsc::channel(16);
    let handle = tokio::spawn(slideshow::run(
        provider,
        command_rx,
        displayed_tx,
        cancel.clone(),
        SlideshowOptions {
            interval,
            screen: ScreenSize {
                width: 800,
                height: 480,
            },
            crop_threshold: 10,
            refresh_interval: None,
        },
    ));
    Harness {
        commands,
        displayed,
        cancel,
        handle,
    }
}

async fn next_displayed(harness: &mut Harness) -> PhotoId {
    let Displayed(id) = tokio::time::timeout(Duration::from_secs(3), harness.displayed.recv())
        .await
        .expect("timeout waiting for Displayed")
        .expect("slideshow stopped");
    id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timer_advances_through_library_and_wraps() {
    let library = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_png(library.path(), "a.png", 8, 6);
    write_png(library.path(), "nested/b.png", 6, 8);
    std::fs::write(library.path().join("notes.txt"), b"not a photo").unwrap();

    let mut harness = launch(library.path(), cache.path(), Duration::from_millis(50)).await;
    let shown: Vec<String> = [
        next_displayed(&mut harness).await,
        next_displayed(&mut harness).await,
        next_displayed(&mut harness).await,
    ]
    .iter()
    .map(|id| id.as_str().to_owned())
    .collect();
    assert_eq!(shown, vec!["a.png", "nested/b.png", "a.png"]);

    harness.cancel.cancel();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_navigate_and_star_the_current_photo() {
    let library = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    for name in ["1.png", "2.png", "3.png"] {
        write_png(library.path(), name, 4, 4);
    }

    // long interval so only commands move the show
    let mut harness = launch(library.path(), cache.path(), Duration::from_secs(60)).await;
    assert_eq!(next_displayed(&mut harness).await.as_str(), "1.png");

    harness.commands.send(SlideshowCommand::Previous).await.unwrap();
    assert_eq!(next_displayed(&mut harness).await.as_str(), "3.png");

    harness.commands.send(SlideshowCommand::ToggleStar).await.unwrap();
    let sidecar = library.path().join(SIDECAR_FILE);
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(&sidecar).await {
                let json: serde_json::Value = serde_json::from_str(&text).unwrap();
                if json["3.png"]["tags"]
                    .as_array()
                    .is_some_and(|tags| tags.iter().any(|t| t == "starred"))
                {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("star never reached the library sidecar");

    harness.commands.send(SlideshowCommand::Next).await.unwrap();
    assert_eq!(next_displayed(&mut harness).await.as_str(), "1.png");

    harness.cancel.cancel();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlay_pauses_the_timer() {
    let library = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_png(library.path(), "a.png", 4, 4);
    write_png(library.path(), "b.png", 4, 4);

    let mut harness = launch(library.path(), cache.path(), Duration::from_millis(100)).await;
    assert_eq!(next_displayed(&mut harness).await.as_str(), "a.png");
    harness
        .commands
        .send(SlideshowCommand::ToggleOverlay)
        .await
        .unwrap();

    let paused = tokio::time::timeout(Duration::from_millis(400), harness.displayed.recv()).await;
    assert!(paused.is_err(), "slideshow advanced while the overlay was shown");

    harness
        .commands
        .send(SlideshowCommand::ToggleOverlay)
        .await
        .unwrap();
    assert_eq!(next_displayed(&mut harness).await.as_str(), "b.png");

    harness.cancel.cancel();
    harness.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broken_photo_is_skipped_after_the_interval() {
    let library = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    std::fs::write(library.path().join("a.jpg"), b"truncated garbage").unwrap();
    write_png(library.path(), "b.png", 4, 4);

    let mut harness = launch(library.path(), cache.path(), Duration::from_millis(50)).await;
    assert_eq!(next_displayed(&mut harness).await.as_str(), "b.png");

    harness.cancel.cancel();
    harness.handle.await.unwrap().unwrap();
}

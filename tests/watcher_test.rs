mod helpers;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use answer_tips::{
    config::AppConfig,
    models::event::{DetectedEvent, WatchEvent},
    services::{stability::StabilityGate, watcher::FileWatcher},
};
use tokio::sync::mpsc;

use helpers::write_image;

fn fast_watcher(root: &Path) -> FileWatcher {
    let config = AppConfig {
        watch_folder: root.display().to_string(),
        ..AppConfig::default()
    };
    let gate = StabilityGate::new(Duration::from_millis(50), 2, Duration::from_secs(2));
    FileWatcher::with_gate(Arc::new(config), gate)
}

/// Next `Detected` event, skipping removal notices.
async fn next_detected(
    events: &mut mpsc::Receiver<WatchEvent>,
    within: Duration,
) -> Option<DetectedEvent> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(WatchEvent::Detected(event))) => return Some(event),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn test_detects_new_image() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let mut watcher = fast_watcher(&root);
    let mut events = watcher.start(&root).unwrap();
    assert!(watcher.status().is_running);

    let image = write_image(&root, "capture.PNG");

    let event = next_detected(&mut events, Duration::from_secs(5))
        .await
        .expect("image should be detected");
    assert_eq!(event.path, image);
    assert!(watcher.dedup().is_in_flight(&image));
    assert_eq!(watcher.status().in_flight, 1);

    event.complete();
    assert!(watcher.dedup().is_empty());

    watcher.stop();
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_detects_images_in_subfolders() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::create_dir(root.join("nested")).unwrap();

    let mut watcher = fast_watcher(&root);
    let mut events = watcher.start(&root).unwrap();

    let image = write_image(&root.join("nested"), "deep.jpg");
    let event = next_detected(&mut events, Duration::from_secs(5))
        .await
        .expect("nested image should be detected");
    assert_eq!(event.path, image);
}

#[tokio::test]
async fn test_ignores_hidden_and_unsupported_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::create_dir(root.join(".cache")).unwrap();

    let mut watcher = fast_watcher(&root);
    let mut events = watcher.start(&root).unwrap();

    std::fs::write(root.join(".hidden.png"), b"0123456789").unwrap();
    std::fs::write(root.join(".cache").join("thumb.png"), b"0123456789").unwrap();
    std::fs::write(root.join("readme.txt"), b"0123456789").unwrap();
    let visible = write_image(&root, "visible.webp");

    let event = next_detected(&mut events, Duration::from_secs(5))
        .await
        .expect("visible image should be detected");
    assert_eq!(event.path, visible);

    let extra = next_detected(&mut events, Duration::from_millis(500)).await;
    assert!(extra.is_none(), "unexpected event for {:?}", extra.map(|e| e.path));
}

#[tokio::test]
async fn test_in_flight_path_is_not_admitted_twice() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let mut watcher = fast_watcher(&root);
    let mut events = watcher.start(&root).unwrap();

    let image = write_image(&root, "once.png");
    let event = next_detected(&mut events, Duration::from_secs(5))
        .await
        .expect("image should be detected");

    // Still held by the pipeline.
    assert!(!watcher.process_file(&image).await.unwrap());

    drop(event);
    assert!(watcher.process_file(&image).await.unwrap());
    let again = next_detected(&mut events, Duration::from_secs(5))
        .await
        .expect("manual submission should be emitted");
    assert_eq!(again.path, image);
}

#[tokio::test]
async fn test_recreated_path_stays_single_while_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let mut watcher = fast_watcher(&root);
    let mut events = watcher.start(&root).unwrap();

    let image = write_image(&root, "shot.png");
    let held = next_detected(&mut events, Duration::from_secs(5))
        .await
        .expect("image should be detected");

    std::fs::remove_file(&image).unwrap();
    std::fs::write(&image, b"9876543210").unwrap();

    let second = next_detected(&mut events, Duration::from_millis(750)).await;
    assert!(second.is_none(), "path was admitted twice while still held");
    assert!(watcher.dedup().is_in_flight(&image));

    drop(held);
    assert!(watcher.dedup().is_empty());
}

#[tokio::test]
async fn test_change_to_tracked_path_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let mut watcher = fast_watcher(&root);
    let mut events = watcher.start(&root).unwrap();

    let image = write_image(&root, "growing.png");
    let _held = next_detected(&mut events, Duration::from_secs(5))
        .await
        .expect("image should be detected");

    let mut file = std::fs::OpenOptions::new().append(true).open(&image).unwrap();
    std::io::Write::write_all(&mut file, b"more bytes").unwrap();
    drop(file);

    let extra = next_detected(&mut events, Duration::from_millis(750)).await;
    assert!(extra.is_none(), "change on a tracked path must not re-emit");
    assert_eq!(watcher.status().in_flight, 1);
}

#[tokio::test]
async fn test_process_file_filters_ineligible_paths() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let mut watcher = fast_watcher(&root);
    let _events = watcher.start(&root).unwrap();

    let text = root.join("notes.txt");
    std::fs::write(&text, b"hello").unwrap();
    assert!(!watcher.process_file(&text).await.unwrap());

    let missing = root.join("never-written.png");
    assert!(!watcher.process_file(&missing).await.unwrap());
    assert!(watcher.dedup().is_empty());
}

#[tokio::test]
async fn test_process_file_requires_running_watcher() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let watcher = fast_watcher(&root);
    let image = write_image(&root, "idle.png");

    assert!(watcher.process_file(&image).await.is_err());
}

#[tokio::test]
async fn test_stop_closes_event_stream() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let mut watcher = fast_watcher(&root);
    let mut events = watcher.start(&root).unwrap();

    assert!(watcher.start(&root).is_err(), "second start must be rejected");

    watcher.stop();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "event stream should close after stop");
}

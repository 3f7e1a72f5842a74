use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::event::{DetectedEvent, WatchEvent};
use crate::services::dedup::{AdmissionGuard, WatchDeduplicator};
use crate::services::stability::{Stability, StabilityGate};

/// Capacity of the channel between the watcher and the pipeline dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Recursive folder watcher that emits one `Detected` event per new image.
///
/// Each candidate goes through extension/dotfile filtering, admission in the
/// [`WatchDeduplicator`] and a [`StabilityGate`] wait before it is emitted.
/// The admission stays held by the emitted event until the pipeline drops it.
pub struct FileWatcher {
    config: Arc<AppConfig>,
    dedup: WatchDeduplicator,
    gate: StabilityGate,
    running: Option<RunningWatch>,
}

struct RunningWatch {
    ctx: WatchContext,
    // Dropping the notify watcher ends the subscription and closes the raw channel.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub is_running: bool,
    pub watch_folder: String,
    pub in_flight: usize,
}

/// What a raw filesystem notification means for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Added,
    Changed,
    Removed,
}

#[derive(Clone)]
struct WatchContext {
    root: PathBuf,
    config: Arc<AppConfig>,
    dedup: WatchDeduplicator,
    gate: StabilityGate,
    out: mpsc::Sender<WatchEvent>,
}

impl FileWatcher {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let gate = StabilityGate::from_config(&config);
        Self::with_gate(config, gate)
    }

    pub fn with_gate(config: Arc<AppConfig>, gate: StabilityGate) -> Self {
        Self {
            config,
            dedup: WatchDeduplicator::new(),
            gate,
            running: None,
        }
    }

    pub fn dedup(&self) -> &WatchDeduplicator {
        &self.dedup
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Subscribe to changes under `root` and return the event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, root: &Path) -> Result<mpsc::Receiver<WatchEvent>, AppError> {
        if self.running.is_some() {
            return Err(AppError::service("file watcher is already running"));
        }
        if !root.is_dir() {
            return Err(AppError::file(format!(
                "watch folder does not exist: {}",
                root.display()
            )));
        }
        let root = std::fs::canonicalize(root).map_err(|e| {
            AppError::file(format!("cannot resolve watch folder {}", root.display())).with_source(e)
        })?;

        tracing::info!(folder = %root.display(), "Starting file watcher");

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver only goes away after stop(); late events are dropped.
            let _ = raw_tx.send(res);
        })
        .map_err(|e| AppError::service("failed to create file watcher").with_source(e))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| {
                AppError::service(format!("failed to watch {}", root.display())).with_source(e)
            })?;

        let (out_tx, out_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let ctx = WatchContext {
            root: root.clone(),
            config: self.config.clone(),
            dedup: self.dedup.clone(),
            gate: self.gate.clone(),
            out: out_tx,
        };
        let task = tokio::spawn(run_event_loop(ctx.clone(), raw_rx));

        self.running = Some(RunningWatch {
            ctx,
            _watcher: watcher,
            task,
        });
        tracing::info!(folder = %root.display(), "File watcher ready");
        Ok(out_rx)
    }

    /// Tear down the subscription and forget all in-flight paths. Idempotent.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
            drop(running);
            tracing::info!("File watcher stopped");
        }
        self.dedup.clear();
    }

    /// Push a single path through the same admission and stability route as
    /// a filesystem event. Returns `false` if the path was filtered out,
    /// already in flight, or vanished.
    pub async fn process_file(&self, path: &Path) -> Result<bool, AppError> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| AppError::service("file watcher is not running"))?;
        let ctx = &running.ctx;

        if !ctx.is_eligible(path) {
            return Ok(false);
        }
        match ctx.dedup.try_admit(path) {
            Some(guard) => Ok(ctx.clone().settle(guard).await),
            None => Ok(false),
        }
    }

    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            is_running: self.running.is_some(),
            watch_folder: self.config.watch_folder.clone(),
            in_flight: self.dedup.len(),
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

async fn run_event_loop(
    ctx: WatchContext,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    // Stability waits in flight; dropping the set aborts them and releases their admissions.
    let mut pending = JoinSet::new();

    loop {
        tokio::select! {
            raw = raw_rx.recv() => match raw {
                Some(Ok(event)) => ctx.dispatch(event, &mut pending),
                Some(Err(e)) => ctx.report_error(e).await,
                None => break,
            },
            Some(joined) = pending.join_next(), if !pending.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Stability wait panicked");
                    }
                }
            }
        }
    }

    tracing::debug!("File watcher event loop finished");
}

fn classify(kind: &EventKind) -> Vec<Signal> {
    match kind {
        EventKind::Create(_) => vec![Signal::Added],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![Signal::Added],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![Signal::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![Signal::Removed, Signal::Added]
        }
        // One-ended renames (FSEvents) are resolved per path in `signals`.
        EventKind::Modify(ModifyKind::Name(_)) => Vec::new(),
        EventKind::Modify(_) => vec![Signal::Changed],
        EventKind::Remove(_) => vec![Signal::Removed],
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Pair each path of a notify event with the signal it represents.
fn signals(event: &Event) -> Vec<(Signal, PathBuf)> {
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) = event.kind {
        // Only one end is reported; whether it still exists tells which.
        return event
            .paths
            .iter()
            .map(|p| {
                let signal = if p.exists() { Signal::Added } else { Signal::Removed };
                (signal, p.clone())
            })
            .collect();
    }

    let kinds = classify(&event.kind);
    if kinds.len() == 2 && event.paths.len() == 2 {
        // Rename with both ends: paths are [from, to].
        return kinds.into_iter().zip(event.paths.iter().cloned()).collect();
    }
    match kinds.first() {
        Some(signal) => event.paths.iter().map(|p| (*signal, p.clone())).collect(),
        None => Vec::new(),
    }
}

/// True if any component below `root` starts with a dot.
fn is_hidden(root: &Path, path: &Path) -> bool {
    let dotted = |name: &std::ffi::OsStr| name.to_string_lossy().starts_with('.');
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .any(|c| matches!(c, Component::Normal(name) if dotted(name))),
        Err(_) => path.file_name().map(dotted).unwrap_or(false),
    }
}

impl WatchContext {
    fn is_eligible(&self, path: &Path) -> bool {
        !is_hidden(&self.root, path) && self.config.is_image_file(path)
    }

    fn dispatch(&self, event: Event, pending: &mut JoinSet<bool>) {
        for (signal, path) in signals(&event) {
            match signal {
                Signal::Added => self.on_added(path, pending),
                Signal::Changed => self.on_changed(&path),
                Signal::Removed => self.on_removed(path),
            }
        }
    }

    fn on_added(&self, path: PathBuf, pending: &mut JoinSet<bool>) {
        if !self.is_eligible(&path) {
            tracing::trace!(path = %path.display(), "Ignoring non-image or hidden file");
            return;
        }
        if path.is_dir() {
            return;
        }

        match self.dedup.try_admit(&path) {
            Some(guard) => {
                tracing::info!(file = %display_name(&path), "New image detected");
                let ctx = self.clone();
                pending.spawn(async move { ctx.settle(guard).await });
            }
            None => {
                tracing::debug!(file = %display_name(&path), "Already in flight, skipping");
            }
        }
    }

    fn on_changed(&self, path: &Path) {
        if self.is_eligible(path) {
            tracing::trace!(
                file = %display_name(path),
                in_flight = self.dedup.is_in_flight(path),
                "Image changed"
            );
        }
    }

    fn on_removed(&self, path: PathBuf) {
        if !self.is_eligible(&path) {
            return;
        }
        // A held admission stays until its owner finishes. The stability
        // wait notices the removal on its own.
        tracing::debug!(
            file = %display_name(&path),
            in_flight = self.dedup.is_in_flight(&path),
            "Image removed"
        );

        let out = self.out.clone();
        // Removal notices are advisory; never block the event loop on them.
        if let Err(e) = out.try_send(WatchEvent::Removed { path }) {
            tracing::debug!(error = %e, "Dropped removal notice");
        }
    }

    async fn report_error(&self, err: notify::Error) {
        tracing::error!(error = %err, "File watcher error");
        let event = WatchEvent::Error(AppError::service("file watcher error").with_source(err));
        if self.out.send(event).await.is_err() {
            tracing::debug!("Watch event receiver closed");
        }
    }

    /// Wait for the file to finish writing, then hand it to the pipeline.
    /// Returns whether an event was emitted.
    async fn settle(self, guard: AdmissionGuard) -> bool {
        let path = guard.path().to_path_buf();
        metrics::counter!("pipeline_files_detected_total").increment(1);

        match self.gate.await_stable(&path).await {
            Ok(Stability::Vanished) => {
                tracing::warn!(file = %display_name(&path), "File removed before it finished writing, skipping");
                false
            }
            Ok(outcome) => {
                tracing::debug!(file = %display_name(&path), ?outcome, "Image ready for processing");
                let event = WatchEvent::Detected(DetectedEvent::new(guard));
                match self.out.send(event).await {
                    Ok(()) => true,
                    Err(_) => {
                        tracing::debug!(file = %display_name(&path), "Pipeline closed, dropping detection");
                        false
                    }
                }
            }
            Err(e) => {
                tracing::warn!(file = %display_name(&path), error = %e.detail(), "Stability check failed");
                false
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_hidden_components_relative_to_root() {
        let root = Path::new("/home/u/.config/watch");
        assert!(!is_hidden(root, Path::new("/home/u/.config/watch/shot.png")));
        assert!(is_hidden(root, Path::new("/home/u/.config/watch/.tmp.png")));
        assert!(is_hidden(root, Path::new("/home/u/.config/watch/.cache/a.png")));
        assert!(!is_hidden(root, Path::new("/home/u/.config/watch/sub/a.png")));
    }

    #[test]
    fn test_create_maps_to_added() {
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path("/w/a.png".into());
        assert_eq!(signals(&event), vec![(Signal::Added, PathBuf::from("/w/a.png"))]);
    }

    #[test]
    fn test_rename_both_maps_from_and_to() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/w/.tmp-shot.png".into())
            .add_path("/w/shot.png".into());
        assert_eq!(
            signals(&event),
            vec![
                (Signal::Removed, PathBuf::from("/w/.tmp-shot.png")),
                (Signal::Added, PathBuf::from("/w/shot.png")),
            ]
        );
    }

    #[test]
    fn test_one_ended_rename_resolved_by_existence() {
        let dir = tempfile::tempdir().unwrap();
        let arrived = dir.path().join("Screenshot 2026.png");
        std::fs::write(&arrived, b"0123456789").unwrap();

        let into = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(arrived.clone());
        assert_eq!(signals(&into), vec![(Signal::Added, arrived)]);

        let gone = dir.path().join("moved-away.png");
        let away = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(gone.clone());
        assert_eq!(signals(&away), vec![(Signal::Removed, gone)]);
    }

    #[test]
    fn test_data_change_and_remove() {
        let change = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/w/a.png".into());
        assert_eq!(signals(&change)[0].0, Signal::Changed);

        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/w/a.png".into());
        assert_eq!(signals(&remove)[0].0, Signal::Removed);
    }

    #[test]
    fn test_access_ignored() {
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path("/w/a.png".into());
        assert!(signals(&event).is_empty());
    }

    fn context(out: mpsc::Sender<WatchEvent>) -> WatchContext {
        WatchContext {
            root: PathBuf::from("/w"),
            config: Arc::new(AppConfig::default()),
            dedup: WatchDeduplicator::new(),
            gate: StabilityGate::default(),
            out,
        }
    }

    #[tokio::test]
    async fn test_remove_keeps_held_admission() {
        let (out, mut rx) = mpsc::channel(4);
        let ctx = context(out);
        let path = PathBuf::from("/w/shot.png");
        let guard = ctx.dedup.try_admit(&path).unwrap();

        ctx.on_removed(path.clone());
        assert!(ctx.dedup.is_in_flight(&path));
        assert!(ctx.dedup.try_admit(&path).is_none());
        assert!(matches!(rx.recv().await, Some(WatchEvent::Removed { path: p }) if p == path));

        drop(guard);
        assert!(ctx.dedup.is_empty());
    }

    #[tokio::test]
    async fn test_watch_errors_are_forwarded() {
        let (out, mut rx) = mpsc::channel(4);
        let ctx = context(out);

        ctx.report_error(notify::Error::generic("inotify queue overflow")).await;

        match rx.recv().await {
            Some(WatchEvent::Error(err)) => {
                assert_eq!(err.kind(), crate::error::ErrorKind::Service);
                assert!(err.detail().contains("inotify queue overflow"));
            }
            other => panic!("expected a watch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_missing_folder_is_file_error() {
        let config = Arc::new(AppConfig::default());
        let mut watcher = FileWatcher::new(config);
        let err = watcher
            .start(Path::new("/definitely/not/here/answer-tips"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::File);
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FileWatcher::new(Arc::new(AppConfig::default()));
        let _rx = watcher.start(dir.path()).unwrap();
        assert!(watcher.status().is_running);
        watcher.stop();
        watcher.stop();
        assert!(!watcher.status().is_running);
        assert_eq!(watcher.status().in_flight, 0);
    }
}

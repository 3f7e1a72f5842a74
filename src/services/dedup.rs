use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Set of paths currently inside their admission window.
///
/// `try_admit` is the only way into the pipeline. The returned guard releases
/// the path when dropped, so every exit path (success, failure, vanished file,
/// panic, task abort) gives the slot back exactly once.
#[derive(Debug, Clone, Default)]
pub struct WatchDeduplicator {
    inner: Arc<Mutex<InFlight>>,
}

#[derive(Debug, Default)]
struct InFlight {
    paths: HashMap<PathBuf, u64>,
    next_generation: u64,
}

impl WatchDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InFlight> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit `path` unless it is already in flight. Competing admissions are
    /// rejected, not queued.
    pub fn try_admit(&self, path: &Path) -> Option<AdmissionGuard> {
        let mut set = self.lock();
        if set.paths.contains_key(path) {
            return None;
        }
        set.next_generation += 1;
        let generation = set.next_generation;
        set.paths.insert(path.to_path_buf(), generation);
        metrics::gauge!("pipeline_in_flight").set(set.paths.len() as f64);

        Some(AdmissionGuard {
            owner: self.clone(),
            path: path.to_path_buf(),
            generation,
            released: false,
        })
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.lock().paths.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every in-flight path.
    pub fn clear(&self) {
        let mut set = self.lock();
        set.paths.clear();
        metrics::gauge!("pipeline_in_flight").set(0.0);
    }

    fn release(&self, path: &Path, generation: u64) {
        let mut set = self.lock();
        // Only the admission that inserted this entry may remove it.
        if set.paths.get(path) == Some(&generation) {
            set.paths.remove(path);
            tracing::trace!(path = %path.display(), "Released admission");
        }
        metrics::gauge!("pipeline_in_flight").set(set.paths.len() as f64);
    }
}

/// Scoped hold on an in-flight path.
#[derive(Debug)]
pub struct AdmissionGuard {
    owner: WatchDeduplicator,
    path: PathBuf,
    generation: u64,
    released: bool,
}

impl AdmissionGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now instead of at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.owner.release(&self.path, self.generation);
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

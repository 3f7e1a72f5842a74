use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::services::dedup::AdmissionGuard;

/// Messages produced by the file watcher for the pipeline dispatcher.
#[derive(Debug)]
pub enum WatchEvent {
    /// A new image finished writing and holds an admission slot.
    Detected(DetectedEvent),
    /// An eligible image was deleted or renamed away.
    Removed { path: PathBuf },
    /// The filesystem subscription reported an error. Watching continues.
    Error(AppError),
}

/// A file admitted to the pipeline.
///
/// Owns the admission slot for its path; dropping the event releases it.
#[derive(Debug)]
pub struct DetectedEvent {
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
    admission: AdmissionGuard,
}

impl DetectedEvent {
    pub fn new(admission: AdmissionGuard) -> Self {
        Self {
            path: admission.path().to_path_buf(),
            detected_at: Utc::now(),
            admission,
        }
    }

    /// Release the admission slot explicitly.
    pub fn complete(self) {
        self.admission.release();
    }
}

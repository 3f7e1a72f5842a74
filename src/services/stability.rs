use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::config::AppConfig;
use crate::error::AppError;

/// Outcome of waiting for a file to stop growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Size held steady for the required number of polls.
    Stable { size: u64 },
    /// The path disappeared while we were waiting.
    Vanished,
    /// Ran out of time. Treated as good enough to proceed.
    TimedOut { size: u64 },
}

/// Decides when a newly created file has finished being written.
///
/// Create events fire as soon as a writer opens the file, so the size is
/// polled until it stops changing.
#[derive(Debug, Clone)]
pub struct StabilityGate {
    poll_interval: Duration,
    threshold: u32,
    max_wait: Duration,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 3, Duration::from_secs(5))
    }
}

impl StabilityGate {
    pub fn new(poll_interval: Duration, threshold: u32, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            threshold: threshold.max(1),
            max_wait,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Duration::from_millis(config.stability_poll_ms),
            config.stability_threshold,
            Duration::from_millis(config.stability_max_wait_ms),
        )
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Poll `path` until its size is unchanged for `threshold` consecutive polls.
    ///
    /// Errors other than "not found" are returned as [`AppError::File`].
    pub async fn await_stable(&self, path: &Path) -> Result<Stability, AppError> {
        let start = Instant::now();
        let mut last_size: Option<u64> = None;
        let mut unchanged = 0u32;

        while start.elapsed() < self.max_wait {
            let size = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "File vanished during stability wait");
                    return Ok(Stability::Vanished);
                }
                Err(e) => {
                    return Err(AppError::file(format!(
                        "failed to stat {} while waiting for write to finish",
                        path.display()
                    ))
                    .with_source(e))
                }
            };

            if last_size == Some(size) {
                unchanged += 1;
                if unchanged >= self.threshold {
                    tracing::debug!(
                        path = %path.display(),
                        size,
                        wait_ms = start.elapsed().as_millis() as u64,
                        "File size stable"
                    );
                    return Ok(Stability::Stable { size });
                }
            } else {
                unchanged = 0;
                last_size = Some(size);
            }

            sleep(self.poll_interval).await;
        }

        // One last look so a file deleted during the final sleep is not reported as stable.
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                tracing::debug!(
                    path = %path.display(),
                    size = meta.len(),
                    wait_ms = start.elapsed().as_millis() as u64,
                    "Stability wait timed out, proceeding"
                );
                Ok(Stability::TimedOut { size: meta.len() })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Stability::Vanished),
            Err(e) => Err(AppError::file(format!("failed to stat {}", path.display())).with_source(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_unchanged_file_reports_stable_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"0123456789").unwrap();

        let gate = StabilityGate::default();
        let start = std::time::Instant::now();
        let outcome = gate.await_stable(&path).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome, Stability::Stable { size: 10 });
        assert!(elapsed >= Duration::from_millis(1500), "stable too early: {elapsed:?}");
        assert!(elapsed < gate.max_wait());
    }

    #[tokio::test]
    async fn test_missing_file_reports_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let gate = StabilityGate::new(Duration::from_millis(20), 3, Duration::from_secs(1));
        let outcome = gate.await_stable(&dir.path().join("gone.png")).await.unwrap();
        assert_eq!(outcome, Stability::Vanished);
    }

    #[tokio::test]
    async fn test_deleted_mid_wait_reports_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"abc").unwrap();

        let gate = StabilityGate::new(Duration::from_millis(50), 10, Duration::from_secs(2));
        let remove_path = path.clone();
        let remover = tokio::spawn(async move {
            sleep(Duration::from_millis(120)).await;
            std::fs::remove_file(remove_path).unwrap();
        });

        let outcome = gate.await_stable(&path).await.unwrap();
        remover.await.unwrap();
        assert_eq!(outcome, Stability::Vanished);
    }

    #[tokio::test]
    async fn test_growing_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        std::fs::write(&path, b"x").unwrap();

        let gate = StabilityGate::new(Duration::from_millis(20), 3, Duration::from_millis(300));
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..40 {
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                file.write_all(b"more").unwrap();
                sleep(Duration::from_millis(10)).await;
            }
        });

        let outcome = gate.await_stable(&path).await.unwrap();
        writer.await.unwrap();
        assert!(matches!(outcome, Stability::TimedOut { .. }), "got {outcome:?}");
    }
}

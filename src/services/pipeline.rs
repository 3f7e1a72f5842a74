use std::path::Path;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::event::{DetectedEvent, WatchEvent};
use crate::models::record::{NewRecord, ProcessingRecord, RecordPatch, RecordStatus};
use crate::services::notification::{notify_best_effort, Notification};

/// Drives each detected image through OCR, the LLM stage and a terminal status.
///
/// Stage failures are recorded on the image's record and never propagate to
/// the watcher. Distinct files are processed concurrently on separate tasks.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    state: AppState,
}

impl PipelineOrchestrator {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Consume watcher events until the channel closes, spawning one task per
    /// detected file. Waits for in-flight files before returning.
    pub async fn run(self, mut events: mpsc::Receiver<WatchEvent>) {
        let mut in_flight = JoinSet::new();

        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Detected(detected) => {
                    let this = self.clone();
                    in_flight.spawn(async move { this.on_detected(detected).await });
                }
                WatchEvent::Removed { path } => {
                    tracing::debug!(path = %path.display(), "Image removed from watch folder");
                }
                WatchEvent::Error(err) => {
                    tracing::error!(error = %err.detail(), kind = %err.kind(), "Watcher reported an error");
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(joined);
            }
        }

        tracing::info!(pending = in_flight.len(), "Watch events closed, draining pipeline");
        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }
    }

    /// Process one detected file. Releases the file's admission when done,
    /// whatever the outcome. Returns the final record, or `None` if the file
    /// was gone before a record could be created.
    pub async fn on_detected(&self, event: DetectedEvent) -> Option<ProcessingRecord> {
        let path = event.path.clone();
        tracing::info!(file = %file_name(&path), detected_at = %event.detected_at, "Processing image");

        let outcome = self.process(&path).await;

        // The admission guard would release on drop as well, including on unwind.
        event.complete();
        outcome
    }

    async fn process(&self, path: &Path) -> Option<ProcessingRecord> {
        if let Err(e) = tokio::fs::File::open(path).await {
            let err = AppError::file(format!("{} is no longer readable", path.display())).with_source(e);
            tracing::warn!(error = %err.detail(), "Skipping image");
            return None;
        }

        let record = self.state.ledger.add(NewRecord::processing(path));
        let id = record.id;

        tracing::info!(record_id = %id, file = %file_name(path), "Starting OCR");
        let started = Instant::now();
        let ocr_result = self.state.ocr.recognize_text(path).await;
        metrics::histogram!("pipeline_ocr_seconds").record(started.elapsed().as_secs_f64());

        let text = match ocr_result {
            Ok(Some(text)) => {
                tracing::info!(record_id = %id, text_len = text.len(), "OCR recognised text");
                self.commit(id, RecordPatch::ocr_completed(text.clone()))?;
                text
            }
            Ok(None) => {
                tracing::warn!(record_id = %id, file = %file_name(path), "OCR found no text, skipping LLM stage");
                let record = self.commit(id, RecordPatch::completed(None))?;
                return Some(self.finish(record).await);
            }
            Err(e) => {
                let err = AppError::from(e);
                tracing::error!(record_id = %id, error = %err.detail(), "OCR failed");
                let record = self.commit(id, RecordPatch::ocr_failed(err.detail()))?;
                return Some(self.finish(record).await);
            }
        };

        tracing::info!(record_id = %id, "Starting LLM processing");
        let started = Instant::now();
        let llm_result = self.state.llm.process_text(&text).await;
        metrics::histogram!("pipeline_llm_seconds").record(started.elapsed().as_secs_f64());

        let record = match llm_result {
            Ok(result) => {
                tracing::info!(record_id = %id, result_len = result.len(), "LLM processing complete");
                self.commit(id, RecordPatch::completed(Some(result)))?
            }
            Err(e) => {
                let err = AppError::from(e);
                tracing::error!(record_id = %id, error = %err.detail(), "LLM processing failed");
                self.commit(id, RecordPatch::failed(err.detail()))?
            }
        };

        Some(self.finish(record).await)
    }

    /// Apply a patch. A rejected patch (e.g. the record was evicted) halts the
    /// file's pipeline so no later stage runs on an uncommitted result.
    fn commit(&self, id: Uuid, patch: RecordPatch) -> Option<ProcessingRecord> {
        match self.state.ledger.update(id, patch) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(record_id = %id, error = %e, "Record update rejected, abandoning file");
                None
            }
        }
    }

    async fn finish(&self, record: ProcessingRecord) -> ProcessingRecord {
        match record.status {
            RecordStatus::Completed => {
                metrics::counter!("pipeline_records_completed_total").increment(1);
                self.state.ledger.log_summary(&record);
            }
            RecordStatus::OcrFailed => {
                metrics::counter!("pipeline_records_failed_total", "stage" => "ocr").increment(1);
            }
            RecordStatus::Failed => {
                metrics::counter!("pipeline_records_failed_total", "stage" => "llm").increment(1);
            }
            RecordStatus::Processing | RecordStatus::OcrCompleted => {}
        }

        let notification = Notification::for_record(&record);
        notify_best_effort(self.state.notifier.as_ref(), &notification).await;
        record
    }
}

fn log_join_error(joined: Result<Option<ProcessingRecord>, tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Pipeline task panicked");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

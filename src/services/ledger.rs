use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::record::{NewRecord, ProcessingRecord, RecordPatch, RecordStatus};

/// Default number of records kept in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Width of the "recent" statistics window.
const RECENT_WINDOW_MINUTES: i64 = 60;

/// Bounded, insertion-ordered store of processing records.
///
/// Oldest records are evicted first once `capacity` is reached. All access goes
/// through a single mutex that is never held across an await point.
#[derive(Debug)]
pub struct ResultLedger {
    records: Mutex<VecDeque<ProcessingRecord>>,
    capacity: usize,
}

/// Filter for [`ResultLedger::list`].
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<RecordStatus>,
    /// Keep records created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Keep only the newest `limit` matches (still oldest-first).
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total: usize,
    pub completed: usize,
    /// `failed` plus `ocr_failed`.
    pub failed: usize,
    /// Records that have not reached a terminal status.
    pub processing: usize,
    /// `completed / total` as a percentage with two decimals, or `"0%"`.
    pub success_rate: String,
    pub recent: RecentStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Serializable dump of the ledger contents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerExport {
    pub export_time: DateTime<Utc>,
    pub count: usize,
    pub results: Vec<ProcessingRecord>,
}

impl Default for ResultLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResultLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ProcessingRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a record, evicting the oldest one if the ledger is full.
    pub fn add(&self, new: NewRecord) -> ProcessingRecord {
        let now = Utc::now();
        let record = ProcessingRecord {
            id: Uuid::new_v4(),
            image_path: new.image_path,
            created_at: now,
            updated_at: now,
            ocr_text: None,
            llm_result: None,
            status: new.status,
            error: None,
        };

        let mut records = self.lock();
        if records.len() >= self.capacity {
            if let Some(evicted) = records.pop_front() {
                tracing::debug!(record_id = %evicted.id, "Evicted oldest record");
            }
        }
        records.push_back(record.clone());

        tracing::debug!(
            record_id = %record.id,
            status = %record.status,
            image_path = %record.image_path.display(),
            "Record added"
        );
        record
    }

    /// Apply `patch` to the record with `id`.
    ///
    /// Status changes must follow the allowed edges, `ocr_text` and
    /// `llm_result` may each be set once, and `error` only accompanies a
    /// failure status. A rejected patch leaves the record untouched.
    pub fn update(&self, id: Uuid, patch: RecordPatch) -> Result<ProcessingRecord, LedgerError> {
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(LedgerError::NotFound(id))?;

        let next_status = patch.status.unwrap_or(record.status);
        if let Some(to) = patch.status {
            if !record.status.can_transition_to(to) {
                return Err(LedgerError::InvalidTransition {
                    from: record.status,
                    to,
                });
            }
        }
        if patch.ocr_text.is_some() && record.ocr_text.is_some() {
            return Err(LedgerError::AlreadySet("ocr_text"));
        }
        if patch.llm_result.is_some() {
            if record.llm_result.is_some() {
                return Err(LedgerError::AlreadySet("llm_result"));
            }
            if next_status != RecordStatus::Completed {
                return Err(LedgerError::ResultWithoutCompletion);
            }
        }
        if patch.error.is_some() && !next_status.is_failure() {
            return Err(LedgerError::ErrorWithoutFailure(next_status));
        }

        if let Some(text) = patch.ocr_text {
            record.ocr_text = Some(text);
        }
        if let Some(result) = patch.llm_result {
            record.llm_result = Some(result);
        }
        if let Some(error) = patch.error {
            record.error = Some(error);
        }
        record.status = next_status;
        record.updated_at = Utc::now();

        tracing::debug!(record_id = %id, status = %record.status, "Record updated");
        Ok(record.clone())
    }

    pub fn get(&self, id: Uuid) -> Option<ProcessingRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Records matching `filter`, oldest first.
    pub fn list(&self, filter: &RecordFilter) -> Vec<ProcessingRecord> {
        let records = self.lock();
        let mut matches: Vec<ProcessingRecord> = records
            .iter()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.since.map_or(true, |since| r.created_at >= since))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            let skip = matches.len().saturating_sub(limit);
            matches.drain(..skip);
        }
        matches
    }

    /// The newest `count` records, newest first.
    pub fn recent(&self, count: usize) -> Vec<ProcessingRecord> {
        self.lock().iter().rev().take(count).cloned().collect()
    }

    pub fn failed(&self) -> Vec<ProcessingRecord> {
        self.lock()
            .iter()
            .filter(|r| r.status.is_failure())
            .cloned()
            .collect()
    }

    pub fn completed(&self) -> Vec<ProcessingRecord> {
        self.list(&RecordFilter {
            status: Some(RecordStatus::Completed),
            ..Default::default()
        })
    }

    pub fn stats(&self) -> LedgerStats {
        self.stats_at(Utc::now())
    }

    fn stats_at(&self, now: DateTime<Utc>) -> LedgerStats {
        let records = self.lock();
        let window_start = now - Duration::minutes(RECENT_WINDOW_MINUTES);

        let mut stats = LedgerStats {
            total: records.len(),
            completed: 0,
            failed: 0,
            processing: 0,
            success_rate: String::new(),
            recent: RecentStats {
                total: 0,
                completed: 0,
                failed: 0,
            },
        };

        for record in records.iter() {
            let recent = record.created_at >= window_start;
            if recent {
                stats.recent.total += 1;
            }
            match record.status {
                RecordStatus::Completed => {
                    stats.completed += 1;
                    if recent {
                        stats.recent.completed += 1;
                    }
                }
                RecordStatus::Failed | RecordStatus::OcrFailed => {
                    stats.failed += 1;
                    if recent {
                        stats.recent.failed += 1;
                    }
                }
                RecordStatus::Processing | RecordStatus::OcrCompleted => stats.processing += 1,
            }
        }

        stats.success_rate = success_rate(stats.completed, stats.total);
        stats
    }

    /// Remove every record, or only those created before `older_than`.
    /// Returns how many were removed.
    pub fn clear(&self, older_than: Option<DateTime<Utc>>) -> usize {
        let mut records = self.lock();
        let before = records.len();
        match older_than {
            Some(cutoff) => records.retain(|r| r.created_at >= cutoff),
            None => records.clear(),
        }
        let cleared = before - records.len();
        tracing::info!(cleared, remaining = records.len(), "Cleared processing records");
        cleared
    }

    pub fn export(&self, filter: &RecordFilter) -> LedgerExport {
        let results = self.list(filter);
        LedgerExport {
            export_time: Utc::now(),
            count: results.len(),
            results,
        }
    }

    /// Log a human-readable summary of `record`.
    pub fn log_summary(&self, record: &ProcessingRecord) {
        tracing::info!(
            record_id = %record.id,
            created_at = %record.created_at.to_rfc3339(),
            image_path = %record.image_path.display(),
            ocr_text = record.ocr_text.as_deref().unwrap_or("-"),
            llm_result = record.llm_result.as_deref().unwrap_or("-"),
            status = %record.status,
            error = record.error.as_deref().unwrap_or("-"),
            "📊 Processing result"
        );
    }
}

/// `completed / total` rendered as e.g. `"66.67%"`; `"0%"` for an empty ledger.
pub fn success_rate(completed: usize, total: usize) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.2}%", completed as f64 / total as f64 * 100.0)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LedgerError {
    #[error("record {0} not found")]
    NotFound(Uuid),

    #[error("status cannot move from {from} to {to}")]
    InvalidTransition { from: RecordStatus, to: RecordStatus },

    #[error("{0} is already set")]
    AlreadySet(&'static str),

    #[error("llm_result requires status completed")]
    ResultWithoutCompletion,

    #[error("error detail requires a failure status, got {0}")]
    ErrorWithoutFailure(RecordStatus),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::service("result ledger rejected update").with_source(err)
    }
}

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a detected image as it moves through OCR and the LLM stage.
///
/// Allowed edges:
///
/// ```text
/// processing ──► ocr_completed ──► completed
///     │                 └────────► failed
///     ├────────► ocr_failed
///     └────────► completed          (no text found, LLM skipped)
/// ```
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordStatus {
    Processing,
    OcrCompleted,
    OcrFailed,
    Completed,
    Failed,
}

impl RecordStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OcrFailed | Self::Completed | Self::Failed)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::OcrFailed | Self::Failed)
    }

    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        use RecordStatus::*;
        matches!(
            (self, next),
            (Processing, OcrCompleted)
                | (Processing, OcrFailed)
                | (Processing, Completed)
                | (OcrCompleted, Completed)
                | (OcrCompleted, Failed)
        )
    }
}

/// One processing attempt for a detected image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub id: Uuid,
    pub image_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ocr_text: Option<String>,
    pub llm_result: Option<String>,
    pub status: RecordStatus,
    pub error: Option<String>,
}

impl ProcessingRecord {
    pub fn file_name(&self) -> String {
        self.image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.image_path.display().to_string())
    }
}

/// Initial contents of a record. Identity and timestamps are assigned by the ledger.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub image_path: PathBuf,
    pub status: RecordStatus,
}

impl NewRecord {
    pub fn processing(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            status: RecordStatus::Processing,
        }
    }
}

/// Partial update applied to an existing record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<RecordStatus>,
    pub ocr_text: Option<String>,
    pub llm_result: Option<String>,
    pub error: Option<String>,
}

impl RecordPatch {
    pub fn ocr_completed(text: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::OcrCompleted),
            ocr_text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn ocr_failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::OcrFailed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn completed(llm_result: Option<String>) -> Self {
        Self {
            status: Some(RecordStatus::Completed),
            llm_result,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ALL: [RecordStatus; 5] = [
        RecordStatus::Processing,
        RecordStatus::OcrCompleted,
        RecordStatus::OcrFailed,
        RecordStatus::Completed,
        RecordStatus::Failed,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().copied().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_no_backward_edges() {
        assert!(!RecordStatus::OcrCompleted.can_transition_to(RecordStatus::Processing));
        assert!(!RecordStatus::Processing.can_transition_to(RecordStatus::Processing));
        assert!(!RecordStatus::Processing.can_transition_to(RecordStatus::Failed));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(RecordStatus::OcrCompleted.to_string(), "ocr_completed");
        assert_eq!(RecordStatus::from_str("ocr_failed").unwrap(), RecordStatus::OcrFailed);
        assert_eq!(
            serde_json::to_string(&RecordStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}

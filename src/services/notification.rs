use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::models::record::{ProcessingRecord, RecordStatus};
use crate::services::ledger::LedgerStats;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_MESSAGE_CHARS: usize = 200;

/// A message for the user's desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub sound: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            sound: None,
        }
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    /// Summary of a record that reached a terminal status.
    pub fn for_record(record: &ProcessingRecord) -> Self {
        let file = record.file_name();
        let (title, message) = match (record.status, &record.llm_result, &record.ocr_text) {
            (RecordStatus::Completed, Some(result), _) => {
                (format!("✅ Done - {file}"), truncate(result, MAX_MESSAGE_CHARS))
            }
            (RecordStatus::Completed, None, Some(text)) => {
                (format!("📝 OCR done - {file}"), truncate(text, MAX_MESSAGE_CHARS))
            }
            (RecordStatus::Completed, None, None) => {
                (format!("📝 OCR done - {file}"), "No text found in image".to_string())
            }
            (status, _, _) if status.is_failure() => (
                format!("❌ Failed - {file}"),
                truncate(
                    record.error.as_deref().unwrap_or("Unknown error"),
                    MAX_MESSAGE_CHARS,
                ),
            ),
            _ => (format!("🔄 Processing - {file}"), "Processing image...".to_string()),
        };

        let sound = if record.status == RecordStatus::Completed {
            "Glass"
        } else {
            "Basso"
        };
        Self::new(title, message).with_sound(sound)
    }

    pub fn error(message: &str, context: Option<&str>) -> Self {
        let title = match context {
            Some(ctx) if !ctx.is_empty() => format!("❌ Error - {ctx}"),
            _ => "❌ Error".to_string(),
        };
        Self::new(title, truncate(message, MAX_MESSAGE_CHARS)).with_sound("Basso")
    }

    pub fn welcome(watch_folder: &str) -> Self {
        Self::new(
            "🚀 AnswerTips started",
            format!("Watching {watch_folder} for new images..."),
        )
        .with_sound("Glass")
    }

    pub fn stats(stats: &LedgerStats) -> Self {
        Self::new(
            "📊 Processing stats",
            format!(
                "Total: {} | Completed: {} | Failed: {} | Success rate: {}",
                stats.total, stats.completed, stats.failed, stats.success_rate
            ),
        )
        .with_sound("Ping")
    }
}

/// Truncate to `max` characters, ending with `...` when shortened.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Sink for user-facing notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Deliver a notification, logging instead of failing when nothing can show it.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: &Notification) -> bool {
    match notifier.notify(notification).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(title = %notification.title, error = %e, "Notification not delivered");
            false
        }
    }
}

/// Shows notifications through whatever the desktop offers, falling back to the log.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

#[derive(Debug, Clone, Copy)]
enum Method {
    AppleScript,
    TerminalNotifier,
    NotifySend,
}

impl Method {
    const ALL: [Method; 3] = [Method::AppleScript, Method::TerminalNotifier, Method::NotifySend];

    fn program(self) -> &'static str {
        match self {
            Method::AppleScript => "osascript",
            Method::TerminalNotifier => "terminal-notifier",
            Method::NotifySend => "notify-send",
        }
    }

    fn command(self, n: &Notification) -> Command {
        let mut cmd = Command::new(self.program());
        match self {
            Method::AppleScript => {
                cmd.arg("-e").arg(apple_script(n));
            }
            Method::TerminalNotifier => {
                cmd.args(["-title", n.title.as_str(), "-message", n.message.as_str()]);
                if let Some(sound) = &n.sound {
                    cmd.args(["-sound", sound.as_str()]);
                }
            }
            Method::NotifySend => {
                cmd.arg(&n.title).arg(&n.message);
            }
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

fn escape_apple(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn apple_script(n: &Notification) -> String {
    let mut script = format!(
        "display notification \"{}\" with title \"{}\"",
        escape_apple(&n.message),
        escape_apple(&n.title)
    );
    if let Some(sound) = &n.sound {
        script.push_str(&format!(" sound name \"{}\"", escape_apple(sound)));
    }
    script
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self
    }

    /// True when at least one desktop notification command is installed.
    pub async fn check_availability(&self) -> bool {
        for method in Method::ALL {
            let mut probe = Command::new("which");
            probe.arg(method.program()).kill_on_drop(true);
            if let Ok(Ok(output)) = tokio::time::timeout(Duration::from_secs(2), probe.output()).await {
                if output.status.success() {
                    tracing::info!(program = method.program(), "Desktop notifications available");
                    return true;
                }
            }
        }
        tracing::warn!("No desktop notification command found, falling back to log output");
        false
    }

    async fn run(method: Method, n: &Notification) -> Result<(), NotifyError> {
        let output = tokio::time::timeout(COMMAND_TIMEOUT, method.command(n).output())
            .await
            .map_err(|_| NotifyError::Timeout(method.program()))?
            .map_err(|e| NotifyError::Spawn(method.program(), e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(NotifyError::Failed(method.program(), output.status.code()))
        }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        for method in Method::ALL {
            match Self::run(method, n).await {
                Ok(()) => {
                    tracing::debug!(title = %n.title, program = method.program(), "Notification shown");
                    return Ok(());
                }
                Err(e) => tracing::debug!(error = %e, "Notification method failed, trying next"),
            }
        }

        // Console fallback always succeeds.
        tracing::info!(title = %n.title, message = %n.message, "🔔 Notification");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("failed to start {0}: {1}")]
    Spawn(&'static str, #[source] std::io::Error),

    #[error("{0} exited with status {1:?}")]
    Failed(&'static str, Option<i32>),

    #[error("notification sink unavailable")]
    Unavailable,
}

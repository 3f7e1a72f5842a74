//! Shared fixtures for the pipeline and watcher tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use answer_tips::{
    app_state::AppState,
    config::AppConfig,
    services::{
        ledger::ResultLedger,
        llm::LlmClient,
        notification::{Notification, Notifier, NotifyError},
        ocr::OcrClient,
    },
};
use async_trait::async_trait;
use tokio::net::TcpListener;

pub const OCR_PATH: &str = "/api/v1/ocr";
pub const LLM_PATH: &str = "/v1/workflows/run";

/// Keeps every notification it is asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Always fails, like a desktop with no notification daemon.
pub struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable)
    }
}

pub fn test_config(watch_folder: &Path, ocr_base: &str, llm_base: &str) -> AppConfig {
    AppConfig {
        watch_folder: watch_folder.display().to_string(),
        ocr_api_url: format!("{ocr_base}{OCR_PATH}"),
        health_check_url: format!("{ocr_base}/health"),
        local_llm_url: format!("{llm_base}{LLM_PATH}"),
        ocr_timeout_ms: 2_000,
        llm_timeout_ms: 2_000,
        stability_poll_ms: 50,
        stability_threshold: 2,
        stability_max_wait_ms: 2_000,
        ..AppConfig::default()
    }
}

pub fn test_state(config: AppConfig, notifier: Arc<dyn Notifier>) -> AppState {
    AppState::from_config(config, notifier)
}

/// State whose LLM client gives up after `llm_timeout`.
pub fn test_state_with_llm_timeout(
    config: AppConfig,
    llm_timeout: Duration,
    notifier: Arc<dyn Notifier>,
) -> AppState {
    let ocr = OcrClient::from_config(&config);
    let llm = LlmClient::new(&config.local_llm_url, None, llm_timeout);
    AppState::new(config, ocr, llm, notifier)
}

/// A server that accepts connections and never answers.
pub async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

/// Write a small fake image and return its canonical path.
pub fn write_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"0123456789").unwrap();
    std::fs::canonicalize(path).unwrap()
}

/// Poll the ledger until `done` holds or the deadline passes.
pub async fn wait_for<F>(ledger: &ResultLedger, timeout: Duration, done: F) -> bool
where
    F: Fn(&ResultLedger) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if done(ledger) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    done(ledger)
}

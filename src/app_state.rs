use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    ledger::ResultLedger,
    llm::LlmClient,
    notification::Notifier,
    ocr::OcrClient,
};

/// Shared application state handed to the pipeline and its tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ledger: Arc<ResultLedger>,
    pub ocr: Arc<OcrClient>,
    pub llm: Arc<LlmClient>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        ocr: OcrClient,
        llm: LlmClient,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ledger = ResultLedger::new(config.ledger_capacity);
        Self {
            config: Arc::new(config),
            ledger: Arc::new(ledger),
            ocr: Arc::new(ocr),
            llm: Arc::new(llm),
            notifier,
        }
    }

    /// Build clients from the configuration.
    pub fn from_config(config: AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let ocr = OcrClient::from_config(&config);
        let llm = LlmClient::from_config(&config);
        Self::new(config, ocr, llm, notifier)
    }
}

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::error::AppError;

/// Environment variable naming an alternative JSON config file.
pub const CONFIG_PATH_ENV: &str = "ANSWER_TIPS_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Folder watched recursively for new images. `~` is expanded on load.
    #[garde(length(min = 1))]
    pub watch_folder: String,

    /// OCR upload endpoint (multipart, field `image`).
    #[garde(length(min = 1), url)]
    pub ocr_api_url: String,

    /// OCR service health endpoint.
    #[garde(length(min = 1), url)]
    pub health_check_url: String,

    /// Lowercase extensions with a leading dot.
    #[garde(length(min = 1))]
    pub supported_image_extensions: Vec<String>,

    /// Language hint passed to the OCR service.
    #[garde(length(min = 1))]
    pub language: String,

    #[garde(skip)]
    pub check_interval: u64,

    /// Declared for compatibility; the pipeline does not retry.
    #[garde(skip)]
    pub max_retries: u32,

    #[garde(skip)]
    pub retry_delay: u64,

    /// LLM workflow endpoint.
    #[serde(rename = "localLLMUrl")]
    #[garde(url)]
    pub local_llm_url: String,

    /// Optional bearer token for the LLM endpoint.
    #[serde(rename = "localLLMApiKey")]
    #[garde(skip)]
    pub local_llm_api_key: Option<String>,

    /// Dedicated LLM health endpoint; when absent a probe request is posted instead.
    #[garde(url)]
    pub llm_health_check_url: Option<String>,

    /// `user` field sent with every LLM request.
    #[garde(length(min = 1))]
    pub llm_user: String,

    /// Maximum number of records retained in memory.
    #[garde(range(min = 1))]
    pub ledger_capacity: usize,

    #[garde(range(min = 1))]
    pub stability_poll_ms: u64,

    /// Consecutive unchanged polls required before a file counts as written.
    #[garde(range(min = 1))]
    pub stability_threshold: u32,

    #[garde(range(min = 1))]
    pub stability_max_wait_ms: u64,

    #[garde(range(min = 1))]
    pub ocr_timeout_ms: u64,

    #[garde(range(min = 1))]
    pub llm_timeout_ms: u64,

    #[garde(range(min = 1))]
    pub health_check_timeout_ms: u64,

    #[garde(range(min = 1))]
    pub llm_health_check_timeout_ms: u64,

    #[garde(range(min = 1))]
    pub stats_interval_secs: u64,

    /// Prometheus scrape address (e.g. "127.0.0.1:9464"). Metrics stay local when unset.
    #[garde(skip)]
    pub metrics_bind_addr: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_folder: "~/Desktop".to_string(),
            ocr_api_url: "http://localhost:7321/api/v1/ocr".to_string(),
            health_check_url: "http://localhost:7321/health".to_string(),
            supported_image_extensions: [".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            language: "zh-CN".to_string(),
            check_interval: 1000,
            max_retries: 3,
            retry_delay: 2000,
            local_llm_url: "http://localhost/v1/workflows/run".to_string(),
            local_llm_api_key: None,
            llm_health_check_url: None,
            llm_user: "answer-tips-user".to_string(),
            ledger_capacity: 1000,
            stability_poll_ms: 500,
            stability_threshold: 3,
            stability_max_wait_ms: 5000,
            ocr_timeout_ms: 30_000,
            llm_timeout_ms: 60_000,
            health_check_timeout_ms: 5000,
            llm_health_check_timeout_ms: 10_000,
            stats_interval_secs: 30,
            metrics_bind_addr: None,
        }
    }
}

/// Individual keys that may be overridden from the environment.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    watch_folder: Option<String>,
    ocr_api_url: Option<String>,
    health_check_url: Option<String>,
    language: Option<String>,
    local_llm_url: Option<String>,
    local_llm_api_key: Option<String>,
    llm_health_check_url: Option<String>,
    metrics_bind_addr: Option<String>,
}

impl AppConfig {
    /// Load defaults, then `config.json` (or `$ANSWER_TIPS_CONFIG`), then
    /// environment overrides. The result is normalised and validated.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = Self::from_file(&path)?;
        let overrides: EnvOverrides = envy::from_env().map_err(|e| {
            AppError::config("failed to read environment overrides").with_source(e)
        })?;
        config.apply_overrides(overrides);
        config.finish()
    }

    /// Read a JSON config file, falling back to defaults if it does not exist.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("failed to read {}", path.display())).with_source(e)
        })?;
        Self::from_json(&raw)
    }

    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::config("failed to parse config file").with_source(e))
    }

    fn apply_overrides(&mut self, env: EnvOverrides) {
        let EnvOverrides {
            watch_folder,
            ocr_api_url,
            health_check_url,
            language,
            local_llm_url,
            local_llm_api_key,
            llm_health_check_url,
            metrics_bind_addr,
        } = env;

        override_key(&mut self.watch_folder, watch_folder, "watchFolder");
        override_key(&mut self.ocr_api_url, ocr_api_url, "ocrApiUrl");
        override_key(&mut self.health_check_url, health_check_url, "healthCheckUrl");
        override_key(&mut self.language, language, "language");
        override_key(&mut self.local_llm_url, local_llm_url, "localLLMUrl");
        if let Some(key) = local_llm_api_key.filter(|k| !k.is_empty()) {
            tracing::debug!("Environment override: localLLMApiKey");
            self.local_llm_api_key = Some(key);
        }
        if let Some(url) = llm_health_check_url.filter(|u| !u.is_empty()) {
            tracing::debug!(value = %url, "Environment override: llmHealthCheckUrl");
            self.llm_health_check_url = Some(url);
        }
        if let Some(addr) = metrics_bind_addr.filter(|a| !a.is_empty()) {
            tracing::debug!(value = %addr, "Environment override: metricsBindAddr");
            self.metrics_bind_addr = Some(addr);
        }
    }

    /// Normalise paths and extensions, then validate.
    pub fn finish(mut self) -> Result<Self, AppError> {
        self.watch_folder = expand_home(&self.watch_folder);
        self.supported_image_extensions = normalize_extensions(&self.supported_image_extensions);
        if self.local_llm_api_key.as_deref() == Some("") {
            self.local_llm_api_key = None;
        }

        self.validate()
            .map_err(|report| AppError::validation(report.to_string()))?;
        Ok(self)
    }

    pub fn watch_path(&self) -> PathBuf {
        PathBuf::from(&self.watch_folder)
    }

    /// True when `path` carries one of the configured image extensions.
    pub fn is_image_file(&self, path: &Path) -> bool {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_lowercase());
                self.supported_image_extensions.iter().any(|e| *e == dotted)
            }
            None => false,
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn llm_health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_health_check_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

fn override_key(slot: &mut String, value: Option<String>, key: &str) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        tracing::debug!(key, value = %value, "Environment override");
        *slot = value;
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> String {
    let Some(rest) = path.strip_prefix('~') else {
        return path.to_string();
    };
    match dirs::home_dir() {
        Some(home) => home
            .join(rest.trim_start_matches(['/', '\\']))
            .to_string_lossy()
            .into_owned(),
        None => path.to_string(),
    }
}

fn normalize_extensions(exts: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = exts
        .iter()
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty() && ext != ".")
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect();
    set.into_iter().collect()
}

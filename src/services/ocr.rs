use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::AppError;

/// Client for the text-recognition service.
pub struct OcrClient {
    http: Client,
    api_url: String,
    health_url: String,
    language: String,
    timeout: Duration,
    health_timeout: Duration,
}

#[derive(Deserialize)]
struct OcrResponse {
    data: Option<OcrData>,
}

#[derive(Deserialize)]
struct OcrData {
    text: Option<String>,
}

impl OcrClient {
    pub fn new(
        api_url: impl Into<String>,
        health_url: impl Into<String>,
        language: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: Client::new(),
            api_url: api_url.into(),
            health_url: health_url.into(),
            language: language.into(),
            timeout,
            health_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.ocr_api_url,
            &config.health_check_url,
            &config.language,
            config.ocr_timeout(),
        )
        .with_health_timeout(config.health_check_timeout())
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Upload an image and return the recognised text.
    ///
    /// `Ok(None)` means the service answered but found no text.
    pub async fn recognize_text(&self, image_path: &Path) -> Result<Option<String>, OcrError> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| OcrError::Read(image_path.display().to_string(), e))?;

        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mime = image_mime(&bytes, image_path);

        tracing::debug!(
            url = %self.api_url,
            language = %self.language,
            bytes = bytes.len(),
            mime,
            "Calling OCR API"
        );

        let part = Part::bytes(bytes).file_name(file_name).mime_str(mime)?;
        let form = Form::new().part("image", part);

        let response = self
            .http
            .post(&self.api_url)
            .query(&[("language", self.language.as_str())])
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OcrError::from_reqwest(e, self.timeout))?
            .error_for_status()?;

        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| OcrError::from_reqwest(e, self.timeout))?;

        Ok(body
            .data
            .and_then(|d| d.text)
            .filter(|text| !text.trim().is_empty()))
    }

    /// GET the health endpoint; any 2xx within the timeout counts as healthy.
    pub async fn check_health(&self) -> Result<(), OcrError> {
        self.http
            .get(&self.health_url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| OcrError::from_reqwest(e, self.health_timeout))?
            .error_for_status()?;
        Ok(())
    }
}

/// Best-effort content type from the file's magic bytes, then its extension.
fn image_mime(bytes: &[u8], path: &Path) -> &'static str {
    image::guess_format(bytes)
        .or_else(|_| image::ImageFormat::from_path(path))
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("failed to read image {0}: {1}")]
    Read(String, #[source] std::io::Error),

    #[error("OCR request timed out after {0:?}")]
    Timeout(Duration),

    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl OcrError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            OcrError::Timeout(timeout)
        } else {
            OcrError::Http(err)
        }
    }
}

impl From<OcrError> for AppError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::Read(..) => AppError::file("image could not be read for OCR").with_source(err),
            _ => AppError::service("OCR recognition failed").with_source(err),
        }
    }
}

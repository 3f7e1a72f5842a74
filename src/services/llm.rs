use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

/// Client for the LLM workflow endpoint that rewrites OCR text.
pub struct LlmClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    user: String,
    timeout: Duration,
    health_url: Option<String>,
    health_timeout: Duration,
}

#[derive(Serialize)]
struct WorkflowRequest<'a> {
    inputs: WorkflowInputs<'a>,
    response_mode: &'static str,
    user: &'a str,
}

#[derive(Serialize)]
struct WorkflowInputs<'a> {
    question: &'a str,
}

#[derive(Deserialize)]
struct WorkflowResponse {
    data: Option<WorkflowData>,
}

#[derive(Deserialize)]
struct WorkflowData {
    outputs: Option<WorkflowOutputs>,
}

#[derive(Deserialize)]
struct WorkflowOutputs {
    text: Option<String>,
}

impl LlmClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            api_key,
            user: "answer-tips-user".to_string(),
            timeout,
            health_url: None,
            health_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut client = Self::new(
            &config.local_llm_url,
            config.local_llm_api_key.clone(),
            config.llm_timeout(),
        )
        .with_user(&config.llm_user);
        client.health_url = config.llm_health_check_url.clone();
        client.health_timeout = config.llm_health_check_timeout();
        client
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send OCR text through the workflow and return its output text.
    pub async fn process_text(&self, text: &str) -> Result<String, LlmError> {
        if text.trim().is_empty() {
            return Err(LlmError::EmptyInput);
        }

        tracing::debug!(url = %self.url, text_len = text.len(), "Calling LLM workflow");

        let body = WorkflowRequest {
            inputs: WorkflowInputs { question: text },
            response_mode: "blocking",
            user: &self.user,
        };

        let response = self
            .authorize(self.http.post(&self.url))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(e, self.timeout))?
            .error_for_status()?;

        let parsed: WorkflowResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(e, self.timeout))?;

        parsed
            .data
            .and_then(|d| d.outputs)
            .and_then(|o| o.text)
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::MissingOutput)
    }

    /// Probe the service. Uses the dedicated health URL when configured,
    /// otherwise posts a tiny workflow request.
    pub async fn check_health(&self) -> Result<(), LlmError> {
        let request = match &self.health_url {
            Some(url) => self.http.get(url),
            None => self.authorize(self.http.post(&self.url)).json(&WorkflowRequest {
                inputs: WorkflowInputs { question: "test" },
                response_mode: "blocking",
                user: "health-check",
            }),
        };

        request
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(e, self.health_timeout))?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("input text is empty")]
    EmptyInput,

    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM response did not contain data.outputs.text")]
    MissingOutput,
}

impl LlmError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(timeout)
        } else {
            LlmError::Http(err)
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        AppError::service("LLM processing failed").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = WorkflowRequest {
            inputs: WorkflowInputs { question: "2+2?" },
            response_mode: "blocking",
            user: "answer-tips-user",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "inputs": {"question": "2+2?"},
                "response_mode": "blocking",
                "user": "answer-tips-user"
            })
        );
    }

    #[tokio::test]
    async fn test_empty_input_rejected_without_request() {
        let client = LlmClient::new("http://127.0.0.1:9/unused", None, Duration::from_secs(1));
        assert!(matches!(client.process_text("   ").await, Err(LlmError::EmptyInput)));
    }
}

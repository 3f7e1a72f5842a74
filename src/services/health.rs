use std::time::Instant;

use serde::Serialize;

use crate::app_state::AppState;
use crate::services::notification::DesktopNotifier;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub ocr: ComponentHealth,
    pub llm: ComponentHealth,
    pub notifications: bool,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>, start: Instant) -> Self {
        match result {
            Ok(()) => ComponentHealth {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Probe the OCR and LLM services and the notification sink.
///
/// Unhealthy components only produce warnings; startup continues regardless.
pub async fn check_services(state: &AppState, notifier: &DesktopNotifier) -> HealthReport {
    let ocr_start = Instant::now();
    let ocr = ComponentHealth::from_result(state.ocr.check_health().await, ocr_start);
    if ocr.is_ok() {
        tracing::info!(latency_ms = ocr.latency_ms, "OCR service healthy");
    } else {
        tracing::warn!(error = ocr.error.as_deref(), "OCR service unavailable, make sure it is running");
    }

    let llm_start = Instant::now();
    let llm = ComponentHealth::from_result(state.llm.check_health().await, llm_start);
    if llm.is_ok() {
        tracing::info!(latency_ms = llm.latency_ms, "LLM service healthy");
    } else {
        tracing::warn!(error = llm.error.as_deref(), "LLM service unavailable, make sure it is running");
    }

    let notifications = notifier.check_availability().await;

    let all_healthy = ocr.is_ok() && llm.is_ok();
    HealthReport {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            ocr,
            llm,
            notifications,
        },
    }
}

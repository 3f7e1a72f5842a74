use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use answer_tips::{
    app_state::AppState,
    config::AppConfig,
    error::AppError,
    services::{
        health,
        notification::{notify_best_effort, DesktopNotifier, Notification, Notifier},
        pipeline::PipelineOrchestrator,
        watcher::FileWatcher,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for in-flight files before giving up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e.detail(), "Startup failed");
            eprintln!("answer-tips: {}", e.detail());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    tracing::info!(
        watch_folder = %config.watch_folder,
        ocr_api_url = %config.ocr_api_url,
        llm_url = %config.local_llm_url,
        "Starting AnswerTips"
    );

    if let Some(addr) = &config.metrics_bind_addr {
        install_metrics_exporter(addr)?;
    }
    describe_metrics();

    let desktop = Arc::new(DesktopNotifier::new());
    let notifier: Arc<dyn Notifier> = desktop.clone();
    let state = AppState::from_config(config, notifier.clone());

    let report = health::check_services(&state, &desktop).await;
    tracing::info!(status = %report.status, notifications = report.checks.notifications, "Health check finished");

    let watch_path = state.config.watch_path();
    let mut watcher = FileWatcher::new(state.config.clone());
    let events = match watcher.start(&watch_path) {
        Ok(events) => events,
        Err(e) => {
            notify_best_effort(
                notifier.as_ref(),
                &Notification::error(&e.detail(), Some("File watcher")),
            )
            .await;
            return Err(e);
        }
    };

    let orchestrator = PipelineOrchestrator::new(state.clone());
    let mut dispatcher = tokio::spawn(orchestrator.run(events));

    notify_best_effort(
        notifier.as_ref(),
        &Notification::welcome(&watch_path.display().to_string()),
    )
    .await;
    tracing::info!(watch_folder = %watch_path.display(), "Watching for new images");

    let mut stats_tick = tokio::time::interval(state.config.stats_interval());
    stats_tick.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = stats_tick.tick() => {
                let stats = state.ledger.stats();
                if stats.total > 0 {
                    tracing::debug!(
                        total = stats.total,
                        completed = stats.completed,
                        failed = stats.failed,
                        processing = stats.processing,
                        success_rate = %stats.success_rate,
                        "Processing stats"
                    );
                }
            }
            joined = &mut dispatcher => {
                tracing::error!(result = ?joined.err(), "Pipeline dispatcher exited unexpectedly");
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    watcher.stop();

    if !dispatcher.is_finished() {
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut dispatcher).await.is_err() {
            tracing::warn!("In-flight images did not finish before shutdown");
            dispatcher.abort();
        }
    }

    let stats = state.ledger.stats();
    tracing::info!(
        total = stats.total,
        completed = stats.completed,
        failed = stats.failed,
        success_rate = %stats.success_rate,
        "Final stats"
    );
    notify_best_effort(notifier.as_ref(), &Notification::stats(&stats)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn install_metrics_exporter(addr: &str) -> Result<(), AppError> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| AppError::config(format!("invalid metricsBindAddr {addr}")).with_source(e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::config("failed to install Prometheus exporter").with_source(e))?;

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "pipeline_files_detected_total",
        "Image files admitted by the watcher"
    );
    metrics::describe_counter!(
        "pipeline_records_completed_total",
        "Records that reached completed"
    );
    metrics::describe_counter!(
        "pipeline_records_failed_total",
        "Records that failed, labelled by stage"
    );
    metrics::describe_histogram!("pipeline_ocr_seconds", "Time spent in OCR recognition");
    metrics::describe_histogram!("pipeline_llm_seconds", "Time spent in LLM processing");
    metrics::describe_gauge!(
        "pipeline_in_flight",
        "Image files currently admitted and not yet finished"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received interrupt"),
        _ = terminate => tracing::info!("Received terminate"),
    }
}

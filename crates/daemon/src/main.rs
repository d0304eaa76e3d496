//! Telemetry daemon - hosts the analysis and self-optimization engine
//!
//! This binary wires the orchestrator to structured logging: every
//! notification on the engine bus is surfaced as a log line until a
//! shutdown signal arrives.

use anyhow::Result;
use std::sync::Arc;
use telemetry_engine::{EngineEvent, Orchestrator};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = DAEMON_VERSION, "Starting telemetry-daemon");

    let config = config::DaemonConfig::load()?;
    info!(instance = %config.instance_name, "Daemon configured");

    let orchestrator = Arc::new(Orchestrator::new(config.engine));

    // Bridge engine notifications into the log stream
    let bridge = tokio::spawn(log_notifications(orchestrator.clone()));

    orchestrator.start().await;

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");

    orchestrator.stop().await;
    bridge.abort();

    Ok(())
}

/// Consume the merged notification stream and log each item
async fn log_notifications(orchestrator: Arc<Orchestrator>) {
    let mut rx = orchestrator.subscribe();

    loop {
        match rx.recv().await {
            Ok(notification) => {
                let source = format!("{:?}", notification.source);
                match &notification.event {
                    EngineEvent::AnomalyDetected(anomaly) => warn!(
                        source = %source,
                        metric = %anomaly.metric,
                        value = anomaly.value,
                        threshold = anomaly.threshold,
                        "Anomaly detected"
                    ),
                    EngineEvent::PatternDetected(pattern) => info!(
                        source = %source,
                        subject = %pattern.subject,
                        magnitude = pattern.magnitude,
                        description = %pattern.description,
                        "Pattern detected"
                    ),
                    EngineEvent::PredictionUpdated(prediction) => info!(
                        source = %source,
                        confidence = prediction.confidence,
                        overall = prediction.metrics.overall_score,
                        "Prediction updated"
                    ),
                    EngineEvent::OptimizationApplied(metrics) => info!(
                        source = %source,
                        overall = metrics.overall_score,
                        "Optimization applied"
                    ),
                    EngineEvent::StateUpdated(state) => info!(
                        source = %source,
                        phase = ?state.phase,
                        overall = state.metrics.overall_score,
                        "State updated"
                    ),
                    EngineEvent::Error(record) => error!(
                        source = %source,
                        kind = ?record.kind,
                        context = %record.context,
                        "Engine error"
                    ),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Notification bridge lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

//! Cognitive orchestrator
//!
//! Owns every component, fans ingested telemetry out to the windowing
//! engine and the streaming detector, runs the scheduling and optimization
//! tasks, and exposes the engine's query surface. The phase field moves
//! only between Idle, Analyzing and Optimizing; Predicting and Learning
//! exist solely as notifications.

use crate::detector::{DetectorConfig, PatternDetector};
use crate::models::{
    Anomaly, DiscreteEvent, EngineState, MetricSample, OptimizationMetrics, Pattern, Phase,
    Prediction,
};
use crate::notify::{Component, EngineEvent, EventBus, Notification};
use crate::observability::EngineMetrics;
use crate::optimizer::{OptimizerConfig, SelfOptimizer};
use crate::predictor::{Extrapolator, PredictorConfig};
use crate::retry::{ErrorRecord, RetryGovernor};
use crate::ring::BoundedHistory;
use crate::window::{AnalysisResult, WindowConfig, WindowEngine};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Retained patterns across analysis passes
const PATTERN_HISTORY_CAPACITY: usize = 100;

/// Aggregate configuration for every engine component
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Top-level coordinator of the analysis and optimization loops
pub struct Orchestrator {
    bus: EventBus,
    detector: Arc<RwLock<PatternDetector>>,
    predictor: Arc<RwLock<Extrapolator>>,
    windows: Arc<RwLock<WindowEngine>>,
    optimizer: Arc<SelfOptimizer>,
    retry: Arc<RetryGovernor>,
    phase: Arc<RwLock<Phase>>,
    patterns: Arc<RwLock<BoundedHistory<Pattern>>>,
    last_analysis: Arc<RwLock<Option<AnalysisResult>>>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    metrics: EngineMetrics,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::new();

        let detector = Arc::new(RwLock::new(PatternDetector::new(
            config.detector.clone(),
            bus.clone(),
        )));
        let predictor = Arc::new(RwLock::new(Extrapolator::new(
            config.predictor.clone(),
            bus.clone(),
        )));
        let windows = Arc::new(RwLock::new(WindowEngine::new(
            config.window.clone(),
            config.detector.thresholds.clone(),
            bus.clone(),
        )));
        let optimizer = Arc::new(SelfOptimizer::new(
            config.optimizer.clone(),
            detector.clone(),
            predictor.clone(),
            bus.clone(),
        ));
        let retry = Arc::new(RetryGovernor::new(bus.clone()));

        Self {
            bus,
            detector,
            predictor,
            windows,
            optimizer,
            retry,
            phase: Arc::new(RwLock::new(Phase::Idle)),
            patterns: Arc::new(RwLock::new(BoundedHistory::new(PATTERN_HISTORY_CAPACITY))),
            last_analysis: Arc::new(RwLock::new(None)),
            shutdown_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            metrics: EngineMetrics::new(),
        }
    }

    /// Handle to the shared notification bus
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// New subscription onto the merged notification stream
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    /// Retry governor shared with callers running retried work
    pub fn retry_governor(&self) -> Arc<RetryGovernor> {
        self.retry.clone()
    }

    /// Spawn the window-scheduling and optimization tasks.
    ///
    /// A second start while running is a no-op.
    pub async fn start(&self) {
        let mut shutdown_guard = self.shutdown_tx.lock().await;
        if shutdown_guard.is_some() {
            debug!("Orchestrator already running, ignoring start");
            return;
        }

        info!("Starting orchestrator");
        self.transition(Phase::Analyzing).await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = self.tasks.lock().await;

        tasks.push(tokio::spawn(window_tick_loop(
            self.windows.clone(),
            self.detector.clone(),
            self.predictor.clone(),
            self.patterns.clone(),
            self.last_analysis.clone(),
            self.metrics.clone(),
            shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(
            self.optimizer.clone().run(shutdown_tx.subscribe()),
        ));

        *shutdown_guard = Some(shutdown_tx);
    }

    /// Signal both background tasks and wait for them to drain
    pub async fn stop(&self) {
        let shutdown_tx = self.shutdown_tx.lock().await.take();
        let Some(shutdown_tx) = shutdown_tx else {
            return;
        };

        info!("Stopping orchestrator");
        let _ = shutdown_tx.send(());

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.transition(Phase::Idle).await;
    }

    async fn is_running(&self) -> bool {
        self.shutdown_tx.lock().await.is_some()
    }

    /// Fan one metric sample out to the windowing engine and the detector.
    /// Dropped with a log line while the orchestrator is inactive, so
    /// producers are never blocked.
    pub async fn ingest_metric(&self, sample: MetricSample) {
        if !self.is_running().await {
            debug!(timestamp = sample.timestamp, "Inactive, dropping metric sample");
            return;
        }
        self.metrics.inc_samples_ingested();

        {
            let mut windows = self.windows.write().await;
            windows.ingest_metric(&sample);
        }

        let (anomalies, patterns) = {
            let mut detector = self.detector.write().await;
            detector.observe_metric(sample)
        };
        self.metrics.add_anomalies_detected(anomalies.len() as u64);
        self.metrics.add_patterns_detected(patterns.len() as u64);
        self.retain_patterns(patterns).await;

        // Anomalies hold the engine in the analyzing phase; a clean sample
        // lets it move on to optimizing
        let next = if anomalies.is_empty() {
            Phase::Optimizing
        } else {
            Phase::Analyzing
        };
        self.transition(next).await;
    }

    /// Fan one discrete event out to the windowing engine and the detector.
    /// Dropped with a log line while the orchestrator is inactive.
    pub async fn ingest_event(&self, event: DiscreteEvent) {
        if !self.is_running().await {
            debug!(id = %event.id, "Inactive, dropping event");
            return;
        }
        self.metrics.inc_events_ingested();

        {
            let mut windows = self.windows.write().await;
            windows.ingest_event(&event);
        }

        let pattern = {
            let mut detector = self.detector.write().await;
            detector.observe_event(event)
        };
        if let Some(pattern) = pattern {
            self.metrics.add_patterns_detected(1);
            self.retain_patterns(vec![pattern]).await;
        }
    }

    /// Run one optimization cycle immediately, off the fixed schedule
    pub async fn force_optimization(&self) -> Result<OptimizationMetrics> {
        self.transition(Phase::Optimizing).await;
        let result = self.optimizer.run_once().await;
        self.transition(Phase::Analyzing).await;
        result
    }

    /// Force the phase to analyzing and analyze the most recent window
    /// immediately. `None` when no window is open or the latest one is
    /// empty.
    pub async fn force_analysis(&self) -> Option<AnalysisResult> {
        if !self.transition(Phase::Analyzing).await {
            // Already analyzing; the forced pass still announces itself
            self.bus.publish(
                Component::Orchestrator,
                EngineEvent::StateUpdated(EngineState {
                    metrics: self.optimizer.state().await,
                    phase: Phase::Analyzing,
                }),
            );
        }

        let windows = self.windows.read().await;
        let window = windows.latest_window()?.clone();
        drop(windows);

        let result = {
            let windows = self.windows.read().await;
            let mut predictor = self.predictor.write().await;
            windows.analyze_window(&window, &mut *predictor)
        };

        if let Some(result) = &result {
            self.retain_patterns(result.patterns.clone()).await;
            let mut last = self.last_analysis.write().await;
            *last = Some(result.clone());
        }
        result
    }

    /// Append detected patterns to the bounded cross-pass history
    async fn retain_patterns(&self, detected: Vec<Pattern>) {
        if detected.is_empty() {
            return;
        }
        let mut patterns = self.patterns.write().await;
        for pattern in detected {
            patterns.push(pattern);
        }
    }

    /// Canonical health snapshot plus the current phase
    pub async fn state(&self) -> EngineState {
        EngineState {
            metrics: self.optimizer.state().await,
            phase: *self.phase.read().await,
        }
    }

    /// Result of the most recent window analysis, scheduled or forced
    pub async fn last_analysis(&self) -> Option<AnalysisResult> {
        self.last_analysis.read().await.clone()
    }

    /// Oldest-first detector sample history
    pub async fn metrics_history(&self) -> Vec<MetricSample> {
        self.detector.read().await.metrics_history()
    }

    /// Oldest-first detector event history
    pub async fn events_history(&self) -> Vec<DiscreteEvent> {
        self.detector.read().await.events_history()
    }

    /// Oldest-first prediction history
    pub async fn prediction_history(&self) -> Vec<Prediction> {
        self.predictor.read().await.history()
    }

    /// Oldest-first classified-error log
    pub async fn error_log(&self) -> Vec<ErrorRecord> {
        self.retry.error_log().await
    }

    /// Threshold violations in the most recent analyzed window
    pub async fn recent_anomalies(&self) -> Vec<Anomaly> {
        self.last_analysis
            .read()
            .await
            .as_ref()
            .map(|r| r.anomalies.clone())
            .unwrap_or_default()
    }

    /// Oldest-first pattern history retained across analysis passes
    pub async fn patterns(&self) -> Vec<Pattern> {
        self.patterns.read().await.snapshot()
    }

    /// Move the phase field, honoring the allowed transitions: Idle to
    /// Analyzing, Analyzing and Optimizing between each other, anything
    /// back to Idle. Disallowed moves are dropped. Returns whether the
    /// phase changed (and a notification was published).
    async fn transition(&self, next: Phase) -> bool {
        let mut phase = self.phase.write().await;
        if *phase == next {
            return false;
        }
        let allowed = matches!(
            (*phase, next),
            (Phase::Idle, Phase::Analyzing)
                | (Phase::Analyzing, Phase::Optimizing)
                | (Phase::Optimizing, Phase::Analyzing)
                | (_, Phase::Idle)
        );
        if !allowed {
            debug!(from = ?*phase, to = ?next, "Phase transition dropped");
            return false;
        }
        *phase = next;
        drop(phase);

        self.bus.publish(
            Component::Orchestrator,
            EngineEvent::StateUpdated(EngineState {
                metrics: self.optimizer.state().await,
                phase: next,
            }),
        );
        true
    }
}

/// Scheduling loop: run one window pass per tick until shutdown
async fn window_tick_loop(
    windows: Arc<RwLock<WindowEngine>>,
    detector: Arc<RwLock<PatternDetector>>,
    predictor: Arc<RwLock<Extrapolator>>,
    patterns: Arc<RwLock<BoundedHistory<Pattern>>>,
    last_analysis: Arc<RwLock<Option<AnalysisResult>>>,
    metrics: EngineMetrics,
    mut shutdown: broadcast::Receiver<()>,
) {
    let tick_secs = windows.read().await.tick_interval_secs().max(1);
    let mut ticker = interval(Duration::from_secs(tick_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = chrono::Utc::now().timestamp();
                run_window_tick(
                    &windows,
                    &detector,
                    &predictor,
                    &patterns,
                    &last_analysis,
                    &metrics,
                    now,
                )
                .await;
            }
            _ = shutdown.recv() => {
                info!("Shutting down window scheduler");
                break;
            }
        }
    }
}

/// One scheduled pass: open a window ending at `now`, backfilled from the
/// detector's bounded history so samples observed since the previous tick
/// are covered, then analyze the freshest window
async fn run_window_tick(
    windows: &RwLock<WindowEngine>,
    detector: &RwLock<PatternDetector>,
    predictor: &RwLock<Extrapolator>,
    patterns: &RwLock<BoundedHistory<Pattern>>,
    last_analysis: &RwLock<Option<AnalysisResult>>,
    metrics: &EngineMetrics,
    now: i64,
) {
    let (recent_samples, recent_events) = {
        let detector = detector.read().await;
        (detector.metrics_history(), detector.events_history())
    };

    let window = {
        let mut windows = windows.write().await;
        windows.open_window(now, &recent_samples, &recent_events);
        metrics.set_active_windows(windows.active_window_count() as i64);
        windows.latest_window().cloned()
    };

    if let Some(window) = window {
        let result = {
            let windows = windows.read().await;
            let mut predictor = predictor.write().await;
            windows.analyze_window(&window, &mut *predictor)
        };
        if let Some(result) = result {
            metrics.add_anomalies_detected(result.anomalies.len() as u64);
            metrics.add_patterns_detected(result.patterns.len() as u64);
            {
                let mut patterns = patterns.write().await;
                for pattern in result.patterns.clone() {
                    patterns.push(pattern);
                }
            }
            let mut last = last_analysis.write().await;
            *last = Some(result);
        }
    }
}

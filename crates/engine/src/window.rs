//! Sliding-window maintenance and per-window analysis
//!
//! A scheduling tick opens one window per interval, backfills it from the
//! caller's recent history, prunes windows older than twice the window
//! size, and caps the active set by evicting the oldest. Ingested items
//! additionally land in every already-open window whose interval covers
//! their timestamp; windows may overlap during transition.

use crate::detector::{threshold_anomalies, Thresholds};
use crate::models::{
    Anomaly, DiscreteEvent, MetricSample, OptimizationMetrics, Pattern, PatternDirection,
    PatternKind, Prediction,
};
use crate::notify::{Component, EngineEvent, EventBus};
use crate::predictor::HealthPredictor;
use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

fn default_window_size_secs() -> u64 {
    60
}
fn default_tick_interval_secs() -> u64 {
    10
}
fn default_max_windows() -> usize {
    10
}
fn default_min_slope() -> f64 {
    0.1
}

/// Windowing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_size_secs")]
    pub window_size_secs: u64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Active-window cap; the oldest beyond it is evicted
    #[serde(default = "default_max_windows")]
    pub max_windows: usize,
    /// Minimum OLS slope before a window-level trend pattern is emitted
    #[serde(default = "default_min_slope")]
    pub min_slope: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size_secs: default_window_size_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            max_windows: default_max_windows(),
            min_slope: default_min_slope(),
        }
    }
}

/// A bounded time interval holding the samples and events that occurred
/// within it
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisWindow {
    pub start: i64,
    pub end: i64,
    pub samples: Vec<MetricSample>,
    pub events: Vec<DiscreteEvent>,
}

impl AnalysisWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            samples: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.events.is_empty()
    }
}

/// Mean, spread and motion of one metric over a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std_dev: f64,
    /// OLS slope over sample index vs value
    pub trend: f64,
    /// Slope of the first-difference series
    pub acceleration: f64,
}

impl MetricSummary {
    fn from_series(values: &[f64]) -> Self {
        Self {
            mean: stats::mean(values),
            std_dev: stats::std_dev(values),
            trend: stats::ols_slope(values),
            acceleration: stats::ols_slope(&stats::first_differences(values)),
        }
    }
}

/// Per-metric summaries for one analyzed window
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub cpu_usage: MetricSummary,
    pub memory_usage: MetricSummary,
    pub response_time_ms: MetricSummary,
    pub error_rate: MetricSummary,
}

/// Event counts bucketed by kind, source, and priority
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventHistograms {
    pub by_kind: HashMap<String, u64>,
    pub by_source: HashMap<String, u64>,
    pub by_priority: HashMap<String, u64>,
}

impl EventHistograms {
    fn from_events(events: &[DiscreteEvent]) -> Self {
        let mut histograms = Self::default();
        for event in events {
            *histograms
                .by_kind
                .entry(format!("{:?}", event.kind).to_lowercase())
                .or_default() += 1;
            *histograms.by_source.entry(event.source.clone()).or_default() += 1;
            *histograms
                .by_priority
                .entry(format!("{:?}", event.priority).to_lowercase())
                .or_default() += 1;
        }
        histograms
    }
}

/// Everything computed for one non-empty window
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub window_start: i64,
    pub window_end: i64,
    pub sample_count: usize,
    pub event_count: usize,
    pub stats: WindowStats,
    pub histograms: EventHistograms,
    pub metrics: OptimizationMetrics,
    pub patterns: Vec<Pattern>,
    pub anomalies: Vec<Anomaly>,
    pub prediction: Prediction,
}

/// Maintains the active sliding windows and analyzes them
pub struct WindowEngine {
    config: WindowConfig,
    thresholds: Thresholds,
    windows: VecDeque<AnalysisWindow>,
    bus: EventBus,
}

impl WindowEngine {
    pub fn new(config: WindowConfig, thresholds: Thresholds, bus: EventBus) -> Self {
        Self {
            config,
            thresholds,
            windows: VecDeque::new(),
            bus,
        }
    }

    /// Scheduling tick: open a window covering `[now - window_size, now]`,
    /// backfilled from the caller's recent sample/event history, then prune
    /// windows older than twice the window size and enforce the
    /// active-window cap (oldest evicted first).
    ///
    /// Windows look backwards, so items observed since the previous tick
    /// enter the window set here rather than at ingest time.
    pub fn open_window(
        &mut self,
        now: i64,
        recent_samples: &[MetricSample],
        recent_events: &[DiscreteEvent],
    ) {
        let size = self.config.window_size_secs as i64;
        let mut window = AnalysisWindow::new(now - size, now);
        for sample in recent_samples {
            if window.contains(sample.timestamp) {
                window.samples.push(sample.clone());
            }
        }
        for event in recent_events {
            if window.contains(event.timestamp) {
                window.events.push(event.clone());
            }
        }
        self.windows.push_back(window);

        let cutoff = now - 2 * size;
        while let Some(front) = self.windows.front() {
            if front.end < cutoff {
                self.windows.pop_front();
            } else {
                break;
            }
        }

        while self.windows.len() > self.config.max_windows {
            self.windows.pop_front();
        }

        let opened = self.windows.back();
        debug!(
            active_windows = self.windows.len(),
            start = now - size,
            end = now,
            backfilled_samples = opened.map(|w| w.samples.len()).unwrap_or_default(),
            backfilled_events = opened.map(|w| w.events.len()).unwrap_or_default(),
            "Window opened"
        );
    }

    /// Append a sample to every active window covering its timestamp
    pub fn ingest_metric(&mut self, sample: &MetricSample) {
        for window in self
            .windows
            .iter_mut()
            .filter(|w| w.contains(sample.timestamp))
        {
            window.samples.push(sample.clone());
        }
    }

    /// Append an event to every active window covering its timestamp
    pub fn ingest_event(&mut self, event: &DiscreteEvent) {
        for window in self
            .windows
            .iter_mut()
            .filter(|w| w.contains(event.timestamp))
        {
            window.events.push(event.clone());
        }
    }

    pub fn active_window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn latest_window(&self) -> Option<&AnalysisWindow> {
        self.windows.back()
    }

    pub fn tick_interval_secs(&self) -> u64 {
        self.config.tick_interval_secs
    }

    /// Analyze one window: per-metric summaries, event histograms, derived
    /// health metrics, threshold anomalies, window-level trend patterns,
    /// and a prediction. `None` for an empty window.
    pub fn analyze_window(
        &self,
        window: &AnalysisWindow,
        predictor: &mut dyn HealthPredictor,
    ) -> Option<AnalysisResult> {
        if window.is_empty() {
            return None;
        }

        let cpu: Vec<f64> = window.samples.iter().map(|s| s.cpu_usage).collect();
        let memory: Vec<f64> = window.samples.iter().map(|s| s.memory_usage).collect();
        let response: Vec<f64> = window.samples.iter().map(|s| s.response_time_ms).collect();
        let errors: Vec<f64> = window.samples.iter().map(|s| s.error_rate).collect();

        let stats = WindowStats {
            cpu_usage: MetricSummary::from_series(&cpu),
            memory_usage: MetricSummary::from_series(&memory),
            response_time_ms: MetricSummary::from_series(&response),
            error_rate: MetricSummary::from_series(&errors),
        };

        let histograms = EventHistograms::from_events(&window.events);

        let anomalies: Vec<Anomaly> = window
            .samples
            .iter()
            .flat_map(|s| threshold_anomalies(s, &self.thresholds))
            .collect();

        let patterns = self.window_patterns(&stats, window.end);
        for pattern in &patterns {
            self.bus.publish(
                Component::Windowing,
                EngineEvent::PatternDetected(pattern.clone()),
            );
        }

        let metrics = self.derive_metrics(&stats, &anomalies, window.samples.len());
        // A failed prediction degrades this pass to a no-op; the next tick
        // gets a fresh attempt
        let prediction = match predictor.predict(&metrics) {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!(error = %e, window_end = window.end, "Prediction failed, skipping window analysis");
                return None;
            }
        };

        Some(AnalysisResult {
            window_start: window.start,
            window_end: window.end,
            sample_count: window.samples.len(),
            event_count: window.events.len(),
            stats,
            histograms,
            metrics,
            patterns,
            anomalies,
            prediction,
        })
    }

    /// Trend patterns for metrics whose window slope clears the minimum
    fn window_patterns(&self, stats: &WindowStats, detected_at: i64) -> Vec<Pattern> {
        let series = [
            ("cpu_usage", &stats.cpu_usage),
            ("memory_usage", &stats.memory_usage),
            ("response_time_ms", &stats.response_time_ms),
            ("error_rate", &stats.error_rate),
        ];

        series
            .iter()
            .filter_map(|(subject, summary)| {
                if summary.trend.abs() <= self.config.min_slope {
                    return None;
                }
                let direction = if summary.trend > 0.0 {
                    PatternDirection::Rising
                } else {
                    PatternDirection::Falling
                };
                Some(Pattern {
                    kind: PatternKind::Trend,
                    subject: subject.to_string(),
                    direction,
                    magnitude: summary.trend.abs(),
                    description: format!(
                        "{} {} within window",
                        subject,
                        if summary.trend > 0.0 { "rising" } else { "falling" }
                    ),
                    detected_at,
                })
            })
            .collect()
    }

    /// Map window statistics onto the normalized health snapshot.
    ///
    /// Performance reflects response time and error rate against twice
    /// their thresholds; system health reflects mean resource usage;
    /// adaptation rate is the fraction of threshold checks that passed.
    fn derive_metrics(
        &self,
        stats: &WindowStats,
        anomalies: &[Anomaly],
        sample_count: usize,
    ) -> OptimizationMetrics {
        let response_score =
            1.0 - stats.response_time_ms.mean / (2.0 * self.thresholds.response_time_ms);
        let error_score = 1.0 - stats.error_rate.mean / (2.0 * self.thresholds.error_rate);
        let performance = (response_score + error_score) / 2.0;

        let system_health =
            1.0 - (stats.cpu_usage.mean / 100.0 + stats.memory_usage.mean / 100.0) / 2.0;

        let checks = (sample_count * 4).max(1) as f64;
        let adaptation_rate = 1.0 - anomalies.len() as f64 / checks;

        let clamped_perf = performance.clamp(0.0, 1.0);
        let clamped_health = system_health.clamp(0.0, 1.0);
        let clamped_adapt = adaptation_rate.clamp(0.0, 1.0);
        let optimization_potential = (clamped_perf + clamped_adapt + clamped_health) / 3.0;

        OptimizationMetrics::from_components(
            clamped_perf,
            clamped_adapt,
            clamped_health,
            optimization_potential,
        )
    }
}

//! Streaming threshold and trend detection
//!
//! Maintains its own bounded sample/event history, independent of the
//! windowing engine, and checks every ingested item against static
//! thresholds, an OLS trend slope, and an error-burst frequency rule.

use crate::models::{
    Anomaly, DiscreteEvent, EventKind, MetricSample, Pattern, PatternDirection, PatternKind,
};
use crate::notify::{Component, EngineEvent, EventBus};
use crate::ring::BoundedHistory;
use crate::stats;
use serde::Deserialize;
use tracing::debug;

fn default_history_capacity() -> usize {
    1000
}
fn default_cpu_threshold() -> f64 {
    80.0
}
fn default_memory_threshold() -> f64 {
    80.0
}
fn default_response_time_threshold() -> f64 {
    500.0
}
fn default_error_rate_threshold() -> f64 {
    5.0
}
fn default_min_trend_samples() -> usize {
    10
}
fn default_min_slope() -> f64 {
    0.1
}
fn default_min_event_samples() -> usize {
    5
}
fn default_error_burst_count() -> usize {
    3
}

/// Static per-metric anomaly thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu_threshold")]
    pub cpu_usage: f64,
    #[serde(default = "default_memory_threshold")]
    pub memory_usage: f64,
    #[serde(default = "default_response_time_threshold")]
    pub response_time_ms: f64,
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_usage: default_cpu_threshold(),
            memory_usage: default_memory_threshold(),
            response_time_ms: default_response_time_threshold(),
            error_rate: default_error_rate_threshold(),
        }
    }
}

/// Detector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Minimum recent samples before trend detection runs
    #[serde(default = "default_min_trend_samples")]
    pub min_trend_samples: usize,
    /// Minimum OLS slope to flag an increasing trend
    #[serde(default = "default_min_slope")]
    pub min_slope: f64,
    /// Minimum recent events before frequency detection runs
    #[serde(default = "default_min_event_samples")]
    pub min_event_samples: usize,
    /// Error-typed events among the recent window that flag a burst
    #[serde(default = "default_error_burst_count")]
    pub error_burst_count: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            thresholds: Thresholds::default(),
            min_trend_samples: default_min_trend_samples(),
            min_slope: default_min_slope(),
            min_event_samples: default_min_event_samples(),
            error_burst_count: default_error_burst_count(),
        }
    }
}

/// One anomaly per violated threshold; shared with window analysis
pub fn threshold_anomalies(sample: &MetricSample, thresholds: &Thresholds) -> Vec<Anomaly> {
    let checks = [
        ("cpu_usage", sample.cpu_usage, thresholds.cpu_usage),
        ("memory_usage", sample.memory_usage, thresholds.memory_usage),
        (
            "response_time_ms",
            sample.response_time_ms,
            thresholds.response_time_ms,
        ),
        ("error_rate", sample.error_rate, thresholds.error_rate),
    ];

    checks
        .iter()
        .filter(|(_, value, threshold)| value > threshold)
        .map(|(metric, value, threshold)| Anomaly {
            metric: metric.to_string(),
            value: *value,
            score: value / threshold,
            threshold: *threshold,
            timestamp: sample.timestamp,
        })
        .collect()
}

/// Streaming pattern and anomaly detector
pub struct PatternDetector {
    config: DetectorConfig,
    samples: BoundedHistory<MetricSample>,
    events: BoundedHistory<DiscreteEvent>,
    bus: EventBus,
}

impl PatternDetector {
    pub fn new(config: DetectorConfig, bus: EventBus) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            samples: BoundedHistory::new(capacity),
            events: BoundedHistory::new(capacity),
            bus,
        }
    }

    /// Ingest a metric sample: append to history, check thresholds, then
    /// re-run trend detection. Violations and flagged trends are published.
    pub fn observe_metric(&mut self, sample: MetricSample) -> (Vec<Anomaly>, Vec<Pattern>) {
        let anomalies = self.detect_anomalies(&sample);
        self.samples.push(sample);

        for anomaly in &anomalies {
            debug!(
                metric = %anomaly.metric,
                value = anomaly.value,
                threshold = anomaly.threshold,
                "Anomaly detected"
            );
            self.bus.publish(
                Component::Detector,
                EngineEvent::AnomalyDetected(anomaly.clone()),
            );
        }

        let patterns = self.detect_metric_trend();
        for pattern in &patterns {
            self.bus.publish(
                Component::Detector,
                EngineEvent::PatternDetected(pattern.clone()),
            );
        }

        (anomalies, patterns)
    }

    /// Ingest a discrete event and re-run frequency detection
    pub fn observe_event(&mut self, event: DiscreteEvent) -> Option<Pattern> {
        self.events.push(event);

        let pattern = self.detect_event_frequency();
        if let Some(p) = &pattern {
            self.bus.publish(
                Component::Detector,
                EngineEvent::PatternDetected(p.clone()),
            );
        }
        pattern
    }

    /// Compare a sample against the static thresholds
    pub fn detect_anomalies(&self, sample: &MetricSample) -> Vec<Anomaly> {
        threshold_anomalies(sample, &self.config.thresholds)
    }

    /// OLS trend over the most recent samples for cpu and memory; flags an
    /// increasing trend when the slope exceeds the minimum-slope constant.
    pub fn detect_metric_trend(&self) -> Vec<Pattern> {
        if self.samples.len() < self.config.min_trend_samples {
            return Vec::new();
        }

        let recent: Vec<&MetricSample> =
            self.samples.last_n(self.config.min_trend_samples).collect();
        let detected_at = recent.last().map(|s| s.timestamp).unwrap_or_default();

        let series = [
            (
                "cpu_usage",
                recent.iter().map(|s| s.cpu_usage).collect::<Vec<_>>(),
            ),
            (
                "memory_usage",
                recent.iter().map(|s| s.memory_usage).collect::<Vec<_>>(),
            ),
        ];

        series
            .iter()
            .filter_map(|(subject, values)| {
                let slope = stats::ols_slope(values);
                if slope > self.config.min_slope {
                    Some(Pattern {
                        kind: PatternKind::Trend,
                        subject: subject.to_string(),
                        direction: PatternDirection::Rising,
                        magnitude: slope,
                        description: format!("increasing {} trend", subject),
                        detected_at,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Flags "frequent errors" when enough of the most recent events are
    /// error-typed.
    pub fn detect_event_frequency(&self) -> Option<Pattern> {
        if self.events.len() < self.config.min_event_samples {
            return None;
        }

        let recent: Vec<&DiscreteEvent> =
            self.events.last_n(self.config.min_event_samples).collect();
        let error_count = recent
            .iter()
            .filter(|e| e.kind == EventKind::Error)
            .count();

        if error_count >= self.config.error_burst_count {
            Some(Pattern {
                kind: PatternKind::Frequency,
                subject: "error".to_string(),
                direction: PatternDirection::Rising,
                magnitude: error_count as f64 / recent.len() as f64,
                description: format!(
                    "frequent errors: {} of last {} events",
                    error_count,
                    recent.len()
                ),
                detected_at: recent.last().map(|e| e.timestamp).unwrap_or_default(),
            })
        } else {
            None
        }
    }

    /// Oldest-first snapshot of the sample history
    pub fn metrics_history(&self) -> Vec<MetricSample> {
        self.samples.snapshot()
    }

    /// Oldest-first snapshot of the event history
    pub fn events_history(&self) -> Vec<DiscreteEvent> {
        self.events.snapshot()
    }

    /// Most recently ingested sample, if any
    pub fn latest_sample(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.config.thresholds
    }
}

//! Core data models for the telemetry engine

use serde::{Deserialize, Serialize};

/// A single telemetry sample produced by an external collector.
///
/// Usage fields are percentages in [0, 100]; samples are immutable once
/// ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub active_connections: u32,
    pub throughput: f64,
}

/// Discrete lifecycle event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Warning,
    Error,
    Debug,
    System,
    User,
}

/// Ordinal event priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// A discrete event produced by an external source, immutable once ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteEvent {
    pub id: String,
    pub kind: EventKind,
    pub source: String,
    pub priority: EventPriority,
    pub message: String,
    pub payload: serde_json::Value,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

/// The canonical normalized health snapshot.
///
/// Every field lives in [0, 1]; `overall_score` is derived as the mean of
/// the other four.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub performance: f64,
    pub adaptation_rate: f64,
    pub system_health: f64,
    pub optimization_potential: f64,
    pub overall_score: f64,
}

impl OptimizationMetrics {
    /// Build a snapshot from the four component scores, clamping each to
    /// [0, 1] and deriving the overall score.
    pub fn from_components(
        performance: f64,
        adaptation_rate: f64,
        system_health: f64,
        optimization_potential: f64,
    ) -> Self {
        let performance = performance.clamp(0.0, 1.0);
        let adaptation_rate = adaptation_rate.clamp(0.0, 1.0);
        let system_health = system_health.clamp(0.0, 1.0);
        let optimization_potential = optimization_potential.clamp(0.0, 1.0);
        Self {
            performance,
            adaptation_rate,
            system_health,
            optimization_potential,
            overall_score: (performance
                + adaptation_rate
                + system_health
                + optimization_potential)
                / 4.0,
        }
    }

    /// Scale every component by `factor`, clamp, and re-derive the overall
    /// score.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::from_components(
            self.performance * factor,
            self.adaptation_rate * factor,
            self.system_health * factor,
            self.optimization_potential * factor,
        )
    }

    /// The four component fields in a fixed order (used for per-field delta
    /// analysis).
    pub fn components(&self) -> [f64; 4] {
        [
            self.performance,
            self.adaptation_rate,
            self.system_health,
            self.optimization_potential,
        ]
    }

    /// Fraction of component fields inside the valid [0, 1] range
    pub fn validity_ratio(&self) -> f64 {
        let valid = self
            .components()
            .iter()
            .filter(|v| (0.0..=1.0).contains(*v))
            .count();
        valid as f64 / 4.0
    }
}

impl Default for OptimizationMetrics {
    fn default() -> Self {
        Self::from_components(1.0, 1.0, 1.0, 1.0)
    }
}

/// Kind of detected pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Trend,
    Frequency,
}

/// Direction of a detected pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternDirection {
    Rising,
    Falling,
    Steady,
}

/// A detected trend or frequency pattern in recent history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternKind,
    /// Metric name or event kind the pattern concerns
    pub subject: String,
    pub direction: PatternDirection,
    pub magnitude: f64,
    pub description: String,
    pub detected_at: i64,
}

/// A single threshold violation on one metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    /// How far past the threshold the value landed, as a ratio of the
    /// threshold
    pub score: f64,
    pub threshold: f64,
    pub timestamp: i64,
}

/// Aggregate health-trend direction over recent predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

/// Result of historical trend analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthTrend {
    pub direction: TrendDirection,
    /// Winning-category share of the total category score, in [0, 1]
    pub confidence: f64,
}

impl HealthTrend {
    pub fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            confidence: 0.0,
        }
    }
}

/// The orchestrator's current high-level activity.
///
/// Only Idle, Analyzing and Optimizing gate transitions; Predicting and
/// Learning are surfaced through notifications alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Analyzing,
    Optimizing,
    Predicting,
    Learning,
}

/// Snapshot returned by state queries: canonical metrics plus phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub metrics: OptimizationMetrics,
    pub phase: Phase,
}

/// An extrapolated future health snapshot with a gated confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub metrics: OptimizationMetrics,
    /// In [0, 1]; exactly 0.0 when below the confidence gate
    pub confidence: f64,
    pub timestamp: i64,
}

//! Predictive extrapolation over recent health snapshots
//!
//! The extrapolator is a deterministic heuristic over its own prediction
//! history: per-field delta analysis aggregates into an improving / stable /
//! declining trend, the current snapshot is scaled by a trend-keyed
//! multiplier, and the resulting confidence is threshold-gated, not scaled.

use crate::models::{HealthTrend, OptimizationMetrics, Prediction, TrendDirection};
use crate::notify::{Component, EngineEvent, EventBus};
use crate::ring::BoundedHistory;
use crate::stats;
use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

fn default_history_capacity() -> usize {
    100
}
fn default_trend_window() -> usize {
    10
}
fn default_min_history() -> usize {
    2
}
fn default_confidence_threshold() -> f64 {
    0.7
}

/// Extrapolator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Most recent predictions considered by trend analysis
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// Prior predictions required before a trend is reported
    #[serde(default = "default_min_history")]
    pub min_history: usize,
    /// Confidence gate: products below this return exactly zero
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            trend_window: default_trend_window(),
            min_history: default_min_history(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Seam for injecting a predictive-model provider.
///
/// The engine constructs one provider and passes it to whichever component
/// needs it; there is no global factory.
pub trait HealthPredictor: Send + Sync {
    /// Extrapolate the next likely health state from the current snapshot.
    /// Providers backed by an external model may fail; callers isolate the
    /// failure to the pass that triggered it.
    fn predict(&mut self, current: &OptimizationMetrics) -> Result<Prediction>;
}

/// Multiplier applied per trend direction when extrapolating
fn trend_multiplier(direction: TrendDirection) -> f64 {
    match direction {
        TrendDirection::Improving => 1.1,
        TrendDirection::Declining => 0.9,
        TrendDirection::Stable => 1.0,
    }
}

/// Deterministic trend-of-trend extrapolator with a bounded prediction
/// history
pub struct Extrapolator {
    config: PredictorConfig,
    history: BoundedHistory<Prediction>,
    bus: EventBus,
}

impl Extrapolator {
    pub fn new(config: PredictorConfig, bus: EventBus) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            history: BoundedHistory::new(capacity),
            bus,
        }
    }

    /// Aggregate per-field delta analysis over the recent prediction
    /// history.
    ///
    /// Needs at least `min_history` prior predictions, otherwise Stable
    /// with zero confidence. Each field contributes its
    /// stability-weighted magnitude to the category its mean delta points
    /// at; flat fields weight Stable. Ties favor Stable.
    pub fn analyze_historical_trend(&self) -> HealthTrend {
        if self.history.len() < self.config.min_history {
            return HealthTrend::stable();
        }

        let recent: Vec<&Prediction> = self.history.last_n(self.config.trend_window).collect();

        let mut improving = 0.0_f64;
        let mut stable = 0.0_f64;
        let mut declining = 0.0_f64;
        const EPS: f64 = 1e-9;

        for field in 0..4 {
            let series: Vec<f64> = recent.iter().map(|p| p.metrics.components()[field]).collect();
            let deltas = stats::first_differences(&series);
            if deltas.is_empty() {
                continue;
            }

            let mean_delta = stats::mean(&deltas);
            let magnitude = mean_delta.abs();
            let stability = 1.0 / (1.0 + stats::variance(&deltas));

            if mean_delta > EPS {
                improving += magnitude * stability;
            } else if mean_delta < -EPS {
                declining += magnitude * stability;
            } else {
                stable += stability;
            }
        }

        let total = improving + stable + declining;
        if total <= EPS {
            return HealthTrend::stable();
        }

        let (direction, winner) = if improving > stable && improving > declining {
            (TrendDirection::Improving, improving)
        } else if declining > stable && declining > improving {
            (TrendDirection::Declining, declining)
        } else {
            (TrendDirection::Stable, stable)
        };

        HealthTrend {
            direction,
            confidence: (winner / total).clamp(0.0, 1.0),
        }
    }

    /// Scale every field by the trend-keyed multiplier, clamped to range
    pub fn extrapolate(
        &self,
        current: &OptimizationMetrics,
        trend: &HealthTrend,
    ) -> OptimizationMetrics {
        current.scaled(trend_multiplier(trend.direction))
    }

    /// Product of history-sufficiency, trend confidence, and metrics
    /// validity, each in [0, 1]. Returned unchanged only when it clears the
    /// threshold; otherwise exactly zero.
    pub fn calculate_confidence(
        &self,
        current: &OptimizationMetrics,
        trend: &HealthTrend,
    ) -> f64 {
        let sufficiency =
            (self.history.len() as f64 / self.config.history_capacity as f64).clamp(0.0, 1.0);
        let product = sufficiency * trend.confidence * current.validity_ratio();

        if product >= self.config.confidence_threshold {
            product
        } else {
            0.0
        }
    }

    /// Oldest-first snapshot of the prediction history
    pub fn history(&self) -> Vec<Prediction> {
        self.history.snapshot()
    }
}

impl HealthPredictor for Extrapolator {
    /// Analyze the historical trend, extrapolate the current snapshot, gate
    /// the confidence, then append the result to history (FIFO eviction)
    /// and publish it. The heuristic itself cannot fail.
    fn predict(&mut self, current: &OptimizationMetrics) -> Result<Prediction> {
        let trend = self.analyze_historical_trend();
        let metrics = self.extrapolate(current, &trend);
        let confidence = self.calculate_confidence(current, &trend);

        let prediction = Prediction {
            metrics,
            confidence,
            timestamp: chrono::Utc::now().timestamp(),
        };

        debug!(
            direction = ?trend.direction,
            trend_confidence = trend.confidence,
            gated_confidence = confidence,
            "Prediction extrapolated"
        );

        self.history.push(prediction.clone());
        self.bus.publish(
            Component::Predictor,
            EngineEvent::PredictionUpdated(prediction.clone()),
        );

        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction_with_overall(level: f64) -> Prediction {
        Prediction {
            metrics: OptimizationMetrics::from_components(level, level, level, level),
            confidence: 0.0,
            timestamp: 0,
        }
    }

    fn extrapolator_with_levels(levels: &[f64]) -> Extrapolator {
        let mut e = Extrapolator::new(PredictorConfig::default(), EventBus::new());
        for level in levels {
            e.history.push(prediction_with_overall(*level));
        }
        e
    }

    #[test]
    fn test_trend_needs_two_predictions() {
        let e = extrapolator_with_levels(&[0.5]);
        let trend = e.analyze_historical_trend();
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.confidence, 0.0);
    }

    #[test]
    fn test_rising_history_reports_improving() {
        let e = extrapolator_with_levels(&[0.2, 0.3, 0.4, 0.5, 0.6]);
        let trend = e.analyze_historical_trend();
        assert_eq!(trend.direction, TrendDirection::Improving);
        // Constant deltas: every field points the same way
        assert!((trend.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_falling_history_reports_declining() {
        let e = extrapolator_with_levels(&[0.8, 0.7, 0.6, 0.5]);
        let trend = e.analyze_historical_trend();
        assert_eq!(trend.direction, TrendDirection::Declining);
    }

    #[test]
    fn test_flat_history_reports_stable() {
        let e = extrapolator_with_levels(&[0.5, 0.5, 0.5, 0.5]);
        let trend = e.analyze_historical_trend();
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert!((trend.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_extrapolate_multipliers() {
        let e = extrapolator_with_levels(&[]);
        let current = OptimizationMetrics::from_components(0.5, 0.5, 0.5, 0.5);

        let improving = e.extrapolate(
            &current,
            &HealthTrend {
                direction: TrendDirection::Improving,
                confidence: 1.0,
            },
        );
        assert!((improving.performance - 0.55).abs() < 1e-9);

        let declining = e.extrapolate(
            &current,
            &HealthTrend {
                direction: TrendDirection::Declining,
                confidence: 1.0,
            },
        );
        assert!((declining.performance - 0.45).abs() < 1e-9);

        let stable = e.extrapolate(
            &current,
            &HealthTrend {
                direction: TrendDirection::Stable,
                confidence: 1.0,
            },
        );
        assert_eq!(stable.performance, 0.5);
    }

    #[test]
    fn test_extrapolate_clamps_at_upper_bound() {
        let e = extrapolator_with_levels(&[]);
        let current = OptimizationMetrics::from_components(0.99, 0.99, 0.99, 0.99);
        let result = e.extrapolate(
            &current,
            &HealthTrend {
                direction: TrendDirection::Improving,
                confidence: 1.0,
            },
        );
        assert_eq!(result.performance, 1.0);
        assert_eq!(result.overall_score, 1.0);
    }

    #[test]
    fn test_confidence_is_gated_not_scaled() {
        let config = PredictorConfig {
            history_capacity: 4,
            ..Default::default()
        };
        let mut e = Extrapolator::new(config, EventBus::new());
        for _ in 0..4 {
            e.history.push(prediction_with_overall(0.5));
        }
        let current = OptimizationMetrics::default();

        // Full history, valid metrics: product equals trend confidence
        let strong = HealthTrend {
            direction: TrendDirection::Improving,
            confidence: 0.9,
        };
        let c = e.calculate_confidence(&current, &strong);
        assert!((c - 0.9).abs() < 1e-9);

        // Below the 0.7 gate the result is exactly zero, never a scaled
        // intermediate value
        let weak = HealthTrend {
            direction: TrendDirection::Improving,
            confidence: 0.5,
        };
        assert_eq!(e.calculate_confidence(&current, &weak), 0.0);
    }

    #[test]
    fn test_confidence_accounts_for_history_sufficiency() {
        let config = PredictorConfig {
            history_capacity: 10,
            ..Default::default()
        };
        let mut e = Extrapolator::new(config, EventBus::new());
        for _ in 0..5 {
            e.history.push(prediction_with_overall(0.5));
        }
        // Half-full history halves the product: 0.5 * 0.9 < 0.7 gate
        let trend = HealthTrend {
            direction: TrendDirection::Improving,
            confidence: 0.9,
        };
        assert_eq!(e.calculate_confidence(&OptimizationMetrics::default(), &trend), 0.0);
    }

    #[test]
    fn test_predict_appends_with_fifo_eviction() {
        let config = PredictorConfig {
            history_capacity: 3,
            ..Default::default()
        };
        let mut e = Extrapolator::new(config, EventBus::new());
        let current = OptimizationMetrics::default();
        for _ in 0..5 {
            e.predict(&current).unwrap();
        }
        assert_eq!(e.history().len(), 3);
    }

    #[tokio::test]
    async fn test_predict_publishes_notification() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut e = Extrapolator::new(PredictorConfig::default(), bus);

        e.predict(&OptimizationMetrics::default()).unwrap();

        let notification = rx.recv().await.unwrap();
        assert!(matches!(
            notification.event,
            EngineEvent::PredictionUpdated(_)
        ));
    }
}

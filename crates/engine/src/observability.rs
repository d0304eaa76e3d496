//! Observability infrastructure
//!
//! Prometheus counters and gauges for the engine's internal activity.
//! Registered once in a process-wide registry; handles are cheap clones.

use prometheus::{register_gauge, register_int_counter, register_int_gauge, Gauge, IntCounter, IntGauge};
use std::sync::OnceLock;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    samples_ingested: IntCounter,
    events_ingested: IntCounter,
    anomalies_detected: IntCounter,
    patterns_detected: IntCounter,
    optimization_cycles: IntCounter,
    cycle_failures: IntCounter,
    active_windows: IntGauge,
    overall_score: Gauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            samples_ingested: register_int_counter!(
                "telemetry_engine_samples_ingested_total",
                "Total metric samples accepted by the orchestrator"
            )
            .expect("Failed to register samples_ingested_total"),

            events_ingested: register_int_counter!(
                "telemetry_engine_events_ingested_total",
                "Total discrete events accepted by the orchestrator"
            )
            .expect("Failed to register events_ingested_total"),

            anomalies_detected: register_int_counter!(
                "telemetry_engine_anomalies_detected_total",
                "Total threshold violations detected"
            )
            .expect("Failed to register anomalies_detected_total"),

            patterns_detected: register_int_counter!(
                "telemetry_engine_patterns_detected_total",
                "Total trend and frequency patterns detected"
            )
            .expect("Failed to register patterns_detected_total"),

            optimization_cycles: register_int_counter!(
                "telemetry_engine_optimization_cycles_total",
                "Total completed optimization cycles"
            )
            .expect("Failed to register optimization_cycles_total"),

            cycle_failures: register_int_counter!(
                "telemetry_engine_cycle_failures_total",
                "Total optimization cycles that failed and were isolated"
            )
            .expect("Failed to register cycle_failures_total"),

            active_windows: register_int_gauge!(
                "telemetry_engine_active_windows",
                "Number of currently active analysis windows"
            )
            .expect("Failed to register active_windows"),

            overall_score: register_gauge!(
                "telemetry_engine_overall_score",
                "Current overall score of the canonical health snapshot"
            )
            .expect("Failed to register overall_score"),
        }
    }
}

/// Lightweight handle to the global engine metrics
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_samples_ingested(&self) {
        self.inner().samples_ingested.inc();
    }

    pub fn inc_events_ingested(&self) {
        self.inner().events_ingested.inc();
    }

    pub fn add_anomalies_detected(&self, count: u64) {
        self.inner().anomalies_detected.inc_by(count);
    }

    pub fn add_patterns_detected(&self, count: u64) {
        self.inner().patterns_detected.inc_by(count);
    }

    pub fn inc_optimization_cycles(&self) {
        self.inner().optimization_cycles.inc();
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures.inc();
    }

    pub fn set_active_windows(&self, count: i64) {
        self.inner().active_windows.set(count);
    }

    pub fn set_overall_score(&self, score: f64) {
        self.inner().overall_score.set(score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_handle() {
        let metrics = EngineMetrics::new();

        metrics.inc_samples_ingested();
        metrics.inc_events_ingested();
        metrics.add_anomalies_detected(2);
        metrics.add_patterns_detected(1);
        metrics.inc_optimization_cycles();
        metrics.set_active_windows(3);
        metrics.set_overall_score(0.75);
    }
}

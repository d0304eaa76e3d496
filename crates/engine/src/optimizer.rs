//! Fixed-interval self-optimization loop
//!
//! Each cycle runs four strictly-sequential phases: analyze the latest
//! observed telemetry into a health snapshot, extrapolate it, generate
//! additive candidate adjustments, and apply only the first one. A failure
//! in any phase is isolated to its cycle; the loop always reaches its next
//! tick.

use crate::detector::PatternDetector;
use crate::models::{EngineState, OptimizationMetrics, Phase};
use crate::notify::{Component, EngineEvent, EventBus};
use crate::observability::EngineMetrics;
use crate::predictor::HealthPredictor;
use crate::retry::{ClassifiedError, ErrorRecord};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

fn default_interval_secs() -> u64 {
    5
}
fn default_performance_floor() -> f64 {
    0.7
}
fn default_issue_penalty() -> f64 {
    0.1
}
fn default_adjustment_step() -> f64 {
    0.1
}

/// Optimization loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Performance below this counts as an issue and triggers a candidate
    #[serde(default = "default_performance_floor")]
    pub performance_floor: f64,
    /// Score decrement per detected issue or bottleneck
    #[serde(default = "default_issue_penalty")]
    pub issue_penalty: f64,
    /// Additive nudge applied by a committed candidate
    #[serde(default = "default_adjustment_step")]
    pub adjustment_step: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            performance_floor: default_performance_floor(),
            issue_penalty: default_issue_penalty(),
            adjustment_step: default_adjustment_step(),
        }
    }
}

/// Which snapshot field a candidate adjusts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentTarget {
    Performance,
    AdaptationRate,
    SystemHealth,
    OptimizationPotential,
}

/// One additive candidate adjustment
#[derive(Debug, Clone, Serialize)]
pub struct Adjustment {
    pub target: AdjustmentTarget,
    pub delta: f64,
    pub reason: String,
}

/// Issue counts gathered by the analyze phase
#[derive(Debug, Clone, Copy, Default)]
struct AnalysisCounts {
    performance_issues: u32,
    resource_bottlenecks: u32,
}

/// The repeating analyze → predict → generate → apply cycle over the
/// canonical health snapshot
pub struct SelfOptimizer {
    config: OptimizerConfig,
    detector: Arc<RwLock<PatternDetector>>,
    predictor: Arc<RwLock<dyn HealthPredictor>>,
    state: Arc<RwLock<OptimizationMetrics>>,
    bus: EventBus,
    metrics: EngineMetrics,
}

impl SelfOptimizer {
    pub fn new(
        config: OptimizerConfig,
        detector: Arc<RwLock<PatternDetector>>,
        predictor: Arc<RwLock<dyn HealthPredictor>>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            detector,
            predictor,
            state: Arc::new(RwLock::new(OptimizationMetrics::default())),
            bus,
            metrics: EngineMetrics::new(),
        }
    }

    /// Current canonical snapshot
    pub async fn state(&self) -> OptimizationMetrics {
        *self.state.read().await
    }

    /// Run cycles until a shutdown signal arrives. A cycle in flight when
    /// the signal fires completes before the loop goes dormant.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval_secs,
            "Starting self-optimization loop"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Per-cycle fault isolation: a failed cycle is logged
                    // and notified, never terminates the loop
                    if let Err(e) = self.run_cycle().await {
                        self.metrics.inc_cycle_failures();
                        warn!(error = %e, "Optimization cycle failed, continuing");
                        let classified = ClassifiedError::from(e);
                        self.bus.publish(
                            Component::Optimizer,
                            EngineEvent::Error(ErrorRecord::from(&classified)),
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down self-optimization loop");
                    break;
                }
            }
        }
    }

    /// One full off-cycle pass, returning the committed snapshot
    pub async fn run_once(&self) -> Result<OptimizationMetrics> {
        self.run_cycle().await
    }

    /// The four-phase cycle body
    async fn run_cycle(&self) -> Result<OptimizationMetrics> {
        // Phase 1: analyze
        let (analyzed, counts) = {
            let detector = self.detector.read().await;
            self.analyze(&detector).await
        };

        // Phase 2: predict (surfaced as a notification-only sub-state)
        self.bus.publish(
            Component::Optimizer,
            EngineEvent::StateUpdated(EngineState {
                metrics: analyzed,
                phase: Phase::Predicting,
            }),
        );
        let prediction = {
            let mut predictor = self.predictor.write().await;
            predictor.predict(&analyzed)?
        };

        // Phase 3: generate
        let candidates = self.generate(&analyzed, &counts, &prediction.metrics, prediction.confidence);

        // Phase 4: apply. Only the first candidate is committed; later
        // candidates in the same cycle are discarded, not merged
        let committed = match candidates.first() {
            Some(adjustment) => {
                let adjusted = apply_adjustment(&analyzed, adjustment);
                debug!(
                    target = ?adjustment.target,
                    delta = adjustment.delta,
                    reason = %adjustment.reason,
                    discarded = candidates.len() - 1,
                    "Applying optimization candidate"
                );
                self.bus.publish(
                    Component::Optimizer,
                    EngineEvent::StateUpdated(EngineState {
                        metrics: adjusted,
                        phase: Phase::Learning,
                    }),
                );
                self.bus.publish(
                    Component::Optimizer,
                    EngineEvent::OptimizationApplied(adjusted),
                );
                adjusted
            }
            None => analyzed,
        };

        {
            let mut state = self.state.write().await;
            *state = committed;
        }

        self.metrics.inc_optimization_cycles();
        self.metrics.set_overall_score(committed.overall_score);
        self.bus.publish(
            Component::Optimizer,
            EngineEvent::StateUpdated(EngineState {
                metrics: committed,
                phase: Phase::Optimizing,
            }),
        );

        Ok(committed)
    }

    /// Derive the analyzed snapshot from the latest observed sample.
    ///
    /// Scores start at their upper bound and are decremented by a fixed
    /// penalty per detected issue; system health weighs issues and
    /// bottlenecks together.
    async fn analyze(&self, detector: &PatternDetector) -> (OptimizationMetrics, AnalysisCounts) {
        let mut counts = AnalysisCounts::default();
        let thresholds = detector.thresholds();

        if let Some(sample) = detector.latest_sample() {
            if sample.response_time_ms > thresholds.response_time_ms {
                counts.performance_issues += 1;
            }
            if sample.error_rate > thresholds.error_rate {
                counts.performance_issues += 1;
            }
            if sample.cpu_usage > thresholds.cpu_usage {
                counts.resource_bottlenecks += 1;
            }
            if sample.memory_usage > thresholds.memory_usage {
                counts.resource_bottlenecks += 1;
            }
        }

        let prior = self.state.read().await;
        if prior.performance < self.config.performance_floor {
            counts.performance_issues += 1;
        }

        let penalty = self.config.issue_penalty;
        let performance = 1.0 - penalty * counts.performance_issues as f64;
        let adaptation_rate = 1.0 - penalty * counts.resource_bottlenecks as f64;
        let system_health = 1.0
            - penalty * (counts.performance_issues + counts.resource_bottlenecks) as f64;
        let optimization_potential = (performance.clamp(0.0, 1.0)
            + adaptation_rate.clamp(0.0, 1.0)
            + system_health.clamp(0.0, 1.0))
            / 3.0;

        (
            OptimizationMetrics::from_components(
                performance,
                adaptation_rate,
                system_health,
                optimization_potential,
            ),
            counts,
        )
    }

    /// Zero or more additive candidates, each nudging one field toward its
    /// bound. Prediction-based candidates require a gated (non-zero)
    /// confidence.
    fn generate(
        &self,
        analyzed: &OptimizationMetrics,
        counts: &AnalysisCounts,
        predicted: &OptimizationMetrics,
        prediction_confidence: f64,
    ) -> Vec<Adjustment> {
        let step = self.config.adjustment_step;
        let mut candidates = Vec::new();

        if analyzed.performance < self.config.performance_floor {
            candidates.push(Adjustment {
                target: AdjustmentTarget::Performance,
                delta: step,
                reason: "performance below floor".to_string(),
            });
        }

        if counts.resource_bottlenecks > 0 {
            candidates.push(Adjustment {
                target: AdjustmentTarget::AdaptationRate,
                delta: step,
                reason: format!("{} resource bottlenecks", counts.resource_bottlenecks),
            });
        }

        if prediction_confidence > 0.0 && predicted.overall_score < analyzed.overall_score {
            candidates.push(Adjustment {
                target: AdjustmentTarget::OptimizationPotential,
                delta: step,
                reason: "confident predicted decline".to_string(),
            });
        }

        candidates
    }
}

/// Apply one additive adjustment, clamped to [0, 1], re-deriving the
/// overall score
fn apply_adjustment(metrics: &OptimizationMetrics, adjustment: &Adjustment) -> OptimizationMetrics {
    let [mut performance, mut adaptation_rate, mut system_health, mut optimization_potential] =
        metrics.components();
    let slot = match adjustment.target {
        AdjustmentTarget::Performance => &mut performance,
        AdjustmentTarget::AdaptationRate => &mut adaptation_rate,
        AdjustmentTarget::SystemHealth => &mut system_health,
        AdjustmentTarget::OptimizationPotential => &mut optimization_potential,
    };
    *slot = (*slot + adjustment.delta).clamp(0.0, 1.0);
    OptimizationMetrics::from_components(
        performance,
        adaptation_rate,
        system_health,
        optimization_potential,
    )
}

//! Notification bus
//!
//! Components publish fire-and-forget notifications onto one shared
//! broadcast channel; the orchestrator hands out tagged subscriptions.
//! Ordering is FIFO within a single publisher only; there is no
//! cross-component guarantee.

use crate::models::{Anomaly, EngineState, OptimizationMetrics, Pattern, Prediction};
use crate::retry::ErrorRecord;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default channel capacity; slow subscribers lag rather than block
/// publishers.
const DEFAULT_BUS_CAPACITY: usize = 256;

/// Which component emitted a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Windowing,
    Detector,
    Predictor,
    Optimizer,
    Orchestrator,
    Retry,
}

/// Outward notification payloads, the sole contract toward presentation
/// and telemetry-export collaborators
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    PatternDetected(Pattern),
    AnomalyDetected(Anomaly),
    PredictionUpdated(Prediction),
    OptimizationApplied(OptimizationMetrics),
    StateUpdated(EngineState),
    Error(ErrorRecord),
}

/// A tagged notification on the merged stream
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub source: Component,
    pub event: EngineEvent,
    pub timestamp: i64,
}

/// Cloneable handle onto the shared notification channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notification. A send with no live subscribers is not an
    /// error; producers are never blocked.
    pub fn publish(&self, source: Component, event: EngineEvent) {
        let notification = Notification {
            source,
            event,
            timestamp: chrono::Utc::now().timestamp(),
        };
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Phase, PatternDirection, PatternKind};

    fn test_pattern() -> Pattern {
        Pattern {
            kind: PatternKind::Trend,
            subject: "cpu_usage".to_string(),
            direction: PatternDirection::Rising,
            magnitude: 0.5,
            description: "test".to_string(),
            detected_at: 0,
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish(Component::Detector, EngineEvent::PatternDetected(test_pattern()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_tagged_notification() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Component::Detector, EngineEvent::PatternDetected(test_pattern()));

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.source, Component::Detector);
        assert!(matches!(
            notification.event,
            EngineEvent::PatternDetected(_)
        ));
    }

    #[tokio::test]
    async fn test_single_publisher_order_is_fifo() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let state = EngineState {
            metrics: OptimizationMetrics::default(),
            phase: Phase::Optimizing,
        };
        bus.publish(Component::Optimizer, EngineEvent::StateUpdated(state));
        bus.publish(
            Component::Optimizer,
            EngineEvent::OptimizationApplied(OptimizationMetrics::default()),
        );

        assert!(matches!(
            rx.recv().await.unwrap().event,
            EngineEvent::StateUpdated(_)
        ));
        assert!(matches!(
            rx.recv().await.unwrap().event,
            EngineEvent::OptimizationApplied(_)
        ));
    }
}

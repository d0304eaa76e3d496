//! End-to-end pipeline behavior through the orchestrator's public surface

use telemetry_engine::{
    DiscreteEvent, EngineConfig, EngineEvent, EventKind, EventPriority, MetricSample, Orchestrator,
    Phase,
};

fn sample(ts: i64, error_rate: f64) -> MetricSample {
    MetricSample {
        timestamp: ts,
        cpu_usage: 50.0,
        memory_usage: 50.0,
        response_time_ms: 100.0,
        error_rate,
        active_connections: 10,
        throughput: 100.0,
    }
}

fn error_event(id: u32) -> DiscreteEvent {
    DiscreteEvent {
        id: format!("evt-{}", id),
        kind: EventKind::Error,
        source: "pipeline".to_string(),
        priority: EventPriority::High,
        message: "request failed".to_string(),
        payload: serde_json::Value::Null,
        timestamp: id as i64,
    }
}

#[tokio::test]
async fn test_rising_error_rate_degrades_health_monotonically() {
    let orchestrator = Orchestrator::new(EngineConfig::default());
    let mut rx = orchestrator.subscribe();
    orchestrator.start().await;

    let mut last_overall = f64::INFINITY;

    // Error rate climbs from 0 to 10, crossing the 5.0 threshold halfway
    for i in 0..20 {
        let error_rate = i as f64 * 10.0 / 19.0;
        orchestrator.ingest_metric(sample(i, error_rate)).await;

        let committed = orchestrator.force_optimization().await.unwrap();
        assert!(
            committed.overall_score <= last_overall + 1e-9,
            "overall score rose at step {}: {} -> {}",
            i,
            last_overall,
            committed.overall_score
        );
        last_overall = committed.overall_score;
    }
    orchestrator.stop().await;

    // The threshold crossing produced at least one anomaly notification
    let mut anomaly_count = 0;
    while let Ok(notification) = rx.try_recv() {
        if let EngineEvent::AnomalyDetected(anomaly) = notification.event {
            assert_eq!(anomaly.metric, "error_rate");
            assert!(anomaly.value > 5.0);
            anomaly_count += 1;
        }
    }
    assert!(anomaly_count > 0);

    // Health actually degraded once the threshold was breached
    let state = orchestrator.state().await;
    assert!(state.metrics.overall_score < 1.0);
}

#[tokio::test]
async fn test_error_burst_surfaces_frequency_pattern() {
    let orchestrator = Orchestrator::new(EngineConfig::default());
    let mut rx = orchestrator.subscribe();
    orchestrator.start().await;

    for i in 0..5 {
        orchestrator.ingest_event(error_event(i)).await;
    }
    orchestrator.stop().await;

    let mut saw_frequency_pattern = false;
    while let Ok(notification) = rx.try_recv() {
        if let EngineEvent::PatternDetected(pattern) = notification.event {
            if pattern.subject == "error" {
                saw_frequency_pattern = true;
            }
        }
    }
    assert!(saw_frequency_pattern);
    assert_eq!(orchestrator.events_history().await.len(), 5);
}

#[tokio::test]
async fn test_start_forced_cycle_stop_round_trip() {
    let orchestrator = Orchestrator::new(EngineConfig::default());

    orchestrator.start().await;
    assert_eq!(orchestrator.state().await.phase, Phase::Analyzing);

    orchestrator.ingest_metric(sample(0, 1.0)).await;
    let committed = orchestrator.force_optimization().await.unwrap();
    assert!((0.0..=1.0).contains(&committed.overall_score));

    orchestrator.stop().await;
    assert_eq!(orchestrator.state().await.phase, Phase::Idle);

    // Queries keep working after shutdown
    assert_eq!(orchestrator.metrics_history().await.len(), 1);
    assert!(!orchestrator.prediction_history().await.is_empty());
}

#[tokio::test]
async fn test_prediction_confidence_stays_gated_early() {
    let orchestrator = Orchestrator::new(EngineConfig::default());
    orchestrator.start().await;

    // A handful of cycles cannot fill the prediction history, so every
    // confidence stays at exactly zero
    for i in 0..5 {
        orchestrator.ingest_metric(sample(i, 1.0)).await;
        orchestrator.force_optimization().await.unwrap();
    }
    orchestrator.stop().await;

    let predictions = orchestrator.prediction_history().await;
    assert!(predictions.len() >= 5);
    for prediction in predictions {
        assert_eq!(prediction.confidence, 0.0);
    }
}

//! Telemetry analysis and self-optimization engine
//!
//! This crate provides the core functionality for:
//! - Sliding-window telemetry aggregation and analysis
//! - Streaming anomaly and pattern detection
//! - Predictive health extrapolation
//! - A fixed-interval self-optimization loop
//! - Retry governance with classified errors and backoff
//! - Notification fan-out and observability

pub mod detector;
pub mod models;
pub mod notify;
pub mod observability;
pub mod optimizer;
pub mod orchestrator;
pub mod predictor;
pub mod retry;
pub mod ring;
pub mod stats;
pub mod window;

pub use models::*;
pub use notify::{Component, EngineEvent, EventBus, Notification};
pub use observability::EngineMetrics;
pub use orchestrator::{EngineConfig, Orchestrator};
pub use predictor::HealthPredictor;
pub use retry::{BackoffStrategy, ClassifiedError, ErrorKind, RetryGovernor, RetryOptions};

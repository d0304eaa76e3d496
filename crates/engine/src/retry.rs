//! Failure classification and backoff-governed retries
//!
//! Every handled failure is classified into a fixed taxonomy, appended to a
//! rolling error log, and fanned out to kind-specific and wildcard
//! listeners. Retries are governed per kind by one of four backoff
//! strategies. Callers branch on `kind`/`severity`, never on message text.

use crate::notify::{Component, EngineEvent, EventBus};
use crate::ring::BoundedHistory;
use serde::Serialize;
use std::future::Future;
use std::mem::{discriminant, Discriminant};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Default rolling error-log capacity
const DEFAULT_LOG_CAPACITY: usize = 100;

/// Default retry budget (up to 4 total attempts)
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Network,
    Resource,
    Timeout,
    Internal,
    Api { status: u16 },
    Auth,
    Data,
    Model,
    Unknown,
}

impl ErrorKind {
    /// Default severity for this kind
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::Validation => Severity::Low,
            ErrorKind::Network => Severity::Medium,
            ErrorKind::Resource => Severity::High,
            ErrorKind::Timeout => Severity::Medium,
            ErrorKind::Internal => Severity::High,
            ErrorKind::Api { .. } => Severity::Medium,
            ErrorKind::Auth => Severity::Critical,
            ErrorKind::Data => Severity::High,
            ErrorKind::Model => Severity::High,
            ErrorKind::Unknown => Severity::Medium,
        }
    }

    /// Whether this kind is retried by default
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Resource | ErrorKind::Timeout | ErrorKind::Api { .. }
        )
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A classified failure surfaced to callers
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind:?} ({severity:?}): {context}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub context: String,
    pub cause: Option<String>,
    pub timestamp: i64,
}

impl ClassifiedError {
    /// Classify a failure with the kind's default severity and retryability
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        let severity = kind.default_severity();
        let retryable = kind.default_retryable();
        Self {
            kind,
            severity,
            retryable,
            context: context.into(),
            cause: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl From<anyhow::Error> for ClassifiedError {
    /// Foreign errors wrap as Unknown/Medium
    fn from(err: anyhow::Error) -> Self {
        ClassifiedError::new(ErrorKind::Unknown, "unclassified failure")
            .with_cause(err.to_string())
    }
}

/// Log entry produced for every handled failure
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub context: String,
    pub cause: Option<String>,
    pub timestamp: i64,
}

impl From<&ClassifiedError> for ErrorRecord {
    fn from(err: &ClassifiedError) -> Self {
        Self {
            kind: err.kind.clone(),
            severity: err.severity,
            retryable: err.retryable,
            context: err.context.clone(),
            cause: err.cause.clone(),
            timestamp: err.timestamp,
        }
    }
}

/// Backoff strategy variants, attempt numbers are 1-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed { delay_ms: u64 },
    Linear { base_ms: u64, increment_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
    JitteredExponential { base_ms: u64, max_ms: u64 },
}

impl BackoffStrategy {
    /// Default strategy for an error kind
    pub fn for_kind(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::Network => BackoffStrategy::Exponential {
                base_ms: 1000,
                max_ms: 30_000,
            },
            ErrorKind::Timeout => BackoffStrategy::Linear {
                base_ms: 500,
                increment_ms: 500,
            },
            ErrorKind::Api { .. } => BackoffStrategy::JitteredExponential {
                base_ms: 1000,
                max_ms: 30_000,
            },
            _ => BackoffStrategy::Fixed { delay_ms: 1000 },
        }
    }

    /// Deterministic pre-jitter delay for the given attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let ms = match *self {
            BackoffStrategy::Fixed { delay_ms } => delay_ms,
            BackoffStrategy::Linear {
                base_ms,
                increment_ms,
            } => base_ms.saturating_add(increment_ms.saturating_mul(attempt as u64)),
            BackoffStrategy::Exponential { base_ms, max_ms }
            | BackoffStrategy::JitteredExponential { base_ms, max_ms } => {
                let exp = (attempt - 1).min(63);
                base_ms.saturating_mul(1u64 << exp).min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }

    /// Actual wait for the given attempt. The jittered variant samples
    /// uniformly between 50% and 100% of the capped value; the others are
    /// deterministic.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        match self {
            BackoffStrategy::JitteredExponential { .. } => {
                base.mul_f64(0.5 + 0.5 * jitter_fraction())
            }
            _ => base,
        }
    }
}

/// Uniform sample in [0, 1) derived from the clock's sub-second nanos
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as f64;
    nanos / 1_000_000_000.0
}

/// Per-call retry options
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt (3 means up to 4 total attempts)
    pub max_retries: u32,
    /// Kinds to retry even when not retryable by default
    pub allowed_kinds: Vec<ErrorKind>,
    /// Per-attempt timeout; exceeding it classifies as Timeout
    pub timeout: Option<Duration>,
    /// Override of the per-kind backoff strategy
    pub backoff: Option<BackoffStrategy>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            allowed_kinds: Vec::new(),
            timeout: None,
            backoff: None,
        }
    }
}

impl RetryOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn allow_kind(mut self, kind: ErrorKind) -> Self {
        self.allowed_kinds.push(kind);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Allow-list matching ignores kind payloads (any Api status matches)
    fn allows(&self, kind: &ErrorKind) -> bool {
        self.allowed_kinds
            .iter()
            .any(|k| discriminant(k) == discriminant(kind))
    }
}

type Listener = mpsc::UnboundedSender<ErrorRecord>;

/// Classifies failures, keeps a rolling log, and executes backoff-governed
/// retries for arbitrary operations
pub struct RetryGovernor {
    log: RwLock<BoundedHistory<ErrorRecord>>,
    listeners: RwLock<Vec<(Option<Discriminant<ErrorKind>>, Listener)>>,
    bus: EventBus,
}

impl RetryGovernor {
    pub fn new(bus: EventBus) -> Self {
        Self::with_log_capacity(bus, DEFAULT_LOG_CAPACITY)
    }

    pub fn with_log_capacity(bus: EventBus, capacity: usize) -> Self {
        Self {
            log: RwLock::new(BoundedHistory::new(capacity)),
            listeners: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Register a listener. `kind: None` subscribes to every failure;
    /// otherwise only failures of the matching kind are delivered.
    pub async fn subscribe(
        &self,
        kind: Option<ErrorKind>,
    ) -> mpsc::UnboundedReceiver<ErrorRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.listeners.write().await;
        listeners.push((kind.as_ref().map(discriminant), tx));
        rx
    }

    /// Oldest-first snapshot of the rolling error log
    pub async fn error_log(&self) -> Vec<ErrorRecord> {
        self.log.read().await.snapshot()
    }

    /// Classify, log, and notify a failure
    async fn record(&self, err: &ClassifiedError, attempt: u32) {
        let record = ErrorRecord::from(err);

        warn!(
            kind = ?record.kind,
            severity = ?record.severity,
            retryable = record.retryable,
            attempt,
            context = %record.context,
            "Operation failed"
        );

        {
            let mut log = self.log.write().await;
            log.push(record.clone());
        }

        {
            let mut listeners = self.listeners.write().await;
            // Dropped receivers are pruned as they are discovered
            listeners.retain(|(filter, tx)| {
                let matches = match filter {
                    None => true,
                    Some(d) => *d == discriminant(&record.kind),
                };
                if matches {
                    tx.send(record.clone()).is_ok()
                } else {
                    !tx.is_closed()
                }
            });
        }

        self.bus.publish(Component::Retry, EngineEvent::Error(record));
    }

    /// Run an operation with classification, logging, notification and
    /// backoff-governed retries.
    ///
    /// The operation is retried when the classified error is retryable (or
    /// its kind is on the caller allow-list) and attempts remain; otherwise
    /// the classified error is returned.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        mut operation: F,
        options: &RetryOptions,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let total_attempts = options.max_retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = match options.timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(ClassifiedError::new(
                        ErrorKind::Timeout,
                        format!("operation exceeded {} ms", limit.as_millis()),
                    )),
                },
                None => operation().await,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    self.record(&err, attempt).await;

                    let may_retry = err.retryable || options.allows(&err.kind);
                    if may_retry && attempt < total_attempts {
                        let strategy = options
                            .backoff
                            .clone()
                            .unwrap_or_else(|| BackoffStrategy::for_kind(&err.kind));
                        let delay = strategy.delay(attempt);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            kind = ?err.kind,
                            "Retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_backoff() -> BackoffStrategy {
        BackoffStrategy::Fixed { delay_ms: 1 }
    }

    #[test]
    fn test_exponential_delays_are_deterministic() {
        let strategy = BackoffStrategy::Exponential {
            base_ms: 1000,
            max_ms: 30_000,
        };
        let delays: Vec<u64> = (1..=5)
            .map(|a| strategy.delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

        // Capped thereafter
        assert_eq!(strategy.delay(6).as_millis(), 30_000);
        assert_eq!(strategy.delay(12).as_millis(), 30_000);
    }

    #[test]
    fn test_linear_delays() {
        let strategy = BackoffStrategy::Linear {
            base_ms: 500,
            increment_ms: 500,
        };
        assert_eq!(strategy.delay(1).as_millis(), 1000);
        assert_eq!(strategy.delay(3).as_millis(), 2000);
    }

    #[test]
    fn test_jittered_delay_within_bounds() {
        let strategy = BackoffStrategy::JitteredExponential {
            base_ms: 1000,
            max_ms: 30_000,
        };
        for _ in 0..50 {
            let d = strategy.delay(3).as_millis() as u64;
            assert!((2000..=4000).contains(&d), "delay {} out of bounds", d);
        }
    }

    #[test]
    fn test_default_strategies_per_kind() {
        assert!(matches!(
            BackoffStrategy::for_kind(&ErrorKind::Network),
            BackoffStrategy::Exponential { .. }
        ));
        assert!(matches!(
            BackoffStrategy::for_kind(&ErrorKind::Timeout),
            BackoffStrategy::Linear { .. }
        ));
        assert!(matches!(
            BackoffStrategy::for_kind(&ErrorKind::Api { status: 503 }),
            BackoffStrategy::JitteredExponential { .. }
        ));
        assert!(matches!(
            BackoffStrategy::for_kind(&ErrorKind::Unknown),
            BackoffStrategy::Fixed { .. }
        ));
    }

    #[test]
    fn test_foreign_error_wraps_as_unknown_medium() {
        let err: ClassifiedError = anyhow::anyhow!("boom").into();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.severity, Severity::Medium);
        assert!(!err.retryable);
        assert_eq!(err.cause.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_always_failing_network_op_attempts_exactly_three_times() {
        let governor = RetryGovernor::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let options = RetryOptions::default()
            .with_max_retries(2)
            .with_backoff(fast_backoff());

        let result: Result<(), _> = governor
            .run_with_retry(
                move || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(ClassifiedError::new(ErrorKind::Network, "unreachable"))
                    }
                },
                &options,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_non_retryable_kind_fails_on_first_attempt() {
        let governor = RetryGovernor::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let options = RetryOptions::default().with_backoff(fast_backoff());

        let result: Result<(), _> = governor
            .run_with_retry(
                move || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(ClassifiedError::new(ErrorKind::Validation, "bad input"))
                    }
                },
                &options,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_allow_list_forces_retry_of_non_retryable_kind() {
        let governor = RetryGovernor::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let options = RetryOptions::default()
            .with_max_retries(1)
            .allow_kind(ErrorKind::Validation)
            .with_backoff(fast_backoff());

        let result: Result<(), _> = governor
            .run_with_retry(
                move || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(ClassifiedError::new(ErrorKind::Validation, "bad input"))
                    }
                },
                &options,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let governor = RetryGovernor::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let options = RetryOptions::default().with_backoff(fast_backoff());

        let result = governor
            .run_with_retry(
                move || {
                    let calls = calls_clone.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(ClassifiedError::new(ErrorKind::Network, "flaky"))
                        } else {
                            Ok(42)
                        }
                    }
                },
                &options,
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_classifies_as_timeout_kind() {
        let governor = RetryGovernor::new(EventBus::new());

        let options = RetryOptions::default()
            .with_max_retries(0)
            .with_timeout(Duration::from_millis(5));

        let result: Result<(), _> = governor
            .run_with_retry(
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                },
                &options,
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_error_log_is_bounded_and_oldest_first() {
        let governor = RetryGovernor::with_log_capacity(EventBus::new(), 3);
        let options = RetryOptions::default().with_backoff(fast_backoff());

        for i in 0..5 {
            let _: Result<(), _> = governor
                .run_with_retry(
                    || async move {
                        Err(ClassifiedError::new(
                            ErrorKind::Internal,
                            format!("failure {}", i),
                        ))
                    },
                    &options,
                )
                .await;
        }

        let log = governor.error_log().await;
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].context, "failure 2");
        assert_eq!(log[2].context, "failure 4");
    }

    #[tokio::test]
    async fn test_listeners_receive_matching_kinds() {
        let governor = RetryGovernor::new(EventBus::new());
        let mut network_rx = governor.subscribe(Some(ErrorKind::Network)).await;
        let mut wildcard_rx = governor.subscribe(None).await;

        let options = RetryOptions::default().with_backoff(fast_backoff());

        let _: Result<(), _> = governor
            .run_with_retry(
                || async { Err(ClassifiedError::new(ErrorKind::Validation, "v")) },
                &options,
            )
            .await;
        let _: Result<(), _> = governor
            .run_with_retry(
                || async {
                    Err(ClassifiedError::new(ErrorKind::Network, "n").with_retryable(false))
                },
                &options,
            )
            .await;

        // Kind-specific listener sees only network failures
        let received = network_rx.recv().await.unwrap();
        assert_eq!(received.kind, ErrorKind::Network);
        assert!(network_rx.try_recv().is_err());

        // Wildcard listener sees both
        assert_eq!(wildcard_rx.recv().await.unwrap().kind, ErrorKind::Validation);
        assert_eq!(wildcard_rx.recv().await.unwrap().kind, ErrorKind::Network);
    }
}

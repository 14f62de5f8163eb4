use crate::tracker_store::{
    serialize_duration_ms, PerformanceSample, SampleWindow, StoreResult, TrackerStore,
};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Summary statistics over a window of samples for one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub operation: String,
    pub count: usize,
    /// `None` when the window is empty.
    pub success_rate: Option<f64>,
    #[serde(rename = "mean_ms", serialize_with = "serialize_duration_ms")]
    pub mean: Duration,
    #[serde(rename = "p50_ms", serialize_with = "serialize_duration_ms")]
    pub p50: Duration,
    #[serde(rename = "p95_ms", serialize_with = "serialize_duration_ms")]
    pub p95: Duration,
    #[serde(rename = "p99_ms", serialize_with = "serialize_duration_ms")]
    pub p99: Duration,
    #[serde(rename = "max_ms", serialize_with = "serialize_duration_ms")]
    pub max: Duration,
}

impl Aggregate {
    fn empty(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            count: 0,
            success_rate: None,
            mean: Duration::ZERO,
            p50: Duration::ZERO,
            p95: Duration::ZERO,
            p99: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn from_samples(operation: &str, samples: &[PerformanceSample]) -> Self {
        if samples.is_empty() {
            return Self::empty(operation);
        }
        let mut durations: Vec<Duration> = samples.iter().map(|s| s.duration).collect();
        durations.sort_unstable();
        let successes = samples.iter().filter(|s| s.success).count();
        let total: Duration = durations.iter().sum();

        Self {
            operation: operation.to_string(),
            count: samples.len(),
            success_rate: Some(successes as f64 / samples.len() as f64),
            mean: total / samples.len() as u32,
            p50: percentile(&durations, 50.0),
            p95: percentile(&durations, 95.0),
            p99: percentile(&durations, 99.0),
            max: durations[durations.len() - 1],
        }
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Records timed operation outcomes and aggregates them on demand.
#[derive(Clone)]
pub struct PerformanceMonitor {
    store: Arc<dyn TrackerStore>,
}

impl PerformanceMonitor {
    pub fn new(store: Arc<dyn TrackerStore>) -> Self {
        Self { store }
    }

    pub fn record(&self, operation: &str, duration: Duration, success: bool) -> StoreResult<()> {
        self.store.record_performance_sample(&PerformanceSample {
            operation: operation.to_string(),
            timestamp: Utc::now(),
            duration,
            success,
        })
    }

    fn record_quietly(&self, operation: &str, duration: Duration, success: bool) {
        if let Err(e) = self.record(operation, duration, success) {
            warn!("Failed to record timing for {}: {}", operation, e);
        }
    }

    /// Runs `f`, recording its duration and whether it returned `Ok`. The
    /// result is passed through untouched.
    pub fn measure<T, E, F>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let start = Instant::now();
        let result = f();
        self.record_quietly(operation, start.elapsed(), result.is_ok());
        result
    }

    pub async fn measure_async<T, E, Fut>(&self, operation: &str, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.record_quietly(operation, start.elapsed(), result.is_ok());
        result
    }

    pub fn aggregate(&self, operation: &str, window: SampleWindow) -> StoreResult<Aggregate> {
        let samples = self.store.performance_samples(operation, window)?;
        Ok(Aggregate::from_samples(operation, &samples))
    }

    /// Aggregates for every operation with recorded samples. Operations with
    /// nothing inside `window` are left out.
    pub fn aggregate_all(&self, window: SampleWindow) -> StoreResult<Vec<Aggregate>> {
        let mut aggregates = Vec::new();
        for operation in self.store.operation_names()? {
            let aggregate = self.aggregate(&operation, window)?;
            if aggregate.count > 0 {
                aggregates.push(aggregate);
            }
        }
        Ok(aggregates)
    }
}

//! Run metrics.
//!
//! A [`MetricsCollector`] is shared by every task of a run. The runner records
//! the built-in counters below plus per-job (`job.<name>.succeeded`, ...) and
//! per-resource (`resource.<name>.versions`) counters. Custom metrics can be
//! registered alongside them through the [`Metric`] trait.
//!
//! ```
//! use conflux::metrics::{MetricsCollector, BUILDS_STARTED};
//!
//! let metrics = MetricsCollector::new();
//! metrics.increment_counter(BUILDS_STARTED, 2);
//! assert_eq!(metrics.counter(BUILDS_STARTED), Some(2));
//! assert_eq!(metrics.to_json()[BUILDS_STARTED]["value"], 2);
//! ```

use anyhow::Result;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

pub const BUILDS_STARTED: &str = "builds_started";
pub const BUILDS_SUCCEEDED: &str = "builds_succeeded";
pub const BUILDS_FAILED: &str = "builds_failed";
pub const VERSIONS_DISCOVERED: &str = "versions_discovered";
pub const BUILD_DURATION_MS: &str = "build_duration_ms";

/// Trait for custom metrics.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g., `builds_started`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    /// Optional description of what this metric measures.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Cast to Any for in-place updates.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Thread-safe, cloneable registry of metrics for one run.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

struct MetricsCollectorInner {
    metrics: BTreeMap<String, Box<dyn Metric>>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsCollectorInner {
                metrics: BTreeMap::new(),
                start_time: None,
                end_time: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsCollectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a custom metric, replacing any metric with the same name.
    pub fn register(&self, metric: Box<dyn Metric>) {
        self.lock().metrics.insert(metric.name().to_string(), metric);
    }

    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Wall time between [`record_start`](Self::record_start) and
    /// [`record_end`](Self::record_end), once both have been called.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Add `value` to the counter `name`, creating it at zero if needed.
    ///
    /// A non-counter metric registered under `name` is left untouched.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut inner = self.lock();
        let metric = inner
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Box::new(CounterMetric::new(name)));
        if let Some(counter) = metric.as_any_mut().downcast_mut::<CounterMetric>() {
            counter.count += value;
        }
    }

    /// Current value of the counter `name`.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        let mut inner = self.lock();
        inner
            .metrics
            .get_mut(name)
            .and_then(|m| m.as_any_mut().downcast_mut::<CounterMetric>())
            .map(|c| c.count)
    }

    /// Record `value` in the histogram `name`, creating it if needed.
    pub fn record_value(&self, name: &str, value: f64) {
        let mut inner = self.lock();
        let metric = inner
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Box::new(HistogramMetric::new(name)));
        if let Some(histogram) = metric.as_any_mut().downcast_mut::<HistogramMetric>() {
            histogram.record(value);
        }
    }

    /// All metrics as a JSON object of `{ name: { value, description? } }`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut metrics_json = serde_json::Map::new();
        for (name, metric) in &inner.metrics {
            let mut metric_obj = serde_json::Map::new();
            metric_obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                metric_obj.insert("description".to_string(), json!(desc));
            }
            metrics_json.insert(name.clone(), Value::Object(metric_obj));
        }
        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            metrics_json.insert(
                "run_time_ms".to_string(),
                json!({
                    "value": end.duration_since(start).as_millis(),
                    "description": "Total run time in milliseconds",
                }),
            );
        }
        Value::Object(metrics_json)
    }

    /// Metric names and values.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.lock()
            .metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value()))
            .collect()
    }

    /// Log every metric at `info`.
    pub fn log(&self) {
        if let Some(elapsed) = self.elapsed() {
            info!(elapsed_ms = elapsed.as_millis(), "run finished");
        }
        for (name, value) in self.snapshot() {
            info!(metric = %name, %value, "metric");
        }
    }

    /// Save all metrics to a JSON file.
    ///
    /// # Errors
    ///
    /// If the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, formatted)?;
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ========== Built-in Metrics ==========

/// A monotonically increasing counter.
pub struct CounterMetric {
    name: String,
    count: u64,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 0,
        }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Samples kept for the percentile estimates of a [`HistogramMetric`].
pub const HISTOGRAM_WINDOW: usize = 1024;

/// Distribution of recorded values, reported as count/min/max/mean/p50/p95.
///
/// Count, min, max and mean cover every value ever recorded; the percentiles
/// are taken over the most recent [`HISTOGRAM_WINDOW`] values.
pub struct HistogramMetric {
    name: String,
    recent: VecDeque<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recent: VecDeque::with_capacity(HISTOGRAM_WINDOW),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn record(&mut self, value: f64) {
        if self.recent.len() == HISTOGRAM_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

impl Metric for HistogramMetric {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::cast_precision_loss)]
    fn value(&self) -> Value {
        if self.count == 0 {
            return json!({ "count": 0 });
        }
        let mut sorted: Vec<f64> = self.recent.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let window = sorted.len();
        json!({
            "count": self.count,
            "min": self.min,
            "max": self.max,
            "mean": self.sum / self.count as f64,
            "p50": sorted[window / 2],
            "p95": sorted[(window * 95) / 100],
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

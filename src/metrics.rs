/*!
 * Per-endpoint request metrics
 *
 * The collector is a pure observer: it keeps a bounded window of recent
 * attempt samples per endpoint plus lifetime totals, and optionally forwards
 * each sample to a [`MetricsSink`]. Sink failures are swallowed.
 */

use dashmap::DashMap;
use partysync_core_resilience::AttemptObserver;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default number of samples kept per endpoint
pub const DEFAULT_WINDOW: usize = 100;

/// Requests slower than this are logged as warnings
pub const DEFAULT_SLOW_REQUEST: Duration = Duration::from_millis(5000);

/// Minimum lifetime requests before an endpoint can be judged
const POOR_PERFORMER_MIN_REQUESTS: u64 = 5;
const POOR_PERFORMER_MEAN_MS: f64 = 5000.0;
const POOR_PERFORMER_FAILURE_PCT: f64 = 10.0;

/// One attempt against an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationMetric {
    pub endpoint: String,
    pub duration_ms: u64,
    pub succeeded: bool,
}

impl OperationMetric {
    pub fn new(endpoint: impl Into<String>, duration: Duration, succeeded: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            succeeded,
        }
    }
}

/// Failure reported by a metrics sink
#[derive(Debug, Error)]
#[error("Metrics sink error: {0}")]
pub struct SinkError(pub String);

impl From<prometheus::Error> for SinkError {
    fn from(err: prometheus::Error) -> Self {
        SinkError(err.to_string())
    }
}

/// Destination for operation samples
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: &OperationMetric) -> std::result::Result<(), SinkError>;
}

/// Aggregates derived from an endpoint's sample window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStats {
    /// Samples currently in the window
    pub samples: usize,
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    /// Failed samples in the window, as a percentage
    pub failure_rate: f64,
    /// Lifetime attempts
    pub total_requests: u64,
    /// Lifetime failed attempts
    pub total_failures: u64,
}

impl fmt::Display for EndpointStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "avg={:.0}ms, min={}ms, max={}ms, requests={}, failures={} ({:.1}%)",
            self.mean_ms,
            self.min_ms,
            self.max_ms,
            self.total_requests,
            self.total_failures,
            self.failure_rate
        )
    }
}

/// Totals across every endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverallStats {
    pub requests: u64,
    pub failures: u64,
    pub failure_rate: f64,
}

impl fmt::Display for OverallStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests, {} failures ({:.1}% failure rate)",
            self.requests, self.failures, self.failure_rate
        )
    }
}

#[derive(Debug, Default)]
struct EndpointHistory {
    samples: VecDeque<OperationMetric>,
    total_requests: u64,
    total_failures: u64,
}

impl EndpointHistory {
    fn push(&mut self, metric: OperationMetric, window: usize) {
        self.total_requests += 1;
        if !metric.succeeded {
            self.total_failures += 1;
        }
        self.samples.push_back(metric);
        while self.samples.len() > window {
            self.samples.pop_front();
        }
    }

    fn stats(&self) -> Option<EndpointStats> {
        if self.samples.is_empty() {
            return None;
        }
        let count = self.samples.len();
        let (mut sum, mut min, mut max, mut failed) = (0u128, u64::MAX, 0u64, 0usize);
        for sample in &self.samples {
            sum += u128::from(sample.duration_ms);
            min = min.min(sample.duration_ms);
            max = max.max(sample.duration_ms);
            if !sample.succeeded {
                failed += 1;
            }
        }
        Some(EndpointStats {
            samples: count,
            mean_ms: sum as f64 / count as f64,
            min_ms: min,
            max_ms: max,
            failure_rate: failed as f64 * 100.0 / count as f64,
            total_requests: self.total_requests,
            total_failures: self.total_failures,
        })
    }
}

/// Per-endpoint latency and failure tracker
pub struct MetricsCollector {
    endpoints: DashMap<String, EndpointHistory>,
    window: usize,
    slow_threshold: Duration,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("endpoints", &self.endpoints.len())
            .field("window", &self.window)
            .field("slow_threshold", &self.slow_threshold)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_SLOW_REQUEST)
    }
}

impl MetricsCollector {
    pub fn new(window: usize, slow_threshold: Duration) -> Self {
        Self {
            endpoints: DashMap::new(),
            window: window.max(1),
            slow_threshold,
            sink: None,
        }
    }

    /// Forward every sample to `sink` as well
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record one attempt
    pub fn record(&self, metric: OperationMetric) {
        if metric.duration_ms > self.slow_threshold.as_millis() as u64 {
            warn!(
                endpoint = %metric.endpoint,
                duration_ms = metric.duration_ms,
                "Slow request"
            );
        }
        if !metric.succeeded {
            debug!(endpoint = %metric.endpoint, "Request attempt failed");
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&metric) {
                debug!(error = %e, "Ignoring metrics sink failure");
            }
        }

        self.endpoints
            .entry(metric.endpoint.clone())
            .or_default()
            .push(metric, self.window);
    }

    pub fn record_request(&self, endpoint: &str, duration: Duration, succeeded: bool) {
        self.record(OperationMetric::new(endpoint, duration, succeeded));
    }

    /// Aggregates for one endpoint, `None` if it has no samples
    pub fn stats(&self, endpoint: &str) -> Option<EndpointStats> {
        self.endpoints.get(endpoint).and_then(|h| h.stats())
    }

    /// Most recent samples for one endpoint, oldest first
    pub fn samples(&self, endpoint: &str) -> Vec<OperationMetric> {
        self.endpoints
            .get(endpoint)
            .map(|h| h.samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// At least 5 requests and a mean above 5s or a failure rate above 10%
    pub fn is_poor_performer(&self, endpoint: &str) -> bool {
        self.stats(endpoint).is_some_and(|s| {
            s.total_requests >= POOR_PERFORMER_MIN_REQUESTS
                && (s.mean_ms > POOR_PERFORMER_MEAN_MS || s.failure_rate > POOR_PERFORMER_FAILURE_PCT)
        })
    }

    /// Aggregates for every endpoint with samples, sorted by endpoint
    pub fn summary(&self) -> BTreeMap<String, EndpointStats> {
        self.endpoints
            .iter()
            .filter_map(|entry| entry.value().stats().map(|s| (entry.key().clone(), s)))
            .collect()
    }

    /// Lifetime totals across all endpoints
    pub fn overall(&self) -> OverallStats {
        let (requests, failures) = self.endpoints.iter().fold((0, 0), |(r, f), entry| {
            (r + entry.total_requests, f + entry.total_failures)
        });
        let failure_rate = if requests > 0 {
            failures as f64 * 100.0 / requests as f64
        } else {
            0.0
        };
        OverallStats {
            requests,
            failures,
            failure_rate,
        }
    }

    /// Write the summary to the log at INFO
    pub fn log_summary(&self) {
        info!("=== Request performance ===");
        for (endpoint, stats) in self.summary() {
            info!("{}: {}", endpoint, stats);
        }
        info!("OVERALL: {}", self.overall());
    }

    /// JSON dump of the summary and totals
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Dump {
            endpoints: BTreeMap<String, EndpointStats>,
            overall: OverallStats,
        }

        Ok(serde_json::to_string_pretty(&Dump {
            endpoints: self.summary(),
            overall: self.overall(),
        })?)
    }

    /// Drop all samples and totals
    pub fn clear(&self) {
        self.endpoints.clear();
    }
}

impl AttemptObserver for MetricsCollector {
    fn observe(&self, endpoint: &str, elapsed: Duration, succeeded: bool) {
        self.record_request(endpoint, elapsed, succeeded);
    }
}

/// Prometheus export of operation samples
///
/// Registers on a caller-supplied registry:
/// - `partysync_request_duration_seconds{endpoint}` histogram
/// - `partysync_requests_total{endpoint,outcome}` counter
#[derive(Debug, Clone)]
pub struct PrometheusSink {
    duration: HistogramVec,
    requests: IntCounterVec,
}

impl PrometheusSink {
    pub fn new(registry: &Registry) -> std::result::Result<Self, prometheus::Error> {
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "partysync_request_duration_seconds",
                "Remote request attempt latency",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
            &["endpoint"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        let requests = IntCounterVec::new(
            Opts::new("partysync_requests_total", "Remote request attempts"),
            &["endpoint", "outcome"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        Ok(Self { duration, requests })
    }
}

impl MetricsSink for PrometheusSink {
    fn record(&self, metric: &OperationMetric) -> std::result::Result<(), SinkError> {
        let outcome = if metric.succeeded { "success" } else { "failure" };
        self.duration
            .get_metric_with_label_values(&[metric.endpoint.as_str()])?
            .observe(metric.duration_ms as f64 / 1000.0);
        self.requests
            .get_metric_with_label_values(&[metric.endpoint.as_str(), outcome])?
            .inc();
        Ok(())
    }
}

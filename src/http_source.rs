//! HTTP polling adapter for the platform's metrics aggregation API.
//!
//! Polls `{base_url}/api/metrics` on a fixed interval and keeps the most
//! recent snapshot in a slot, so the controller's synchronous
//! [`MetricsSource::latest`] never touches the network. Failed polls are
//! soft errors: the stale snapshot stays visible and the next tick retries.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::metrics::{MetricsSource, PerformanceMetrics, SharedMetricsSource};

// ---------------------------------------------------------------------------
// SourceError
// ---------------------------------------------------------------------------

/// Errors from one poll of the metrics API.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The gateway replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    /// Response body could not be parsed as a metrics snapshot.
    #[error("JSON parse error on field '{field}': {detail}")]
    Json { field: String, detail: String },
    /// A TCP-level connection could not be established.
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },
}

// ---------------------------------------------------------------------------
// HttpSourceConfig
// ---------------------------------------------------------------------------

/// Configuration for the polling client.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Base URL of the metrics gateway (e.g. `http://127.0.0.1:9600`).
    pub base_url: String,
    /// How often to poll `/api/metrics`.
    pub poll_interval: Duration,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Per-request read timeout.
    pub request_timeout: Duration,
}

impl HttpSourceConfig {
    /// Create a config with sensible defaults.
    ///
    /// - poll_interval: 5 s
    /// - connect_timeout: 3 s
    /// - request_timeout: 10 s
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            poll_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpMetricsSource
// ---------------------------------------------------------------------------

struct SourceInner {
    config: HttpSourceConfig,
    client: reqwest::Client,
    slot: SharedMetricsSource,
}

/// The polling metrics source.
///
/// Clone freely — all clones share the same slot. Use
/// [`HttpMetricsSource::builder`] for construction and call
/// [`start_poller`](Self::start_poller) once to begin polling.
#[derive(Clone)]
pub struct HttpMetricsSource {
    inner: Arc<SourceInner>,
}

impl HttpMetricsSource {
    /// Start building a source aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> HttpMetricsSourceBuilder {
        HttpMetricsSourceBuilder::new(base_url)
    }

    /// Fetch one snapshot from the gateway's `/api/metrics`.
    ///
    /// Accepts both the direct `PerformanceMetrics` shape and a
    /// `{ "metrics": ... }` wrapper so the adapter is forward-compatible
    /// with gateway envelope changes.
    ///
    /// # Returns
    /// - `Ok(PerformanceMetrics)` — on a successful 2xx response with parseable JSON.
    /// - `Err(SourceError::Connect)` — when the TCP connection fails.
    /// - `Err(SourceError::Http)` — when the server replies with a non-2xx code.
    /// - `Err(SourceError::Json)` — when the body cannot be parsed.
    ///
    /// # Panics
    /// This function never panics.
    pub async fn fetch_once(&self) -> Result<PerformanceMetrics, SourceError> {
        let url = format!("{}/api/metrics", self.inner.config.base_url);
        let resp = self
            .inner
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(SourceError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let bytes = resp.bytes().await.map_err(|e| SourceError::Json {
            field: "body".into(),
            detail: e.to_string(),
        })?;

        parse_body(&bytes)
    }

    /// Run the polling loop indefinitely.
    ///
    /// On each tick, fetches `/api/metrics` and stores the snapshot in the
    /// shared slot. Connection failures are soft errors — the loop simply
    /// skips that tick and tries again at the next interval.
    ///
    /// Cancel the task (drop the `JoinHandle`) to stop the loop cleanly.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut consecutive_failures: u32 = 0;

        loop {
            ticker.tick().await;

            match self.fetch_once().await {
                Ok(metrics) => {
                    consecutive_failures = 0;
                    debug!(
                        response_time_ms = metrics.response_time_ms.current,
                        throughput_rps = metrics.throughput_rps.current,
                        "metrics snapshot refreshed"
                    );
                    self.inner.slot.set(metrics);
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);

                    if consecutive_failures >= 5 {
                        error!(
                            error = %e,
                            url = %self.inner.config.base_url,
                            consecutive_failures,
                            "metrics poll failed repeatedly, will retry next tick"
                        );
                    } else {
                        warn!(
                            error = %e,
                            url = %self.inner.config.base_url,
                            "metrics poll failed, will retry next tick"
                        );
                    }
                }
            }
        }
    }

    /// Spawn the polling loop on the current runtime.
    pub fn start_poller(&self) -> tokio::task::JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move { source.run().await })
    }
}

impl MetricsSource for HttpMetricsSource {
    fn latest(&self) -> Option<PerformanceMetrics> {
        self.inner.slot.latest()
    }
}

/// Parse a response body, trying the direct snapshot shape first.
fn parse_body(bytes: &[u8]) -> Result<PerformanceMetrics, SourceError> {
    if let Ok(metrics) = serde_json::from_slice::<PerformanceMetrics>(bytes) {
        return Ok(metrics);
    }

    // Fall back to a wrapped shape: { "metrics": { ... } }.
    #[derive(Deserialize)]
    struct Wrapped {
        metrics: PerformanceMetrics,
    }

    serde_json::from_slice::<Wrapped>(bytes)
        .map(|w| w.metrics)
        .map_err(|e| SourceError::Json {
            field: "metrics".into(),
            detail: e.to_string(),
        })
}

// ---------------------------------------------------------------------------
// HttpMetricsSourceBuilder
// ---------------------------------------------------------------------------

/// Builder for [`HttpMetricsSource`].
///
/// # Example
/// ```rust,ignore
/// let source = HttpMetricsSource::builder("http://127.0.0.1:9600")
///     .poll_interval(Duration::from_secs(10))
///     .build();
/// source.start_poller();
/// ```
pub struct HttpMetricsSourceBuilder {
    config: HttpSourceConfig,
}

impl HttpMetricsSourceBuilder {
    /// Create a builder targeting `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: HttpSourceConfig::new(base_url),
        }
    }

    /// Override the polling interval (default 5 s).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Override the per-request read timeout (default 10 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Consume the builder and construct an [`HttpMetricsSource`].
    pub fn build(self) -> HttpMetricsSource {
        // A failed client build falls back to the default client.
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .unwrap_or_default();

        HttpMetricsSource {
            inner: Arc::new(SourceInner {
                config: self.config,
                client,
                slot: SharedMetricsSource::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricPair, ResourceMetrics};

    fn make_snapshot() -> PerformanceMetrics {
        PerformanceMetrics {
            response_time_ms: MetricPair::new(450.0, 500.0),
            throughput_rps: MetricPair::new(1_050.0, 1_000.0),
            success_rate_pct: MetricPair::new(99.2, 99.0),
            resources: ResourceMetrics {
                cpu_pct: MetricPair::new(55.0, 70.0),
                memory_pct: MetricPair::new(60.0, 75.0),
                disk_pct: MetricPair::new(40.0, 80.0),
                network_pct: MetricPair::new(20.0, 60.0),
            },
            captured_at_ms: 1_700_000_000_000,
        }
    }

    // -----------------------------------------------------------------------
    // Builder tests
    // -----------------------------------------------------------------------

    #[test]
    fn builder_default_poll_interval_five_seconds() {
        let source = HttpMetricsSource::builder("http://localhost:9600").build();
        assert_eq!(source.inner.config.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides_are_applied() {
        let source = HttpMetricsSource::builder("http://127.0.0.1:4000")
            .poll_interval(Duration::from_secs(2))
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(source.inner.config.base_url, "http://127.0.0.1:4000");
        assert_eq!(source.inner.config.poll_interval, Duration::from_secs(2));
        assert_eq!(source.inner.config.connect_timeout, Duration::from_secs(1));
        assert_eq!(source.inner.config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn config_new_stores_base_url() {
        let cfg = HttpSourceConfig::new("http://example.com:8080");
        assert_eq!(cfg.base_url, "http://example.com:8080");
    }

    // -----------------------------------------------------------------------
    // parse_body
    // -----------------------------------------------------------------------

    #[test]
    fn parse_body_accepts_direct_shape() {
        let raw = serde_json::to_vec(&make_snapshot()).unwrap();
        let parsed = parse_body(&raw).expect("direct shape parses");
        assert_eq!(parsed, make_snapshot());
    }

    #[test]
    fn parse_body_accepts_wrapped_shape() {
        let json = serde_json::to_string(&make_snapshot()).unwrap();
        let wrapped = format!(r#"{{"metrics":{json}}}"#);
        let parsed = parse_body(wrapped.as_bytes()).expect("wrapped shape parses");
        assert_eq!(parsed, make_snapshot());
    }

    #[test]
    fn parse_body_rejects_garbage() {
        let err = parse_body(b"not json at all").expect_err("garbage must fail");
        assert!(matches!(err, SourceError::Json { .. }));
    }

    #[test]
    fn parse_body_error_names_metrics_field() {
        let err = parse_body(br#"{"wrong": 1}"#).expect_err("wrong shape must fail");
        match err {
            SourceError::Json { field, .. } => assert_eq!(field, "metrics"),
            other => panic!("unexpected error: {other}"),
        }
    }

    // -----------------------------------------------------------------------
    // latest
    // -----------------------------------------------------------------------

    #[test]
    fn latest_is_none_before_first_poll() {
        let source = HttpMetricsSource::builder("http://localhost:9600").build();
        assert!(source.latest().is_none());
    }

    // -----------------------------------------------------------------------
    // SourceError Display
    // -----------------------------------------------------------------------

    #[test]
    fn source_error_display_http() {
        let err = SourceError::Http {
            status: 503,
            url: "http://localhost:9600/api/metrics".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("503"), "expected status in display: {s}");
        assert!(s.contains("/api/metrics"), "expected url in display: {s}");
    }

    #[test]
    fn source_error_display_connect() {
        let err = SourceError::Connect {
            url: "http://localhost:9600".to_string(),
            detail: "connection refused".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("http://localhost:9600"), "url in display: {s}");
        assert!(s.contains("connection refused"), "detail in display: {s}");
    }
}

//! Prometheus metrics for the pipeline runtime.
//!
//! Metrics are emitted through the `metrics` facade and are free when no
//! recorder is installed. Hosts that want a Prometheus scrape endpoint can
//! install one with [`MetricsServer`]:
//!
//! - Messages processed, by kind and final status
//! - End-to-end processing duration
//! - Stage failures
//! - Repository writes and write errors
//! - Resolver constructor-plan builds
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render the current snapshot, e.g. from an HTTP handler.
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use courier_core::message::{MessageKind, ProcessingStatus};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder owner.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the host intends to expose metrics on (logged only)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), installation is
    /// skipped with a warning and `render` returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "courier_messages_processed_total",
        "Total number of messages that finished processing, by kind and status"
    );
    describe_histogram!(
        "courier_message_duration_seconds",
        "Time from submission to the end of the last post-handler"
    );
    describe_counter!(
        "courier_stage_failures_total",
        "Total number of stage errors recorded into messages"
    );
    describe_counter!(
        "courier_repository_writes_total",
        "Total number of message records stored"
    );
    describe_counter!(
        "courier_repository_errors_total",
        "Total number of failed repository writes"
    );
    describe_counter!(
        "courier_resolver_plans_built_total",
        "Total number of constructor plans built (cache misses)"
    );
}

/// Pipeline metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record a message reaching the end of a pipeline.
    pub fn record_processed(kind: MessageKind, status: ProcessingStatus, duration: Duration) {
        counter!(
            "courier_messages_processed_total",
            "kind" => kind.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
        histogram!("courier_message_duration_seconds", "kind" => kind.as_str())
            .record(duration.as_secs_f64());
    }

    /// Record a stage error.
    pub fn record_stage_failure(stage: &str) {
        counter!("courier_stage_failures_total", "stage" => stage.to_string()).increment(1);
    }
}

/// Repository metrics recorder.
pub struct RepositoryMetrics;

impl RepositoryMetrics {
    /// Record a stored record.
    pub fn record_write() {
        counter!("courier_repository_writes_total").increment(1);
    }

    /// Record a failed write.
    pub fn record_error() {
        counter!("courier_repository_errors_total").increment(1);
    }
}

/// Resolver metrics recorder.
pub struct ResolverMetrics;

impl ResolverMetrics {
    /// Record a constructor plan cache miss.
    pub fn record_plan_built() {
        counter!("courier_resolver_plans_built_total").increment(1);
    }
}

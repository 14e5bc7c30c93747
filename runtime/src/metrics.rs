//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for every runtime component:
//! - Transactions (commits, rejections, lock waits)
//! - Storage operations
//! - Outbound transfers and rollbacks
//! - Notification publishing
//! - Caller-side retries
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_escrow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

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

/// Prometheus metrics server.
///
/// Installs the global recorder, serves the scrape endpoint on `addr`, and
/// renders the scrape text on demand.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the scrape endpoint listens on
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions, install the recorder and start serving
    /// `/metrics` on the configured address.
    ///
    /// Must be called from within a Tokio runtime; the endpoint runs as a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// Returns error if there is no Tokio runtime, or if the exporter cannot
    /// be built (including when the address cannot be bound).
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and succeeds without a handle or endpoint.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        runtime.spawn(async move {
            if let Err(_e) = exporter.await {
                // ExporterError implements neither Debug nor Display, so it cannot be logged as a field.
                tracing::error!("Metrics endpoint stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Transactions
    describe_counter!(
        "ledger_transactions_total",
        "Transactions committed, labelled by operation"
    );
    describe_counter!(
        "ledger_rejections_total",
        "Transactions rejected, labelled by operation and reason"
    );
    describe_histogram!(
        "ledger_lock_wait_seconds",
        "Time spent waiting for a partition lock"
    );
    describe_histogram!(
        "ledger_transaction_duration_seconds",
        "Time from lock acquisition to commit"
    );
    describe_gauge!(
        "ledger_transactions_in_flight",
        "Transactions currently holding a partition lock"
    );

    // Storage
    describe_counter!("ledger_storage_writes_total", "Batches written to the store");
    describe_counter!("ledger_storage_errors_total", "Failed storage operations");

    // Transfers
    describe_counter!(
        "ledger_transfers_total",
        "Outbound transfers, labelled by outcome"
    );
    describe_histogram!(
        "ledger_transfer_duration_seconds",
        "Time taken by outbound transfers"
    );
    describe_counter!(
        "ledger_rollbacks_total",
        "Transactions rolled back after a failed transfer"
    );

    // Notifications
    describe_counter!(
        "ledger_notifications_published_total",
        "Notifications published to the bus"
    );

    // Retry
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Transaction metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record a committed transaction.
    pub fn record_commit(operation: &'static str, duration: Duration) {
        counter!("ledger_transactions_total", "operation" => operation).increment(1);
        histogram!("ledger_transaction_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record a rejected transaction.
    pub fn record_rejection(operation: &'static str, reason: &'static str) {
        counter!("ledger_rejections_total", "operation" => operation, "reason" => reason)
            .increment(1);
    }

    /// Record time spent waiting for a partition lock.
    pub fn record_lock_wait(waited: Duration) {
        histogram!("ledger_lock_wait_seconds").record(waited.as_secs_f64());
    }

    /// Record the number of transactions in flight.
    #[allow(clippy::cast_precision_loss)] // in-flight counts are far below 2^52
    pub fn record_in_flight(count: usize) {
        gauge!("ledger_transactions_in_flight").set(count as f64);
    }
}

/// Storage metrics recorder.
pub struct StorageMetrics;

impl StorageMetrics {
    /// Record a batch write.
    pub fn record_write() {
        counter!("ledger_storage_writes_total").increment(1);
    }

    /// Record a storage failure.
    pub fn record_error() {
        counter!("ledger_storage_errors_total").increment(1);
    }
}

/// Transfer metrics recorder.
pub struct TransferMetrics;

impl TransferMetrics {
    /// Record a successful transfer.
    pub fn record_success(duration: Duration) {
        counter!("ledger_transfers_total", "outcome" => "success").increment(1);
        histogram!("ledger_transfer_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed transfer.
    pub fn record_failure() {
        counter!("ledger_transfers_total", "outcome" => "failure").increment(1);
    }

    /// Record a rollback.
    pub fn record_rollback() {
        counter!("ledger_rollbacks_total").increment(1);
    }
}

/// Notification metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a published notification.
    pub fn record_publish(receivers: usize) {
        counter!("ledger_notifications_published_total").increment(1);
        tracing::trace!(receivers, "Notification delivered");
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(matches!(server.start(), Err(MetricsError::Install(_))));
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_serves_scrape_endpoint() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Reserve a free port, then hand it to the server
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        TransactionMetrics::record_commit("buy_ticket", Duration::from_millis(3));
        TransferMetrics::record_success(Duration::from_millis(10));

        // Another test may have installed the recorder first
        let Some(rendered) = server.render() else {
            return;
        };
        assert!(rendered.contains("ledger_transactions_total"));
        assert!(rendered.contains("ledger_transfers_total"));

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(connected) = tokio::net::TcpStream::connect(addr).await {
                stream = Some(connected);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut stream = stream.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("ledger_transactions_total"));
    }
}

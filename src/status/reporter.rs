//! Non-blocking status reporter
//!
//! `report()` only ever does a `try_send` into a bounded queue. A detached
//! task drains the queue, optionally coalescing to the newest report, and
//! delivers with a per-attempt timeout and a bounded number of retries.

use super::{StatusReport, StatusSink};
use crate::config::StatusSection;
use crate::observability::metrics::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delivery tuning, usually taken from `[status]`
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub queue_capacity: usize,
    pub coalesce: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self::from_section(&StatusSection::default())
    }
}

impl DeliveryOptions {
    pub fn from_section(section: &StatusSection) -> Self {
        Self {
            timeout: section.timeout(),
            max_retries: section.max_retries,
            retry_delay: section.retry_delay(),
            queue_capacity: section.queue_capacity.max(1),
            coalesce: section.coalesce,
        }
    }
}

/// Cloneable handle feeding the delivery task
#[derive(Clone)]
pub struct StatusReporter {
    tx: mpsc::Sender<StatusReport>,
    metrics: Arc<MetricsCollector>,
}

impl StatusReporter {
    /// Start the delivery task. It ends once every reporter handle is dropped
    /// and the queue is drained.
    pub fn spawn(
        sink: Arc<dyn StatusSink>,
        options: DeliveryOptions,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(options.queue_capacity);
        let handle = tokio::spawn(run_delivery_loop(rx, sink, options, metrics.clone()));
        (Self { tx, metrics }, handle)
    }

    /// Queue a report. Never waits; drops the report when the queue is full.
    pub fn report(&self, report: StatusReport) {
        match self.tx.try_send(report) {
            Ok(()) => self.metrics.status_report_queued(),
            Err(TrySendError::Full(report)) => {
                self.metrics.status_report_dropped();
                warn!(
                    connection_state = %report.connection_state,
                    "Status queue full, dropping report"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Status delivery task stopped, report discarded");
            }
        }
    }
}

async fn run_delivery_loop(
    mut rx: mpsc::Receiver<StatusReport>,
    sink: Arc<dyn StatusSink>,
    options: DeliveryOptions,
    metrics: Arc<MetricsCollector>,
) {
    while let Some(mut report) = rx.recv().await {
        if options.coalesce {
            while let Ok(newer) = rx.try_recv() {
                metrics.status_report_coalesced();
                report = newer;
            }
        }
        deliver_with_retry(sink.as_ref(), &report, &options, &metrics).await;
    }
    debug!("Status delivery loop finished");
}

async fn deliver_with_retry(
    sink: &dyn StatusSink,
    report: &StatusReport,
    options: &DeliveryOptions,
    metrics: &MetricsCollector,
) {
    let attempts = options.max_retries + 1;
    for attempt in 1..=attempts {
        match tokio::time::timeout(options.timeout, sink.deliver(report)).await {
            Ok(Ok(())) => {
                metrics.status_report_delivered();
                return;
            }
            Ok(Err(e)) => {
                debug!(attempt, error = %e, "Status delivery failed");
            }
            Err(_) => {
                debug!(attempt, timeout = ?options.timeout, "Status delivery timed out");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(options.retry_delay).await;
        }
    }

    metrics.status_report_failed();
    warn!(
        connection_state = %report.connection_state,
        attempts,
        "Giving up on status report"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::RecordingStatusSink;
    use crate::transport::mqtt::ConnectionState;
    use chrono::Utc;

    fn report(state: ConnectionState) -> StatusReport {
        StatusReport {
            is_connected: state.is_connected(),
            connection_state: state,
            broker_url: None,
            mode: None,
            client_id: None,
            attempt: 0,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    fn fast_options() -> DeliveryOptions {
        DeliveryOptions {
            timeout: Duration::from_millis(50),
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
            queue_capacity: 8,
            coalesce: false,
        }
    }

    #[tokio::test]
    async fn test_reports_delivered_in_order() {
        let sink = Arc::new(RecordingStatusSink::new());
        let metrics = Arc::new(MetricsCollector::new());
        let (reporter, handle) = StatusReporter::spawn(sink.clone(), fast_options(), metrics.clone());

        reporter.report(report(ConnectionState::Connecting));
        reporter.report(report(ConnectionState::Connected));
        drop(reporter);
        handle.await.unwrap();

        assert_eq!(
            sink.states().await,
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert_eq!(metrics.get_metrics().status.delivered, 2);
    }

    #[tokio::test]
    async fn test_failing_sink_is_retried_then_dropped() {
        let sink = Arc::new(RecordingStatusSink::new());
        sink.fail_next(10);
        let metrics = Arc::new(MetricsCollector::new());
        let (reporter, handle) = StatusReporter::spawn(sink.clone(), fast_options(), metrics.clone());

        reporter.report(report(ConnectionState::Failed));
        drop(reporter);
        handle.await.unwrap();

        assert_eq!(sink.calls(), 3);
        assert!(sink.states().await.is_empty());
        assert_eq!(metrics.get_metrics().status.failed, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let sink = Arc::new(RecordingStatusSink::new());
        sink.fail_next(1);
        let metrics = Arc::new(MetricsCollector::new());
        let (reporter, handle) = StatusReporter::spawn(sink.clone(), fast_options(), metrics);

        reporter.report(report(ConnectionState::Connected));
        drop(reporter);
        handle.await.unwrap();

        assert_eq!(sink.states().await, vec![ConnectionState::Connected]);
    }

    #[tokio::test]
    async fn test_report_never_blocks_when_sink_hangs() {
        let sink = Arc::new(RecordingStatusSink::new().with_delay(Duration::from_secs(30)));
        let metrics = Arc::new(MetricsCollector::new());
        let options = DeliveryOptions {
            queue_capacity: 2,
            timeout: Duration::from_secs(30),
            ..fast_options()
        };
        let (reporter, handle) = StatusReporter::spawn(sink, options, metrics.clone());

        let started = std::time::Instant::now();
        for _ in 0..50 {
            reporter.report(report(ConnectionState::Reconnecting));
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(metrics.get_metrics().status.dropped > 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_coalesce_keeps_latest() {
        let sink = Arc::new(RecordingStatusSink::new().with_delay(Duration::from_millis(20)));
        let metrics = Arc::new(MetricsCollector::new());
        let options = DeliveryOptions {
            coalesce: true,
            ..fast_options()
        };
        let (reporter, handle) = StatusReporter::spawn(sink.clone(), options, metrics);

        reporter.report(report(ConnectionState::Connecting));
        reporter.report(report(ConnectionState::Reconnecting));
        reporter.report(report(ConnectionState::Connected));
        drop(reporter);
        handle.await.unwrap();

        let states = sink.states().await;
        assert_eq!(states.last(), Some(&ConnectionState::Connected));
        assert!(states.len() <= 3);
    }
}

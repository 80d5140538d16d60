//! Thread-safe metrics collection
//!
//! Atomic counters for connection lifecycle, status delivery and health
//! probes. One collector is owned by the runtime and shared by `Arc`.

use crate::transport::mqtt::ConnectionState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_PROBE_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Connection lifecycle
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    retries_exhausted: AtomicU64,
    configuration_failures: AtomicU64,
    session_losses: AtomicU64,
    late_results_discarded: AtomicU64,
    state_transitions: AtomicU64,
    connection_start_time: AtomicU64,
    messages_received: AtomicU64,
    current_state: Mutex<ConnectionState>,

    // Status delivery
    status_reports_queued: AtomicU64,
    status_reports_delivered: AtomicU64,
    status_reports_dropped: AtomicU64,
    status_reports_failed: AtomicU64,
    status_reports_coalesced: AtomicU64,

    // Health probes
    probes_run: AtomicU64,
    probe_timeouts: AtomicU64,
    probe_times: Mutex<Vec<u64>>, // milliseconds

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            retries_exhausted: AtomicU64::new(0),
            configuration_failures: AtomicU64::new(0),
            session_losses: AtomicU64::new(0),
            late_results_discarded: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            current_state: Mutex::new(ConnectionState::Disconnected),
            status_reports_queued: AtomicU64::new(0),
            status_reports_delivered: AtomicU64::new(0),
            status_reports_dropped: AtomicU64::new(0),
            status_reports_failed: AtomicU64::new(0),
            status_reports_coalesced: AtomicU64::new(0),
            probes_run: AtomicU64::new(0),
            probe_timeouts: AtomicU64::new(0),
            probe_times: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection lifecycle
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_retries_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_configuration_failed(&self) {
        self.configuration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.session_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_late_result_discarded(&self) {
        self.late_results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state(&self, state: ConnectionState) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected
            .store(state.is_connected(), Ordering::Relaxed);
        if !state.is_connected() {
            self.connection_start_time.store(0, Ordering::Relaxed);
        }
        if let Ok(mut current) = self.current_state.lock() {
            *current = state;
        }
    }

    // Status delivery
    pub fn status_report_queued(&self) {
        self.status_reports_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_report_delivered(&self) {
        self.status_reports_delivered
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_report_dropped(&self) {
        self.status_reports_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_report_failed(&self) {
        self.status_reports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_report_coalesced(&self) {
        self.status_reports_coalesced
            .fetch_add(1, Ordering::Relaxed);
    }

    // Health probes
    pub fn probe_completed(&self, duration: Duration, timed_out: bool) {
        self.probes_run.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.probe_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.probe_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_PROBE_SAMPLES {
                times.remove(0);
            }
        }
    }

    /// Average and p95 probe latency (pure function over the samples)
    fn calculate_probe_statistics(&self) -> (f64, f64) {
        let Ok(times) = self.probe_times.lock() else {
            return (0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0);
        }
        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 95.0))
    }

    fn current_state(&self) -> ConnectionState {
        self.current_state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let start = self.connection_start_time.load(Ordering::Relaxed);
        let connection_duration_seconds = if start == 0 {
            0
        } else {
            now.saturating_sub(start)
        };
        let (avg_probe_time_ms, probe_time_p95_ms) = self.calculate_probe_statistics();

        MetricsSnapshot {
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                state: self.current_state(),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
                configuration_failures: self.configuration_failures.load(Ordering::Relaxed),
                session_losses: self.session_losses.load(Ordering::Relaxed),
                late_results_discarded: self.late_results_discarded.load(Ordering::Relaxed),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                connection_duration_seconds,
            },
            status: StatusMetrics {
                queued: self.status_reports_queued.load(Ordering::Relaxed),
                delivered: self.status_reports_delivered.load(Ordering::Relaxed),
                dropped: self.status_reports_dropped.load(Ordering::Relaxed),
                failed: self.status_reports_failed.load(Ordering::Relaxed),
                coalesced: self.status_reports_coalesced.load(Ordering::Relaxed),
            },
            health: ProbeMetrics {
                probes_run: self.probes_run.load(Ordering::Relaxed),
                probe_timeouts: self.probe_timeouts.load(Ordering::Relaxed),
                avg_probe_time_ms,
                probe_time_p95_ms,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub mqtt: MqttMetrics,
    pub status: StatusMetrics,
    pub health: ProbeMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub state: ConnectionState,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub retries_exhausted: u64,
    pub configuration_failures: u64,
    pub session_losses: u64,
    pub late_results_discarded: u64,
    pub state_transitions: u64,
    pub messages_received: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMetrics {
    pub queued: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
    pub coalesced: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeMetrics {
    pub probes_run: u64,
    pub probe_timeouts: u64,
    pub avg_probe_time_ms: f64,
    pub probe_time_p95_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower] as f64
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] as f64 * (1.0 - weight) + sorted_data[upper] as f64 * weight
    }
}

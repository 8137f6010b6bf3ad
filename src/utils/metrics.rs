//! Observability and Metrics
//!
//! Atomic counters describing bridge traffic and session churn. One
//! instance is shared by `Arc` between the session engine and the server
//! loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Metrics {
    /// Datagrams read from the socket
    pub datagrams_received: AtomicU64,
    /// Responses written to the socket
    pub datagrams_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Datagrams that could not be decoded
    pub decode_failures: AtomicU64,
    /// Requests answered with an error packet
    pub request_errors: AtomicU64,
    /// Socket read/write failures
    pub transport_errors: AtomicU64,
    pub sessions_opened: AtomicU64,
    /// Sessions ended by an explicit disconnect
    pub sessions_closed: AtomicU64,
    /// Sessions evicted for inactivity or at shutdown
    pub sessions_evicted: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            datagrams_received: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            request_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn datagram_received(&self, byte_count: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn datagram_sent(&self, byte_count: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_error(&self) {
        self.request_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            request_errors: self.request_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            datagrams_received = snapshot.datagrams_received,
            datagrams_sent = snapshot.datagrams_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            decode_failures = snapshot.decode_failures,
            request_errors = snapshot.request_errors,
            transport_errors = snapshot.transport_errors,
            sessions_opened = snapshot.sessions_opened,
            sessions_closed = snapshot.sessions_closed,
            sessions_evicted = snapshot.sessions_evicted,
            uptime_seconds = snapshot.uptime_seconds,
            "Bridge metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub decode_failures: u64,
    pub request_errors: u64,
    pub transport_errors: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_evicted: u64,
    pub uptime_seconds: u64,
}

/// Logs how long a driver call took when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Driver call completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.datagram_received(12);
        metrics.datagram_received(30);
        metrics.datagram_sent(8);
        metrics.decode_failure();
        metrics.session_opened();
        metrics.session_evicted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.datagrams_received, 2);
        assert_eq!(snapshot.bytes_received, 42);
        assert_eq!(snapshot.datagrams_sent, 1);
        assert_eq!(snapshot.bytes_sent, 8);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.sessions_opened, 1);
        assert_eq!(snapshot.sessions_evicted, 1);
        assert_eq!(snapshot.sessions_closed, 0);
    }
}

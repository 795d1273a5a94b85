//! Thread-safe metrics collection
//!
//! Atomic counters for connection and publish activity. The supervisor owns
//! one collector behind an `Arc`; anything else that wants the numbers
//! takes a [`MetricsSnapshot`].

use crate::supervisor::Phase;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub struct MetricsCollector {
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    publishes_skipped: AtomicU64,
    heartbeats_sent: AtomicU64,
    last_heartbeat: AtomicU64,
    dns_checks: AtomicU64,
    dns_failures: AtomicU64,
    certificate_checks: AtomicU64,
    certificate_invalid: AtomicU64,
    phase: AtomicU64,
    phase_transitions: AtomicU64,
    uptime_start: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publishes_skipped: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            last_heartbeat: AtomicU64::new(0),
            dns_checks: AtomicU64::new(0),
            dns_failures: AtomicU64::new(0),
            certificate_checks: AtomicU64::new(0),
            certificate_invalid: AtomicU64::new(0),
            phase: AtomicU64::new(Phase::Disconnected.as_gauge()),
            phase_transitions: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    // Publish metrics
    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_skipped(&self) {
        self.publishes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        self.last_heartbeat
            .store(current_timestamp(), Ordering::Relaxed);
    }

    // Health check metrics
    pub fn dns_checked(&self, resolved: bool) {
        self.dns_checks.fetch_add(1, Ordering::Relaxed);
        if !resolved {
            self.dns_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn certificate_checked(&self, usable: bool) {
        self.certificate_checks.fetch_add(1, Ordering::Relaxed);
        if !usable {
            self.certificate_invalid.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Lifecycle metrics
    pub fn set_phase(&self, phase: Phase) {
        let previous = self.phase.swap(phase.as_gauge(), Ordering::Relaxed);
        if previous != phase.as_gauge() {
            self.phase_transitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            connection: ConnectionMetrics {
                attempts: self.connection_attempts.load(Ordering::Relaxed),
                established: self.connections_established.load(Ordering::Relaxed),
                failures: self.connection_failures.load(Ordering::Relaxed),
                lost: self.connections_lost.load(Ordering::Relaxed),
                phase: self.phase.load(Ordering::Relaxed),
                phase_transitions: self.phase_transitions.load(Ordering::Relaxed),
            },
            publish: PublishMetrics {
                published: self.messages_published.load(Ordering::Relaxed),
                failures: self.publish_failures.load(Ordering::Relaxed),
                skipped: self.publishes_skipped.load(Ordering::Relaxed),
                heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
                last_heartbeat: self.last_heartbeat.load(Ordering::Relaxed),
            },
            health: HealthCheckMetrics {
                dns_checks: self.dns_checks.load(Ordering::Relaxed),
                dns_failures: self.dns_failures.load(Ordering::Relaxed),
                certificate_checks: self.certificate_checks.load(Ordering::Relaxed),
                certificate_invalid: self.certificate_invalid.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable point-in-time view of all counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub connection: ConnectionMetrics,
    pub publish: PublishMetrics,
    pub health: HealthCheckMetrics,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectionMetrics {
    pub attempts: u64,
    pub established: u64,
    pub failures: u64,
    pub lost: u64,
    /// Phase gauge: 0 disconnected, 1 connecting, 2 connected, 3 degraded, 4 shutting down
    pub phase: u64,
    pub phase_transitions: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PublishMetrics {
    pub published: u64,
    pub failures: u64,
    pub skipped: u64,
    pub heartbeats_sent: u64,
    pub last_heartbeat: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthCheckMetrics {
    pub dns_checks: u64,
    pub dns_failures: u64,
    pub certificate_checks: u64,
    pub certificate_invalid: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::DegradedReason;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_counters() {
        let metrics = MetricsCollector::new();

        metrics.connection_attempt();
        metrics.connection_failed();
        metrics.connection_attempt();
        metrics.connection_established();
        metrics.connection_lost();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connection.attempts, 2);
        assert_eq!(snapshot.connection.failures, 1);
        assert_eq!(snapshot.connection.established, 1);
        assert_eq!(snapshot.connection.lost, 1);
    }

    #[test]
    fn test_publish_counters() {
        let metrics = MetricsCollector::new();

        metrics.message_published();
        metrics.heartbeat_sent();
        metrics.publish_skipped();
        metrics.publish_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.publish.published, 1);
        assert_eq!(snapshot.publish.heartbeats_sent, 1);
        assert_eq!(snapshot.publish.skipped, 1);
        assert_eq!(snapshot.publish.failures, 1);
        assert!(snapshot.publish.last_heartbeat > 0);
    }

    #[test]
    fn test_health_check_counters() {
        let metrics = MetricsCollector::new();

        metrics.dns_checked(true);
        metrics.dns_checked(false);
        metrics.certificate_checked(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.health.dns_checks, 2);
        assert_eq!(snapshot.health.dns_failures, 1);
        assert_eq!(snapshot.health.certificate_checks, 1);
        assert_eq!(snapshot.health.certificate_invalid, 1);
    }

    #[test]
    fn test_phase_gauge_counts_changes_only() {
        let metrics = MetricsCollector::new();

        metrics.set_phase(Phase::Disconnected);
        metrics.set_phase(Phase::Connecting);
        metrics.set_phase(Phase::Connected);
        metrics.set_phase(Phase::Degraded(DegradedReason::Certificate));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connection.phase, 3);
        assert_eq!(snapshot.connection.phase_transitions, 3);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.message_published();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().publish.published, 800);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsCollector::new().snapshot()).unwrap();
        assert!(json["connection"]["attempts"].is_u64());
        assert!(json["health"]["dns_checks"].is_u64());
    }
}

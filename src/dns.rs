//! Broker endpoint DNS health
//!
//! While disconnected the supervisor resolves the broker host on its own
//! schedule. The result is advisory only: it feeds diagnostics and
//! [`DnsHealth`], never the phase or the reconnect cadence.

use crate::transport::Deadline;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum DnsError {
    #[error("could not resolve {host}: {detail}")]
    Unresolved { host: String, detail: String },
    #[error("resolving {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOutcome {
    Resolved(IpAddr),
    Unresolved(DnsError),
}

/// Name resolution capability
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host` to its first address
    async fn resolve(&self, host: &str, port: u16) -> Result<IpAddr, DnsError>;
}

/// System resolver via `tokio::net::lookup_host`
#[derive(Debug, Clone, Default)]
pub struct TokioResolver;

#[async_trait]
impl Resolver for TokioResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<IpAddr, DnsError> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| DnsError::Unresolved {
                host: host.to_string(),
                detail: e.to_string(),
            })?;

        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| DnsError::Unresolved {
                host: host.to_string(),
                detail: "no addresses returned".to_string(),
            })
    }
}

/// Accumulated DNS probe results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DnsHealth {
    pub consecutive_failures: u32,
    pub last_resolved: Option<DateTime<Utc>>,
    pub last_address: Option<IpAddr>,
    pub last_checked: Option<DateTime<Utc>>,
}

pub struct DnsHealthChecker {
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
    health: DnsHealth,
}

impl DnsHealthChecker {
    pub fn new(resolver: Arc<dyn Resolver>, timeout: Duration) -> Self {
        Self {
            resolver,
            timeout,
            health: DnsHealth::default(),
        }
    }

    pub fn health(&self) -> &DnsHealth {
        &self.health
    }

    /// Resolve `host` once, bounded by the socket timeout, and record the result
    pub async fn check(&mut self, host: &str, port: u16, now: DateTime<Utc>) -> DnsOutcome {
        let deadline = Deadline::after(self.timeout);
        let outcome = match deadline.run(self.resolver.resolve(host, port)).await {
            Ok(Ok(addr)) => DnsOutcome::Resolved(addr),
            Ok(Err(e)) => DnsOutcome::Unresolved(e),
            Err(_) => DnsOutcome::Unresolved(DnsError::Timeout {
                host: host.to_string(),
                timeout: self.timeout,
            }),
        };

        self.health.last_checked = Some(now);
        match &outcome {
            DnsOutcome::Resolved(addr) => {
                debug!(host, %addr, "Broker endpoint resolved");
                self.health.consecutive_failures = 0;
                self.health.last_resolved = Some(now);
                self.health.last_address = Some(*addr);
            }
            DnsOutcome::Unresolved(e) => {
                debug!(host, error = %e, "Broker endpoint did not resolve");
                self.health.consecutive_failures = self.health.consecutive_failures.saturating_add(1);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockResolver;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_success_resets_failures() {
        // Arrange
        let resolver = MockResolver::failing("NXDOMAIN");
        let mut checker = DnsHealthChecker::new(Arc::new(resolver.clone()), Duration::from_secs(1));
        let now = Utc::now();

        // Act
        checker.check("broker.example.com", 8883, now).await;
        checker.check("broker.example.com", 8883, now).await;
        resolver.set_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).await;
        let outcome = checker.check("broker.example.com", 8883, now).await;

        // Assert
        assert_eq!(outcome, DnsOutcome::Resolved(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(checker.health().consecutive_failures, 0);
        assert_eq!(checker.health().last_resolved, Some(now));
        assert_eq!(resolver.lookup_count().await, 3);
    }

    #[tokio::test]
    async fn test_failures_accumulate() {
        let mut checker = DnsHealthChecker::new(
            Arc::new(MockResolver::failing("SERVFAIL")),
            Duration::from_secs(1),
        );
        let now = Utc::now();

        for _ in 0..3 {
            let outcome = checker.check("broker.example.com", 8883, now).await;
            assert!(matches!(outcome, DnsOutcome::Unresolved(DnsError::Unresolved { .. })));
        }

        assert_eq!(checker.health().consecutive_failures, 3);
        assert_eq!(checker.health().last_resolved, None);
        assert_eq!(checker.health().last_checked, Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_resolver_times_out() {
        let resolver = MockResolver::resolving(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_delay(Duration::from_secs(60));
        let mut checker = DnsHealthChecker::new(Arc::new(resolver), Duration::from_secs(2));

        let outcome = checker.check("broker.example.com", 8883, Utc::now()).await;

        assert!(matches!(outcome, DnsOutcome::Unresolved(DnsError::Timeout { .. })));
        assert_eq!(checker.health().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_tokio_resolver_handles_ip_literals() {
        let addr = TokioResolver.resolve("127.0.0.1", 8883).await.unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}

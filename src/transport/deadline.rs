//! Explicit deadline guard for blocking network operations

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("deadline of {budget:?} exceeded")]
pub struct DeadlineExceeded {
    pub budget: Duration,
}

/// A fixed point in time after which guarded operations are abandoned
///
/// One deadline can guard several consecutive steps (DNS lookup, TLS
/// handshake, CONNACK wait) so that together they never exceed the budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            expires_at: now.checked_add(budget).unwrap_or_else(|| far_future(now)),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Run `fut` to completion or until the deadline passes
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        tokio::time::timeout_at(self.expires_at, fut)
            .await
            .map_err(|_| DeadlineExceeded {
                budget: self.budget,
            })
    }
}

// Roughly 30 years, the same ceiling tokio uses for unrepresentable deadlines
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86400 * 365 * 30)
}

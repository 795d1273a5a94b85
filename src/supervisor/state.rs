//! Pure connection phase and session bookkeeping
//!
//! Nothing here performs I/O. The supervisor owns one [`SessionState`] and
//! mutates it only through the methods below, each of which enforces the
//! allowed phase edges.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why the supervisor stopped trying to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Device identity failed validation; needs an external credential refresh
    Certificate,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::Certificate => write!(f, "certificate"),
        }
    }
}

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Degraded(DegradedReason),
    ShuttingDown,
}

impl Phase {
    /// Whether `self -> next` is one of the allowed edges
    pub fn can_transition_to(&self, next: &Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Degraded(_))
                | (Disconnected, ShuttingDown)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, ShuttingDown)
                | (Connected, Disconnected)
                | (Connected, Degraded(_))
                | (Connected, ShuttingDown)
                | (Degraded(_), Disconnected)
                | (Degraded(_), ShuttingDown)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::ShuttingDown)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Phase::Degraded(_))
    }

    /// Small integer used by the metrics gauge
    pub fn as_gauge(&self) -> u64 {
        match self {
            Phase::Disconnected => 0,
            Phase::Connecting => 1,
            Phase::Connected => 2,
            Phase::Degraded(_) => 3,
            Phase::ShuttingDown => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Disconnected => write!(f, "Disconnected"),
            Phase::Connecting => write!(f, "Connecting"),
            Phase::Connected => write!(f, "Connected"),
            Phase::Degraded(reason) => write!(f, "Degraded({reason})"),
            Phase::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Rejected phase edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRejected {
    pub from: Phase,
    pub to: Phase,
}

/// Session bookkeeping owned by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    phase: Phase,
    pub last_connect_attempt: Option<DateTime<Utc>>,
    pub last_connection_lost: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub reconnect_count: u32,
    pub connected_since: Option<DateTime<Utc>>,
    /// Set once the first session was established
    pub had_session: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Disconnected,
            last_connect_attempt: None,
            last_connection_lost: None,
            consecutive_failures: 0,
            last_error: None,
            reconnect_count: 0,
            connected_since: None,
            had_session: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next` if the edge is allowed
    pub fn transition(&mut self, next: Phase) -> Result<Phase, TransitionRejected> {
        if !self.phase.can_transition_to(&next) {
            return Err(TransitionRejected {
                from: self.phase,
                to: next,
            });
        }
        let previous = self.phase;
        self.phase = next;
        if next != Phase::Connected {
            self.connected_since = None;
        }
        Ok(previous)
    }

    /// `Disconnected -> Connecting`, recording the attempt time
    pub fn begin_connect(&mut self, now: DateTime<Utc>) -> Result<Phase, TransitionRejected> {
        let previous = self.transition(Phase::Connecting)?;
        self.last_connect_attempt = Some(now);
        Ok(previous)
    }

    /// `Connecting -> Connected`
    pub fn connect_succeeded(&mut self, now: DateTime<Utc>) -> Result<Phase, TransitionRejected> {
        let previous = self.transition(Phase::Connected)?;
        if self.had_session {
            self.reconnect_count += 1;
        }
        self.had_session = true;
        self.consecutive_failures = 0;
        self.connected_since = Some(now);
        Ok(previous)
    }

    /// `Connecting -> Disconnected` with the failure recorded
    pub fn connect_failed(&mut self, error: String) -> Result<Phase, TransitionRejected> {
        let previous = self.transition(Phase::Disconnected)?;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        Ok(previous)
    }

    /// `Connected -> Disconnected` after the link died
    pub fn connection_lost(
        &mut self,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<Phase, TransitionRejected> {
        if self.phase != Phase::Connected {
            return Err(TransitionRejected {
                from: self.phase,
                to: Phase::Disconnected,
            });
        }
        let previous = self.transition(Phase::Disconnected)?;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        self.last_connection_lost = Some(now);
        Ok(previous)
    }

    /// The later of the last attempt and the last loss
    pub fn backoff_anchor(&self) -> Option<DateTime<Utc>> {
        match (self.last_connect_attempt, self.last_connection_lost) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left before the next reconnect attempt may run
    ///
    /// Returns `Duration::ZERO` when an attempt is allowed now. An anchor in
    /// the future (clock moved backwards) yields the full delay.
    pub fn backoff_remaining(&self, now: DateTime<Utc>, delay: Duration) -> Duration {
        let Some(anchor) = self.backoff_anchor() else {
            return Duration::ZERO;
        };
        match (now - anchor).to_std() {
            Ok(elapsed) => delay.saturating_sub(elapsed),
            Err(_) => delay,
        }
    }

    /// Pull timestamps that lie in the future back to `now`
    pub fn clamp_to(&mut self, now: DateTime<Utc>) {
        for ts in [
            &mut self.last_connect_attempt,
            &mut self.last_connection_lost,
            &mut self.connected_since,
        ] {
            if ts.is_some_and(|t| t > now) {
                *ts = Some(now);
            }
        }
    }
}

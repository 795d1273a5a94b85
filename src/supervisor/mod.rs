//! Connectivity and liveness supervision
//!
//! - [`state`] - pure phase machine and session bookkeeping
//! - [`schedule`] - periodic task table and due-time evaluation
//! - [`core`] - the supervisor that ties transport, checks and publishing together

pub mod core;
pub mod schedule;
pub mod state;

pub use self::core::{ConnectivitySupervisor, PublishOutcome, ReconnectDecision, TickReport};
pub use schedule::{ScheduledTask, Scheduler, TaskKind};
pub use state::{DegradedReason, Phase, SessionState, TransitionRejected};

//! Crate-level error type for the connectivity supervisor
//!
//! Each component has its own error enum; this module folds them into a
//! single [`SupervisorError`] for callers that drive the whole system
//! (the runtime loop and the binary).

use crate::certificate::CertificateError;
use crate::config::ConfigError;
use crate::dns::DnsError;
use crate::supervisor::{Phase, TransitionRejected};
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for supervisor operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Operation '{operation}' not allowed in phase {phase}")]
    NotAllowed {
        operation: &'static str,
        phase: Phase,
    },

}

impl SupervisorError {
    /// Create operation-not-allowed error
    pub fn not_allowed(operation: &'static str, phase: Phase) -> Self {
        Self::NotAllowed { operation, phase }
    }
}

impl From<TransitionRejected> for SupervisorError {
    fn from(rejected: TransitionRejected) -> Self {
        Self::InvalidTransition {
            from: rejected.from,
            to: rejected.to,
        }
    }
}

/// Result type for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;

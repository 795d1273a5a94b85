//! Transport layer between the supervisor and the broker
//!
//! The supervisor never touches sockets directly. It drives a
//! [`TransportClient`], which owns the encrypted session and the publish
//! primitives. Production code uses [`mqtt::RumqttTransport`]; tests use
//! `testing::MockTransport`.

use crate::config::{DeviceConfig, IdentitySection, QosLevel};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod deadline;
pub mod mqtt;

pub use deadline::{Deadline, DeadlineExceeded};

/// Transport failures, each carrying a human-readable detail
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
    #[error("Broker rejected credentials: {0}")]
    AuthRejected(String),
    #[error("Operation timed out: {0}")]
    Timeout(String),
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),
}

impl TransportError {
    /// Short machine-friendly label used in logs and diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::TlsHandshakeFailed(_) => "tls_handshake_failed",
            TransportError::AuthRejected(_) => "auth_rejected",
            TransportError::Timeout(_) => "timeout",
            TransportError::NetworkUnreachable(_) => "network_unreachable",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            TransportError::TlsHandshakeFailed(d)
            | TransportError::AuthRejected(d)
            | TransportError::Timeout(d)
            | TransportError::NetworkUnreachable(d) => d,
        }
    }
}

impl From<DeadlineExceeded> for TransportError {
    fn from(e: DeadlineExceeded) -> Self {
        TransportError::Timeout(e.to_string())
    }
}

/// Everything needed to open one session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    pub identity: IdentitySection,
    pub keep_alive: Duration,
    pub socket_timeout: Duration,
}

impl ConnectParams {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            endpoint: config.broker.endpoint.clone(),
            port: config.broker.port,
            client_id: config.client_id().to_string(),
            identity: config.identity.clone(),
            keep_alive: config.keep_alive(),
            socket_timeout: config.socket_timeout(),
        }
    }
}

/// One outbound message; built per publish and dropped afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retain: bool,
}

/// Capability owning the encrypted socket and publish primitives
///
/// A `Session` is returned by a successful `connect` and handed back for
/// every later call. Implementations must bound every network operation by
/// the socket timeout given in [`ConnectParams`].
#[async_trait::async_trait]
pub trait TransportClient: Send + Sync {
    type Session: Send + Sync;

    /// Open a mutually authenticated session
    async fn connect(&self, params: &ConnectParams) -> Result<Self::Session, TransportError>;

    /// Publish one message on an open session
    async fn publish(&self, session: &Self::Session, message: Message)
        -> Result<(), TransportError>;

    /// Probe whether the link under the session is still alive
    async fn check_link(&self, session: &Self::Session) -> Result<(), TransportError>;

    /// Close the session; best effort, never fails
    async fn disconnect(&self, session: Self::Session);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_params_from_config() {
        let config = DeviceConfig::test_config();
        let params = ConnectParams::from_config(&config);

        assert_eq!(params.endpoint, "example-ats.iot.eu-west-1.amazonaws.com");
        assert_eq!(params.port, 8883);
        assert_eq!(params.client_id, "test-thing");
        assert_eq!(params.keep_alive, Duration::from_secs(60));
        assert_eq!(params.socket_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_transport_error_kind_and_detail() {
        let errors = vec![
            TransportError::TlsHandshakeFailed("bad ca".to_string()),
            TransportError::AuthRejected("not authorized".to_string()),
            TransportError::Timeout("no connack".to_string()),
            TransportError::NetworkUnreachable("refused".to_string()),
        ];

        for error in errors {
            assert!(!error.kind().is_empty());
            assert!(error.to_string().contains(error.detail()));
        }
    }

    #[test]
    fn test_deadline_exceeded_maps_to_timeout() {
        let error: TransportError = DeadlineExceeded {
            budget: Duration::from_secs(30),
        }
        .into();
        assert_eq!(error.kind(), "timeout");
    }
}

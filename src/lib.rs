//! thinglink - MQTT-over-TLS connectivity and liveness supervisor
//!
//! Keeps a telemetry device's single broker session alive: mutual-TLS
//! connect, fixed-delay reconnect, certificate and DNS health checks, and
//! periodic heartbeat, status and data publishing.
//!
//! # Overview
//!
//! - [`config`] - layered TOML device configuration and feature toggles
//! - [`transport`] - the [`transport::TransportClient`] seam and its rumqttc implementation
//! - [`supervisor`] - phase machine, task scheduler and the supervisor itself
//! - [`runtime`] - the fixed-rate scheduling loop
//! - [`certificate`], [`dns`] - health checks feeding the supervisor
//! - [`diagnostics`], [`observability`] - sanitized events, logging and metrics
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use thinglink::supervisor::{ConnectivitySupervisor, Phase};
//! use thinglink::testing::{test_device_config, MockTransport};
//!
//! let supervisor =
//!     ConnectivitySupervisor::new(Arc::new(test_device_config()), MockTransport::new()).unwrap();
//! assert_eq!(supervisor.phase(), Phase::Disconnected);
//! assert_eq!(supervisor.topics().heartbeat, "$aws/things/test-thing/heartbeat");
//! ```

pub mod certificate;
pub mod config;
pub mod diagnostics;
pub mod dns;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod runtime;
pub mod supervisor;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use config::{DeviceConfig, Features};
pub use error::{SupervisorError, SupervisorResult};
pub use runtime::run_until;
pub use supervisor::{ConnectivitySupervisor, Phase, PublishOutcome, ReconnectDecision, TickReport};
pub use transport::mqtt::RumqttTransport;
pub use transport::{TransportClient, TransportError};

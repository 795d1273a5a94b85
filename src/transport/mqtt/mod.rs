//! MQTT 3.1.1 transport over rumqttc
//!
//! Split the same way as the rest of the transport code: pure helpers in
//! [`connection`] (option building, error classification) and the I/O in
//! [`client`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use thinglink::config::DeviceConfig;
//! use thinglink::transport::mqtt::RumqttTransport;
//! use thinglink::transport::{ConnectParams, TransportClient};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::load_from_file(Path::new("thinglink.toml"))?;
//! let transport = RumqttTransport::new();
//! let session = transport.connect(&ConnectParams::from_config(&config)).await?;
//! transport.check_link(&session).await?;
//! transport.disconnect(session).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;

pub use client::{MqttSession, RumqttTransport};
pub use connection::{classify_connection_error, configure_mqtt_options, LinkState};

//! Payload providers for data and status messages
//!
//! Sensor reads are outside the supervisor. It asks a [`TelemetrySource`]
//! for bytes only at publish time, and only while connected.

use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use std::time::Instant;

pub trait TelemetrySource: Send + Sync {
    /// Payload for `{prefix}/data`
    fn read_telemetry(&self) -> Bytes;

    /// Payload for `{prefix}/status`
    fn read_device_status(&self) -> Bytes;
}

/// Default provider reporting process-level facts as JSON
#[derive(Debug, Clone)]
pub struct SystemTelemetry {
    thing_name: String,
    started: Instant,
}

impl SystemTelemetry {
    pub fn new(thing_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            started: Instant::now(),
        }
    }

    fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl TelemetrySource for SystemTelemetry {
    fn read_telemetry(&self) -> Bytes {
        let payload = json!({
            "thing_name": self.thing_name,
            "timestamp": Utc::now().to_rfc3339(),
            "uptime_ms": self.uptime_ms(),
        });
        Bytes::from(payload.to_string())
    }

    fn read_device_status(&self) -> Bytes {
        let payload = json!({
            "thing_name": self.thing_name,
            "status": "online",
            "timestamp": Utc::now().to_rfc3339(),
            "uptime_ms": self.uptime_ms(),
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        });
        Bytes::from(payload.to_string())
    }
}

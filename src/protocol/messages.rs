//! Payload types owned by the supervisor
//!
//! Data and status payloads come from the telemetry provider; only the
//! heartbeat is built here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Liveness message published on `{prefix}/heartbeat`
///
/// # Example
///
/// ```rust
/// use thinglink::protocol::Heartbeat;
/// use chrono::Utc;
/// use uuid::Uuid;
///
/// let heartbeat = Heartbeat {
///     thing_name: "ESP32_Thing".to_string(),
///     boot_id: Uuid::new_v4(),
///     sequence: 1,
///     uptime_ms: 30_000,
///     timestamp: Utc::now(),
///     reconnect_count: 0,
/// };
/// let json = serde_json::to_string(&heartbeat).unwrap();
/// assert!(json.contains("\"sequence\":1"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub thing_name: String,
    /// Random per process, lets consumers detect restarts
    pub boot_id: Uuid,
    /// Starts at 1; advances only after a successful send
    pub sequence: u64,
    pub uptime_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub reconnect_count: u32,
}

impl Heartbeat {
    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(bytes::Bytes::from)
    }
}

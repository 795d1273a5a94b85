//! Pure connection helpers for the MQTT transport
//!
//! Option building and error classification live here so they can be tested
//! without a broker.

use crate::config::QosLevel;
use crate::transport::{ConnectParams, TransportError};
use rumqttc::{ConnectReturnCode, ConnectionError, MqttOptions, QoS, TlsConfiguration, Transport};
use std::io::ErrorKind;

/// ALPN protocol AWS IoT Core requires for MQTT on port 443
const AWS_IOT_ALPN: &[u8] = b"x-amzn-mqtt-ca";

/// Link health as reported by the background event loop task
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// CONNACK received and no failure since
    Up,
    /// The event loop failed or the broker closed the session
    Lost(TransportError),
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up)
    }
}

/// Build rumqttc options for one mutually authenticated MQTT 3.1.1 session
pub fn configure_mqtt_options(params: &ConnectParams) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(params.client_id.clone(), params.endpoint.clone(), params.port);

    mqtt_options.set_keep_alive(params.keep_alive);
    // Every session starts from scratch; there is nothing to resume
    mqtt_options.set_clean_session(true);

    let alpn = (params.port == 443).then(|| vec![AWS_IOT_ALPN.to_vec()]);
    let tls = TlsConfiguration::Simple {
        ca: params.identity.ca_cert.as_bytes().to_vec(),
        alpn,
        client_auth: Some((
            params.identity.device_cert.as_bytes().to_vec(),
            params.identity.private_key.as_bytes().to_vec(),
        )),
    };
    mqtt_options.set_transport(Transport::Tls(tls));

    mqtt_options
}

pub fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Classify an event loop failure into the transport taxonomy
pub fn classify_connection_error(error: &ConnectionError) -> TransportError {
    let detail = error.to_string();
    match error {
        ConnectionError::Tls(_) => TransportError::TlsHandshakeFailed(detail),
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::BadClientId => TransportError::AuthRejected(detail),
            _ => TransportError::NetworkUnreachable(detail),
        },
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => {
            TransportError::Timeout(detail)
        }
        ConnectionError::Io(io) if io.kind() == ErrorKind::TimedOut => {
            TransportError::Timeout(detail)
        }
        ConnectionError::Io(io) if is_tls_io_failure(io) => {
            TransportError::TlsHandshakeFailed(detail)
        }
        _ => TransportError::NetworkUnreachable(detail),
    }
}

/// rustls surfaces certificate problems as `InvalidData` I/O errors
fn is_tls_io_failure(io: &std::io::Error) -> bool {
    io.kind() == ErrorKind::InvalidData
}

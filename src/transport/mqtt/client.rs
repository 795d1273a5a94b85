//! Impure I/O for the MQTT transport
//!
//! `connect` drives the rumqttc event loop itself until CONNACK, under an
//! explicit deadline. After that the event loop moves into a background task
//! whose only job is to keep the session alive and report link health
//! through a `watch` channel. The task never reconnects on its own; that
//! decision belongs to the supervisor.

use super::connection::{classify_connection_error, configure_mqtt_options, to_mqtt_qos, LinkState};
use crate::transport::{ConnectParams, Deadline, Message, TransportClient, TransportError};
use crate::transport_span;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Request channel capacity between `AsyncClient` and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect` waits for the event loop task before aborting it
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Production transport over rumqttc with rustls mutual TLS
#[derive(Debug, Clone, Default)]
pub struct RumqttTransport;

impl RumqttTransport {
    pub fn new() -> Self {
        Self
    }
}

/// One live MQTT session
pub struct MqttSession {
    client: AsyncClient,
    client_id: String,
    link_rx: watch::Receiver<LinkState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Option<JoinHandle<()>>,
    socket_timeout: Duration,
}

impl MqttSession {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current link state; a stopped event loop counts as lost
    pub fn link_state(&self) -> LinkState {
        let state = self.link_rx.borrow().clone();
        if state.is_up() && self.link_rx.has_changed().is_err() {
            return LinkState::Lost(TransportError::NetworkUnreachable(
                "event loop stopped".to_string(),
            ));
        }
        state
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// Poll the event loop until the broker acknowledges the connection
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::AuthRejected(format!(
                        "CONNACK refused: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(event) => {
                debug!(?event, "Event before CONNACK");
            }
            Err(e) => return Err(classify_connection_error(&e)),
        }
    }
}

/// Keep the session alive and publish link health until told to stop
async fn drive_event_loop(
    mut event_loop: EventLoop,
    link_tx: watch::Sender<LinkState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown signal received, stopping event loop");
                    break;
                }
            }
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker closed the session");
                    let _ = link_tx.send(LinkState::Lost(TransportError::NetworkUnreachable(
                        "broker sent DISCONNECT".to_string(),
                    )));
                    break;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT sent, stopping event loop");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let error = classify_connection_error(&e);
                    warn!(kind = error.kind(), error = %e, "MQTT link lost");
                    let _ = link_tx.send(LinkState::Lost(error));
                    break;
                }
            }
        }
    }
}

async fn open_session(params: &ConnectParams) -> Result<MqttSession, TransportError> {
    info!(port = params.port, "Opening MQTT session");

    let options = configure_mqtt_options(params);
    let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

    let deadline = Deadline::after(params.socket_timeout);
    deadline.run(wait_for_connack(&mut event_loop)).await??;

    let (link_tx, link_rx) = watch::channel(LinkState::Up);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle =
        tokio::spawn(drive_event_loop(event_loop, link_tx, shutdown_rx).in_current_span());

    info!("MQTT session established");
    Ok(MqttSession {
        client,
        client_id: params.client_id.clone(),
        link_rx,
        shutdown_tx,
        event_loop_handle: Some(handle),
        socket_timeout: params.socket_timeout,
    })
}

#[async_trait]
impl TransportClient for RumqttTransport {
    type Session = MqttSession;

    async fn connect(&self, params: &ConnectParams) -> Result<MqttSession, TransportError> {
        let span = transport_span!(&params.client_id, &params.endpoint);
        open_session(params).instrument(span).await
    }

    async fn publish(&self, session: &MqttSession, message: Message) -> Result<(), TransportError> {
        if let LinkState::Lost(error) = session.link_state() {
            return Err(error);
        }

        let deadline = Deadline::after(session.socket_timeout);
        deadline
            .run(session.client.publish(
                message.topic,
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload.to_vec(),
            ))
            .await?
            .map_err(|e| TransportError::NetworkUnreachable(format!("publish failed: {e}")))
    }

    async fn check_link(&self, session: &MqttSession) -> Result<(), TransportError> {
        match session.link_state() {
            LinkState::Up => Ok(()),
            LinkState::Lost(error) => Err(error),
        }
    }

    async fn disconnect(&self, mut session: MqttSession) {
        let deadline = Deadline::after(session.socket_timeout.min(DISCONNECT_GRACE));
        match deadline.run(session.client.disconnect()).await {
            Ok(Ok(())) => debug!(client_id = %session.client_id, "DISCONNECT queued"),
            Ok(Err(e)) => debug!(error = %e, "Event loop already gone"),
            Err(e) => warn!(error = %e, "Timed out queueing DISCONNECT"),
        }

        if let Some(mut handle) = session.event_loop_handle.take() {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    let _ = session.shutdown_tx.send(true);
                    handle.abort();
                }
            }
        }
    }
}

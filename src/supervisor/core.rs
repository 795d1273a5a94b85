//! The connectivity supervisor
//!
//! Owns the session state and drives a [`TransportClient`] through connect
//! and reconnect cycles. All mutation goes through `&mut self`, one call at
//! a time, from the single scheduling loop in [`crate::runtime`].

use super::schedule::{Scheduler, TaskKind};
use super::state::{DegradedReason, Phase, SessionState, TransitionRejected};
use crate::certificate::{CertificateStatus, CertificateValidator, X509Validator};
use crate::config::{ConfigError, DeviceConfig, Features};
use crate::diagnostics::{
    sanitize_detail, DiagnosticEvent, DiagnosticKind, DiagnosticsSink, TracingSink,
};
use crate::dns::{DnsHealth, DnsHealthChecker, DnsOutcome, Resolver, TokioResolver};
use crate::error::{SupervisorError, SupervisorResult};
use crate::observability::MetricsCollector;
use crate::protocol::{Heartbeat, TopicSet};
use crate::telemetry::{SystemTelemetry, TelemetrySource};
use crate::transport::{ConnectParams, Message, TransportClient, TransportError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one reconnect evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectDecision {
    /// Phase is not `Disconnected`; nothing to do
    NotDisconnected,
    /// Back-off delay has not elapsed yet
    Waiting { remaining: Duration },
    /// Automatic reconnection is off and no external trigger is pending
    Suppressed,
    Connected,
    Failed(TransportError),
}

/// Result of one publish call
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published,
    /// Not connected; neither the telemetry source nor the transport was touched
    Skipped,
    /// Transport failed; the session was treated as lost
    Failed(TransportError),
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub fired: Vec<TaskKind>,
    pub reconnect: Option<ReconnectDecision>,
    pub published: Vec<(TaskKind, PublishOutcome)>,
    pub dns: Option<DnsOutcome>,
    pub certificate: Option<CertificateStatus>,
    pub phase: Phase,
}

impl TickReport {
    fn new(phase: Phase) -> Self {
        Self {
            fired: Vec::new(),
            reconnect: None,
            published: Vec::new(),
            dns: None,
            certificate: None,
            phase,
        }
    }
}

pub struct ConnectivitySupervisor<T: TransportClient> {
    config: Arc<DeviceConfig>,
    transport: T,
    session: Option<T::Session>,
    state: SessionState,
    scheduler: Scheduler,
    topics: TopicSet,
    validator: Arc<dyn CertificateValidator>,
    dns: DnsHealthChecker,
    diagnostics: Arc<dyn DiagnosticsSink>,
    telemetry: Arc<dyn TelemetrySource>,
    metrics: Arc<MetricsCollector>,
    boot_id: Uuid,
    started_at: Option<DateTime<Utc>>,
    heartbeat_sequence: u64,
    reconnect_permit: bool,
    suppression_reported: bool,
    last_certificate_status: Option<CertificateStatus>,
}

impl<T: TransportClient> ConnectivitySupervisor<T> {
    /// Build a supervisor with production collaborators
    pub fn new(config: Arc<DeviceConfig>, transport: T) -> SupervisorResult<Self> {
        let topics = TopicSet::from_prefix(&config.broker.topic_prefix)
            .map_err(|e| ConfigError::InvalidTopicPrefix(e.to_string()))?;

        Ok(Self {
            scheduler: Scheduler::from_config(&config),
            topics,
            validator: Arc::new(X509Validator::new(config.identity.expiry_warning_days)),
            dns: DnsHealthChecker::new(Arc::new(TokioResolver), config.socket_timeout()),
            diagnostics: Arc::new(TracingSink),
            telemetry: Arc::new(SystemTelemetry::new(config.broker.thing_name.clone())),
            metrics: Arc::new(MetricsCollector::new()),
            state: SessionState::new(),
            session: None,
            boot_id: Uuid::new_v4(),
            started_at: None,
            heartbeat_sequence: 0,
            reconnect_permit: false,
            suppression_reported: false,
            last_certificate_status: None,
            transport,
            config,
        })
    }

    pub fn with_validator(mut self, validator: impl CertificateValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn with_resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.dns = DnsHealthChecker::new(Arc::new(resolver), self.config.socket_timeout());
        self
    }

    pub fn with_diagnostics(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.diagnostics = Arc::new(sink);
        self
    }

    pub fn with_telemetry(mut self, source: impl TelemetrySource + 'static) -> Self {
        self.telemetry = Arc::new(source);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    // Accessors

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    pub fn dns_health(&self) -> &DnsHealth {
        self.dns.health()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn boot_id(&self) -> Uuid {
        self.boot_id
    }

    /// Sequence number of the last heartbeat that was actually sent
    pub fn heartbeat_sequence(&self) -> u64 {
        self.heartbeat_sequence
    }

    pub fn last_certificate_status(&self) -> Option<&CertificateStatus> {
        self.last_certificate_status.as_ref()
    }

    // Lifecycle

    /// Pre-flight: certificate check first, then the initial connect
    pub async fn start(&mut self, now: DateTime<Utc>) -> SupervisorResult<()> {
        if self.phase() != Phase::Disconnected {
            return Err(SupervisorError::not_allowed("start", self.phase()));
        }
        self.started_at.get_or_insert(now);
        info!(
            thing = %self.config.broker.thing_name,
            boot_id = %self.boot_id,
            "Starting connectivity supervisor"
        );

        if self.features().contains(Features::CERTIFICATE_VALIDATION) {
            self.scheduler.mark_fired(TaskKind::CertificateCheck, now);
            self.run_certificate_check(now).await;
        }

        if self.phase() == Phase::Disconnected {
            if let Err(e) = self.connect_inner(now).await {
                info!(kind = e.kind(), "Initial connect failed, reconnect schedule takes over");
            }
        }
        Ok(())
    }

    /// Evaluate every periodic task once, in fixed order
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::new(self.phase());
        if self.phase().is_terminal() {
            return report;
        }
        self.started_at.get_or_insert(now);

        for kind in TaskKind::ORDER {
            if self.scheduler.take_due(kind, now, self.phase()) {
                report.fired.push(kind);
                match kind {
                    TaskKind::ConnectionCheck => self.run_connection_check(now).await,
                    TaskKind::DnsCheck => report.dns = Some(self.run_dns_check(now).await),
                    TaskKind::CertificateCheck => {
                        report.certificate = Some(self.run_certificate_check(now).await)
                    }
                    TaskKind::Heartbeat => {
                        let outcome = self.publish_heartbeat(now).await;
                        report.published.push((kind, outcome));
                    }
                    TaskKind::Status => {
                        let outcome = self.publish_status(now).await;
                        report.published.push((kind, outcome));
                    }
                    TaskKind::DataPublish => {
                        let outcome = self.publish_data(now).await;
                        report.published.push((kind, outcome));
                    }
                }
            }

            // Reconnect runs with the connection step so this tick's publishes see its result
            if kind == TaskKind::ConnectionCheck {
                report.reconnect = Some(self.attempt_reconnect(now).await);
            }
        }

        report.phase = self.phase();
        report
    }

    /// Record a dead link; only valid while connected
    pub async fn on_connection_lost(
        &mut self,
        reason: TransportError,
        now: DateTime<Utc>,
    ) -> SupervisorResult<()> {
        if self.phase() != Phase::Connected {
            return Err(SupervisorError::not_allowed("on_connection_lost", self.phase()));
        }

        let detail = sanitize_detail(&reason.to_string());
        warn!(kind = reason.kind(), error = %detail, "Connection lost");
        let result = self.state.connection_lost(detail.clone(), now);
        self.apply_transition(result, now);
        self.metrics.connection_lost();
        self.release_session().await;
        self.emit(DiagnosticKind::ConnectionLost, now, detail);
        Ok(())
    }

    /// Fixed-delay reconnect gate
    pub async fn attempt_reconnect(&mut self, now: DateTime<Utc>) -> ReconnectDecision {
        if self.phase() != Phase::Disconnected {
            return ReconnectDecision::NotDisconnected;
        }

        let first_attempt = self.state.last_connect_attempt.is_none();
        let gated = !first_attempt && !self.features().contains(Features::GRACEFUL_RECONNECTION);
        if gated && !self.reconnect_permit {
            if !self.suppression_reported {
                self.suppression_reported = true;
                info!("Automatic reconnection disabled, waiting for external trigger");
                self.emit(
                    DiagnosticKind::ReconnectSuppressed,
                    now,
                    "graceful reconnection disabled",
                );
            }
            return ReconnectDecision::Suppressed;
        }

        if self.state.backoff_anchor().is_some_and(|anchor| anchor > now) {
            warn!("Clock moved backwards, re-anchoring reconnect back-off");
            self.state.clamp_to(now);
        }
        let remaining = self.state.backoff_remaining(now, self.reconnect_delay());
        if !remaining.is_zero() {
            return ReconnectDecision::Waiting { remaining };
        }

        if gated {
            self.reconnect_permit = false;
        }
        match self.connect_inner(now).await {
            Ok(()) => ReconnectDecision::Connected,
            Err(e) => ReconnectDecision::Failed(e),
        }
    }

    /// Open a session; only valid while disconnected
    pub async fn connect(&mut self, now: DateTime<Utc>) -> SupervisorResult<()> {
        if self.phase() != Phase::Disconnected {
            return Err(SupervisorError::not_allowed("connect", self.phase()));
        }
        self.connect_inner(now).await.map_err(SupervisorError::from)
    }

    /// Allow one more reconnect while automatic reconnection is off
    pub fn request_reconnect(&mut self) {
        info!("External reconnect requested");
        self.reconnect_permit = true;
        self.suppression_reported = false;
    }

    /// Leave `Degraded` after credentials were refreshed out of band
    pub fn acknowledge_credential_refresh(&mut self, now: DateTime<Utc>) -> SupervisorResult<()> {
        if !self.phase().is_degraded() {
            return Err(SupervisorError::not_allowed(
                "acknowledge_credential_refresh",
                self.phase(),
            ));
        }
        let previous = self.state.transition(Phase::Disconnected)?;
        self.last_certificate_status = None;
        self.record_transition(previous, now);
        Ok(())
    }

    /// Stop for good; every task is disabled and the session closed
    pub async fn shutdown(&mut self, now: DateTime<Utc>) {
        if self.phase().is_terminal() {
            return;
        }
        let result = self.state.transition(Phase::ShuttingDown);
        self.apply_transition(result, now);
        self.scheduler.disable_all();
        self.release_session().await;
        info!("Connectivity supervisor shut down");
    }

    // Publishing

    pub async fn publish_data(&mut self, now: DateTime<Utc>) -> PublishOutcome {
        if self.phase() != Phase::Connected {
            return self.skip_publish();
        }
        let payload = self.telemetry.read_telemetry();
        let topic = self.topics.data.clone();
        self.send(topic, payload, now).await
    }

    pub async fn publish_status(&mut self, now: DateTime<Utc>) -> PublishOutcome {
        if self.phase() != Phase::Connected {
            return self.skip_publish();
        }
        let payload = self.telemetry.read_device_status();
        let topic = self.topics.status.clone();
        self.send(topic, payload, now).await
    }

    pub async fn publish_heartbeat(&mut self, now: DateTime<Utc>) -> PublishOutcome {
        if self.phase() != Phase::Connected {
            return self.skip_publish();
        }

        let heartbeat = Heartbeat {
            thing_name: self.config.broker.thing_name.clone(),
            boot_id: self.boot_id,
            sequence: self.heartbeat_sequence + 1,
            uptime_ms: self.uptime_ms(now),
            timestamp: now,
            reconnect_count: self.state.reconnect_count,
        };
        let payload = match heartbeat.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize heartbeat");
                return self.skip_publish();
            }
        };

        let topic = self.topics.heartbeat.clone();
        let outcome = self.send(topic, payload, now).await;
        if outcome == PublishOutcome::Published {
            self.heartbeat_sequence = heartbeat.sequence;
            self.metrics.heartbeat_sent();
            debug!(sequence = heartbeat.sequence, "Heartbeat sent");
        }
        outcome
    }

    // Periodic checks

    async fn run_connection_check(&mut self, now: DateTime<Utc>) {
        let result = match &self.session {
            Some(session) => self.transport.check_link(session).await,
            None => Err(TransportError::NetworkUnreachable(
                "connected without a session".to_string(),
            )),
        };
        if let Err(e) = result {
            // Phase is Connected here, so this cannot be rejected
            let _ = self.on_connection_lost(e, now).await;
        }
    }

    async fn run_dns_check(&mut self, now: DateTime<Utc>) -> DnsOutcome {
        let config = Arc::clone(&self.config);
        let outcome = self
            .dns
            .check(&config.broker.endpoint, config.broker.port, now)
            .await;

        match &outcome {
            DnsOutcome::Resolved(_) => self.metrics.dns_checked(true),
            DnsOutcome::Unresolved(e) => {
                self.metrics.dns_checked(false);
                let failures = self.dns.health().consecutive_failures;
                warn!(error = %e, consecutive_failures = failures, "DNS check failed");
                self.emit(
                    DiagnosticKind::DnsUnresolved,
                    now,
                    format!("{e} ({failures} consecutive)"),
                );
            }
        }
        outcome
    }

    async fn run_certificate_check(&mut self, now: DateTime<Utc>) -> CertificateStatus {
        let status = self.validator.validate(&self.config.identity, now);
        self.metrics.certificate_checked(status.is_usable());
        let changed = self.last_certificate_status.as_ref() != Some(&status);

        match &status {
            CertificateStatus::Invalid { reason } => {
                if changed {
                    error!(reason = %reason, "Device identity invalid");
                    self.emit(DiagnosticKind::CertificateInvalid, now, reason.to_string());
                }
                if !self.phase().is_degraded() {
                    if self.phase() == Phase::Connected {
                        self.state.last_connection_lost = Some(now);
                    }
                    self.release_session().await;
                    self.state.last_error = Some(reason.to_string());
                    let result = self
                        .state
                        .transition(Phase::Degraded(DegradedReason::Certificate));
                    self.apply_transition(result, now);
                }
            }
            CertificateStatus::ExpiringSoon { days } => {
                if changed {
                    warn!(days_remaining = days, "Device certificate expiring soon");
                    self.emit(
                        DiagnosticKind::CertificateExpiringSoon,
                        now,
                        format!("device certificate expires in {days} days"),
                    );
                }
                self.recover_from_certificate_degradation(now);
            }
            CertificateStatus::Valid => self.recover_from_certificate_degradation(now),
        }

        self.last_certificate_status = Some(status.clone());
        status
    }

    fn recover_from_certificate_degradation(&mut self, now: DateTime<Utc>) {
        if self.phase() == Phase::Degraded(DegradedReason::Certificate) {
            info!("Device identity valid again, leaving degraded mode");
            let result = self.state.transition(Phase::Disconnected);
            self.apply_transition(result, now);
        }
    }

    // Internals

    fn features(&self) -> Features {
        self.config.features
    }

    fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.config.mqtt.reconnect_delay_ms)
    }

    fn uptime_ms(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    async fn connect_inner(&mut self, now: DateTime<Utc>) -> Result<(), TransportError> {
        let result = self.state.begin_connect(now);
        self.apply_transition(result, now);
        self.metrics.connection_attempt();

        let params = ConnectParams::from_config(&self.config);
        match self.transport.connect(&params).await {
            Ok(session) => {
                self.session = Some(session);
                let result = self.state.connect_succeeded(now);
                self.apply_transition(result, now);
                self.metrics.connection_established();
                self.suppression_reported = false;
                info!(
                    reconnect_count = self.state.reconnect_count,
                    "Connected to broker"
                );
                self.emit(
                    DiagnosticKind::SessionEstablished,
                    now,
                    format!("{}:{}", params.endpoint, params.port),
                );
                Ok(())
            }
            Err(e) => {
                let detail = sanitize_detail(&e.to_string());
                let result = self.state.connect_failed(detail.clone());
                self.apply_transition(result, now);
                self.metrics.connection_failed();
                warn!(
                    kind = e.kind(),
                    error = %detail,
                    consecutive_failures = self.state.consecutive_failures,
                    "Connect attempt failed"
                );
                self.emit(DiagnosticKind::ConnectFailed, now, detail);
                Err(e)
            }
        }
    }

    async fn send(&mut self, topic: String, payload: Bytes, now: DateTime<Utc>) -> PublishOutcome {
        let message = Message {
            topic,
            payload,
            qos: self.config.mqtt.qos,
            retain: self.config.mqtt.retain,
        };
        let result = match &self.session {
            Some(session) => self.transport.publish(session, message).await,
            None => return self.skip_publish(),
        };

        match result {
            Ok(()) => {
                self.metrics.message_published();
                PublishOutcome::Published
            }
            Err(e) => {
                self.metrics.publish_failed();
                self.emit(DiagnosticKind::PublishFailed, now, e.to_string());
                // Phase is Connected here, so this cannot be rejected
                let _ = self.on_connection_lost(e.clone(), now).await;
                PublishOutcome::Failed(e)
            }
        }
    }

    fn skip_publish(&self) -> PublishOutcome {
        self.metrics.publish_skipped();
        PublishOutcome::Skipped
    }

    async fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.transport.disconnect(session).await;
        }
    }

    fn apply_transition(&mut self, result: Result<Phase, TransitionRejected>, now: DateTime<Utc>) {
        match result {
            Ok(previous) => self.record_transition(previous, now),
            Err(rejected) => error!(
                from = %rejected.from,
                to = %rejected.to,
                "Rejected phase transition"
            ),
        }
    }

    fn record_transition(&mut self, previous: Phase, now: DateTime<Utc>) {
        let current = self.phase();
        self.metrics.set_phase(current);
        debug!(from = %previous, to = %current, "Phase transition");
        self.emit(
            DiagnosticKind::PhaseTransition,
            now,
            format!("{previous} -> {current}"),
        );
    }

    fn emit(&self, kind: DiagnosticKind, now: DateTime<Utc>, detail: impl AsRef<str>) {
        if self.features().contains(kind.required_feature()) {
            self.diagnostics.emit(DiagnosticEvent::new(kind, now, detail));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateError;
    use crate::testing::{
        test_device_config, MockResolver, MockTransport, RecordingSink, StaticTelemetry,
        StaticValidator,
    };
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    struct Harness {
        supervisor: ConnectivitySupervisor<MockTransport>,
        transport: MockTransport,
        validator: StaticValidator,
        sink: RecordingSink,
        telemetry: StaticTelemetry,
    }

    fn harness_with(config: DeviceConfig) -> Harness {
        let transport = MockTransport::new();
        let validator = StaticValidator::new(CertificateStatus::Valid);
        let sink = RecordingSink::new();
        let telemetry = StaticTelemetry::default();
        let supervisor = ConnectivitySupervisor::new(Arc::new(config), transport.clone())
            .unwrap()
            .with_validator(validator.clone())
            .with_resolver(MockResolver::resolving(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .with_diagnostics(sink.clone())
            .with_telemetry(telemetry.clone());

        Harness {
            supervisor,
            transport,
            validator,
            sink,
            telemetry,
        }
    }

    fn harness() -> Harness {
        harness_with(test_device_config())
    }

    fn invalid() -> CertificateStatus {
        CertificateStatus::Invalid {
            reason: CertificateError::MissingKey,
        }
    }

    #[tokio::test]
    async fn test_start_connects() {
        let mut h = harness();

        h.supervisor.start(at(0)).await.unwrap();

        assert_eq!(h.supervisor.phase(), Phase::Connected);
        assert_eq!(h.transport.connect_count().await, 1);
        assert_eq!(h.validator.call_count(), 1);
        assert_eq!(h.sink.count(DiagnosticKind::SessionEstablished), 1);
    }

    #[tokio::test]
    async fn test_start_with_invalid_certificate_never_connects() {
        let mut h = harness();
        h.validator.set_status(invalid());

        h.supervisor.start(at(0)).await.unwrap();

        assert_eq!(
            h.supervisor.phase(),
            Phase::Degraded(DegradedReason::Certificate)
        );
        assert_eq!(h.transport.connect_count().await, 0);
    }

    #[tokio::test]
    async fn test_connect_params_carry_credentials() {
        let mut h = harness();
        h.supervisor.connect(at(0)).await.unwrap();

        let params = h.transport.get_connect_params().await;
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].client_id, "test-thing");
        assert_eq!(params[0].identity, h.supervisor.config().identity);
        assert_eq!(params[0].socket_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_connect_only_from_disconnected() {
        let mut h = harness();
        h.supervisor.connect(at(0)).await.unwrap();

        let result = h.supervisor.connect(at(10)).await;
        assert!(matches!(result, Err(SupervisorError::NotAllowed { .. })));
        assert_eq!(h.transport.connect_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_connect_records_error() {
        let mut h = harness();
        h.transport
            .set_connect_error(Some(TransportError::AuthRejected("not authorized".to_string())))
            .await;

        let result = h.supervisor.connect(at(0)).await;

        assert!(matches!(
            result,
            Err(SupervisorError::Transport(TransportError::AuthRejected(_)))
        ));
        let state = h.supervisor.session_state();
        assert_eq!(state.phase(), Phase::Disconnected);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.last_connect_attempt, Some(at(0)));
        assert!(state.last_error.as_deref().unwrap().contains("not authorized"));
        assert_eq!(h.sink.count(DiagnosticKind::ConnectFailed), 1);
    }

    #[tokio::test]
    async fn test_reconnect_waits_for_fixed_delay() {
        // Arrange: connected, then the link dies at t=0
        let mut h = harness();
        h.supervisor.connect(at(-100)).await.unwrap();
        h.supervisor
            .on_connection_lost(TransportError::Timeout("ping".to_string()), at(0))
            .await
            .unwrap();

        // Act / Assert
        assert_eq!(
            h.supervisor.attempt_reconnect(at(4999)).await,
            ReconnectDecision::Waiting {
                remaining: Duration::from_millis(1)
            }
        );
        assert_eq!(
            h.supervisor.attempt_reconnect(at(5000)).await,
            ReconnectDecision::Connected
        );
        assert_eq!(h.supervisor.session_state().reconnect_count, 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_restarts_delay() {
        let mut h = harness();
        h.transport
            .set_connect_error(Some(TransportError::NetworkUnreachable("down".to_string())))
            .await;

        assert!(matches!(
            h.supervisor.attempt_reconnect(at(0)).await,
            ReconnectDecision::Failed(_)
        ));
        assert!(matches!(
            h.supervisor.attempt_reconnect(at(2500)).await,
            ReconnectDecision::Waiting { .. }
        ));
        assert!(matches!(
            h.supervisor.attempt_reconnect(at(5000)).await,
            ReconnectDecision::Failed(_)
        ));
        assert_eq!(h.supervisor.session_state().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_graceful_reconnection_off_suppresses_after_first_attempt() {
        // Arrange
        let mut config = test_device_config();
        config.features.remove(Features::GRACEFUL_RECONNECTION);
        let mut h = harness_with(config);

        // Act: first attempt is allowed regardless of the flag
        assert_eq!(
            h.supervisor.attempt_reconnect(at(0)).await,
            ReconnectDecision::Connected
        );
        h.supervisor
            .on_connection_lost(TransportError::Timeout("ping".to_string()), at(100))
            .await
            .unwrap();

        // Assert
        assert_eq!(
            h.supervisor.attempt_reconnect(at(60_000)).await,
            ReconnectDecision::Suppressed
        );
        assert_eq!(h.transport.connect_count().await, 1);
        assert_eq!(h.sink.count(DiagnosticKind::ReconnectSuppressed), 1);
    }

    #[tokio::test]
    async fn test_request_reconnect_permits_one_attempt() {
        let mut config = test_device_config();
        config.features.remove(Features::GRACEFUL_RECONNECTION);
        let mut h = harness_with(config);
        h.transport
            .set_connect_error(Some(TransportError::Timeout("slow".to_string())))
            .await;
        h.supervisor.attempt_reconnect(at(0)).await;

        h.supervisor.request_reconnect();
        // Still subject to back-off
        assert!(matches!(
            h.supervisor.attempt_reconnect(at(1000)).await,
            ReconnectDecision::Waiting { .. }
        ));
        assert!(matches!(
            h.supervisor.attempt_reconnect(at(5000)).await,
            ReconnectDecision::Failed(_)
        ));
        assert_eq!(
            h.supervisor.attempt_reconnect(at(10_000)).await,
            ReconnectDecision::Suppressed
        );
        assert_eq!(h.transport.connect_count().await, 2);
    }

    #[tokio::test]
    async fn test_publish_skipped_when_disconnected() {
        let mut h = harness();

        assert_eq!(h.supervisor.publish_data(at(0)).await, PublishOutcome::Skipped);
        assert_eq!(h.supervisor.publish_status(at(0)).await, PublishOutcome::Skipped);
        assert_eq!(
            h.supervisor.publish_heartbeat(at(0)).await,
            PublishOutcome::Skipped
        );

        assert_eq!(h.transport.publish_attempts(), 0);
        assert_eq!(h.telemetry.read_count(), 0);
        assert_eq!(h.supervisor.metrics().snapshot().publish.skipped, 3);
    }

    #[tokio::test]
    async fn test_publish_uses_topics_and_qos() {
        let mut h = harness();
        h.supervisor.connect(at(0)).await.unwrap();

        assert_eq!(
            h.supervisor.publish_data(at(10)).await,
            PublishOutcome::Published
        );

        let messages = h.transport.get_published_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "$aws/things/test-thing/data");
        assert_eq!(messages[0].payload, h.telemetry.data);
        assert_eq!(messages[0].qos, crate::config::QosLevel::AtLeastOnce);
        assert!(!messages[0].retain);
    }

    #[tokio::test]
    async fn test_publish_failure_is_connection_loss() {
        let mut h = harness();
        h.supervisor.connect(at(0)).await.unwrap();
        let broken = TransportError::NetworkUnreachable("broken pipe".to_string());
        h.transport.set_publish_error(Some(broken.clone())).await;

        let outcome = h.supervisor.publish_status(at(100)).await;

        assert_eq!(outcome, PublishOutcome::Failed(broken));
        assert_eq!(h.supervisor.phase(), Phase::Disconnected);
        assert_eq!(
            h.supervisor.session_state().last_connection_lost,
            Some(at(100))
        );
        assert_eq!(h.transport.disconnect_count(), 1);
        assert_eq!(h.sink.count(DiagnosticKind::ConnectionLost), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_sequence_advances_only_on_success() {
        let mut h = harness();
        h.supervisor.start(at(0)).await.unwrap();

        h.supervisor.publish_heartbeat(at(1000)).await;
        h.supervisor.publish_heartbeat(at(2000)).await;
        assert_eq!(h.supervisor.heartbeat_sequence(), 2);

        h.transport
            .set_publish_error(Some(TransportError::Timeout("ack".to_string())))
            .await;
        h.supervisor.publish_heartbeat(at(3000)).await;
        assert_eq!(h.supervisor.heartbeat_sequence(), 2);

        let beats = h.transport.published_to("$aws/things/test-thing/heartbeat").await;
        let last: Heartbeat = serde_json::from_slice(&beats[1].payload).unwrap();
        assert_eq!(last.sequence, 2);
        assert_eq!(last.uptime_ms, 2000);
        assert_eq!(last.boot_id, h.supervisor.boot_id());
        assert_eq!(last.thing_name, "test-thing");
    }

    #[tokio::test]
    async fn test_connection_check_detects_dead_link() {
        let mut h = harness();
        h.supervisor.start(at(0)).await.unwrap();
        h.transport
            .drop_link(TransportError::NetworkUnreachable("reset".to_string()))
            .await;

        let report = h.supervisor.tick(at(10)).await;

        assert!(report.fired.contains(&TaskKind::ConnectionCheck));
        assert_eq!(h.supervisor.session_state().last_connection_lost, Some(at(10)));
        // Back-off holds the reconnect in the same tick
        assert!(matches!(
            report.reconnect,
            Some(ReconnectDecision::Waiting { .. })
        ));
        assert_eq!(report.phase, Phase::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_in_tick_enables_same_tick_publish() {
        let mut h = harness();
        h.transport
            .queue_connect_results(vec![Err(TransportError::Timeout("slow".to_string()))])
            .await;
        h.supervisor.start(at(0)).await.unwrap();
        assert_eq!(h.supervisor.phase(), Phase::Disconnected);

        let report = h.supervisor.tick(at(5000)).await;

        assert_eq!(report.reconnect, Some(ReconnectDecision::Connected));
        assert!(report
            .published
            .contains(&(TaskKind::DataPublish, PublishOutcome::Published)));
    }

    #[tokio::test]
    async fn test_invalid_certificate_tick_releases_session() {
        let mut h = harness();
        h.supervisor.start(at(0)).await.unwrap();
        h.validator.set_status(invalid());

        let report = h.supervisor.tick(at(60_000)).await;

        assert_eq!(report.phase, Phase::Degraded(DegradedReason::Certificate));
        assert_eq!(h.transport.disconnect_count(), 1);
        assert_eq!(h.sink.count(DiagnosticKind::CertificateInvalid), 1);

        // No further connects while degraded
        for i in 1..10 {
            h.supervisor.tick(at(60_000 + i * 5000)).await;
        }
        assert_eq!(h.transport.connect_count().await, 1);
    }

    #[tokio::test]
    async fn test_valid_certificate_recovers_from_degraded() {
        let mut h = harness();
        h.validator.set_status(invalid());
        h.supervisor.start(at(0)).await.unwrap();

        h.validator.set_status(CertificateStatus::ExpiringSoon { days: 5 });
        let report = h.supervisor.tick(at(60_000)).await;

        // Reconnect slot precedes the certificate check, so the connect lands next tick
        assert_eq!(report.phase, Phase::Disconnected);
        assert_eq!(h.sink.count(DiagnosticKind::CertificateExpiringSoon), 1);

        let report = h.supervisor.tick(at(60_250)).await;
        assert_eq!(report.reconnect, Some(ReconnectDecision::Connected));
        assert_eq!(h.transport.connect_count().await, 1);
    }

    #[tokio::test]
    async fn test_certificate_drop_anchors_reconnect_delay() {
        let mut h = harness();
        h.supervisor.start(at(0)).await.unwrap();
        h.validator.set_status(invalid());
        h.supervisor.tick(at(60_000)).await;
        assert_eq!(
            h.supervisor.session_state().last_connection_lost,
            Some(at(60_000))
        );

        h.supervisor.acknowledge_credential_refresh(at(60_100)).unwrap();
        let report = h.supervisor.tick(at(60_250)).await;
        assert_eq!(
            report.reconnect,
            Some(ReconnectDecision::Waiting {
                remaining: Duration::from_millis(4750)
            })
        );

        let report = h.supervisor.tick(at(65_000)).await;
        assert_eq!(report.reconnect, Some(ReconnectDecision::Connected));
        assert_eq!(h.transport.connect_count().await, 2);
    }

    #[tokio::test]
    async fn test_acknowledge_credential_refresh() {
        let mut h = harness();
        h.validator.set_status(invalid());
        h.supervisor.start(at(0)).await.unwrap();

        h.supervisor.acknowledge_credential_refresh(at(10)).unwrap();
        assert_eq!(h.supervisor.phase(), Phase::Disconnected);

        let result = h.supervisor.acknowledge_credential_refresh(at(20));
        assert!(matches!(result, Err(SupervisorError::NotAllowed { .. })));
    }

    #[tokio::test]
    async fn test_dns_check_runs_only_while_disconnected() {
        let mut config = test_device_config();
        config.features.remove(Features::GRACEFUL_RECONNECTION);
        let mut h = harness_with(config);
        let resolver = MockResolver::failing("NXDOMAIN");
        h.supervisor = h.supervisor.with_resolver(resolver.clone());
        h.transport
            .set_connect_error(Some(TransportError::NetworkUnreachable("no route".to_string())))
            .await;

        h.supervisor.start(at(0)).await.unwrap();
        for i in 0..3 {
            h.supervisor.tick(at(i * 30_000)).await;
        }

        assert_eq!(h.supervisor.phase(), Phase::Disconnected);
        assert_eq!(h.supervisor.dns_health().consecutive_failures, 3);
        assert_eq!(h.sink.count(DiagnosticKind::DnsUnresolved), 3);
        assert_eq!(resolver.lookup_count().await, 3);
    }

    #[tokio::test]
    async fn test_diagnostics_gated_by_features() {
        let mut config = test_device_config();
        config.features.remove(Features::ERROR_DIAGNOSTICS);
        config.features.remove(Features::CONNECTION_MONITORING);
        let mut h = harness_with(config);
        h.transport
            .set_connect_error(Some(TransportError::Timeout("slow".to_string())))
            .await;

        h.supervisor.start(at(0)).await.unwrap();

        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_phase_transitions_emitted_with_monitoring() {
        let mut h = harness();
        h.supervisor.start(at(0)).await.unwrap();

        let transitions: Vec<String> = h
            .sink
            .events()
            .into_iter()
            .filter(|e| e.kind == DiagnosticKind::PhaseTransition)
            .map(|e| e.detail)
            .collect();
        assert_eq!(
            transitions,
            vec!["Disconnected -> Connecting", "Connecting -> Connected"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let mut h = harness();
        h.supervisor.start(at(0)).await.unwrap();

        h.supervisor.shutdown(at(50)).await;

        assert_eq!(h.supervisor.phase(), Phase::ShuttingDown);
        assert_eq!(h.transport.disconnect_count(), 1);
        assert!(h.supervisor.scheduler().tasks().iter().all(|t| !t.enabled));

        let report = h.supervisor.tick(at(100_000)).await;
        assert!(report.fired.is_empty());
        assert_eq!(report.reconnect, None);
        assert_eq!(h.transport.publish_attempts(), 0);

        h.supervisor.shutdown(at(100_500)).await;
        assert_eq!(h.transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_transition_uses_caller_clock() {
        let mut h = harness();
        h.supervisor.start(at(0)).await.unwrap();

        h.supervisor.shutdown(at(42_000)).await;

        let last = h
            .sink
            .events()
            .into_iter()
            .filter(|e| e.kind == DiagnosticKind::PhaseTransition)
            .last()
            .unwrap();
        assert_eq!(last.detail, "Connected -> ShuttingDown");
        assert_eq!(last.timestamp, at(42_000));
    }

    #[tokio::test]
    async fn test_on_connection_lost_rejected_when_not_connected() {
        let mut h = harness();
        let result = h
            .supervisor
            .on_connection_lost(TransportError::Timeout("x".to_string()), at(0))
            .await;

        assert!(matches!(result, Err(SupervisorError::NotAllowed { .. })));
        assert_eq!(h.supervisor.session_state().last_connection_lost, None);
    }

    #[tokio::test]
    async fn test_disabled_features_skip_tasks() {
        let mut config = test_device_config();
        config.features = Features::empty();
        let mut h = harness_with(config);
        h.supervisor.start(at(0)).await.unwrap();

        let report = h.supervisor.tick(at(1)).await;

        assert_eq!(report.fired, vec![TaskKind::DataPublish]);
        assert_eq!(h.validator.call_count(), 0);
    }
}

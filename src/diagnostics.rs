//! Structured diagnostic events
//!
//! The supervisor reports what happened through a [`DiagnosticsSink`]. Which
//! events are emitted at all is decided by [`DiagnosticKind::required_feature`]:
//! failures need `error_diagnostics`, lifecycle events need
//! `connection_monitoring`.

use crate::config::Features;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Upper bound for a sanitized detail string, in bytes
pub const MAX_DETAIL_LEN: usize = 500;

const TRUNCATE_SUFFIX: &str = "...[truncated]";

static PEM_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)-----BEGIN ([A-Z0-9 ]+)-----.*?-----END [A-Z0-9 ]+-----")
        .expect("PEM pattern is valid")
});

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|certs?|private|\.ssh|\.aws)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Strip key material and secrets from a detail string and bound its length
pub fn sanitize_detail(detail: &str) -> String {
    let sanitized = PEM_BLOCK.replace_all(detail, "[${1} REDACTED]");
    let sanitized = SECRET_ASSIGNMENT.replace_all(&sanitized, "${1}=***");
    let mut sanitized = SENSITIVE_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_DETAIL_LEN {
        let mut cut = MAX_DETAIL_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    PhaseTransition,
    SessionEstablished,
    ReconnectSuppressed,
    ConnectFailed,
    ConnectionLost,
    PublishFailed,
    DnsUnresolved,
    CertificateInvalid,
    CertificateExpiringSoon,
}

impl DiagnosticKind {
    /// Feature switch gating this kind of event
    pub fn required_feature(&self) -> Features {
        match self {
            DiagnosticKind::PhaseTransition
            | DiagnosticKind::SessionEstablished
            | DiagnosticKind::ReconnectSuppressed => Features::CONNECTION_MONITORING,
            DiagnosticKind::ConnectFailed
            | DiagnosticKind::ConnectionLost
            | DiagnosticKind::PublishFailed
            | DiagnosticKind::DnsUnresolved
            | DiagnosticKind::CertificateInvalid
            | DiagnosticKind::CertificateExpiringSoon => Features::ERROR_DIAGNOSTICS,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.required_feature() == Features::ERROR_DIAGNOSTICS
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::PhaseTransition => "phase_transition",
            DiagnosticKind::SessionEstablished => "session_established",
            DiagnosticKind::ReconnectSuppressed => "reconnect_suppressed",
            DiagnosticKind::ConnectFailed => "connect_failed",
            DiagnosticKind::ConnectionLost => "connection_lost",
            DiagnosticKind::PublishFailed => "publish_failed",
            DiagnosticKind::DnsUnresolved => "dns_unresolved",
            DiagnosticKind::CertificateInvalid => "certificate_invalid",
            DiagnosticKind::CertificateExpiringSoon => "certificate_expiring_soon",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl DiagnosticEvent {
    /// Build an event; the detail is sanitized
    pub fn new(kind: DiagnosticKind, timestamp: DateTime<Utc>, detail: impl AsRef<str>) -> Self {
        Self {
            kind,
            timestamp,
            detail: sanitize_detail(detail.as_ref()),
        }
    }
}

/// Fire-and-forget receiver of diagnostic events
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, event: DiagnosticEvent) {
        if event.kind.is_failure() {
            warn!(
                kind = %event.kind,
                timestamp = %event.timestamp.to_rfc3339(),
                detail = %event.detail,
                "Diagnostic event"
            );
        } else {
            info!(
                kind = %event.kind,
                timestamp = %event.timestamp.to_rfc3339(),
                detail = %event.detail,
                "Diagnostic event"
            );
        }
    }
}

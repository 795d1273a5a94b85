//! Periodic task bookkeeping
//!
//! Each periodic activity has one [`ScheduledTask`]. Which feature switch
//! gates a task and in which phases it applies are both answered by
//! [`TaskKind`], so the tick loop never checks flags ad hoc.

use super::state::Phase;
use crate::config::{DeviceConfig, Features};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ConnectionCheck,
    DnsCheck,
    CertificateCheck,
    Heartbeat,
    Status,
    DataPublish,
}

impl TaskKind {
    /// Evaluation order within one tick
    pub const ORDER: [TaskKind; 6] = [
        TaskKind::ConnectionCheck,
        TaskKind::DnsCheck,
        TaskKind::CertificateCheck,
        TaskKind::Heartbeat,
        TaskKind::Status,
        TaskKind::DataPublish,
    ];

    /// Feature switch that must be on for the task to run, if any
    pub fn required_feature(&self) -> Option<Features> {
        match self {
            TaskKind::ConnectionCheck => Some(Features::CONNECTION_MONITORING),
            TaskKind::DnsCheck => Some(Features::DNS_CHECKING),
            TaskKind::CertificateCheck => Some(Features::CERTIFICATE_VALIDATION),
            TaskKind::Heartbeat => Some(Features::HEARTBEAT_MESSAGES),
            TaskKind::Status => Some(Features::STATUS_MESSAGES),
            TaskKind::DataPublish => None,
        }
    }

    /// Whether the task is evaluated at all in `phase`
    pub fn applies_in(&self, phase: Phase) -> bool {
        if phase.is_terminal() {
            return false;
        }
        match self {
            TaskKind::ConnectionCheck => phase == Phase::Connected,
            TaskKind::DnsCheck => phase == Phase::Disconnected,
            TaskKind::CertificateCheck
            | TaskKind::Heartbeat
            | TaskKind::Status
            | TaskKind::DataPublish => true,
        }
    }

    pub fn interval_ms(&self, config: &DeviceConfig) -> u64 {
        let intervals = &config.intervals;
        match self {
            TaskKind::ConnectionCheck => intervals.connection_check_ms,
            TaskKind::DnsCheck => intervals.dns_check_ms,
            TaskKind::CertificateCheck => intervals.cert_validation_ms,
            TaskKind::Heartbeat => intervals.heartbeat_ms,
            TaskKind::Status => intervals.status_ms,
            TaskKind::DataPublish => intervals.publish_ms,
        }
    }

    fn index(&self) -> usize {
        match self {
            TaskKind::ConnectionCheck => 0,
            TaskKind::DnsCheck => 1,
            TaskKind::CertificateCheck => 2,
            TaskKind::Heartbeat => 3,
            TaskKind::Status => 4,
            TaskKind::DataPublish => 5,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::ConnectionCheck => "connection-check",
            TaskKind::DnsCheck => "dns-check",
            TaskKind::CertificateCheck => "certificate-check",
            TaskKind::Heartbeat => "heartbeat",
            TaskKind::Status => "status",
            TaskKind::DataPublish => "data-publish",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub kind: TaskKind,
    pub interval_ms: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl ScheduledTask {
    /// Interval elapsed since the last firing (or never fired)
    fn interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired_at {
            None => true,
            Some(last) => (now - last).num_milliseconds() >= self.interval_ms as i64,
        }
    }
}

/// All periodic tasks, indexed by kind
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler {
    tasks: [ScheduledTask; 6],
}

impl Scheduler {
    pub fn from_config(config: &DeviceConfig) -> Self {
        let tasks = TaskKind::ORDER.map(|kind| ScheduledTask {
            kind,
            interval_ms: kind.interval_ms(config),
            last_fired_at: None,
            enabled: kind
                .required_feature()
                .map_or(true, |feature| config.features.contains(feature)),
        });
        Self { tasks }
    }

    pub fn task(&self, kind: TaskKind) -> &ScheduledTask {
        &self.tasks[kind.index()]
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Fire `kind` if it is enabled, applies in `phase` and its interval has
    /// elapsed; firing records `now`
    ///
    /// A `last_fired_at` in the future means the clock moved backwards; the
    /// task is re-anchored to `now` and does not fire.
    pub fn take_due(&mut self, kind: TaskKind, now: DateTime<Utc>, phase: Phase) -> bool {
        let task = &mut self.tasks[kind.index()];
        if !task.enabled || !kind.applies_in(phase) {
            return false;
        }
        if task.last_fired_at.is_some_and(|last| last > now) {
            task.last_fired_at = Some(now);
            return false;
        }
        if task.interval_elapsed(now) {
            task.last_fired_at = Some(now);
            return true;
        }
        false
    }

    pub fn mark_fired(&mut self, kind: TaskKind, now: DateTime<Utc>) {
        self.tasks[kind.index()].last_fired_at = Some(now);
    }

    pub fn disable_all(&mut self) {
        for task in &mut self.tasks {
            task.enabled = false;
        }
    }
}

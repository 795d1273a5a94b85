//! Device identity validation
//!
//! The supervisor only needs a verdict ([`CertificateStatus`]); how the
//! verdict is reached sits behind [`CertificateValidator`]. [`X509Validator`]
//! parses the PEM material with `pem` and `x509-parser` and checks validity
//! windows against the supplied clock, so a device whose clock is wrong sees
//! its identity as invalid until the clock is corrected.

use crate::config::IdentitySection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use x509_parser::prelude::*;

const SECONDS_PER_DAY: i64 = 86_400;

const PRIVATE_KEY_TAGS: [&str; 4] = [
    "PRIVATE KEY",
    "RSA PRIVATE KEY",
    "EC PRIVATE KEY",
    "ENCRYPTED PRIVATE KEY",
];

/// Why an identity was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum CertificateError {
    #[error("{which} is malformed: {detail}")]
    Malformed { which: &'static str, detail: String },
    #[error("{which} expired at {not_after}")]
    Expired {
        which: &'static str,
        not_after: DateTime<Utc>,
    },
    #[error("{which} not valid before {not_before}")]
    NotYetValid {
        which: &'static str,
        not_before: DateTime<Utc>,
    },
    #[error("private key missing or not a private key")]
    MissingKey,
}

/// Verdict on the device identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateStatus {
    Valid,
    /// Device certificate expires within the warning window
    ExpiringSoon { days: i64 },
    Invalid { reason: CertificateError },
}

impl CertificateStatus {
    /// Whether a session may be opened with this identity
    pub fn is_usable(&self) -> bool {
        !matches!(self, CertificateStatus::Invalid { .. })
    }
}

pub trait CertificateValidator: Send + Sync {
    fn validate(&self, identity: &IdentitySection, now: DateTime<Utc>) -> CertificateStatus;
}

/// Validity window of one parsed certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub not_before: i64,
    pub not_after: i64,
    pub common_name: String,
}

impl CertificateInfo {
    pub fn from_pem(pem_text: &str, which: &'static str) -> Result<Self, CertificateError> {
        let block = parse_pem_block(pem_text, which)?;
        if block.tag() != "CERTIFICATE" {
            return Err(CertificateError::Malformed {
                which,
                detail: format!("expected CERTIFICATE block, found {}", block.tag()),
            });
        }

        let (_, cert) =
            X509Certificate::from_der(block.contents()).map_err(|e| CertificateError::Malformed {
                which,
                detail: format!("failed to parse certificate: {e}"),
            })?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
        })
    }

    /// Check the window against `now`
    pub fn check_window(&self, which: &'static str, now: DateTime<Utc>) -> Result<(), CertificateError> {
        let now_secs = now.timestamp();
        if now_secs < self.not_before {
            return Err(CertificateError::NotYetValid {
                which,
                not_before: to_datetime(self.not_before),
            });
        }
        if now_secs > self.not_after {
            return Err(CertificateError::Expired {
                which,
                not_after: to_datetime(self.not_after),
            });
        }
        Ok(())
    }

    /// Whole days until expiry
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now.timestamp()) / SECONDS_PER_DAY
    }
}

fn to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_pem_block(pem_text: &str, which: &'static str) -> Result<::pem::Pem, CertificateError> {
    if !pem_text.contains("-----BEGIN") {
        return Err(CertificateError::Malformed {
            which,
            detail: "no PEM block found (placeholder content?)".to_string(),
        });
    }
    ::pem::parse(pem_text.as_bytes()).map_err(|e| CertificateError::Malformed {
        which,
        detail: e.to_string(),
    })
}

fn check_private_key(pem_text: &str) -> Result<(), CertificateError> {
    let block = parse_pem_block(pem_text, "private key").map_err(|_| CertificateError::MissingKey)?;
    if !PRIVATE_KEY_TAGS.contains(&block.tag()) || block.contents().is_empty() {
        return Err(CertificateError::MissingKey);
    }
    Ok(())
}

/// x509 validator for the CA, device certificate and private key
#[derive(Debug, Clone)]
pub struct X509Validator {
    expiry_warning_days: i64,
}

impl X509Validator {
    pub fn new(expiry_warning_days: u32) -> Self {
        Self {
            expiry_warning_days: i64::from(expiry_warning_days),
        }
    }

    fn check(&self, identity: &IdentitySection, now: DateTime<Utc>) -> Result<i64, CertificateError> {
        let ca = CertificateInfo::from_pem(&identity.ca_cert, "CA certificate")?;
        ca.check_window("CA certificate", now)?;

        let device = CertificateInfo::from_pem(&identity.device_cert, "device certificate")?;
        device.check_window("device certificate", now)?;

        check_private_key(&identity.private_key)?;

        Ok(device.days_remaining(now))
    }
}

impl CertificateValidator for X509Validator {
    fn validate(&self, identity: &IdentitySection, now: DateTime<Utc>) -> CertificateStatus {
        match self.check(identity, now) {
            Ok(days) if days < self.expiry_warning_days => CertificateStatus::ExpiringSoon { days },
            Ok(_) => CertificateStatus::Valid,
            Err(reason) => CertificateStatus::Invalid { reason },
        }
    }
}

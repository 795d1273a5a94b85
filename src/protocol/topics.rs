//! Topic layout under the configured prefix
//!
//! Three topics are published: `{prefix}/data`, `{prefix}/heartbeat` and
//! `{prefix}/status`. The prefix comes from configuration verbatim apart
//! from canonicalization (duplicate and trailing slashes removed).

use thiserror::Error;

pub const DATA_SUFFIX: &str = "data";
pub const HEARTBEAT_SUFFIX: &str = "heartbeat";
pub const STATUS_SUFFIX: &str = "status";

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic prefix cannot be empty")]
    EmptyPrefix,
    #[error("Topic prefix contains wildcard character: '{0}'")]
    Wildcard(char),
}

/// Collapse repeated slashes and drop trailing ones
pub fn canonicalize_prefix(prefix: &str) -> String {
    let mut result = prefix.to_string();
    while result.contains("//") {
        result = result.replace("//", "/");
    }
    while result.len() > 1 && result.ends_with('/') {
        result.pop();
    }
    result
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub data: String,
    pub heartbeat: String,
    pub status: String,
}

impl TopicSet {
    pub fn from_prefix(prefix: &str) -> Result<Self, TopicError> {
        if let Some(ch) = prefix.chars().find(|c| *c == '+' || *c == '#') {
            return Err(TopicError::Wildcard(ch));
        }
        let prefix = canonicalize_prefix(prefix);
        if prefix.is_empty() || prefix == "/" {
            return Err(TopicError::EmptyPrefix);
        }

        Ok(Self {
            data: format!("{prefix}/{DATA_SUFFIX}"),
            heartbeat: format!("{prefix}/{HEARTBEAT_SUFFIX}"),
            status: format!("{prefix}/{STATUS_SUFFIX}"),
        })
    }
}

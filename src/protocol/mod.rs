//! Topic layout and supervisor-owned payloads

pub mod messages;
pub mod topics;

pub use messages::Heartbeat;
pub use topics::{canonicalize_prefix, TopicError, TopicSet};

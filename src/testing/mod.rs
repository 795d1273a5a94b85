//! Testing utilities and mock implementations
//!
//! Lets the supervisor run end to end without a broker, DNS or real
//! certificate material.

pub mod mocks;

pub use mocks::*;

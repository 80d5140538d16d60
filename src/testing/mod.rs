//! Testing utilities and mock implementations
//!
//! Mocks for the broker connector, configuration providers and status sinks
//! so the connection manager can be tested without a broker.

pub mod mocks;

pub use mocks::*;

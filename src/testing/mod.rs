//! Testing utilities and mock implementations
//!
//! Mock broker collaborators for exercising the console session without an
//! MQTT broker.

pub mod mocks;

pub use mocks::*;

//! Observability: structured logging setup and span macros

pub mod logging;

pub use logging::{build_filter, init_logging, level_from_verbosity, LogFormat};

// Span macros for structured logging
pub use logging::{item_span, lifecycle_span, mqtt_span};

//! Observability for the relay: tracing initialization and the HTTP health
//! endpoint.

#![forbid(unsafe_code)]

/// HTTP health server.
pub mod http;
/// Global tracing subscriber setup.
pub mod init;

pub use http::{run_health_server, HealthSnapshot, HealthSource};
pub use init::init_tracing;

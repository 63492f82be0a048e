/*!
Logging

Standardized `tracing` setup for the Media Server Control stack: an
env-filter driven subscriber plus a small helper for attaching structured
context (client id, transaction id, dialog id, conference id) to log lines.
*/

pub mod setup;
pub mod context;

pub use setup::{setup_logging, LoggingConfig};
pub use context::LogContext; 
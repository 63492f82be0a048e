//! The Control Framework (CFW) protocol engine: transport listener, Client
//! sessions (with TLS fingerprinting and keepalive), the wire
//! parser/serializer, and the transaction manager with its
//! extended-transaction and ACK-tracking state machine.
//!
//! - `wire`: §4.3, the CFW grammar.
//! - `transport`: §4.1, accept-and-match-by-address.
//! - `session`: §4.2, Client session + TLS + keepalive.
//! - `transaction`: §3, §4.4, the per-tid state machine.
//! - `dispatch`: wires a parsed [`wire::Frame`] to the right transaction
//!   action (§4.4 "Request handling") — the seam between the wire layer
//!   and `mediactrl-packages`.

pub mod dispatch;
pub mod error;
pub mod session;
pub mod transaction;
pub mod transport;
pub mod wire;

pub use error::{Error, Result};

//! Ambient stack shared by every `mediactrl-*` crate: error types, logging
//! setup, configuration loading and a small in-process event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};

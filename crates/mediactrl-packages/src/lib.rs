//! Control Package trait contract, package registry and Endpoint adapter.
//!
//! This crate is the seam between the CFW transaction layer
//! (`mediactrl-cfw`) and the two package implementations
//! (`mediactrl-mixer`, `mediactrl-ivr`): neither package depends on the
//! wire protocol directly, and the CFW layer never depends on a specific
//! package, only on [`package::ControlPackage`] and [`registry::PackageRegistry`].

pub mod endpoint;
pub mod error;
pub mod inprocess;
pub mod package;
pub mod registry;

pub use error::{Error, Result};

//! The Mixer control package (§3, §4.7, §4.9): conference/connection join
//! graph, the 20 ms mixing tick and the `msc-mixer+xml` wire format.

pub mod conference;
pub mod error;
pub mod graph;
pub mod package;
pub mod xml;

pub use package::MixerPackage;

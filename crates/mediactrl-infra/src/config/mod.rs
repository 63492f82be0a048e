/*!
Configuration

A thin, typed layer over the `config` crate: load a TOML file, merge
environment-variable overrides, and hand back a strongly typed struct.
Grounded on `infra-common::config::loader::ConfigLoader`.
*/

pub mod loader;

pub use loader::ConfigLoader;

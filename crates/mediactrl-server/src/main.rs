//! Process entry point: loads `mediactrl.toml` (or `MEDIACTRL__`-prefixed
//! environment overrides), installs the `tracing` subscriber, builds the
//! [`mediactrl_server::MediaServer`] and runs it until a shutdown signal
//! arrives.

use std::path::PathBuf;

use anyhow::Result;

use mediactrl_infra::config::ConfigLoader;
use mediactrl_infra::logging::setup_logging;
use mediactrl_server::{MediaServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let base_dir = std::env::var("MEDIACTRL_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let loader = ConfigLoader::new(&base_dir, "MEDIACTRL");

    let config: ServerConfig = loader
        .load_from_file("mediactrl.toml")
        .unwrap_or_else(|_| ServerConfig::default());

    setup_logging(&config.logging);

    let mut server = MediaServer::new(config).await?;
    server.run().await
}

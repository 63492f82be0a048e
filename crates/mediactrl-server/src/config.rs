//! Server configuration (§6 "Configuration"): a typed `ServerConfig`
//! loaded through `mediactrl_infra::config::ConfigLoader` (TOML file plus
//! `MEDIACTRL__`-prefixed environment overrides).
//!
//! The original config surface is an XML file the SIP collaborator's
//! config loader parses (out of scope, §1 Non-goals); this struct covers
//! the same key set with the teacher's own config stack (`config` +
//! `serde` + TOML) rather than that XML format.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use mediactrl_infra::logging::LoggingConfig;

/// `cfw.*` keys (§6): listener address/port, the strict/lenient keepalive
/// switch, and the TLS certificate/key pair used when any provisioned
/// Client is `Transport::Tls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfwConfig {
    pub address: String,
    pub port: u16,
    /// `false` (lenient) only ever used for debugging in the original
    /// (§9 Design notes); production default is strict.
    #[serde(default = "default_force_kalive")]
    pub force_kalive: bool,
    pub certificate: Option<PathBuf>,
    pub privatekey: Option<PathBuf>,
}

fn default_force_kalive() -> bool {
    true
}

impl Default for CfwConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 2427,
            force_kalive: true,
            certificate: None,
            privatekey: None,
        }
    }
}

/// `sip.restrict` (§6): a dotted-quad allowlist with `0` octets acting as
/// wildcards. The SIP collaborator that would enforce this is out of
/// scope; this struct only carries the configured value through.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SipConfig {
    pub restrict: Option<String>,
}

/// Per-package directories (§6: "Per-package: `webserver.address`,
/// `webserver.port`, `webserver.local`, `prompts`, `recordings`, `tmp`").
/// `webserver` describes the external HTTP collaborator that serves
/// prompts/accepts recording uploads (out of scope, §1) — its
/// address/port/local-vs-remote flag are carried through for whichever
/// package needs to build URIs against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebServerConfig {
    pub address: String,
    pub port: u16,
    pub local: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            local: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Directory dynamically loaded packages would be read from (§6
    /// `packages.path`). This build registers the Mixer and IVR packages
    /// in-process rather than dynamically loading shared objects from
    /// here, but the directory is still a recognized config key.
    pub path: PathBuf,
    pub webserver: WebServerConfig,
    pub prompts: PathBuf,
    pub recordings: PathBuf,
    pub tmp: PathBuf,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/usr/local/lib/mediactrl/packages"),
            webserver: WebServerConfig::default(),
            prompts: PathBuf::from("/var/lib/mediactrl/prompts"),
            recordings: PathBuf::from("/var/lib/mediactrl/recordings"),
            tmp: PathBuf::from("/tmp/mediactrl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub cfw: CfwConfig,
    #[serde(default)]
    pub sip: SipConfig,
    #[serde(default)]
    pub packages: PackagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

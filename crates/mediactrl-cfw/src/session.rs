//! The Client (AS session): one cooperative task per provisioned peer,
//! owning the socket read loop, TLS handshake/fingerprint check and the
//! keepalive countdown (§4.2).
//!
//! Grounded on `sip-transport`'s declared TLS stack (`tokio-rustls`/
//! `rustls`/`rustls-pemfile`, kept from the teacher's own `Cargo.toml`
//! even though that crate's source wasn't retrieved into the pack) and
//! `rtp-core`'s `sha1` dependency for the fingerprint digest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::wire::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls,
}

/// A Client as provisioned ahead of the TCP accept (§3, §4.1): identity
/// and expectations are known before any socket exists.
#[derive(Debug, Clone)]
pub struct ClientProvision {
    pub cfw_id: String,
    pub call_id: String,
    pub peer_addr: SocketAddr,
    pub transport: Transport,
    pub expected_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveMode {
    Strict,
    Lenient,
}

struct ClientState {
    authenticated: bool,
    negotiated_packages: Vec<String>,
    keepalive_seconds: u64,
    last_keepalive: Instant,
    socket_attached: bool,
}

/// A live Client session. Cheap to clone; the expensive state lives behind
/// the inner `RwLock`/channel.
#[derive(Clone)]
pub struct Client {
    pub cfw_id: String,
    pub call_id: String,
    pub peer_addr: SocketAddr,
    pub transport: Transport,
    expected_fingerprint: Option<String>,
    state: Arc<RwLock<ClientState>>,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl Client {
    pub fn new(provision: ClientProvision, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            cfw_id: provision.cfw_id,
            call_id: provision.call_id,
            peer_addr: provision.peer_addr,
            transport: provision.transport,
            expected_fingerprint: provision.expected_fingerprint,
            state: Arc::new(RwLock::new(ClientState {
                authenticated: false,
                negotiated_packages: Vec::new(),
                keepalive_seconds: 0,
                last_keepalive: Instant::now(),
                socket_attached: false,
            })),
            outbound,
        }
    }

    pub fn matches_peer(&self, addr: &SocketAddr) -> bool {
        &self.peer_addr == addr
    }

    pub async fn mark_socket_attached(&self) {
        self.state.write().await.socket_attached = true;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.authenticated
    }

    /// Verifies a peer certificate's SHA-1 fingerprint against the value
    /// conveyed in SDP. Mismatch is fatal to the session (§4.2).
    pub fn check_fingerprint(&self, peer_cert_der: &[u8]) -> Result<()> {
        let Some(expected) = &self.expected_fingerprint else {
            return Ok(());
        };
        let mut hasher = Sha1::new();
        hasher.update(peer_cert_der);
        let digest = hasher.finalize();
        let actual = digest
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(Error::FingerprintMismatch {
                expected: expected.clone(),
                actual,
            })
        }
    }

    /// Authenticates the session on a valid SYNC, recording the negotiated
    /// keepalive and package set.
    pub async fn authenticate(&self, keepalive_seconds: u64, packages: Vec<String>) {
        let mut state = self.state.write().await;
        state.authenticated = true;
        state.keepalive_seconds = keepalive_seconds;
        state.negotiated_packages = packages;
        state.last_keepalive = Instant::now();
    }

    pub async fn negotiated_packages(&self) -> Vec<String> {
        self.state.read().await.negotiated_packages.clone()
    }

    /// Resets the keepalive countdown; called on every received K-ALIVE or
    /// substantive request (§4.2).
    pub async fn touch_keepalive(&self) {
        self.state.write().await.last_keepalive = Instant::now();
    }

    /// Seconds remaining before this session's keepalive expires, or
    /// `None` if not yet authenticated (no countdown running).
    pub async fn keepalive_remaining(&self) -> Option<Duration> {
        let state = self.state.read().await;
        if !state.authenticated {
            return None;
        }
        let elapsed = state.last_keepalive.elapsed();
        let budget = Duration::from_secs(state.keepalive_seconds);
        Some(budget.saturating_sub(elapsed))
    }

    pub fn send(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| Error::Other("client outbound channel closed".into()))
    }
}

/// What the transport listener does when a Client's keepalive expires
/// (§4.2): strict mode ends the SIP dialog; lenient mode just resets and
/// logs.
pub async fn handle_keepalive_expiry(client: &Client, mode: KeepaliveMode) -> bool {
    match mode {
        KeepaliveMode::Strict => {
            tracing::warn!(cfw_id = %client.cfw_id, "keepalive expired, ending dialog");
            true
        }
        KeepaliveMode::Lenient => {
            tracing::info!(cfw_id = %client.cfw_id, "keepalive expired, resetting (lenient mode)");
            client.touch_keepalive().await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        let (tx, _rx) = mpsc::unbounded_channel();
        Client::new(
            ClientProvision {
                cfw_id: "d9".into(),
                call_id: "call-1".into(),
                peer_addr: "127.0.0.1:5060".parse().unwrap(),
                transport: Transport::Plain,
                expected_fingerprint: None,
            },
            tx,
        )
    }

    #[tokio::test]
    async fn unauthenticated_client_has_no_keepalive_countdown() {
        let client = test_client();
        assert_eq!(client.keepalive_remaining().await, None);
    }

    #[tokio::test]
    async fn authenticating_records_keepalive_and_packages() {
        let client = test_client();
        client
            .authenticate(30, vec!["msc-ivr/1.0".to_string()])
            .await;
        assert!(client.is_authenticated().await);
        assert_eq!(client.negotiated_packages().await, vec!["msc-ivr/1.0"]);
        assert!(client.keepalive_remaining().await.unwrap() <= Duration::from_secs(30));
    }

    #[test]
    fn fingerprint_none_expected_always_matches() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Client::new(
            ClientProvision {
                cfw_id: "d9".into(),
                call_id: "call-1".into(),
                peer_addr: "127.0.0.1:5060".parse().unwrap(),
                transport: Transport::Plain,
                expected_fingerprint: None,
            },
            tx,
        );
        assert!(client.check_fingerprint(b"irrelevant").is_ok());
    }

    #[test]
    fn fingerprint_mismatch_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Client::new(
            ClientProvision {
                cfw_id: "d9".into(),
                call_id: "call-1".into(),
                peer_addr: "127.0.0.1:5060".parse().unwrap(),
                transport: Transport::Tls,
                expected_fingerprint: Some("00:11:22".into()),
            },
            tx,
        );
        assert!(client.check_fingerprint(b"some certificate bytes").is_err());
    }
}

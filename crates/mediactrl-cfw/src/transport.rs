//! The transport listener (§4.1): binds a port, and on accept compares the
//! peer address against the set of provisioned Clients. Single-purpose —
//! it must never block on per-client I/O, only on `accept()`.
//!
//! Grounded on `CfwStack`'s accept-and-match-by-address behavior; the
//! accept-loop-then-spawn-per-connection shape follows `call-engine`'s
//! server loop (`tokio::net::TcpListener` + `tokio::spawn` per accepted
//! socket).

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::session::{Client, ClientProvision};
use crate::wire::Frame;

/// Clients provisioned ahead of their TCP accept, by the SIP collaborator
/// that owns dialog negotiation. The listener only ever matches against
/// this set; it never creates Clients itself.
#[derive(Default)]
pub struct ClientTable {
    by_peer_addr: DashMap<SocketAddr, Client>,
    by_cfw_id: DashMap<String, Client>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provision(&self, provision: ClientProvision, outbound: mpsc::UnboundedSender<Frame>) -> Client {
        let client = Client::new(provision, outbound);
        self.by_peer_addr.insert(client.peer_addr, client.clone());
        self.by_cfw_id.insert(client.cfw_id.clone(), client.clone());
        client
    }

    pub fn remove(&self, cfw_id: &str) {
        if let Some((_, client)) = self.by_cfw_id.remove(cfw_id) {
            self.by_peer_addr.remove(&client.peer_addr);
        }
    }

    pub fn match_peer(&self, addr: &SocketAddr) -> Option<Client> {
        self.by_peer_addr.get(addr).map(|entry| entry.value().clone())
    }

    pub fn get(&self, cfw_id: &str) -> Option<Client> {
        self.by_cfw_id.get(cfw_id).map(|entry| entry.value().clone())
    }
}

/// Optional IP-range allowlist; peers outside it are rejected even if a
/// Client's `(ip, port)` happens to match (§4.1).
pub struct Listener {
    bind_addr: SocketAddr,
    clients: Arc<ClientTable>,
}

impl Listener {
    pub fn new(bind_addr: SocketAddr, clients: Arc<ClientTable>) -> Self {
        Self { bind_addr, clients }
    }

    /// Runs the accept loop. `on_accept` is handed the matched `Client`
    /// and the raw socket, and is responsible for spawning the session
    /// task (TLS handshake if needed, then the read loop) — the listener
    /// itself must not block on per-connection I/O.
    pub async fn serve<F>(&self, mut on_accept: F) -> Result<()>
    where
        F: FnMut(Client, TcpStream),
    {
        let listener = TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "CFW transport listening");
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            match self.clients.match_peer(&peer_addr) {
                Some(client) => {
                    client.mark_socket_attached().await;
                    on_accept(client, socket);
                }
                None => {
                    tracing::warn!(%peer_addr, "no provisioned client for this peer, closing");
                    drop(socket);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Transport;

    #[test]
    fn provisioning_a_client_makes_it_matchable_by_peer_address() {
        let table = ClientTable::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        table.provision(
            ClientProvision {
                cfw_id: "d9".into(),
                call_id: "call-1".into(),
                peer_addr: addr,
                transport: Transport::Plain,
                expected_fingerprint: None,
            },
            tx,
        );
        assert!(table.match_peer(&addr).is_some());
        assert!(table.get("d9").is_some());
    }

    #[test]
    fn unprovisioned_peer_does_not_match() {
        let table = ClientTable::new();
        let addr: SocketAddr = "127.0.0.1:6001".parse().unwrap();
        assert!(table.match_peer(&addr).is_none());
    }

    #[test]
    fn removing_a_client_clears_both_indices() {
        let table = ClientTable::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:6002".parse().unwrap();
        table.provision(
            ClientProvision {
                cfw_id: "d10".into(),
                call_id: "call-2".into(),
                peer_addr: addr,
                transport: Transport::Plain,
                expected_fingerprint: None,
            },
            tx,
        );
        table.remove("d10");
        assert!(table.get("d10").is_none());
        assert!(table.match_peer(&addr).is_none());
    }
}

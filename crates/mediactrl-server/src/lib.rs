//! Process entry point: loads configuration, registers the Mixer and IVR
//! control packages against an in-process Endpoint adapter, and runs the
//! CFW transport listener until stopped.
//!
//! Mirrors `call-engine::server::CallCenterServer`'s shape (a struct
//! holding the wired-up core plus optional background task handles, with
//! `new`/`start`/`stop`/`run` lifecycle methods) retargeted from a SIP
//! call center to a CFW protocol engine.

pub mod config;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mediactrl_cfw::dispatch::{self, CfwPackageCallback};
use mediactrl_cfw::session::{Client, ClientProvision, KeepaliveMode, Transport};
use mediactrl_cfw::transaction::TransactionTable;
use mediactrl_cfw::transport::{ClientTable, Listener};
use mediactrl_cfw::wire::Frame;
use mediactrl_ivr::IvrPackage;
use mediactrl_mixer::package::MixerPackage;
use mediactrl_packages::inprocess::InProcessEndpointAdapter;
use mediactrl_packages::package::ControlPackage;
use mediactrl_packages::registry::PackageRegistry;

pub use config::ServerConfig;

/// A session the SIP collaborator (out of scope, §1) has provisioned
/// ahead of its TCP accept, plus the outbound-frame receiver `start`'s
/// accept loop hands to the connection driver once that socket arrives.
struct Pending {
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// The wired-up CFW server: transport listener, package registry,
/// per-client transaction tables, and (if configured) a TLS acceptor.
pub struct MediaServer {
    config: ServerConfig,
    registry: Arc<PackageRegistry>,
    clients: Arc<ClientTable>,
    clients_by_id: Arc<DashMap<String, Client>>,
    transactions: Arc<DashMap<String, Arc<TransactionTable>>>,
    pending: Arc<DashMap<String, Pending>>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    keepalive_mode: KeepaliveMode,
    listen_handle: Option<JoinHandle<()>>,
}

impl MediaServer {
    /// Builds the server: registers the Mixer and IVR packages against a
    /// shared [`InProcessEndpointAdapter`] and a [`CfwPackageCallback`]
    /// wired to this server's client/transaction tables, and loads the
    /// TLS acceptor if `cfw.certificate`/`cfw.privatekey` are set.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let clients_by_id: Arc<DashMap<String, Client>> = Arc::new(DashMap::new());
        let transactions: Arc<DashMap<String, Arc<TransactionTable>>> = Arc::new(DashMap::new());

        let registry = Arc::new(PackageRegistry::new());
        let endpoint = Arc::new(InProcessEndpointAdapter::new());
        let callback = Arc::new(CfwPackageCallback::new(
            clients_by_id.clone(),
            transactions.clone(),
        ));

        let mixer = Arc::new(MixerPackage::new());
        mixer
            .setup(endpoint.clone(), callback.clone())
            .await
            .context("setting up msc-mixer package")?;
        registry
            .register(mixer)
            .context("registering msc-mixer package")?;

        let ivr = Arc::new(IvrPackage::new());
        ivr.setup(endpoint.clone(), callback.clone())
            .await
            .context("setting up msc-ivr package")?;
        registry
            .register(ivr)
            .context("registering msc-ivr package")?;

        let tls_acceptor = match (&config.cfw.certificate, &config.cfw.privatekey) {
            (Some(cert), Some(key)) => Some(tls::build_acceptor(cert, key)?),
            _ => None,
        };

        let keepalive_mode = if config.cfw.force_kalive {
            KeepaliveMode::Strict
        } else {
            KeepaliveMode::Lenient
        };

        Ok(Self {
            config,
            registry,
            clients: Arc::new(ClientTable::new()),
            clients_by_id,
            transactions,
            pending: Arc::new(DashMap::new()),
            tls_acceptor,
            keepalive_mode,
            listen_handle: None,
        })
    }

    pub fn registry(&self) -> &Arc<PackageRegistry> {
        &self.registry
    }

    /// Provisions a Client ahead of its TCP accept (§4.1), as the SIP
    /// collaborator would on dialog establishment. Returns the `Client`
    /// handle; the matching socket is picked up by the accept loop
    /// started in [`MediaServer::start`].
    pub fn provision_client(&self, provision: ClientProvision) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.clients.provision(provision, tx);
        self.clients_by_id.insert(client.cfw_id.clone(), client.clone());
        self.transactions
            .insert(client.cfw_id.clone(), Arc::new(TransactionTable::new()));
        self.pending.insert(client.cfw_id.clone(), Pending { rx });
        client
    }

    /// Starts the accept loop on `cfw.address`:`cfw.port`, spawning one
    /// connection-driving task per accepted socket (§4.2).
    pub async fn start(&mut self) -> Result<()> {
        let bind_addr: SocketAddr = format!("{}:{}", self.config.cfw.address, self.config.cfw.port)
            .parse()
            .context("parsing cfw.address/cfw.port")?;

        let listener = Listener::new(bind_addr, self.clients.clone());
        let clients = self.clients.clone();
        let pending = self.pending.clone();
        let transactions = self.transactions.clone();
        let registry = self.registry.clone();
        let tls_acceptor = self.tls_acceptor.clone();
        let keepalive_mode = self.keepalive_mode;

        let handle = tokio::spawn(async move {
            let result = listener
                .serve(move |client, socket| {
                    let Some((_, Pending { rx })) = pending.remove(&client.cfw_id) else {
                        tracing::warn!(cfw_id = %client.cfw_id, "accepted socket with no pending outbound channel");
                        return;
                    };
                    let Some(txns) = transactions.get(&client.cfw_id).map(|e| e.value().clone()) else {
                        tracing::warn!(cfw_id = %client.cfw_id, "accepted socket with no transaction table");
                        return;
                    };

                    let clients = clients.clone();
                    let registry = registry.clone();
                    let tls_acceptor = tls_acceptor.clone();

                    tokio::spawn(async move {
                        drive_connection(client, socket, rx, clients, txns, registry, tls_acceptor, keepalive_mode).await;
                    });
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "CFW transport listener exited");
            }
        });

        self.listen_handle = Some(handle);
        tracing::info!(addr = %bind_addr, "media server started");
        Ok(())
    }

    /// Stops the accept loop. In-flight connections are left to finish on
    /// their own (each runs in its own detached task).
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.listen_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        tracing::info!("media server stopped");
        Ok(())
    }

    /// Starts the server and blocks until a ctrl-c / SIGTERM arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        self.stop().await
    }
}

/// Drives one accepted socket: performs the TLS handshake and fingerprint
/// check if this Client is `Transport::Tls`, then hands off to
/// [`dispatch::run_connection`].
async fn drive_connection(
    client: Client,
    socket: TcpStream,
    rx: mpsc::UnboundedReceiver<Frame>,
    clients: Arc<ClientTable>,
    txns: Arc<TransactionTable>,
    registry: Arc<PackageRegistry>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    keepalive_mode: KeepaliveMode,
) {
    match client.transport {
        Transport::Plain => {
            dispatch::run_connection(socket, client, rx, clients, txns, registry, keepalive_mode).await;
        }
        Transport::Tls => {
            let Some(acceptor) = tls_acceptor else {
                tracing::warn!(cfw_id = %client.cfw_id, "TLS client but no certificate/privatekey configured");
                return;
            };
            let tls_stream = match acceptor.accept(socket).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(cfw_id = %client.cfw_id, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let peer_cert = tls_stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first().cloned());
            if let Some(cert) = peer_cert {
                if let Err(e) = client.check_fingerprint(cert.as_ref()) {
                    tracing::warn!(cfw_id = %client.cfw_id, error = %e, "peer certificate fingerprint mismatch");
                    return;
                }
            }

            dispatch::run_connection(tls_stream, client, rx, clients, txns, registry, keepalive_mode).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_server_registers_mixer_and_ivr_packages() {
        let server = MediaServer::new(ServerConfig::default()).await.unwrap();
        assert_eq!(server.registry().supported_list(), "msc-ivr/1.0,msc-mixer/1.0");
    }

    #[tokio::test]
    async fn provisioning_a_client_makes_it_available_for_later_accept() {
        let server = MediaServer::new(ServerConfig::default()).await.unwrap();
        let client = server.provision_client(ClientProvision {
            cfw_id: "d9".into(),
            call_id: "call-1".into(),
            peer_addr: "127.0.0.1:7000".parse().unwrap(),
            transport: Transport::Plain,
            expected_fingerprint: None,
        });
        assert_eq!(client.cfw_id, "d9");
        assert!(server.clients.get("d9").is_some());
        assert!(server.pending.contains_key("d9"));
        assert!(server.transactions.contains_key("d9"));
    }
}

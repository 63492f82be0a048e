//! Wires a parsed wire [`Frame`] to the right transaction action (§4.4
//! "Request handling") and implements [`mediactrl_packages::package::PackageCallback`]
//! on top of the [`Client`]/[`Transaction`] types this crate owns, so a
//! Control Package can emit responses, extended-transaction REPORTs and
//! asynchronous CONTROL callbacks without depending on `mediactrl-cfw`.
//!
//! Grounded on `CfwStack.cxx`'s request-routing switch (`SYNC`/`K-ALIVE`/
//! `CONTROL`/`REPORT` handling, §4.4) and `ControlPackageCallback`'s
//! `report`/`control` methods.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use mediactrl_packages::package::PackageCallback;
use mediactrl_packages::registry::PackageRegistry;

use crate::session::{Client, KeepaliveMode};
use crate::transaction::{Direction, Transaction, TransactionTable, EXTENDED_TICK};
use crate::transport::ClientTable;
use crate::wire::{status, Frame, FrameKind, FrameReader, Method};

/// Result of dispatching a single inbound [`Frame`] (§4.4).
pub enum Outcome {
    /// Send this frame back immediately (a final response, or a bodyless
    /// ack like the K-ALIVE 200).
    Respond(Frame),
    /// The request was accepted for asynchronous handling (a CONTROL
    /// dispatched to a package); no immediate response is due — the
    /// eventual response arrives through [`PackageCallback::report`].
    Pending,
    /// The Client must be torn down (SYNC mismatch, §9 Open Question:
    /// "implemented literally as written" — any SYNC mismatch ends the
    /// dialog).
    TerminateClient(Frame),
}

/// SYNC (§4.4, §6): body-less, mandatory `Dialog-ID`/`Keep-Alive`/
/// `Packages`, matched against the loaded package set.
pub async fn handle_sync(client: &Client, frame: &Frame, registry: &PackageRegistry) -> Outcome {
    let Some(dialog_id) = frame.header("Dialog-ID") else {
        return Outcome::TerminateClient(
            Frame::response(frame.tid.clone(), status::BAD_REQUEST, "missing Dialog-ID"),
        );
    };
    let Some(keepalive_str) = frame.header("Keep-Alive") else {
        return Outcome::TerminateClient(
            Frame::response(frame.tid.clone(), status::BAD_REQUEST, "missing Keep-Alive"),
        );
    };
    let Ok(keepalive_seconds) = keepalive_str.parse::<u64>() else {
        return Outcome::TerminateClient(
            Frame::response(frame.tid.clone(), status::BAD_REQUEST, "invalid Keep-Alive"),
        );
    };
    let Some(packages_str) = frame.header("Packages") else {
        return Outcome::TerminateClient(
            Frame::response(frame.tid.clone(), status::BAD_REQUEST, "missing Packages"),
        );
    };

    let requested: Vec<&str> = packages_str.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    let mut unsupported = Vec::new();
    for entry in &requested {
        let name = entry.split('/').next().unwrap_or(*entry);
        if !registry.is_supported(name) {
            unsupported.push(*entry);
        }
    }

    if !unsupported.is_empty() {
        tracing::warn!(cfw_id = %client.cfw_id, ?unsupported, "SYNC Packages mismatch");
        return Outcome::TerminateClient(
            Frame::response(frame.tid.clone(), status::UNSUPPORTED_SYNC, "unsupported package")
                .with_header("Supported", registry.supported_list()),
        );
    }

    client
        .authenticate(keepalive_seconds, requested.iter().map(|s| s.to_string()).collect())
        .await;

    tracing::info!(cfw_id = %client.cfw_id, %dialog_id, keepalive_seconds, "client authenticated");

    Outcome::Respond(
        Frame::response(frame.tid.clone(), status::OK, "")
            .with_header("Keep-Alive", keepalive_seconds.to_string())
            .with_header("Packages", requested.join(","))
            .with_header("Supported", registry.supported_list()),
    )
}

/// K-ALIVE (§4.4, §6): body-less, no extra headers allowed.
pub async fn handle_kalive(client: &Client, frame: &Frame) -> Outcome {
    if !frame.headers.is_empty() {
        return Outcome::Respond(Frame::response(frame.tid.clone(), status::BAD_REQUEST, "unexpected headers"));
    }
    client.touch_keepalive().await;
    Outcome::Respond(Frame::response(frame.tid.clone(), status::OK, ""))
}

/// CONTROL (§4.4, §6): validates the package and Content-Type, starts the
/// extended-transaction timer *before* dispatching to the package (it may
/// run long), and hands the body off. The caller is expected to have
/// already confirmed `client.is_authenticated()`.
pub async fn handle_control(
    client: &Client,
    txns: &TransactionTable,
    registry: &PackageRegistry,
    frame: Frame,
) -> Outcome {
    let Some(pkg_header) = frame.header("Control-Package") else {
        return Outcome::Respond(Frame::response(frame.tid.clone(), status::UNKNOWN_PACKAGE, "missing Control-Package"));
    };
    let pkg_name = pkg_header.split('/').next().unwrap_or(pkg_header).to_string();

    let package = match registry.get(&pkg_name) {
        Ok(p) => p,
        Err(_) => {
            return Outcome::Respond(Frame::response(frame.tid.clone(), status::UNKNOWN_PACKAGE, "unknown package"));
        }
    };

    if let Some(content_type) = frame.header("Content-Type") {
        if content_type != package.mime_type() {
            return Outcome::Respond(Frame::response(
                frame.tid.clone(),
                status::UNKNOWN_PACKAGE,
                "Content-Type does not match package",
            ));
        }
    }

    let txn = match txns.create(&frame.tid, Direction::AsToMs) {
        Ok(txn) => txn,
        Err(()) => {
            return Outcome::Respond(Frame::response(frame.tid.clone(), status::DUPLICATE_TID, "duplicate tid"));
        }
    };
    {
        let mut guard = txn.lock().await;
        // Queues the eventual response as the transaction's one pending
        // outbound message, moving `New -> AwaitingAck` so the extended-
        // transaction ticker (§4.4) actually fires while the package runs.
        guard.enqueue(Frame::response(frame.tid.clone(), status::OK, ""), true);
        guard.start_extended_timer(Instant::now());
    }
    tokio::spawn(run_extended_ticker(client.clone(), txn.clone()));

    let body = frame.body.clone().unwrap_or_default();
    let requester = client.cfw_id.clone();
    let tid = frame.tid.clone();
    tokio::spawn(async move {
        if let Err(e) = package.control(&requester, &tid, &body).await {
            tracing::warn!(%tid, error = %e, "package control dispatch failed");
        }
    });

    Outcome::Pending
}

/// A `200` response (or a `REPORT`) from the AS acking an MS-initiated
/// transaction (§4.4 "ACK tracking").
pub async fn handle_ack_or_report(txns: &TransactionTable, frame: &Frame) -> Outcome {
    match &frame.kind {
        FrameKind::Response { code, .. } if *code == status::OK => {
            if let Some(txn) = txns.get(&frame.tid) {
                let seq: Option<u64> = frame.header("Seq").and_then(|s| s.parse().ok());
                let mut guard = txn.lock().await;
                if let Some(seq) = seq {
                    guard.ack(seq);
                }
                if guard.state() == crate::transaction::TxnState::Completed {
                    guard.terminate();
                    drop(guard);
                    txns.remove(&frame.tid);
                }
            }
            Outcome::Pending
        }
        FrameKind::Request(Method::Report) => Outcome::Pending,
        _ => Outcome::Pending,
    }
}

/// Drives the extended-transaction timer for one transaction (§4.4): ticks
/// every [`EXTENDED_TICK`] until the transaction leaves the awaiting/
/// extended states, emitting a `202` then periodic `REPORT Status:
/// update`s. Spawned once, right after [`handle_control`] starts the
/// timer; exits on its own once [`PackageCallback::report`] marks the
/// transaction terminated.
pub async fn run_extended_ticker(client: Client, txn: Arc<tokio::sync::Mutex<Transaction>>) {
    loop {
        tokio::time::sleep(EXTENDED_TICK).await;
        let mut guard = txn.lock().await;
        if guard.is_terminated() || guard.state() == crate::transaction::TxnState::Completed {
            return;
        }
        if guard.extended_tick_due(Instant::now()) {
            let frame = guard.emit_extended_tick(Instant::now());
            drop(guard);
            if client.send(frame).is_err() {
                return;
            }
        }
    }
}

/// Ties [`Client`]s and their [`TransactionTable`]s together so a Control
/// Package's [`PackageCallback::report`]/`control` calls land on the
/// right wire connection. One instance is shared by every package
/// registered on a server.
pub struct CfwPackageCallback {
    clients: Arc<DashMap<String, Client>>,
    transactions: Arc<DashMap<String, Arc<TransactionTable>>>,
}

impl CfwPackageCallback {
    pub fn new(
        clients: Arc<DashMap<String, Client>>,
        transactions: Arc<DashMap<String, Arc<TransactionTable>>>,
    ) -> Self {
        Self { clients, transactions }
    }
}

#[async_trait]
impl PackageCallback for CfwPackageCallback {
    async fn report(
        &self,
        requester: &str,
        tid: &str,
        status_code: u16,
        timeout: Option<Duration>,
        content_type: &str,
        body: Option<Vec<u8>>,
    ) {
        let Some(client) = self.clients.get(requester).map(|e| e.value().clone()) else {
            tracing::warn!(requester, "report for unknown client");
            return;
        };
        let Some(txn_table) = self.transactions.get(requester).map(|e| e.value().clone()) else {
            return;
        };
        let Some(txn) = txn_table.get(tid) else {
            tracing::warn!(requester, tid, "report for unknown transaction");
            return;
        };

        let mut guard = txn.lock().await;
        let started_extended = guard.state() != crate::transaction::TxnState::New;

        let frame = if started_extended {
            let frame = guard.emit_terminal_report(
                body.as_ref().map(|_| content_type),
                body.map(Bytes::from),
            );
            guard.terminate();
            frame
        } else {
            let mut f = Frame::response(tid, status_code, "");
            if let Some(timeout) = timeout {
                f = f.with_header("Timeout", timeout.as_secs().to_string());
            }
            if let Some(body) = body {
                f = f.with_body(content_type, Bytes::from(body));
            }
            f
        };
        drop(guard);

        if client.send(frame).is_err() {
            tracing::warn!(requester, tid, "failed to send report, client gone");
        }
        if status_code != status::ACCEPTED {
            txn_table.remove(tid);
        }
    }

    async fn control(&self, client_id: &str, body: Vec<u8>) {
        let Some(client) = self.clients.get(client_id).map(|e| e.value().clone()) else {
            tracing::warn!(client_id, "control callback for unknown client");
            return;
        };
        let Some(txn_table) = self.transactions.get(client_id).map(|e| e.value().clone()) else {
            return;
        };
        let tid = uuid::Uuid::new_v4().simple().to_string();
        if txn_table.create(&tid, Direction::MsToAs).is_err() {
            return;
        }
        let frame = Frame::request(tid, Method::Control).with_body("application/octet-stream", Bytes::from(body));
        let _ = client.send(frame);
    }
}

/// The set of packages a SYNC negotiated, used to gate later CONTROLs to
/// only the agreed-upon package set (beyond what the registry alone
/// would allow).
pub fn negotiated_package_names(negotiated: &[String]) -> HashSet<String> {
    negotiated
        .iter()
        .map(|entry| entry.split('/').next().unwrap_or(entry).to_string())
        .collect()
}

/// Drives one accepted connection end to end (§4.2, §4.4): reads frames
/// off `socket` through a [`FrameReader`], routes each to the right
/// handler above, writes the handler's response (or a queued async
/// callback frame from [`CfwPackageCallback`]) back out, and tears the
/// Client down — removing it from `clients` and every transaction it
/// still owns — on socket loss or a SYNC mismatch.
///
/// Generic over the stream type so the same loop drives both a plain
/// `TcpStream` and a `tokio_rustls` TLS stream; the caller performs the
/// handshake (and `Client::check_fingerprint` call) before invoking this.
pub async fn run_connection<S>(
    socket: S,
    client: Client,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    clients: Arc<ClientTable>,
    txns: Arc<TransactionTable>,
    registry: Arc<PackageRegistry>,
    keepalive_mode: KeepaliveMode,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(socket);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let bytes = frame.serialize();
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let keepalive_client = client.clone();
    let keepalive_shutdown = shutdown.clone();
    let keepalive = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let Some(remaining) = keepalive_client.keepalive_remaining().await else {
                continue;
            };
            if remaining == Duration::ZERO
                && handle_keepalive_expiry_then_terminate(&keepalive_client, keepalive_mode).await
            {
                keepalive_shutdown.notify_one();
                return;
            }
        }
    });

    let mut reader = FrameReader::new();
    let mut buf = [0u8; 4096];

    'read_loop: loop {
        let n = tokio::select! {
            result = read_half.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(cfw_id = %client.cfw_id, error = %e, "socket read error");
                    break;
                }
            },
            _ = shutdown.notified() => {
                tracing::info!(cfw_id = %client.cfw_id, "keepalive expired, tearing down session");
                break;
            }
        };
        reader.feed(&buf[..n]);

        loop {
            let frame = match reader.try_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(cfw_id = %client.cfw_id, error = %e, "malformed frame, closing connection");
                    break 'read_loop;
                }
            };

            let outcome = route_frame(&client, &frame, &txns, &registry).await;
            match outcome {
                Outcome::Respond(resp) => {
                    let _ = client.send(resp);
                }
                Outcome::Pending => {}
                Outcome::TerminateClient(resp) => {
                    let _ = client.send(resp);
                    break 'read_loop;
                }
            }
        }
    }

    writer.abort();
    keepalive.abort();
    for tid in txns.tids() {
        if let Some(txn) = txns.get(&tid) {
            txn.lock().await.terminate();
        }
    }
    clients.remove(&client.cfw_id);
    tracing::info!(cfw_id = %client.cfw_id, "client session ended");
}

/// Routes one inbound [`Frame`] to the handler appropriate for its method
/// (§4.4), gating CONTROL/K-ALIVE on the session already being
/// authenticated the same way the original `CfwStack` rejects out-of-order
/// requests.
async fn route_frame(
    client: &Client,
    frame: &Frame,
    txns: &TransactionTable,
    registry: &PackageRegistry,
) -> Outcome {
    match &frame.kind {
        FrameKind::Request(Method::Sync) => handle_sync(client, frame, registry).await,
        FrameKind::Request(Method::KAlive) => {
            if !client.is_authenticated().await {
                return Outcome::TerminateClient(Frame::response(
                    frame.tid.clone(),
                    status::UNAUTHORIZED,
                    "not authenticated",
                ));
            }
            handle_kalive(client, frame).await
        }
        FrameKind::Request(Method::Control) => {
            if !client.is_authenticated().await {
                return Outcome::Respond(Frame::response(
                    frame.tid.clone(),
                    status::UNAUTHORIZED,
                    "not authenticated",
                ));
            }
            let negotiated = negotiated_package_names(&client.negotiated_packages().await);
            if let Some(pkg_header) = frame.header("Control-Package") {
                let pkg_name = pkg_header.split('/').next().unwrap_or(pkg_header);
                if !negotiated.contains(pkg_name) {
                    return Outcome::Respond(Frame::response(
                        frame.tid.clone(),
                        status::UNKNOWN_PACKAGE,
                        "package not negotiated for this session",
                    ));
                }
            }
            client.touch_keepalive().await;
            handle_control(client, txns, registry, frame.clone()).await
        }
        FrameKind::Request(Method::Report) | FrameKind::Response { .. } => {
            handle_ack_or_report(txns, frame).await
        }
        FrameKind::UnknownMethod(_) => {
            // tid parsed fine, so this is scoped to the one transaction
            // (§4.3) rather than a reason to tear down the connection.
            Outcome::Respond(Frame::response(
                frame.tid.clone(),
                status::METHOD_NOT_ALLOWED,
                "unknown method",
            ))
        }
    }
}

/// `true` if the caller's read loop should end the session (strict mode
/// expiry).
async fn handle_keepalive_expiry_then_terminate(client: &Client, mode: KeepaliveMode) -> bool {
    crate::session::handle_keepalive_expiry(client, mode).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_client() -> Client {
        let (tx, _rx) = mpsc::unbounded_channel();
        Client::new(
            crate::session::ClientProvision {
                cfw_id: "d9".into(),
                call_id: "call-1".into(),
                peer_addr: "127.0.0.1:5060".parse().unwrap(),
                transport: crate::session::Transport::Plain,
                expected_fingerprint: None,
            },
            tx,
        )
    }

    #[tokio::test]
    async fn sync_with_only_known_packages_authenticates() {
        let client = test_client();
        let registry = PackageRegistry::new();
        // No packages registered: requesting none should still succeed.
        let frame = Frame::request("t1", Method::Sync)
            .with_header("Dialog-ID", "d9")
            .with_header("Keep-Alive", "30")
            .with_header("Packages", "");
        match handle_sync(&client, &frame, &registry).await {
            Outcome::Respond(resp) => {
                assert!(matches!(resp.kind, FrameKind::Response { code, .. } if code == status::OK));
            }
            _ => panic!("expected Respond"),
        }
        assert!(client.is_authenticated().await);
    }

    #[tokio::test]
    async fn sync_with_unknown_package_terminates_client() {
        let client = test_client();
        let registry = PackageRegistry::new();
        let frame = Frame::request("t1", Method::Sync)
            .with_header("Dialog-ID", "d9")
            .with_header("Keep-Alive", "30")
            .with_header("Packages", "msc-ivr/1.0");
        match handle_sync(&client, &frame, &registry).await {
            Outcome::TerminateClient(resp) => {
                assert!(matches!(resp.kind, FrameKind::Response { code, .. } if code == status::UNSUPPORTED_SYNC));
                assert!(resp.header("Supported").is_some());
            }
            _ => panic!("expected TerminateClient"),
        }
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn kalive_with_extra_headers_is_bad_request() {
        let client = test_client();
        let frame = Frame::request("t1", Method::KAlive).with_header("X-Bogus", "1");
        match handle_kalive(&client, &frame).await {
            Outcome::Respond(resp) => {
                assert!(matches!(resp.kind, FrameKind::Response { code, .. } if code == status::BAD_REQUEST));
            }
            _ => panic!("expected Respond"),
        }
    }

    #[tokio::test]
    async fn unknown_method_gets_transaction_scoped_405_not_disconnect() {
        let client = test_client();
        let txns = TransactionTable::new();
        let registry = PackageRegistry::new();
        let frame = crate::wire::parse_frame("CFW t1 BOGUS\r\n\r\n", None).unwrap();
        match route_frame(&client, &frame, &txns, &registry).await {
            Outcome::Respond(resp) => {
                assert!(matches!(resp.kind, FrameKind::Response { code, .. } if code == status::METHOD_NOT_ALLOWED));
                assert_eq!(resp.tid, "t1");
            }
            Outcome::Pending => panic!("expected Respond, got Pending"),
            Outcome::TerminateClient(_) => panic!("expected Respond, got TerminateClient"),
        }
    }
}

//! The mixer node graph (§3 "Mixer Node", §4.9).
//!
//! Grounded on `packages/MixerPackage.cxx`'s `MixerNode`/`MixerConnection`/
//! `MixerConference` hierarchy (per-edge direction/gain/mute, "no implicit
//! mixing" invariant on `Connection` nodes) and the §9 design-flag
//! "Mutable graph with peer back-references": edges live in a central
//! `{(node_id, peer_id) -> EdgeState}` map rather than raw cross-pointers,
//! keyed by node id strings (this stack's stable identifier), making
//! detach-on-close race-free and avoiding self-referential structures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use mediactrl_media::types::{AudioFrame, EndpointId, MediaDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Connection,
    Conference,
}

/// Per-edge state, symmetric on both endpoints (§3 "Mixer Node").
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub direction: MediaDirection,
    pub gain_percent: u16,
    pub muted: bool,
}

impl Edge {
    pub fn unity() -> Self {
        Self {
            direction: MediaDirection::SendRecv,
            gain_percent: 100,
            muted: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AttachError {
    /// A `Connection` node already has an inbound edge (§4.9, §8 invariant).
    NoImplicitMixing,
    /// The edge already exists (§4.7 `join`, code 408).
    AlreadyJoined,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DetachError {
    NotJoined,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ModifyError {
    /// The edge does not exist yet (§4.7 `modifyjoin`, code 409).
    NotJoined,
    /// The modified direction would give a `Connection` node a second
    /// inbound edge (§4.9, §8 invariant — checked "at any instant", not
    /// just at attach time).
    NoImplicitMixing,
}

struct NodeInner {
    edges: HashMap<String, Edge>,
    inbound_count: AtomicUsize,
    outbound_count: AtomicUsize,
    frame_queue: VecDeque<AudioFrame>,
}

/// One participant of the mixer graph: a `Connection` (wraps one audio
/// endpoint) or a `Conference` (a many-leg mix point). §3 "Mixer Node".
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub endpoint: EndpointId,
    /// The Client that created this node — only it may join/modify/unjoin
    /// it (§3, §4.7 "Authorization").
    pub owner_client: String,
    inner: Mutex<NodeInner>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, endpoint: EndpointId, owner_client: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            endpoint,
            owner_client: owner_client.into(),
            inner: Mutex::new(NodeInner {
                edges: HashMap::new(),
                inbound_count: AtomicUsize::new(0),
                outbound_count: AtomicUsize::new(0),
                frame_queue: VecDeque::new(),
            }),
        }
    }

    pub fn checks_out_to(&self, client_id: &str) -> bool {
        self.owner_client == client_id
    }

    pub async fn edge_to(&self, peer_id: &str) -> Option<Edge> {
        self.inner.lock().await.edges.get(peer_id).copied()
    }

    pub async fn peers(&self) -> Vec<(String, Edge)> {
        self.inner
            .lock()
            .await
            .edges
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// `attach(peer, dir, vol)` (§4.9): applied to *this* node's side of a
    /// new edge toward `peer_id`.
    pub async fn attach(&self, peer_id: &str, edge: Edge) -> Result<(), AttachError> {
        let mut inner = self.inner.lock().await;
        if inner.edges.contains_key(peer_id) {
            return Err(AttachError::AlreadyJoined);
        }
        if self.kind == NodeKind::Connection
            && matches!(edge.direction, MediaDirection::SendRecv | MediaDirection::RecvOnly)
            && inner.inbound_count.load(Ordering::SeqCst) > 0
        {
            return Err(AttachError::NoImplicitMixing);
        }
        if edge.direction.includes_recv() {
            inner.inbound_count.fetch_add(1, Ordering::SeqCst);
        }
        if edge.direction.includes_send() {
            inner.outbound_count.fetch_add(1, Ordering::SeqCst);
        }
        inner.edges.insert(peer_id.to_string(), edge);
        Ok(())
    }

    /// `modify(peer, dir, vol)` (§4.9): the edge must already exist;
    /// in/outbound counts are adjusted atomically under the same lock so
    /// the invariant holds at every observation point. Rejects the same
    /// "no implicit mixing" case `attach` does: growing *this* edge's
    /// direction to include `recv` while some *other* edge already holds
    /// the node's one allowed inbound slot.
    pub async fn modify(&self, peer_id: &str, edge: Edge) -> Result<(), ModifyError> {
        let mut inner = self.inner.lock().await;
        let Some(existing) = inner.edges.get(peer_id).copied() else {
            return Err(ModifyError::NotJoined);
        };
        if self.kind == NodeKind::Connection && edge.direction.includes_recv() {
            let other_inbound = inner.inbound_count.load(Ordering::SeqCst) - usize::from(existing.direction.includes_recv());
            if other_inbound > 0 {
                return Err(ModifyError::NoImplicitMixing);
            }
        }
        if existing.direction.includes_recv() {
            inner.inbound_count.fetch_sub(1, Ordering::SeqCst);
        }
        if existing.direction.includes_send() {
            inner.outbound_count.fetch_sub(1, Ordering::SeqCst);
        }
        if edge.direction.includes_recv() {
            inner.inbound_count.fetch_add(1, Ordering::SeqCst);
        }
        if edge.direction.includes_send() {
            inner.outbound_count.fetch_add(1, Ordering::SeqCst);
        }
        inner.edges.insert(peer_id.to_string(), edge);
        Ok(())
    }

    /// `detach(peer)` (§4.9): removes the edge on this side, decrements
    /// counts, and purges this node's pending-frame queue contribution
    /// from `peer` (the queue itself is per-node, so this just clears it
    /// if it was the sole producer — callers purge per-peer queues at the
    /// conference level; see `conference.rs`).
    pub async fn detach(&self, peer_id: &str) -> Result<(), DetachError> {
        let mut inner = self.inner.lock().await;
        let Some(edge) = inner.edges.remove(peer_id) else {
            return Err(DetachError::NotJoined);
        };
        if edge.direction.includes_recv() {
            inner.inbound_count.fetch_sub(1, Ordering::SeqCst);
        }
        if edge.direction.includes_send() {
            inner.outbound_count.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    pub async fn has_edges(&self) -> bool {
        !self.inner.lock().await.edges.is_empty()
    }

    /// Push one decoded inbound frame into this node's queue (producer:
    /// the Endpoint adapter's `incoming_frame` callback).
    pub async fn push_frame(&self, frame: AudioFrame) {
        let mut inner = self.inner.lock().await;
        inner.frame_queue.push_back(frame);
        // Bound the queue so a stalled consumer can't leak memory; the
        // mixing tick only ever pulls at most one frame per tick anyway.
        while inner.frame_queue.len() > 50 {
            inner.frame_queue.pop_front();
        }
    }

    /// Pull at most one already-decoded frame (§4.7 mixing loop step 1).
    pub async fn pop_frame(&self) -> Option<AudioFrame> {
        self.inner.lock().await.frame_queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node::new(id, kind, EndpointId::new(id), "client-1")
    }

    #[tokio::test]
    async fn connection_rejects_second_inbound_edge() {
        let conn = node("A", NodeKind::Connection);
        conn.attach("X", Edge::unity()).await.unwrap();
        let err = conn.attach("Y", Edge::unity()).await.unwrap_err();
        assert_eq!(err, AttachError::NoImplicitMixing);
    }

    #[tokio::test]
    async fn connection_allows_second_sendonly_edge() {
        let conn = node("A", NodeKind::Connection);
        conn.attach(
            "X",
            Edge {
                direction: MediaDirection::SendOnly,
                gain_percent: 100,
                muted: false,
            },
        )
        .await
        .unwrap();
        conn.attach(
            "Y",
            Edge {
                direction: MediaDirection::SendOnly,
                gain_percent: 100,
                muted: false,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn conference_allows_many_inbound_edges() {
        let conf = node("C", NodeKind::Conference);
        for peer in ["A", "B", "D"] {
            conf.attach(peer, Edge::unity()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn duplicate_attach_is_rejected() {
        let conf = node("C", NodeKind::Conference);
        conf.attach("A", Edge::unity()).await.unwrap();
        assert_eq!(conf.attach("A", Edge::unity()).await.unwrap_err(), AttachError::AlreadyJoined);
    }

    #[tokio::test]
    async fn detach_then_attach_restores_pre_state() {
        let conn = node("A", NodeKind::Connection);
        conn.attach("X", Edge::unity()).await.unwrap();
        conn.detach("X").await.unwrap();
        assert!(!conn.has_edges().await);
        conn.attach("X", Edge::unity()).await.unwrap();
    }

    #[tokio::test]
    async fn detaching_unknown_peer_fails() {
        let conn = node("A", NodeKind::Connection);
        assert_eq!(conn.detach("nobody").await.unwrap_err(), DetachError::NotJoined);
    }

    #[tokio::test]
    async fn modify_swaps_direction_without_violating_invariant() {
        let conn = node("A", NodeKind::Connection);
        conn.attach(
            "X",
            Edge {
                direction: MediaDirection::SendOnly,
                gain_percent: 100,
                muted: false,
            },
        )
        .await
        .unwrap();
        conn.modify(
            "X",
            Edge {
                direction: MediaDirection::SendRecv,
                gain_percent: 50,
                muted: false,
            },
        )
        .await
        .unwrap();
        let edge = conn.edge_to("X").await.unwrap();
        assert_eq!(edge.gain_percent, 50);
    }

    #[tokio::test]
    async fn modify_rejects_second_inbound_edge_created_after_attach() {
        let conn = node("A", NodeKind::Connection);
        conn.attach(
            "X",
            Edge {
                direction: MediaDirection::SendOnly,
                gain_percent: 100,
                muted: false,
            },
        )
        .await
        .unwrap();
        conn.attach(
            "Y",
            Edge {
                direction: MediaDirection::RecvOnly,
                gain_percent: 100,
                muted: false,
            },
        )
        .await
        .unwrap();

        let err = conn
            .modify(
                "X",
                Edge {
                    direction: MediaDirection::SendRecv,
                    gain_percent: 100,
                    muted: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, ModifyError::NoImplicitMixing);
    }
}

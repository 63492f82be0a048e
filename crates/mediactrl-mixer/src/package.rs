//! The Mixer [`ControlPackage`] implementation (§4.7): XML dispatch,
//! node-graph operations and per-conference mixing-tick lifecycle.
//!
//! Grounded on `MixerPackage::control`/`handleControl` (dispatch shape)
//! and `MixerPackage::endConference`/`notifyUnjoin`/`notifyConferenceExit`
//! (event emission on destroy/unjoin).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use mediactrl_media::dtmf::DtmfDigit;
use mediactrl_media::types::{AudioFrame, EndpointId, MediaDirection};
use mediactrl_packages::endpoint::EndpointAdapter;
use mediactrl_packages::package::{ControlPackage, PackageCallback};
use mediactrl_packages::{Error, Result};

use crate::conference::ConferenceTicker;
use crate::error as mixer_error;
use crate::graph::{AttachError, Edge, ModifyError, Node, NodeKind};
use crate::xml::{self, MixerRequest, StreamSpec};

const MIME_TYPE: &str = "application/msc-mixer+xml";

enum Outcome {
    Body { status: u16, extra: Vec<(String, String)> },
    Forbidden,
}

pub struct MixerPackage {
    nodes: Arc<DashMap<String, Arc<Node>>>,
    conferences: DashMap<String, Arc<ConferenceTicker>>,
    endpoint: OnceCell<Arc<dyn EndpointAdapter>>,
    callback: OnceCell<Arc<dyn PackageCallback>>,
}

impl Default for MixerPackage {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerPackage {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(DashMap::new()),
            conferences: DashMap::new(),
            endpoint: OnceCell::new(),
            callback: OnceCell::new(),
        }
    }

    fn endpoint(&self) -> Arc<dyn EndpointAdapter> {
        self.endpoint.get().expect("setup() not called").clone()
    }

    fn callback(&self) -> Arc<dyn PackageCallback> {
        self.callback.get().expect("setup() not called").clone()
    }

    /// Resolves `id` to a graph [`Node`], lazily wrapping a connection
    /// endpoint the first time it's referenced by a join. Conferences must
    /// already exist (created by `createconference`).
    async fn resolve_connection_node(&self, id: &str, owner_client: &str) -> std::result::Result<Arc<Node>, u16> {
        if let Some(node) = self.nodes.get(id) {
            return Ok(node.value().clone());
        }
        let endpoint_id = self
            .endpoint()
            .get_connection(id)
            .await
            .map_err(|_| mixer_error::CONNECTION_NOT_FOUND)?;
        let node = Arc::new(Node::new(id, NodeKind::Connection, endpoint_id, owner_client));
        self.nodes.insert(id.to_string(), node.clone());
        Ok(node)
    }

    fn gain_from_stream(stream: Option<&StreamSpec>) -> u16 {
        match stream {
            Some(s) => match s.muted {
                Some(true) => 0,
                _ => s.volume_percent.unwrap_or(100).clamp(0, 1000) as u16,
            },
            None => 100,
        }
    }

    fn direction_from_stream(stream: Option<&StreamSpec>) -> MediaDirection {
        stream.and_then(|s| s.direction).unwrap_or(MediaDirection::SendRecv)
    }

    async fn handle_create_conference(
        &self,
        id: Option<String>,
        requester: &str,
        reserved_talkers: u16,
        reserved_listeners: u16,
        audio_mixing: &xml::AudioMixing,
    ) -> Outcome {
        let _ = (reserved_talkers, reserved_listeners);
        if matches!(audio_mixing.kind, xml::AudioMixingKind::Controller) {
            // This stack implements n-best conference mixing only.
            return Outcome::Body {
                status: mixer_error::UNABLE_TO_CONFIGURE_AUDIO_MIX,
                extra: vec![],
            };
        }

        let conf_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.nodes.contains_key(&conf_id) {
            return Outcome::Body {
                status: mixer_error::CONFERENCE_ALREADY_EXISTS,
                extra: vec![("conferenceid".into(), conf_id)],
            };
        }

        let endpoint_id = match self.endpoint().create_conference(Some(conf_id.as_str())).await {
            Ok(id) => id,
            Err(_) => {
                return Outcome::Body {
                    status: mixer_error::CONFERENCE_RESERVATION_FAILED,
                    extra: vec![],
                }
            }
        };

        let node = Arc::new(Node::new(conf_id.as_str(), NodeKind::Conference, endpoint_id, requester));
        self.nodes.insert(conf_id.clone(), node.clone());

        let ticker = Arc::new(ConferenceTicker::new(conf_id.clone()));
        self.conferences.insert(conf_id.clone(), ticker.clone());

        let nodes = self.nodes.clone();
        let endpoint = self.endpoint();
        let callback = self.callback();
        let requester_owned = requester.to_string();
        tokio::spawn(ticker.clone().run(
            node,
            move |peer_id: &str| nodes.get(peer_id).map(|e| e.value().clone()),
            endpoint,
            callback,
            requester_owned,
        ));

        Outcome::Body {
            status: mixer_error::OK,
            extra: vec![("conferenceid".into(), conf_id)],
        }
    }

    async fn handle_modify_conference(&self, id: &str, requester: &str) -> Outcome {
        match self.nodes.get(id) {
            Some(node) if node.kind == NodeKind::Conference => {
                if !node.checks_out_to(requester) {
                    return Outcome::Forbidden;
                }
                Outcome::Body {
                    status: mixer_error::OK,
                    extra: vec![],
                }
            }
            _ => Outcome::Body {
                status: mixer_error::CONFERENCE_NOT_FOUND,
                extra: vec![],
            },
        }
    }

    async fn handle_destroy_conference(&self, id: &str, requester: &str) -> Outcome {
        let Some((_, node)) = self.nodes.remove(id) else {
            return Outcome::Body {
                status: mixer_error::CONFERENCE_NOT_FOUND,
                extra: vec![],
            };
        };
        if node.kind != NodeKind::Conference {
            self.nodes.insert(id.to_string(), node);
            return Outcome::Body {
                status: mixer_error::CONFERENCE_NOT_FOUND,
                extra: vec![],
            };
        }
        if !node.checks_out_to(requester) {
            self.nodes.insert(id.to_string(), node);
            return Outcome::Forbidden;
        }

        if let Some((_, ticker)) = self.conferences.remove(id) {
            ticker.request_stop();
        }
        let _ = self.endpoint().drop_connection(&node.endpoint).await;

        let body = xml::build_conference_exit_event(id, "conference destroyed");
        self.callback().control(requester, body).await;

        Outcome::Body {
            status: mixer_error::OK,
            extra: vec![],
        }
    }

    async fn handle_join(
        &self,
        id1: &str,
        id2: &str,
        streams: &[StreamSpec],
        requester: &str,
        modify: bool,
    ) -> Outcome {
        let node1 = match self.resolve_connection_node(id1, requester).await {
            Ok(n) => n,
            Err(status) => return Outcome::Body { status, extra: vec![] },
        };
        let node2 = match self.resolve_connection_node(id2, requester).await {
            Ok(n) => n,
            Err(status) => return Outcome::Body { status, extra: vec![] },
        };

        if !node1.checks_out_to(requester) || !node2.checks_out_to(requester) {
            return Outcome::Forbidden;
        }

        if node1.kind == NodeKind::Connection && node2.kind == NodeKind::Connection {
            return Outcome::Body {
                status: mixer_error::MIXING_CONNECTIONS_NOT_SUPPORTED,
                extra: vec![],
            };
        }

        let stream = streams.first();
        let direction = Self::direction_from_stream(stream);
        let gain = Self::gain_from_stream(stream);
        let muted = stream.and_then(|s| s.muted).unwrap_or(false);

        let edge_for_node2 = Edge {
            direction,
            gain_percent: gain,
            muted,
        };
        let edge_for_node1 = Edge {
            direction: reverse_direction(direction),
            gain_percent: gain,
            muted,
        };

        if modify {
            let a = node1.modify(id2, edge_for_node2).await;
            let b = node2.modify(id1, edge_for_node1).await;
            return match (a, b) {
                (Ok(()), Ok(())) => Outcome::Body {
                    status: mixer_error::OK,
                    extra: vec![],
                },
                (Err(ModifyError::NoImplicitMixing), _) | (_, Err(ModifyError::NoImplicitMixing)) => Outcome::Body {
                    status: mixer_error::UNABLE_TO_JOIN,
                    extra: vec![],
                },
                _ => Outcome::Body {
                    status: mixer_error::NOT_JOINED,
                    extra: vec![],
                },
            };
        }

        let a = node1.attach(id2, edge_for_node2).await;
        let b = match &a {
            Ok(()) => node2.attach(id1, edge_for_node1).await,
            Err(_) => Ok(()),
        };
        if a.is_ok() && b.is_err() {
            let _ = node1.detach(id2).await;
        }

        match (a, b) {
            (Ok(()), Ok(())) => Outcome::Body {
                status: mixer_error::OK,
                extra: vec![],
            },
            (Err(AttachError::AlreadyJoined), _) | (_, Err(AttachError::AlreadyJoined)) => Outcome::Body {
                status: mixer_error::ALREADY_JOINED,
                extra: vec![],
            },
            _ => Outcome::Body {
                status: mixer_error::UNABLE_TO_JOIN,
                extra: vec![],
            },
        }
    }

    async fn handle_unjoin(&self, id1: &str, id2: &str, requester: &str) -> Outcome {
        let (Some(node1), Some(node2)) = (self.nodes.get(id1).map(|e| e.value().clone()), self.nodes.get(id2).map(|e| e.value().clone())) else {
            return Outcome::Body {
                status: mixer_error::NOT_JOINED,
                extra: vec![],
            };
        };
        if !node1.checks_out_to(requester) || !node2.checks_out_to(requester) {
            return Outcome::Forbidden;
        }
        let a = node1.detach(id2).await;
        let b = node2.detach(id1).await;
        if a.is_err() && b.is_err() {
            return Outcome::Body {
                status: mixer_error::NOT_JOINED,
                extra: vec![],
            };
        }
        let body = xml::build_unjoin_notify_event(id1, id2, "unjoined");
        self.callback().control(requester, body).await;
        Outcome::Body {
            status: mixer_error::OK,
            extra: vec![],
        }
    }

    async fn handle_audit(&self, mixer: Option<&str>, requester: &str) -> Outcome {
        if let Some(id) = mixer {
            match self.nodes.get(id) {
                Some(node) if node.checks_out_to(requester) => Outcome::Body {
                    status: mixer_error::OK,
                    extra: vec![("conferenceid".into(), id.to_string())],
                },
                Some(_) => Outcome::Forbidden,
                None => Outcome::Body {
                    status: mixer_error::CONFERENCE_NOT_FOUND,
                    extra: vec![],
                },
            }
        } else {
            let count = self
                .nodes
                .iter()
                .filter(|e| e.value().checks_out_to(requester))
                .count();
            Outcome::Body {
                status: mixer_error::OK,
                extra: vec![("mixers".into(), count.to_string())],
            }
        }
    }
}

fn reverse_direction(dir: MediaDirection) -> MediaDirection {
    match dir {
        MediaDirection::SendOnly => MediaDirection::RecvOnly,
        MediaDirection::RecvOnly => MediaDirection::SendOnly,
        other => other,
    }
}

#[async_trait]
impl ControlPackage for MixerPackage {
    fn name(&self) -> &str {
        "msc-mixer"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str {
        "Conference mixing and connection join control package"
    }

    fn mime_type(&self) -> &str {
        MIME_TYPE
    }

    async fn setup(&self, endpoint: Arc<dyn EndpointAdapter>, callback: Arc<dyn PackageCallback>) -> Result<()> {
        self.endpoint
            .set(endpoint)
            .map_err(|_| Error::Other("mixer package already set up".into()))?;
        self.callback
            .set(callback)
            .map_err(|_| Error::Other("mixer package already set up".into()))?;
        Ok(())
    }

    async fn control(&self, requester: &str, tid: &str, body: &[u8]) -> Result<()> {
        let outcome = match xml::parse_request(body) {
            Err((status, reason)) => Outcome::Body {
                status,
                extra: vec![("detail".into(), reason)],
            },
            Ok(request) => match request {
                MixerRequest::CreateConference {
                    id,
                    reserved_talkers,
                    reserved_listeners,
                    audio_mixing,
                } => {
                    self.handle_create_conference(id, requester, reserved_talkers, reserved_listeners, &audio_mixing)
                        .await
                }
                MixerRequest::ModifyConference { id } => self.handle_modify_conference(&id, requester).await,
                MixerRequest::DestroyConference { id } => self.handle_destroy_conference(&id, requester).await,
                MixerRequest::Join { id1, id2, streams } => self.handle_join(&id1, &id2, &streams, requester, false).await,
                MixerRequest::ModifyJoin { id1, id2, streams } => self.handle_join(&id1, &id2, &streams, requester, true).await,
                MixerRequest::Unjoin { id1, id2 } => self.handle_unjoin(&id1, &id2, requester).await,
                MixerRequest::Audit { mixer } => self.handle_audit(mixer.as_deref(), requester).await,
            },
        };

        match outcome {
            Outcome::Forbidden => {
                self.callback().report(requester, tid, 403, None, MIME_TYPE, None).await;
            }
            Outcome::Body { status, extra } => {
                let extra_refs: Vec<(&str, &str)> = extra.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                let body = xml::build_response(status, &extra_refs);
                self.callback()
                    .report(requester, tid, 200, Some(Duration::from_secs(10)), MIME_TYPE, Some(body))
                    .await;
            }
        }
        Ok(())
    }

    async fn incoming_frame(&self, connection: EndpointId, sub_connection: Option<EndpointId>, frame: AudioFrame) {
        let _ = sub_connection;
        if let Some(node) = self.nodes.iter().find(|e| e.value().endpoint == connection) {
            node.value().push_frame(frame).await;
        }
    }

    async fn incoming_dtmf(&self, _connection: EndpointId, _sub_connection: Option<EndpointId>, _digit: DtmfDigit) {}

    async fn frame_sent(&self, _connection: EndpointId, _sub_connection: Option<EndpointId>, _frame: &AudioFrame) {}

    async fn connection_closing(&self, connection: EndpointId, _sub_connection: Option<EndpointId>) {
        if let Some(entry) = self.nodes.iter().find(|e| e.value().endpoint == connection) {
            let id = entry.key().clone();
            drop(entry);
            if let Some((_, node)) = self.nodes.remove(&id) {
                for (peer_id, _) in node.peers().await {
                    if let Some(peer) = self.nodes.get(&peer_id) {
                        let _ = peer.value().detach(&id).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediactrl_media::types::PayloadType;
    use mediactrl_packages::Result as PkgResult;

    struct FakeEndpoint;

    #[async_trait]
    impl EndpointAdapter for FakeEndpoint {
        async fn get_connection(&self, connection_id: &str) -> PkgResult<EndpointId> {
            Ok(EndpointId::new(connection_id))
        }
        async fn create_conference(&self, conference_id: Option<&str>) -> PkgResult<EndpointId> {
            Ok(EndpointId::new(conference_id.unwrap_or("conf").to_string()))
        }
        async fn drop_connection(&self, _endpoint: &EndpointId) -> PkgResult<()> {
            Ok(())
        }
        async fn send_frame(&self, _endpoint: &EndpointId, _frame: AudioFrame) -> PkgResult<()> {
            Ok(())
        }
        async fn clear_dtmf_buffer(&self, _endpoint: &EndpointId) -> PkgResult<()> {
            Ok(())
        }
        async fn next_dtmf_buffer(&self, _endpoint: &EndpointId) -> Option<DtmfDigit> {
            None
        }
        async fn get_sub_connection(&self, _endpoint: &EndpointId, _label: &str) -> PkgResult<Option<EndpointId>> {
            Ok(None)
        }
        fn decode(&self, _payload_type: PayloadType, _encoded: &[u8]) -> PkgResult<Vec<i16>> {
            Ok(vec![])
        }
        fn encode(&self, _payload_type: PayloadType, _pcm: &[i16]) -> PkgResult<Vec<u8>> {
            Ok(vec![])
        }
    }

    struct FakeCallback {
        reports: tokio::sync::Mutex<Vec<(String, u16, Option<Vec<u8>>)>>,
    }

    impl FakeCallback {
        fn new() -> Self {
            Self {
                reports: tokio::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PackageCallback for FakeCallback {
        async fn report(
            &self,
            _requester: &str,
            tid: &str,
            status: u16,
            _timeout: Option<Duration>,
            _content_type: &str,
            body: Option<Vec<u8>>,
        ) {
            self.reports.lock().await.push((tid.to_string(), status, body));
        }
        async fn control(&self, _client_id: &str, _body: Vec<u8>) {}
    }

    async fn setup_pkg() -> (Arc<MixerPackage>, Arc<FakeCallback>) {
        let pkg = Arc::new(MixerPackage::new());
        let callback = Arc::new(FakeCallback::new());
        pkg.setup(Arc::new(FakeEndpoint), callback.clone()).await.unwrap();
        (pkg, callback)
    }

    #[tokio::test]
    async fn create_conference_then_destroy_round_trips() {
        let (pkg, callback) = setup_pkg().await;
        let body = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><createconference conferenceid="conf1" audio-mixing-type="nbest"/></mscmixer>"#;
        pkg.control("client-1", "t1", body).await.unwrap();
        assert!(pkg.nodes.contains_key("conf1"));

        let destroy = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><destroyconference conferenceid="conf1"/></mscmixer>"#;
        pkg.control("client-1", "t2", destroy).await.unwrap();
        assert!(!pkg.nodes.contains_key("conf1"));
        assert!(!pkg.conferences.contains_key("conf1"));

        let reports = callback.reports.lock().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|(_, status, _)| *status == 200));
    }

    #[tokio::test]
    async fn destroy_unknown_conference_is_406() {
        let (pkg, callback) = setup_pkg().await;
        let body = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><destroyconference conferenceid="ghost"/></mscmixer>"#;
        pkg.control("client-1", "t1", body).await.unwrap();
        let reports = callback.reports.lock().await;
        let xml_body = reports[0].2.as_ref().unwrap();
        assert!(String::from_utf8_lossy(xml_body).contains("406"));
    }

    #[tokio::test]
    async fn joining_two_bare_connections_is_unsupported() {
        let (pkg, callback) = setup_pkg().await;
        let join_ab = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><join id1="A" id2="B"/></mscmixer>"#;
        pkg.control("client-1", "t1", join_ab).await.unwrap();

        let reports = callback.reports.lock().await;
        let body = reports[0].2.as_ref().unwrap();
        assert!(String::from_utf8_lossy(body).contains("426"));
    }

    #[tokio::test]
    async fn second_conference_cannot_also_receive_from_an_already_joined_connection() {
        let (pkg, callback) = setup_pkg().await;
        let create1 = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><createconference conferenceid="conf1" audio-mixing-type="nbest"/></mscmixer>"#;
        pkg.control("client-1", "t1", create1).await.unwrap();
        let create2 = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><createconference conferenceid="conf2" audio-mixing-type="nbest"/></mscmixer>"#;
        pkg.control("client-1", "t2", create2).await.unwrap();

        let join1 = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><join id1="A" id2="conf1"/></mscmixer>"#;
        pkg.control("client-1", "t3", join1).await.unwrap();
        let join2 = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><join id1="A" id2="conf2"/></mscmixer>"#;
        pkg.control("client-1", "t4", join2).await.unwrap();

        let reports = callback.reports.lock().await;
        let body = reports[3].2.as_ref().unwrap();
        assert!(String::from_utf8_lossy(body).contains("411"));
    }

    #[tokio::test]
    async fn unjoin_emits_notify_and_clears_edges() {
        let (pkg, callback) = setup_pkg().await;
        let create = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><createconference conferenceid="conf1" audio-mixing-type="nbest"/></mscmixer>"#;
        pkg.control("client-1", "t1", create).await.unwrap();
        let join = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><join id1="A" id2="conf1"/></mscmixer>"#;
        pkg.control("client-1", "t2", join).await.unwrap();
        let unjoin = br#"<mscmixer version="1.0" xmlns="urn:ietf:params:xml:ns:msc-mixer"><unjoin id1="A" id2="conf1"/></mscmixer>"#;
        pkg.control("client-1", "t3", unjoin).await.unwrap();

        let node_a = pkg.nodes.get("A").unwrap().value().clone();
        assert!(!node_a.has_edges().await);
        drop(callback);
    }
}

//! An in-process [`EndpointAdapter`] (§4.6): resolves AS-visible
//! connection/conference ids to [`EndpointId`]s, buffers DTMF per
//! endpoint, and does codec indirection through `mediactrl-media::codec`.
//!
//! The real RTP/media plane (and the SIP collaborator that provisions
//! connection ids ahead of a CFW request) are out of scope for this repo
//! (§1 Non-goals); this adapter is what `mediactrl-server` wires packages
//! against in their absence, and what package unit/integration tests run
//! against instead of a `Fake*` mock. `send_frame` records the frame on
//! the endpoint's outbound log rather than handing it to a transport —
//! there is no transport here to hand it to.
//!
//! Grounded on `ControlPackageCallback`'s connection/conference bookkeeping
//! (§4.6) and `call-engine/src/registry.rs`'s `DashMap`-backed id table
//! shape (also followed by `mediactrl-packages::registry::PackageRegistry`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use mediactrl_media::codec::codec_for_payload_type;
use mediactrl_media::dtmf::DtmfDigit;
use mediactrl_media::types::{AudioFrame, EndpointId, PayloadType};

use crate::endpoint::EndpointAdapter;
use crate::{Error, Result};

struct EndpointState {
    refcount: AtomicU32,
    dtmf: Mutex<VecDeque<DtmfDigit>>,
    sub_connections: DashMap<String, EndpointId>,
    sent: Mutex<Vec<AudioFrame>>,
}

impl EndpointState {
    fn new() -> Self {
        Self {
            refcount: AtomicU32::new(0),
            dtmf: Mutex::new(VecDeque::new()),
            sub_connections: DashMap::new(),
            sent: Mutex::new(Vec::new()),
        }
    }
}

/// In-process bookkeeping for endpoints, keyed by the AS-visible
/// connection/conference id string, backed by a real (narrowband) codec
/// indirection.
#[derive(Default)]
pub struct InProcessEndpointAdapter {
    by_connection_id: DashMap<String, EndpointId>,
    endpoints: DashMap<EndpointId, Arc<EndpointState>>,
}

impl InProcessEndpointAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, endpoint: &EndpointId) -> Result<Arc<EndpointState>> {
        self.endpoints
            .get(endpoint)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::EndpointNotFound(endpoint.to_string()))
    }

    /// Feeds a tone into `endpoint`'s buffer, as the (out of scope) RTP
    /// plane would on detecting an inbound telephone-event. Exposed for
    /// tests and for a future real transport to call.
    pub async fn push_dtmf(&self, endpoint: &EndpointId, digit: DtmfDigit) -> Result<()> {
        let state = self.state(endpoint)?;
        state.dtmf.lock().await.push_back(digit);
        Ok(())
    }

    /// Frames handed to [`EndpointAdapter::send_frame`] for `endpoint`,
    /// oldest first — the closest thing to an outbound transport this
    /// adapter has.
    pub async fn sent_frames(&self, endpoint: &EndpointId) -> Vec<AudioFrame> {
        match self.state(endpoint) {
            Ok(state) => state.sent.lock().await.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl EndpointAdapter for InProcessEndpointAdapter {
    async fn get_connection(&self, connection_id: &str) -> Result<EndpointId> {
        let endpoint = self
            .by_connection_id
            .entry(connection_id.to_string())
            .or_insert_with(|| EndpointId::new(connection_id.to_string()))
            .clone();
        let state = self
            .endpoints
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(EndpointState::new()))
            .clone();
        state.refcount.fetch_add(1, Ordering::SeqCst);
        Ok(endpoint)
    }

    async fn create_conference(&self, conference_id: Option<&str>) -> Result<EndpointId> {
        let endpoint = match conference_id {
            Some(id) => {
                let endpoint = EndpointId::new(id.to_string());
                if self.endpoints.contains_key(&endpoint) {
                    return Err(Error::ConferenceIdInUse(id.to_string()));
                }
                endpoint
            }
            None => EndpointId::generate(),
        };
        self.endpoints
            .insert(endpoint.clone(), Arc::new(EndpointState::new()));
        self.by_connection_id
            .insert(endpoint.as_str().to_string(), endpoint.clone());
        Ok(endpoint)
    }

    async fn drop_connection(&self, endpoint: &EndpointId) -> Result<()> {
        let state = self.state(endpoint)?;
        if state.refcount.fetch_sub(1, Ordering::SeqCst) <= 1 {
            self.endpoints.remove(endpoint);
            self.by_connection_id.retain(|_, v| v != endpoint);
        }
        Ok(())
    }

    async fn send_frame(&self, endpoint: &EndpointId, frame: AudioFrame) -> Result<()> {
        let state = self.state(endpoint)?;
        state.sent.lock().await.push(frame);
        Ok(())
    }

    async fn clear_dtmf_buffer(&self, endpoint: &EndpointId) -> Result<()> {
        let state = self.state(endpoint)?;
        state.dtmf.lock().await.clear();
        Ok(())
    }

    async fn next_dtmf_buffer(&self, endpoint: &EndpointId) -> Option<DtmfDigit> {
        let state = self.state(endpoint).ok()?;
        state.dtmf.lock().await.pop_front()
    }

    async fn get_sub_connection(
        &self,
        endpoint: &EndpointId,
        label: &str,
    ) -> Result<Option<EndpointId>> {
        let state = self.state(endpoint)?;
        Ok(state
            .sub_connections
            .get(label)
            .map(|entry| entry.value().clone()))
    }

    fn decode(&self, payload_type: PayloadType, encoded: &[u8]) -> Result<Vec<i16>> {
        Ok(codec_for_payload_type(payload_type)?.decode(encoded)?)
    }

    fn encode(&self, payload_type: PayloadType, pcm: &[i16]) -> Result<Vec<u8>> {
        Ok(codec_for_payload_type(payload_type)?.encode(pcm)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediactrl_media::types::payload_types;

    #[tokio::test]
    async fn get_connection_is_idempotent_per_id() {
        let adapter = InProcessEndpointAdapter::new();
        let a = adapter.get_connection("conn-1").await.unwrap();
        let b = adapter.get_connection("conn-1").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn drop_connection_removes_endpoint_once_refcount_hits_zero() {
        let adapter = InProcessEndpointAdapter::new();
        let endpoint = adapter.get_connection("conn-1").await.unwrap();
        adapter.drop_connection(&endpoint).await.unwrap();
        assert!(adapter.next_dtmf_buffer(&endpoint).await.is_none());
        assert!(matches!(
            adapter.state(&endpoint),
            Err(Error::EndpointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_conference_with_duplicate_id_fails() {
        let adapter = InProcessEndpointAdapter::new();
        adapter.create_conference(Some("conf-1")).await.unwrap();
        assert!(matches!(
            adapter.create_conference(Some("conf-1")).await,
            Err(Error::ConferenceIdInUse(_))
        ));
    }

    #[tokio::test]
    async fn dtmf_push_then_pop_is_fifo() {
        let adapter = InProcessEndpointAdapter::new();
        let endpoint = adapter.get_connection("conn-1").await.unwrap();
        adapter.push_dtmf(&endpoint, DtmfDigit::D1).await.unwrap();
        adapter.push_dtmf(&endpoint, DtmfDigit::D2).await.unwrap();
        assert_eq!(adapter.next_dtmf_buffer(&endpoint).await, Some(DtmfDigit::D1));
        assert_eq!(adapter.next_dtmf_buffer(&endpoint).await, Some(DtmfDigit::D2));
    }

    #[tokio::test]
    async fn send_frame_is_recorded_and_codec_roundtrips() {
        let adapter = InProcessEndpointAdapter::new();
        let endpoint = adapter.get_connection("conn-1").await.unwrap();
        adapter
            .send_frame(&endpoint, AudioFrame::silence())
            .await
            .unwrap();
        assert_eq!(adapter.sent_frames(&endpoint).await.len(), 1);

        let pcm = vec![0i16; 160];
        let encoded = adapter.encode(payload_types::PCMU, &pcm).unwrap();
        let decoded = adapter.decode(payload_types::PCMU, &encoded).unwrap();
        assert_eq!(decoded.len(), 160);
    }
}

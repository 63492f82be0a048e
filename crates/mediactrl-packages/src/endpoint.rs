//! The Endpoint adapter: the only way a Control Package touches the media
//! plane (§4.6). Implemented as a trait so `mediactrl-mixer` and
//! `mediactrl-ivr` depend only on this crate rather than on a concrete RTP
//! stack — the real transport is an external collaborator out of scope
//! for this repo.
//!
//! Grounded on `ControlPackageCallback`'s `getConnection`/
//! `createConference`/`dropConnection`/`sendFrame`/`incomingFrame`/
//! `clearDtmfBuffer`/`getNextDtmfBuffer`/`getSubConnection`/`decode`/
//! `encode` surface.

use async_trait::async_trait;

use mediactrl_media::dtmf::DtmfDigit;
use mediactrl_media::types::{AudioFrame, EndpointId, PayloadType};

use crate::Result;

#[async_trait]
pub trait EndpointAdapter: Send + Sync {
    /// Resolve (and increment the usage count of) the endpoint backing
    /// `connection_id`, as previously provisioned by the SIP collaborator.
    async fn get_connection(&self, connection_id: &str) -> Result<EndpointId>;

    /// Create a conference endpoint. `conference_id` must be globally
    /// unique; `None` asks the adapter to assign one.
    async fn create_conference(&self, conference_id: Option<&str>) -> Result<EndpointId>;

    /// Decrement the usage count of `endpoint`; the adapter tears it down
    /// once the count reaches zero.
    async fn drop_connection(&self, endpoint: &EndpointId) -> Result<()>;

    /// Deliver `frame` toward the peer on `endpoint` (audio only, per
    /// this stack's scope).
    async fn send_frame(&self, endpoint: &EndpointId, frame: AudioFrame) -> Result<()>;

    /// Discard any tones buffered while no collect/subscription was
    /// consuming them.
    async fn clear_dtmf_buffer(&self, endpoint: &EndpointId) -> Result<()>;

    /// Pop the next buffered tone for `endpoint`, if any.
    async fn next_dtmf_buffer(&self, endpoint: &EndpointId) -> Option<DtmfDigit>;

    /// Resolve a logical sub-leg of `endpoint` by label (e.g. a named
    /// `<stream label=…>` on a Mixer join).
    async fn get_sub_connection(
        &self,
        endpoint: &EndpointId,
        label: &str,
    ) -> Result<Option<EndpointId>>;

    /// Decode wire bytes for `payload_type` into linear PCM.
    fn decode(&self, payload_type: PayloadType, encoded: &[u8]) -> Result<Vec<i16>>;

    /// Encode linear PCM into wire bytes for `payload_type`.
    fn encode(&self, payload_type: PayloadType, pcm: &[i16]) -> Result<Vec<u8>>;
}

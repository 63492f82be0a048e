//! The Control Package trait contract: the interface `mediactrl-mixer` and
//! `mediactrl-ivr` implement, and that `mediactrl-cfw`'s transaction
//! manager dispatches CONTROL bodies and media-plane callbacks through.
//!
//! Grounded on the original `ControlPackage`/`ControlPackageCallback`
//! split: a package's CFW-facing methods mirror `ControlPackage`'s
//! `setup`/`control`/`incomingFrame`/`incomingDtmf`/`frameSent`/
//! `connectionClosing`; the [`PackageCallback`] trait a package is handed
//! at setup mirrors `ControlPackageCallback`'s `report`/`control` methods,
//! letting a package emit transaction responses, extended-transaction
//! REPORTs and asynchronous CONTROL callbacks (events) without this crate
//! (or the packages built on it) depending on `mediactrl-cfw` directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mediactrl_media::dtmf::DtmfDigit;
use mediactrl_media::types::{AudioFrame, EndpointId};

use crate::endpoint::EndpointAdapter;
use crate::Result;

/// What a Control Package calls back into the CFW layer with.
#[async_trait]
pub trait PackageCallback: Send + Sync {
    /// Send (or update, for an extended transaction) the response to the
    /// transaction identified by `tid`, owned by `requester`. `content_type`
    /// is the package's own MIME type (`ControlPackage::mime_type`) and is
    /// only applied to the wire frame when `body` is `Some`.
    async fn report(
        &self,
        requester: &str,
        tid: &str,
        status: u16,
        timeout: Option<Duration>,
        content_type: &str,
        body: Option<Vec<u8>>,
    );

    /// Send an unsolicited CONTROL transaction to `client_id` (used for
    /// asynchronous notify events such as `active-talkers-notify` or
    /// `dtmfnotify`).
    async fn control(&self, client_id: &str, body: Vec<u8>);
}

/// A loaded Control Package implementation (the Mixer or IVR engine).
#[async_trait]
pub trait ControlPackage: Send + Sync {
    /// Package name as advertised in the `Supported:`/`Packages:` headers,
    /// e.g. `"msc-mixer"`.
    fn name(&self) -> &str;

    /// Package version, e.g. `"1.0"`.
    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// MIME type of this package's CONTROL bodies, e.g.
    /// `"application/msc-mixer+xml"`.
    fn mime_type(&self) -> &str;

    /// Called once at registration time with the endpoint adapter and the
    /// callback handle the package should use for the rest of its life.
    async fn setup(
        &self,
        endpoint: Arc<dyn EndpointAdapter>,
        callback: Arc<dyn PackageCallback>,
    ) -> Result<()>;

    /// Dispatch a CONTROL transaction body to this package.
    async fn control(&self, requester: &str, tid: &str, body: &[u8]) -> Result<()>;

    /// An inbound media frame arrived on `connection` (or its sub-leg
    /// `sub_connection`, if the frame is on a sub-connection rather than
    /// the primary one).
    async fn incoming_frame(
        &self,
        connection: EndpointId,
        sub_connection: Option<EndpointId>,
        frame: AudioFrame,
    );

    /// A DTMF digit arrived on `connection`.
    async fn incoming_dtmf(
        &self,
        connection: EndpointId,
        sub_connection: Option<EndpointId>,
        digit: DtmfDigit,
    );

    /// A frame this package sent via [`EndpointAdapter::send_frame`] was
    /// actually delivered.
    async fn frame_sent(
        &self,
        connection: EndpointId,
        sub_connection: Option<EndpointId>,
        frame: &AudioFrame,
    );

    /// `connection` (and its sub-leg, if any) is closing; delivered
    /// exactly once per attached package.
    async fn connection_closing(&self, connection: EndpointId, sub_connection: Option<EndpointId>);
}

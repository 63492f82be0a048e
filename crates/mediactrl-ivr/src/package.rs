//! The IVR [`ControlPackage`] implementation (§4.8): XML dispatch,
//! dialog registry and per-dialog tick-loop lifecycle.
//!
//! Grounded on `IvrPackage::control`/`handleControl`'s dispatch shape and
//! `MixerPackage`'s (`mediactrl-mixer::package`) `Outcome`/registry/setup
//! pattern, generalized from a node graph to a dialog table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use mediactrl_media::dtmf::DtmfDigit;
use mediactrl_media::prompt::PromptCache;
use mediactrl_media::types::{AudioFrame, EndpointId};
use mediactrl_packages::endpoint::EndpointAdapter;
use mediactrl_packages::package::{ControlPackage, PackageCallback};
use mediactrl_packages::{Error, Result};

use crate::dialog::{Dialog, DialogPhase};
use crate::error;
use crate::xml::{self, IvrRequest};

const MIME_TYPE: &str = "application/msc-ivr+xml";

enum Outcome {
    Body { status: u16, extra: Vec<(String, String)> },
    Forbidden,
    /// The dialog exit report is the dialog's own async `event`, not this
    /// transaction's response (§4.8: "a dialog's outcome always arrives
    /// as an out-of-band event").
    Deferred { status: u16, extra: Vec<(String, String)> },
}

/// One loaded IVR dialog engine. Holds every dialog keyed by its
/// server- or client-chosen dialog-id (§3 "IVR Dialog").
pub struct IvrPackage {
    dialogs: Arc<DashMap<String, Arc<Dialog>>>,
    endpoint_by_connection: Arc<DashMap<String, EndpointId>>,
    cache: Arc<PromptCache>,
    endpoint: OnceCell<Arc<dyn EndpointAdapter>>,
    callback: OnceCell<Arc<dyn PackageCallback>>,
}

impl Default for IvrPackage {
    fn default() -> Self {
        Self::new()
    }
}

impl IvrPackage {
    pub fn new() -> Self {
        Self {
            dialogs: Arc::new(DashMap::new()),
            endpoint_by_connection: Arc::new(DashMap::new()),
            cache: Arc::new(PromptCache::new()),
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

    async fn handle_prepare(&self, id: Option<String>, spec: xml::DialogSpec, requester: &str) -> Outcome {
        let dialog_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.dialogs.contains_key(&dialog_id) {
            return Outcome::Body {
                status: error::DIALOG_ALREADY_EXISTS,
                extra: vec![("dialogid".into(), dialog_id)],
            };
        }
        let dialog = Arc::new(Dialog::new(dialog_id.clone(), requester, spec));
        self.dialogs.insert(dialog_id.clone(), dialog);
        Outcome::Body {
            status: error::OK,
            extra: vec![("dialogid".into(), dialog_id)],
        }
    }

    async fn resolve_endpoint(&self, connection_id: Option<&str>, conference_id: Option<&str>) -> std::result::Result<EndpointId, u16> {
        if let Some(id) = connection_id.or(conference_id) {
            if let Some(existing) = self.endpoint_by_connection.get(id) {
                return Ok(existing.value().clone());
            }
            let endpoint_id = self
                .endpoint()
                .get_connection(id)
                .await
                .map_err(|_| error::CONNECTION_NOT_FOUND)?;
            self.endpoint_by_connection.insert(id.to_string(), endpoint_id.clone());
            return Ok(endpoint_id);
        }
        Err(error::CONNECTION_NOT_FOUND)
    }

    async fn handle_start(
        &self,
        id: Option<String>,
        connection_id: Option<String>,
        conference_id: Option<String>,
        spec: Option<xml::DialogSpec>,
        requester: &str,
    ) -> Outcome {
        let dialog = match id.as_deref() {
            Some(existing_id) => match self.dialogs.get(existing_id) {
                Some(d) => {
                    let d = d.value().clone();
                    if !d.checks_out_to(requester) {
                        return Outcome::Forbidden;
                    }
                    d
                }
                None => match spec {
                    Some(spec) => {
                        let dialog = Arc::new(Dialog::new(existing_id, requester, spec));
                        self.dialogs.insert(existing_id.to_string(), dialog.clone());
                        dialog
                    }
                    None => {
                        return Outcome::Body {
                            status: error::DIALOG_NOT_FOUND,
                            extra: vec![],
                        }
                    }
                },
            },
            None => {
                let dialog_id = uuid::Uuid::new_v4().to_string();
                let dialog = Arc::new(Dialog::new(dialog_id.clone(), requester, spec.unwrap_or_default()));
                self.dialogs.insert(dialog_id, dialog.clone());
                dialog
            }
        };

        if dialog.phase().await != DialogPhase::Prepared {
            return Outcome::Body {
                status: error::RESOURCE_UNAVAILABLE,
                extra: vec![("dialogid".into(), dialog.id.clone())],
            };
        }

        let endpoint_id = match self.resolve_endpoint(connection_id.as_deref(), conference_id.as_deref()).await {
            Ok(e) => e,
            Err(status) => return Outcome::Body { status, extra: vec![] },
        };
        dialog.set_endpoint(endpoint_id).await;

        let dialog_for_task = dialog.clone();
        let cache = self.cache.clone();
        let endpoint = self.endpoint();
        let callback = self.callback();
        let requester_owned = requester.to_string();
        tokio::spawn(crate::dialog::run(dialog_for_task, cache, endpoint, callback, requester_owned));

        Outcome::Deferred {
            status: error::OK,
            extra: vec![("dialogid".into(), dialog.id.clone())],
        }
    }

    async fn handle_terminate(&self, id: &str, immediate: bool, requester: &str) -> Outcome {
        let Some(dialog) = self.dialogs.get(id).map(|e| e.value().clone()) else {
            return Outcome::Body {
                status: error::DIALOG_NOT_FOUND,
                extra: vec![],
            };
        };
        if !dialog.checks_out_to(requester) {
            return Outcome::Forbidden;
        }
        // `immediate=false` would normally let the outermost iteration
        // finish; this dialog engine has no repeatCount loop to drain,
        // so both cases stop at the next tick boundary (§5 "Cancellation").
        let _ = immediate;
        dialog.request_stop(error::exit_status::DIALOG_TERMINATE);
        Outcome::Body {
            status: error::OK,
            extra: vec![],
        }
    }

    async fn handle_audit(&self, id: Option<&str>, requester: &str) -> Outcome {
        if let Some(id) = id {
            return match self.dialogs.get(id) {
                Some(d) if d.checks_out_to(requester) => Outcome::Body {
                    status: error::OK,
                    extra: vec![("dialogid".into(), id.to_string())],
                },
                Some(_) => Outcome::Forbidden,
                None => Outcome::Body {
                    status: error::DIALOG_NOT_FOUND,
                    extra: vec![],
                },
            };
        }
        let count = self.dialogs.iter().filter(|e| e.value().checks_out_to(requester)).count();
        Outcome::Body {
            status: error::OK,
            extra: vec![("dialogs".into(), count.to_string())],
        }
    }
}

#[async_trait]
impl ControlPackage for IvrPackage {
    fn name(&self) -> &str {
        "msc-ivr"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str {
        "Prompt playback, DTMF collect and recording control package"
    }

    fn mime_type(&self) -> &str {
        MIME_TYPE
    }

    async fn setup(&self, endpoint: Arc<dyn EndpointAdapter>, callback: Arc<dyn PackageCallback>) -> Result<()> {
        self.endpoint
            .set(endpoint)
            .map_err(|_| Error::Other("ivr package already set up".into()))?;
        self.callback
            .set(callback)
            .map_err(|_| Error::Other("ivr package already set up".into()))?;
        Ok(())
    }

    async fn control(&self, requester: &str, tid: &str, body: &[u8]) -> Result<()> {
        let outcome = match xml::parse_request(body) {
            Err((status, reason)) => Outcome::Body {
                status,
                extra: vec![("detail".into(), reason)],
            },
            Ok(request) => match request {
                IvrRequest::DialogPrepare { id, spec } => self.handle_prepare(id, spec, requester).await,
                IvrRequest::DialogStart {
                    id,
                    connection_id,
                    conference_id,
                    spec,
                } => self.handle_start(id, connection_id, conference_id, spec, requester).await,
                IvrRequest::DialogTerminate { id, immediate } => self.handle_terminate(&id, immediate, requester).await,
                IvrRequest::Audit { dialog } => self.handle_audit(dialog.as_deref(), requester).await,
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
            Outcome::Deferred { status, extra } => {
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
        for entry in self.dialogs.iter() {
            if entry.value().endpoint_id().await.as_ref() == Some(&connection) {
                entry.value().push_frame(frame).await;
                return;
            }
        }
    }

    async fn incoming_dtmf(&self, connection: EndpointId, sub_connection: Option<EndpointId>, digit: DtmfDigit) {
        let _ = sub_connection;
        for entry in self.dialogs.iter() {
            if entry.value().endpoint_id().await.as_ref() == Some(&connection) {
                entry.value().push_dtmf(digit).await;
                return;
            }
        }
    }

    async fn frame_sent(&self, _connection: EndpointId, _sub_connection: Option<EndpointId>, _frame: &AudioFrame) {}

    async fn connection_closing(&self, connection: EndpointId, _sub_connection: Option<EndpointId>) {
        for entry in self.dialogs.iter() {
            if entry.value().endpoint_id().await.as_ref() == Some(&connection) {
                entry.value().request_stop(error::exit_status::CONNECTION_TERMINATED);
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
        controls: tokio::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl FakeCallback {
        fn new() -> Self {
            Self {
                reports: tokio::sync::Mutex::new(Vec::new()),
                controls: tokio::sync::Mutex::new(Vec::new()),
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
        async fn control(&self, _client_id: &str, body: Vec<u8>) {
            self.controls.lock().await.push(body);
        }
    }

    async fn setup_pkg() -> (Arc<IvrPackage>, Arc<FakeCallback>) {
        let pkg = Arc::new(IvrPackage::new());
        let callback = Arc::new(FakeCallback::new());
        pkg.setup(Arc::new(FakeEndpoint), callback.clone()).await.unwrap();
        (pkg, callback)
    }

    #[tokio::test]
    async fn prepare_then_duplicate_id_is_405() {
        let (pkg, callback) = setup_pkg().await;
        let body = br#"<mscivr version="1.0"><dialogprepare dialogid="d1"><dialog/></dialogprepare></mscivr>"#;
        pkg.control("client-1", "t1", body).await.unwrap();
        pkg.control("client-1", "t2", body).await.unwrap();

        let reports = callback.reports.lock().await;
        assert_eq!(reports.len(), 2);
        let second = reports[1].2.as_ref().unwrap();
        assert!(String::from_utf8_lossy(second).contains("405"));
    }

    #[tokio::test]
    async fn start_unknown_dialog_without_inline_spec_is_406() {
        let (pkg, _callback) = setup_pkg().await;
        let body = br#"<mscivr version="1.0"><dialogstart dialogid="ghost" connectionid="c1"/></mscivr>"#;
        pkg.control("client-1", "t1", body).await.unwrap();
        // handled synchronously (no spec to prepare, no dialog to start).
    }

    #[tokio::test]
    async fn terminate_on_someone_elses_dialog_is_forbidden() {
        let (pkg, callback) = setup_pkg().await;
        let prepare = br#"<mscivr version="1.0"><dialogprepare dialogid="d1"><dialog/></dialogprepare></mscivr>"#;
        pkg.control("client-1", "t1", prepare).await.unwrap();

        let terminate = br#"<mscivr version="1.0"><dialogterminate dialogid="d1"/></mscivr>"#;
        pkg.control("client-2", "t2", terminate).await.unwrap();

        let reports = callback.reports.lock().await;
        assert_eq!(reports[1].1, 403);
    }

    #[tokio::test]
    async fn audit_counts_only_requesters_own_dialogs() {
        let (pkg, callback) = setup_pkg().await;
        let prepare = br#"<mscivr version="1.0"><dialogprepare dialogid="d1"><dialog/></dialogprepare></mscivr>"#;
        pkg.control("client-1", "t1", prepare).await.unwrap();
        let audit = br#"<mscivr version="1.0"><audit/></mscivr>"#;
        pkg.control("client-2", "t2", audit).await.unwrap();

        let reports = callback.reports.lock().await;
        let body = reports[1].2.as_ref().unwrap();
        assert!(String::from_utf8_lossy(body).contains(r#"dialogs="0""#));
    }
}

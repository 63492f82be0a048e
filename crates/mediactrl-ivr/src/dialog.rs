//! The `Dialog` state machine and its per-dialog 20 ms tick loop (§4.8),
//! grounded on `mediactrl-mixer::conference::ConferenceTicker::run`'s
//! shape: a background task spawned once per `dialogstart`, driving
//! playback/collect/record off the same drift-compensating
//! [`TickSchedule`], fed by the node's own inbound frame/DTMF queues
//! rather than polling the endpoint directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use mediactrl_media::dtmf::DtmfDigit;
use mediactrl_media::mixing::scale_in_place;
use mediactrl_media::prompt::PromptCache;
use mediactrl_media::sync::clock::TickSchedule;
use mediactrl_media::types::{AudioFrame, EndpointId};
use mediactrl_packages::endpoint::EndpointAdapter;
use mediactrl_packages::package::PackageCallback;

use crate::collect::{CollectResult, CollectState};
use crate::error;
use crate::record::{RecordResult, RecordState};
use crate::timeline;
use crate::xml::{self, DialogSpec, DtmfMatchMode, VcrKey};

/// Frames skipped by one `ff`/`rw` VCR key press (5 s at 20 ms/frame).
const VCR_SEEK_FRAMES: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhase {
    Prepared,
    Running,
    Terminated,
}

struct DialogInner {
    phase: DialogPhase,
    endpoint_id: Option<EndpointId>,
    frame_queue: VecDeque<AudioFrame>,
    dtmf_queue: VecDeque<DtmfDigit>,
}

/// One `dialogprepare`/`dialogstart`-created dialog (§4.8).
pub struct Dialog {
    pub id: String,
    pub owner_client: String,
    pub spec: DialogSpec,
    stop: Arc<AtomicBool>,
    stop_reason: Arc<AtomicU16>,
    inner: Mutex<DialogInner>,
}

impl Dialog {
    pub fn new(id: impl Into<String>, owner_client: impl Into<String>, spec: DialogSpec) -> Self {
        Self {
            id: id.into(),
            owner_client: owner_client.into(),
            spec,
            stop: Arc::new(AtomicBool::new(false)),
            stop_reason: Arc::new(AtomicU16::new(error::exit_status::CONNECTION_TERMINATED)),
            inner: Mutex::new(DialogInner {
                phase: DialogPhase::Prepared,
                endpoint_id: None,
                frame_queue: VecDeque::new(),
                dtmf_queue: VecDeque::new(),
            }),
        }
    }

    pub fn checks_out_to(&self, client_id: &str) -> bool {
        self.owner_client == client_id
    }

    pub async fn phase(&self) -> DialogPhase {
        self.inner.lock().await.phase
    }

    pub async fn set_phase(&self, phase: DialogPhase) {
        self.inner.lock().await.phase = phase;
    }

    pub async fn set_endpoint(&self, endpoint: EndpointId) {
        self.inner.lock().await.endpoint_id = Some(endpoint);
    }

    pub async fn endpoint_id(&self) -> Option<EndpointId> {
        self.inner.lock().await.endpoint_id.clone()
    }

    /// Signals the tick loop to stop at the next tick, exiting with
    /// `reason` as its `dialogexit` status.
    pub fn request_stop(&self, reason: u16) {
        self.stop_reason.store(reason, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
    }

    pub async fn push_frame(&self, frame: AudioFrame) {
        let mut inner = self.inner.lock().await;
        inner.frame_queue.push_back(frame);
        while inner.frame_queue.len() > 50 {
            inner.frame_queue.pop_front();
        }
    }

    async fn pop_frame(&self) -> Option<AudioFrame> {
        self.inner.lock().await.frame_queue.pop_front()
    }

    pub async fn push_dtmf(&self, digit: DtmfDigit) {
        let mut inner = self.inner.lock().await;
        inner.dtmf_queue.push_back(digit);
        while inner.dtmf_queue.len() > 50 {
            inner.dtmf_queue.pop_front();
        }
    }

    async fn pop_dtmf(&self) -> Option<DtmfDigit> {
        self.inner.lock().await.dtmf_queue.pop_front()
    }
}

struct Completion {
    status: u16,
    reason: String,
    fragments: Vec<String>,
}

fn collect_status_str(result: CollectResult) -> &'static str {
    match result {
        CollectResult::Match => "match",
        CollectResult::NoMatch => "nomatch",
        CollectResult::NoInputTimeout => "noinput",
        CollectResult::Escaped => "escape",
    }
}

fn record_status_str(result: RecordResult) -> &'static str {
    match result {
        RecordResult::MaxTime => "maxtime",
        RecordResult::FinalSilence => "finalsilence",
        RecordResult::DtmfTerminated => "dtmfterm",
        RecordResult::NoSpeechTimeout => "nospeech",
    }
}

/// Runs one dialog's playback/collect/record tick loop to completion.
/// Reports the result via `callback.control` (an async `dialogexit`
/// event, per §4.8 — a dialog's outcome always arrives as an
/// out-of-band event, never as the `dialogstart` transaction response
/// itself, since a dialog routinely outlives that transaction).
pub async fn run(
    dialog: Arc<Dialog>,
    cache: Arc<PromptCache>,
    endpoint: Arc<dyn EndpointAdapter>,
    callback: Arc<dyn PackageCallback>,
    requester: String,
) {
    dialog.set_phase(DialogPhase::Running).await;

    let spec = dialog.spec.clone();
    let endpoint_id = match dialog.endpoint_id().await {
        Some(e) => e,
        None => {
            let body = xml::build_dialog_exit(&dialog.id, error::exit_status::EXECUTION_ERROR, "no endpoint bound", &[]);
            callback.control(&requester, body).await;
            dialog.set_phase(DialogPhase::Terminated).await;
            return;
        }
    };

    let bargein = spec.prompt.as_ref().map(|p| p.bargein).unwrap_or(false);
    let mut playback: Vec<AudioFrame> = Vec::new();
    if let Some(prompt_spec) = &spec.prompt {
        match timeline::compile(&cache, prompt_spec).await {
            Ok(frames) => playback = frames,
            Err((_, reason)) => {
                let body = xml::build_dialog_exit(&dialog.id, error::exit_status::EXECUTION_ERROR, &reason, &[]);
                callback.control(&requester, body).await;
                dialog.set_phase(DialogPhase::Terminated).await;
                return;
            }
        }
    }

    let mut collect_state = spec.collect.clone().map(CollectState::new);
    let mut record_state: Option<RecordState> = match &spec.record {
        Some(record_spec) => {
            let dest = record_spec.dest.clone().unwrap_or_else(|| format!("/tmp/mediactrl-ivr-{}.wav", dialog.id));
            match RecordState::start(record_spec.clone(), &dest) {
                Ok(state) => Some(state),
                Err(e) => {
                    let body = xml::build_dialog_exit(&dialog.id, error::exit_status::EXECUTION_ERROR, &e.to_string(), &[]);
                    callback.control(&requester, body).await;
                    dialog.set_phase(DialogPhase::Terminated).await;
                    return;
                }
            }
        }
        None => None,
    };

    let mut playback_cursor = 0usize;
    let mut playback_done = playback.is_empty();
    let mut paused = false;
    let mut gain_percent: u16 = 100;
    let mut termmode = "completed";

    let mut schedule = TickSchedule::media_tick();
    let completion: Completion = loop {
        tokio::time::sleep_until(schedule.next_deadline().into()).await;
        schedule.advance();

        if dialog.stop.load(Ordering::SeqCst) {
            let reason = dialog.stop_reason.load(Ordering::SeqCst);
            break Completion {
                status: reason,
                reason: error::exit_reason_for(reason).to_string(),
                fragments: Vec::new(),
            };
        }

        let mut digits = Vec::new();
        while let Some(d) = dialog.pop_dtmf().await {
            digits.push(d.to_char());
        }

        let mut completion: Option<Completion> = None;
        let mut bargein_triggered = false;

        for c in &digits {
            if let Some(control) = &spec.control {
                if let Some(key) = control.keys.get(c) {
                    match key {
                        VcrKey::Start => {
                            playback_cursor = 0;
                            paused = false;
                        }
                        VcrKey::End => {
                            playback_cursor = playback.len();
                            playback_done = true;
                            termmode = "control";
                        }
                        VcrKey::Pause => paused = true,
                        VcrKey::Resume => paused = false,
                        VcrKey::FastForward => playback_cursor = (playback_cursor + VCR_SEEK_FRAMES).min(playback.len()),
                        VcrKey::Rewind => playback_cursor = playback_cursor.saturating_sub(VCR_SEEK_FRAMES),
                        VcrKey::VolumeUp => gain_percent = (gain_percent + 20).min(200),
                        VcrKey::VolumeDown => gain_percent = gain_percent.saturating_sub(20).max(20),
                        VcrKey::SpeedUp | VcrKey::SpeedDown => {}
                    }
                    if let Some(sub) = &spec.subscribe_dtmf {
                        if matches!(sub.matchmode, DtmfMatchMode::All | DtmfMatchMode::Control) {
                            callback.control(&requester, xml::build_dtmf_notify(&dialog.id, *c)).await;
                        }
                    }
                    continue;
                }
            }

            if let Some(state) = collect_state.as_mut() {
                if let Some(result) = state.on_digit(*c) {
                    let fragment = format!(
                        r#"<collectinfo status="{}" digits="{}"/>"#,
                        collect_status_str(result),
                        xml::xml_escape(state.digits())
                    );
                    completion = Some(Completion {
                        status: error::exit_status::SUCCESS,
                        reason: error::exit_reason_for(error::exit_status::SUCCESS).to_string(),
                        fragments: vec![fragment],
                    });
                    break;
                }
                if let Some(sub) = &spec.subscribe_dtmf {
                    if matches!(sub.matchmode, DtmfMatchMode::Collect | DtmfMatchMode::All) {
                        callback.control(&requester, xml::build_dtmf_notify(&dialog.id, *c)).await;
                    }
                }
                continue;
            }

            if let Some(record) = record_state.as_ref() {
                if record.on_dtmf().is_some() {
                    let path = record.path().display().to_string();
                    let fragment = format!(
                        r#"<recordinfo status="dtmfterm" dest="{}" size="{}"/>"#,
                        xml::xml_escape(&path),
                        record.bytes_written()
                    );
                    completion = Some(Completion {
                        status: error::exit_status::SUCCESS,
                        reason: error::exit_reason_for(error::exit_status::SUCCESS).to_string(),
                        fragments: vec![fragment],
                    });
                    break;
                }
                continue;
            }

            if bargein && !playback_done {
                bargein_triggered = true;
            }
            if let Some(sub) = &spec.subscribe_dtmf {
                if matches!(sub.matchmode, DtmfMatchMode::All) {
                    callback.control(&requester, xml::build_dtmf_notify(&dialog.id, *c)).await;
                }
            }
        }

        if let Some(completion) = completion {
            if let Some(record) = record_state.take() {
                let _ = record.finish();
            }
            break completion;
        }

        if bargein_triggered {
            playback_cursor = playback.len();
            playback_done = true;
            termmode = "bargein";
        }

        if let Some(state) = collect_state.as_mut() {
            if let Some(result) = state.on_tick(20) {
                let fragment = format!(
                    r#"<collectinfo status="{}" digits="{}"/>"#,
                    collect_status_str(result),
                    xml::xml_escape(state.digits())
                );
                break Completion {
                    status: error::exit_status::SUCCESS,
                    reason: error::exit_reason_for(error::exit_status::SUCCESS).to_string(),
                    fragments: vec![fragment],
                };
            }
        }

        let mut prompt_fragment = None;
        if !playback_done {
            if paused {
                // no frame advances while paused
            } else if playback_cursor < playback.len() {
                let frame = &playback[playback_cursor];
                let out_frame = if gain_percent != 100 {
                    let mut samples = frame.samples().to_vec();
                    scale_in_place(&mut samples, gain_percent);
                    AudioFrame::new(samples, frame.sample_rate, frame.owner)
                } else {
                    frame.clone()
                };
                let _ = endpoint.send_frame(&endpoint_id, out_frame).await;
                playback_cursor += 1;
            } else {
                playback_done = true;
                termmode = "completed";
            }
            if playback_done {
                prompt_fragment = Some(format!(r#"<promptinfo termmode="{termmode}"/>"#));
            }
        }

        if let Some(fragment) = prompt_fragment {
            if collect_state.is_none() && record_state.is_none() {
                break Completion {
                    status: error::exit_status::SUCCESS,
                    reason: error::exit_reason_for(error::exit_status::SUCCESS).to_string(),
                    fragments: vec![fragment],
                };
            }
        }

        let mut record_completion: Option<(RecordResult, String, u32)> = None;
        if let Some(frame) = dialog.pop_frame().await {
            if let Some(record) = record_state.as_mut() {
                match record.on_frame(&frame) {
                    Ok(Some(result)) => {
                        record_completion = Some((result, record.path().display().to_string(), record.bytes_written()));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        break Completion {
                            status: error::exit_status::EXECUTION_ERROR,
                            reason: e.to_string(),
                            fragments: Vec::new(),
                        };
                    }
                }
            }
        }
        if let Some((result, path, bytes)) = record_completion {
            let status_str = record_status_str(result);
            let fragment = format!(r#"<recordinfo status="{status_str}" dest="{}" size="{bytes}"/>"#, xml::xml_escape(&path));
            let exit_status = if matches!(result, RecordResult::MaxTime) {
                error::exit_status::MAX_DURATION
            } else {
                error::exit_status::SUCCESS
            };
            if let Some(record) = record_state.take() {
                let _ = record.finish();
            }
            break Completion {
                status: exit_status,
                reason: error::exit_reason_for(exit_status).to_string(),
                fragments: vec![fragment],
            };
        }
    };

    let body = xml::build_dialog_exit(&dialog.id, completion.status, &completion.reason, &completion.fragments);
    callback.control(&requester, body).await;
    dialog.set_phase(DialogPhase::Terminated).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_dialog_starts_in_prepared_phase() {
        let d = Dialog::new("d1", "client-1", DialogSpec::default());
        assert_eq!(d.phase().await, DialogPhase::Prepared);
        assert!(d.checks_out_to("client-1"));
        assert!(!d.checks_out_to("client-2"));
    }

    #[tokio::test]
    async fn frame_and_dtmf_queues_are_fifo() {
        let d = Dialog::new("d1", "client-1", DialogSpec::default());
        d.push_dtmf(DtmfDigit::D1).await;
        d.push_dtmf(DtmfDigit::D2).await;
        assert_eq!(d.pop_dtmf().await, Some(DtmfDigit::D1));
        assert_eq!(d.pop_dtmf().await, Some(DtmfDigit::D2));
        assert_eq!(d.pop_dtmf().await, None);
    }
}

//! Record state machine (§4.8 "Record semantics"): writes inbound frames
//! to a [`WavSink`], driven by `maxtime`/`finalsilence`/`vadinitial`/
//! `vadfinal`/`dtmfterm`.

use std::path::PathBuf;

use mediactrl_media::recording::WavSink;
use mediactrl_media::types::AudioFrame;
use mediactrl_media::vad::{self, SilenceTracker};
use mediactrl_media::Error as MediaError;

use crate::xml::RecordSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResult {
    MaxTime,
    FinalSilence,
    DtmfTerminated,
    /// `vadinitial` was set and no speech arrived within `timeout`.
    NoSpeechTimeout,
}

pub struct RecordState {
    spec: RecordSpec,
    sink: WavSink,
    tracker: SilenceTracker,
    elapsed_ms: u64,
}

impl RecordState {
    pub fn start(spec: RecordSpec, dest: impl AsRef<std::path::Path>) -> Result<Self, MediaError> {
        let sink = WavSink::create(dest, spec.append)?;
        Ok(Self {
            spec,
            sink,
            tracker: SilenceTracker::new(),
            elapsed_ms: 0,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.sink.path()
    }

    pub fn bytes_written(&self) -> u32 {
        self.sink.bytes_written()
    }

    /// Feed one inbound frame. Returns `Some` once the recording should
    /// stop.
    pub fn on_frame(&mut self, frame: &AudioFrame) -> Result<Option<RecordResult>, MediaError> {
        let silent = vad::frame_is_silent(frame);

        if self.spec.vadinitial && !self.tracker.has_seen_speech() && silent {
            self.elapsed_ms += 20;
            if self.elapsed_ms >= self.spec.timeout_ms {
                return Ok(Some(RecordResult::NoSpeechTimeout));
            }
            return Ok(None);
        }

        self.sink.append_frame(frame.samples())?;
        self.elapsed_ms += 20;
        let continuous_silence = self.tracker.observe(silent, 20);

        if self.spec.vadfinal && self.tracker.has_seen_speech() && continuous_silence >= self.spec.finalsilence_ms {
            return Ok(Some(RecordResult::FinalSilence));
        }
        if self.elapsed_ms >= self.spec.maxtime_ms {
            return Ok(Some(RecordResult::MaxTime));
        }
        Ok(None)
    }

    /// A DTMF digit arrived; `dtmfterm` decides whether that ends the
    /// recording.
    pub fn on_dtmf(&self) -> Option<RecordResult> {
        self.spec.dtmfterm.then_some(RecordResult::DtmfTerminated)
    }

    pub fn finish(self) -> Result<PathBuf, MediaError> {
        self.sink.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediactrl_media::types::FrameOwner;

    fn spec() -> RecordSpec {
        RecordSpec {
            timeout_ms: 1000,
            maxtime_ms: 10_000,
            finalsilence_ms: 100,
            vadinitial: false,
            vadfinal: false,
            dtmfterm: true,
            beep: false,
            append: false,
            dest: None,
        }
    }

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mediactrl-ivr-record-test-{}-{}.wav", std::process::id(), name))
    }

    fn loud_frame() -> AudioFrame {
        AudioFrame::new(vec![10_000i16; 160], 8000, FrameOwner::Endpoint)
    }

    fn silent_frame() -> AudioFrame {
        AudioFrame::new(vec![0i16; 160], 8000, FrameOwner::Endpoint)
    }

    #[test]
    fn maxtime_stops_recording() {
        let path = tmp_path("maxtime");
        let spec = RecordSpec { maxtime_ms: 40, ..spec() };
        let mut state = RecordState::start(spec, &path).unwrap();
        assert!(state.on_frame(&loud_frame()).unwrap().is_none());
        assert_eq!(state.on_frame(&loud_frame()).unwrap(), Some(RecordResult::MaxTime));
        state.finish().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn vadfinal_stops_after_trailing_silence() {
        let path = tmp_path("vadfinal");
        let spec = RecordSpec { vadfinal: true, finalsilence_ms: 40, ..spec() };
        let mut state = RecordState::start(spec, &path).unwrap();
        state.on_frame(&loud_frame()).unwrap();
        assert!(state.on_frame(&silent_frame()).unwrap().is_none());
        assert_eq!(state.on_frame(&silent_frame()).unwrap(), Some(RecordResult::FinalSilence));
        state.finish().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn dtmfterm_reports_termination() {
        let path = tmp_path("dtmfterm");
        let state = RecordState::start(spec(), &path).unwrap();
        assert_eq!(state.on_dtmf(), Some(RecordResult::DtmfTerminated));
        state.finish().unwrap();
        std::fs::remove_file(&path).ok();
    }
}

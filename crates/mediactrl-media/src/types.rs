//! Frame and media types shared by the CFW transaction layer, the Mixer
//! package and the IVR package.
//!
//! Decoded PCM frames are reference-counted and immutable once published
//! (producers never mutate a frame after handing it to a consumer) so the
//! same frame can be fanned out to the mixer's mix buffer, its N-1 echo
//! subtraction and an IVR playback track without copying.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// One 20 ms tick's worth of narrowband audio: 160 samples at 8 kHz, mono.
pub const SAMPLES_PER_FRAME: usize = 160;

/// RTP-style payload type identifying the wire encoding of a frame.
pub type PayloadType = u8;

/// Standard payload type constants for the narrowband codecs this stack
/// implements.
pub mod payload_types {
    use super::PayloadType;

    /// G.711 mu-law (PCMU)
    pub const PCMU: PayloadType = 0;
    /// G.711 A-law (PCMA)
    pub const PCMA: PayloadType = 8;
    /// G.722 wideband-in-narrowband-clock
    pub const G722: PayloadType = 9;
    /// RFC 4733 telephone-event (DTMF)
    pub const TELEPHONE_EVENT: PayloadType = 101;
}

/// Who produced a frame, for diagnostics and for deciding which tracks can
/// be mixed together (announcement overlay is attenuated, endpoint audio
/// is not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOwner {
    /// Arrived from (or is destined to) an Endpoint adapter.
    Endpoint,
    /// Synthesized by a prompt track (IVR playback).
    Prompt,
    /// Synthesized by a Mixer `sendFrame` announcement overlay.
    Announcement,
}

/// A decoded, immutable 20 ms PCM frame plus the bookkeeping the control
/// packages need to route and log it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// 16-bit linear PCM samples, narrowband (8 kHz) unless otherwise noted.
    samples: Arc<[i16]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Who produced this frame.
    pub owner: FrameOwner,
    /// The CFW transaction that caused this frame to exist, if any — set on
    /// frames produced while handling a CONTROL transaction (e.g. a
    /// `sendFrame` announcement) so the eventual REPORT can be correlated.
    pub tid: Option<String>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, owner: FrameOwner) -> Self {
        Self {
            samples: Arc::from(samples),
            sample_rate,
            owner,
            tid: None,
        }
    }

    pub fn with_tid(mut self, tid: impl Into<String>) -> Self {
        self.tid = Some(tid.into());
        self
    }

    /// A frame of all-zero samples at the standard frame size.
    pub fn silence() -> Self {
        Self::new(vec![0i16; SAMPLES_PER_FRAME], 8000, FrameOwner::Endpoint)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Unique identifier for a dialog-controlled media endpoint, matching the
/// AS-visible `connectionid` it rides on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A fresh server-assigned id, used when the AS does not supply one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream direction as carried on a Mixer `<stream>` or implied by an IVR
/// connection join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
    Inactive,
}

impl MediaDirection {
    pub fn includes_send(self) -> bool {
        matches!(self, MediaDirection::SendOnly | MediaDirection::SendRecv)
    }

    pub fn includes_recv(self) -> bool {
        matches!(self, MediaDirection::RecvOnly | MediaDirection::SendRecv)
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDirection::SendOnly => write!(f, "sendonly"),
            MediaDirection::RecvOnly => write!(f, "recvonly"),
            MediaDirection::SendRecv => write!(f, "sendrecv"),
            MediaDirection::Inactive => write!(f, "inactive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_frame_has_standard_size() {
        let frame = AudioFrame::silence();
        assert_eq!(frame.len(), SAMPLES_PER_FRAME);
        assert!(frame.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn direction_helpers() {
        assert!(MediaDirection::SendRecv.includes_send());
        assert!(MediaDirection::SendRecv.includes_recv());
        assert!(!MediaDirection::RecvOnly.includes_send());
        assert!(!MediaDirection::SendOnly.includes_recv());
    }
}

//! The IVR control package (§3, §4.8): dialog state machine, prompt
//! timeline compiler, DTMF collect with an SRGS-DTMF-subset grammar, and
//! record with VAD and beep.
//!
//! - `xml`: `application/msc-ivr+xml` request parsing and response/event
//!   serialization.
//! - `dialog`: the `Dialog` type and its 20 ms playback/collect/record
//!   tick loop.
//! - `timeline`: compiles a `<prompt>` tree into a flat frame track.
//! - `collect`: the DTMF collect state machine.
//! - `record`: the record state machine over `mediactrl_media::recording::WavSink`.
//! - `grammar`: the DTMF-only SRGS subset matcher.
//! - `package`: the `ControlPackage` implementation tying the above together.

pub mod collect;
pub mod dialog;
pub mod error;
pub mod grammar;
pub mod package;
pub mod record;
pub mod timeline;
pub mod xml;

pub use package::IvrPackage;

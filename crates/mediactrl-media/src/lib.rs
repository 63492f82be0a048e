//! Frame types, narrowband codecs, the placeholder VAD, DTMF plumbing,
//! low-level mixing primitives, the prompt cache/fetcher and the WAV
//! recording sink shared by the Mixer and IVR control packages.
//!
//! - `types`: the frame/media model (§3 data model).
//! - `sync`: the drift-compensating monotonic clock used by every 20 ms
//!   tick and by the transaction/keepalive timers.
//! - `codec`: PCMU/PCMA/G.722 narrowband codec indirection.
//! - `vad`: the placeholder amplitude-threshold silence test.
//! - `dtmf`: DTMF digit type and per-endpoint tone buffer.
//! - `mixing`: accumulate/clip primitives for the mixer tick and prompt
//!   track summation.
//! - `prompt`: at-most-once-per-URI prompt fetch and decode cache.
//! - `recording`: the WAV sink with a running header update.

pub mod codec;
pub mod dtmf;
pub mod error;
pub mod mixing;
pub mod prompt;
pub mod recording;
pub mod sync;
pub mod types;
pub mod vad;

pub use error::{Error, Result}; 
use crate::error::Result;
use crate::types::PayloadType;

/// A narrowband audio codec: fixed 160-sample (20 ms @ 8 kHz) frames in,
/// raw linear PCM out and back.
pub trait AudioCodec: Send + Sync {
    /// Codec name as it appears in CFW logs (`PCMU`, `PCMA`, `G722`).
    fn name(&self) -> &'static str;

    /// RTP-style payload type this codec is registered under.
    fn payload_type(&self) -> PayloadType;

    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Encode one frame of linear PCM samples into wire bytes.
    fn encode(&self, pcm: &[i16]) -> Result<Vec<u8>>;

    /// Decode wire bytes into linear PCM samples.
    fn decode(&self, encoded: &[u8]) -> Result<Vec<i16>>;
}

//! Narrowband codec indirection.
//!
//! The CFW control packages never see codec details directly; the
//! Endpoint adapter decides a payload type per connection (negotiated by
//! the SIP/SDP collaborator, out of scope here) and the packages ask this
//! module to decode inbound frames / encode outbound ones.

pub mod g711;
pub mod g722;
mod traits;

pub use traits::AudioCodec;

use crate::error::{Error, Result};
use crate::types::PayloadType;

/// Look up the codec implementation for a payload type.
pub fn codec_for_payload_type(pt: PayloadType) -> Result<Box<dyn AudioCodec>> {
    match pt {
        crate::types::payload_types::PCMU => Ok(Box::new(g711::G711Codec::mu_law())),
        crate::types::payload_types::PCMA => Ok(Box::new(g711::G711Codec::a_law())),
        crate::types::payload_types::G722 => Ok(Box::new(g722::G722Codec::new())),
        other => Err(Error::UnsupportedCodec(format!("payload type {other}"))),
    }
}

//! G.711 codec: mu-law (PCMU) and A-law (PCMA), the two mandatory
//! narrowband codecs of the telephony stack.

use super::traits::AudioCodec;
use crate::error::Result;
use crate::types::payload_types;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    MuLaw,
    ALaw,
}

pub struct G711Codec {
    variant: Variant,
}

impl G711Codec {
    pub fn mu_law() -> Self {
        Self {
            variant: Variant::MuLaw,
        }
    }

    pub fn a_law() -> Self {
        Self {
            variant: Variant::ALaw,
        }
    }
}

impl AudioCodec for G711Codec {
    fn name(&self) -> &'static str {
        match self.variant {
            Variant::MuLaw => "PCMU",
            Variant::ALaw => "PCMA",
        }
    }

    fn payload_type(&self) -> u8 {
        match self.variant {
            Variant::MuLaw => payload_types::PCMU,
            Variant::ALaw => payload_types::PCMA,
        }
    }

    fn sample_rate(&self) -> u32 {
        8000
    }

    fn encode(&self, pcm: &[i16]) -> Result<Vec<u8>> {
        Ok(match self.variant {
            Variant::MuLaw => pcm.iter().copied().map(linear_to_mulaw).collect(),
            Variant::ALaw => pcm.iter().copied().map(linear_to_alaw).collect(),
        })
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<i16>> {
        Ok(match self.variant {
            Variant::MuLaw => encoded.iter().copied().map(mulaw_to_linear).collect(),
            Variant::ALaw => encoded.iter().copied().map(alaw_to_linear).collect(),
        })
    }
}

const MULAW_BIAS: i16 = 0x84;
const MULAW_CLIP: i16 = 8159;

fn linear_to_mulaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = if sample < 0 { -sample } else { sample };

    if magnitude > MULAW_CLIP {
        magnitude = MULAW_CLIP;
    }
    magnitude += MULAW_BIAS;

    let mut exponent = 0;
    for i in (0..8).rev() {
        if magnitude >= (1 << (i + 8)) {
            exponent = i + 1;
            break;
        }
    }

    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    let mulaw = sign | (exponent << 4) | mantissa;
    !mulaw as u8
}

fn mulaw_to_linear(mulaw: u8) -> i16 {
    let mulaw = !mulaw;
    let sign = mulaw & 0x80;
    let exponent = (mulaw >> 4) & 0x07;
    let mantissa = mulaw & 0x0F;

    let magnitude = if exponent == 0 {
        ((mantissa as i16) << 4) + 8
    } else {
        (((mantissa as i16) << 4) + 0x108) << (exponent - 1)
    };
    let magnitude = magnitude - MULAW_BIAS;

    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

const ALAW_CLIP: i16 = 8159;

fn linear_to_alaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = if sample < 0 { -sample } else { sample };

    if magnitude > ALAW_CLIP {
        magnitude = ALAW_CLIP;
    }

    let alaw = if magnitude < 32 {
        sign | ((magnitude >> 1) & 0x0F) as u8
    } else {
        let mut exponent = 7;
        for i in (1..8).rev() {
            if magnitude >= (1 << (i + 4)) {
                exponent = i;
                break;
            }
        }
        let mantissa = ((magnitude >> (exponent + 1)) & 0x0F) as u8;
        sign | ((exponent - 1) << 4) | mantissa
    };

    alaw ^ 0x55
}

fn alaw_to_linear(alaw: u8) -> i16 {
    let alaw = alaw ^ 0x55;
    let sign = alaw & 0x80;
    let exponent = (alaw >> 4) & 0x07;
    let mantissa = alaw & 0x0F;

    let magnitude: i16 = if exponent == 0 {
        ((mantissa as i16) << 1) + 1
    } else {
        (((mantissa as i16) << 1) + 33) << exponent
    };

    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_round_trips_a_160_sample_frame() {
        let codec = G711Codec::mu_law();
        let samples: Vec<i16> = (0..160).map(|i| (i as i16 * 10) % 1000).collect();
        let encoded = codec.encode(&samples).unwrap();
        assert_eq!(encoded.len(), 160);
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 160);
    }

    #[test]
    fn alaw_zero_sample_decodes_near_zero() {
        let codec = G711Codec::a_law();
        let encoded = codec.encode(&[0i16; 160]).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert!(decoded[0].abs() < 200);
    }

    #[test]
    fn payload_types_match_the_wire_constants() {
        assert_eq!(G711Codec::mu_law().payload_type(), payload_types::PCMU);
        assert_eq!(G711Codec::a_law().payload_type(), payload_types::PCMA);
    }
}

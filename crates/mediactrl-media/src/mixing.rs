//! Low-level sample mixing primitives shared by the Mixer conference tick
//! and the IVR prompt-track summation.
//!
//! Samples are accumulated in a wider-than-i16 buffer so that multiple
//! full-scale contributors don't wrap before the final clip.

use crate::types::SAMPLES_PER_FRAME;

/// An accumulation buffer for one 20 ms tick. Summing happens in `i32` to
/// avoid overflow; [`MixAccumulator::clip`] brings it back to `i16`.
#[derive(Debug, Clone)]
pub struct MixAccumulator {
    samples: [i32; SAMPLES_PER_FRAME],
}

impl MixAccumulator {
    pub fn new() -> Self {
        Self {
            samples: [0; SAMPLES_PER_FRAME],
        }
    }

    /// Add `frame` scaled by `gain_percent` (100 = unity) into the
    /// accumulator. Frames shorter than [`SAMPLES_PER_FRAME`] contribute
    /// only over their own length; longer ones are truncated.
    pub fn add(&mut self, frame: &[i16], gain_percent: u16) {
        let gain = gain_percent as i64;
        for (acc, &sample) in self.samples.iter_mut().zip(frame.iter()) {
            *acc += ((sample as i64 * gain) / 100) as i32;
        }
    }

    /// Overlay `frame` attenuated by a fixed fraction (used for the
    /// Mixer's `sendFrame` announcement overlay, at one third amplitude).
    pub fn overlay_attenuated(&mut self, frame: &[i16], numerator: u32, denominator: u32) {
        for (acc, &sample) in self.samples.iter_mut().zip(frame.iter()) {
            *acc += (sample as i64 * numerator as i64 / denominator as i64) as i32;
        }
    }

    /// The accumulated mix minus one contributor's own frame, scaled by
    /// `gain_percent` — the per-edge echo-cancelled feed for that node.
    pub fn minus_contribution(&self, contribution: &[i16], gain_percent: u16) -> [i16; SAMPLES_PER_FRAME] {
        let gain = gain_percent as i64;
        let mut out = [0i16; SAMPLES_PER_FRAME];
        for i in 0..SAMPLES_PER_FRAME {
            let own = contribution.get(i).copied().unwrap_or(0) as i64;
            let residual = self.samples[i] as i64 - own;
            out[i] = clip_i16((residual * gain) / 100);
        }
        out
    }

    /// Clip the raw accumulated mix to a plain `i16` frame (no per-node
    /// gain or subtraction — used where the full mix itself is wanted,
    /// e.g. a conference-wide recording tap).
    pub fn clip(&self) -> [i16; SAMPLES_PER_FRAME] {
        let mut out = [0i16; SAMPLES_PER_FRAME];
        for i in 0..SAMPLES_PER_FRAME {
            out[i] = clip_i16(self.samples[i] as i64);
        }
        out
    }
}

impl Default for MixAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn clip_i16(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Apply a single per-prompt/session gain (percent) to a frame in place,
/// used by the IVR playback loop before summing tracks.
pub fn scale_in_place(samples: &mut [i16], gain_percent: u16) {
    let gain = gain_percent as i64;
    for sample in samples.iter_mut() {
        *sample = clip_i16((*sample as i64 * gain) / 100);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain_sums_two_contributors() {
        let mut acc = MixAccumulator::new();
        acc.add(&[100i16; SAMPLES_PER_FRAME], 100);
        acc.add(&[50i16; SAMPLES_PER_FRAME], 100);
        assert_eq!(acc.clip()[0], 150);
    }

    #[test]
    fn half_gain_halves_contribution() {
        let mut acc = MixAccumulator::new();
        acc.add(&[100i16; SAMPLES_PER_FRAME], 50);
        assert_eq!(acc.clip()[0], 50);
    }

    #[test]
    fn minus_contribution_removes_own_frame_before_gain() {
        let mut acc = MixAccumulator::new();
        acc.add(&[100i16; SAMPLES_PER_FRAME], 100);
        acc.add(&[30i16; SAMPLES_PER_FRAME], 100);
        let residual = acc.minus_contribution(&[100i16; SAMPLES_PER_FRAME], 100);
        assert_eq!(residual[0], 30);
    }

    #[test]
    fn overflow_clips_to_i16_range() {
        let mut acc = MixAccumulator::new();
        acc.add(&[i16::MAX; SAMPLES_PER_FRAME], 100);
        acc.add(&[i16::MAX; SAMPLES_PER_FRAME], 100);
        assert_eq!(acc.clip()[0], i16::MAX);
    }
}

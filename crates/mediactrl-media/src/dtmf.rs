//! DTMF digit representation and the per-endpoint tone buffer the IVR
//! collect state machine and the Mixer's `<clamp tones=…>` edge filter
//! both consume.

use std::collections::VecDeque;
use std::time::Instant;

/// A single DTMF digit, including the extended A-D tones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfDigit {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    D8,
    D9,
    Star,
    Pound,
    A,
    B,
    C,
    D,
}

impl DtmfDigit {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::D0),
            '1' => Some(Self::D1),
            '2' => Some(Self::D2),
            '3' => Some(Self::D3),
            '4' => Some(Self::D4),
            '5' => Some(Self::D5),
            '6' => Some(Self::D6),
            '7' => Some(Self::D7),
            '8' => Some(Self::D8),
            '9' => Some(Self::D9),
            '*' => Some(Self::Star),
            '#' => Some(Self::Pound),
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            'C' | 'c' => Some(Self::C),
            'D' | 'd' => Some(Self::D),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Self::D0 => '0',
            Self::D1 => '1',
            Self::D2 => '2',
            Self::D3 => '3',
            Self::D4 => '4',
            Self::D5 => '5',
            Self::D6 => '6',
            Self::D7 => '7',
            Self::D8 => '8',
            Self::D9 => '9',
            Self::Star => '*',
            Self::Pound => '#',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }
}

/// One received tone event, timestamped for collect's interdigit timeout.
#[derive(Debug, Clone, Copy)]
pub struct DtmfEvent {
    pub digit: DtmfDigit,
    pub received_at: Instant,
}

/// FIFO tone buffer per Endpoint. `clear`/`next` run under the endpoint's
/// mutex in the caller (this type itself does no locking).
#[derive(Debug, Default)]
pub struct DtmfBuffer {
    queue: VecDeque<DtmfEvent>,
}

impl DtmfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, digit: DtmfDigit) {
        self.queue.push_back(DtmfEvent {
            digit,
            received_at: Instant::now(),
        });
    }

    pub fn next(&mut self) -> Option<DtmfEvent> {
        self.queue.pop_front()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_round_trip_covers_all_digits() {
        for c in "0123456789*#ABCD".chars() {
            let d = DtmfDigit::from_char(c).unwrap();
            assert_eq!(d.to_char(), c);
        }
    }

    #[test]
    fn buffer_is_fifo_and_clearable() {
        let mut buf = DtmfBuffer::new();
        buf.push(DtmfDigit::D1);
        buf.push(DtmfDigit::D2);
        assert_eq!(buf.next().unwrap().digit, DtmfDigit::D1);
        buf.clear();
        assert!(buf.is_empty());
    }
}

//! Module: event
//!
//! Purpose: Timing events carried by the [`TimingStream`](crate::stream::TimingStream).
//!
//! Architecture:
//! - Immutable, `Copy`, produced once by the RT thread
//! - Kind + payload pack into one 32-bit word so a ring slot is made of
//!   atomics only (see `stream`)
//!
//! Safety: Safe. No unsafe blocks.

use core::fmt;

use crate::iambic::Element;
use crate::sample::GpioState;

/// Classification of a key-up interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GapKind {
    /// Key up long enough to end a character (≥ 2 dit units).
    Character = 0,
    /// Key up long enough to end a word (≥ 5 dit units).
    Word = 1,
}

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Paddle contacts changed (new state).
    PaddleChange(GpioState),
    /// Key down, start of an element.
    KeyOn(Element),
    /// Key up, end of an element.
    KeyOff(Element),
    /// Key-up interval crossed a gap threshold.
    Gap(GapKind),
    /// Character recognised by a decoder (ASCII).
    Decoded(u8),
    /// Opposite paddle memorized during the current element.
    MemoryArmed(Element),
}

const TAG_PADDLE: u8 = 0;
const TAG_KEY_ON: u8 = 1;
const TAG_KEY_OFF: u8 = 2;
const TAG_GAP: u8 = 3;
const TAG_DECODED: u8 = 4;
const TAG_MEMORY: u8 = 5;

impl EventKind {
    /// Pack into `[tag:8][payload:8][reserved:16]`.
    pub const fn to_word(self) -> u32 {
        let (tag, payload) = match self {
            EventKind::PaddleChange(gpio) => (TAG_PADDLE, gpio.bits()),
            EventKind::KeyOn(element) => (TAG_KEY_ON, element as u8),
            EventKind::KeyOff(element) => (TAG_KEY_OFF, element as u8),
            EventKind::Gap(kind) => (TAG_GAP, kind as u8),
            EventKind::Decoded(ch) => (TAG_DECODED, ch),
            EventKind::MemoryArmed(element) => (TAG_MEMORY, element as u8),
        };
        (tag as u32) | ((payload as u32) << 8)
    }

    /// Unpack a word produced by [`to_word`](Self::to_word).
    pub const fn from_word(word: u32) -> Option<Self> {
        let tag = (word & 0xFF) as u8;
        let payload = ((word >> 8) & 0xFF) as u8;
        let kind = match tag {
            TAG_PADDLE => EventKind::PaddleChange(GpioState::from_bits(payload)),
            TAG_KEY_ON => EventKind::KeyOn(Element::from_u8(payload)),
            TAG_KEY_OFF => EventKind::KeyOff(Element::from_u8(payload)),
            TAG_GAP => EventKind::Gap(if payload == GapKind::Word as u8 {
                GapKind::Word
            } else {
                GapKind::Character
            }),
            TAG_DECODED => EventKind::Decoded(payload),
            TAG_MEMORY => EventKind::MemoryArmed(Element::from_u8(payload)),
            _ => return None,
        };
        Some(kind)
    }

    /// True for KeyOn / KeyOff.
    #[inline]
    pub const fn is_keying(&self) -> bool {
        matches!(self, EventKind::KeyOn(_) | EventKind::KeyOff(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |e: Element| match e {
            Element::Dit => "dit",
            Element::Dah => "dah",
        };
        match *self {
            EventKind::PaddleChange(gpio) => write!(
                f,
                "PADDLE {}{}",
                if gpio.dit() { "." } else { "_" },
                if gpio.dah() { "-" } else { "_" }
            ),
            EventKind::KeyOn(e) => write!(f, "KEY ON  {}", name(e)),
            EventKind::KeyOff(e) => write!(f, "KEY OFF {}", name(e)),
            EventKind::Gap(GapKind::Character) => f.write_str("GAP char"),
            EventKind::Gap(GapKind::Word) => f.write_str("GAP word"),
            EventKind::Decoded(ch) => write!(f, "DECODED {:?}", ch as char),
            EventKind::MemoryArmed(e) => write!(f, "MEMORY  {}", name(e)),
        }
    }
}

/// A timestamped timing event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingEvent {
    /// Monotonic timestamp in microseconds.
    pub timestamp_us: i64,
    pub kind: EventKind,
}

impl TimingEvent {
    pub const fn new(timestamp_us: i64, kind: EventKind) -> Self {
        Self { timestamp_us, kind }
    }

    pub const fn paddle(timestamp_us: i64, gpio: GpioState) -> Self {
        Self::new(timestamp_us, EventKind::PaddleChange(gpio))
    }

    pub const fn key_on(timestamp_us: i64, element: Element) -> Self {
        Self::new(timestamp_us, EventKind::KeyOn(element))
    }

    pub const fn key_off(timestamp_us: i64, element: Element) -> Self {
        Self::new(timestamp_us, EventKind::KeyOff(element))
    }

    pub const fn gap(timestamp_us: i64, kind: GapKind) -> Self {
        Self::new(timestamp_us, EventKind::Gap(kind))
    }

    pub const fn decoded(timestamp_us: i64, ch: u8) -> Self {
        Self::new(timestamp_us, EventKind::Decoded(ch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_layout() {
        assert_eq!(EventKind::KeyOn(Element::Dah).to_word(), 0x0101);
        assert_eq!(EventKind::PaddleChange(GpioState::BOTH).to_word(), 0x0300);
        assert_eq!(EventKind::Decoded(b'K').to_word(), ((b'K' as u32) << 8) | 4);
    }

    #[test]
    fn test_gap_payload_survives_packing() {
        let word = EventKind::Gap(GapKind::Word).to_word();
        assert_eq!(EventKind::from_word(word), Some(EventKind::Gap(GapKind::Word)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            format!("{}", EventKind::PaddleChange(GpioState::from_paddles(false, true))),
            "PADDLE _-"
        );
        assert_eq!(format!("{}", EventKind::KeyOff(Element::Dah)), "KEY OFF dah");
        assert_eq!(format!("{}", EventKind::Decoded(b'K')), "DECODED 'K'");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert_eq!(EventKind::from_word(0xFF), None);
    }

    #[test]
    fn test_is_keying() {
        assert!(TimingEvent::key_on(0, Element::Dit).kind.is_keying());
        assert!(!TimingEvent::gap(0, GapKind::Word).kind.is_keying());
    }
}

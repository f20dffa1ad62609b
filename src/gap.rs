//! Key-up gap detection.
//!
//! Follows the keying transitions and reports when the key has been up long
//! enough to close a character (2 dit units) or a word (5 dit units). Gaps
//! shorter than 2 units are inter-element spaces and produce nothing.
//!
//! ```text
//! KeyOff        +2 dit             +5 dit
//!   |------------|------------------|------
//!   | intra      | Gap(Character)   | Gap(Word)
//! ```
//!
//! Each threshold fires at most once per key-up interval; the next KeyOn
//! re-arms both.

use crate::event::GapKind;
use crate::iambic::Transition;

/// Character gap threshold in dit units.
pub const CHARACTER_GAP_DITS: u32 = 2;

/// Word gap threshold in dit units.
pub const WORD_GAP_DITS: u32 = 5;

/// Tick-driven gap classifier.
#[derive(Clone, Debug)]
pub struct GapDetector {
    dit_ticks: u32,
    /// Ticks since the last KeyOff.
    key_up_ticks: u32,
    /// Next threshold to report, `None` while keyed or after the word gap.
    pending: Option<GapKind>,
}

impl GapDetector {
    pub fn new(dit_ticks: u32) -> Self {
        Self {
            dit_ticks: dit_ticks.max(1),
            key_up_ticks: 0,
            pending: None,
        }
    }

    /// Follow a speed change. An interval in progress is measured against
    /// the new unit from now on.
    pub fn set_dit_ticks(&mut self, dit_ticks: u32) {
        self.dit_ticks = dit_ticks.max(1);
    }

    pub fn dit_ticks(&self) -> u32 {
        self.dit_ticks
    }

    /// Ticks the key has been up, 0 while keyed.
    pub fn key_up_ticks(&self) -> u32 {
        self.key_up_ticks
    }

    /// Advance one tick with this tick's keying transition, if any.
    ///
    /// The KeyOff tick itself counts as time 0 of the key-up interval.
    pub fn tick(&mut self, transition: Option<Transition>) -> Option<GapKind> {
        match transition {
            Some(Transition::KeyOn(_)) => {
                self.key_up_ticks = 0;
                self.pending = None;
                return None;
            }
            Some(Transition::KeyOff(_)) => {
                self.key_up_ticks = 0;
                self.pending = Some(GapKind::Character);
                return None;
            }
            None => {}
        }

        let pending = self.pending?;
        self.key_up_ticks = self.key_up_ticks.saturating_add(1);

        match pending {
            GapKind::Character if self.key_up_ticks >= CHARACTER_GAP_DITS * self.dit_ticks => {
                self.pending = Some(GapKind::Word);
                Some(GapKind::Character)
            }
            GapKind::Word if self.key_up_ticks >= WORD_GAP_DITS * self.dit_ticks => {
                self.pending = None;
                Some(GapKind::Word)
            }
            _ => None,
        }
    }

    /// Forget the current interval.
    pub fn reset(&mut self) {
        self.key_up_ticks = 0;
        self.pending = None;
    }
}

//! Module: sample
//!
//! Purpose: Paddle input sample. One byte per tick, as delivered by the
//! (pre-debounced) paddle sampler.
//!
//! Safety: Safe. No unsafe blocks. Copy types only.

/// GPIO paddle state
///
/// Bit layout:
/// - Bit 0: DIT paddle
/// - Bit 1: DAH paddle
/// - Bits 2-7: Reserved
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpioState(u8);

impl GpioState {
    /// DIT paddle bit mask (bit 0)
    pub const DIT: u8 = 0x01;

    /// DAH paddle bit mask (bit 1)
    pub const DAH: u8 = 0x02;

    /// Idle state constant (no paddles pressed)
    pub const IDLE: Self = Self(0);

    /// Both paddles pressed (squeeze)
    pub const BOTH: Self = Self(Self::DIT | Self::DAH);

    /// Create GPIO state from raw byte. Reserved bits are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & (Self::DIT | Self::DAH))
    }

    /// Create GPIO state from individual contacts.
    pub const fn from_paddles(dit: bool, dah: bool) -> Self {
        let mut bits = 0;
        if dit {
            bits |= Self::DIT;
        }
        if dah {
            bits |= Self::DAH;
        }
        Self(bits)
    }

    /// Get raw bits value
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if DIT paddle is pressed
    pub const fn dit(&self) -> bool {
        (self.0 & Self::DIT) != 0
    }

    /// Check if DAH paddle is pressed
    pub const fn dah(&self) -> bool {
        (self.0 & Self::DAH) != 0
    }

    /// Check if no paddles are pressed (idle)
    pub const fn is_idle(&self) -> bool {
        self.0 == 0
    }

    /// Check if both paddles are pressed (squeeze)
    pub const fn both(&self) -> bool {
        (self.0 & Self::BOTH.0) == Self::BOTH.0
    }

    /// Return a copy with the DIT contact set.
    pub const fn with_dit(self, pressed: bool) -> Self {
        if pressed {
            Self(self.0 | Self::DIT)
        } else {
            Self(self.0 & !Self::DIT)
        }
    }

    /// Return a copy with the DAH contact set.
    pub const fn with_dah(self, pressed: bool) -> Self {
        if pressed {
            Self(self.0 | Self::DAH)
        } else {
            Self(self.0 & !Self::DAH)
        }
    }

    /// Set DIT contact in place.
    pub fn set_dit(&mut self, pressed: bool) {
        *self = self.with_dit(pressed);
    }

    /// Set DAH contact in place.
    pub fn set_dah(&mut self, pressed: bool) {
        *self = self.with_dah(pressed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpio_state_size() {
        assert_eq!(core::mem::size_of::<GpioState>(), 1);
    }

    #[test]
    fn test_gpio_state_dit() {
        let dit = GpioState::from_bits(GpioState::DIT);
        assert!(dit.dit());
        assert!(!dit.dah());
        assert!(!dit.is_idle());
        assert!(!dit.both());
    }

    #[test]
    fn test_gpio_state_both() {
        let both = GpioState::from_paddles(true, true);
        assert_eq!(both, GpioState::BOTH);
        assert!(both.both());
        assert!(!both.is_idle());
    }

    #[test]
    fn test_reserved_bits_dropped() {
        assert_eq!(GpioState::from_bits(0xFC), GpioState::IDLE);
        assert_eq!(GpioState::from_bits(0xFF), GpioState::BOTH);
    }

    #[test]
    fn test_setters() {
        let mut gpio = GpioState::IDLE;
        gpio.set_dah(true);
        assert!(gpio.dah() && !gpio.dit());
        gpio.set_dit(true);
        assert!(gpio.both());
        gpio.set_dah(false);
        assert_eq!(gpio, GpioState::from_bits(GpioState::DIT));
    }
}

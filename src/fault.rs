//! Fault state for the real-time loop.
//!
//! The RT thread never returns errors: anomalies it cannot correct (a tick
//! that ran late, a clock that went backwards) are recorded here and polled
//! by the diagnostics side.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Why the fault flag was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultCode {
    /// No fault (normal operation).
    None = 0,

    /// Tick work or scheduling exceeded one tick period.
    /// Data: lateness in µs.
    TickOverrun = 1,

    /// Clock returned an earlier timestamp than the previous tick.
    /// Data: regression in µs.
    ClockBackwards = 2,

    /// GPIO or peripheral error.
    HardwareFault = 3,
}

impl FaultCode {
    /// Convert from raw u8 value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => FaultCode::TickOverrun,
            2 => FaultCode::ClockBackwards,
            3 => FaultCode::HardwareFault,
            _ => FaultCode::None,
        }
    }
}

/// Thread-safe fault state.
///
/// Written by the RT thread, read by anyone.
///
/// # Usage
///
/// ```
/// use cw_keyer_core::fault::{FaultCode, FaultState};
///
/// static FAULT: FaultState = FaultState::new();
///
/// // RT thread: tick ran 120 µs late
/// FAULT.set(FaultCode::TickOverrun, 120);
///
/// // Diagnostics
/// if FAULT.is_active() {
///     assert_eq!(FAULT.code(), FaultCode::TickOverrun);
///     FAULT.clear();
/// }
/// ```
pub struct FaultState {
    active: AtomicBool,
    code: AtomicU8,
    /// Meaning depends on the code.
    data: AtomicU32,
    /// Total since boot, never cleared.
    count: AtomicU32,
}

impl FaultState {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            code: AtomicU8::new(0),
            data: AtomicU32::new(0),
            count: AtomicU32::new(0),
        }
    }

    /// Raise the fault with `code` and `data`, counting it.
    ///
    /// The last fault wins if several are raised before a clear.
    #[inline]
    pub fn set(&self, code: FaultCode, data: u32) {
        self.code.store(code as u8, Ordering::Relaxed);
        self.data.store(data, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Last fault code (meaningful only while active).
    #[inline]
    pub fn code(&self) -> FaultCode {
        FaultCode::from_u8(self.code.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn data(&self) -> u32 {
        self.data.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Acknowledge the fault. The counter is kept.
    #[inline]
    pub fn clear(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Consistent-enough view for a diagnostics display.
    pub fn snapshot(&self) -> FaultSnapshot {
        let active = self.is_active();
        FaultSnapshot {
            active,
            code: self.code(),
            data: self.data(),
            count: self.count(),
        }
    }
}

impl Default for FaultState {
    fn default() -> Self {
        Self::new()
    }
}

/// Fault state at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub active: bool,
    pub code: FaultCode,
    pub data: u32,
    pub count: u32,
}

//! Module: config
//!
//! Purpose: Keyer configuration record shared between the RT thread and
//! configuration writers (console, web UI, presets).
//!
//! Architecture:
//! - Every parameter is an independent atomic (lock-free, field-granular)
//! - Writers validate, store, then bump `generation` with Release
//! - The RT thread compares `generation` (Acquire) against its cached value
//!   and only re-reads the fields when it changed
//!
//! Safety: RT-safe. All access via atomics, no locks.

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

/// Iambic keyer mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum IambicMode {
    /// Mode A: no queued element once both paddles are released.
    ModeA = 0,
    /// Mode B: a memorized element is still sent after release.
    #[default]
    ModeB = 1,
}

impl IambicMode {
    /// Convert from raw value. Unknown values map to the default.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => IambicMode::ModeA,
            _ => IambicMode::ModeB,
        }
    }
}

/// Which paddles may be memorized while an element is being sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryMode {
    /// No memory: squeeze must be held continuously.
    None = 0,
    /// Remember the dot paddle only.
    DotOnly = 1,
    /// Remember the dah paddle only.
    DahOnly = 2,
    /// Remember both paddles (full iambic).
    #[default]
    DotAndDah = 3,
}

impl MemoryMode {
    /// Convert from raw value. Unknown values map to the default.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => MemoryMode::None,
            1 => MemoryMode::DotOnly,
            2 => MemoryMode::DahOnly,
            _ => MemoryMode::DotAndDah,
        }
    }

    /// Dit memorization allowed.
    #[inline]
    pub const fn dit_enabled(self) -> bool {
        matches!(self, MemoryMode::DotOnly | MemoryMode::DotAndDah)
    }

    /// Dah memorization allowed.
    #[inline]
    pub const fn dah_enabled(self) -> bool {
        matches!(self, MemoryMode::DahOnly | MemoryMode::DotAndDah)
    }
}

/// Squeeze detection policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SqueezeMode {
    /// A squeeze only counts if seen inside the memory window of each element.
    #[default]
    LatchOff = 0,
    /// Alternate for as long as both paddles stay closed.
    LatchOn = 1,
}

impl SqueezeMode {
    /// Convert from raw value. Unknown values map to the default.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => SqueezeMode::LatchOn,
            _ => SqueezeMode::LatchOff,
        }
    }
}

/// Element sent first when both paddles close on the same tick from idle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TieBreak {
    #[default]
    DitFirst = 0,
    DahFirst = 1,
}

impl TieBreak {
    /// Convert from raw value. Unknown values map to the default.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => TieBreak::DahFirst,
            _ => TieBreak::DitFirst,
        }
    }
}

/// Parameter ranges (inclusive).
pub mod limits {
    pub const WPM: (u16, u16) = (5, 100);
    pub const WEIGHT: (u8, u8) = (33, 67);
    pub const WINDOW_PCT: (u8, u8) = (0, 100);
    pub const TICK_RATE_HZ: (u32, u32) = (1_000, 10_000);
    pub const GPIO: (u8, u8) = (0, 45);
}

/// Configuration rejected at the boundary. Never reaches the RT thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{param} = {value} out of range {min}..={max}")]
    OutOfRange {
        param: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("memory window start {start}% is after end {end}%")]
    InvalidWindow { start: u8, end: u8 },
}

fn check_range<T: Into<u32> + Copy>(
    param: &'static str,
    value: T,
    (min, max): (T, T),
) -> Result<(), ConfigError> {
    let (value, min, max) = (value.into(), min.into(), max.into());
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { param, value, min, max });
    }
    Ok(())
}

/// Plain copy of the keying parameters, as seen by the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IambicConfig {
    pub wpm: u16,
    pub iambic_mode: IambicMode,
    pub memory_mode: MemoryMode,
    pub squeeze_mode: SqueezeMode,
    /// Dah weighting, 50 = nominal 3:1.
    pub weight: u8,
    pub mem_window_start_pct: u8,
    pub mem_window_end_pct: u8,
    pub tick_rate_hz: u32,
    pub tie_break: TieBreak,
}

impl Default for IambicConfig {
    fn default() -> Self {
        Self {
            wpm: 25,
            iambic_mode: IambicMode::ModeB,
            memory_mode: MemoryMode::DotAndDah,
            squeeze_mode: SqueezeMode::LatchOff,
            weight: 50,
            mem_window_start_pct: 0,
            mem_window_end_pct: 100,
            tick_rate_hz: 10_000,
            tie_break: TieBreak::DitFirst,
        }
    }
}

impl IambicConfig {
    /// Default configuration at the given speed.
    pub fn with_wpm(wpm: u16) -> Self {
        Self {
            wpm,
            ..Default::default()
        }
    }

    /// Check every parameter against its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("wpm", self.wpm, limits::WPM)?;
        check_range("weight", self.weight, limits::WEIGHT)?;
        check_range("mem_window_start_pct", self.mem_window_start_pct, limits::WINDOW_PCT)?;
        check_range("mem_window_end_pct", self.mem_window_end_pct, limits::WINDOW_PCT)?;
        check_range("tick_rate_hz", self.tick_rate_hz, limits::TICK_RATE_HZ)?;
        if self.mem_window_start_pct > self.mem_window_end_pct {
            return Err(ConfigError::InvalidWindow {
                start: self.mem_window_start_pct,
                end: self.mem_window_end_pct,
            });
        }
        Ok(())
    }
}

/// GPIO assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpioAssignment {
    pub dit: u8,
    pub dah: u8,
    pub tx: u8,
}

#[inline]
const fn pack_window(start_pct: u8, end_pct: u8) -> u16 {
    u16::from_le_bytes([start_pct, end_pct])
}

/// Lock-free keyer configuration.
///
/// Field-granular atomics plus a generation counter. Writers go through the
/// validating setters; the RT thread only ever reads.
pub struct KeyerConfig {
    wpm: AtomicU16,
    iambic_mode: AtomicU8,
    memory_mode: AtomicU8,
    squeeze_mode: AtomicU8,
    weight: AtomicU8,
    /// Start in the low byte, end in the high byte: both edges change in
    /// one store, so start ≤ end holds for every reader.
    mem_window: AtomicU16,
    tick_rate_hz: AtomicU32,
    tie_break: AtomicU8,
    gpio_dit: AtomicU8,
    gpio_dah: AtomicU8,
    gpio_tx: AtomicU8,
    generation: AtomicU16,
}

/// Global configuration instance.
pub static CONFIG: KeyerConfig = KeyerConfig::new();

impl KeyerConfig {
    /// Create a record holding the default values, generation 0.
    pub const fn new() -> Self {
        Self {
            wpm: AtomicU16::new(25),
            iambic_mode: AtomicU8::new(IambicMode::ModeB as u8),
            memory_mode: AtomicU8::new(MemoryMode::DotAndDah as u8),
            squeeze_mode: AtomicU8::new(SqueezeMode::LatchOff as u8),
            weight: AtomicU8::new(50),
            mem_window: AtomicU16::new(pack_window(0, 100)),
            tick_rate_hz: AtomicU32::new(10_000),
            tie_break: AtomicU8::new(TieBreak::DitFirst as u8),
            gpio_dit: AtomicU8::new(5),
            gpio_dah: AtomicU8::new(4),
            gpio_tx: AtomicU8::new(6),
            generation: AtomicU16::new(0),
        }
    }

    /// Current generation. Changes after every successful write.
    #[inline]
    pub fn generation(&self) -> u16 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Read all keying parameters.
    ///
    /// Fields are read independently; a writer racing with this call can
    /// produce a mix of old and new values, which is why callers cache by
    /// generation and re-read when it moves again.
    pub fn snapshot(&self) -> IambicConfig {
        let (mem_window_start_pct, mem_window_end_pct) = self.mem_window();
        IambicConfig {
            wpm: self.wpm.load(Ordering::Relaxed),
            iambic_mode: IambicMode::from_u8(self.iambic_mode.load(Ordering::Relaxed)),
            memory_mode: MemoryMode::from_u8(self.memory_mode.load(Ordering::Relaxed)),
            squeeze_mode: SqueezeMode::from_u8(self.squeeze_mode.load(Ordering::Relaxed)),
            weight: self.weight.load(Ordering::Relaxed),
            mem_window_start_pct,
            mem_window_end_pct,
            tick_rate_hz: self.tick_rate_hz.load(Ordering::Relaxed),
            tie_break: TieBreak::from_u8(self.tie_break.load(Ordering::Relaxed)),
        }
    }

    /// Replace all keying parameters at once (single generation bump).
    pub fn apply(&self, cfg: &IambicConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        self.wpm.store(cfg.wpm, Ordering::Relaxed);
        self.iambic_mode.store(cfg.iambic_mode as u8, Ordering::Relaxed);
        self.memory_mode.store(cfg.memory_mode as u8, Ordering::Relaxed);
        self.squeeze_mode.store(cfg.squeeze_mode as u8, Ordering::Relaxed);
        self.weight.store(cfg.weight, Ordering::Relaxed);
        self.mem_window.store(
            pack_window(cfg.mem_window_start_pct, cfg.mem_window_end_pct),
            Ordering::Relaxed,
        );
        self.tick_rate_hz.store(cfg.tick_rate_hz, Ordering::Relaxed);
        self.tie_break.store(cfg.tie_break as u8, Ordering::Relaxed);
        self.bump_generation();
        log::info!(
            "config: applied wpm={} mode={:?} memory={:?} squeeze={:?} gen={}",
            cfg.wpm,
            cfg.iambic_mode,
            cfg.memory_mode,
            cfg.squeeze_mode,
            self.generation()
        );
        Ok(())
    }

    pub fn wpm(&self) -> u16 {
        self.wpm.load(Ordering::Relaxed)
    }

    pub fn set_wpm(&self, wpm: u16) -> Result<(), ConfigError> {
        check_range("wpm", wpm, limits::WPM)?;
        self.wpm.store(wpm, Ordering::Relaxed);
        self.bump_generation();
        Ok(())
    }

    pub fn iambic_mode(&self) -> IambicMode {
        IambicMode::from_u8(self.iambic_mode.load(Ordering::Relaxed))
    }

    pub fn set_iambic_mode(&self, mode: IambicMode) {
        self.iambic_mode.store(mode as u8, Ordering::Relaxed);
        self.bump_generation();
    }

    pub fn memory_mode(&self) -> MemoryMode {
        MemoryMode::from_u8(self.memory_mode.load(Ordering::Relaxed))
    }

    pub fn set_memory_mode(&self, mode: MemoryMode) {
        self.memory_mode.store(mode as u8, Ordering::Relaxed);
        self.bump_generation();
    }

    pub fn squeeze_mode(&self) -> SqueezeMode {
        SqueezeMode::from_u8(self.squeeze_mode.load(Ordering::Relaxed))
    }

    pub fn set_squeeze_mode(&self, mode: SqueezeMode) {
        self.squeeze_mode.store(mode as u8, Ordering::Relaxed);
        self.bump_generation();
    }

    pub fn weight(&self) -> u8 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u8) -> Result<(), ConfigError> {
        check_range("weight", weight, limits::WEIGHT)?;
        self.weight.store(weight, Ordering::Relaxed);
        self.bump_generation();
        Ok(())
    }

    /// Memory window as (start, end) percentages.
    pub fn mem_window(&self) -> (u8, u8) {
        let [start, end] = self.mem_window.load(Ordering::Relaxed).to_le_bytes();
        (start, end)
    }

    /// Set both window edges in a single store.
    pub fn set_mem_window(&self, start_pct: u8, end_pct: u8) -> Result<(), ConfigError> {
        check_range("mem_window_start_pct", start_pct, limits::WINDOW_PCT)?;
        check_range("mem_window_end_pct", end_pct, limits::WINDOW_PCT)?;
        if start_pct > end_pct {
            return Err(ConfigError::InvalidWindow {
                start: start_pct,
                end: end_pct,
            });
        }
        self.mem_window
            .store(pack_window(start_pct, end_pct), Ordering::Relaxed);
        self.bump_generation();
        Ok(())
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz.load(Ordering::Relaxed)
    }

    pub fn set_tick_rate_hz(&self, hz: u32) -> Result<(), ConfigError> {
        check_range("tick_rate_hz", hz, limits::TICK_RATE_HZ)?;
        self.tick_rate_hz.store(hz, Ordering::Relaxed);
        self.bump_generation();
        Ok(())
    }

    pub fn tie_break(&self) -> TieBreak {
        TieBreak::from_u8(self.tie_break.load(Ordering::Relaxed))
    }

    pub fn set_tie_break(&self, tie_break: TieBreak) {
        self.tie_break.store(tie_break as u8, Ordering::Relaxed);
        self.bump_generation();
    }

    pub fn gpio(&self) -> GpioAssignment {
        GpioAssignment {
            dit: self.gpio_dit.load(Ordering::Relaxed),
            dah: self.gpio_dah.load(Ordering::Relaxed),
            tx: self.gpio_tx.load(Ordering::Relaxed),
        }
    }

    pub fn set_gpio(&self, gpio: GpioAssignment) -> Result<(), ConfigError> {
        check_range("gpio_dit", gpio.dit, limits::GPIO)?;
        check_range("gpio_dah", gpio.dah, limits::GPIO)?;
        check_range("gpio_tx", gpio.tx, limits::GPIO)?;
        self.gpio_dit.store(gpio.dit, Ordering::Relaxed);
        self.gpio_dah.store(gpio.dah, Ordering::Relaxed);
        self.gpio_tx.store(gpio.tx, Ordering::Relaxed);
        self.bump_generation();
        Ok(())
    }
}

impl Default for KeyerConfig {
    fn default() -> Self {
        Self::new()
    }
}

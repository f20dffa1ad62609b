//! Iambic keyer finite state machine.
//!
//! Pure logic, no hardware dependencies. Consumes one paddle sample per tick,
//! produces at most one keying transition per tick. Fully testable on host.
//!
//! # Iambic Modes
//!
//! - **Mode A**: Once both paddles are released, stops after the current
//!   element and its trailing space, whatever was memorized.
//! - **Mode B**: A memorized (queued) element is still sent after release.
//!
//! # Memory Window
//!
//! ```text
//!   |<-------- Phase Duration -------->|
//!   0%        S%                E%    100%
//!   |---------|-----------------|------|
//!   | IGNORED |    MEMORIZED    |IGNORD|
//! ```
//!
//! Only the element opposite to the one being sent is memorized, during both
//! the MARK and the SPACE phase. A closure outside the window still counts
//! as a held paddle when the SPACE completes.
//!
//! # Timing
//!
//! Everything is counted in ticks. The element started on tick `t` keys on
//! at `t`, off at `t + mark`, and the next element may start at
//! `t + mark + space`.

use crate::config::{IambicConfig, IambicMode, KeyerConfig, SqueezeMode, TieBreak};
use crate::sample::GpioState;

/// Keying element type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Element {
    Dit = 0,
    Dah = 1,
}

impl Element {
    /// Get the opposite element.
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Element::Dit => Element::Dah,
            Element::Dah => Element::Dit,
        }
    }

    /// Convert from raw value (0 = Dit, anything else = Dah).
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Element::Dit,
            _ => Element::Dah,
        }
    }

    /// Is this element's paddle closed in `gpio`?
    #[inline]
    pub const fn is_held(self, gpio: GpioState) -> bool {
        match self {
            Element::Dit => gpio.dit(),
            Element::Dah => gpio.dah(),
        }
    }
}

/// Phase of the element being sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Key down.
    Mark,
    /// Inter-element space, key up.
    Space,
}

/// Observable FSM state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyerState {
    Idle,
    Sending { element: Element, phase: Phase },
}

/// Durations in ticks, derived from the configuration.
///
/// Computed once per configuration generation, never per tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementTiming {
    pub dit_ticks: u32,
    pub dah_ticks: u32,
    /// Inter-element space, one dit, unaffected by weight.
    pub space_ticks: u32,
    pub tick_rate_hz: u32,
}

impl ElementTiming {
    /// PARIS timing: dit = round(tick_rate * 1.2 / wpm) ticks.
    /// Dah = round(3 * dit * weight / 50): weight 50 gives exactly 3:1.
    pub fn from_config(config: &IambicConfig) -> Self {
        let wpm = u32::from(config.wpm.max(1));
        let hz = config.tick_rate_hz.max(1);
        let dit_ticks = ((hz * 12 + wpm * 5) / (wpm * 10)).max(1);
        let weight = u32::from(config.weight);
        let dah_ticks = ((3 * dit_ticks * weight + 25) / 50).max(1);

        Self {
            dit_ticks,
            dah_ticks,
            space_ticks: dit_ticks,
            tick_rate_hz: hz,
        }
    }

    /// MARK duration of an element.
    #[inline]
    pub fn mark_ticks(&self, element: Element) -> u32 {
        match element {
            Element::Dit => self.dit_ticks,
            Element::Dah => self.dah_ticks,
        }
    }

    /// Dit duration in microseconds.
    #[inline]
    pub fn dit_duration_us(&self) -> i64 {
        i64::from(self.dit_ticks) * 1_000_000 / i64::from(self.tick_rate_hz)
    }

    /// Tick period in microseconds.
    #[inline]
    pub fn tick_period_us(&self) -> i64 {
        1_000_000 / i64::from(self.tick_rate_hz)
    }
}

/// Keying transition produced by a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    KeyOn(Element),
    KeyOff(Element),
}

impl Transition {
    #[inline]
    pub fn element(&self) -> Element {
        match *self {
            Transition::KeyOn(e) | Transition::KeyOff(e) => e,
        }
    }

    #[inline]
    pub fn is_key_down(&self) -> bool {
        matches!(self, Transition::KeyOn(_))
    }
}

/// Internal notification produced by a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineEvent {
    /// Opposite element queued inside the memory window.
    MemoryArmed(Element),
}

/// Result of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickOutput {
    pub transition: Option<Transition>,
    pub event: Option<MachineEvent>,
}

/// Iambic keyer processor.
///
/// Owned exclusively by the RT thread. Other threads only see it through the
/// events it produces.
///
/// # Example
///
/// ```
/// use cw_keyer_core::config::IambicConfig;
/// use cw_keyer_core::iambic::{Element, IambicProcessor, Transition};
/// use cw_keyer_core::sample::GpioState;
///
/// let mut keyer = IambicProcessor::new(IambicConfig::with_wpm(25));
///
/// let mut gpio = GpioState::IDLE;
/// gpio.set_dit(true);
///
/// let out = keyer.tick(gpio);
/// assert_eq!(out.transition, Some(Transition::KeyOn(Element::Dit)));
/// ```
pub struct IambicProcessor {
    config: IambicConfig,
    timing: ElementTiming,
    /// Generation the cached config/timing were read at.
    config_gen: Option<u16>,

    state: KeyerState,
    /// Length of the current phase in ticks.
    phase_ticks: u32,
    /// Ticks left in the current phase.
    remaining: u32,
    last_element: Option<Element>,

    gpio: GpioState,
    /// Queued opposite element.
    memory: Option<Element>,
    /// Opposite paddle seen inside the window during this element.
    squeeze_in_window: bool,
}

impl IambicProcessor {
    /// Create a new processor with given configuration.
    pub fn new(config: IambicConfig) -> Self {
        Self {
            timing: ElementTiming::from_config(&config),
            config,
            config_gen: None,
            state: KeyerState::Idle,
            phase_ticks: 0,
            remaining: 0,
            last_element: None,
            gpio: GpioState::IDLE,
            memory: None,
            squeeze_in_window: false,
        }
    }

    /// Replace the configuration and recompute cached durations.
    ///
    /// A phase already in progress keeps its length; the new durations
    /// apply from the next phase.
    pub fn apply_config(&mut self, config: IambicConfig) {
        self.config = config;
        self.timing = ElementTiming::from_config(&config);
    }

    /// Re-read `shared` if its generation moved since the last sync.
    ///
    /// Returns `true` when the configuration was reloaded. The generation is
    /// loaded before the fields, so a write racing with this call is picked
    /// up again on the next sync.
    #[inline]
    pub fn sync_config(&mut self, shared: &KeyerConfig) -> bool {
        let generation = shared.generation();
        if self.config_gen == Some(generation) {
            return false;
        }
        self.apply_config(shared.snapshot());
        self.config_gen = Some(generation);
        true
    }

    /// Get current configuration.
    pub fn config(&self) -> &IambicConfig {
        &self.config
    }

    /// Cached durations.
    pub fn timing(&self) -> &ElementTiming {
        &self.timing
    }

    /// Current FSM state.
    pub fn state(&self) -> KeyerState {
        self.state
    }

    /// Check if key output is currently active.
    #[inline]
    pub fn is_key_down(&self) -> bool {
        matches!(
            self.state,
            KeyerState::Sending { phase: Phase::Mark, .. }
        )
    }

    /// Element currently queued in memory, if any.
    pub fn memory(&self) -> Option<Element> {
        self.memory
    }

    /// Reset FSM to idle state, key up, memory cleared.
    pub fn reset(&mut self) {
        self.state = KeyerState::Idle;
        self.phase_ticks = 0;
        self.remaining = 0;
        self.last_element = None;
        self.memory = None;
        self.squeeze_in_window = false;
    }

    /// Advance one tick with the current paddle sample.
    ///
    /// Never fails, never allocates: every input has a defined transition.
    #[inline]
    pub fn tick(&mut self, gpio: GpioState) -> TickOutput {
        self.gpio = gpio;
        let mut out = TickOutput::default();

        match self.state {
            KeyerState::Idle => {
                if let Some(element) = self.first_element() {
                    self.start_element(element);
                    out.transition = Some(Transition::KeyOn(element));
                }
            }
            KeyerState::Sending { element, phase } => {
                self.remaining = self.remaining.saturating_sub(1);
                // Completion tick is the 100% point of the phase
                let mut armed = self.sample_window(element);

                if self.remaining == 0 {
                    out.transition = match phase {
                        Phase::Mark => {
                            self.enter_space(element);
                            Some(Transition::KeyOff(element))
                        }
                        Phase::Space => self.finish_space(element),
                    };
                }

                if armed.is_some() && self.memory != armed {
                    // Queued and started on the same tick
                    armed = None;
                }
                out.event = armed.map(MachineEvent::MemoryArmed);
            }
        }

        // KeyOn tick is the 0% point of the new element
        if let Some(Transition::KeyOn(element)) = out.transition {
            if let Some(armed) = self.sample_window(element) {
                out.event = Some(MachineEvent::MemoryArmed(armed));
            }
        }

        out
    }

    // --- Private methods ---

    /// Element to start from IDLE, with the tie-break on a same-tick squeeze.
    fn first_element(&self) -> Option<Element> {
        match (self.gpio.dit(), self.gpio.dah()) {
            (true, true) => Some(match self.config.tie_break {
                TieBreak::DitFirst => Element::Dit,
                TieBreak::DahFirst => Element::Dah,
            }),
            (true, false) => Some(Element::Dit),
            (false, true) => Some(Element::Dah),
            (false, false) => None,
        }
    }

    /// Memory window test for the opposite paddle, at the current position
    /// in the phase: 0% on the phase's first tick, 100% on its last.
    ///
    /// Returns the element newly queued, if any.
    fn sample_window(&mut self, element: Element) -> Option<Element> {
        let opposite = element.opposite();
        if !opposite.is_held(self.gpio) {
            return None;
        }

        let elapsed = self.phase_ticks.saturating_sub(self.remaining);
        let progress_pct = elapsed * 100 / self.phase_ticks.max(1);
        if progress_pct < u32::from(self.config.mem_window_start_pct)
            || progress_pct > u32::from(self.config.mem_window_end_pct)
        {
            return None;
        }

        self.squeeze_in_window = true;

        let enabled = match opposite {
            Element::Dit => self.config.memory_mode.dit_enabled(),
            Element::Dah => self.config.memory_mode.dah_enabled(),
        };
        if enabled && self.memory.is_none() {
            self.memory = Some(opposite);
            return Some(opposite);
        }
        None
    }

    fn start_element(&mut self, element: Element) {
        let ticks = self.timing.mark_ticks(element);
        self.state = KeyerState::Sending {
            element,
            phase: Phase::Mark,
        };
        self.phase_ticks = ticks;
        self.remaining = ticks;
        self.squeeze_in_window = false;
    }

    fn enter_space(&mut self, element: Element) {
        self.state = KeyerState::Sending {
            element,
            phase: Phase::Space,
        };
        self.phase_ticks = self.timing.space_ticks;
        self.remaining = self.timing.space_ticks;
        self.last_element = Some(element);
    }

    /// SPACE complete: start the next element or go idle.
    fn finish_space(&mut self, element: Element) -> Option<Transition> {
        match self.next_element(element) {
            Some(next) => {
                self.start_element(next);
                Some(Transition::KeyOn(next))
            }
            None => {
                self.state = KeyerState::Idle;
                self.phase_ticks = 0;
                self.squeeze_in_window = false;
                None
            }
        }
    }

    fn next_element(&mut self, element: Element) -> Option<Element> {
        let (dit, dah) = (self.gpio.dit(), self.gpio.dah());

        // Both released
        if !dit && !dah {
            return match self.config.iambic_mode {
                IambicMode::ModeA => {
                    self.memory = None;
                    None
                }
                IambicMode::ModeB => self.memory.take(),
            };
        }

        // Queued element first
        if let Some(queued) = self.memory.take() {
            return Some(queued);
        }

        if dit && dah {
            let squeeze = match self.config.squeeze_mode {
                SqueezeMode::LatchOn => true,
                SqueezeMode::LatchOff => self.squeeze_in_window,
            };
            return Some(if squeeze { element.opposite() } else { element });
        }

        Some(if dit { Element::Dit } else { Element::Dah })
    }
}

impl Default for IambicProcessor {
    fn default() -> Self {
        Self::new(IambicConfig::default())
    }
}

//! Real-time keying loop glue.
//!
//! One [`KeyerCore::tick`] per clock tick, on the RT thread:
//!
//! ```text
//! KeyerConfig ──sync──┐
//!                     ▼
//! paddles ──▶ PaddleChange ──▶ IambicProcessor ──▶ KeyOn/KeyOff/MemoryArmed ──▶ TimingStream
//!                                    │                       │
//!                                    │                       └──▶ KeyingOutput (TX line)
//!                                    ▼
//!                               GapDetector ──▶ Gap(Character/Word) ──▶ TimingStream
//! ```
//!
//! Nothing here blocks or allocates. Anomalies go to [`FaultState`] and the
//! RT [`LogStream`], never to the caller.

use crate::clock::Clock;
use crate::config::KeyerConfig;
use crate::event::{EventKind, TimingEvent};
use crate::fault::{FaultCode, FaultState};
use crate::gap::GapDetector;
use crate::iambic::{IambicProcessor, KeyerState, MachineEvent, Phase, TickOutput, Transition};
use crate::logging::LogStream;
use crate::sample::GpioState;
use crate::stream::{TimingStream, DEFAULT_MAX_CONSUMERS, DEFAULT_STREAM_SIZE};
use crate::{rt_info, rt_warn};

/// Physical key line (TX relay, sidetone gate, ...).
pub trait KeyingOutput {
    fn set_key(&mut self, down: bool, timestamp_us: i64);
}

impl<F: FnMut(bool, i64)> KeyingOutput for F {
    #[inline]
    fn set_key(&mut self, down: bool, timestamp_us: i64) {
        self(down, timestamp_us)
    }
}

/// Per-tick pipeline: config sync, paddle sampling, FSM, gap detection,
/// event publication.
pub struct KeyerCore<'a, O: KeyingOutput, const N: usize = DEFAULT_STREAM_SIZE, const C: usize = DEFAULT_MAX_CONSUMERS> {
    iambic: IambicProcessor,
    gap: GapDetector,
    last_gpio: GpioState,
    last_now_us: Option<i64>,

    config: &'a KeyerConfig,
    stream: &'a TimingStream<N, C>,
    fault: &'a FaultState,
    log: &'a LogStream,
    output: O,
}

impl<'a, O: KeyingOutput, const N: usize, const C: usize> KeyerCore<'a, O, N, C> {
    /// Build the pipeline. The configuration is read on the first tick.
    pub fn new(
        config: &'a KeyerConfig,
        stream: &'a TimingStream<N, C>,
        fault: &'a FaultState,
        log: &'a LogStream,
        output: O,
    ) -> Self {
        let iambic = IambicProcessor::new(config.snapshot());
        let gap = GapDetector::new(iambic.timing().dit_ticks);
        Self {
            iambic,
            gap,
            last_gpio: GpioState::IDLE,
            last_now_us: None,
            config,
            stream,
            fault,
            log,
            output,
        }
    }

    /// Run one tick at `now_us` with the current paddle sample.
    pub fn tick(&mut self, now_us: i64, gpio: GpioState) -> TickOutput {
        let now_us = self.check_clock(now_us);

        if self.iambic.sync_config(self.config) {
            let cfg = *self.iambic.config();
            let timing = *self.iambic.timing();
            self.gap.set_dit_ticks(timing.dit_ticks);
            rt_info!(
                self.log,
                now_us,
                "config: {} wpm, {:?}, dit {} ticks @ {} Hz",
                cfg.wpm,
                cfg.iambic_mode,
                timing.dit_ticks,
                timing.tick_rate_hz
            );
        }

        if gpio != self.last_gpio {
            self.last_gpio = gpio;
            self.stream.push(TimingEvent::paddle(now_us, gpio));
        }

        let out = self.iambic.tick(gpio);

        if let Some(transition) = out.transition {
            self.publish(now_us, transition);
        }

        if let Some(MachineEvent::MemoryArmed(element)) = out.event {
            self.stream
                .push(TimingEvent::new(now_us, EventKind::MemoryArmed(element)));
        }

        if let Some(kind) = self.gap.tick(out.transition) {
            self.stream.push(TimingEvent::gap(now_us, kind));
        }

        out
    }

    /// Stop keying immediately: FSM idle, memory cleared, key up.
    pub fn reset(&mut self, now_us: i64) {
        let state = self.iambic.state();
        self.iambic.reset();
        self.gap.reset();

        if let KeyerState::Sending {
            element,
            phase: Phase::Mark,
        } = state
        {
            self.publish(now_us, Transition::KeyOff(element));
        }
    }

    pub fn iambic(&self) -> &IambicProcessor {
        &self.iambic
    }

    pub fn gap(&self) -> &GapDetector {
        &self.gap
    }

    #[inline]
    pub fn is_key_down(&self) -> bool {
        self.iambic.is_key_down()
    }

    /// Current tick rate, for the pacer.
    #[inline]
    pub fn tick_rate_hz(&self) -> u32 {
        self.iambic.timing().tick_rate_hz
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    fn publish(&mut self, now_us: i64, transition: Transition) {
        let event = match transition {
            Transition::KeyOn(element) => TimingEvent::key_on(now_us, element),
            Transition::KeyOff(element) => TimingEvent::key_off(now_us, element),
        };
        self.stream.push(event);
        self.output.set_key(transition.is_key_down(), now_us);
    }

    /// Timestamps published downstream never go backwards: a regression is
    /// flagged and the previous time reused.
    fn check_clock(&mut self, now_us: i64) -> i64 {
        let now_us = match self.last_now_us {
            Some(last) if now_us < last => {
                let regression = u32::try_from(last - now_us).unwrap_or(u32::MAX);
                self.fault.set(FaultCode::ClockBackwards, regression);
                rt_warn!(self.log, last, "clock went back {} us", regression);
                last
            }
            _ => now_us,
        };
        self.last_now_us = Some(now_us);
        now_us
    }
}

/// Fixed-rate tick scheduler.
///
/// Deadlines advance by exactly one period so short jitter does not
/// accumulate. A tick more than one period late raises
/// [`FaultCode::TickOverrun`] and the schedule restarts from now: missed
/// ticks are skipped, not replayed in a burst.
#[derive(Clone, Debug)]
pub struct TickPacer {
    tick_rate_hz: u32,
    period_us: i64,
    next_deadline_us: Option<i64>,
    late_ticks: u32,
}

impl TickPacer {
    pub fn new(tick_rate_hz: u32) -> Self {
        let tick_rate_hz = tick_rate_hz.max(1);
        Self {
            tick_rate_hz,
            period_us: 1_000_000 / i64::from(tick_rate_hz),
            next_deadline_us: None,
            late_ticks: 0,
        }
    }

    /// Follow a tick rate change from the next deadline on.
    pub fn set_rate(&mut self, tick_rate_hz: u32) {
        let tick_rate_hz = tick_rate_hz.max(1);
        if tick_rate_hz != self.tick_rate_hz {
            self.tick_rate_hz = tick_rate_hz;
            self.period_us = 1_000_000 / i64::from(tick_rate_hz);
        }
    }

    #[inline]
    pub fn period_us(&self) -> i64 {
        self.period_us
    }

    /// Ticks that started more than one period late.
    #[inline]
    pub fn late_ticks(&self) -> u32 {
        self.late_ticks
    }

    /// Sleep until the next deadline and return the tick timestamp.
    pub fn wait<K: Clock>(&mut self, clock: &K, fault: &FaultState) -> i64 {
        let deadline = match self.next_deadline_us {
            Some(deadline) => deadline,
            None => clock.now_us(),
        };
        clock.sleep_until(deadline);

        let now = clock.now_us();
        let lateness = now - deadline;
        if lateness > self.period_us {
            self.late_ticks = self.late_ticks.saturating_add(1);
            fault.set(
                FaultCode::TickOverrun,
                u32::try_from(lateness).unwrap_or(u32::MAX),
            );
            self.next_deadline_us = Some(now + self.period_us);
        } else {
            self.next_deadline_us = Some(deadline + self.period_us);
        }
        now
    }
}

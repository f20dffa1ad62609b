//! Keyer entry point.
//!
//! - ESP-IDF: paddles on GPIO (active low, pulled up), TX line on GPIO,
//!   keying loop on its own thread, event monitor and log forwarding in the
//!   background.
//! - Host: same pipeline driven by a scripted paddle sequence, for bench
//!   runs (`keyer [wpm]`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use cw_keyer_core::clock::Clock;
use cw_keyer_core::logging::forward_to_log;
use cw_keyer_core::{
    FaultState, GpioState, KeyerCore, StreamConsumer, TickPacer, TimingStream, BG_LOG_STREAM,
    CONFIG, RT_LOG_STREAM,
};

static STREAM: TimingStream = TimingStream::new();
static FAULT: FaultState = FaultState::new();
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Drain the event stream and the RT logs until shutdown.
fn event_monitor(mut monitor: StreamConsumer<'static>) {
    loop {
        let finished = SHUTDOWN.load(Ordering::Acquire);

        for event in monitor.drain() {
            log::info!(target: "events", "{:>10} us  {}", event.timestamp_us, event.kind);
        }
        forward_to_log(&RT_LOG_STREAM);
        forward_to_log(&BG_LOG_STREAM);

        if FAULT.is_active() {
            let fault = FAULT.snapshot();
            log::warn!("fault {:?} (data {}, total {})", fault.code, fault.data, fault.count);
            FAULT.clear();
        }

        if finished {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    let lost = monitor.overrun_count();
    if lost > 0 {
        log::warn!("event monitor lost {} events", lost);
    }
}

/// One keying loop iteration per tick until `keep_going` says stop.
fn keying_loop<K, F, S, O>(clock: &K, mut read_paddles: F, mut keep_going: S, output: O)
where
    K: Clock,
    F: FnMut(i64) -> GpioState,
    S: FnMut(i64) -> bool,
    O: cw_keyer_core::KeyingOutput,
{
    let mut core = KeyerCore::new(&CONFIG, &STREAM, &FAULT, &RT_LOG_STREAM, output);
    let mut pacer = TickPacer::new(core.tick_rate_hz());

    loop {
        let now = pacer.wait(clock, &FAULT);
        if !keep_going(now) {
            break;
        }
        core.tick(now, read_paddles(now));
        pacer.set_rate(core.tick_rate_hz());
    }

    core.reset(clock.now_us());
    if pacer.late_ticks() > 0 {
        cw_keyer_core::rt_warn!(
            RT_LOG_STREAM,
            clock.now_us(),
            "{} late ticks",
            pacer.late_ticks()
        );
    }
}

#[cfg(target_os = "espidf")]
mod firmware {
    use cw_keyer_core::config::GpioAssignment;
    use cw_keyer_core::GpioState;
    use esp_idf_svc::sys::{self, esp, EspError};

    /// Paddle inputs with pull-ups, TX output driven low.
    pub fn init_gpio(pins: &GpioAssignment) -> Result<(), EspError> {
        // SAFETY: plain driver calls on pins validated by KeyerConfig.
        unsafe {
            for pin in [pins.dit, pins.dah] {
                let pin = i32::from(pin);
                esp!(sys::gpio_reset_pin(pin))?;
                esp!(sys::gpio_set_direction(pin, sys::gpio_mode_t_GPIO_MODE_INPUT))?;
                esp!(sys::gpio_set_pull_mode(pin, sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY))?;
            }
            let tx = i32::from(pins.tx);
            esp!(sys::gpio_reset_pin(tx))?;
            esp!(sys::gpio_set_direction(tx, sys::gpio_mode_t_GPIO_MODE_OUTPUT))?;
            esp!(sys::gpio_set_level(tx, 0))?;
        }
        Ok(())
    }

    /// Contacts close to ground.
    #[inline]
    pub fn read_paddles(pins: &GpioAssignment) -> GpioState {
        // SAFETY: reading a configured input pin.
        unsafe {
            GpioState::from_paddles(
                sys::gpio_get_level(i32::from(pins.dit)) == 0,
                sys::gpio_get_level(i32::from(pins.dah)) == 0,
            )
        }
    }

    #[inline]
    pub fn set_tx(pin: u8, down: bool) {
        // SAFETY: writing a configured output pin.
        unsafe {
            sys::gpio_set_level(i32::from(pin), u32::from(down));
        }
    }
}

#[cfg(target_os = "espidf")]
fn main() {
    use cw_keyer_core::clock::EspClock;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("{}", env!("VERSION_STRING"));

    let pins = CONFIG.gpio();
    if let Err(e) = firmware::init_gpio(&pins) {
        log::error!("GPIO init failed: {}", e);
        FAULT.set(cw_keyer_core::FaultCode::HardwareFault, e.code() as u32);
        return;
    }

    let monitor = match StreamConsumer::new(&STREAM) {
        Ok(monitor) => monitor,
        Err(e) => {
            log::error!("event monitor: {}", e);
            return;
        }
    };
    let spawned = thread::Builder::new()
        .name("monitor".into())
        .stack_size(8 * 1024)
        .spawn(move || event_monitor(monitor));
    if let Err(e) = spawned {
        log::error!("monitor thread: {}", e);
        return;
    }

    // Keying loop never returns on the firmware. It spins between ticks,
    // so the task watchdog must not watch this core's idle task.
    keying_loop(
        &EspClock,
        |_| firmware::read_paddles(&pins),
        |_| true,
        |down: bool, _: i64| firmware::set_tx(pins.tx, down),
    );
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    use cw_keyer_core::clock::StdClock;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("{}", env!("VERSION_STRING"));

    let wpm = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(20);
    // Host sleep granularity: 1 kHz ticks
    if let Err(e) = CONFIG.set_wpm(wpm).and_then(|()| CONFIG.set_tick_rate_hz(1_000)) {
        log::error!("{}", e);
        std::process::exit(2);
    }

    let monitor = match StreamConsumer::new(&STREAM) {
        Ok(monitor) => monitor,
        Err(e) => {
            log::error!("event monitor: {}", e);
            std::process::exit(1);
        }
    };
    let monitor = thread::spawn(move || event_monitor(monitor));

    let keyer = thread::Builder::new().name("keyer".into()).spawn(|| {
        let clock = StdClock::new();
        let script = PaddleScript::new(&SCRIPT);
        keying_loop(
            &clock,
            |now| script.at(now),
            |now| now < script.end_us(),
            |down: bool, ts: i64| {
                cw_keyer_core::rt_debug!(RT_LOG_STREAM, ts, "TX {}", if down { "down" } else { "up" });
            },
        );
    });

    match keyer {
        Ok(handle) => {
            if handle.join().is_err() {
                log::error!("keying thread panicked");
            }
        }
        Err(e) => log::error!("keying thread: {}", e),
    }

    SHUTDOWN.store(true, Ordering::Release);
    if monitor.join().is_err() {
        log::error!("monitor thread panicked");
    }
}

/// Bench sequence: (dit, dah, milliseconds held).
#[cfg(not(target_os = "espidf"))]
const SCRIPT: [(bool, bool, u32); 7] = [
    // C: squeeze starting on dah
    (false, true, 20),
    (true, true, 220),
    (false, false, 500),
    // Q: dah held, dit tapped
    (false, true, 250),
    (true, true, 60),
    (false, true, 100),
    (false, false, 900),
];

#[cfg(not(target_os = "espidf"))]
struct PaddleScript<'a> {
    steps: &'a [(bool, bool, u32)],
    end_us: i64,
    origin: core::cell::Cell<Option<i64>>,
}

#[cfg(not(target_os = "espidf"))]
impl<'a> PaddleScript<'a> {
    fn new(steps: &'a [(bool, bool, u32)]) -> Self {
        let end_us = steps.iter().map(|&(_, _, ms)| i64::from(ms) * 1_000).sum();
        Self {
            steps,
            end_us,
            origin: core::cell::Cell::new(None),
        }
    }

    /// Script length, relative to the first sample.
    fn end_us(&self) -> i64 {
        self.origin.get().unwrap_or(0) + self.end_us
    }

    /// Paddle state at `now_us`, the first call anchoring the script.
    fn at(&self, now_us: i64) -> GpioState {
        let origin = self.origin.get().unwrap_or(now_us);
        self.origin.set(Some(origin));

        let mut offset = now_us - origin;
        for &(dit, dah, ms) in self.steps {
            let span = i64::from(ms) * 1_000;
            if offset < span {
                return GpioState::from_paddles(dit, dah);
            }
            offset -= span;
        }
        GpioState::IDLE
    }
}

//! Monotonic microsecond time sources for the keying loop.

/// Monotonic clock in microseconds.
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin. Never decreases on a
    /// correct implementation.
    fn now_us(&self) -> i64;

    /// Wait until `deadline_us`. Returns immediately if it already passed.
    ///
    /// Default: spin. Fine for sub-tick waits on a dedicated core.
    fn sleep_until(&self, deadline_us: i64) {
        while self.now_us() < deadline_us {
            core::hint::spin_loop();
        }
    }
}

/// Host clock backed by `std::time::Instant`.
#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_us(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    fn sleep_until(&self, deadline_us: i64) {
        let remaining = deadline_us - self.now_us();
        if remaining > 0 {
            std::thread::sleep(std::time::Duration::from_micros(remaining as u64));
        }
    }
}

/// ESP-IDF high resolution timer (`esp_timer_get_time`).
#[cfg(target_os = "espidf")]
#[derive(Clone, Copy, Debug, Default)]
pub struct EspClock;

#[cfg(target_os = "espidf")]
impl Clock for EspClock {
    #[inline]
    fn now_us(&self) -> i64 {
        // SAFETY: esp_timer is started by the IDF before app_main.
        unsafe { esp_idf_svc::sys::esp_timer_get_time() }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_std_clock_is_monotonic() {
        let clock = StdClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(a >= 0);
        assert!(b >= a);
    }

    #[test]
    fn test_sleep_until_reaches_deadline() {
        let clock = StdClock::new();
        let deadline = clock.now_us() + 2_000;
        clock.sleep_until(deadline);
        assert!(clock.now_us() >= deadline);
    }

    #[test]
    fn test_sleep_until_past_deadline_returns() {
        let clock = StdClock::new();
        clock.sleep_until(-1);
    }
}

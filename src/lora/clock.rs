//! Monotonic time source for radio timing.
//!
//! All state machine timeouts and the transmit scheduler work against a
//! wrapping 32-bit microsecond counter (about 71 minutes per lap), the
//! same width the radio timestamps in downlink requests use. Stored
//! timestamps are re-baselined when the counter wraps; durations are
//! always computed with wrapping subtraction.

use std::time::Instant;

/// Monotonic clock with microsecond resolution.
pub trait MonotonicClock {
    /// Microseconds since an arbitrary epoch, wrapping at 2^32.
    fn now_us(&self) -> u32;

    /// Whole seconds since the same epoch (non-wrapping).
    fn now_secs(&self) -> u64;

    /// Fine busy-wait. Used for the sub-16 ms transmit alignment and
    /// the RSSI settle pause, where scheduler jitter is unacceptable.
    fn delay_us(&self, us: u32);

    /// Coarse yielding delay. Lets the scheduler run while waiting.
    fn delay_ms(&self, ms: u32);
}

/// Host clock backed by `std::time::Instant`.
#[derive(Debug)]
pub struct HostClock {
    start: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for HostClock {
    fn now_us(&self) -> u32 {
        self.start.elapsed().as_micros() as u32
    }

    fn now_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    fn delay_us(&self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}

/// ESP32 clock backed by the high-resolution timer.
#[cfg(feature = "esp32")]
#[derive(Debug, Default)]
pub struct EspClock;

#[cfg(feature = "esp32")]
impl EspClock {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "esp32")]
impl MonotonicClock for EspClock {
    fn now_us(&self) -> u32 {
        // esp_timer_get_time() is a monotonic 64-bit microsecond counter.
        unsafe { esp_idf_sys::esp_timer_get_time() as u32 }
    }

    fn now_secs(&self) -> u64 {
        (unsafe { esp_idf_sys::esp_timer_get_time() } / 1_000_000) as u64
    }

    fn delay_us(&self, us: u32) {
        esp_idf_hal::delay::Ets::delay_us(us);
    }

    fn delay_ms(&self, ms: u32) {
        // FreeRtos delay yields to other tasks, keeping the watchdog fed.
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }
}

/// Manually stepped clock for tests.
///
/// `delay_*` advances the simulated time, so scheduler and timeout logic
/// run instantly and deterministically.
#[cfg(test)]
pub struct TestClock {
    now_us: std::cell::Cell<u32>,
}

#[cfg(test)]
impl TestClock {
    pub fn new() -> Self {
        Self {
            now_us: std::cell::Cell::new(0),
        }
    }

    pub fn starting_at(us: u32) -> Self {
        Self {
            now_us: std::cell::Cell::new(us),
        }
    }

    pub fn advance_us(&self, us: u32) {
        self.now_us.set(self.now_us.get().wrapping_add(us));
    }

    pub fn set_us(&self, us: u32) {
        self.now_us.set(us);
    }
}

#[cfg(test)]
impl MonotonicClock for TestClock {
    fn now_us(&self) -> u32 {
        self.now_us.get()
    }

    fn now_secs(&self) -> u64 {
        (self.now_us.get() / 1_000_000) as u64
    }

    fn delay_us(&self, us: u32) {
        self.advance_us(us);
    }

    fn delay_ms(&self, ms: u32) {
        self.advance_us(ms.saturating_mul(1000));
    }
}

//! Monotonic clock adapter.
//!
//! Feeds elapsed time to the [`TickTimerService`](crate::timer::TickTimerService).
//!
//! - **`target_os = "espidf"`**: wraps `esp_timer_get_time()` (microsecond
//!   precision, monotonic).
//! - **other targets**: `std::time::Instant`, for host tests and simulation.

use embassy_time::Duration;

/// Monotonic clock with a "since last poll" cursor.
pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    last_us: u64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        let mut clock = Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            last_us: 0,
        };
        clock.last_us = clock.uptime_us();
        clock
    }

    /// Microseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Microseconds since construction.
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn uptime_secs(&self) -> u64 {
        self.uptime_us() / 1_000_000
    }

    /// Time since the previous call (or construction).  Whole milliseconds
    /// only; the remainder carries into the next call.
    pub fn elapsed(&mut self) -> Duration {
        let now = self.uptime_us();
        let delta_ms = now.saturating_sub(self.last_us) / 1_000;
        self.last_us += delta_ms * 1_000;
        Duration::from_millis(delta_ms)
    }
}

//! Monotonic clock adapter.
//!
//! Feeds [`Runtime::tick`](crate::runtime::Runtime::tick) with seconds
//! since boot.
//!
//! - **`target_os = "espidf"`** wraps `esp_timer_get_time()`.
//! - **`not(target_os = "espidf")`** uses `std::time::Instant` for
//!   host-side testing and simulation.

pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Seconds since boot.
    pub fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }

    /// Milliseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn now_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1000
    }

    /// Milliseconds since boot.
    #[cfg(not(target_os = "espidf"))]
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Whole seconds elapsed since `since_secs`, saturating at zero.
    pub fn secs_since(&self, since_secs: u64) -> u64 {
        self.now_secs().saturating_sub(since_secs)
    }
}

//! Capture timestamps.
//!
//! Timestamps are seconds since the capture loop started, taken from a
//! monotonic source so wall-clock adjustments never reorder frames. Two frames
//! may share a timestamp when the clock resolution is coarser than the capture
//! rate; that is accepted, not an error.

use std::time::Instant;

/// Source of capture-relative timestamps.
pub trait Clock {
    /// Restart the zero point. Called once when the loop enters Running.
    fn start(&mut self);

    /// Seconds elapsed since `start`. Never decreases.
    fn elapsed_seconds(&mut self) -> f64;
}

/// `Instant`-backed clock.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn start(&mut self) {
        self.origin = Instant::now();
    }

    fn elapsed_seconds(&mut self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

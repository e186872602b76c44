//! Monotonic frame timing.

use std::time::{Duration, Instant};

/// Measures the time elapsed between consecutive frames.
///
/// Sampled once per frame; the first sample measures from construction.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    /// Create a clock starting now.
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Sample the clock, returning the delta since the previous sample in seconds.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    /// Sample the clock at a given instant.
    ///
    /// Instants earlier than the previous sample yield a zero delta.
    pub fn tick_at(&mut self, now: Instant) -> f32 {
        let delta = now.saturating_duration_since(self.last);
        self.last = self.last.max(now);
        delta.as_secs_f32()
    }

    /// Time since the previous sample without advancing the clock.
    pub fn elapsed(&self) -> Duration {
        self.last.elapsed()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tick_measures_between_samples() {
        let start = Instant::now();
        let mut clock = FrameClock { last: start };

        let dt = clock.tick_at(start + Duration::from_millis(16));
        assert_relative_eq!(dt, 0.016, epsilon = 1e-6);

        let dt = clock.tick_at(start + Duration::from_millis(48));
        assert_relative_eq!(dt, 0.032, epsilon = 1e-6);
    }

    #[test]
    fn tick_never_goes_negative() {
        let start = Instant::now();
        let mut clock = FrameClock {
            last: start + Duration::from_millis(10),
        };

        assert_eq!(clock.tick_at(start), 0.0);
        let dt = clock.tick_at(start + Duration::from_millis(20));
        assert_relative_eq!(dt, 0.010, epsilon = 1e-6);
    }
}

//! High-resolution timer for frame timing.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames and reports a rate once per reporting interval.
#[derive(Debug)]
pub struct FpsCounter {
    timer: Timer,
    interval: Duration,
    frames: u64,
}

impl FpsCounter {
    /// Create a counter that reports once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    /// Create a counter with a custom reporting interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            timer: Timer::new(),
            interval,
            frames: 0,
        }
    }

    /// Record one frame.
    ///
    /// Returns the frame rate over the last interval once the interval has
    /// elapsed, and starts a new interval.
    pub fn frame(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.timer.elapsed();
        if elapsed < self.interval {
            return None;
        }

        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.timer.reset();
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

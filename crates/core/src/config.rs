//! Render configuration.

use std::time::Duration;

/// Number of swap-chain buffers, and therefore of per-frame slots.
pub const BUFFER_COUNT: usize = 3;

/// Colour the back buffer is cleared to every frame.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.2, 0.4, 1.0];

/// Startup configuration for the frame loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Initial back-buffer width in pixels.
    pub width: u32,
    /// Initial back-buffer height in pixels.
    pub height: u32,
    /// Number of swap-chain buffers.
    pub buffer_count: usize,
    /// Present synchronized to the display refresh.
    pub vsync: bool,
    /// Request tearing when vsync is off and the device supports it.
    pub allow_tearing: bool,
    /// RGBA clear colour.
    pub clear_color: [f32; 4],
    /// Upper bound on a single fence wait. `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl RenderConfig {
    /// Returns a copy with the given back-buffer size, clamped to at least 1x1.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    /// Returns a copy with vsync set.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Returns a copy with a bounded fence wait.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// The fence wait bound, with `None` mapped to an effectively infinite wait.
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout.unwrap_or(Duration::MAX)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            buffer_count: BUFFER_COUNT,
            vsync: true,
            allow_tearing: true,
            clear_color: DEFAULT_CLEAR_COLOR,
            wait_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RenderConfig::default();
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.buffer_count, 3);
        assert!(config.vsync);
        assert_eq!(config.clear_color, [0.0, 0.2, 0.4, 1.0]);
        assert_eq!(config.wait_timeout(), Duration::MAX);
    }

    #[test]
    fn test_with_size_clamps_to_one() {
        let config = RenderConfig::default().with_size(0, 0);
        assert_eq!((config.width, config.height), (1, 1));

        let config = RenderConfig::default().with_size(1920, 0);
        assert_eq!((config.width, config.height), (1920, 1));
    }

    #[test]
    fn test_with_wait_timeout() {
        let config = RenderConfig::default().with_wait_timeout(Duration::from_millis(50));
        assert_eq!(config.wait_timeout(), Duration::from_millis(50));
    }
}

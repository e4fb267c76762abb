//! Keyboard input tracking.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Tracks which keys are held and which changed since the last frame.
#[derive(Debug, Default)]
pub struct InputState {
    /// Currently pressed keys
    pressed_keys: HashSet<KeyCode>,
    /// Keys that were just pressed this frame
    just_pressed_keys: HashSet<KeyCode>,
    /// Keys that were just released this frame
    just_released_keys: HashSet<KeyCode>,
}

impl InputState {
    /// Create a new input state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call at the beginning of each frame to clear per-frame state.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
        self.just_released_keys.clear();
    }

    /// Handle a key press event. Auto-repeat does not count as a new press.
    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    /// Handle a key release event.
    pub fn on_key_released(&mut self, key: KeyCode) {
        if self.pressed_keys.remove(&key) {
            self.just_released_keys.insert(key);
        }
    }

    /// Check if a key is currently pressed.
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    /// Check if a key was just pressed this frame.
    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    /// Check if a key was just released this frame.
    pub fn is_key_just_released(&self, key: KeyCode) -> bool {
        self.just_released_keys.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_is_reported_once() {
        let mut input = InputState::new();

        input.on_key_pressed(KeyCode::F11);
        assert!(input.is_key_just_pressed(KeyCode::F11));
        assert!(input.is_key_pressed(KeyCode::F11));

        input.begin_frame();
        // Auto-repeat
        input.on_key_pressed(KeyCode::F11);
        assert!(!input.is_key_just_pressed(KeyCode::F11));
        assert!(input.is_key_pressed(KeyCode::F11));
    }

    #[test]
    fn test_release() {
        let mut input = InputState::new();

        input.on_key_pressed(KeyCode::KeyV);
        input.begin_frame();
        input.on_key_released(KeyCode::KeyV);

        assert!(input.is_key_just_released(KeyCode::KeyV));
        assert!(!input.is_key_pressed(KeyCode::KeyV));

        // Release without press is ignored
        input.on_key_released(KeyCode::Escape);
        assert!(!input.is_key_just_released(KeyCode::Escape));
    }
}

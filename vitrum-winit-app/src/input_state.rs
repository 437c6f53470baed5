use std::collections::HashSet;

use winit::{
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
};

/// 记录输入信息，每帧结束时调用 [`Self::end_frame`] 清除增量
#[derive(Debug, Default, Clone)]
pub struct InputState {
    keys_pressed: HashSet<KeyCode>,
    buttons_pressed: HashSet<MouseButton>,

    /// 当前帧的鼠标位置 pixel
    cursor: Option<glam::Vec2>,
    /// 上一帧的鼠标位置 pixel
    last_cursor: Option<glam::Vec2>,
    /// 本帧累计的滚轮行数
    wheel: f32,
}

// update
impl InputState {
    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.set_cursor(glam::vec2(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                self.last_cursor = None;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                // 简化处理，仅考虑垂直滚动
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => (pos.y / 100.0) as f32,
                };
                self.add_wheel(lines);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.set_mouse_button(*button, *state == ElementState::Pressed);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => {
                self.set_key(*code, *state == ElementState::Pressed);
            }
            WindowEvent::Focused(false) => {
                self.keys_pressed.clear();
                self.buttons_pressed.clear();
            }
            _ => {}
        }
    }

    pub fn set_key(&mut self, code: KeyCode, pressed: bool) {
        if pressed {
            self.keys_pressed.insert(code);
        } else {
            self.keys_pressed.remove(&code);
        }
    }

    pub fn set_mouse_button(&mut self, button: MouseButton, pressed: bool) {
        if pressed {
            self.buttons_pressed.insert(button);
        } else {
            self.buttons_pressed.remove(&button);
        }
    }

    pub fn set_cursor(&mut self, position: glam::Vec2) {
        if self.cursor.is_none() {
            self.last_cursor = Some(position);
        }
        self.cursor = Some(position);
    }

    #[inline]
    pub fn add_wheel(&mut self, lines: f32) {
        self.wheel += lines;
    }

    /// 当前帧的输入已经被消费
    pub fn end_frame(&mut self) {
        self.last_cursor = self.cursor;
        self.wheel = 0.0;
    }
}

// getters
impl InputState {
    #[inline]
    pub fn is_key_pressed(&self, code: KeyCode) -> bool {
        self.keys_pressed.contains(&code)
    }

    #[inline]
    pub fn is_button_pressed(&self, button: MouseButton) -> bool {
        self.buttons_pressed.contains(&button)
    }

    #[inline]
    pub fn cursor(&self) -> Option<glam::Vec2> {
        self.cursor
    }

    /// 获取鼠标位置变化
    pub fn cursor_delta(&self) -> glam::Vec2 {
        match (self.cursor, self.last_cursor) {
            (Some(cursor), Some(last)) => cursor - last,
            _ => glam::Vec2::ZERO,
        }
    }

    #[inline]
    pub fn wheel(&self) -> f32 {
        self.wheel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_buttons() {
        let mut input = InputState::default();
        input.set_key(KeyCode::KeyW, true);
        input.set_mouse_button(MouseButton::Left, true);
        assert!(input.is_key_pressed(KeyCode::KeyW));
        assert!(!input.is_key_pressed(KeyCode::KeyS));
        assert!(input.is_button_pressed(MouseButton::Left));

        input.set_key(KeyCode::KeyW, false);
        input.end_frame();
        assert!(!input.is_key_pressed(KeyCode::KeyW));
        // 按住的状态跨帧保留
        assert!(input.is_button_pressed(MouseButton::Left));
    }

    #[test]
    fn test_cursor_delta() {
        let mut input = InputState::default();
        // 第一次移动没有增量
        input.set_cursor(glam::vec2(100.0, 100.0));
        assert_eq!(input.cursor_delta(), glam::Vec2::ZERO);

        input.end_frame();
        input.set_cursor(glam::vec2(110.0, 95.0));
        input.set_cursor(glam::vec2(120.0, 90.0));
        assert_eq!(input.cursor_delta(), glam::vec2(20.0, -10.0));

        input.end_frame();
        assert_eq!(input.cursor_delta(), glam::Vec2::ZERO);
    }

    #[test]
    fn test_wheel_reset() {
        let mut input = InputState::default();
        input.add_wheel(1.0);
        input.add_wheel(0.5);
        assert_eq!(input.wheel(), 1.5);
        input.end_frame();
        assert_eq!(input.wheel(), 0.0);
    }
}

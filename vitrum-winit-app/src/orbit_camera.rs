use winit::{event::MouseButton, keyboard::KeyCode};

use crate::{frame_timing::FrameTiming, input_state::InputState};

/// 绕 target 旋转的相机
///
/// - 左键拖动：旋转
/// - 滚轮：拉近拉远
/// - WASD / QE：平移 target
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: glam::Vec3,
    pub distance: f32,
    /// 弧度，0 表示位于 target 的 +Z 方向
    pub yaw: f32,
    /// 弧度，正值表示从上往下看
    pub pitch: f32,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: glam::Vec3::ZERO,
            distance: 5.0,
            yaw: 0.0,
            pitch: 0.2,
            fov_y: 45_f32.to_radians(),
            near: 0.05,
            far: 200.0,
        }
    }
}

impl OrbitCamera {
    const ROTATE_SPEED: f32 = 0.005;
    const ZOOM_STEP: f32 = 0.9;
    const MIN_DISTANCE: f32 = 0.1;
    const PITCH_LIMIT: f32 = 1.55;
}

// update
impl OrbitCamera {
    pub fn update(&mut self, input: &InputState, timing: &FrameTiming) {
        if input.is_button_pressed(MouseButton::Left) {
            let delta = input.cursor_delta() * Self::ROTATE_SPEED;
            self.yaw -= delta.x;
            self.pitch = (self.pitch + delta.y).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
        }

        if input.wheel() != 0.0 {
            self.distance = (self.distance * Self::ZOOM_STEP.powf(input.wheel())).max(Self::MIN_DISTANCE);
        }

        // 平移速度和距离成正比
        let step = timing.delta_s() * self.distance;
        let forward = {
            let f = self.target - self.position();
            glam::vec3(f.x, 0.0, f.z).normalize_or_zero()
        };
        let right = forward.cross(glam::Vec3::Y);

        let mut pan = glam::Vec3::ZERO;
        for (key, dir) in [
            (KeyCode::KeyW, forward),
            (KeyCode::KeyS, -forward),
            (KeyCode::KeyD, right),
            (KeyCode::KeyA, -right),
            (KeyCode::KeyE, glam::Vec3::Y),
            (KeyCode::KeyQ, -glam::Vec3::Y),
        ] {
            if input.is_key_pressed(key) {
                pan += dir;
            }
        }
        self.target += pan * step;
    }
}

// getters
impl OrbitCamera {
    pub fn position(&self) -> glam::Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + self.distance * glam::vec3(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    #[inline]
    pub fn view(&self) -> glam::Mat4 {
        glam::Mat4::look_at_rh(self.position(), self.target, glam::Vec3::Y)
    }

    /// Vulkan 的 NDC：depth 为 0..1，y 轴向下
    pub fn projection(&self, aspect: f32) -> glam::Mat4 {
        let mut projection = glam::Mat4::perspective_rh(self.fov_y, aspect.max(1e-4), self.near, self.far);
        projection.y_axis.y = -projection.y_axis.y;
        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position() {
        let camera = OrbitCamera {
            pitch: 0.0,
            ..Default::default()
        };
        assert!(camera.position().abs_diff_eq(glam::vec3(0.0, 0.0, 5.0), 1e-5));

        // target 在相机前方，view 空间中位于 -Z
        let target_in_view = camera.view().transform_point3(camera.target);
        assert!(target_in_view.abs_diff_eq(glam::vec3(0.0, 0.0, -5.0), 1e-5));
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = OrbitCamera::default();
        let clip = camera.projection(1.0) * glam::vec4(0.0, 1.0, -1.0, 1.0);
        assert!(clip.y < 0.0);
        // near 平面映射到 depth 0
        let near = camera.projection(1.0) * glam::vec4(0.0, 0.0, -camera.near, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
    }

    #[test]
    fn test_drag_and_zoom() {
        let mut camera = OrbitCamera::default();
        let mut input = InputState::default();
        let timing = FrameTiming::default();

        input.set_mouse_button(MouseButton::Left, true);
        input.set_cursor(glam::vec2(0.0, 0.0));
        input.end_frame();
        input.set_cursor(glam::vec2(100.0, 10_000.0));
        input.add_wheel(2.0);
        camera.update(&input, &timing);

        assert!((camera.yaw + 0.5).abs() < 1e-5);
        assert_eq!(camera.pitch, OrbitCamera::PITCH_LIMIT);
        assert!((camera.distance - 5.0 * 0.81).abs() < 1e-5);
        // delta 为 0 时不会平移
        assert_eq!(camera.target, glam::Vec3::ZERO);
    }
}

//! 示例共用的相机和灯光
//!
//! 左手坐标系，投影深度范围为 [0, 1]（Direct3D 约定）。

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3, Vector4};

/// 着色器常量中的矩阵
///
/// nalgebra 按列存储，直接写入就是 HLSL 默认 `column_major` 布局下 `mul(v, M)` 所需的转置矩阵。
pub type GpuMatrix = [[f32; 4]; 4];

pub fn to_gpu(matrix: &Matrix4<f32>) -> GpuMatrix {
    let mut out = [[0.0f32; 4]; 4];
    for (column, slot) in out.iter_mut().enumerate() {
        for (row, value) in slot.iter_mut().enumerate() {
            *value = matrix[(row, column)];
        }
    }
    out
}

/// 左手透视投影
pub fn perspective_lh(fov_y: f32, aspect: f32, near_z: f32, far_z: f32) -> Matrix4<f32> {
    let y_scale = 1.0 / (0.5 * fov_y).tan();
    let x_scale = y_scale / aspect;
    let range = far_z / (far_z - near_z);

    #[rustfmt::skip]
    let projection = Matrix4::new(
        x_scale, 0.0,     0.0,   0.0,
        0.0,     y_scale, 0.0,   0.0,
        0.0,     0.0,     range, -range * near_z,
        0.0,     0.0,     1.0,   0.0,
    );
    projection
}

/// 左手视图矩阵，`look` 为单位方向
pub fn look_to_lh(eye: &Point3<f32>, look: &Vector3<f32>, world_up: &Vector3<f32>) -> Matrix4<f32> {
    let look = look.normalize();
    let right = world_up.cross(&look).normalize();
    let up = look.cross(&right);
    let position = eye.coords;

    #[rustfmt::skip]
    let view = Matrix4::new(
        right.x, right.y, right.z, -position.dot(&right),
        up.x,    up.y,    up.z,    -position.dot(&up),
        look.x,  look.y,  look.z,  -position.dot(&look),
        0.0,     0.0,     0.0,     1.0,
    );
    view
}

/// 第一人称相机
#[derive(Debug, Clone)]
pub struct Camera {
    position: Point3<f32>,
    yaw: f32,
    pitch: f32,
}

impl Camera {
    /// 朝向 +Z 的相机
    pub fn new(position: Point3<f32>) -> Self {
        Self { position, yaw: 0.0, pitch: 0.0 }
    }

    /// 从位置看向目标点
    pub fn looking_at(position: Point3<f32>, target: Point3<f32>) -> Self {
        let direction = (target - position).normalize();
        Self {
            position,
            yaw: direction.x.atan2(direction.z),
            pitch: direction.y.clamp(-1.0, 1.0).asin(),
        }
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn look(&self) -> Vector3<f32> {
        Vector3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.cos() * self.pitch.cos(),
        )
    }

    pub fn rotate_yaw(&mut self, angle: f32) {
        self.yaw += angle;
    }

    /// 俯仰角限制在 ±85° 以内
    pub fn rotate_pitch(&mut self, angle: f32) {
        let limit = 85.0f32.to_radians();
        self.pitch = (self.pitch + angle).clamp(-limit, limit);
    }

    pub fn move_forward(&mut self, distance: f32) {
        self.position += self.look() * distance;
    }

    pub fn view(&self) -> Matrix4<f32> {
        look_to_lh(&self.position, &self.look(), &Vector3::y())
    }

    /// 视图和投影矩阵
    pub fn view_projection(&self, fov_y_degrees: f32, width: u32, height: u32) -> (Matrix4<f32>, Matrix4<f32>) {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        (self.view(), perspective_lh(fov_y_degrees.to_radians(), aspect, 1.0, 1000.0))
    }
}

/// 着色器中的灯光
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightState {
    pub position: [f32; 4],
    pub direction: [f32; 4],
    pub color: [f32; 4],
    pub falloff: [f32; 4],
    pub view: GpuMatrix,
    pub projection: GpuMatrix,
}

pub const NUM_LIGHTS: usize = 3;

/// 从同一位置出发、朝 +Z 的灯光
pub fn default_lights(position: [f32; 4]) -> [LightState; NUM_LIGHTS] {
    let mut lights = [LightState::zeroed(); NUM_LIGHTS];
    for light in lights.iter_mut() {
        light.position = position;
        light.direction = [0.0, 0.0, 1.0, 0.0];
        light.falloff = [800.0, 1.0, 0.0, 1.0];
        light.color = [0.7, 0.7, 0.7, 1.0];
    }
    lights
}

/// 灯光绕 Y 轴旋转并重新对准 `target`，相邻灯光方向相反
pub fn animate_lights(
    lights: &mut [LightState; NUM_LIGHTS],
    angle: f32,
    target: Point3<f32>,
    width: u32,
    height: u32,
) {
    for (i, light) in lights.iter_mut().enumerate() {
        let direction = if i % 2 == 0 { angle } else { -angle };
        let rotation = Matrix4::from_axis_angle(&Vector3::y_axis(), direction);
        let position = rotation * Vector4::from(light.position);
        light.position = position.into();

        let eye = Point3::new(position.x, position.y, position.z);
        let look = (target - eye).normalize();
        light.direction = [look.x, look.y, look.z, 0.0];

        let camera = Camera::looking_at(eye, target);
        let (view, projection) = camera.view_projection(90.0, width, height);
        light.view = to_gpu(&view);
        light.projection = to_gpu(&projection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_projection_depth_range() {
        let projection = perspective_lh(90.0f32.to_radians(), 1.0, 1.0, 100.0);
        let near = projection * Vector4::new(0.0, 0.0, 1.0, 1.0);
        let far = projection * Vector4::new(0.0, 0.0, 100.0, 1.0);
        assert!(approx(near.z / near.w, 0.0));
        assert!(approx(far.z / far.w, 1.0));
    }

    #[test]
    fn test_view_moves_eye_to_origin() {
        let camera = Camera::new(Point3::new(0.0, 0.0, -5.0));
        let eye = camera.view() * Vector4::new(0.0, 0.0, -5.0, 1.0);
        assert!(approx(eye.x, 0.0) && approx(eye.y, 0.0) && approx(eye.z, 0.0));
        let ahead = camera.view() * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!(approx(ahead.z, 5.0));
    }

    #[test]
    fn test_to_gpu_is_column_major() {
        let m = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0));
        let gpu = to_gpu(&m);
        assert_eq!(gpu[3], [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::new(Point3::origin());
        camera.rotate_pitch(10.0);
        assert!(camera.look().y < 1.0);
        assert!(camera.look().y > 0.99);
    }
}

use glam::{Mat4, Vec3};

use crate::{bounds::Frustum, utils::MatrixExt};

#[derive(Clone, Debug)]
pub struct Camera {
    pub view: Mat4,
    pub far: f32,
    pub near: f32,
    pub fov: f32,
    pub aspect_ratio: f32,
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3, fov: f32, aspect_ratio: f32) -> Self {
        Self {
            view: Mat4::look_at_lh(eye, target, Vec3::Y),
            far: 1000.0,
            near: 0.1,
            fov,
            aspect_ratio,
        }
    }

    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_lh(self.fov, self.aspect_ratio, self.near, self.far)
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_projection(self.proj())
    }

    pub fn position(&self) -> Vec3 {
        self.view.inverse().translation()
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        let inv_view = self.view.inverse();

        CameraSnapshot {
            view: self.view,
            inv_view,
            proj: self.proj(),
            frustum: self.frustum(),
            eye: inv_view.translation(),
            near: self.near,
            far: self.far,
        }
    }
}

/// Camera state captured when the pass constants are written. Culling reads
/// this, not the live camera.
#[derive(Clone, Debug)]
pub struct CameraSnapshot {
    pub view: Mat4,
    pub inv_view: Mat4,
    pub proj: Mat4,
    /// View-space frustum.
    pub frustum: Frustum,
    pub eye: Vec3,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraSnapshot {
    fn default() -> Self {
        Camera::look_at(Vec3::ZERO, Vec3::Z, std::f32::consts::FRAC_PI_4, 1.0).snapshot()
    }
}

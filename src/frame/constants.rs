use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::camera::CameraSnapshot;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassConstants {
    pub view: Mat4,
    pub inv_view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub eye_position: Vec3,
    pub near_z: f32,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
    pub frame_index: u32,
}

impl PassConstants {
    pub fn new(camera: &CameraSnapshot, total_time: f32, delta_time: f32, frame_index: u32) -> Self {
        Self {
            view: camera.view,
            inv_view: camera.inv_view,
            proj: camera.proj,
            view_proj: camera.proj * camera.view,
            eye_position: camera.eye,
            near_z: camera.near,
            far_z: camera.far,
            total_time,
            delta_time,
            frame_index,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub world: Mat4,
    pub material_index: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub diffuse_albedo: Vec4,
    pub fresnel: Vec3,
    pub roughness: f32,
}

/// Free-form per-material parameters read by pipelines that declare a bundle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BundleConstants {
    pub params: [Vec4; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub world: Mat4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RuntimeVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

use glam::{Mat4, Vec3};

use crate::{
    bounds::{BoundingVolume, Containment, Frustum},
    camera::CameraSnapshot,
    frame::constants::InstanceData,
    scene::InstancedMeshData,
    utils::MatrixExt,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    CulledByDistance,
    CulledByFrustum,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        self == Visibility::Visible
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstanceCull {
    pub visible: usize,
    pub culled_by_distance: usize,
    pub culled_by_frustum: usize,
}

/// Distance and frustum tests against one camera snapshot.
///
/// The view-space frustum is moved into each object's local space instead of
/// moving the bounds into view space, so local bounds are never rebuilt.
#[derive(Clone, Debug)]
pub struct VisibilityCuller {
    frustum: Frustum,
    inv_view: Mat4,
    eye: Vec3,
}

impl VisibilityCuller {
    pub fn new(camera: &CameraSnapshot) -> Self {
        Self {
            frustum: camera.frustum,
            inv_view: camera.inv_view,
            eye: camera.eye,
        }
    }

    /// An object exactly at the cull distance is still drawn.
    pub fn within_distance(&self, position: Vec3, cull_distance: Option<f32>) -> bool {
        cull_distance.map_or(true, |limit| self.eye.distance(position) <= limit)
    }

    pub fn test(&self, world: Mat4, bounds: &BoundingVolume, cull_distance: Option<f32>) -> Visibility {
        if !self.within_distance(world.translation(), cull_distance) {
            return Visibility::CulledByDistance;
        }

        if bounds.is_empty() || world.determinant() == 0.0 {
            return Visibility::Visible;
        }

        let view_to_local = world.inverse() * self.inv_view;

        match self.frustum.transform(view_to_local).contains(bounds) {
            Containment::Disjoint => Visibility::CulledByFrustum,
            Containment::Intersects | Containment::Contains => Visibility::Visible,
        }
    }

    /// Appends the world transform of every visible instance to `out`, in
    /// instance order. The instance list stays locked for the whole pass.
    pub fn cull_instances(
        &self,
        instances: &InstancedMeshData,
        bounds: &BoundingVolume,
        cull_distance: Option<f32>,
        out: &mut Vec<InstanceData>,
    ) -> InstanceCull {
        let transforms = instances.lock();
        let mut stats = InstanceCull::default();

        out.reserve(transforms.len());
        for world in transforms.iter() {
            match self.test(*world, bounds, cull_distance) {
                Visibility::Visible => {
                    stats.visible += 1;
                    out.push(InstanceData { world: *world });
                }
                Visibility::CulledByDistance => stats.culled_by_distance += 1,
                Visibility::CulledByFrustum => stats.culled_by_frustum += 1,
            }
        }

        stats
    }
}

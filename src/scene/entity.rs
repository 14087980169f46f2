use glam::Mat4;
use smallvec::SmallVec;

use super::{ComponentDesc, ComponentId};

#[derive(Clone, Debug)]
pub struct EntityDesc {
    pub transform: Mat4,
    pub cull_distance: Option<f32>,
    pub components: Vec<ComponentDesc>,
}

impl EntityDesc {
    pub fn new(transform: Mat4) -> Self {
        Self {
            transform,
            cull_distance: None,
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: ComponentDesc) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_cull_distance(mut self, distance: f32) -> Self {
        self.cull_distance = Some(distance);
        self
    }

    pub fn mesh_count(&self) -> usize {
        self.components.iter().map(ComponentDesc::mesh_count).sum()
    }
}

/// A spawned object. Its mesh-bearing components occupy the object slots
/// `start..start + mesh_count`, assigned in depth-first order.
#[derive(Debug)]
pub struct RenderableEntity {
    pub(crate) start: usize,
    pub(crate) mesh_count: usize,
    pub(crate) roots: SmallVec<[ComponentId; 4]>,
    pub(crate) transform: Mat4,
    pub(crate) cull_distance: Option<f32>,
    pub(crate) transform_dirty: bool,
}

impl RenderableEntity {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn mesh_count(&self) -> usize {
        self.mesh_count
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.mesh_count
    }

    pub fn roots(&self) -> &[ComponentId] {
        &self.roots
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn cull_distance(&self) -> Option<f32> {
        self.cull_distance
    }
}

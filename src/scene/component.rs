use std::sync::Arc;

use glam::{Mat4, Vec3};
use smallvec::SmallVec;

use crate::{
    bounds::BoundingVolume, frame::constants::RuntimeVertex, graphics::types::PipelineId,
};

use super::{ComponentId, EntityId, InstancedMeshData, MaterialId};

#[derive(Clone, Debug)]
pub struct MeshDesc {
    pub pipeline: PipelineId,
    pub material: MaterialId,
    pub index_count: u32,
    pub bounds: BoundingVolume,
    pub instanced: bool,
}

impl MeshDesc {
    pub fn new(pipeline: PipelineId, material: MaterialId, index_count: u32) -> Self {
        Self {
            pipeline,
            material,
            index_count,
            bounds: BoundingVolume::default(),
            instanced: false,
        }
    }

    pub fn with_positions(mut self, positions: &[Vec3]) -> Self {
        self.bounds = BoundingVolume::from_positions(positions);
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingVolume) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn instanced(mut self) -> Self {
        self.instanced = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightData {
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioData {
    pub clip: u64,
    pub volume: f32,
}

#[derive(Clone, Debug)]
pub enum ComponentDescKind {
    Mesh(MeshDesc),
    RuntimeMesh {
        mesh: MeshDesc,
        vertices: Vec<RuntimeVertex>,
    },
    Light(LightData),
    Audio(AudioData),
}

/// Blueprint of a component subtree.
#[derive(Clone, Debug)]
pub struct ComponentDesc {
    pub kind: ComponentDescKind,
    pub local: Mat4,
    pub children: Vec<ComponentDesc>,
}

impl ComponentDesc {
    fn new(kind: ComponentDescKind) -> Self {
        Self {
            kind,
            local: Mat4::IDENTITY,
            children: Vec::new(),
        }
    }

    pub fn mesh(mesh: MeshDesc) -> Self {
        Self::new(ComponentDescKind::Mesh(mesh))
    }

    /// Bounds are derived from the vertex positions.
    pub fn runtime_mesh(mesh: MeshDesc, vertices: Vec<RuntimeVertex>) -> Self {
        let positions: Vec<Vec3> = vertices.iter().map(|v| v.position).collect();
        let mesh = mesh.with_positions(&positions);

        Self::new(ComponentDescKind::RuntimeMesh { mesh, vertices })
    }

    pub fn light(light: LightData) -> Self {
        Self::new(ComponentDescKind::Light(light))
    }

    pub fn audio(audio: AudioData) -> Self {
        Self::new(ComponentDescKind::Audio(audio))
    }

    pub fn with_local(mut self, local: Mat4) -> Self {
        self.local = local;
        self
    }

    pub fn with_child(mut self, child: ComponentDesc) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_mesh_bearing(&self) -> bool {
        matches!(
            self.kind,
            ComponentDescKind::Mesh(_) | ComponentDescKind::RuntimeMesh { .. }
        )
    }

    /// Mesh-bearing components in this subtree, including `self`.
    pub fn mesh_count(&self) -> usize {
        usize::from(self.is_mesh_bearing())
            + self.children.iter().map(ComponentDesc::mesh_count).sum::<usize>()
    }
}

#[derive(Debug)]
pub struct MeshData {
    pub pipeline: PipelineId,
    pub material: MaterialId,
    pub index_count: u32,
    pub bounds: BoundingVolume,
    pub(crate) slot: usize,
    pub(crate) instances: Option<Arc<InstancedMeshData>>,
}

impl MeshData {
    pub(crate) fn from_desc(desc: MeshDesc) -> Self {
        Self {
            pipeline: desc.pipeline,
            material: desc.material,
            index_count: desc.index_count,
            bounds: desc.bounds,
            slot: 0,
            instances: desc.instanced.then(|| Arc::new(InstancedMeshData::new())),
        }
    }

    /// Index of this mesh's element in the per-frame object buffer.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn instances(&self) -> Option<&Arc<InstancedMeshData>> {
        self.instances.as_ref()
    }
}

#[derive(Debug)]
pub struct RuntimeMeshData {
    pub mesh: MeshData,
    pub(crate) vertices: Vec<RuntimeVertex>,
    pub(crate) vertex_start: usize,
    pub(crate) vertices_pending: u32,
}

impl RuntimeMeshData {
    pub fn vertices(&self) -> &[RuntimeVertex] {
        &self.vertices
    }

    pub fn vertex_start(&self) -> usize {
        self.vertex_start
    }

    pub fn vertices_pending(&self) -> u32 {
        self.vertices_pending
    }
}

#[derive(Debug)]
pub enum ComponentKind {
    Mesh(MeshData),
    RuntimeMesh(RuntimeMeshData),
    Light(LightData),
    Audio(AudioData),
}

#[derive(Debug)]
pub struct Component {
    pub(crate) entity: EntityId,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) children: SmallVec<[ComponentId; 4]>,
    pub(crate) local: Mat4,
    pub(crate) world: Mat4,
    pending: u32,
    pub kind: ComponentKind,
}

impl Component {
    pub(crate) fn new(entity: EntityId, parent: Option<ComponentId>, local: Mat4, kind: ComponentKind) -> Self {
        Self {
            entity,
            parent,
            children: SmallVec::new(),
            local,
            world: Mat4::IDENTITY,
            pending: 0,
            kind,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    pub fn local(&self) -> Mat4 {
        self.local
    }

    /// World transform as of the last propagation.
    pub fn world(&self) -> Mat4 {
        self.world
    }

    pub fn as_mesh_like(&self) -> Option<&MeshData> {
        match &self.kind {
            ComponentKind::Mesh(mesh) => Some(mesh),
            ComponentKind::RuntimeMesh(runtime) => Some(&runtime.mesh),
            _ => None,
        }
    }

    pub fn as_mesh_like_mut(&mut self) -> Option<&mut MeshData> {
        match &mut self.kind {
            ComponentKind::Mesh(mesh) => Some(mesh),
            ComponentKind::RuntimeMesh(runtime) => Some(&mut runtime.mesh),
            _ => None,
        }
    }

    pub fn as_runtime_mesh(&self) -> Option<&RuntimeMeshData> {
        match &self.kind {
            ComponentKind::RuntimeMesh(runtime) => Some(runtime),
            _ => None,
        }
    }

    pub fn as_runtime_mesh_mut(&mut self) -> Option<&mut RuntimeMeshData> {
        match &mut self.kind {
            ComponentKind::RuntimeMesh(runtime) => Some(runtime),
            _ => None,
        }
    }

    pub fn as_light_like(&self) -> Option<&LightData> {
        match &self.kind {
            ComponentKind::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn is_mesh_bearing(&self) -> bool {
        self.as_mesh_like().is_some()
    }

    /// Frames that still need this component's constants copied.
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Requests a copy into every ring slot.
    pub fn mark_dirty(&mut self, frames: u32) {
        self.pending = frames;
    }

    /// Called once per frame in which the slot was copied.
    pub(crate) fn consume_pending(&mut self) -> bool {
        if self.pending == 0 {
            return false;
        }

        self.pending -= 1;
        true
    }
}

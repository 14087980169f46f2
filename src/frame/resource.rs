use std::collections::HashMap;

use smallvec::SmallVec;

use crate::{
    error::Result,
    graphics::{
        buffer::{ConstantBuffer, InstanceBuffer, VertexBuffer},
        device::Gpu,
        types::{ContextHandle, PipelineId},
    },
    scene::ComponentId,
    utils::round_up,
};

use super::constants::{
    BundleConstants, InstanceData, MaterialConstants, ObjectConstants, PassConstants,
    RuntimeVertex,
};

/// Element counts of the buffers every ring slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingCapacities {
    pub objects: usize,
    pub materials: usize,
    pub runtime_vertices: usize,
}

/// Everything the CPU writes for one frame while the GPU may still read the
/// previous ones.
#[derive(Debug)]
pub struct FrameResource {
    pub(crate) context: ContextHandle,
    pub(crate) pass: ConstantBuffer<PassConstants>,
    pub(crate) objects: ConstantBuffer<ObjectConstants>,
    pub(crate) materials: ConstantBuffer<MaterialConstants>,
    pub(crate) bundles: SmallVec<[(PipelineId, ConstantBuffer<BundleConstants>); 2]>,
    pub(crate) instances: HashMap<ComponentId, InstanceBuffer<InstanceData>>,
    /// Instance buffers of removed components, kept until this slot's fence
    /// value is reached again.
    pub(crate) retired: Vec<InstanceBuffer<InstanceData>>,
    pub(crate) runtime_vertices: VertexBuffer<RuntimeVertex>,
    pub(crate) fence_value: u64,
}

impl FrameResource {
    /// Bundle buffers are added later by the ring, one per bundled pipeline.
    pub(crate) fn new(gpu: &Gpu, capacities: RingCapacities) -> Result<Self> {
        Ok(Self {
            context: gpu.create_context()?,
            pass: ConstantBuffer::inner_new(gpu, 1)?,
            objects: ConstantBuffer::inner_new(gpu, capacities.objects)?,
            materials: ConstantBuffer::inner_new(gpu, capacities.materials)?,
            bundles: SmallVec::new(),
            instances: HashMap::new(),
            retired: Vec::new(),
            runtime_vertices: VertexBuffer::inner_new(gpu, capacities.runtime_vertices)?,
            fence_value: 0,
        })
    }

    /// Last fence value submitted from this slot.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn pass(&self) -> &ConstantBuffer<PassConstants> {
        &self.pass
    }

    pub fn objects(&self) -> &ConstantBuffer<ObjectConstants> {
        &self.objects
    }

    pub fn materials(&self) -> &ConstantBuffer<MaterialConstants> {
        &self.materials
    }

    pub fn runtime_vertices(&self) -> &VertexBuffer<RuntimeVertex> {
        &self.runtime_vertices
    }

    pub fn bundle(&self, pipeline: PipelineId) -> Option<&ConstantBuffer<BundleConstants>> {
        self.bundles
            .iter()
            .find(|(id, _)| *id == pipeline)
            .map(|(_, buffer)| buffer)
    }

    pub fn instance_buffer(&self, component: ComponentId) -> Option<&InstanceBuffer<InstanceData>> {
        self.instances.get(&component)
    }

    /// Returns an instance buffer for `component` holding at least `count`
    /// instances. Only called on the current slot, whose previous GPU work has
    /// completed, so the buffer is replaced in place when it is too small or
    /// more than one chunk larger than needed.
    pub(crate) fn ensure_instance_buffer(
        &mut self,
        gpu: &Gpu,
        component: ComponentId,
        count: usize,
        chunk: usize,
    ) -> Result<&InstanceBuffer<InstanceData>> {
        let needed = round_up(count.max(1), chunk);

        let replace = self
            .instances
            .get(&component)
            .map_or(true, |buffer| {
                buffer.capacity() < count || buffer.capacity() > needed + chunk
            });

        if replace {
            tracing::debug!(?component, capacity = needed, "instance buffer resized");
            self.instances
                .insert(component, InstanceBuffer::inner_new(gpu, needed)?);
        }

        Ok(&self.instances[&component])
    }

    pub(crate) fn retire_instances(&mut self, component: ComponentId) {
        if let Some(buffer) = self.instances.remove(&component) {
            self.retired.push(buffer);
        }
    }
}

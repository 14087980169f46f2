use thiserror::Error;

use crate::{
    frame::{
        constants::{BundleConstants, InstanceData, MaterialConstants, RuntimeVertex},
        FrameResource,
    },
    graphics::{
        buffer::{ConstantBuffer, InstanceBuffer, VertexBuffer},
        descriptor_heap::DescriptorTable,
        device::Gpu,
        types::{BindSlot, BufferHandle, Command, PipelineId},
    },
    scene::{ComponentId, MaterialId, MaterialTable},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pipeline {
    pub id: PipelineId,
    /// Reads per-material bundle constants instead of the shared material
    /// buffer.
    pub material_bundle: bool,
}

impl Pipeline {
    pub fn new(id: PipelineId) -> Self {
        Self {
            id,
            material_bundle: false,
        }
    }

    pub fn with_material_bundle(mut self) -> Self {
        self.material_bundle = true;
        self
    }
}

/// Loaded pipelines in draw order: the default pipeline first, then custom
/// pipelines in registration order.
#[derive(Clone, Debug, Default)]
pub struct PipelineRegistry {
    default: Option<Pipeline>,
    custom: Vec<Pipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, pipeline: Pipeline) -> Option<Pipeline> {
        self.custom.retain(|p| p.id != pipeline.id);
        self.default.replace(pipeline)
    }

    /// Returns `false` if a pipeline with the same id is already loaded.
    pub fn register(&mut self, pipeline: Pipeline) -> bool {
        if self.get(pipeline.id).is_some() {
            return false;
        }

        self.custom.push(pipeline);
        true
    }

    pub fn unregister(&mut self, id: PipelineId) -> Option<Pipeline> {
        if self.default.is_some_and(|p| p.id == id) {
            return self.default.take();
        }

        let index = self.custom.iter().position(|p| p.id == id)?;
        Some(self.custom.remove(index))
    }

    pub fn get(&self, id: PipelineId) -> Option<&Pipeline> {
        self.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pipeline> {
        self.default.iter().chain(self.custom.iter())
    }
}

/// One visible mesh ready to draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawItem {
    pub component: ComponentId,
    pub slot: usize,
    pub material: MaterialId,
    pub index_count: u32,
    /// Visible instances written to the instance buffer, `None` for a plain
    /// mesh.
    pub instances: Option<u32>,
    /// First vertex of a runtime mesh in the frame's vertex buffer.
    pub vertex_start: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct RenderGroup {
    pub pipeline: PipelineId,
    pub items: Vec<DrawItem>,
}

/// Visible draws grouped by pipeline, groups in registry order. Draws whose
/// pipeline is not loaded are collected in trailing groups so they can be
/// reported.
#[derive(Clone, Debug, Default)]
pub struct RenderLists {
    groups: Vec<RenderGroup>,
}

impl RenderLists {
    pub fn new(pipelines: &PipelineRegistry) -> Self {
        Self {
            groups: pipelines
                .iter()
                .map(|p| RenderGroup {
                    pipeline: p.id,
                    items: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn push(&mut self, pipeline: PipelineId, item: DrawItem) {
        match self.groups.iter_mut().find(|g| g.pipeline == pipeline) {
            Some(group) => group.items.push(item),
            None => self.groups.push(RenderGroup {
                pipeline,
                items: vec![item],
            }),
        }
    }

    pub fn groups(&self) -> &[RenderGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a single draw could not be bound. Never fatal: the draw is skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("pipeline {0:?} is not loaded")]
    UnknownPipeline(PipelineId),

    #[error("material {0:?} is not registered")]
    MissingMaterial(MaterialId),

    #[error("pipeline {0:?} has no material bundle buffer")]
    MissingBundle(PipelineId),

    #[error("component {0:?} has no instance buffer")]
    MissingInstances(ComponentId),

    #[error("slot {slot} is outside a buffer of {capacity} elements")]
    SlotOutOfRange { slot: usize, capacity: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmitStats {
    pub draws: usize,
    pub skipped: usize,
}

/// Everything one draw needs, resolved before any command is recorded.
struct Bindings {
    object: usize,
    material: (BindSlot, BufferHandle, usize),
    instances: Option<(BufferHandle, u32)>,
    vertices: Option<(BufferHandle, usize)>,
}

/// Records the draw commands of one frame into the current frame resource.
pub struct DrawSubmitter<'a> {
    gpu: &'a Gpu,
    frame: &'a FrameResource,
    table: Option<&'a DescriptorTable>,
    pipelines: &'a PipelineRegistry,
    materials: &'a MaterialTable,
}

impl<'a> DrawSubmitter<'a> {
    pub fn new(
        gpu: &'a Gpu,
        frame: &'a FrameResource,
        table: Option<&'a DescriptorTable>,
        pipelines: &'a PipelineRegistry,
        materials: &'a MaterialTable,
    ) -> Self {
        Self {
            gpu,
            frame,
            table,
            pipelines,
            materials,
        }
    }

    pub fn submit(&self, lists: &RenderLists) -> SubmitStats {
        let context = self.frame.context();
        let mut stats = SubmitStats::default();

        if let Some(table) = self.table {
            self.gpu
                .record(context, Command::SetDescriptorTable(table.raw()));
        }
        self.gpu.record(
            context,
            Command::BindConstants {
                slot: BindSlot::Pass,
                buffer: self.frame.pass().raw(),
                offset: 0,
            },
        );

        for group in lists.groups() {
            let Some(pipeline) = self.pipelines.get(group.pipeline) else {
                if !group.items.is_empty() {
                    tracing::warn!(
                        pipeline = ?group.pipeline,
                        draws = group.items.len(),
                        "{}",
                        BindError::UnknownPipeline(group.pipeline)
                    );
                }
                stats.skipped += group.items.len();
                continue;
            };

            let mut pipeline_set = false;
            for item in &group.items {
                let bindings = match self.resolve(pipeline, item) {
                    Ok(bindings) => bindings,
                    Err(err) => {
                        tracing::warn!(component = ?item.component, "skipping draw: {err}");
                        stats.skipped += 1;
                        continue;
                    }
                };

                if !pipeline_set {
                    self.gpu.record(context, Command::SetPipeline(pipeline.id));
                    pipeline_set = true;
                }

                self.record(&bindings, item);
                stats.draws += 1;
            }
        }

        stats
    }

    fn resolve(&self, pipeline: &Pipeline, item: &DrawItem) -> Result<Bindings, BindError> {
        let objects = self.frame.objects();
        if item.slot >= objects.capacity() {
            return Err(BindError::SlotOutOfRange {
                slot: item.slot,
                capacity: objects.capacity(),
            });
        }

        let material_slot = self
            .materials
            .slot(item.material)
            .ok_or(BindError::MissingMaterial(item.material))?;

        let material = if pipeline.material_bundle {
            let bundles: &ConstantBuffer<BundleConstants> = self
                .frame
                .bundle(pipeline.id)
                .ok_or(BindError::MissingBundle(pipeline.id))?;
            Self::check_slot(material_slot, bundles.capacity())?;

            (BindSlot::MaterialBundle, bundles.raw(), bundles.offset_of(material_slot))
        } else {
            let materials: &ConstantBuffer<MaterialConstants> = self.frame.materials();
            Self::check_slot(material_slot, materials.capacity())?;

            (BindSlot::Material, materials.raw(), materials.offset_of(material_slot))
        };

        let instances = match item.instances {
            Some(count) => {
                let buffer: &InstanceBuffer<InstanceData> = self
                    .frame
                    .instance_buffer(item.component)
                    .ok_or(BindError::MissingInstances(item.component))?;
                Some((buffer.raw(), count))
            }
            None => None,
        };

        let vertices = match item.vertex_start {
            Some(start) => {
                let buffer = self.frame.runtime_vertices();
                Self::check_slot(start, buffer.capacity())?;
                Some((buffer.raw(), buffer.offset_of(start)))
            }
            None => None,
        };

        Ok(Bindings {
            object: objects.offset_of(item.slot),
            material,
            instances,
            vertices,
        })
    }

    fn check_slot(slot: usize, capacity: usize) -> Result<(), BindError> {
        if slot >= capacity {
            return Err(BindError::SlotOutOfRange { slot, capacity });
        }

        Ok(())
    }

    fn record(&self, bindings: &Bindings, item: &DrawItem) {
        let context = self.frame.context();

        self.gpu.record(
            context,
            Command::BindConstants {
                slot: BindSlot::Object,
                buffer: self.frame.objects().raw(),
                offset: bindings.object,
            },
        );

        let (slot, buffer, offset) = bindings.material;
        self.gpu.record(
            context,
            Command::BindConstants {
                slot,
                buffer,
                offset,
            },
        );

        if let Some((buffer, offset)) = bindings.vertices {
            self.gpu.record(
                context,
                Command::BindVertices {
                    buffer,
                    offset,
                    stride: VertexBuffer::<RuntimeVertex>::stride(),
                },
            );
        }

        let instance_count = match bindings.instances {
            Some((buffer, count)) => {
                self.gpu.record(
                    context,
                    Command::BindInstances {
                        buffer,
                        stride: InstanceBuffer::<InstanceData>::stride(),
                    },
                );
                count
            }
            None => 1,
        };

        self.gpu.record(
            context,
            Command::DrawIndexedInstanced {
                index_count: item.index_count,
                instance_count,
            },
        );
    }
}

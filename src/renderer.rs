use std::{ops::Range, sync::Arc};

use glam::Mat4;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    bounds::BoundingVolume,
    camera::{Camera, CameraSnapshot},
    config::RenderConfig,
    cull::{Visibility, VisibilityCuller},
    error::{Error, Result},
    frame::{
        constants::{ObjectConstants, PassConstants, RuntimeVertex},
        FrameRing, FrameStats,
    },
    graphics::{
        descriptor_heap::DescriptorHeapBuilder,
        device::Gpu,
        types::{PipelineId, RebuildReason, TextureId, UiObjectId},
    },
    jobs::{JobQueue, SceneCommand},
    scene::{
        ComponentDesc, ComponentId, EntityDesc, EntityId, InstancedMeshData, Material, MaterialId,
        MaterialTable, World,
    },
    slots::{self, AllocatorState},
    submit::{DrawItem, DrawSubmitter, Pipeline, PipelineRegistry, RenderLists},
};

/// Entry point for gameplay code.
///
/// All scene state sits behind one lock. Structural changes take it, finish
/// any buffer recreation they cause, and release it before returning; the
/// per-frame work in [`begin_frame`](Self::begin_frame) and
/// [`end_frame`](Self::end_frame) holds it while it runs.
#[derive(Debug)]
pub struct Renderer {
    gpu: Gpu,
    config: RenderConfig,
    scene: Mutex<SceneState>,
    jobs: JobQueue,
}

impl Renderer {
    pub fn new(gpu: Gpu, config: RenderConfig) -> Result<Self> {
        config.validate()?;

        let scene = SceneState::new(&gpu, &config)?;
        let jobs = JobQueue::new(config.worker_threads)?;

        tracing::info!(
            frames = config.frames_in_flight,
            object_chunk = config.object_chunk,
            material_chunk = config.material_chunk,
            "renderer created"
        );

        Ok(Self {
            gpu,
            config,
            scene: Mutex::new(scene),
            jobs,
        })
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    /// Locks the scene for inspection.
    pub fn scene(&self) -> MutexGuard<'_, SceneState> {
        self.scene.lock()
    }

    pub fn spawn(&self, desc: EntityDesc) -> Result<EntityId> {
        self.scene.lock().spawn(desc)
    }

    pub fn despawn(&self, entity: EntityId) -> Result<()> {
        self.scene.lock().despawn(entity)
    }

    /// Adds a component subtree under `parent`, or as a new root when `parent`
    /// is `None`.
    pub fn add_mesh_slot(
        &self,
        entity: EntityId,
        parent: Option<ComponentId>,
        desc: ComponentDesc,
    ) -> Result<ComponentId> {
        self.scene.lock().add_mesh_slot(entity, parent, desc)
    }

    /// Removes `component`, which must belong to `entity`, and everything
    /// under it.
    pub fn remove_mesh_slot(&self, entity: EntityId, component: ComponentId) -> Result<()> {
        self.scene.lock().remove_mesh_slot(entity, component)
    }

    pub fn register_material(&self, material: Material) -> Result<MaterialId> {
        self.scene.lock().register_material(material)
    }

    pub fn update_material(&self, id: MaterialId, material: Material) -> Result<()> {
        self.scene.lock().update_material(id, material)
    }

    pub fn unregister_material(&self, id: MaterialId) -> Result<()> {
        self.scene.lock().unregister_material(id)
    }

    pub fn register_texture(&self, texture: TextureId) -> bool {
        self.scene.lock().heap.register_texture(texture)
    }

    pub fn unregister_texture(&self, texture: TextureId) -> bool {
        self.scene.lock().heap.unregister_texture(texture)
    }

    pub fn register_ui_object(&self, object: UiObjectId, visible: bool) -> bool {
        self.scene.lock().heap.register_ui_object(object, visible)
    }

    pub fn set_ui_visible(&self, object: UiObjectId, visible: bool) -> bool {
        self.scene.lock().heap.set_ui_visible(object, visible)
    }

    pub fn unregister_ui_object(&self, object: UiObjectId) -> bool {
        self.scene.lock().heap.unregister_ui_object(object)
    }

    /// Commits every pending descriptor change with a single rebuild.
    pub fn rebuild_descriptors(&self) -> Result<bool> {
        let mut scene = self.scene.lock();
        let SceneState { ring, heap, .. } = &mut *scene;

        heap.rebuild_if_needed(ring)
    }

    pub fn set_default_pipeline(&self, pipeline: Pipeline) -> Result<()> {
        self.scene.lock().set_default_pipeline(pipeline)
    }

    pub fn register_pipeline(&self, pipeline: Pipeline) -> Result<bool> {
        self.scene.lock().register_pipeline(pipeline)
    }

    pub fn unregister_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        self.scene.lock().unregister_pipeline(id)
    }

    pub fn mark_dirty(&self, component: ComponentId) -> Result<()> {
        self.scene.lock().mark_dirty(component)
    }

    pub fn set_transform(&self, entity: EntityId, transform: Mat4) -> Result<()> {
        self.scene.lock().set_transform(entity, transform)
    }

    pub fn set_cull_distance(&self, entity: EntityId, distance: Option<f32>) -> Result<()> {
        self.scene.lock().set_cull_distance(entity, distance)
    }

    pub fn add_instance(&self, component: ComponentId, world: Mat4) -> Result<usize> {
        self.scene.lock().add_instance(component, world)
    }

    pub fn clear_instances(&self, component: ComponentId) -> Result<()> {
        self.scene.lock().clear_instances(component)
    }

    /// Shared instance list of an instanced mesh. Appending through it does
    /// not take the scene lock.
    pub fn instances(&self, component: ComponentId) -> Result<Arc<InstancedMeshData>> {
        self.scene.lock().instances(component)
    }

    /// Replaces the geometry of a mesh component. Bounds are recomputed from
    /// the vertex positions; runtime meshes also re-upload their vertices.
    pub fn set_geometry(
        &self,
        component: ComponentId,
        vertices: Vec<RuntimeVertex>,
        index_count: u32,
    ) -> Result<()> {
        self.scene
            .lock()
            .set_geometry(component, vertices, index_count)
    }

    /// Applies background results, commits pending descriptor changes, moves
    /// to the next frame resource and writes the pass constants.
    pub fn begin_frame(&self, camera: &Camera, delta_time: f32) -> Result<()> {
        let commands = self.jobs.drain();
        let mut scene = self.scene.lock();

        for command in commands {
            if let Err(err) = scene.apply(command) {
                if err.is_fatal() {
                    return Err(err);
                }
                tracing::warn!("dropping background scene command: {err}");
            }
        }

        scene.begin_frame(camera, delta_time)
    }

    /// Uploads dirty data, culls, records draws and submits the frame.
    pub fn end_frame(&self) -> Result<FrameStats> {
        self.scene.lock().end_frame()
    }

    /// Waits for background jobs and for the GPU to go idle.
    pub fn shutdown(&self) -> Result<()> {
        self.jobs.wait_idle();
        self.scene.lock().ring.flush()?;

        tracing::info!("renderer idle");
        Ok(())
    }
}

/// Everything guarded by the renderer's scene lock.
#[derive(Debug)]
pub struct SceneState {
    ring: FrameRing,
    alloc: AllocatorState,
    world: World,
    materials: MaterialTable,
    heap: DescriptorHeapBuilder,
    pipelines: PipelineRegistry,
    camera: CameraSnapshot,
    frame_index: u64,
    total_time: f32,
    in_frame: bool,
    default_cull_distance: Option<f32>,
    instance_chunk: usize,
}

impl SceneState {
    fn new(gpu: &Gpu, config: &RenderConfig) -> Result<Self> {
        let alloc = AllocatorState::new(config);
        let ring = FrameRing::new(gpu, config.frames_in_flight, alloc.capacities())?;

        Ok(Self {
            ring,
            alloc,
            world: World::new(),
            materials: MaterialTable::new(),
            heap: DescriptorHeapBuilder::new(gpu, config.blur_descriptors),
            pipelines: PipelineRegistry::new(),
            camera: CameraSnapshot::default(),
            frame_index: 0,
            total_time: 0.0,
            in_frame: false,
            default_cull_distance: config.default_cull_distance,
            instance_chunk: config.instance_chunk,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    pub fn allocators(&self) -> &AllocatorState {
        &self.alloc
    }

    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    pub fn heap(&self) -> &DescriptorHeapBuilder {
        &self.heap
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn camera(&self) -> &CameraSnapshot {
        &self.camera
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn check_partition(&self) -> Result<()> {
        slots::check_partition(&self.world, self.alloc.objects.live())
    }

    fn frames(&self) -> u32 {
        self.ring.frames_in_flight()
    }

    fn apply(&mut self, command: SceneCommand) -> Result<()> {
        match command {
            SceneCommand::Spawn(desc) => self.spawn(desc).map(drop),
            SceneCommand::Despawn(entity) => self.despawn(entity),
            SceneCommand::SetTransform(entity, transform) => self.set_transform(entity, transform),
            SceneCommand::SetCullDistance(entity, distance) => {
                self.set_cull_distance(entity, distance)
            }
            SceneCommand::MarkDirty(component) => self.mark_dirty(component),
            SceneCommand::AddInstance(component, world) => {
                self.add_instance(component, world).map(drop)
            }
            SceneCommand::ClearInstances(component) => self.clear_instances(component),
        }
    }

    fn spawn(&mut self, mut desc: EntityDesc) -> Result<EntityId> {
        if desc.cull_distance.is_none() {
            desc.cull_distance = self.default_cull_distance;
        }

        let meshes = desc.mesh_count();
        let start = slots::allocate_objects(&mut self.alloc, &mut self.ring, &mut self.world, meshes)?;
        let entity = self.world.insert(desc, start, self.frames())?;

        for component in self.world.component_ids(entity)? {
            self.place_vertices(component)?;
        }

        tracing::debug!(?entity, start, meshes, "spawned entity");
        Ok(entity)
    }

    fn despawn(&mut self, entity: EntityId) -> Result<()> {
        let components = self.world.component_ids(entity)?;
        let vertex_ranges = self.vertex_ranges(&components);
        let instanced = self.instanced(&components);

        let (record, _) = self.world.remove(entity)?;

        self.free_vertex_ranges(vertex_ranges)?;
        for component in instanced {
            self.ring.retire_instances(component);
        }

        slots::free_objects(
            &mut self.alloc,
            &mut self.ring,
            &mut self.world,
            record.start(),
            record.mesh_count(),
            None,
        )?;

        tracing::debug!(?entity, start = record.start(), meshes = record.mesh_count(), "despawned entity");
        Ok(())
    }

    fn add_mesh_slot(
        &mut self,
        entity: EntityId,
        parent: Option<ComponentId>,
        desc: ComponentDesc,
    ) -> Result<ComponentId> {
        let old = self
            .world
            .entity(entity)
            .ok_or(Error::UnknownEntity(entity))?
            .range();
        let added = desc.mesh_count();

        let component = self.world.attach(entity, parent, desc)?;

        if added > 0 {
            self.relocate(entity, old.clone(), added + old.len())?;
        }

        for id in self.world.subtree_ids(component)? {
            self.place_vertices(id)?;
        }

        tracing::debug!(?entity, ?component, added, "added mesh slots");
        Ok(component)
    }

    fn remove_mesh_slot(&mut self, entity: EntityId, component: ComponentId) -> Result<()> {
        let owner = self
            .world
            .component(component)
            .ok_or(Error::UnknownComponent(component))?
            .entity();
        if owner != entity {
            return Err(Error::UnknownComponent(component));
        }

        let old = self
            .world
            .entity(entity)
            .ok_or(Error::UnknownEntity(entity))?
            .range();

        let subtree = self.world.subtree_ids(component)?;
        let vertex_ranges = self.vertex_ranges(&subtree);
        let instanced = self.instanced(&subtree);

        self.world.detach(component)?;

        self.free_vertex_ranges(vertex_ranges)?;
        for id in instanced {
            self.ring.retire_instances(id);
        }

        let remaining = self
            .world
            .entity(entity)
            .ok_or(Error::UnknownEntity(entity))?
            .mesh_count();
        let removed = old.len() - remaining;
        if removed > 0 {
            self.relocate(entity, old, remaining)?;
        }

        tracing::debug!(?entity, ?component, removed, "removed mesh slots");
        Ok(())
    }

    /// Moves the entity from `old` to a range of `count` slots and reassigns
    /// its mesh slots. An entity at the end of the live range grows or shrinks
    /// in place; any other entity is appended at the end and the hole it left
    /// is compacted.
    fn relocate(&mut self, entity: EntityId, old: Range<usize>, count: usize) -> Result<()> {
        let old_count = old.len();
        let start = if old.end == self.alloc.objects.live() {
            if count > old_count {
                slots::allocate_objects(
                    &mut self.alloc,
                    &mut self.ring,
                    &mut self.world,
                    count - old_count,
                )?;
            } else {
                slots::free_objects(
                    &mut self.alloc,
                    &mut self.ring,
                    &mut self.world,
                    old.start + count,
                    old_count - count,
                    Some(entity),
                )?;
            }
            old.start
        } else {
            let appended =
                slots::allocate_objects(&mut self.alloc, &mut self.ring, &mut self.world, count)?;
            slots::free_objects(
                &mut self.alloc,
                &mut self.ring,
                &mut self.world,
                old.start,
                old_count,
                Some(entity),
            )?;
            appended - old_count
        };

        self.world.entity_mut(entity)?.start = start;
        self.world.assign_slots(entity, self.frames())
    }

    /// Gives a runtime mesh its vertex range and queues the upload.
    fn place_vertices(&mut self, component: ComponentId) -> Result<()> {
        let len = match self.world.component(component).and_then(|c| c.as_runtime_mesh()) {
            Some(runtime) => runtime.vertices().len(),
            None => return Ok(()),
        };

        let start =
            slots::allocate_vertices(&mut self.alloc, &mut self.ring, &mut self.world, len)?;

        let frames = self.frames();
        if let Some(runtime) = self.world.component_mut(component)?.as_runtime_mesh_mut() {
            runtime.vertex_start = start;
            runtime.vertices_pending = frames;
        }

        Ok(())
    }

    fn vertex_ranges(&self, components: &[ComponentId]) -> Vec<(usize, usize)> {
        let mut ranges: Vec<(usize, usize)> = components
            .iter()
            .filter_map(|id| self.world.component(*id)?.as_runtime_mesh())
            .map(|runtime| (runtime.vertex_start(), runtime.vertices().len()))
            .filter(|(_, len)| *len > 0)
            .collect();
        ranges.sort_unstable_by(|a, b| b.cmp(a));

        ranges
    }

    /// Ranges must be sorted by descending start so earlier frees do not
    /// move later ones.
    fn free_vertex_ranges(&mut self, ranges: Vec<(usize, usize)>) -> Result<()> {
        for (start, len) in ranges {
            slots::free_vertices(
                &mut self.alloc,
                &mut self.ring,
                &mut self.world,
                start,
                len,
                None,
            )?;
        }

        Ok(())
    }

    fn instanced(&self, components: &[ComponentId]) -> Vec<ComponentId> {
        components
            .iter()
            .copied()
            .filter(|id| {
                self.world
                    .component(*id)
                    .and_then(|c| c.as_mesh_like())
                    .is_some_and(|mesh| mesh.instances().is_some())
            })
            .collect()
    }

    fn register_material(&mut self, material: Material) -> Result<MaterialId> {
        let slot = match self.materials.take_free_slot() {
            Some(slot) => slot,
            None => {
                let (slot, resized) =
                    slots::allocate_material(&mut self.alloc, &mut self.ring, &mut self.materials)?;
                if resized {
                    self.rebuild_material_views()?;
                }
                slot
            }
        };

        let id = self.materials.insert_at(slot, material, self.frames());
        tracing::debug!(?id, slot, "registered material");

        Ok(id)
    }

    fn update_material(&mut self, id: MaterialId, material: Material) -> Result<()> {
        let frames = self.frames();

        if !self.materials.update(id, material, frames) {
            return Err(Error::UnknownMaterial(id));
        }

        Ok(())
    }

    fn unregister_material(&mut self, id: MaterialId) -> Result<()> {
        let (slot, trimmed) = self.materials.remove(id).ok_or(Error::UnknownMaterial(id))?;

        if trimmed > 0 {
            let start = self.materials.slot_count();
            let resized = slots::free_materials(
                &mut self.alloc,
                &mut self.ring,
                &mut self.materials,
                start,
                trimmed,
            )?;
            if resized {
                self.rebuild_material_views()?;
            }
        }

        tracing::debug!(?id, slot, trimmed, "unregistered material");
        Ok(())
    }

    /// The material buffers of every ring slot were just recreated, so the
    /// bound table points at released buffers until it is rebuilt.
    fn rebuild_material_views(&mut self) -> Result<()> {
        self.heap.request(RebuildReason::Materials);
        self.heap.rebuild(&self.ring)?;

        Ok(())
    }

    fn set_default_pipeline(&mut self, pipeline: Pipeline) -> Result<()> {
        if let Some(previous) = self.pipelines.set_default(pipeline) {
            if previous.material_bundle && previous.id != pipeline.id {
                self.ring.remove_bundle(previous.id)?;
            }
        }

        if pipeline.material_bundle {
            self.add_bundle(pipeline.id)?;
        }

        Ok(())
    }

    fn register_pipeline(&mut self, pipeline: Pipeline) -> Result<bool> {
        if !self.pipelines.register(pipeline) {
            return Ok(false);
        }

        if pipeline.material_bundle {
            self.add_bundle(pipeline.id)?;
        }

        Ok(true)
    }

    fn add_bundle(&mut self, pipeline: PipelineId) -> Result<()> {
        if self.ring.has_bundle(pipeline) {
            return Ok(());
        }

        self.ring.add_bundle(pipeline)?;
        self.materials.mark_all_dirty(self.frames());

        Ok(())
    }

    fn unregister_pipeline(&mut self, id: PipelineId) -> Result<Option<Pipeline>> {
        let removed = self.pipelines.unregister(id);

        if removed.is_some_and(|p| p.material_bundle) {
            self.ring.remove_bundle(id)?;
        }

        Ok(removed)
    }

    fn mark_dirty(&mut self, component: ComponentId) -> Result<()> {
        let frames = self.frames();
        let component_ref = self.world.component_mut(component)?;

        if !component_ref.is_mesh_bearing() {
            return Err(Error::NotMeshBearing(component));
        }

        component_ref.mark_dirty(frames);
        Ok(())
    }

    fn set_transform(&mut self, entity: EntityId, transform: Mat4) -> Result<()> {
        let record = self.world.entity_mut(entity)?;
        record.transform = transform;
        record.transform_dirty = true;

        Ok(())
    }

    fn set_cull_distance(&mut self, entity: EntityId, distance: Option<f32>) -> Result<()> {
        self.world.entity_mut(entity)?.cull_distance = distance;

        Ok(())
    }

    fn instances(&self, component: ComponentId) -> Result<Arc<InstancedMeshData>> {
        let record = self
            .world
            .component(component)
            .ok_or(Error::UnknownComponent(component))?;
        let mesh = record
            .as_mesh_like()
            .ok_or(Error::NotMeshBearing(component))?;

        mesh.instances()
            .cloned()
            .ok_or(Error::NotInstanced(component))
    }

    fn add_instance(&mut self, component: ComponentId, world: Mat4) -> Result<usize> {
        Ok(self.instances(component)?.add(world))
    }

    fn clear_instances(&mut self, component: ComponentId) -> Result<()> {
        self.instances(component)?.clear();
        self.ring.retire_instances(component);

        Ok(())
    }

    fn set_geometry(
        &mut self,
        component: ComponentId,
        vertices: Vec<RuntimeVertex>,
        index_count: u32,
    ) -> Result<()> {
        let positions: Vec<_> = vertices.iter().map(|v| v.position).collect();
        let bounds = BoundingVolume::from_positions(&positions);

        let record = self.world.component_mut(component)?;
        let mesh = record
            .as_mesh_like_mut()
            .ok_or(Error::NotMeshBearing(component))?;
        mesh.bounds = bounds;
        mesh.index_count = index_count;

        let Some(runtime) = record.as_runtime_mesh_mut() else {
            return Ok(());
        };

        let old = (runtime.vertex_start, runtime.vertices.len());
        runtime.vertices = vertices;

        if runtime.vertices.len() == old.1 {
            runtime.vertices_pending = self.ring.frames_in_flight();
            return Ok(());
        }

        // Size changed: take a fresh range at the end, then close the old one.
        let len = runtime.vertices.len();
        let appended =
            slots::allocate_vertices(&mut self.alloc, &mut self.ring, &mut self.world, len)?;
        slots::free_vertices(
            &mut self.alloc,
            &mut self.ring,
            &mut self.world,
            old.0,
            old.1,
            Some(component),
        )?;

        let start = if old.1 > 0 { appended - old.1 } else { appended };
        let frames = self.frames();
        if let Some(runtime) = self.world.component_mut(component)?.as_runtime_mesh_mut() {
            runtime.vertex_start = start;
            runtime.vertices_pending = frames;
        }

        Ok(())
    }

    fn begin_frame(&mut self, camera: &Camera, delta_time: f32) -> Result<()> {
        self.heap.rebuild_if_needed(&self.ring)?;
        self.ring.advance()?;

        self.frame_index += 1;
        self.total_time += delta_time;
        self.camera = camera.snapshot();

        let pass = PassConstants::new(
            &self.camera,
            self.total_time,
            delta_time,
            self.frame_index as u32,
        );
        self.ring.current().pass().write(0, &pass)?;
        self.in_frame = true;

        tracing::trace!(
            frame = self.frame_index,
            slot = self.ring.current_index(),
            "frame begun"
        );
        Ok(())
    }

    fn end_frame(&mut self) -> Result<FrameStats> {
        if !std::mem::take(&mut self.in_frame) {
            return Err(Error::FrameNotStarted);
        }

        let frames = self.frames();
        self.world.propagate_transforms(frames)?;

        let mut stats = FrameStats {
            frame_index: self.frame_index,
            ..Default::default()
        };

        self.copy_dirty(&mut stats)?;
        let lists = self.cull(&mut stats)?;

        let submitted = DrawSubmitter::new(
            self.ring.gpu(),
            self.ring.current(),
            self.heap.table(),
            &self.pipelines,
            &self.materials,
        )
        .submit(&lists);
        stats.draws = submitted.draws;
        stats.skipped = submitted.skipped;

        stats.fence_value = self.ring.submit_frame()?;

        tracing::trace!(?stats, "frame submitted");
        Ok(stats)
    }

    /// Copies every object, material and runtime-mesh vertex range that
    /// still owes this ring slot an update.
    fn copy_dirty(&mut self, stats: &mut FrameStats) -> Result<()> {
        let SceneState {
            ring,
            world,
            materials,
            ..
        } = self;
        let frame = ring.current();

        for component in world.components.values_mut() {
            if component.pending() > 0 {
                if let Some(mesh) = component.as_mesh_like() {
                    let constants = ObjectConstants {
                        world: component.world(),
                        material_index: materials.slot(mesh.material).unwrap_or(0) as u32,
                        ..Default::default()
                    };
                    frame.objects().write(mesh.slot(), &constants)?;
                    stats.objects_copied += 1;
                }
                component.consume_pending();
            }

            if let Some(runtime) = component.as_runtime_mesh_mut() {
                if runtime.vertices_pending > 0 {
                    frame
                        .runtime_vertices()
                        .write_range(runtime.vertex_start, &runtime.vertices)?;
                    runtime.vertices_pending -= 1;
                }
            }
        }

        let mut result = Ok(());
        materials.drain_pending(|slot, material| {
            if result.is_err() {
                return;
            }

            result = frame
                .materials()
                .write(slot, &material.constants)
                .and_then(|()| {
                    frame
                        .bundles
                        .iter()
                        .try_for_each(|(_, bundle)| bundle.write(slot, &material.bundle))
                });
            stats.materials_copied += 1;
        });

        result
    }

    /// Culls every mesh against the frame's camera snapshot and writes the
    /// visible instances of instanced meshes.
    fn cull(&mut self, stats: &mut FrameStats) -> Result<RenderLists> {
        let SceneState {
            ring,
            world,
            pipelines,
            camera,
            instance_chunk,
            ..
        } = self;

        let culler = VisibilityCuller::new(camera);
        let mut lists = RenderLists::new(pipelines);
        let mut visible = Vec::new();
        let gpu = ring.gpu().clone();
        let frame = ring.current_mut();

        for (entity, record) in world.entities() {
            for id in world.component_ids(entity)? {
                let Some(component) = world.component(id) else {
                    continue;
                };
                let Some(mesh) = component.as_mesh_like() else {
                    continue;
                };
                stats.candidates += 1;

                let mut item = DrawItem {
                    component: id,
                    slot: mesh.slot(),
                    material: mesh.material,
                    index_count: mesh.index_count,
                    instances: None,
                    vertex_start: component
                        .as_runtime_mesh()
                        .map(|runtime| runtime.vertex_start()),
                };

                match mesh.instances() {
                    Some(instances) => {
                        visible.clear();
                        let culled = culler.cull_instances(
                            instances,
                            &mesh.bounds,
                            record.cull_distance(),
                            &mut visible,
                        );
                        stats.culled_by_distance += culled.culled_by_distance;
                        stats.culled_by_frustum += culled.culled_by_frustum;

                        if visible.is_empty() {
                            continue;
                        }

                        frame
                            .ensure_instance_buffer(&gpu, id, visible.len(), *instance_chunk)?
                            .write_range(0, &visible)?;
                        stats.instances_written += visible.len();
                        item.instances = Some(visible.len() as u32);
                    }
                    None => {
                        match culler.test(component.world(), &mesh.bounds, record.cull_distance()) {
                            Visibility::Visible => {}
                            Visibility::CulledByDistance => {
                                stats.culled_by_distance += 1;
                                continue;
                            }
                            Visibility::CulledByFrustum => {
                                stats.culled_by_frustum += 1;
                                continue;
                            }
                        }
                    }
                }

                lists.push(mesh.pipeline, item);
            }
        }

        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::{vec3, Vec3};

    use super::*;
    use crate::{
        frame::constants::MaterialConstants,
        graphics::{
            headless::{HeadlessDevice, Timeline},
            types::Command,
        },
        scene::MeshDesc,
    };

    const PIPELINE: PipelineId = PipelineId::from_raw(1);

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<Renderer>();

    fn renderer(chunk: usize) -> (Arc<HeadlessDevice>, Renderer) {
        let device = Arc::new(HeadlessDevice::new(Timeline::Immediate));
        let config = RenderConfig {
            object_chunk: chunk,
            material_chunk: chunk,
            runtime_vertex_chunk: chunk,
            instance_chunk: 2,
            worker_threads: 1,
            ..Default::default()
        };
        let renderer = Renderer::new(Gpu::from_arc(device.clone()), config).unwrap();
        renderer.set_default_pipeline(Pipeline::new(PIPELINE)).unwrap();

        (device, renderer)
    }

    fn camera() -> Camera {
        Camera::look_at(Vec3::ZERO, Vec3::Z, std::f32::consts::FRAC_PI_2, 1.0)
    }

    fn cube(material: MaterialId) -> MeshDesc {
        MeshDesc::new(PIPELINE, material, 36)
            .with_positions(&[Vec3::splat(-0.5), Vec3::splat(0.5)])
    }

    fn at(z: f32, material: MaterialId) -> EntityDesc {
        EntityDesc::new(Mat4::from_translation(vec3(0.0, 0.0, z)))
            .with_component(ComponentDesc::mesh(cube(material)))
    }

    #[test]
    fn frame_draws_visible_and_culls_hidden() {
        let (_, renderer) = renderer(4);
        let material = renderer.register_material(Material::default()).unwrap();

        renderer.spawn(at(5.0, material)).unwrap();
        renderer.spawn(at(-5.0, material)).unwrap();
        renderer
            .spawn(at(50.0, material).with_cull_distance(10.0))
            .unwrap();

        renderer.begin_frame(&camera(), 0.016).unwrap();
        let stats = renderer.end_frame().unwrap();

        assert_eq!(stats.candidates, 3);
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.culled_by_frustum, 1);
        assert_eq!(stats.culled_by_distance, 1);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn object_constants_reach_every_ring_slot() {
        let (_, renderer) = renderer(4);
        let material = renderer.register_material(Material::default()).unwrap();
        let entity = renderer.spawn(at(5.0, material)).unwrap();

        for _ in 0..3 {
            renderer.begin_frame(&camera(), 0.016).unwrap();
            renderer.end_frame().unwrap();
        }

        let scene = renderer.scene();
        let root = scene.world().entity(entity).unwrap().roots()[0];
        assert_eq!(scene.world().component(root).unwrap().pending(), 0);

        for frame in scene.ring().frames() {
            let constants = frame.objects().read(0).unwrap();
            assert_eq!(constants.world.w_axis.z, 5.0);
        }
    }

    #[test]
    fn end_frame_without_begin_is_rejected() {
        let (_, renderer) = renderer(4);

        assert!(matches!(renderer.end_frame(), Err(Error::FrameNotStarted)));
    }

    #[test]
    fn add_and_remove_mesh_slot_relocate_entity() {
        let (_, renderer) = renderer(4);
        let material = renderer.register_material(Material::default()).unwrap();

        let a = renderer.spawn(at(1.0, material)).unwrap();
        let b = renderer.spawn(at(2.0, material)).unwrap();

        let added = renderer
            .add_mesh_slot(a, None, ComponentDesc::mesh(cube(material)))
            .unwrap();

        {
            let scene = renderer.scene();
            scene.check_partition().unwrap();
            assert_eq!(scene.world().entity(b).unwrap().start(), 0);
            assert_eq!(scene.world().entity(a).unwrap().range(), 1..3);
        }

        assert!(matches!(
            renderer.remove_mesh_slot(b, added),
            Err(Error::UnknownComponent(_))
        ));
        renderer.remove_mesh_slot(a, added).unwrap();

        let scene = renderer.scene();
        scene.check_partition().unwrap();
        assert_eq!(scene.world().entity(a).unwrap().range(), 1..2);
        assert_eq!(scene.allocators().objects.live(), 2);
    }

    #[test]
    fn instanced_mesh_writes_only_visible_instances() {
        let (device, renderer) = renderer(4);
        let material = renderer.register_material(Material::default()).unwrap();
        let entity = renderer
            .spawn(
                EntityDesc::new(Mat4::IDENTITY)
                    .with_component(ComponentDesc::mesh(cube(material).instanced())),
            )
            .unwrap();
        let component = renderer.scene().world().entity(entity).unwrap().roots()[0];

        for z in [5.0, -5.0, 8.0, 12.0] {
            renderer
                .add_instance(component, Mat4::from_translation(vec3(0.0, 0.0, z)))
                .unwrap();
        }

        renderer.begin_frame(&camera(), 0.016).unwrap();
        let stats = renderer.end_frame().unwrap();

        assert_eq!(stats.instances_written, 3);
        assert_eq!(stats.culled_by_frustum, 1);

        let commands = device.take_submissions().pop().unwrap();
        assert!(commands.contains(&Command::DrawIndexedInstanced {
            index_count: 36,
            instance_count: 3,
        }));

        let scene = renderer.scene();
        let buffer = scene.ring().current().instance_buffer(component).unwrap();
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(buffer.read(1).unwrap().world.w_axis.z, 8.0);
    }

    #[test]
    fn cleared_instance_buffer_shrinks() {
        let (_, renderer) = renderer(4);
        let material = renderer.register_material(Material::default()).unwrap();
        let entity = renderer
            .spawn(
                EntityDesc::new(Mat4::IDENTITY)
                    .with_component(ComponentDesc::mesh(cube(material).instanced())),
            )
            .unwrap();
        let component = renderer.scene().world().entity(entity).unwrap().roots()[0];

        for _ in 0..100 {
            renderer
                .add_instance(component, Mat4::from_translation(vec3(0.0, 0.0, 5.0)))
                .unwrap();
        }

        renderer.begin_frame(&camera(), 0.016).unwrap();
        renderer.end_frame().unwrap();
        {
            let scene = renderer.scene();
            let buffer = scene.ring().current().instance_buffer(component).unwrap();
            assert_eq!(buffer.capacity(), 100);
        }

        renderer.clear_instances(component).unwrap();
        assert!(renderer
            .scene()
            .ring()
            .frames()
            .iter()
            .all(|frame| frame.instance_buffer(component).is_none()));

        renderer
            .add_instance(component, Mat4::from_translation(vec3(0.0, 0.0, 5.0)))
            .unwrap();
        renderer.begin_frame(&camera(), 0.016).unwrap();
        let stats = renderer.end_frame().unwrap();

        assert_eq!(stats.instances_written, 1);
        let scene = renderer.scene();
        let buffer = scene.ring().current().instance_buffer(component).unwrap();
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn material_growth_rebuilds_descriptors_at_once() {
        let (device, renderer) = renderer(2);
        renderer.rebuild_descriptors().unwrap();
        let tables = device.tables_created();

        let ids: Vec<MaterialId> = (0..3)
            .map(|i| {
                renderer
                    .register_material(Material {
                        constants: MaterialConstants {
                            roughness: i as f32,
                            ..Default::default()
                        },
                        ..Default::default()
                    })
                    .unwrap()
            })
            .collect();

        assert!(renderer.scene().heap().pending().is_empty());
        assert_eq!(device.tables_created(), tables + 1);
        assert!(!renderer.rebuild_descriptors().unwrap());
        assert_eq!(
            renderer.scene().heap().table().unwrap().layout().material_capacity,
            4
        );

        renderer.begin_frame(&camera(), 0.016).unwrap();
        renderer.end_frame().unwrap();

        let scene = renderer.scene();
        let slot = scene.materials().slot(ids[2]).unwrap();
        let written = scene.ring().current().materials().read(slot).unwrap();
        assert_eq!(written.roughness, 2.0);
    }

    #[test]
    fn background_commands_apply_at_frame_start() {
        let (_, renderer) = renderer(4);
        let material = renderer.register_material(Material::default()).unwrap();

        renderer.jobs().spawn(move |sink| {
            sink.spawn(at(5.0, material));
            sink.despawn(EntityId::default());
        });
        renderer.jobs().wait_idle();

        assert_eq!(renderer.scene().world().entity_count(), 0);

        renderer.begin_frame(&camera(), 0.016).unwrap();
        let stats = renderer.end_frame().unwrap();

        assert_eq!(renderer.scene().world().entity_count(), 1);
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn runtime_mesh_geometry_change_moves_vertices() {
        let (_, renderer) = renderer(4);
        let material = renderer.register_material(Material::default()).unwrap();
        let vertex = |z: f32| RuntimeVertex {
            position: vec3(0.0, 0.0, z),
            ..Default::default()
        };

        let first = renderer
            .spawn(EntityDesc::new(Mat4::IDENTITY).with_component(ComponentDesc::runtime_mesh(
                cube(material),
                vec![vertex(1.0); 3],
            )))
            .unwrap();
        let second = renderer
            .spawn(EntityDesc::new(Mat4::IDENTITY).with_component(ComponentDesc::runtime_mesh(
                cube(material),
                vec![vertex(2.0); 2],
            )))
            .unwrap();

        let first_mesh = renderer.scene().world().entity(first).unwrap().roots()[0];
        let second_mesh = renderer.scene().world().entity(second).unwrap().roots()[0];

        renderer
            .set_geometry(first_mesh, vec![vertex(3.0); 5], 9)
            .unwrap();

        let scene = renderer.scene();
        let start = |id| {
            scene
                .world()
                .component(id)
                .unwrap()
                .as_runtime_mesh()
                .unwrap()
                .vertex_start()
        };
        assert_eq!(start(second_mesh), 0);
        assert_eq!(start(first_mesh), 2);
        assert_eq!(scene.allocators().runtime_vertices.live(), 7);
    }
}

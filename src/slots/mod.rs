pub mod allocator;
pub mod compactor;

pub use allocator::{Resize, SlotAllocator};

use crate::{
    config::RenderConfig,
    error::{Error, Result},
    frame::{FrameRing, RingCapacities},
    scene::{ComponentId, EntityId, MaterialTable, World},
};

/// The three chunked allocators whose buffers live in every ring slot.
#[derive(Clone, Debug)]
pub struct AllocatorState {
    pub objects: SlotAllocator,
    pub runtime_vertices: SlotAllocator,
    pub materials: SlotAllocator,
}

impl AllocatorState {
    pub fn new(config: &RenderConfig) -> Self {
        let hysteresis = config.shrink_hysteresis_chunks;

        Self {
            objects: SlotAllocator::new("objects", config.object_chunk, hysteresis),
            runtime_vertices: SlotAllocator::new(
                "runtime_vertices",
                config.runtime_vertex_chunk,
                hysteresis,
            ),
            materials: SlotAllocator::new("materials", config.material_chunk, hysteresis),
        }
    }

    pub fn capacities(&self) -> RingCapacities {
        RingCapacities {
            objects: self.objects.capacity(),
            materials: self.materials.capacity(),
            runtime_vertices: self.runtime_vertices.capacity(),
        }
    }
}

/// Reserves `n` object slots at the end of the live range. Growing recreates
/// the object buffer of every ring slot and re-uploads every mesh.
pub(crate) fn allocate_objects(
    state: &mut AllocatorState,
    ring: &mut FrameRing,
    world: &mut World,
    n: usize,
) -> Result<usize> {
    let (start, resize) = state.objects.allocate(n);
    apply_object_resize(ring, world, resize)?;

    Ok(start)
}

/// Frees `start..start + n` and closes the hole.
pub(crate) fn free_objects(
    state: &mut AllocatorState,
    ring: &mut FrameRing,
    world: &mut World,
    start: usize,
    n: usize,
    exclude: Option<EntityId>,
) -> Result<()> {
    let resize = state.objects.free(start, n)?;
    compactor::compact_objects(world, start, n, ring.frames_in_flight(), exclude)?;
    apply_object_resize(ring, world, resize)
}

fn apply_object_resize(ring: &mut FrameRing, world: &mut World, resize: Option<Resize>) -> Result<()> {
    if let Some(resize) = resize {
        ring.resize_objects(resize.capacity())?;
        world.mark_all_mesh_dirty(ring.frames_in_flight());
    }

    Ok(())
}

pub(crate) fn allocate_vertices(
    state: &mut AllocatorState,
    ring: &mut FrameRing,
    world: &mut World,
    n: usize,
) -> Result<usize> {
    let (start, resize) = state.runtime_vertices.allocate(n);
    apply_vertex_resize(ring, world, resize)?;

    Ok(start)
}

pub(crate) fn free_vertices(
    state: &mut AllocatorState,
    ring: &mut FrameRing,
    world: &mut World,
    start: usize,
    n: usize,
    exclude: Option<ComponentId>,
) -> Result<()> {
    let resize = state.runtime_vertices.free(start, n)?;
    compactor::compact_runtime_vertices(world, start, n, ring.frames_in_flight(), exclude)?;
    apply_vertex_resize(ring, world, resize)
}

fn apply_vertex_resize(ring: &mut FrameRing, world: &mut World, resize: Option<Resize>) -> Result<()> {
    if let Some(resize) = resize {
        ring.resize_runtime_vertices(resize.capacity())?;
        world.mark_all_vertices_dirty(ring.frames_in_flight());
    }

    Ok(())
}

/// Appends one material slot. Returns the slot and whether the material
/// buffers were recreated, which invalidates their descriptors.
pub(crate) fn allocate_material(
    state: &mut AllocatorState,
    ring: &mut FrameRing,
    materials: &mut MaterialTable,
) -> Result<(usize, bool)> {
    let (slot, resize) = state.materials.allocate(1);
    let resized = apply_material_resize(ring, materials, resize)?;

    Ok((slot, resized))
}

/// Releases trimmed trailing material slots `start..start + n`.
pub(crate) fn free_materials(
    state: &mut AllocatorState,
    ring: &mut FrameRing,
    materials: &mut MaterialTable,
    start: usize,
    n: usize,
) -> Result<bool> {
    let resize = state.materials.free(start, n)?;
    apply_material_resize(ring, materials, resize)
}

fn apply_material_resize(
    ring: &mut FrameRing,
    materials: &mut MaterialTable,
    resize: Option<Resize>,
) -> Result<bool> {
    let Some(resize) = resize else {
        return Ok(false);
    };

    ring.resize_materials(resize.capacity())?;
    materials.mark_all_dirty(ring.frames_in_flight());

    Ok(true)
}

/// Checks that entity ranges, sorted by start, tile `0..live` without gaps or
/// overlaps. Entities without meshes own no slots and are skipped.
pub fn check_partition(world: &World, live: usize) -> Result<()> {
    let mut ranges: Vec<(usize, usize)> = world
        .entities()
        .map(|(_, entity)| (entity.start(), entity.mesh_count()))
        .filter(|(_, count)| *count > 0)
        .collect();
    ranges.sort_unstable();

    let mut cursor = 0;
    for (start, count) in ranges {
        if start != cursor {
            return Err(Error::Invariant(format!(
                "entity range starts at {start}, expected {cursor}"
            )));
        }
        cursor += count;
    }

    if cursor != live {
        return Err(Error::Invariant(format!(
            "entity ranges cover 0..{cursor} but {live} slots are live"
        )));
    }

    Ok(())
}

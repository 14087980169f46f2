use crate::{
    error::{Error, Result},
    scene::{ComponentId, EntityId, World},
};

/// Closes the hole left by freeing object slots `start..start + n`.
///
/// Every entity placed after the hole moves down by `n`, and so does every
/// mesh slot it owns. Moved slots are marked dirty in all `frames` ring slots
/// because their constants still sit at the old offset. `exclude` names an
/// entity that is being relocated and must not be touched. Returns the number
/// of entities moved.
pub fn compact_objects(
    world: &mut World,
    start: usize,
    n: usize,
    frames: u32,
    exclude: Option<EntityId>,
) -> Result<usize> {
    if n == 0 {
        return Ok(0);
    }

    let end = start + n;
    let mut moved = Vec::new();

    for (id, entity) in world.entities.iter_mut() {
        if Some(id) == exclude {
            continue;
        }

        let range = entity.range();
        if !range.is_empty() && range.start < end && range.end > start {
            return Err(Error::invariant(format!(
                "entity {id:?} at {range:?} overlaps freed object range {start}..{end}"
            )));
        }

        if entity.start >= end {
            entity.start -= n;
            moved.push(id);
        } else if entity.start > start {
            // Mesh-less entity sitting inside the hole.
            entity.start = start;
        }
    }

    for &id in &moved {
        for component in world.component_ids(id)? {
            let component = world.component_mut(component)?;

            if let Some(mesh) = component.as_mesh_like_mut() {
                mesh.slot = mesh.slot.checked_sub(n).ok_or_else(|| {
                    Error::invariant(format!(
                        "mesh slot {} of moved entity {id:?} is below the freed range",
                        mesh.slot
                    ))
                })?;
                component.mark_dirty(frames);
            }
        }
    }

    tracing::trace!(start, n, moved = moved.len(), "compacted object slots");

    Ok(moved.len())
}

/// Same as [`compact_objects`] for runtime-mesh vertex ranges. Moved meshes
/// re-upload their vertices into every ring slot.
pub fn compact_runtime_vertices(
    world: &mut World,
    start: usize,
    n: usize,
    frames: u32,
    exclude: Option<ComponentId>,
) -> Result<usize> {
    if n == 0 {
        return Ok(0);
    }

    let end = start + n;
    let mut moved = 0;

    for (id, component) in world.components.iter_mut() {
        if Some(id) == exclude {
            continue;
        }

        let Some(runtime) = component.as_runtime_mesh_mut() else {
            continue;
        };

        let len = runtime.vertices.len();
        if len == 0 {
            continue;
        }

        let range = runtime.vertex_start..runtime.vertex_start + len;
        if range.start < end && range.end > start {
            return Err(Error::invariant(format!(
                "runtime mesh {id:?} at {range:?} overlaps freed vertex range {start}..{end}"
            )));
        }

        if range.start >= end {
            runtime.vertex_start -= n;
            runtime.vertices_pending = frames;
            moved += 1;
        }
    }

    tracing::trace!(start, n, moved, "compacted runtime vertices");

    Ok(moved)
}

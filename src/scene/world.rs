use glam::Mat4;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};

use super::{
    Component, ComponentDesc, ComponentDescKind, ComponentId, ComponentKind, EntityDesc, EntityId,
    MeshData, RenderableEntity, RuntimeMeshData, MAX_COMPONENT_DEPTH,
};

/// Arena of entities and their component trees. Children hold indices,
/// parents are weak back-references by index.
#[derive(Debug, Default)]
pub struct World {
    pub(crate) entities: SlotMap<EntityId, RenderableEntity>,
    pub(crate) components: SlotMap<ComponentId, Component>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, id: EntityId) -> Option<&RenderableEntity> {
        self.entities.get(id)
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &RenderableEntity)> {
        self.entities.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Result<&mut RenderableEntity> {
        self.entities.get_mut(id).ok_or(Error::UnknownEntity(id))
    }

    pub(crate) fn component_mut(&mut self, id: ComponentId) -> Result<&mut Component> {
        self.components
            .get_mut(id)
            .ok_or(Error::UnknownComponent(id))
    }

    /// Creates the entity with its mesh range at `start`. Every mesh slot is
    /// marked for copy into all `frames` ring slots.
    pub(crate) fn insert(&mut self, desc: EntityDesc, start: usize, frames: u32) -> Result<EntityId> {
        let id = self.entities.insert(RenderableEntity {
            start,
            mesh_count: desc.mesh_count(),
            roots: SmallVec::new(),
            transform: desc.transform,
            cull_distance: desc.cull_distance,
            transform_dirty: true,
        });

        for component in desc.components {
            let root = self.insert_subtree(id, None, component);
            self.entities[id].roots.push(root);
        }

        self.assign_slots(id, frames)?;

        Ok(id)
    }

    fn insert_subtree(
        &mut self,
        entity: EntityId,
        parent: Option<ComponentId>,
        desc: ComponentDesc,
    ) -> ComponentId {
        let kind = match desc.kind {
            ComponentDescKind::Mesh(mesh) => ComponentKind::Mesh(MeshData::from_desc(mesh)),
            ComponentDescKind::RuntimeMesh { mesh, vertices } => {
                ComponentKind::RuntimeMesh(RuntimeMeshData {
                    mesh: MeshData::from_desc(mesh),
                    vertices,
                    vertex_start: 0,
                    vertices_pending: 0,
                })
            }
            ComponentDescKind::Light(light) => ComponentKind::Light(light),
            ComponentDescKind::Audio(audio) => ComponentKind::Audio(audio),
        };

        let id = self
            .components
            .insert(Component::new(entity, parent, desc.local, kind));

        for child in desc.children {
            let child = self.insert_subtree(entity, Some(id), child);
            self.components[id].children.push(child);
        }

        id
    }

    /// Adds a subtree under `parent` (or as a new root). Slots are not
    /// assigned; the caller relocates the entity range first.
    pub(crate) fn attach(
        &mut self,
        entity: EntityId,
        parent: Option<ComponentId>,
        desc: ComponentDesc,
    ) -> Result<ComponentId> {
        if let Some(parent) = parent {
            let owner = self
                .components
                .get(parent)
                .ok_or(Error::UnknownComponent(parent))?
                .entity;

            if owner != entity {
                return Err(Error::UnknownComponent(parent));
            }
        }

        let added = desc.mesh_count();
        let record = self.entity_mut(entity)?;
        record.mesh_count += added;
        record.transform_dirty = true;

        let id = self.insert_subtree(entity, parent, desc);

        match parent {
            Some(parent) => self.components[parent].children.push(id),
            None => self.entities[entity].roots.push(id),
        }

        Ok(id)
    }

    /// Removes `component` and its subtree from its entity.
    pub(crate) fn detach(&mut self, component: ComponentId) -> Result<(EntityId, Vec<Component>)> {
        let record = self
            .components
            .get(component)
            .ok_or(Error::UnknownComponent(component))?;
        let entity = record.entity;
        let parent = record.parent;

        let ids = self.subtree_ids(component)?;
        let removed: Vec<Component> = ids
            .into_iter()
            .filter_map(|id| self.components.remove(id))
            .collect();
        let removed_meshes = removed.iter().filter(|c| c.is_mesh_bearing()).count();

        match parent.and_then(|parent| self.components.get_mut(parent)) {
            Some(parent) => parent.children.retain(|child| *child != component),
            None => self.entity_mut(entity)?.roots.retain(|root| *root != component),
        }

        let record = self.entity_mut(entity)?;
        record.mesh_count = record.mesh_count.checked_sub(removed_meshes).ok_or_else(|| {
            Error::invariant(format!(
                "entity {entity:?} lost {removed_meshes} meshes but only tracked {}",
                record.mesh_count
            ))
        })?;
        record.transform_dirty = true;

        Ok((entity, removed))
    }

    /// Removes the entity and every component it owns.
    pub(crate) fn remove(&mut self, entity: EntityId) -> Result<(RenderableEntity, Vec<Component>)> {
        let ids = self.component_ids(entity)?;
        let record = self
            .entities
            .remove(entity)
            .ok_or(Error::UnknownEntity(entity))?;

        let components = ids
            .into_iter()
            .filter_map(|id| self.components.remove(id))
            .collect();

        Ok((record, components))
    }

    /// Depth-first pre-order over the entity's components.
    pub fn component_ids(&self, entity: EntityId) -> Result<Vec<ComponentId>> {
        let record = self.entity(entity).ok_or(Error::UnknownEntity(entity))?;
        let mut out = Vec::new();

        for root in &record.roots {
            self.collect_subtree(*root, &mut out)?;
        }

        Ok(out)
    }

    pub fn subtree_ids(&self, root: ComponentId) -> Result<Vec<ComponentId>> {
        let mut out = Vec::new();
        self.collect_subtree(root, &mut out)?;

        Ok(out)
    }

    fn collect_subtree(&self, root: ComponentId, out: &mut Vec<ComponentId>) -> Result<()> {
        let mut stack: SmallVec<[(ComponentId, usize); 16]> = SmallVec::new();
        stack.push((root, 0));

        while let Some((id, depth)) = stack.pop() {
            if depth > MAX_COMPONENT_DEPTH {
                return Err(Error::invariant(format!(
                    "component tree under {root:?} is deeper than {MAX_COMPONENT_DEPTH}"
                )));
            }

            let component = self
                .components
                .get(id)
                .ok_or(Error::UnknownComponent(id))?;
            out.push(id);

            for child in component.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }

        Ok(())
    }

    /// Gives the entity's mesh components consecutive slots from its start.
    pub(crate) fn assign_slots(&mut self, entity: EntityId, frames: u32) -> Result<()> {
        let ids = self.component_ids(entity)?;
        let record = self.entity(entity).ok_or(Error::UnknownEntity(entity))?;
        let range = record.range();
        let mut slot = range.start;

        for id in ids {
            let component = &mut self.components[id];

            if let Some(mesh) = component.as_mesh_like_mut() {
                mesh.slot = slot;
                component.mark_dirty(frames);
                slot += 1;
            }
        }

        if slot != range.end {
            return Err(Error::invariant(format!(
                "entity {entity:?} owns {} mesh components but tracks range {range:?}",
                slot - range.start
            )));
        }

        Ok(())
    }

    pub(crate) fn mark_all_mesh_dirty(&mut self, frames: u32) {
        for component in self.components.values_mut() {
            if component.is_mesh_bearing() {
                component.mark_dirty(frames);
            }
        }
    }

    pub(crate) fn mark_all_vertices_dirty(&mut self, frames: u32) {
        for component in self.components.values_mut() {
            if let Some(runtime) = component.as_runtime_mesh_mut() {
                runtime.vertices_pending = frames;
            }
        }
    }

    /// Recomputes world transforms of entities whose transform changed and
    /// marks their mesh components dirty. Returns the number of entities
    /// updated.
    pub(crate) fn propagate_transforms(&mut self, frames: u32) -> Result<usize> {
        let dirty: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.transform_dirty)
            .map(|(id, _)| id)
            .collect();

        for &entity in &dirty {
            let record = &mut self.entities[entity];
            record.transform_dirty = false;

            let mut stack: SmallVec<[(ComponentId, Mat4, usize); 16]> = record
                .roots
                .iter()
                .map(|root| (*root, record.transform, 0))
                .collect();

            while let Some((id, parent_world, depth)) = stack.pop() {
                if depth > MAX_COMPONENT_DEPTH {
                    return Err(Error::invariant(format!(
                        "component tree of {entity:?} is deeper than {MAX_COMPONENT_DEPTH}"
                    )));
                }

                let component = self.component_mut(id)?;
                component.world = parent_world * component.local;

                if component.is_mesh_bearing() {
                    component.mark_dirty(frames);
                }

                let world = component.world;
                for child in component.children.iter() {
                    stack.push((*child, world, depth + 1));
                }
            }
        }

        Ok(dirty.len())
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use slotmap::KeyData;

    use super::*;
    use crate::{
        graphics::types::PipelineId,
        scene::{LightData, MaterialId, MeshDesc},
    };

    fn mesh() -> ComponentDesc {
        ComponentDesc::mesh(MeshDesc::new(
            PipelineId::from_raw(1),
            MaterialId::from(KeyData::from_ffi(1)),
            6,
        ))
    }

    fn light() -> ComponentDesc {
        ComponentDesc::light(LightData {
            color: Vec3::ONE,
            intensity: 1.0,
            range: 1.0,
        })
    }

    #[test]
    fn slots_follow_depth_first_order() {
        let mut world = World::new();
        let desc = EntityDesc::new(Mat4::IDENTITY)
            .with_component(mesh().with_child(light().with_child(mesh())))
            .with_component(mesh());

        let id = world.insert(desc, 10, 3).unwrap();
        let slots: Vec<usize> = world
            .component_ids(id)
            .unwrap()
            .into_iter()
            .filter_map(|c| world.component(c).unwrap().as_mesh_like().map(|m| m.slot()))
            .collect();

        assert_eq!(slots, vec![10, 11, 12]);
        assert_eq!(world.entity(id).unwrap().range(), 10..13);
    }

    #[test]
    fn propagation_composes_parent_transforms() {
        let mut world = World::new();
        let desc = EntityDesc::new(Mat4::from_translation(Vec3::X)).with_component(
            light()
                .with_local(Mat4::from_translation(Vec3::Y))
                .with_child(mesh().with_local(Mat4::from_translation(Vec3::Z))),
        );

        let id = world.insert(desc, 0, 2).unwrap();
        assert_eq!(world.propagate_transforms(2).unwrap(), 1);
        assert_eq!(world.propagate_transforms(2).unwrap(), 0);

        let ids = world.component_ids(id).unwrap();
        let leaf = world.component(ids[1]).unwrap();
        assert!(leaf
            .world()
            .w_axis
            .truncate()
            .abs_diff_eq(Vec3::new(1.0, 1.0, 1.0), 1e-6));
        assert_eq!(leaf.pending(), 2);
    }

    #[test]
    fn detach_updates_mesh_count_and_parent() {
        let mut world = World::new();
        let desc = EntityDesc::new(Mat4::IDENTITY).with_component(light().with_child(mesh()));
        let id = world.insert(desc, 0, 1).unwrap();

        let root = world.entity(id).unwrap().roots()[0];
        let child = world.component(root).unwrap().children()[0];

        let (owner, removed) = world.detach(child).unwrap();
        assert_eq!(owner, id);
        assert_eq!(removed.len(), 1);
        assert_eq!(world.entity(id).unwrap().mesh_count(), 0);
        assert!(world.component(root).unwrap().children().is_empty());
    }

    #[test]
    fn remove_drops_every_component() {
        let mut world = World::new();
        let desc = EntityDesc::new(Mat4::IDENTITY).with_component(mesh().with_child(mesh()));
        let id = world.insert(desc, 0, 1).unwrap();

        let (record, components) = world.remove(id).unwrap();
        assert_eq!(record.mesh_count(), 2);
        assert_eq!(components.len(), 2);
        assert_eq!(world.component_count(), 0);
        assert!(matches!(world.remove(id), Err(Error::UnknownEntity(_))));
    }
}

use atomig::{Atomic, Ordering};

use crate::{
    error::Result,
    frame::{constants::MaterialConstants, FrameRing},
};

use super::{
    buffer::ConstantBuffer,
    device::Gpu,
    types::{RebuildReason, TableHandle, TextureId, UiObjectId, ViewDesc},
};

/// Where each category starts inside a descriptor table.
///
/// Materials come first, one block of `material_capacity` views per ring
/// slot, followed by textures, visible UI objects and the blur reservation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapLayout {
    pub frames: usize,
    pub material_capacity: usize,
    pub textures: usize,
    pub ui_objects: usize,
    pub blur: usize,
    pub capacity: usize,
}

impl HeapLayout {
    pub fn new(
        frames: usize,
        material_capacity: usize,
        textures: usize,
        ui_objects: usize,
        blur: usize,
    ) -> Self {
        let materials = frames * material_capacity;

        Self {
            frames,
            material_capacity,
            textures: materials,
            ui_objects: materials + textures,
            blur: materials + textures + ui_objects,
            capacity: materials + textures + ui_objects + blur,
        }
    }

    #[inline]
    pub fn material(&self, frame: usize, slot: usize) -> usize {
        frame * self.material_capacity + slot
    }

    #[inline]
    pub fn texture(&self, index: usize) -> usize {
        self.textures + index
    }

    #[inline]
    pub fn ui_object(&self, index: usize) -> usize {
        self.ui_objects + index
    }

    #[inline]
    pub fn blur(&self, index: usize) -> usize {
        self.blur + index
    }
}

/// A populated shader-visible table. Released through the device on drop.
#[derive(Debug)]
pub struct DescriptorTable {
    gpu: Gpu,
    raw: TableHandle,
    layout: HeapLayout,
}

impl DescriptorTable {
    pub fn raw(&self) -> TableHandle {
        self.raw
    }

    pub fn layout(&self) -> &HeapLayout {
        &self.layout
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        self.gpu.destroy_descriptor_table(self.raw);
    }
}

/// Keeps the descriptor table in step with the material buffers, loaded
/// textures and registered UI objects.
///
/// Changes only record a [`RebuildReason`]; the table is rebuilt as a whole
/// when [`rebuild_if_needed`](Self::rebuild_if_needed) or
/// [`rebuild`](Self::rebuild) runs, so many registrations cost one rebuild.
#[derive(Debug)]
pub struct DescriptorHeapBuilder {
    gpu: Gpu,
    blur: usize,
    textures: Vec<TextureId>,
    ui_objects: Vec<(UiObjectId, bool)>,
    table: Option<DescriptorTable>,
    pending: Atomic<RebuildReason>,
    rebuilds: usize,
}

impl DescriptorHeapBuilder {
    pub fn new(gpu: &Gpu, blur: usize) -> Self {
        Self {
            gpu: gpu.clone(),
            blur,
            textures: Vec::new(),
            ui_objects: Vec::new(),
            table: None,
            pending: Atomic::new(RebuildReason::RingBuffers),
            rebuilds: 0,
        }
    }

    pub fn request(&self, reason: RebuildReason) {
        self.pending.fetch_or(reason, Ordering::AcqRel);
    }

    pub fn pending(&self) -> RebuildReason {
        self.pending.load(Ordering::Acquire)
    }

    pub fn table(&self) -> Option<&DescriptorTable> {
        self.table.as_ref()
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    pub fn textures(&self) -> &[TextureId] {
        &self.textures
    }

    /// Returns `false` if the texture was already registered.
    pub fn register_texture(&mut self, texture: TextureId) -> bool {
        if self.textures.contains(&texture) {
            return false;
        }

        self.textures.push(texture);
        self.request(RebuildReason::Textures);
        true
    }

    pub fn unregister_texture(&mut self, texture: TextureId) -> bool {
        let Some(index) = self.textures.iter().position(|t| *t == texture) else {
            return false;
        };

        self.textures.remove(index);
        self.request(RebuildReason::Textures);
        true
    }

    pub fn register_ui_object(&mut self, object: UiObjectId, visible: bool) -> bool {
        if self.ui_objects.iter().any(|(id, _)| *id == object) {
            return false;
        }

        self.ui_objects.push((object, visible));
        if visible {
            self.request(RebuildReason::UiObjects);
        }
        true
    }

    pub fn set_ui_visible(&mut self, object: UiObjectId, visible: bool) -> bool {
        let Some(entry) = self.ui_objects.iter_mut().find(|(id, _)| *id == object) else {
            return false;
        };

        if entry.1 != visible {
            entry.1 = visible;
            self.request(RebuildReason::UiObjects);
        }
        true
    }

    pub fn unregister_ui_object(&mut self, object: UiObjectId) -> bool {
        let Some(index) = self.ui_objects.iter().position(|(id, _)| *id == object) else {
            return false;
        };

        let (_, visible) = self.ui_objects.remove(index);
        if visible {
            self.request(RebuildReason::UiObjects);
        }
        true
    }

    /// Table slot of a loaded texture in the current table.
    pub fn texture_index(&self, texture: TextureId) -> Option<usize> {
        let layout = self.table.as_ref()?.layout();
        let index = self.textures.iter().position(|t| *t == texture)?;

        (index < layout.ui_objects - layout.textures).then(|| layout.texture(index))
    }

    fn visible_ui_objects(&self) -> impl Iterator<Item = UiObjectId> + '_ {
        self.ui_objects
            .iter()
            .filter(|(_, visible)| *visible)
            .map(|(id, _)| *id)
    }

    pub fn required_layout(&self, ring: &FrameRing) -> HeapLayout {
        HeapLayout::new(
            ring.len(),
            ring.capacities().materials,
            self.textures.len(),
            self.visible_ui_objects().count(),
            self.blur,
        )
    }

    pub fn rebuild_if_needed(&mut self, ring: &FrameRing) -> Result<bool> {
        if self.pending().is_empty() {
            return Ok(false);
        }

        self.rebuild(ring)?;
        Ok(true)
    }

    /// Waits for the GPU, then replaces the table with one sized for the
    /// current categories and writes every view.
    pub fn rebuild(&mut self, ring: &FrameRing) -> Result<&DescriptorTable> {
        let reason = self.pending.swap(RebuildReason::empty(), Ordering::AcqRel);
        let layout = self.required_layout(ring);

        let _span = tracing::info_span!("rebuild_descriptors", ?reason).entered();

        let table = match self.write_table(ring, layout) {
            Ok(table) => table,
            Err(err) => {
                self.request(reason);
                return Err(err);
            }
        };

        self.rebuilds += 1;
        tracing::info!(
            capacity = layout.capacity,
            materials = layout.frames * layout.material_capacity,
            textures = self.textures.len(),
            blur = layout.capacity - layout.blur,
            "descriptor table rebuilt"
        );

        Ok(&*self.table.insert(table))
    }

    fn write_table(&self, ring: &FrameRing, layout: HeapLayout) -> Result<DescriptorTable> {
        ring.flush()?;

        let raw = self.gpu.create_descriptor_table(layout.capacity)?;
        let table = DescriptorTable {
            gpu: self.gpu.clone(),
            raw,
            layout,
        };

        let stride = ConstantBuffer::<MaterialConstants>::stride();
        for (frame, resource) in ring.frames().iter().enumerate() {
            let materials = resource.materials();

            for slot in 0..layout.material_capacity {
                let view = ViewDesc::Constant {
                    buffer: materials.raw(),
                    offset: materials.offset_of(slot),
                    size: stride,
                };
                self.gpu
                    .create_view(raw, layout.material(frame, slot), &view)?;
            }
        }

        for (index, texture) in self.textures.iter().enumerate() {
            self.gpu
                .create_view(raw, layout.texture(index), &ViewDesc::Texture(*texture))?;
        }

        for (index, object) in self.visible_ui_objects().enumerate() {
            self.gpu
                .create_view(raw, layout.ui_object(index), &ViewDesc::UiObject(object))?;
        }

        for index in 0..self.blur {
            self.gpu
                .create_view(raw, layout.blur(index), &ViewDesc::Blur(index as u32))?;
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        frame::RingCapacities,
        graphics::headless::{HeadlessDevice, Timeline},
    };

    fn setup() -> (Arc<HeadlessDevice>, FrameRing, DescriptorHeapBuilder) {
        let device = Arc::new(HeadlessDevice::new(Timeline::Immediate));
        let gpu = Gpu::from_arc(device.clone());
        let ring = FrameRing::new(
            &gpu,
            2,
            RingCapacities {
                objects: 4,
                materials: 4,
                runtime_vertices: 4,
            },
        )
        .unwrap();

        (device, ring, DescriptorHeapBuilder::new(&gpu, 3))
    }

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<DescriptorHeapBuilder>();

    #[test]
    fn layout_places_categories_back_to_back() {
        let layout = HeapLayout::new(3, 8, 2, 1, 4);

        assert_eq!(layout.material(2, 5), 21);
        assert_eq!(layout.texture(1), 25);
        assert_eq!(layout.ui_object(0), 26);
        assert_eq!(layout.blur(3), 30);
        assert_eq!(layout.capacity, 31);
    }

    #[test]
    fn registrations_are_batched_into_one_rebuild() {
        let (device, ring, mut heap) = setup();
        heap.rebuild(&ring).unwrap();
        assert!(!heap.rebuild_if_needed(&ring).unwrap());

        for raw in 0..5 {
            heap.register_texture(TextureId::from_raw(raw));
        }
        heap.register_ui_object(UiObjectId::from_raw(1), true);
        heap.register_ui_object(UiObjectId::from_raw(2), false);

        assert!(heap.pending().contains(RebuildReason::Textures | RebuildReason::UiObjects));
        assert!(heap.rebuild_if_needed(&ring).unwrap());
        assert_eq!(heap.rebuilds(), 2);
        assert_eq!(device.tables_created(), 2);
        assert_eq!(device.live_tables(), 1);

        let table = heap.table().unwrap();
        assert_eq!(table.layout().capacity, 2 * 4 + 5 + 1 + 3);

        let views = device.table_views(table.raw()).unwrap();
        assert!(views.iter().all(Option::is_some));
        assert_eq!(
            views[table.layout().ui_object(0)],
            Some(ViewDesc::UiObject(UiObjectId::from_raw(1)))
        );
        assert_eq!(heap.texture_index(TextureId::from_raw(4)), Some(12));
    }

    #[test]
    fn material_views_point_into_each_ring_slot() {
        let (device, ring, mut heap) = setup();
        let table = heap.rebuild(&ring).unwrap();
        let views = device.table_views(table.raw()).unwrap();
        let layout = *table.layout();

        for (frame, resource) in ring.frames().iter().enumerate() {
            assert_eq!(
                views[layout.material(frame, 1)],
                Some(ViewDesc::Constant {
                    buffer: resource.materials().raw(),
                    offset: 256,
                    size: 256,
                })
            );
        }
    }

    #[test]
    fn failed_rebuild_keeps_request_pending() {
        let (device, ring, mut heap) = setup();

        device.fail_next_allocation();
        assert!(heap.rebuild_if_needed(&ring).is_err());
        assert!(heap.pending().contains(RebuildReason::RingBuffers));
        assert!(heap.table().is_none());

        assert!(heap.rebuild_if_needed(&ring).unwrap());
    }

    #[test]
    fn hidden_ui_objects_take_no_slot() {
        let (_, ring, mut heap) = setup();
        heap.register_ui_object(UiObjectId::from_raw(7), false);

        assert_eq!(heap.required_layout(&ring).capacity, 2 * 4 + 3);

        heap.set_ui_visible(UiObjectId::from_raw(7), true);
        assert_eq!(heap.required_layout(&ring).capacity, 2 * 4 + 1 + 3);
        assert!(heap.unregister_ui_object(UiObjectId::from_raw(7)));
        assert!(!heap.unregister_ui_object(UiObjectId::from_raw(7)));
    }
}

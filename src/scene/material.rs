use slotmap::SlotMap;

use crate::frame::constants::{BundleConstants, MaterialConstants};

use super::MaterialId;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Material {
    pub constants: MaterialConstants,
    pub bundle: BundleConstants,
}

#[derive(Debug)]
struct MaterialEntry {
    id: MaterialId,
    material: Material,
    pending: u32,
}

/// Materials by buffer slot. Slots never move while a material is alive;
/// freed slots are reused and trailing empty slots are trimmed.
#[derive(Debug, Default)]
pub struct MaterialTable {
    ids: SlotMap<MaterialId, usize>,
    slots: Vec<Option<MaterialEntry>>,
    free: Vec<usize>,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, id: MaterialId) -> Option<usize> {
        self.ids.get(id).copied()
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        let slot = self.slot(id)?;
        self.slots[slot].as_ref().map(|entry| &entry.material)
    }

    pub fn pending(&self, id: MaterialId) -> Option<u32> {
        let slot = self.slot(id)?;
        self.slots[slot].as_ref().map(|entry| entry.pending)
    }

    /// Highest used slot plus one.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn live(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn take_free_slot(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Places `material` at `slot`, which is either a reused free slot or the
    /// slot right after the last one.
    pub(crate) fn insert_at(&mut self, slot: usize, material: Material, frames: u32) -> MaterialId {
        if slot == self.slots.len() {
            self.slots.push(None);
        }

        let id = self.ids.insert(slot);
        self.slots[slot] = Some(MaterialEntry {
            id,
            material,
            pending: frames,
        });

        id
    }

    pub(crate) fn update(&mut self, id: MaterialId, material: Material, frames: u32) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };

        match &mut self.slots[slot] {
            Some(entry) => {
                entry.material = material;
                entry.pending = frames;
                true
            }
            None => false,
        }
    }

    /// Returns the freed slot and how many trailing slots were trimmed.
    pub(crate) fn remove(&mut self, id: MaterialId) -> Option<(usize, usize)> {
        let slot = self.ids.remove(id)?;
        self.slots[slot] = None;
        self.free.push(slot);

        let before = self.slots.len();
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }

        let len = self.slots.len();
        self.free.retain(|free| *free < len);

        Some((slot, before - len))
    }

    pub(crate) fn mark_all_dirty(&mut self, frames: u32) {
        for entry in self.slots.iter_mut().flatten() {
            entry.pending = frames;
        }
    }

    /// Visits every material that still has frames to copy, consuming one.
    pub(crate) fn drain_pending(&mut self, mut copy: impl FnMut(usize, &Material)) {
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            let Some(entry) = entry else { continue };

            if entry.pending > 0 {
                entry.pending -= 1;
                copy(slot, &entry.material);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, usize, &Material)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|e| (e.id, slot, &e.material)))
    }
}

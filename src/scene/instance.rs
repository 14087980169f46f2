use glam::Mat4;
use parking_lot::{Mutex, MutexGuard};

/// World transforms of every instance of one mesh component.
///
/// Gameplay threads append or clear through a shared handle while the render
/// thread culls, so the list has its own lock independent of the scene lock.
#[derive(Debug, Default)]
pub struct InstancedMeshData {
    transforms: Mutex<Vec<Mat4>>,
}

impl InstancedMeshData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of the new instance.
    pub fn add(&self, world: Mat4) -> usize {
        let mut transforms = self.transforms.lock();
        transforms.push(world);
        transforms.len() - 1
    }

    pub fn extend(&self, worlds: impl IntoIterator<Item = Mat4>) {
        self.transforms.lock().extend(worlds);
    }

    pub fn set(&self, index: usize, world: Mat4) -> bool {
        match self.transforms.lock().get_mut(index) {
            Some(slot) => {
                *slot = world;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.transforms.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.transforms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<Mat4>> {
        self.transforms.lock()
    }
}

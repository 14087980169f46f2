pub mod constants;
mod resource;
mod ring;

pub use resource::*;
pub use ring::*;

/// Counters gathered while ending one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub fence_value: u64,
    /// Mesh components considered for drawing.
    pub candidates: usize,
    pub culled_by_distance: usize,
    pub culled_by_frustum: usize,
    pub instances_written: usize,
    pub draws: usize,
    /// Draws dropped because their bindings could not be resolved.
    pub skipped: usize,
    pub objects_copied: usize,
    pub materials_copied: usize,
}

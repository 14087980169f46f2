pub mod buffer;
pub mod descriptor_heap;
pub mod device;
pub mod fence;
pub mod headless;
pub mod types;

pub(crate) trait Sealed {}

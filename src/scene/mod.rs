mod component;
mod entity;
mod instance;
mod material;
mod world;

pub use component::*;
pub use entity::*;
pub use instance::*;
pub use material::*;
pub use world::*;

slotmap::new_key_type! {
    pub struct EntityId;
    pub struct ComponentId;
    pub struct MaterialId;
}

/// Components nested deeper than this are treated as a corrupted tree.
pub const MAX_COMPONENT_DEPTH: usize = 64;

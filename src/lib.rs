pub mod bounds;
pub mod camera;
pub mod config;
pub mod cull;
pub mod error;
pub mod frame;
pub mod graphics;
pub mod jobs;
pub mod logging;
pub mod renderer;
pub mod scene;
pub mod slots;
pub mod submit;
pub mod utils;

pub use camera::Camera;
pub use config::RenderConfig;
pub use error::{Error, Result};
pub use frame::FrameStats;
pub use graphics::device::{Device, Gpu};
pub use renderer::{Renderer, SceneState};
pub use scene::{ComponentDesc, ComponentId, EntityDesc, EntityId, Material, MaterialId, MeshDesc};
pub use submit::Pipeline;

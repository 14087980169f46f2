use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ring, chunk and culling policy.
///
/// Chunk sizes and the shrink hysteresis are tuning knobs, not a contract: any
/// positive chunk keeps the allocator invariants intact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Number of frame resources in the ring.
    pub frames_in_flight: usize,
    pub object_chunk: usize,
    pub material_chunk: usize,
    pub runtime_vertex_chunk: usize,
    pub instance_chunk: usize,
    /// Extra whole chunks that must be empty before a buffer shrinks.
    pub shrink_hysteresis_chunks: usize,
    /// Fixed descriptor reservation for the blur post effect.
    pub blur_descriptors: usize,
    /// Applied to entities spawned without their own cull distance.
    pub default_cull_distance: Option<f32>,
    pub worker_threads: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            object_chunk: 256,
            material_chunk: 256,
            runtime_vertex_chunk: 1024,
            instance_chunk: 64,
            shrink_hysteresis_chunks: 1,
            blur_descriptors: 4,
            default_cull_distance: None,
            worker_threads: 2,
        }
    }
}

impl RenderConfig {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let chunks = [
            ("object_chunk", self.object_chunk),
            ("material_chunk", self.material_chunk),
            ("runtime_vertex_chunk", self.runtime_vertex_chunk),
            ("instance_chunk", self.instance_chunk),
        ];

        if let Some((name, _)) = chunks.iter().find(|(_, size)| *size == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be positive")));
        }

        if self.worker_threads == 0 {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }

        if matches!(self.default_cull_distance, Some(d) if !(d > 0.0)) {
            return Err(Error::InvalidConfig(
                "default_cull_distance must be positive".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RenderConfig::from_toml_str(
            r#"
            frames_in_flight = 2
            object_chunk = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.object_chunk, 4);
        assert_eq!(config.material_chunk, 256);
        assert_eq!(config.shrink_hysteresis_chunks, 1);
    }

    #[test]
    fn rejects_zero_chunk() {
        let err = RenderConfig::from_toml_str("instance_chunk = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(msg) if msg.contains("instance_chunk")));
    }

    #[test]
    fn rejects_empty_ring() {
        assert!(RenderConfig::from_toml_str("frames_in_flight = 0").is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            RenderConfig::from_toml_str("object_chunk = \"big\""),
            Err(Error::ConfigParse(_))
        ));
    }
}

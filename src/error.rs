use thiserror::Error;

use crate::scene::{ComponentId, EntityId, MaterialId};

/// Failures reported by a [`Device`](crate::graphics::device::Device) implementation.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("out of device memory ({requested} bytes requested)")]
    OutOfMemory { requested: usize },

    #[error("invalid {kind} handle {raw}")]
    InvalidHandle { kind: &'static str, raw: u64 },

    #[error("access of {len} bytes at offset {offset} overruns a buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("fence {fence} can never reach {value}, last signaled value is {signaled}")]
    NeverSignaled { fence: u64, value: u64, signaled: u64 },

    #[error("device lost: {0}")]
    Lost(String),
}

#[derive(Debug, Error)]
pub enum Error {
    /// Buffer, view or fence creation failed. Rendering cannot continue.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The GPU-side signal for a frame could not be queued.
    #[error("failed to signal fence value {value}: {source}")]
    Signal {
        value: u64,
        #[source]
        source: DeviceError,
    },

    /// Allocator or compactor state no longer matches the entity partition.
    #[error("structural invariant violated: {0}")]
    Invariant(String),

    #[error("unknown entity {0:?}")]
    UnknownEntity(EntityId),

    #[error("unknown component {0:?}")]
    UnknownComponent(ComponentId),

    #[error("unknown material {0:?}")]
    UnknownMaterial(MaterialId),

    #[error("component {0:?} does not own an object slot")]
    NotMeshBearing(ComponentId),

    #[error("component {0:?} is not an instanced mesh")]
    NotInstanced(ComponentId),

    #[error("end_frame called without a matching begin_frame")]
    FrameNotStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Device and signal failures leave GPU resources in an unrecoverable state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Device(_) | Error::Signal { .. })
    }

    /// Reports a corrupted partition loudly. Aborts in debug builds.
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "structural invariant violated");
        debug_assert!(false, "structural invariant violated: {message}");

        Error::Invariant(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

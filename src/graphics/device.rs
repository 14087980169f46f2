use std::{fmt::Debug, ops::Deref, sync::Arc};

use crate::error::DeviceError;

use super::types::{
    BufferDesc, BufferHandle, Command, ContextHandle, FenceHandle, TableHandle, ViewDesc,
};

/// The GPU abstraction the engine drives.
///
/// Signals are queued on the GPU timeline and return immediately. `wait` is
/// the only call allowed to block, and it must park the calling thread rather
/// than spin.
pub trait Device: Debug + Send + Sync {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError>;
    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, DeviceError>;
    fn destroy_buffer(&self, buffer: BufferHandle);

    fn create_descriptor_table(&self, capacity: usize) -> Result<TableHandle, DeviceError>;
    fn create_view(
        &self,
        table: TableHandle,
        index: usize,
        desc: &ViewDesc,
    ) -> Result<(), DeviceError>;
    fn destroy_descriptor_table(&self, table: TableHandle);

    fn create_fence(&self, initial_value: u64) -> Result<FenceHandle, DeviceError>;
    fn signal(&self, fence: FenceHandle, value: u64) -> Result<(), DeviceError>;
    fn completed_value(&self, fence: FenceHandle) -> u64;
    fn wait(&self, fence: FenceHandle, value: u64) -> Result<(), DeviceError>;

    fn create_context(&self) -> Result<ContextHandle, DeviceError>;
    fn reset_context(&self, context: ContextHandle) -> Result<(), DeviceError>;
    fn record(&self, context: ContextHandle, command: Command);
    fn execute(&self, context: ContextHandle) -> Result<(), DeviceError>;
}

#[derive(Clone, Debug)]
pub struct Gpu(Arc<dyn Device>);

impl Gpu {
    pub fn new(device: impl Device + 'static) -> Self {
        Self(Arc::new(device))
    }

    pub fn from_arc(device: Arc<dyn Device>) -> Self {
        Self(device)
    }
}

impl Deref for Gpu {
    type Target = dyn Device;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

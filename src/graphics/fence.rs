use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::error::{Error, Result};

use super::{device::Gpu, types::FenceHandle};

/// Monotonic GPU-completion counter.
///
/// `current` is the last value handed to the GPU, `completed` the last value
/// the GPU reached. The two only ever grow.
#[derive(Clone, Debug)]
pub struct Fence(Arc<FenceInner>);

#[derive(Debug)]
pub struct FenceInner {
    gpu: Gpu,
    raw: FenceHandle,
    value: AtomicU64,
}

impl Fence {
    pub(crate) fn inner_new(gpu: &Gpu) -> Result<Self> {
        let raw = gpu.create_fence(0)?;

        Ok(Self(Arc::new(FenceInner {
            gpu: gpu.clone(),
            raw,
            value: Default::default(),
        })))
    }
}

impl Fence {
    pub fn get_completed_value(&self) -> u64 {
        self.gpu.completed_value(self.raw)
    }

    pub fn get_current_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_complete(&self, value: u64) -> bool {
        self.get_completed_value() >= value
    }

    /// Queues a GPU-side signal of the next value without blocking.
    /// The counter only advances once the device accepts the signal.
    pub fn signal(&self) -> Result<u64> {
        let value = self.get_current_value() + 1;

        self.gpu
            .signal(self.raw, value)
            .map_err(|source| Error::Signal { value, source })?;
        self.value.store(value, Ordering::Release);

        Ok(value)
    }

    pub fn wait_on_cpu(&self, value: u64) -> Result<()> {
        if !self.is_complete(value) {
            tracing::trace!(value, "waiting for gpu");
            self.gpu.wait(self.raw, value)?;
        }

        Ok(())
    }

    /// Signals and blocks until the GPU has drained everything queued so far.
    pub fn flush(&self) -> Result<u64> {
        let value = self.signal()?;
        self.wait_on_cpu(value)?;

        Ok(value)
    }
}

impl Deref for Fence {
    type Target = FenceInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Fence;
    use crate::{
        error::Error,
        graphics::{
            device::Gpu,
            headless::{HeadlessDevice, Timeline},
        },
    };

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<Fence>();

    #[test]
    fn signal_is_monotonic() {
        let gpu = Gpu::new(HeadlessDevice::new(Timeline::Immediate));
        let fence = Fence::inner_new(&gpu).unwrap();

        assert_eq!(fence.signal().unwrap(), 1);
        assert_eq!(fence.signal().unwrap(), 2);
        assert_eq!(fence.get_current_value(), 2);
        assert!(fence.is_complete(2));
    }

    #[test]
    fn signal_does_not_block() {
        let device = Arc::new(HeadlessDevice::new(Timeline::Manual));
        let fence = Fence::inner_new(&Gpu::from_arc(device.clone())).unwrap();

        let value = fence.signal().unwrap();

        assert!(!fence.is_complete(value));
        device.retire_all();
        assert!(fence.is_complete(value));
    }

    #[test]
    fn failed_signal_keeps_counter() {
        let device = Arc::new(HeadlessDevice::new(Timeline::Immediate));
        let fence = Fence::inner_new(&Gpu::from_arc(device.clone())).unwrap();

        device.fail_next_signal();

        assert!(matches!(fence.signal(), Err(Error::Signal { value: 1, .. })));
        assert_eq!(fence.get_current_value(), 0);
        assert_eq!(fence.flush().unwrap(), 1);
    }
}

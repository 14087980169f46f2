use std::collections::{HashMap, VecDeque};

use parking_lot::{Condvar, Mutex};

use crate::error::DeviceError;

use super::{
    device::Device,
    types::{BufferDesc, BufferHandle, Command, ContextHandle, FenceHandle, TableHandle, ViewDesc},
};

/// How the simulated GPU retires queued fence signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeline {
    /// Every signal completes as soon as it is queued.
    Immediate,
    /// Signals stay queued until [`HeadlessDevice::retire_next`] or
    /// [`HeadlessDevice::retire_all`] is called.
    Manual,
}

/// In-process device with a simulated GPU timeline. Buffers are plain byte
/// vectors and executed command lists are kept for inspection.
#[derive(Debug)]
pub struct HeadlessDevice {
    timeline: Timeline,
    state: Mutex<HeadlessState>,
    retired: Condvar,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    tables: HashMap<u64, Vec<Option<ViewDesc>>>,
    fences: HashMap<u64, FenceTimeline>,
    contexts: HashMap<u64, Vec<Command>>,
    submissions: Vec<Vec<Command>>,

    buffers_created: usize,
    tables_created: usize,
    blocked_waits: usize,

    fail_next_signal: bool,
    fail_next_allocation: bool,
}

#[derive(Debug, Default)]
struct FenceTimeline {
    completed: u64,
    queued: VecDeque<u64>,
}

impl FenceTimeline {
    fn last_signaled(&self) -> u64 {
        self.queued.back().copied().unwrap_or(self.completed)
    }
}

impl HeadlessState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl HeadlessDevice {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            state: Default::default(),
            retired: Condvar::new(),
        }
    }

    /// Completes the oldest queued signal of every fence. Returns the highest
    /// value retired.
    pub fn retire_next(&self) -> Option<u64> {
        let mut state = self.state.lock();
        let mut retired = None;

        for fence in state.fences.values_mut() {
            if let Some(value) = fence.queued.pop_front() {
                fence.completed = fence.completed.max(value);
                retired = retired.max(Some(value));
            }
        }

        self.retired.notify_all();
        retired
    }

    pub fn retire_all(&self) {
        let mut state = self.state.lock();

        for fence in state.fences.values_mut() {
            if let Some(value) = fence.queued.drain(..).max() {
                fence.completed = fence.completed.max(value);
            }
        }

        self.retired.notify_all();
    }

    pub fn submissions(&self) -> Vec<Vec<Command>> {
        self.state.lock().submissions.clone()
    }

    pub fn take_submissions(&self) -> Vec<Vec<Command>> {
        std::mem::take(&mut self.state.lock().submissions)
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn buffers_created(&self) -> usize {
        self.state.lock().buffers_created
    }

    pub fn tables_created(&self) -> usize {
        self.state.lock().tables_created
    }

    pub fn live_tables(&self) -> usize {
        self.state.lock().tables.len()
    }

    /// Number of `wait` calls that had to park because the value was pending.
    pub fn blocked_waits(&self) -> usize {
        self.state.lock().blocked_waits
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<usize> {
        self.state.lock().buffers.get(&buffer.raw()).map(Vec::len)
    }

    pub fn table_views(&self, table: TableHandle) -> Option<Vec<Option<ViewDesc>>> {
        self.state.lock().tables.get(&table.raw()).cloned()
    }

    pub fn fail_next_signal(&self) {
        self.state.lock().fail_next_signal = true;
    }

    pub fn fail_next_allocation(&self) {
        self.state.lock().fail_next_allocation = true;
    }
}

impl Device for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
        let mut state = self.state.lock();

        if std::mem::take(&mut state.fail_next_allocation) {
            return Err(DeviceError::OutOfMemory {
                requested: desc.size,
            });
        }

        let id = state.next_id();
        state.buffers.insert(id, vec![0; desc.size]);
        state.buffers_created += 1;

        Ok(BufferHandle::from_raw(id))
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let bytes = state
            .buffers
            .get_mut(&buffer.raw())
            .ok_or(DeviceError::InvalidHandle {
                kind: "buffer",
                raw: buffer.raw(),
            })?;

        let end = offset + data.len();
        if end > bytes.len() {
            return Err(DeviceError::OutOfBounds {
                offset,
                len: data.len(),
                size: bytes.len(),
            });
        }

        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, DeviceError> {
        let state = self.state.lock();
        let bytes = state
            .buffers
            .get(&buffer.raw())
            .ok_or(DeviceError::InvalidHandle {
                kind: "buffer",
                raw: buffer.raw(),
            })?;

        bytes
            .get(offset..offset + len)
            .map(<[u8]>::to_vec)
            .ok_or(DeviceError::OutOfBounds {
                offset,
                len,
                size: bytes.len(),
            })
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer.raw());
    }

    fn create_descriptor_table(&self, capacity: usize) -> Result<TableHandle, DeviceError> {
        let mut state = self.state.lock();

        if std::mem::take(&mut state.fail_next_allocation) {
            return Err(DeviceError::OutOfMemory {
                requested: capacity,
            });
        }

        let id = state.next_id();
        state.tables.insert(id, vec![None; capacity]);
        state.tables_created += 1;

        Ok(TableHandle::from_raw(id))
    }

    fn create_view(
        &self,
        table: TableHandle,
        index: usize,
        desc: &ViewDesc,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let views = state
            .tables
            .get_mut(&table.raw())
            .ok_or(DeviceError::InvalidHandle {
                kind: "descriptor table",
                raw: table.raw(),
            })?;

        let size = views.len();
        let view = views.get_mut(index).ok_or(DeviceError::OutOfBounds {
            offset: index,
            len: 1,
            size,
        })?;
        *view = Some(*desc);

        Ok(())
    }

    fn destroy_descriptor_table(&self, table: TableHandle) {
        self.state.lock().tables.remove(&table.raw());
    }

    fn create_fence(&self, initial_value: u64) -> Result<FenceHandle, DeviceError> {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.fences.insert(
            id,
            FenceTimeline {
                completed: initial_value,
                queued: VecDeque::new(),
            },
        );

        Ok(FenceHandle::from_raw(id))
    }

    fn signal(&self, fence: FenceHandle, value: u64) -> Result<(), DeviceError> {
        let mut state = self.state.lock();

        if std::mem::take(&mut state.fail_next_signal) {
            return Err(DeviceError::Lost("signal rejected by queue".into()));
        }

        let timeline = state
            .fences
            .get_mut(&fence.raw())
            .ok_or(DeviceError::InvalidHandle {
                kind: "fence",
                raw: fence.raw(),
            })?;

        match self.timeline {
            Timeline::Immediate => {
                timeline.completed = timeline.completed.max(value);
                self.retired.notify_all();
            }
            Timeline::Manual => timeline.queued.push_back(value),
        }

        Ok(())
    }

    fn completed_value(&self, fence: FenceHandle) -> u64 {
        self.state
            .lock()
            .fences
            .get(&fence.raw())
            .map_or(0, |timeline| timeline.completed)
    }

    fn wait(&self, fence: FenceHandle, value: u64) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let mut blocked = false;

        loop {
            let timeline = state
                .fences
                .get(&fence.raw())
                .ok_or(DeviceError::InvalidHandle {
                    kind: "fence",
                    raw: fence.raw(),
                })?;

            if timeline.completed >= value {
                return Ok(());
            }

            let signaled = timeline.last_signaled();
            if value > signaled {
                return Err(DeviceError::NeverSignaled {
                    fence: fence.raw(),
                    value,
                    signaled,
                });
            }

            if !blocked {
                blocked = true;
                state.blocked_waits += 1;
            }

            self.retired.wait(&mut state);
        }
    }

    fn create_context(&self) -> Result<ContextHandle, DeviceError> {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.contexts.insert(id, Vec::new());

        Ok(ContextHandle::from_raw(id))
    }

    fn reset_context(&self, context: ContextHandle) -> Result<(), DeviceError> {
        self.state
            .lock()
            .contexts
            .get_mut(&context.raw())
            .map(Vec::clear)
            .ok_or(DeviceError::InvalidHandle {
                kind: "context",
                raw: context.raw(),
            })
    }

    fn record(&self, context: ContextHandle, command: Command) {
        if let Some(commands) = self.state.lock().contexts.get_mut(&context.raw()) {
            commands.push(command);
        }
    }

    fn execute(&self, context: ContextHandle) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let commands = state
            .contexts
            .get_mut(&context.raw())
            .map(std::mem::take)
            .ok_or(DeviceError::InvalidHandle {
                kind: "context",
                raw: context.raw(),
            })?;
        state.submissions.push(commands);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::graphics::types::BufferUsage;

    #[test]
    fn buffer_write_and_read() {
        let device = HeadlessDevice::new(Timeline::Immediate);
        let buffer = device
            .create_buffer(&BufferDesc::new(16, BufferUsage::Upload))
            .unwrap();

        device.write_buffer(buffer, 4, &[1, 2, 3]).unwrap();

        assert_eq!(device.read_buffer(buffer, 3, 5).unwrap(), vec![0, 1, 2, 3, 0]);
        assert!(matches!(
            device.write_buffer(buffer, 15, &[1, 2]),
            Err(DeviceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn manual_timeline_wakes_waiter() {
        let device = Arc::new(HeadlessDevice::new(Timeline::Manual));
        let fence = device.create_fence(0).unwrap();
        device.signal(fence, 1).unwrap();

        let retirer = {
            let device = Arc::clone(&device);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                device.retire_next()
            })
        };

        device.wait(fence, 1).unwrap();

        assert_eq!(retirer.join().unwrap(), Some(1));
        assert_eq!(device.completed_value(fence), 1);
    }

    #[test]
    fn waiting_on_unsignaled_value_fails() {
        let device = HeadlessDevice::new(Timeline::Manual);
        let fence = device.create_fence(0).unwrap();

        assert!(matches!(
            device.wait(fence, 1),
            Err(DeviceError::NeverSignaled { value: 1, .. })
        ));
    }
}

use smallvec::SmallVec;

use crate::{
    error::{Error, Result},
    graphics::{
        buffer::{ConstantBuffer, VertexBuffer},
        device::Gpu,
        fence::Fence,
        types::PipelineId,
    },
    scene::ComponentId,
};

use super::{
    constants::{BundleConstants, MaterialConstants, ObjectConstants, RuntimeVertex},
    FrameResource, RingCapacities,
};

/// Round-robin set of frame resources paced by a single fence.
///
/// The CPU records into the current slot while the GPU consumes the others.
/// Moving onto a slot blocks only if the GPU has not yet reached the value
/// submitted the last time that slot was used.
#[derive(Debug)]
pub struct FrameRing {
    gpu: Gpu,
    fence: Fence,
    frames: SmallVec<[FrameResource; 3]>,
    current: usize,
    capacities: RingCapacities,
    bundle_pipelines: Vec<PipelineId>,
}

impl FrameRing {
    pub fn new(gpu: &Gpu, frames: usize, capacities: RingCapacities) -> Result<Self> {
        if frames == 0 {
            return Err(Error::InvalidConfig("ring needs at least one frame".into()));
        }

        let fence = Fence::inner_new(gpu)?;
        let frames = (0..frames)
            .map(|_| FrameResource::new(gpu, capacities))
            .collect::<Result<_>>()?;

        Ok(Self {
            gpu: gpu.clone(),
            fence,
            frames,
            current: 0,
            capacities,
            bundle_pipelines: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Ring length as the bound of every pending-copy counter.
    pub fn frames_in_flight(&self) -> u32 {
        self.frames.len() as u32
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &FrameResource {
        &self.frames[self.current]
    }

    pub(crate) fn current_mut(&mut self) -> &mut FrameResource {
        &mut self.frames[self.current]
    }

    pub fn frames(&self) -> &[FrameResource] {
        &self.frames
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    pub fn capacities(&self) -> RingCapacities {
        self.capacities
    }

    /// Moves to the next slot, waiting for the GPU only if that slot is still
    /// in flight.
    pub fn advance(&mut self) -> Result<()> {
        self.current = (self.current + 1) % self.frames.len();

        let frame = &mut self.frames[self.current];
        if !self.fence.is_complete(frame.fence_value) {
            tracing::debug!(
                slot = self.current,
                value = frame.fence_value,
                "frame resource still in flight"
            );
        }
        self.fence.wait_on_cpu(frame.fence_value)?;

        frame.retired.clear();
        self.gpu.reset_context(frame.context)?;

        Ok(())
    }

    /// Executes the current slot's commands and queues the signal that marks
    /// them done. Does not block.
    pub fn submit_frame(&mut self) -> Result<u64> {
        let frame = &mut self.frames[self.current];

        self.gpu.execute(frame.context)?;
        let value = self.fence.signal()?;
        frame.fence_value = value;

        Ok(value)
    }

    /// Blocks until the GPU has finished everything submitted so far.
    pub fn flush(&self) -> Result<u64> {
        self.fence.flush()
    }

    /// Recreates the object buffer of every slot. Contents are lost.
    pub fn resize_objects(&mut self, capacity: usize) -> Result<()> {
        let _span = tracing::debug_span!("resize_objects", capacity).entered();

        self.flush()?;
        let buffers = self.recreate(capacity, ConstantBuffer::<ObjectConstants>::inner_new)?;
        for (frame, buffer) in self.frames.iter_mut().zip(buffers) {
            frame.objects = buffer;
        }
        self.capacities.objects = capacity;

        Ok(())
    }

    /// Recreates the material buffer and every material-bundle buffer of
    /// every slot. Contents are lost.
    pub fn resize_materials(&mut self, capacity: usize) -> Result<()> {
        let _span = tracing::debug_span!("resize_materials", capacity).entered();

        self.flush()?;
        let materials = self.recreate(capacity, ConstantBuffer::<MaterialConstants>::inner_new)?;

        let mut bundles = Vec::with_capacity(self.frames.len());
        for _ in 0..self.frames.len() {
            let set: SmallVec<[_; 2]> = self
                .bundle_pipelines
                .iter()
                .map(|pipeline| {
                    let buffer = ConstantBuffer::<BundleConstants>::inner_new(&self.gpu, capacity)?;
                    Ok((*pipeline, buffer))
                })
                .collect::<Result<_>>()?;
            bundles.push(set);
        }

        for ((frame, buffer), set) in self.frames.iter_mut().zip(materials).zip(bundles) {
            frame.materials = buffer;
            frame.bundles = set;
        }
        self.capacities.materials = capacity;

        Ok(())
    }

    /// Recreates the runtime-mesh vertex buffer of every slot. Contents are
    /// lost.
    pub fn resize_runtime_vertices(&mut self, capacity: usize) -> Result<()> {
        let _span = tracing::debug_span!("resize_runtime_vertices", capacity).entered();

        self.flush()?;
        let buffers = self.recreate(capacity, VertexBuffer::<RuntimeVertex>::inner_new)?;
        for (frame, buffer) in self.frames.iter_mut().zip(buffers) {
            frame.runtime_vertices = buffer;
        }
        self.capacities.runtime_vertices = capacity;

        Ok(())
    }

    fn recreate<B>(
        &self,
        capacity: usize,
        create: impl Fn(&Gpu, usize) -> Result<B>,
    ) -> Result<Vec<B>> {
        (0..self.frames.len())
            .map(|_| create(&self.gpu, capacity))
            .collect()
    }

    pub fn has_bundle(&self, pipeline: PipelineId) -> bool {
        self.bundle_pipelines.contains(&pipeline)
    }

    /// Adds a zeroed material-bundle buffer for `pipeline` to every slot.
    pub fn add_bundle(&mut self, pipeline: PipelineId) -> Result<()> {
        if self.has_bundle(pipeline) {
            return Ok(());
        }

        let buffers = self.recreate(
            self.capacities.materials,
            ConstantBuffer::<BundleConstants>::inner_new,
        )?;
        for (frame, buffer) in self.frames.iter_mut().zip(buffers) {
            frame.bundles.push((pipeline, buffer));
        }
        self.bundle_pipelines.push(pipeline);

        Ok(())
    }

    pub fn remove_bundle(&mut self, pipeline: PipelineId) -> Result<()> {
        if !self.has_bundle(pipeline) {
            return Ok(());
        }

        self.flush()?;
        for frame in self.frames.iter_mut() {
            frame.bundles.retain(|(id, _)| *id != pipeline);
        }
        self.bundle_pipelines.retain(|id| *id != pipeline);

        Ok(())
    }

    /// Releases the instance buffers of `component` once each slot is reused.
    pub fn retire_instances(&mut self, component: ComponentId) {
        for frame in self.frames.iter_mut() {
            frame.retire_instances(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graphics::headless::{HeadlessDevice, Timeline};

    const CAPACITIES: RingCapacities = RingCapacities {
        objects: 4,
        materials: 4,
        runtime_vertices: 16,
    };

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<FrameRing>();

    fn ring(timeline: Timeline, frames: usize) -> (Arc<HeadlessDevice>, FrameRing) {
        let device = Arc::new(HeadlessDevice::new(timeline));
        let ring = FrameRing::new(&Gpu::from_arc(device.clone()), frames, CAPACITIES).unwrap();

        (device, ring)
    }

    #[test]
    fn full_cycle_returns_to_start_with_increasing_values() {
        let (_, mut ring) = ring(Timeline::Immediate, 3);
        let mut last = vec![0; 3];

        for _ in 0..9 {
            ring.advance().unwrap();
            let slot = ring.current_index();
            let value = ring.submit_frame().unwrap();

            assert!(value > last[slot]);
            last[slot] = value;
        }

        assert_eq!(ring.current_index(), 0);
    }

    #[test]
    fn advance_blocks_only_on_reuse() {
        let (device, mut ring) = ring(Timeline::Manual, 2);

        ring.advance().unwrap();
        ring.submit_frame().unwrap();
        ring.advance().unwrap();
        ring.submit_frame().unwrap();
        assert_eq!(device.blocked_waits(), 0);

        let retire = {
            let device = device.clone();
            std::thread::spawn(move || {
                while device.blocked_waits() == 0 {
                    std::thread::yield_now();
                }
                device.retire_next();
            })
        };

        ring.advance().unwrap();
        retire.join().unwrap();

        assert_eq!(device.blocked_waits(), 1);
        assert!(ring.fence().is_complete(ring.current().fence_value()));
    }

    #[test]
    fn failed_signal_keeps_ring_usable() {
        let (device, mut ring) = ring(Timeline::Immediate, 2);

        ring.advance().unwrap();
        device.fail_next_signal();
        assert!(matches!(ring.submit_frame(), Err(Error::Signal { .. })));
        assert_eq!(ring.current().fence_value(), 0);

        ring.advance().unwrap();
        assert_eq!(ring.submit_frame().unwrap(), 1);
    }

    #[test]
    fn resize_replaces_buffers_in_every_slot() {
        let (device, mut ring) = ring(Timeline::Immediate, 3);
        ring.add_bundle(PipelineId::from_raw(9)).unwrap();

        ring.resize_materials(8).unwrap();
        ring.resize_objects(12).unwrap();

        for frame in ring.frames() {
            assert_eq!(frame.objects().capacity(), 12);
            assert_eq!(frame.materials().capacity(), 8);
            assert_eq!(frame.bundle(PipelineId::from_raw(9)).unwrap().capacity(), 8);
        }

        // pass, objects, materials, vertices and one bundle per slot.
        assert_eq!(device.live_buffers(), 3 * 5);

        ring.remove_bundle(PipelineId::from_raw(9)).unwrap();
        assert_eq!(device.live_buffers(), 3 * 4);
    }
}

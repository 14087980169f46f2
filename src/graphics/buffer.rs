use std::marker::PhantomData;

use bytemuck::Pod;

use crate::{
    error::{DeviceError, Result},
    utils::align,
};

use super::{
    device::Gpu,
    types::{BufferDesc, BufferHandle, BufferUsage},
    Sealed,
};

pub trait BufferKind: Sealed {
    /// Byte alignment of every element.
    const ALIGNMENT: u32;
    const USAGE: BufferUsage;
}

#[derive(Clone, Copy, Debug)]
pub struct Constant;
impl Sealed for Constant {}
impl BufferKind for Constant {
    const ALIGNMENT: u32 = 256;
    const USAGE: BufferUsage = BufferUsage::Constant.union(BufferUsage::Upload);
}

#[derive(Clone, Copy, Debug)]
pub struct Instance;
impl Sealed for Instance {}
impl BufferKind for Instance {
    const ALIGNMENT: u32 = 16;
    const USAGE: BufferUsage = BufferUsage::Instance.union(BufferUsage::Upload);
}

#[derive(Clone, Copy, Debug)]
pub struct Vertex;
impl Sealed for Vertex {}
impl BufferKind for Vertex {
    const ALIGNMENT: u32 = 4;
    const USAGE: BufferUsage = BufferUsage::Vertex.union(BufferUsage::Upload);
}

pub type ConstantBuffer<T> = UploadBuffer<T, Constant>;
pub type InstanceBuffer<T> = UploadBuffer<T, Instance>;
pub type VertexBuffer<T> = UploadBuffer<T, Vertex>;

/// CPU-writable buffer of `capacity` elements of `T`, each padded to the
/// alignment of its kind. The device buffer is released on drop.
#[derive(Debug)]
pub struct UploadBuffer<T: Pod, K: BufferKind> {
    gpu: Gpu,
    raw: BufferHandle,
    capacity: usize,
    _marker: PhantomData<(T, K)>,
}

impl<T: Pod, K: BufferKind> UploadBuffer<T, K> {
    pub(crate) fn inner_new(gpu: &Gpu, capacity: usize) -> Result<Self> {
        let raw = gpu.create_buffer(&BufferDesc::new(capacity * Self::stride(), K::USAGE))?;

        Ok(Self {
            gpu: gpu.clone(),
            raw,
            capacity,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn stride() -> usize {
        align(size_of::<T>() as u32, K::ALIGNMENT) as usize
    }

    #[inline]
    pub fn raw(&self) -> BufferHandle {
        self.raw
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte offset of element `index`.
    #[inline]
    pub fn offset_of(&self, index: usize) -> usize {
        index * Self::stride()
    }

    pub fn write(&self, index: usize, src: &T) -> Result<()> {
        self.check_range(index, 1)?;
        self.gpu
            .write_buffer(self.raw, self.offset_of(index), bytemuck::bytes_of(src))?;

        Ok(())
    }

    /// Writes `src` into consecutive elements starting at `start`.
    pub fn write_range(&self, start: usize, src: &[T]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }

        self.check_range(start, src.len())?;

        if Self::stride() == size_of::<T>() {
            self.gpu
                .write_buffer(self.raw, self.offset_of(start), bytemuck::cast_slice(src))?;
        } else {
            for (i, element) in src.iter().enumerate() {
                self.write(start + i, element)?;
            }
        }

        Ok(())
    }

    pub fn read(&self, index: usize) -> Result<T> {
        self.check_range(index, 1)?;
        let bytes = self
            .gpu
            .read_buffer(self.raw, self.offset_of(index), size_of::<T>())?;

        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    fn check_range(&self, start: usize, len: usize) -> Result<()> {
        if start.checked_add(len).map_or(true, |end| end > self.capacity) {
            tracing::error!(
                buffer = std::any::type_name::<T>(),
                start,
                len,
                capacity = self.capacity,
                "upload buffer index out of bounds"
            );

            return Err(DeviceError::OutOfBounds {
                offset: self.offset_of(start),
                len: len * Self::stride(),
                size: self.capacity * Self::stride(),
            }
            .into());
        }

        Ok(())
    }
}

impl<T: Pod, K: BufferKind> Drop for UploadBuffer<T, K> {
    fn drop(&mut self) {
        self.gpu.destroy_buffer(self.raw);
    }
}

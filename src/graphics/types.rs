use atomig::{Atom, AtomLogic};

macro_rules! raw_handle {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

raw_handle!(BufferHandle);
raw_handle!(TableHandle);
raw_handle!(FenceHandle);
raw_handle!(ContextHandle);

// Handles produced by collaborators outside this crate.
raw_handle!(PipelineId);
raw_handle!(TextureId);
raw_handle!(UiObjectId);

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct BufferUsage: u32 {
        const Constant = 1 << 0;
        const Vertex = 1 << 1;
        const Instance = 1 << 2;
        const Upload = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Why the descriptor table has to be rebuilt.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct RebuildReason: u32 {
        const Materials = 1 << 0;
        const Textures = 1 << 1;
        const UiObjects = 1 << 2;
        const RingBuffers = 1 << 3;
    }
}

impl Atom for RebuildReason {
    type Repr = u32;

    fn pack(self) -> Self::Repr {
        self.bits()
    }

    fn unpack(src: Self::Repr) -> Self {
        RebuildReason::from_bits_truncate(src)
    }
}

impl AtomLogic for RebuildReason {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: usize,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn new(size: usize, usage: BufferUsage) -> Self {
        Self { size, usage }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewDesc {
    Constant {
        buffer: BufferHandle,
        offset: usize,
        size: usize,
    },
    Texture(TextureId),
    UiObject(UiObjectId),
    /// Scratch slot owned by the blur post effect.
    Blur(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindSlot {
    Pass,
    Object,
    Material,
    MaterialBundle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SetPipeline(PipelineId),
    SetDescriptorTable(TableHandle),
    BindConstants {
        slot: BindSlot,
        buffer: BufferHandle,
        offset: usize,
    },
    BindInstances {
        buffer: BufferHandle,
        stride: usize,
    },
    BindVertices {
        buffer: BufferHandle,
        offset: usize,
        stride: usize,
    },
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
    },
}

// Buffer hub: shared buffers, their client registry and ownership protocol.

pub mod client;
pub mod detached;

pub use client::{ClientHandle, ClientRole};
pub use detached::DetachedBuffer;

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::{AcquiredFrame, BufferNode, GainOutcome, NodeHandle}; // re-export for stable path
}

pub mod Structs {
    pub mod Buffer_Structs;
    pub use Buffer_Structs::{
        BufferDescriptor, Dataspace, Fence, FrameMetadata, PixelFormat, Rect, ScalingMode,
        Transform,
    }; // re-export for stable path
}

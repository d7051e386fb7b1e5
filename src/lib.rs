// Module naming follows project convention (Hub = shared buffer hub, Queue = producer queue adapter)
pub mod error;
pub mod ffi;

#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Hub;
#[allow(non_snake_case)]
pub mod Queue;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub use error::{ErrorKind, HubError, Result};
pub use Core::alloc::{BufferHandle, GraphicAllocator, SharedMemoryAllocator};
pub use Hub::Buffer::{AcquiredFrame, BufferNode, GainOutcome, NodeHandle};
pub use Hub::Structs::{
    BufferDescriptor, Dataspace, Fence, FrameMetadata, PixelFormat, Rect, ScalingMode, Transform,
};
pub use Hub::{ClientHandle, ClientRole, DetachedBuffer};
pub use Queue::{
    ConnectApi, DequeueOutput, GraphicBuffer, ProducerQueue, QueryKey, QueueBufferInput,
    QueueBufferOutput, QueueBuilder, QueueConfig, SlotState,
};

// A graphics buffer shared between processes: pixel memory from the allocator
// plus a small metadata region holding the ownership protocol state.

use super::layout::MetadataHeader;
use crate::Core::alloc::{BufferHandle, GraphicAllocator};
use crate::Core::SharedMemory::SharedMemoryBackend;
use crate::Hub::Structs::Buffer_Structs::{Fence, FrameMetadata};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Everything another process needs to map the same buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeHandle {
    /// Name of the metadata region.
    pub region: String,
    /// Handle to the pixel memory.
    pub buffer: BufferHandle,
}

/// Fences recorded by the transitions of this process.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct NodeFences {
    /// Handed out with the frame on Acquire.
    pub ready: Fence,
    /// Handed to the producer on its next Gain.
    pub release: Fence,
}

/// Result of a successful Gain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GainOutcome {
    /// Frame generation after the Gain.
    pub generation: u64,
    /// Fence left by the last releasing client, `NoFence` when none.
    pub release_fence: Fence,
    /// Clients that released with a fence since the previous Gain.
    pub release_fence_mask: u64,
}

/// A posted frame as seen by the consumer that acquired it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquiredFrame {
    pub generation: u64,
    pub metadata: FrameMetadata,
    pub user_metadata: Vec<u8>,
    pub fence: Fence,
}

/// One shared buffer.
///
/// This struct is NOT stored in shared memory. It is a per-process view holding
/// the mapping of the metadata region; the header inside that region is the
/// cross-process source of truth. Clients hold it through `Arc<BufferNode>`.
pub struct BufferNode {
    /// Metadata region mapping; must outlive every use of `header`.
    pub(crate) shm: Box<dyn SharedMemoryBackend>,

    /// Pointer to the header at offset 0 of `shm`.
    pub(crate) header: *mut MetadataHeader,

    /// Pixel memory handle, already imported into `allocator`.
    pub(crate) buffer: BufferHandle,

    pub(crate) allocator: Arc<dyn GraphicAllocator>,

    pub(crate) fences: Mutex<NodeFences>,
}

unsafe impl Send for BufferNode {}
unsafe impl Sync for BufferNode {}

impl fmt::Debug for BufferNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_buffer_node(self, f)
    }
}

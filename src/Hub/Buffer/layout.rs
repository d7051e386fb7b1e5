use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::Hub::Structs::Buffer_Structs::FrameMetadata;

/// Maximum number of clients (producer plus consumers) registered on one buffer.
/// One bit per client in a 64-bit mask.
pub const MAX_CLIENTS: usize = 64;

/// "BUFHUBMD"
pub const METADATA_MAGIC: u64 = 0x4255_4648_5542_4D44;

/// Bumped whenever the header layout changes.
pub const METADATA_VERSION: u32 = 1;

/// `queue_index` value of a buffer that is not bound to any queue slot.
pub const NO_QUEUE_INDEX: u64 = u64::MAX;

/// Low bit of `fence_state`: the current generation is a posted frame.
pub const FENCE_POSTED: u64 = 1;

/// Largest user metadata blob; the whole region size must fit in a u32.
pub const MAX_USER_METADATA_SIZE: u64 = u32::MAX as u64 - METADATA_HEADER_SIZE as u64 - 1;

/// Control block at offset 0 of every buffer's metadata region.
///
/// This is the only state shared between processes. Every mutable field
/// is an atomic touched with CAS loops; nothing here is ever guarded by a lock,
/// since a process dying while holding one would wedge all the others.
#[repr(C, align(128))]
pub struct MetadataHeader {
    /// Identifies the region as a buffer hub metadata block.
    pub magic: u64,

    /// Layout version of this header.
    pub version: u32,

    /// Buffer id assigned by the allocator.
    pub buffer_id: u32,

    /// Size of the opaque user metadata that follows the header.
    pub user_metadata_size: u64,

    /// Slot index while the buffer sits in a producer queue.
    pub queue_index: AtomicU64,

    /// Bit of the registered producer client, 0 when none.
    pub producer_mask: AtomicU64,

    /// Client registry: one bit per attached client.
    pub active_clients_mask: AtomicU64,

    /// Clients that released with a fence the next Gain must inherit.
    pub release_fence_mask: AtomicU64,

    /// Event word for futex-based waiting. Bumped on every Post and Release.
    pub signal: AtomicU32,

    pub reserved: u32,

    /// Ownership mask: bit b set while client b holds the buffer.
    /// Padded to keep CAS traffic off the registry words.
    pub buffer_state: CachePadded<AtomicU64>,

    /// `generation << 1 | FENCE_POSTED`. Advanced by every Gain and Post.
    pub fence_state: CachePadded<AtomicU64>,

    /// Metadata of the last posted frame.
    pub metadata: FrameMetadata,
}

/// Offset of the user metadata blob inside the region.
pub const METADATA_HEADER_SIZE: usize = std::mem::size_of::<MetadataHeader>();

/// Total region size for a given user metadata size.
pub fn metadata_region_size(user_metadata_size: u64) -> usize {
    METADATA_HEADER_SIZE + user_metadata_size as usize
}

#[inline]
pub fn fence_generation(fence_state: u64) -> u64 {
    fence_state >> 1
}

#[inline]
pub fn is_fence_posted(fence_state: u64) -> bool {
    fence_state & FENCE_POSTED != 0
}

#[inline]
pub fn next_fence_state(fence_state: u64, posted: bool) -> u64 {
    let generation = fence_generation(fence_state).wrapping_add(1);
    (generation << 1) | if posted { FENCE_POSTED } else { 0 }
}

/// Lowest clear bit of `mask` as a bit value, 0 when every bit is set.
#[inline]
pub fn lowest_clear_bit(mask: u64) -> u64 {
    !mask & mask.wrapping_add(1)
}

/// True when no client other than `client_bit` holds the buffer.
#[inline]
pub fn is_released_for(buffer_state: u64, client_bit: u64) -> bool {
    buffer_state & !client_bit == 0
}

/// True when `client_bit` is the only holder.
#[inline]
pub fn is_gained_by(buffer_state: u64, client_bit: u64) -> bool {
    buffer_state == client_bit
}

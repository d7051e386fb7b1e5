use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64};

use super::layout::{
    fence_generation, is_fence_posted, is_gained_by, is_released_for, lowest_clear_bit,
    metadata_region_size, next_fence_state, MetadataHeader, MAX_CLIENTS, MAX_USER_METADATA_SIZE,
    METADATA_HEADER_SIZE, METADATA_MAGIC, METADATA_VERSION, NO_QUEUE_INDEX,
};
use super::Buffer::{AcquiredFrame, BufferNode, GainOutcome, NodeFences, NodeHandle};
use crate::error::{HubError, Result};
use crate::Core::alloc::{BufferHandle, GraphicAllocator};
use crate::Core::futex::{futex_wait, futex_wake_all};
use crate::Core::SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, SharedMemoryBackend,
};
use crate::Hub::Structs::Buffer_Structs::{BufferDescriptor, Fence, FrameMetadata};

impl BufferNode {
    /// Allocate pixel memory for `descriptor` and create its metadata region.
    ///
    /// The new node has no registered clients.
    pub fn allocate(
        descriptor: &BufferDescriptor,
        allocator: Arc<dyn GraphicAllocator>,
    ) -> Result<Arc<Self>> {
        if descriptor.user_metadata_size > MAX_USER_METADATA_SIZE {
            return Err(HubError::bad_value(format!(
                "user metadata size {} exceeds {}",
                descriptor.user_metadata_size, MAX_USER_METADATA_SIZE
            )));
        }

        let buffer = allocator.allocate(descriptor)?;
        let region = format!("{}-md", buffer.region());
        let size = metadata_region_size(descriptor.user_metadata_size);
        let shm = match create_shared_memory(size, Some(&region)) {
            Ok(shm) => shm,
            Err(e) => {
                allocator.destroy(&buffer);
                return Err(e.into());
            }
        };

        let header = shm.as_ptr() as *mut MetadataHeader;
        // Safety: the region is freshly created, zero filled and at least a header long.
        unsafe {
            ptr::write(
                header,
                MetadataHeader {
                    magic: METADATA_MAGIC,
                    version: METADATA_VERSION,
                    buffer_id: buffer.id(),
                    user_metadata_size: descriptor.user_metadata_size,
                    queue_index: AtomicU64::new(NO_QUEUE_INDEX),
                    producer_mask: AtomicU64::new(0),
                    active_clients_mask: AtomicU64::new(0),
                    release_fence_mask: AtomicU64::new(0),
                    signal: AtomicU32::new(0),
                    reserved: 0,
                    buffer_state: CachePadded::new(AtomicU64::new(0)),
                    fence_state: CachePadded::new(AtomicU64::new(0)),
                    metadata: FrameMetadata::default(),
                },
            );
        }

        tracing::debug!(
            "BufferNode::allocate: id={} region={} {}x{}",
            buffer.id(),
            region,
            descriptor.width,
            descriptor.height
        );

        Ok(Arc::new(Self::from_parts(shm, buffer, allocator)))
    }

    /// Map a node exported by another process (or another node in this one).
    pub fn import(handle: &NodeHandle, allocator: Arc<dyn GraphicAllocator>) -> Result<Arc<Self>> {
        let shm = attach_shared_memory(&handle.region, METADATA_HEADER_SIZE)
            .map_err(|e| HubError::import(format!("{}: {}", handle.region, e)))?;

        let header = shm.as_ptr() as *const MetadataHeader;
        // Safety: attach verified the region holds at least one header.
        let (magic, version, buffer_id, user_size) = unsafe {
            (
                (*header).magic,
                (*header).version,
                (*header).buffer_id,
                (*header).user_metadata_size,
            )
        };
        if magic != METADATA_MAGIC || version != METADATA_VERSION {
            return Err(HubError::import(format!(
                "{} is not a buffer metadata region (magic {:#x}, version {})",
                handle.region, magic, version
            )));
        }
        if buffer_id != handle.buffer.id() {
            return Err(HubError::import(format!(
                "{} describes buffer {}, handle names buffer {}",
                handle.region,
                buffer_id,
                handle.buffer.id()
            )));
        }
        if user_size > MAX_USER_METADATA_SIZE || shm.size() < metadata_region_size(user_size) {
            return Err(HubError::import(format!(
                "{} is truncated: {} bytes for {} bytes of user metadata",
                handle.region,
                shm.size(),
                user_size
            )));
        }

        let buffer = allocator.import(&handle.buffer)?;
        Ok(Arc::new(Self::from_parts(shm, buffer, allocator)))
    }

    fn from_parts(
        shm: Box<dyn SharedMemoryBackend>,
        buffer: BufferHandle,
        allocator: Arc<dyn GraphicAllocator>,
    ) -> Self {
        let header = shm.as_ptr() as *mut MetadataHeader;
        Self {
            shm,
            header,
            buffer,
            allocator,
            fences: Mutex::new(NodeFences::default()),
        }
    }

    /// Capability to hand to another process.
    pub fn export(&self) -> NodeHandle {
        NodeHandle {
            region: self.shm.name().to_owned(),
            buffer: self.buffer.clone(),
        }
    }

    #[inline]
    pub(crate) fn header(&self) -> &MetadataHeader {
        // Safety: header points into `shm`, which lives as long as self.
        unsafe { &*self.header }
    }

    pub fn id(&self) -> u32 {
        self.header().buffer_id
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        self.buffer.descriptor()
    }

    pub fn buffer_handle(&self) -> &BufferHandle {
        &self.buffer
    }

    pub fn allocator(&self) -> &Arc<dyn GraphicAllocator> {
        &self.allocator
    }

    pub fn user_metadata_size(&self) -> u64 {
        self.header().user_metadata_size
    }

    /// Current ownership mask.
    pub fn buffer_state(&self) -> u64 {
        self.header().buffer_state.load(Acquire)
    }

    pub fn fence_state(&self) -> u64 {
        self.header().fence_state.load(Acquire)
    }

    /// Frame generation, advanced by every Gain and Post.
    pub fn generation(&self) -> u64 {
        fence_generation(self.fence_state())
    }

    /// True while the current generation is a posted frame.
    pub fn is_posted(&self) -> bool {
        is_fence_posted(self.fence_state())
    }

    pub fn active_clients_mask(&self) -> u64 {
        self.header().active_clients_mask.load(Acquire)
    }

    pub fn producer_mask(&self) -> u64 {
        self.header().producer_mask.load(Acquire)
    }

    pub fn queue_index(&self) -> Option<usize> {
        match self.header().queue_index.load(Acquire) {
            NO_QUEUE_INDEX => None,
            index => Some(index as usize),
        }
    }

    pub(crate) fn set_queue_index(&self, index: Option<usize>) {
        let raw = index.map_or(NO_QUEUE_INDEX, |i| i as u64);
        self.header().queue_index.store(raw, Release);
    }

    // ---- client registry ----

    /// Register a new client: claim the lowest free bit of the registry.
    pub fn acquire_bit(&self) -> Result<u64> {
        let mask = &self.header().active_clients_mask;
        let backoff = Backoff::new();
        let mut current = mask.load(Acquire);
        loop {
            let bit = lowest_clear_bit(current);
            if bit == 0 {
                tracing::warn!(
                    "BufferNode::acquire_bit: buffer {} has no free client bit (mask={:#018x})",
                    self.id(),
                    current
                );
                return Err(HubError::ClientCapacity {
                    buffer_id: self.id(),
                    max: MAX_CLIENTS,
                });
            }
            match mask.compare_exchange_weak(current, current | bit, AcqRel, Acquire) {
                Ok(_) => {
                    tracing::trace!("BufferNode::acquire_bit: buffer {} bit={:#x}", self.id(), bit);
                    return Ok(bit);
                }
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    /// Unregister a client bit. Releasing a bit that is not set does nothing.
    pub fn release_bit(&self, bit: u64) {
        self.header().active_clients_mask.fetch_and(!bit, AcqRel);
    }

    /// Record `bit` as the node's single producer.
    pub(crate) fn register_producer(&self, bit: u64) -> Result<()> {
        match self
            .header()
            .producer_mask
            .compare_exchange(0, bit, AcqRel, Acquire)
        {
            Ok(_) => Ok(()),
            Err(producer_bit) if producer_bit == bit => Ok(()),
            Err(producer_bit) => Err(HubError::ProducerExists {
                buffer_id: self.id(),
                producer_bit,
            }),
        }
    }

    pub(crate) fn unregister_producer(&self, bit: u64) {
        let _ = self
            .header()
            .producer_mask
            .compare_exchange(bit, 0, AcqRel, Relaxed);
    }

    // ---- ownership transitions ----
    // Role checks happen in ClientHandle; these only enforce the state predicates.

    /// Take exclusive ownership for `bit`.
    pub(crate) fn gain(&self, bit: u64) -> Result<GainOutcome> {
        let header = self.header();
        let backoff = Backoff::new();
        let mut current = header.buffer_state.load(Acquire);
        loop {
            if is_gained_by(current, bit) {
                return Ok(GainOutcome {
                    generation: self.generation(),
                    release_fence: Fence::NoFence,
                    release_fence_mask: 0,
                });
            }
            if !is_released_for(current, bit) {
                tracing::debug!(
                    "BufferNode::gain: buffer {} not released for {:#x}, state={:#018x}",
                    self.id(),
                    bit,
                    current
                );
                return Err(HubError::NotReleased {
                    buffer_id: self.id(),
                    client_bit: bit,
                    state: current,
                });
            }
            match header
                .buffer_state
                .compare_exchange_weak(current, bit, AcqRel, Acquire)
            {
                Ok(_) => break,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }

        // Only the holder advances fence_state, so a plain store is enough.
        let fence_state = next_fence_state(header.fence_state.load(Acquire), false);
        header.fence_state.store(fence_state, Release);

        let release_fence_mask = header.release_fence_mask.swap(0, AcqRel);
        let release_fence = std::mem::take(&mut self.fences.lock().release);

        Ok(GainOutcome {
            generation: fence_generation(fence_state),
            release_fence,
            release_fence_mask,
        })
    }

    /// Publish a frame written by `bit` and give up ownership.
    /// Returns the posted frame generation.
    pub(crate) fn post(
        &self,
        bit: u64,
        metadata: &FrameMetadata,
        user_metadata: &[u8],
        fence: Fence,
    ) -> Result<u64> {
        let header = self.header();
        let current = header.buffer_state.load(Acquire);
        if !is_gained_by(current, bit) {
            return Err(HubError::NotGained {
                buffer_id: self.id(),
                client_bit: bit,
                state: current,
            });
        }
        if user_metadata.len() as u64 > header.user_metadata_size {
            return Err(HubError::bad_value(format!(
                "user metadata of {} bytes exceeds the buffer's {} bytes",
                user_metadata.len(),
                header.user_metadata_size
            )));
        }

        let mut frame = *metadata;
        frame.user_metadata_size = user_metadata.len() as u64;
        // Safety: we are the only holder, nobody reads the metadata until the
        // fence_state store below publishes it.
        unsafe {
            ptr::addr_of_mut!((*self.header).metadata).write(frame);
            if !user_metadata.is_empty() {
                ptr::copy_nonoverlapping(
                    user_metadata.as_ptr(),
                    self.shm.as_ptr().add(METADATA_HEADER_SIZE),
                    user_metadata.len(),
                );
            }
        }
        self.fences.lock().ready = fence;

        let fence_state = next_fence_state(header.fence_state.load(Acquire), true);
        header.fence_state.store(fence_state, Release);

        if header
            .buffer_state
            .compare_exchange(bit, 0, AcqRel, Acquire)
            .is_err()
        {
            // Another client can only touch its own bit, and none may set one
            // while we hold the buffer exclusively.
            return Err(HubError::invalid_state(format!(
                "buffer {} changed owners during post",
                self.id()
            )));
        }

        self.signal();
        Ok(fence_generation(fence_state))
    }

    /// Take read ownership of the posted frame for `bit`.
    ///
    /// `last_acquired` is the generation this client consumed last; that frame
    /// is not handed out twice.
    pub(crate) fn acquire(&self, bit: u64, last_acquired: Option<u64>) -> Result<AcquiredFrame> {
        let header = self.header();
        let not_posted = |state: u64| HubError::NotPosted {
            buffer_id: self.id(),
            client_bit: bit,
            state,
        };

        let backoff = Backoff::new();
        let mut current = header.buffer_state.load(Acquire);
        loop {
            let fence_state = header.fence_state.load(Acquire);
            let producer = header.producer_mask.load(Acquire);
            if !is_fence_posted(fence_state)
                || current & producer != 0
                || current & bit != 0
                || last_acquired == Some(fence_generation(fence_state))
            {
                return Err(not_posted(current));
            }
            match header
                .buffer_state
                .compare_exchange_weak(current, current | bit, AcqRel, Acquire)
            {
                Ok(_) => break,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }

        // Holding our bit keeps the producer out; whatever is posted now stays.
        let fence_state = header.fence_state.load(Acquire);
        let generation = fence_generation(fence_state);
        if !is_fence_posted(fence_state) || last_acquired == Some(generation) {
            let state = header.buffer_state.fetch_and(!bit, AcqRel) & !bit;
            return Err(not_posted(state));
        }

        // Safety: the producer cannot Gain while our bit is set.
        let metadata = unsafe { ptr::addr_of!((*self.header).metadata).read() };
        let user_len = metadata.user_metadata_size.min(header.user_metadata_size) as usize;
        let mut user_metadata = vec![0u8; user_len];
        if user_len > 0 {
            unsafe {
                ptr::copy_nonoverlapping(
                    self.shm.as_ptr().add(METADATA_HEADER_SIZE),
                    user_metadata.as_mut_ptr(),
                    user_len,
                );
            }
        }

        Ok(AcquiredFrame {
            generation,
            metadata,
            user_metadata,
            fence: self.fences.lock().ready,
        })
    }

    /// Drop ownership held by `bit`, optionally leaving a fence for the next Gain.
    /// Returns false when `bit` held nothing.
    pub(crate) fn release(&self, bit: u64, fence: Fence) -> bool {
        let header = self.header();
        let previous = header.buffer_state.fetch_and(!bit, AcqRel);
        if previous & bit == 0 {
            return false;
        }

        if fence.is_valid() {
            self.fences.lock().release = fence;
            header.release_fence_mask.fetch_or(bit, AcqRel);
        }
        self.signal();
        true
    }

    /// Clean up after a client that died without detaching.
    ///
    /// Clears its ownership bit, its producer registration and its registry bit.
    /// Called by whatever supervises the client processes.
    pub fn reclaim_client(&self, bit: u64) {
        let held = self.release(bit, Fence::NoFence);
        self.unregister_producer(bit);
        self.release_bit(bit);
        tracing::info!(
            "BufferNode::reclaim_client: buffer {} reclaimed bit {:#x} (was holding: {})",
            self.id(),
            bit,
            held
        );
    }

    // ---- event word ----

    /// Current value of the event word; pass it to `wait_for_signal`.
    pub fn signal_seq(&self) -> u32 {
        self.header().signal.load(Acquire)
    }

    /// Block until a Post or Release happens after `seen`, or `timeout` elapses.
    pub fn wait_for_signal(&self, seen: u32, timeout: Option<Duration>) {
        futex_wait(&self.header().signal, seen, timeout);
    }

    fn signal(&self) {
        let signal = &self.header().signal;
        signal.fetch_add(1, Release);
        futex_wake_all(signal);
    }
}

impl Drop for BufferNode {
    fn drop(&mut self) {
        let remaining = self.active_clients_mask();
        if remaining != 0 {
            tracing::debug!(
                "BufferNode::drop: buffer {} still has clients {:#018x}, unmapping only",
                self.id(),
                remaining
            );
            self.allocator.free(&self.buffer);
            return;
        }

        if let Err(e) = unlink_shared_memory(self.shm.name()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "BufferNode::drop: failed to unlink {}: {}",
                    self.shm.name(),
                    e
                );
            }
        }
        self.allocator.destroy(&self.buffer);
    }
}

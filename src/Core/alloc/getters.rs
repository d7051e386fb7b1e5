use super::*;
use std::sync::atomic::Ordering;

/// Getter methods for SharedMemoryAllocator
///
/// These expose allocator bookkeeping for debugging and monitoring purposes.
impl SharedMemoryAllocator {
    /// Prefix used for every region this allocator creates
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Total number of successful allocations since construction
    ///
    /// Loaded with relaxed ordering since this is primarily used for
    /// debugging and monitoring.
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.load(Ordering::Relaxed)
    }

    /// Number of regions currently mapped, allocated or imported
    pub fn live_regions(&self) -> usize {
        self.regions.lock().len()
    }

    /// Number of buffer ids currently handed out
    pub fn ids_in_use(&self) -> usize {
        self.ids.in_use()
    }

    /// Id source for buffers allocated here
    pub fn id_generator(&self) -> &BufferIdGenerator {
        &self.ids
    }

    /// Check whether `handle`'s region is mapped by this allocator
    pub fn is_mapped(&self, handle: &BufferHandle) -> bool {
        self.regions.lock().contains_key(handle.region())
    }

    /// Raw pointer to the pixel memory behind `handle`, if mapped here
    ///
    /// # Safety
    /// The pointer is only valid until `free` is called for the handle.
    pub unsafe fn pixels_ptr(&self, handle: &BufferHandle) -> Option<*mut u8> {
        self.regions.lock().get(handle.region()).map(|(shm, _)| shm.as_ptr())
    }
}

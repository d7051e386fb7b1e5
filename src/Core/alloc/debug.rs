use super::*;
use std::fmt;

// Debug proxy implementation that calls the standalone debug function
impl fmt::Debug for SharedMemoryAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_shared_memory_allocator(self, f)
    }
}

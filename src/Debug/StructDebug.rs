use std::fmt;

use crate::Core::alloc::SharedMemoryAllocator;
use crate::Hub::Buffer::BufferNode;
use crate::Hub::ClientHandle;
use crate::Queue::ProducerQueue;

/// Debug function for SharedMemoryAllocator
///
/// Shows the region prefix and allocation counters, never the mappings.
pub fn debug_shared_memory_allocator(allocator: &SharedMemoryAllocator, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedMemoryAllocator")
        .field("prefix", &allocator.prefix())
        .field("allocations", &allocator.allocation_count())
        .field("live_regions", &allocator.live_regions())
        .field("ids_in_use", &allocator.ids_in_use())
        .finish()
}

/// Debug function for BufferNode
///
/// Safely displays the header location and a snapshot of the shared state words.
pub fn debug_buffer_node(node: &BufferNode, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BufferNode")
        .field("id", &node.id())
        .field("header", &format_args!("{:p}", node.header))
        .field("region", &node.export().region)
        .field("buffer_state", &format_args!("{:#018x}", node.buffer_state()))
        .field("active_clients", &format_args!("{:#018x}", node.active_clients_mask()))
        .field("producer", &format_args!("{:#x}", node.producer_mask()))
        .field("generation", &node.generation())
        .field("posted", &node.is_posted())
        .finish_non_exhaustive()
}

pub fn debug_client_handle(client: &ClientHandle, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClientHandle")
        .field("buffer_id", &client.node().id())
        .field("role", &client.role())
        .field("bit", &format_args!("{:#x}", client.client_bit()))
        .field("cached_state", &format_args!("{:#018x}", client.cached_state()))
        .field("last_acquired", &client.last_acquired())
        .finish()
}

/// Debug function for ProducerQueue
///
/// Takes the slot table lock briefly to count slots.
pub fn debug_producer_queue(queue: &ProducerQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProducerQueue")
        .field("unique_id", &format_args!("{:#x}", queue.unique_id()))
        .field("connected_api", &queue.connected_api())
        .field("capacity", &queue.capacity())
        .field("allocated", &queue.allocated_count())
        .field("dequeued", &queue.dequeued_count())
        .field("ready", &queue.ready_count())
        .field("generation_number", &queue.generation_number())
        .finish()
}

use std::sync::Arc;

use crate::error::Result;
use crate::Core::alloc::GraphicAllocator;
use crate::Hub::client::ClientHandle;
use crate::Hub::Buffer::{BufferNode, NodeHandle};
use crate::Hub::Structs::Buffer_Structs::BufferDescriptor;

/// A gained buffer that belongs to no producer queue.
///
/// Produced by `ProducerQueue::detach` or allocated directly, and consumed by
/// `ProducerQueue::attach`. The producer client keeps the buffer gained the
/// whole time, so no consumer can touch it while it is in transit.
#[derive(Debug)]
pub struct DetachedBuffer {
    producer: ClientHandle,
    generation_number: u32,
}

impl DetachedBuffer {
    /// Allocate a fresh buffer, register its producer and gain it.
    pub fn allocate(
        descriptor: &BufferDescriptor,
        allocator: Arc<dyn GraphicAllocator>,
    ) -> Result<Self> {
        let node = BufferNode::allocate(descriptor, allocator)?;
        let mut producer = ClientHandle::producer(node)?;
        producer.gain()?;
        Ok(Self {
            producer,
            generation_number: 0,
        })
    }

    pub(crate) fn from_producer(producer: ClientHandle, generation_number: u32) -> Self {
        Self {
            producer,
            generation_number,
        }
    }

    /// Tag the buffer for a queue with a different generation number.
    pub fn with_generation_number(mut self, generation_number: u32) -> Self {
        self.generation_number = generation_number;
        self
    }

    pub fn generation_number(&self) -> u32 {
        self.generation_number
    }

    pub fn node(&self) -> &Arc<BufferNode> {
        self.producer.node()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        self.producer.node().descriptor()
    }

    pub fn id(&self) -> u32 {
        self.producer.node().id()
    }

    /// Capability for mapping the buffer in another process.
    pub fn export(&self) -> NodeHandle {
        self.producer.node().export()
    }

    pub fn producer(&self) -> &ClientHandle {
        &self.producer
    }

    pub fn producer_mut(&mut self) -> &mut ClientHandle {
        &mut self.producer
    }

    pub fn into_producer(self) -> ClientHandle {
        self.producer
    }
}

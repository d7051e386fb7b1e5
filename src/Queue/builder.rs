use std::sync::Arc;
use std::time::Duration;

use super::config::QueueConfig;
use super::producer_queue::ProducerQueue;
use crate::error::Result;
use crate::Core::alloc::{GraphicAllocator, SharedMemoryAllocator};
use crate::Hub::Structs::Buffer_Structs::PixelFormat;

pub struct QueueBuilder {
    config: QueueConfig,
    allocator: Option<Arc<dyn GraphicAllocator>>,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self {
            config: QueueConfig::default(),
            allocator: None, // shared memory allocator per queue
        }
    }
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_default_size(mut self, width: u32, height: u32) -> Self {
        self.config = self.config.with_default_size(width, height);
        self
    }

    pub fn with_default_format(mut self, format: PixelFormat) -> Self {
        self.config = self.config.with_default_format(format);
        self
    }

    pub fn with_default_usage(mut self, usage: u64) -> Self {
        self.config = self.config.with_default_usage(usage);
        self
    }

    pub fn with_user_metadata_size(mut self, size: u64) -> Self {
        self.config = self.config.with_user_metadata_size(size);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_capacity(capacity);
        self
    }

    pub fn with_max_dequeued_buffer_count(mut self, count: usize) -> Self {
        self.config = self.config.with_max_dequeued_buffer_count(count);
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config = self.config.with_dequeue_timeout(timeout);
        self
    }

    pub fn with_region_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config = self.config.with_region_prefix(prefix);
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn GraphicAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Build a disconnected queue; call `connect` before dequeuing.
    pub fn build(self) -> Result<ProducerQueue> {
        self.config.validate()?;
        let allocator: Arc<dyn GraphicAllocator> = match self.allocator {
            Some(allocator) => allocator,
            None => Arc::new(SharedMemoryAllocator::with_prefix(
                self.config.region_prefix.clone(),
            )),
        };
        Ok(ProducerQueue::new(self.config, allocator))
    }
}

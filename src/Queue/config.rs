use std::time::Duration;

use crate::error::{HubError, Result};
use crate::Hub::Structs::Buffer_Structs::PixelFormat;

/// Largest number of slots a producer queue may have.
pub const MAX_QUEUE_CAPACITY: usize = 64;

/// Buffers the consumer side may hold at any time; never dequeuable.
pub const UNDEQUEUED_BUFFERS: usize = 1;

/// Settings for a `ProducerQueue`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub default_width: u32,
    pub default_height: u32,
    pub default_format: PixelFormat,
    pub default_usage: u64,
    pub layer_count: u32,
    /// Bytes of opaque user metadata carried by every buffer.
    pub user_metadata_size: u64,
    /// Number of slots, at most `MAX_QUEUE_CAPACITY`.
    pub capacity: usize,
    pub max_dequeued_buffer_count: usize,
    /// `None` blocks until a buffer is available.
    pub dequeue_timeout: Option<Duration>,
    /// Prefix of the shared memory region names.
    pub region_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_width: 1,
            default_height: 1,
            default_format: PixelFormat::RGBA_8888,
            default_usage: 0,
            layer_count: 1,
            user_metadata_size: 0,
            capacity: MAX_QUEUE_CAPACITY,
            max_dequeued_buffer_count: 1,
            dequeue_timeout: None,
            region_prefix: "bufferhub".to_owned(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_size(mut self, width: u32, height: u32) -> Self {
        self.default_width = width;
        self.default_height = height;
        self
    }

    pub fn with_default_format(mut self, format: PixelFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn with_default_usage(mut self, usage: u64) -> Self {
        self.default_usage = usage;
        self
    }

    pub fn with_layer_count(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }

    pub fn with_user_metadata_size(mut self, size: u64) -> Self {
        self.user_metadata_size = size;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_dequeued_buffer_count(mut self, count: usize) -> Self {
        self.max_dequeued_buffer_count = count;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_region_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.region_prefix = prefix.into();
        self
    }

    /// Largest legal max-dequeued count for this capacity.
    pub fn max_dequeued_limit(&self) -> usize {
        self.capacity.saturating_sub(UNDEQUEUED_BUFFERS)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity <= UNDEQUEUED_BUFFERS || self.capacity > MAX_QUEUE_CAPACITY {
            return Err(HubError::bad_value(format!(
                "capacity {} outside ({}, {}]",
                self.capacity, UNDEQUEUED_BUFFERS, MAX_QUEUE_CAPACITY
            )));
        }
        if self.max_dequeued_buffer_count == 0
            || self.max_dequeued_buffer_count > self.max_dequeued_limit()
        {
            return Err(HubError::bad_value(format!(
                "max dequeued count {} outside [1, {}]",
                self.max_dequeued_buffer_count,
                self.max_dequeued_limit()
            )));
        }
        if self.default_width == 0 || self.default_height == 0 || self.layer_count == 0 {
            return Err(HubError::bad_value(format!(
                "default geometry {}x{}x{} must be non-zero",
                self.default_width, self.default_height, self.layer_count
            )));
        }
        Ok(())
    }
}

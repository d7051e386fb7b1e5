// Producer queue adapter: a dequeue/queue/cancel slot table over hub buffers.

mod builder;
pub mod config;
mod graphic_buffer;
mod producer_queue;
mod query;
pub mod slot;

pub use builder::QueueBuilder;
pub use config::{QueueConfig, MAX_QUEUE_CAPACITY, UNDEQUEUED_BUFFERS};
pub use graphic_buffer::GraphicBuffer;
pub use producer_queue::{
    ConnectApi, DequeueOutput, ProducerQueue, QueueBufferInput, QueueBufferOutput,
};
pub use query::QueryKey;
pub use slot::SlotState;

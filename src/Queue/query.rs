use super::config::UNDEQUEUED_BUFFERS;
use super::producer_queue::ProducerQueue;
use crate::error::{HubError, Result};

/// Keys accepted by `ProducerQueue::query`, numbered like the native window keys.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueryKey {
    Width = 0,
    Height = 1,
    Format = 2,
    MinUndequeuedBuffers = 3,
    ConsumerRunningBehind = 9,
    ConsumerUsageBits = 10,
    StickyTransform = 11,
    DefaultDataspace = 12,
    BufferAge = 13,
    ConsumerIsProtected = 19,
}

impl TryFrom<i32> for QueryKey {
    type Error = HubError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => Self::Width,
            1 => Self::Height,
            2 => Self::Format,
            3 => Self::MinUndequeuedBuffers,
            9 => Self::ConsumerRunningBehind,
            10 => Self::ConsumerUsageBits,
            11 => Self::StickyTransform,
            12 => Self::DefaultDataspace,
            13 => Self::BufferAge,
            19 => Self::ConsumerIsProtected,
            other => return Err(HubError::bad_value(format!("unknown query key {}", other))),
        })
    }
}

impl ProducerQueue {
    pub fn query(&self, key: QueryKey) -> i32 {
        let config = self.config();
        match key {
            QueryKey::MinUndequeuedBuffers => UNDEQUEUED_BUFFERS as i32,
            QueryKey::Width => config.default_width as i32,
            QueryKey::Height => config.default_height as i32,
            QueryKey::Format => config.default_format.0 as i32,
            // Consumers run asynchronously and are invisible from here.
            QueryKey::BufferAge
            | QueryKey::ConsumerRunningBehind
            | QueryKey::ConsumerUsageBits
            | QueryKey::DefaultDataspace
            | QueryKey::StickyTransform => 0,
            QueryKey::ConsumerIsProtected => 1,
        }
    }

    /// `query` for a raw key; unknown keys are `BadValue`.
    pub fn query_raw(&self, key: i32) -> Result<i32> {
        let key = QueryKey::try_from(key)?;
        let value = self.query(key);
        tracing::trace!("query: key={:?}, v={}", key, value);
        Ok(value)
    }
}

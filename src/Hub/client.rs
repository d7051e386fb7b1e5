use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{HubError, Result};
use crate::Hub::Buffer::{AcquiredFrame, BufferNode, GainOutcome};
use crate::Hub::Structs::Buffer_Structs::{Fence, FrameMetadata};

/// What a client may do with the buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClientRole {
    /// Writes frames: Gain, Post, Release.
    Producer,
    /// Reads frames: Acquire, Release.
    Consumer,
}

/// One client's view of a shared buffer.
///
/// Holds a registry bit on the node for its whole lifetime. Dropping the
/// handle releases any ownership it still has, then its bit.
pub struct ClientHandle {
    node: Arc<BufferNode>,
    bit: u64,
    role: ClientRole,
    /// Ownership mask as of the last call on this handle.
    cached_state: u64,
    /// Generation of the last frame this client acquired.
    last_acquired: Option<u64>,
}

impl ClientHandle {
    /// Register the node's producer. Fails if another producer is registered.
    pub fn producer(node: Arc<BufferNode>) -> Result<Self> {
        let bit = node.acquire_bit()?;
        if let Err(e) = node.register_producer(bit) {
            node.release_bit(bit);
            return Err(e);
        }
        Ok(Self::new(node, bit, ClientRole::Producer))
    }

    /// Register an additional consumer.
    pub fn consumer(node: Arc<BufferNode>) -> Result<Self> {
        let bit = node.acquire_bit()?;
        Ok(Self::new(node, bit, ClientRole::Consumer))
    }

    fn new(node: Arc<BufferNode>, bit: u64, role: ClientRole) -> Self {
        let cached_state = node.buffer_state();
        tracing::debug!(
            "ClientHandle: buffer {} registered {:?} bit={:#x}",
            node.id(),
            role,
            bit
        );
        Self {
            node,
            bit,
            role,
            cached_state,
            last_acquired: None,
        }
    }

    fn require(&self, op: &'static str, role: ClientRole) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(HubError::WrongRole {
                op,
                role: self.role,
            })
        }
    }

    /// Producer: take exclusive write ownership.
    pub fn gain(&mut self) -> Result<GainOutcome> {
        self.require("gain", ClientRole::Producer)?;
        let result = self.node.gain(self.bit);
        self.cached_state = self.node.buffer_state();
        result
    }

    /// Producer: publish the frame and hand the buffer to consumers.
    pub fn post(
        &mut self,
        metadata: &FrameMetadata,
        user_metadata: &[u8],
        fence: Fence,
    ) -> Result<u64> {
        self.require("post", ClientRole::Producer)?;
        let result = self.node.post(self.bit, metadata, user_metadata, fence);
        self.cached_state = self.node.buffer_state();
        result
    }

    /// Consumer: take read ownership of a posted frame not yet seen by this client.
    pub fn acquire(&mut self) -> Result<AcquiredFrame> {
        self.require("acquire", ClientRole::Consumer)?;
        let result = self.node.acquire(self.bit, self.last_acquired);
        if let Ok(frame) = &result {
            self.last_acquired = Some(frame.generation);
        }
        self.cached_state = self.node.buffer_state();
        result
    }

    /// Any role: give up ownership. Releasing without holding does nothing.
    pub fn release(&mut self, fence: Fence) -> Result<()> {
        self.node.release(self.bit, fence);
        self.cached_state = self.node.buffer_state();
        Ok(())
    }

    /// Wait until the buffer state changes or `timeout` elapses.
    /// Returns the fresh ownership mask.
    pub fn poll(&mut self, timeout: Option<Duration>) -> u64 {
        let deadline = timeout.map(|t| Instant::now() + t);
        let seen = self.node.signal_seq();
        let start_state = self.node.buffer_state();
        if start_state == self.cached_state {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            self.node.wait_for_signal(seen, remaining);
        }
        self.buffer_state()
    }

    /// Producer: wait until the buffer can be gained, then gain it.
    pub fn gain_blocking(&mut self, timeout: Option<Duration>) -> Result<GainOutcome> {
        self.require("gain", ClientRole::Producer)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let seen = self.node.signal_seq();
            match self.gain() {
                Err(e @ HubError::NotReleased { .. }) => {
                    let remaining = match deadline {
                        Some(d) => {
                            let now = Instant::now();
                            if now >= d {
                                return Err(e);
                            }
                            Some(d - now)
                        }
                        None => None,
                    };
                    self.node.wait_for_signal(seen, remaining);
                }
                other => return other,
            }
        }
    }

    /// Refresh and return the ownership mask.
    pub fn buffer_state(&mut self) -> u64 {
        self.cached_state = self.node.buffer_state();
        self.cached_state
    }

    /// Ownership mask as of the last call, without touching shared memory.
    pub fn cached_state(&self) -> u64 {
        self.cached_state
    }

    pub fn client_bit(&self) -> u64 {
        self.bit
    }

    pub fn role(&self) -> ClientRole {
        self.role
    }

    pub fn node(&self) -> &Arc<BufferNode> {
        &self.node
    }

    /// True while this client's bit is set in the ownership mask.
    pub fn holds(&self) -> bool {
        self.node.buffer_state() & self.bit != 0
    }

    pub fn last_acquired(&self) -> Option<u64> {
        self.last_acquired
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.node.release(self.bit, Fence::NoFence);
        if self.role == ClientRole::Producer {
            self.node.unregister_producer(self.bit);
        }
        self.node.release_bit(self.bit);
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_client_handle(self, f)
    }
}

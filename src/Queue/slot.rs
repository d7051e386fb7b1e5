// Producer-side bookkeeping for one queue index.

use super::graphic_buffer::GraphicBuffer;
use crate::Hub::client::ClientHandle;
use crate::Hub::Structs::Buffer_Structs::{BufferDescriptor, Fence};

/// Where a slot is in the producer's dequeue/queue cycle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    /// Owned by the queue, ready to be dequeued.
    #[default]
    Free,
    /// Owned by the producer application.
    Dequeued,
    /// Posted to consumers.
    Queued,
    /// Buffer being replaced because its geometry did not match a dequeue.
    Reallocating,
}

#[derive(Debug, Default)]
pub struct Slot {
    pub state: SlotState,
    /// Producer client of the bound buffer; `None` for an unbound slot.
    pub producer: Option<ClientHandle>,
    /// Set while the slot's buffer is replaced; reported once by the next dequeue.
    pub is_reallocating: bool,
    /// `request` has handed out the buffer for the current binding.
    pub request_called: bool,
    /// Last buffer reference handed out by `request`.
    pub graphic_buffer: Option<GraphicBuffer>,
    /// Fence from `cancel`, returned by the next dequeue of this slot.
    pub fence: Fence,
}

impl Slot {
    pub fn is_bound(&self) -> bool {
        self.producer.is_some()
    }

    pub fn is_free_unbound(&self) -> bool {
        self.state == SlotState::Free && self.producer.is_none()
    }

    pub fn descriptor(&self) -> Option<&BufferDescriptor> {
        self.producer.as_ref().map(|p| p.node().descriptor())
    }

    pub fn bind(&mut self, producer: ClientHandle) {
        self.producer = Some(producer);
        self.graphic_buffer = None;
        self.request_called = false;
        self.fence = Fence::NoFence;
    }

    /// Drop the binding and return the slot to Free. Keeps `is_reallocating`.
    pub fn unbind(&mut self) -> Option<ClientHandle> {
        self.state = SlotState::Free;
        self.clear_request();
        self.fence = Fence::NoFence;
        let producer = self.producer.take();
        if let Some(p) = &producer {
            p.node().set_queue_index(None);
        }
        producer
    }

    pub fn clear_request(&mut self) {
        self.request_called = false;
        self.graphic_buffer = None;
    }
}

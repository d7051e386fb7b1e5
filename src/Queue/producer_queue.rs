use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::config::{QueueConfig, UNDEQUEUED_BUFFERS};
use super::graphic_buffer::GraphicBuffer;
use super::slot::{Slot, SlotState};
use crate::error::{HubError, Result};
use crate::Core::alloc::GraphicAllocator;
use crate::Hub::client::ClientHandle;
use crate::Hub::detached::DetachedBuffer;
use crate::Hub::Buffer::{BufferNode, GainOutcome};
use crate::Hub::Structs::Buffer_Structs::{
    BufferDescriptor, Dataspace, Fence, FrameMetadata, PixelFormat, Rect, ScalingMode, Transform,
};

/// How often a blocked dequeue re-checks buffers released by other processes.
const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(1);

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(0);

/// Producer API connected to the queue.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectApi {
    Egl = 1,
    Cpu = 2,
    Media = 3,
    Camera = 4,
}

impl TryFrom<i32> for ConnectApi {
    type Error = HubError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(Self::Egl),
            2 => Ok(Self::Cpu),
            3 => Ok(Self::Media),
            4 => Ok(Self::Camera),
            other => Err(HubError::bad_value(format!("unknown api {}", other))),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DequeueOutput {
    pub slot: usize,
    /// Wait on this before writing into the buffer.
    pub fence: Fence,
    /// The slot's buffer changed since it was last handed out; call `request` again.
    pub needs_reallocation: bool,
}

/// Per-frame parameters for `queue`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueBufferInput {
    pub timestamp: i64,
    pub is_auto_timestamp: bool,
    pub dataspace: Dataspace,
    /// Empty means the whole buffer.
    pub crop: Rect,
    pub scaling_mode: ScalingMode,
    pub transform: Transform,
    /// Opaque bytes published with the frame.
    pub user_metadata: Vec<u8>,
}

impl QueueBufferInput {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    pub fn with_crop(mut self, crop: Rect) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_scaling_mode(mut self, scaling_mode: ScalingMode) -> Self {
        self.scaling_mode = scaling_mode;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_dataspace(mut self, dataspace: Dataspace) -> Self {
        self.dataspace = dataspace;
        self
    }

    pub fn with_user_metadata(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.user_metadata = bytes.into();
        self
    }

    fn frame_metadata(&self) -> FrameMetadata {
        let mut metadata = FrameMetadata {
            timestamp: self.timestamp,
            is_auto_timestamp: self.is_auto_timestamp as i32,
            dataspace: self.dataspace.0,
            scaling_mode: self.scaling_mode as i32,
            transform: self.transform.0,
            ..FrameMetadata::default()
        };
        metadata.set_crop(self.crop);
        metadata
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueBufferOutput {
    pub width: u32,
    pub height: u32,
    pub transform_hint: u32,
    /// Consumers acquire on their own, so this is always 0.
    pub num_pending_buffers: u32,
    pub next_frame_number: u64,
}

struct QueueState {
    slots: Vec<Slot>,
    /// Slots handed back by allocate, queue or cancel, oldest first.
    ready: VecDeque<usize>,
    connected_api: Option<ConnectApi>,
    max_dequeued: usize,
    dequeue_timeout: Option<Duration>,
    generation_number: u32,
}

impl QueueState {
    fn allocated(&self) -> usize {
        self.slots.iter().filter(|s| s.is_bound()).count()
    }

    fn dequeued(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Dequeued)
            .count()
    }

    fn require_connected(&self, op: &str) -> Result<()> {
        if self.connected_api.is_none() {
            tracing::error!("{}: producer queue has no connected api", op);
            return Err(HubError::NoInit);
        }
        Ok(())
    }

    fn slot_mut(&mut self, index: usize, op: &str) -> Result<&mut Slot> {
        let capacity = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| {
            tracing::error!("{}: slot index {} out of range [0, {})", op, index, capacity);
            HubError::bad_value(format!("slot {} out of range [0, {})", index, capacity))
        })
    }

    fn first_free_unbound(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_free_unbound())
    }
}

/// Producer side of a buffer queue built on shared hub buffers.
///
/// Every bound slot holds the producer client of its buffer. Buffers are
/// allocated lazily, replaced when a dequeue asks for different geometry,
/// and can move between queues through `detach` and `attach`.
pub struct ProducerQueue {
    config: QueueConfig,
    allocator: Arc<dyn GraphicAllocator>,
    unique_id: u64,
    state: Mutex<QueueState>,
    /// Notified whenever a slot is pushed onto the ready list.
    available: Condvar,
}

impl ProducerQueue {
    /// Use `QueueBuilder` unless the config is already validated.
    pub fn new(config: QueueConfig, allocator: Arc<dyn GraphicAllocator>) -> Self {
        let seq = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let unique_id = (u64::from(std::process::id()) << 32) | (seq & 0xFFFF_FFFF);
        let state = QueueState {
            slots: (0..config.capacity).map(|_| Slot::default()).collect(),
            ready: VecDeque::with_capacity(config.capacity),
            connected_api: None,
            max_dequeued: config.max_dequeued_buffer_count,
            dequeue_timeout: config.dequeue_timeout,
            generation_number: 0,
        };
        Self {
            config,
            allocator,
            unique_id,
            state: Mutex::new(state),
            available: Condvar::new(),
        }
    }

    // ---- connection ----

    pub fn connect(&self, api: ConnectApi) -> Result<QueueBufferOutput> {
        let mut state = self.state.lock();
        if let Some(current) = state.connected_api {
            return Err(HubError::bad_value(format!(
                "already connected to {:?}",
                current
            )));
        }
        state.connected_api = Some(api);
        tracing::debug!("ProducerQueue::connect: queue {:#x} api={:?}", self.unique_id, api);

        Ok(QueueBufferOutput {
            width: self.config.default_width,
            height: self.config.default_height,
            ..QueueBufferOutput::default()
        })
    }

    /// Disconnect `api` and free every buffer.
    pub fn disconnect(&self, api: ConnectApi) -> Result<()> {
        let mut state = self.state.lock();
        match state.connected_api {
            None => return Err(HubError::NoInit),
            Some(current) if current != api => {
                return Err(HubError::bad_value(format!(
                    "disconnect {:?} while connected to {:?}",
                    api, current
                )))
            }
            Some(_) => {}
        }

        Self::free_all_buffers(&mut state);
        state.connected_api = None;
        self.available.notify_all();
        Ok(())
    }

    fn free_all_buffers(state: &mut QueueState) {
        state.ready.clear();
        for slot in state.slots.iter_mut() {
            drop(slot.unbind());
            slot.is_reallocating = false;
        }
    }

    // ---- allocation ----

    fn allocate_into(
        &self,
        state: &mut QueueState,
        index: usize,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u64,
    ) -> Result<()> {
        let descriptor =
            BufferDescriptor::new(width, height, self.config.layer_count, format, usage)
                .with_user_metadata_size(self.config.user_metadata_size);

        let producer = BufferNode::allocate(&descriptor, self.allocator.clone())
            .and_then(ClientHandle::producer)
            .map_err(|e| {
                tracing::error!(
                    "ProducerQueue::allocate: slot {} {}x{} format={:#x} failed: {}",
                    index,
                    width,
                    height,
                    format.0,
                    e
                );
                HubError::no_memory(format!("failed to allocate a buffer for slot {}: {}", index, e))
            });

        let slot = &mut state.slots[index];
        let producer = match producer {
            Ok(producer) => producer,
            Err(e) => {
                slot.state = SlotState::Free;
                slot.is_reallocating = false;
                return Err(e);
            }
        };

        producer.node().set_queue_index(Some(index));
        slot.bind(producer);
        slot.state = SlotState::Free;
        state.ready.push_back(index);
        self.available.notify_one();
        Ok(())
    }

    /// Lazily allocate into the lowest free, unbound slot.
    fn allocate_buffer(
        &self,
        state: &mut QueueState,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u64,
    ) -> Result<usize> {
        let index = state
            .first_free_unbound()
            .ok_or_else(|| HubError::slot_capacity("every slot is bound"))?;
        self.allocate_into(state, index, width, height, format, usage)?;
        Ok(index)
    }

    // ---- dequeue ----

    /// Take the oldest ready slot whose buffer the producer can gain.
    ///
    /// Queued buffers still held by consumers are skipped until released.
    fn pop_ready(
        &self,
        state: &mut MutexGuard<'_, QueueState>,
        deadline: Option<Instant>,
    ) -> Result<(usize, GainOutcome)> {
        loop {
            {
                let st: &mut QueueState = state;
                let mut i = 0;
                while i < st.ready.len() {
                    let index = st.ready[i];
                    let producer = match st.slots[index].producer.as_mut() {
                        Some(producer) => producer,
                        None => {
                            st.ready.remove(i);
                            continue;
                        }
                    };
                    match producer.gain() {
                        Ok(outcome) => {
                            st.ready.remove(i);
                            return Ok((index, outcome));
                        }
                        Err(e) if e.is_retryable() => i += 1,
                        Err(e) => return Err(e),
                    }
                }
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(HubError::no_memory("timed out waiting for a free buffer"));
                    }
                    (deadline - now).min(RELEASE_POLL_INTERVAL)
                }
                None => RELEASE_POLL_INTERVAL,
            };
            self.available.wait_for(state, wait);
            state.require_connected("dequeue")?;
        }
    }

    fn dequeue_locked(
        &self,
        state: &mut MutexGuard<'_, QueueState>,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u64,
        timeout: Option<Duration>,
        allow_allocation: bool,
    ) -> Result<DequeueOutput> {
        state.require_connected("dequeue")?;

        if allow_allocation && state.allocated() < state.max_dequeued + UNDEQUEUED_BUFFERS {
            self.allocate_buffer(state, width, height, format, usage)?;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut found = None;
        for _ in 0..self.config.capacity {
            let (index, gain) = self.pop_ready(state, deadline)?;
            let matches = state.slots[index]
                .descriptor()
                .map_or(false, |d| d.matches(width, height, format));
            if matches || !allow_allocation {
                found = Some((index, gain));
                break;
            }

            let slot = &mut state.slots[index];
            tracing::info!(
                "ProducerQueue::dequeue: requested {}x{} format={:#x} differs from slot {} ({:?}), reallocating",
                width,
                height,
                format.0,
                index,
                slot.descriptor().map(|d| (d.width, d.height, d.format.0))
            );
            let old = slot.unbind();
            slot.state = SlotState::Reallocating;
            slot.is_reallocating = true;
            drop(old);

            self.allocate_into(state, index, width, height, format, usage)?;
        }

        let (index, gain) = found.ok_or_else(|| {
            HubError::no_memory(format!(
                "no matching buffer after {} attempts",
                self.config.capacity
            ))
        })?;

        let slot = &mut state.slots[index];
        if !matches!(slot.state, SlotState::Free | SlotState::Queued) {
            tracing::error!(
                "ProducerQueue::dequeue: slot {} is not free or queued, actual state: {:?}",
                index,
                slot.state
            );
            return Err(HubError::invalid_state(format!(
                "slot {} popped in state {:?}",
                index, slot.state
            )));
        }

        slot.state = SlotState::Dequeued;
        let cancel_fence = std::mem::take(&mut slot.fence);
        let fence = if cancel_fence.is_valid() {
            cancel_fence
        } else {
            gain.release_fence
        };
        let needs_reallocation = std::mem::replace(&mut slot.is_reallocating, false);
        tracing::trace!("ProducerQueue::dequeue: slot={}", index);

        Ok(DequeueOutput {
            slot: index,
            fence,
            needs_reallocation,
        })
    }

    /// Dequeue a buffer of the given geometry, allocating or replacing one if needed.
    ///
    /// Zero width, height or format select the queue defaults. Blocks up to the
    /// configured dequeue timeout.
    pub fn dequeue(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u64,
    ) -> Result<DequeueOutput> {
        let mut state = self.state.lock();
        let timeout = state.dequeue_timeout;
        let (width, height, format, usage) = self.resolve(width, height, format, usage);
        self.dequeue_locked(&mut state, width, height, format, usage, timeout, true)
    }

    /// `dequeue` with an explicit timeout instead of the configured one.
    pub fn dequeue_with_timeout(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u64,
        timeout: Option<Duration>,
    ) -> Result<DequeueOutput> {
        let mut state = self.state.lock();
        let (width, height, format, usage) = self.resolve(width, height, format, usage);
        self.dequeue_locked(&mut state, width, height, format, usage, timeout, true)
    }

    fn resolve(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u64,
    ) -> (u32, u32, PixelFormat, u64) {
        let (width, height) = if width == 0 || height == 0 {
            (self.config.default_width, self.config.default_height)
        } else {
            (width, height)
        };
        let format = if format == PixelFormat::default() {
            self.config.default_format
        } else {
            format
        };
        (width, height, format, usage | self.config.default_usage)
    }

    // ---- per-slot operations ----

    /// Hand out the buffer of a dequeued slot. Once per binding: call again
    /// only after a dequeue reports `needs_reallocation`.
    pub fn request(&self, index: usize) -> Result<GraphicBuffer> {
        let mut state = self.state.lock();
        state.require_connected("request")?;
        let generation_number = state.generation_number;
        let slot = state.slot_mut(index, "request")?;

        if slot.state != SlotState::Dequeued {
            return Err(HubError::bad_value(format!(
                "request: slot {} is not owned by the producer (state = {:?})",
                index, slot.state
            )));
        }
        if slot.graphic_buffer.is_some() {
            return Err(HubError::bad_value(format!("request: slot {} is not empty", index)));
        }
        let node = match &slot.producer {
            Some(producer) => producer.node().clone(),
            None => {
                return Err(HubError::bad_value(format!(
                    "request: slot {} has no buffer",
                    index
                )))
            }
        };

        let buffer = GraphicBuffer::new(node, generation_number);
        slot.graphic_buffer = Some(buffer.clone());
        slot.request_called = true;
        Ok(buffer)
    }

    /// Post the slot's buffer to consumers.
    pub fn queue(
        &self,
        index: usize,
        input: &QueueBufferInput,
        fence: Fence,
    ) -> Result<QueueBufferOutput> {
        let mut state = self.state.lock();
        state.require_connected("queue")?;
        let slot = state.slot_mut(index, "queue")?;

        if slot.state != SlotState::Dequeued {
            return Err(HubError::bad_value(format!(
                "queue: slot {} is not owned by the producer (state = {:?})",
                index, slot.state
            )));
        }
        if !slot.request_called || slot.graphic_buffer.is_none() {
            return Err(HubError::bad_value(format!(
                "queue: slot {} was not requested",
                index
            )));
        }
        let producer = slot
            .producer
            .as_mut()
            .ok_or_else(|| HubError::invalid_state(format!("queue: slot {} is unbound", index)))?;

        let descriptor = *producer.node().descriptor();
        if !input.crop.fits_within(&descriptor.bounds()) {
            tracing::error!("queue: slot {} has out-of-boundary crop {:?}", index, input.crop);
            return Err(HubError::CropOutOfBounds {
                crop: input.crop,
                width: descriptor.width,
                height: descriptor.height,
            });
        }

        producer.post(&input.frame_metadata(), &input.user_metadata, fence)?;
        slot.state = SlotState::Queued;
        state.ready.push_back(index);
        self.available.notify_one();

        Ok(QueueBufferOutput {
            width: descriptor.width,
            height: descriptor.height,
            ..QueueBufferOutput::default()
        })
    }

    /// Return a dequeued buffer unused. `fence` comes back with the next dequeue.
    pub fn cancel(&self, index: usize, fence: Fence) -> Result<()> {
        let mut state = self.state.lock();
        state.require_connected("cancel")?;
        let slot = state.slot_mut(index, "cancel")?;

        if slot.state != SlotState::Dequeued {
            return Err(HubError::bad_value(format!(
                "cancel: slot {} is not owned by the producer (state = {:?})",
                index, slot.state
            )));
        }

        slot.state = SlotState::Free;
        slot.fence = fence;
        slot.clear_request();
        state.ready.push_back(index);
        self.available.notify_one();
        tracing::trace!("ProducerQueue::cancel: slot={}", index);
        Ok(())
    }

    /// Insert a detached buffer into a free slot; the slot comes back Dequeued.
    pub fn attach(&self, buffer: DetachedBuffer) -> Result<usize> {
        let mut state = self.state.lock();
        state.require_connected("attach")?;

        if buffer.generation_number() != state.generation_number {
            tracing::error!(
                "attach: mismatched generation number, buffer: {}, queue: {}",
                buffer.generation_number(),
                state.generation_number
            );
            return Err(HubError::GenerationMismatch {
                expected: state.generation_number,
                actual: buffer.generation_number(),
            });
        }

        let index = state
            .first_free_unbound()
            .ok_or_else(|| HubError::slot_capacity("attach: no free slot"))?;

        let generation_number = buffer.generation_number();
        let mut producer = buffer.into_producer();
        producer.gain()?;
        let node = producer.node().clone();
        node.set_queue_index(Some(index));

        let slot = &mut state.slots[index];
        slot.bind(producer);
        slot.state = SlotState::Dequeued;
        slot.graphic_buffer = Some(GraphicBuffer::new(node, generation_number));
        slot.request_called = true;
        slot.is_reallocating = false;
        Ok(index)
    }

    fn detach_locked(state: &mut QueueState, index: usize) -> Result<DetachedBuffer> {
        state.require_connected("detach")?;
        let generation_number = state.generation_number;
        let slot = state.slot_mut(index, "detach")?;

        if slot.state != SlotState::Dequeued {
            return Err(HubError::bad_value(format!(
                "detach: slot {} is not owned by the producer (state = {:?})",
                index, slot.state
            )));
        }
        if !slot.request_called {
            return Err(HubError::bad_value(format!(
                "detach: buffer in slot {} has not been requested",
                index
            )));
        }

        let producer = slot
            .unbind()
            .ok_or_else(|| HubError::bad_value(format!("detach: slot {} has no buffer", index)))?;
        slot.is_reallocating = false;
        state.ready.retain(|&i| i != index);
        Ok(DetachedBuffer::from_producer(producer, generation_number))
    }

    /// Remove a dequeued, requested buffer from the queue.
    pub fn detach(&self, index: usize) -> Result<DetachedBuffer> {
        let mut state = self.state.lock();
        Self::detach_locked(&mut state, index)
    }

    /// Dequeue whatever buffer is ready without blocking or allocating,
    /// then detach it.
    ///
    /// If the final detach fails the slot stays Dequeued and requested; the
    /// caller must cancel it.
    pub fn detach_next_buffer(&self) -> Result<(DetachedBuffer, Fence)> {
        let mut state = self.state.lock();
        state.require_connected("detach_next_buffer")?;

        let (width, height, format, usage) = self.resolve(0, 0, PixelFormat::default(), 0);
        let output = self.dequeue_locked(
            &mut state,
            width,
            height,
            format,
            usage,
            Some(Duration::ZERO),
            false,
        )?;

        let generation_number = state.generation_number;
        let slot = &mut state.slots[output.slot];
        let node = slot
            .producer
            .as_ref()
            .map(|p| p.node().clone())
            .ok_or_else(|| {
                HubError::bad_value(format!("detach_next_buffer: slot {} has no buffer", output.slot))
            })?;
        slot.graphic_buffer = Some(GraphicBuffer::new(node, generation_number));
        slot.request_called = true;

        let detached = Self::detach_locked(&mut state, output.slot)?;
        Ok((detached, output.fence))
    }

    // ---- settings ----

    pub fn set_max_dequeued_buffer_count(&self, count: usize) -> Result<()> {
        let mut state = self.state.lock();
        let limit = self.config.max_dequeued_limit();
        if count == 0 || count > limit {
            return Err(HubError::bad_value(format!(
                "max dequeued count {} out of range (0, {}]",
                count, limit
            )));
        }
        let dequeued = state.dequeued();
        if dequeued > count {
            return Err(HubError::bad_value(format!(
                "max dequeued count {} is below the {} buffers currently dequeued",
                count, dequeued
            )));
        }
        state.max_dequeued = count;
        Ok(())
    }

    /// `None` makes dequeue block until a buffer is available.
    pub fn set_dequeue_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().dequeue_timeout = timeout;
    }

    /// Generation number detached buffers must carry to be attached.
    pub fn set_generation_number(&self, generation_number: u32) {
        self.state.lock().generation_number = generation_number;
    }

    /// Shared buffer mode is not supported; only `false` is accepted.
    pub fn set_shared_buffer_mode(&self, enabled: bool) -> Result<()> {
        if enabled {
            return Err(HubError::bad_value("shared buffer mode is not supported"));
        }
        Ok(())
    }

    /// Auto refresh is not supported; only `false` is accepted.
    pub fn set_auto_refresh(&self, enabled: bool) -> Result<()> {
        if enabled {
            return Err(HubError::bad_value("auto refresh is not supported"));
        }
        Ok(())
    }

    // ---- getters ----

    pub fn generation_number(&self) -> u32 {
        self.state.lock().generation_number
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    /// Consumers are not known on the producer side.
    pub fn consumer_usage(&self) -> u64 {
        0
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Arc<dyn GraphicAllocator> {
        &self.allocator
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn max_dequeued_buffer_count(&self) -> usize {
        self.state.lock().max_dequeued
    }

    pub fn dequeue_timeout(&self) -> Option<Duration> {
        self.state.lock().dequeue_timeout
    }

    pub fn connected_api(&self) -> Option<ConnectApi> {
        self.state.lock().connected_api
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.state.lock().slots.get(index).map(|s| s.state)
    }

    pub fn is_slot_bound(&self, index: usize) -> bool {
        self.state
            .lock()
            .slots
            .get(index)
            .map_or(false, |s| s.is_bound())
    }

    /// Node bound to `index`, for inspection and for registering consumers.
    pub fn slot_node(&self, index: usize) -> Option<Arc<BufferNode>> {
        self.state
            .lock()
            .slots
            .get(index)
            .and_then(|s| s.producer.as_ref())
            .map(|p| p.node().clone())
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().allocated()
    }

    pub fn dequeued_count(&self) -> usize {
        self.state.lock().dequeued()
    }

    pub fn ready_count(&self) -> usize {
        self.state.lock().ready.len()
    }
}

impl std::fmt::Debug for ProducerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_producer_queue(self, f)
    }
}

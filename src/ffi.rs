use crate::error::HubError;
use crate::Core::SharedMemory::RawHandle;
use crate::Hub::Structs::Buffer_Structs::{Dataspace, Fence, PixelFormat, Rect, ScalingMode, Transform};
use crate::Queue::{ConnectApi, ProducerQueue, QueueBufferInput, QueueBuilder};
use std::ptr;

// Error codes
const BUFFERHUB_SUCCESS: i32 = 0;
const BUFFERHUB_ERROR_NULL_POINTER: i32 = -1;
const BUFFERHUB_ERROR_INVALID_ARG: i32 = -2;
const BUFFERHUB_ERROR_NO_MEMORY: i32 = -3;
const BUFFERHUB_ERROR_NO_INIT: i32 = -4;
const BUFFERHUB_ERROR_CAPACITY: i32 = -5;
const BUFFERHUB_ERROR_WOULD_BLOCK: i32 = -6;
const BUFFERHUB_ERROR_INTERNAL: i32 = -7;

/// Handle to a producer queue instance (opaque pointer)
pub struct QueueHandle {
    inner: ProducerQueue,
}

/// Per-frame parameters of `bufferhub_queue_queue`, laid out for C callers.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct BufferHubQueueInput {
    pub timestamp: i64,
    /// Non-zero for true.
    pub is_auto_timestamp: i32,
    pub dataspace: i32,
    pub crop_left: i32,
    pub crop_top: i32,
    pub crop_right: i32,
    pub crop_bottom: i32,
    pub scaling_mode: i32,
    pub transform: u32,
}

impl BufferHubQueueInput {
    /// Convert to the queue's input; fails on an unknown scaling mode.
    pub fn to_queue_input(&self) -> Result<QueueBufferInput, HubError> {
        Ok(QueueBufferInput {
            timestamp: self.timestamp,
            is_auto_timestamp: self.is_auto_timestamp != 0,
            dataspace: Dataspace(self.dataspace),
            crop: Rect::new(self.crop_left, self.crop_top, self.crop_right, self.crop_bottom),
            scaling_mode: ScalingMode::try_from(self.scaling_mode)?,
            transform: Transform(self.transform),
            user_metadata: Vec::new(),
        })
    }
}

fn error_code(error: &HubError) -> i32 {
    match error {
        HubError::NoInit => BUFFERHUB_ERROR_NO_INIT,
        HubError::NoMemory { .. } | HubError::Alloc { .. } => BUFFERHUB_ERROR_NO_MEMORY,
        HubError::ClientCapacity { .. } | HubError::SlotCapacity { .. } => BUFFERHUB_ERROR_CAPACITY,
        HubError::NotReleased { .. } | HubError::NotPosted { .. } => BUFFERHUB_ERROR_WOULD_BLOCK,
        HubError::BadValue { .. }
        | HubError::CropOutOfBounds { .. }
        | HubError::GenerationMismatch { .. }
        | HubError::WrongRole { .. }
        | HubError::ProducerExists { .. }
        | HubError::NotGained { .. } => BUFFERHUB_ERROR_INVALID_ARG,
        HubError::InvalidState { .. } | HubError::Import { .. } | HubError::Io(_) => {
            BUFFERHUB_ERROR_INTERNAL
        }
    }
}

fn fence_from_fd(fd: i32) -> Fence {
    if fd < 0 {
        Fence::NoFence
    } else {
        Fence::Sync(RawHandle::Fd(fd))
    }
}

fn fence_to_fd(fence: Fence) -> i32 {
    match fence {
        Fence::Sync(RawHandle::Fd(fd)) => fd,
        Fence::NoFence => -1,
    }
}

fn slot_index(slot: i32) -> Result<usize, i32> {
    usize::try_from(slot).map_err(|_| BUFFERHUB_ERROR_INVALID_ARG)
}

// -----------------------------------------------------------------------------
// Queue lifecycle
// -----------------------------------------------------------------------------

/// Create a new, disconnected producer queue.
///
/// # Arguments
/// * `width`, `height`, `format` - Default buffer geometry.
/// * `capacity` - Number of slots (at most 64).
/// * `max_dequeued` - Buffers the producer may hold at once.
///
/// # Returns
/// * Pointer to `QueueHandle`, or NULL on failure.
#[no_mangle]
pub extern "C" fn bufferhub_queue_new(
    width: u32,
    height: u32,
    format: u32,
    capacity: u32,
    max_dequeued: u32,
) -> *mut QueueHandle {
    match QueueBuilder::new()
        .with_default_size(width, height)
        .with_default_format(PixelFormat(format))
        .with_capacity(capacity as usize)
        .with_max_dequeued_buffer_count(max_dequeued as usize)
        .build()
    {
        Ok(queue) => Box::into_raw(Box::new(QueueHandle { inner: queue })),
        Err(e) => {
            tracing::error!("bufferhub_queue_new: failed to build queue: {}", e);
            ptr::null_mut()
        }
    }
}

/// Free a queue handle, releasing every buffer it holds.
#[no_mangle]
pub extern "C" fn bufferhub_queue_free(handle: *mut QueueHandle) {
    if !handle.is_null() {
        unsafe {
            let _ = Box::from_raw(handle); // Dropped automatically
        }
    }
}

/// Connect a producer api (1 = EGL, 2 = CPU, 3 = media, 4 = camera).
#[no_mangle]
pub extern "C" fn bufferhub_queue_connect(handle: *mut QueueHandle, api: i32) -> i32 {
    if handle.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };

    match ConnectApi::try_from(api).and_then(|api| queue.connect(api)) {
        Ok(_) => BUFFERHUB_SUCCESS,
        Err(e) => error_code(&e),
    }
}

/// Disconnect the connected api and free all buffers.
#[no_mangle]
pub extern "C" fn bufferhub_queue_disconnect(handle: *mut QueueHandle, api: i32) -> i32 {
    if handle.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };

    match ConnectApi::try_from(api).and_then(|api| queue.disconnect(api)) {
        Ok(()) => BUFFERHUB_SUCCESS,
        Err(e) => error_code(&e),
    }
}

// -----------------------------------------------------------------------------
// Slot operations
// -----------------------------------------------------------------------------

/// Dequeue a buffer.
///
/// # Arguments
/// * `out_slot` - Receives the slot index.
/// * `out_fence_fd` - Receives the fence to wait on, -1 for none. May be NULL.
/// * `out_needs_reallocation` - Set when the slot's buffer changed. May be NULL.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn bufferhub_queue_dequeue(
    handle: *mut QueueHandle,
    width: u32,
    height: u32,
    format: u32,
    usage: u64,
    out_slot: *mut i32,
    out_fence_fd: *mut i32,
    out_needs_reallocation: *mut bool,
) -> i32 {
    if handle.is_null() || out_slot.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };

    match queue.dequeue(width, height, PixelFormat(format), usage) {
        Ok(output) => unsafe {
            *out_slot = output.slot as i32;
            if !out_fence_fd.is_null() {
                *out_fence_fd = fence_to_fd(output.fence);
            }
            if !out_needs_reallocation.is_null() {
                *out_needs_reallocation = output.needs_reallocation;
            }
            BUFFERHUB_SUCCESS
        },
        Err(e) => error_code(&e),
    }
}

/// Request the buffer of a dequeued slot; writes its buffer id.
#[no_mangle]
pub extern "C" fn bufferhub_queue_request(
    handle: *mut QueueHandle,
    slot: i32,
    out_buffer_id: *mut u32,
) -> i32 {
    if handle.is_null() || out_buffer_id.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };
    let slot = match slot_index(slot) {
        Ok(slot) => slot,
        Err(code) => return code,
    };

    match queue.request(slot) {
        Ok(buffer) => {
            unsafe { *out_buffer_id = buffer.id() };
            BUFFERHUB_SUCCESS
        }
        Err(e) => error_code(&e),
    }
}

/// Queue a dequeued, requested slot.
#[no_mangle]
pub extern "C" fn bufferhub_queue_queue(
    handle: *mut QueueHandle,
    slot: i32,
    input: *const BufferHubQueueInput,
    fence_fd: i32,
) -> i32 {
    if handle.is_null() || input.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };
    let raw = unsafe { *input };
    let slot = match slot_index(slot) {
        Ok(slot) => slot,
        Err(code) => return code,
    };

    let input = match raw.to_queue_input() {
        Ok(input) => input,
        Err(e) => {
            tracing::error!("bufferhub_queue_queue: {}", e);
            return error_code(&e);
        }
    };

    match queue.queue(slot, &input, fence_from_fd(fence_fd)) {
        Ok(_) => BUFFERHUB_SUCCESS,
        Err(e) => error_code(&e),
    }
}

/// Cancel a dequeued slot; `fence_fd` (-1 for none) is returned by its next dequeue.
#[no_mangle]
pub extern "C" fn bufferhub_queue_cancel(handle: *mut QueueHandle, slot: i32, fence_fd: i32) -> i32 {
    if handle.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };
    let slot = match slot_index(slot) {
        Ok(slot) => slot,
        Err(code) => return code,
    };

    match queue.cancel(slot, fence_from_fd(fence_fd)) {
        Ok(()) => BUFFERHUB_SUCCESS,
        Err(e) => error_code(&e),
    }
}

/// Read a queue property (native window query keys).
#[no_mangle]
pub extern "C" fn bufferhub_queue_query(handle: *mut QueueHandle, key: i32, out_value: *mut i32) -> i32 {
    if handle.is_null() || out_value.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };

    match queue.query_raw(key) {
        Ok(value) => {
            unsafe { *out_value = value };
            BUFFERHUB_SUCCESS
        }
        Err(e) => error_code(&e),
    }
}

/// Change how many buffers the producer may hold at once.
#[no_mangle]
pub extern "C" fn bufferhub_queue_set_max_dequeued(handle: *mut QueueHandle, count: u32) -> i32 {
    if handle.is_null() {
        return BUFFERHUB_ERROR_NULL_POINTER;
    }
    let queue = unsafe { &(*handle).inner };

    match queue.set_max_dequeued_buffer_count(count as usize) {
        Ok(()) => BUFFERHUB_SUCCESS,
        Err(e) => error_code(&e),
    }
}

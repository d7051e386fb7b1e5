// Producer queue adapter tests: slot state machine, lazy allocation,
// reallocation, attach/detach and the supplemented settings surface.

use bufferhub::Core::alloc::{GraphicAllocator, SharedMemoryAllocator};
use bufferhub::Core::RawHandle;
use bufferhub::{
    BufferDescriptor, ClientHandle, ConnectApi, DetachedBuffer, ErrorKind, Fence, HubError,
    PixelFormat, ProducerQueue, QueryKey, QueueBufferInput, QueueBuilder, Rect, SlotState,
};
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const FORMAT: PixelFormat = PixelFormat::RGBA_8888;

fn build_queue(capacity: usize, max_dequeued: usize) -> bufferhub::Result<ProducerQueue> {
    QueueBuilder::new()
        .with_default_size(50, 50)
        .with_default_format(FORMAT)
        .with_capacity(capacity)
        .with_max_dequeued_buffer_count(max_dequeued)
        .with_user_metadata_size(16)
        .with_region_prefix("bufferhub-test-queue")
        .build()
}

fn connected_queue(capacity: usize, max_dequeued: usize) -> bufferhub::Result<ProducerQueue> {
    let queue = build_queue(capacity, max_dequeued)?;
    queue.connect(ConnectApi::Cpu)?;
    Ok(queue)
}

#[test]
#[serial]
fn test_operations_require_connection() -> bufferhub::Result<()> {
    let queue = build_queue(4, 1)?;
    assert!(matches!(
        queue.dequeue(50, 50, FORMAT, 0),
        Err(HubError::NoInit)
    ));
    assert!(matches!(queue.request(0), Err(HubError::NoInit)));
    assert!(matches!(queue.cancel(0, Fence::NoFence), Err(HubError::NoInit)));
    assert!(matches!(queue.detach(0), Err(HubError::NoInit)));
    assert!(matches!(queue.detach_next_buffer(), Err(HubError::NoInit)));
    assert!(matches!(
        queue.disconnect(ConnectApi::Cpu),
        Err(HubError::NoInit)
    ));
    Ok(())
}

#[test]
#[serial]
fn test_connect_rules() -> bufferhub::Result<()> {
    let queue = build_queue(4, 1)?;
    let output = queue.connect(ConnectApi::Egl)?;
    assert_eq!((output.width, output.height), (50, 50));
    assert_eq!(output.num_pending_buffers, 0);

    assert!(matches!(
        queue.connect(ConnectApi::Cpu),
        Err(HubError::BadValue { .. })
    ));
    assert!(matches!(
        queue.disconnect(ConnectApi::Media),
        Err(HubError::BadValue { .. })
    ));
    queue.disconnect(ConnectApi::Egl)?;
    assert_eq!(queue.connected_api(), None);
    Ok(())
}

#[test]
#[serial]
fn test_lazy_allocation() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    assert_eq!(queue.allocated_count(), 0);

    let first = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!(first.slot, 0);
    assert!(!first.needs_reallocation);
    assert_eq!(queue.allocated_count(), 1);
    assert_eq!(queue.slot_state(0), Some(SlotState::Dequeued));

    // Grows while below max dequeued + undequeued
    let second = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!(second.slot, 1);
    assert_eq!(queue.allocated_count(), 2);

    // Then stops growing and recycles
    queue.cancel(first.slot, Fence::NoFence)?;
    let third = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!(third.slot, first.slot);
    assert_eq!(queue.allocated_count(), 2);
    Ok(())
}

#[test]
#[serial]
fn test_zero_geometry_uses_defaults() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    let output = queue.dequeue(0, 0, PixelFormat::default(), 0)?;
    let buffer = queue.request(output.slot)?;
    assert_eq!((buffer.width(), buffer.height()), (50, 50));
    assert_eq!(buffer.format(), FORMAT);
    Ok(())
}

#[test]
#[serial]
fn test_dequeue_reallocates_mismatched_buffer() -> bufferhub::Result<()> {
    let queue = connected_queue(2, 1)?;

    // Two 50x50 buffers, both dequeued; only slot 0 goes back
    let a = queue.dequeue(50, 50, FORMAT, 0)?;
    let b = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!((a.slot, b.slot), (0, 1));
    let old_id = queue.request(a.slot)?.id();
    queue.cancel(a.slot, Fence::NoFence)?;

    let realloc = queue.dequeue(100, 100, FORMAT, 0)?;
    assert_eq!(realloc.slot, a.slot);
    assert!(realloc.needs_reallocation);
    assert_eq!(queue.allocated_count(), 2);

    let buffer = queue.request(realloc.slot)?;
    assert_eq!((buffer.width(), buffer.height()), (100, 100));
    assert_eq!(buffer.format(), FORMAT);
    assert_ne!(buffer.id(), old_id);

    // Reported once only
    queue.cancel(realloc.slot, Fence::NoFence)?;
    let again = queue.dequeue(100, 100, FORMAT, 0)?;
    assert_eq!(again.slot, realloc.slot);
    assert!(!again.needs_reallocation);
    Ok(())
}

#[test]
#[serial]
fn test_request_rules() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    assert!(matches!(queue.request(0), Err(HubError::BadValue { .. })));
    assert!(matches!(queue.request(64), Err(HubError::BadValue { .. })));

    let output = queue.dequeue(50, 50, FORMAT, 0)?;
    let buffer = queue.request(output.slot)?;
    assert_eq!(buffer.node().queue_index(), Some(output.slot));

    // Already handed out for this binding
    assert!(matches!(
        queue.request(output.slot),
        Err(HubError::BadValue { .. })
    ));
    Ok(())
}

#[test]
#[serial]
fn test_queue_then_consumer_acquires() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    let output = queue.dequeue(50, 50, FORMAT, 0)?;
    queue.request(output.slot)?;

    let node = queue.slot_node(output.slot).expect("bound slot");
    let mut consumer = ClientHandle::consumer(node)?;

    let input = QueueBufferInput::new(777)
        .with_crop(Rect::new(0, 0, 25, 25))
        .with_user_metadata(b"meta".to_vec());
    let fence = Fence::Sync(RawHandle::Fd(11));
    let result = queue.queue(output.slot, &input, fence)?;
    assert_eq!((result.width, result.height), (50, 50));
    assert_eq!(result.transform_hint, 0);
    assert_eq!(result.next_frame_number, 0);
    assert_eq!(queue.slot_state(output.slot), Some(SlotState::Queued));

    let frame = consumer.acquire()?;
    assert_eq!(frame.metadata.timestamp, 777);
    assert_eq!(frame.metadata.crop(), Rect::new(0, 0, 25, 25));
    assert_eq!(frame.user_metadata, b"meta".to_vec());
    assert_eq!(frame.fence, fence);
    consumer.release(Fence::NoFence)?;
    Ok(())
}

#[test]
#[serial]
fn test_queue_rejects_out_of_bounds_crop() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    let output = queue.dequeue(50, 50, FORMAT, 0)?;
    queue.request(output.slot)?;
    let node = queue.slot_node(output.slot).expect("bound slot");
    let state_before = node.buffer_state();
    let generation_before = node.generation();

    let input = QueueBufferInput::new(1).with_crop(Rect::new(10, 10, 51, 40));
    let err = queue.queue(output.slot, &input, Fence::NoFence).unwrap_err();
    assert!(matches!(
        err,
        HubError::CropOutOfBounds {
            width: 50,
            height: 50,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Protocol);

    // No transition happened
    assert_eq!(node.buffer_state(), state_before);
    assert_eq!(node.generation(), generation_before);
    assert_eq!(queue.slot_state(output.slot), Some(SlotState::Dequeued));

    // An empty crop means the whole buffer
    queue.queue(output.slot, &QueueBufferInput::new(2), Fence::NoFence)?;
    Ok(())
}

#[test]
#[serial]
fn test_queue_rejects_inverted_crop_outside_buffer() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    let output = queue.dequeue(50, 50, FORMAT, 0)?;
    queue.request(output.slot)?;
    let node = queue.slot_node(output.slot).expect("bound slot");
    let state_before = node.buffer_state();
    let generation_before = node.generation();

    // Empty because right < left, but not the whole-buffer marker
    let crop = Rect::new(200, 200, 100, 100);
    assert!(crop.is_empty());
    let input = QueueBufferInput::new(1).with_crop(crop);
    let err = queue.queue(output.slot, &input, Fence::NoFence).unwrap_err();
    assert!(matches!(
        err,
        HubError::CropOutOfBounds {
            width: 50,
            height: 50,
            ..
        }
    ));

    assert_eq!(node.buffer_state(), state_before);
    assert_eq!(node.generation(), generation_before);
    assert!(!node.is_posted());
    assert_eq!(queue.slot_state(output.slot), Some(SlotState::Dequeued));

    // Rect::EMPTY still selects the whole buffer
    let input = QueueBufferInput::new(2).with_crop(Rect::EMPTY);
    queue.queue(output.slot, &input, Fence::NoFence)?;
    assert_eq!(queue.slot_state(output.slot), Some(SlotState::Queued));
    Ok(())
}

#[test]
#[serial]
fn test_queue_requires_dequeued_and_requested() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    let input = QueueBufferInput::new(0);

    let output = queue.dequeue(50, 50, FORMAT, 0)?;
    assert!(matches!(
        queue.queue(output.slot, &input, Fence::NoFence),
        Err(HubError::BadValue { .. })
    ));

    queue.request(output.slot)?;
    queue.queue(output.slot, &input, Fence::NoFence)?;
    assert!(matches!(
        queue.queue(output.slot, &input, Fence::NoFence),
        Err(HubError::BadValue { .. })
    ));
    assert!(matches!(
        queue.cancel(output.slot, Fence::NoFence),
        Err(HubError::BadValue { .. })
    ));
    Ok(())
}

#[test]
#[serial]
fn test_cancel_fence_returned_on_next_dequeue() -> bufferhub::Result<()> {
    let queue = connected_queue(2, 1)?;
    let a = queue.dequeue(50, 50, FORMAT, 0)?;
    let _b = queue.dequeue(50, 50, FORMAT, 0)?;
    queue.request(a.slot)?;

    let fence = Fence::Sync(RawHandle::Fd(33));
    queue.cancel(a.slot, fence)?;
    assert_eq!(queue.slot_state(a.slot), Some(SlotState::Free));

    let next = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!(next.slot, a.slot);
    assert_eq!(next.fence, fence);

    // Cancel cleared the request state
    queue.request(next.slot)?;
    Ok(())
}

#[test]
#[serial]
fn test_queued_buffer_reused_after_cycle() -> bufferhub::Result<()> {
    let queue = connected_queue(2, 1)?;
    let a = queue.dequeue(50, 50, FORMAT, 0)?;
    let b = queue.dequeue(50, 50, FORMAT, 0)?;
    queue.request(a.slot)?;
    queue.queue(a.slot, &QueueBufferInput::new(1), Fence::NoFence)?;

    // Nobody acquired it, so the producer can gain it straight back
    let next = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!(next.slot, a.slot);

    // The request from the previous cycle still stands
    queue.queue(next.slot, &QueueBufferInput::new(2), Fence::NoFence)?;
    queue.cancel(b.slot, Fence::NoFence)?;
    Ok(())
}

#[test]
#[serial]
fn test_dequeue_times_out_when_exhausted() -> bufferhub::Result<()> {
    let queue = connected_queue(2, 1)?;
    queue.dequeue(50, 50, FORMAT, 0)?;
    queue.dequeue(50, 50, FORMAT, 0)?;

    let err = queue
        .dequeue_with_timeout(50, 50, FORMAT, 0, Some(Duration::from_millis(10)))
        .unwrap_err();
    assert!(matches!(err, HubError::NoMemory { .. }));
    assert!(err.is_retryable());
    assert_eq!(queue.allocated_count(), 2);
    Ok(())
}

#[test]
#[serial]
fn test_dequeue_skips_buffer_held_by_consumer() -> bufferhub::Result<()> {
    let queue = Arc::new(connected_queue(2, 1)?);
    let a = queue.dequeue(50, 50, FORMAT, 0)?;
    queue.request(a.slot)?;
    let mut consumer = ClientHandle::consumer(queue.slot_node(a.slot).expect("bound"))?;
    queue.queue(a.slot, &QueueBufferInput::new(1), Fence::NoFence)?;
    consumer.acquire()?;

    // Slot 0 is held, a second buffer is allocated instead
    let b = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!(b.slot, 1);

    // Nothing left: the wait ends when the consumer releases
    let waiter = {
        let queue = queue.clone();
        thread::spawn(move || {
            queue.dequeue_with_timeout(50, 50, FORMAT, 0, Some(Duration::from_secs(5)))
        })
    };
    thread::sleep(Duration::from_millis(20));
    consumer.release(Fence::NoFence)?;

    let c = waiter.join().unwrap()?;
    assert_eq!(c.slot, a.slot);
    Ok(())
}

#[test]
#[serial]
fn test_detach_requires_request() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    let output = queue.dequeue(50, 50, FORMAT, 0)?;

    let err = queue.detach(output.slot).unwrap_err();
    assert!(matches!(err, HubError::BadValue { .. }));
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(queue.slot_state(output.slot), Some(SlotState::Dequeued));

    let buffer = queue.request(output.slot)?;
    let detached = queue.detach(output.slot)?;
    assert_eq!(detached.id(), buffer.id());
    assert_eq!(queue.slot_state(output.slot), Some(SlotState::Free));
    assert!(!queue.is_slot_bound(output.slot));
    assert_eq!(queue.allocated_count(), 0);

    // Still gained by its producer while in transit
    assert_eq!(
        detached.node().buffer_state(),
        detached.producer().client_bit()
    );
    assert_eq!(detached.node().queue_index(), None);

    // The freed index is usable again
    let next = queue.dequeue(50, 50, FORMAT, 0)?;
    assert_eq!(next.slot, output.slot);
    Ok(())
}

#[test]
#[serial]
fn test_attach_detached_buffer() -> bufferhub::Result<()> {
    let source = connected_queue(4, 1)?;
    let target = connected_queue(4, 1)?;

    let output = source.dequeue(50, 50, FORMAT, 0)?;
    source.request(output.slot)?;
    let detached = source.detach(output.slot)?;
    let id = detached.id();

    let slot = target.attach(detached)?;
    assert_eq!(target.slot_state(slot), Some(SlotState::Dequeued));
    assert_eq!(target.slot_node(slot).map(|n| n.id()), Some(id));
    assert_eq!(target.slot_node(slot).and_then(|n| n.queue_index()), Some(slot));

    // Attached slots count as requested
    target.queue(slot, &QueueBufferInput::new(5), Fence::NoFence)?;
    Ok(())
}

#[test]
#[serial]
fn test_attach_checks_generation_number() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    queue.set_generation_number(3);
    assert_eq!(queue.generation_number(), 3);

    let allocator: Arc<dyn GraphicAllocator> =
        Arc::new(SharedMemoryAllocator::with_prefix("bufferhub-test-queue"));
    let descriptor = BufferDescriptor::new(50, 50, 1, FORMAT, 0);

    let stale = DetachedBuffer::allocate(&descriptor, allocator.clone())?;
    let err = queue.attach(stale).unwrap_err();
    assert!(matches!(
        err,
        HubError::GenerationMismatch {
            expected: 3,
            actual: 0
        }
    ));

    let fresh = DetachedBuffer::allocate(&descriptor, allocator)?.with_generation_number(3);
    let slot = queue.attach(fresh)?;
    // Attach leaves the slot requested
    assert!(queue.request(slot).is_err());
    Ok(())
}

#[test]
#[serial]
fn test_attach_without_free_slot() -> bufferhub::Result<()> {
    let queue = connected_queue(2, 1)?;
    queue.dequeue(50, 50, FORMAT, 0)?;
    queue.dequeue(50, 50, FORMAT, 0)?;

    let allocator: Arc<dyn GraphicAllocator> =
        Arc::new(SharedMemoryAllocator::with_prefix("bufferhub-test-queue"));
    let descriptor = BufferDescriptor::new(50, 50, 1, FORMAT, 0);
    let buffer = DetachedBuffer::allocate(&descriptor, allocator)?;

    let err = queue.attach(buffer).unwrap_err();
    assert!(matches!(err, HubError::SlotCapacity { .. }));
    assert_eq!(err.kind(), ErrorKind::Capacity);
    Ok(())
}

#[test]
#[serial]
fn test_detach_next_buffer() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;

    // Nothing ready and no allocation: fails immediately
    assert!(matches!(
        queue.detach_next_buffer(),
        Err(HubError::NoMemory { .. })
    ));

    let output = queue.dequeue(50, 50, FORMAT, 0)?;
    let fence = Fence::Sync(RawHandle::Fd(21));
    queue.cancel(output.slot, fence)?;

    let (detached, returned) = queue.detach_next_buffer()?;
    assert_eq!(returned, fence);
    assert_eq!(detached.generation_number(), queue.generation_number());
    assert!(!queue.is_slot_bound(output.slot));
    assert_eq!(queue.slot_state(output.slot), Some(SlotState::Free));
    Ok(())
}

#[test]
#[serial]
fn test_set_max_dequeued_buffer_count() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 1)?;
    assert!(matches!(
        queue.set_max_dequeued_buffer_count(0),
        Err(HubError::BadValue { .. })
    ));
    assert!(matches!(
        queue.set_max_dequeued_buffer_count(4),
        Err(HubError::BadValue { .. })
    ));
    queue.set_max_dequeued_buffer_count(3)?;
    assert_eq!(queue.max_dequeued_buffer_count(), 3);

    queue.dequeue(50, 50, FORMAT, 0)?;
    queue.dequeue(50, 50, FORMAT, 0)?;
    assert!(matches!(
        queue.set_max_dequeued_buffer_count(1),
        Err(HubError::BadValue { .. })
    ));
    queue.set_max_dequeued_buffer_count(2)?;
    Ok(())
}

#[test]
#[serial]
fn test_builder_validates_config() {
    assert!(build_queue(65, 1).is_err());
    assert!(build_queue(1, 1).is_err());
    assert!(build_queue(4, 0).is_err());
    assert!(build_queue(4, 4).is_err());
}

#[test]
#[serial]
fn test_query_values() -> bufferhub::Result<()> {
    let queue = build_queue(4, 1)?;
    assert_eq!(queue.query(QueryKey::MinUndequeuedBuffers), 1);
    assert_eq!(queue.query(QueryKey::BufferAge), 0);
    assert_eq!(queue.query(QueryKey::Width), 50);
    assert_eq!(queue.query(QueryKey::Height), 50);
    assert_eq!(queue.query(QueryKey::Format), FORMAT.0 as i32);
    assert_eq!(queue.query(QueryKey::ConsumerRunningBehind), 0);
    assert_eq!(queue.query(QueryKey::ConsumerUsageBits), 0);
    assert_eq!(queue.query(QueryKey::DefaultDataspace), 0);
    assert_eq!(queue.query(QueryKey::StickyTransform), 0);
    assert_eq!(queue.query(QueryKey::ConsumerIsProtected), 1);

    assert_eq!(queue.query_raw(3)?, 1);
    assert!(matches!(queue.query_raw(999), Err(HubError::BadValue { .. })));
    assert_eq!(queue.consumer_usage(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_unique_ids_differ() -> bufferhub::Result<()> {
    let a = build_queue(4, 1)?;
    let b = build_queue(4, 1)?;
    assert_ne!(a.unique_id(), b.unique_id());
    Ok(())
}

#[test]
#[serial]
fn test_unsupported_modes() -> bufferhub::Result<()> {
    let queue = build_queue(4, 1)?;
    queue.set_shared_buffer_mode(false)?;
    queue.set_auto_refresh(false)?;
    assert!(queue.set_shared_buffer_mode(true).is_err());
    assert!(queue.set_auto_refresh(true).is_err());
    Ok(())
}

#[test]
#[serial]
fn test_disconnect_frees_buffers() -> bufferhub::Result<()> {
    let queue = connected_queue(4, 2)?;
    let a = queue.dequeue(50, 50, FORMAT, 0)?;
    queue.dequeue(50, 50, FORMAT, 0)?;
    let region = queue.slot_node(a.slot).expect("bound").export().region;
    assert_eq!(queue.allocated_count(), 2);

    queue.disconnect(ConnectApi::Cpu)?;
    assert_eq!(queue.allocated_count(), 0);
    assert_eq!(queue.ready_count(), 0);
    assert!((0..4).all(|i| queue.slot_state(i) == Some(SlotState::Free)));
    assert!(!std::path::Path::new("/dev/shm").join(region).exists());

    assert!(matches!(
        queue.dequeue(50, 50, FORMAT, 0),
        Err(HubError::NoInit)
    ));
    queue.connect(ConnectApi::Cpu)?;
    assert_eq!(queue.dequeue(50, 50, FORMAT, 0)?.slot, 0);
    Ok(())
}

// Client registry tests: bit allocation on a single BufferNode.

use bufferhub::Core::alloc::{GraphicAllocator, SharedMemoryAllocator};
use bufferhub::{BufferDescriptor, BufferNode, ClientHandle, ErrorKind, HubError, PixelFormat};
use serial_test::serial;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn new_node() -> Arc<BufferNode> {
    let allocator: Arc<dyn GraphicAllocator> =
        Arc::new(SharedMemoryAllocator::with_prefix("bufferhub-test-registry"));
    let descriptor = BufferDescriptor::new(16, 16, 1, PixelFormat::RGBA_8888, 0);
    BufferNode::allocate(&descriptor, allocator).unwrap()
}

#[test]
#[serial]
fn test_sixty_four_clients_then_capacity_error() {
    let node = new_node();
    let mut bits = Vec::new();
    for _ in 0..64 {
        let bit = node.acquire_bit().unwrap();
        assert_eq!(bit.count_ones(), 1);
        bits.push(bit);
    }
    assert_eq!(node.active_clients_mask(), u64::MAX);

    let err = node.acquire_bit().unwrap_err();
    assert!(matches!(err, HubError::ClientCapacity { max: 64, .. }));
    assert_eq!(err.kind(), ErrorKind::Capacity);
    assert!(err.is_retryable());
    assert_eq!(node.active_clients_mask().count_ones(), 64);

    for bit in bits {
        node.release_bit(bit);
    }
    assert_eq!(node.active_clients_mask(), 0);
}

#[test]
#[serial]
fn test_lowest_free_bit_is_reused() {
    let node = new_node();
    let a = node.acquire_bit().unwrap();
    let b = node.acquire_bit().unwrap();
    let c = node.acquire_bit().unwrap();
    assert_eq!((a, b, c), (1, 2, 4));

    node.release_bit(b);
    assert_eq!(node.acquire_bit().unwrap(), 2);

    for bit in [a, b, c] {
        node.release_bit(bit);
    }
}

#[test]
#[serial]
fn test_double_release_is_single_release() {
    let node = new_node();
    let a = node.acquire_bit().unwrap();
    let b = node.acquire_bit().unwrap();

    node.release_bit(a);
    let after_first = node.active_clients_mask();
    node.release_bit(a);
    assert_eq!(node.active_clients_mask(), after_first);
    assert_eq!(after_first, b);

    node.release_bit(b);
}

#[test]
#[serial]
fn test_random_sequences_never_share_a_bit() {
    let node = new_node();
    let mut rng = fastrand::Rng::with_seed(0x5EED);
    let mut live: Vec<u64> = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || (live.len() < 64 && rng.bool()) {
            let bit = node.acquire_bit().unwrap();
            assert!(!live.contains(&bit), "bit {:#x} handed out while live", bit);
            live.push(bit);
        } else {
            let bit = live.swap_remove(rng.usize(..live.len()));
            node.release_bit(bit);
        }
        let expected = live.iter().fold(0, |mask, bit| mask | bit);
        assert_eq!(node.active_clients_mask(), expected);
    }

    for bit in live {
        node.release_bit(bit);
    }
}

#[test]
#[serial]
fn test_concurrent_acquire_hands_out_distinct_bits() {
    let node = new_node();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let node = node.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..8).map(|_| node.acquire_bit().unwrap()).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for bit in handle.join().unwrap() {
            assert!(seen.insert(bit));
        }
    }
    assert_eq!(seen.len(), 64);
    assert_eq!(node.active_clients_mask(), u64::MAX);

    for bit in seen {
        node.release_bit(bit);
    }
}

#[test]
#[serial]
fn test_single_producer_per_node() {
    let node = new_node();
    let producer = ClientHandle::producer(node.clone()).unwrap();
    assert_eq!(node.producer_mask(), producer.client_bit());

    let err = ClientHandle::producer(node.clone()).unwrap_err();
    assert!(matches!(err, HubError::ProducerExists { .. }));
    // The failed registration gave its bit back
    assert_eq!(node.active_clients_mask(), producer.client_bit());

    drop(producer);
    assert_eq!(node.producer_mask(), 0);
    assert_eq!(node.active_clients_mask(), 0);

    let again = ClientHandle::producer(node.clone()).unwrap();
    assert_eq!(node.producer_mask(), again.client_bit());
}

#[test]
#[serial]
fn test_client_handles_share_the_registry() {
    let node = new_node();
    let producer = ClientHandle::producer(node.clone()).unwrap();
    let consumers: Vec<_> = (0..63)
        .map(|_| ClientHandle::consumer(node.clone()).unwrap())
        .collect();
    assert_eq!(node.active_clients_mask(), u64::MAX);

    let err = ClientHandle::consumer(node.clone()).unwrap_err();
    assert!(matches!(err, HubError::ClientCapacity { .. }));

    drop(consumers);
    assert_eq!(node.active_clients_mask(), producer.client_bit());
}

use crate::error::{HubError, Result};
use crate::Core::SharedMemory::{
    attach_shared_memory, create_shared_memory, unique_region_name, unlink_shared_memory,
    SharedMemoryBackend,
};
use crate::Hub::Structs::Buffer_Structs::BufferDescriptor;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
mod debug;
mod getters;
mod ids;

pub use ids::{BufferIdGenerator, INVALID_BUFFER_ID};

/// Fresh ids tried when a region name is still taken by a buffer freed here.
const MAX_NAME_RETRIES: usize = 8;

// Use parking_lot's Mutex for better performance
use parking_lot::Mutex;

/// Opaque, duplicable reference to a block of graphics memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferHandle {
    id: u32,
    region: String,
    descriptor: BufferDescriptor,
}

impl BufferHandle {
    pub fn new(id: u32, region: impl Into<String>, descriptor: BufferDescriptor) -> Self {
        Self {
            id,
            region: region.into(),
            descriptor,
        }
    }

    /// Buffer id, unique among live buffers of the allocating process.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Name of the backing memory object, the cross-process capability.
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }
}

/// Source of graphics memory. The hub never looks inside the memory itself.
pub trait GraphicAllocator: Send + Sync + std::fmt::Debug {
    /// Allocate memory for `descriptor`; the returned handle carries the final stride.
    fn allocate(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle>;

    /// Make a handle received from another process usable locally.
    fn import(&self, handle: &BufferHandle) -> Result<BufferHandle>;

    /// Drop this process' mapping of the memory. The memory stays available to
    /// other processes that imported it. Unknown handles are ignored.
    fn free(&self, handle: &BufferHandle);

    /// Free the local mapping and remove the memory's name so nothing can
    /// import it again. Called by the last client of a buffer, in any process.
    fn destroy(&self, handle: &BufferHandle);
}

/// Graphics memory backed by named shared memory regions.
pub struct SharedMemoryAllocator {
    prefix: String,
    /// `<prefix>-<pid>-<seq>`, unique per allocator instance.
    base_name: String,
    ids: BufferIdGenerator,
    /// Live mappings keyed by region name; `true` marks regions created here.
    regions: Mutex<HashMap<String, (Box<dyn SharedMemoryBackend>, bool)>>,
    allocation_count: AtomicU64,
}

impl SharedMemoryAllocator {
    pub fn new() -> Self {
        Self::with_prefix("bufferhub")
    }

    /// Region names become `<prefix>-<pid>-<seq>-gfx-<id>`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            base_name: unique_region_name(&prefix),
            prefix,
            ids: BufferIdGenerator::new(),
            regions: Mutex::new(HashMap::new()),
            allocation_count: AtomicU64::new(0),
        }
    }

    fn region_name(&self, id: u32) -> String {
        format!("{}-gfx-{}", self.base_name, id)
    }
}

impl Default for SharedMemoryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicAllocator for SharedMemoryAllocator {
    fn allocate(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle> {
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.layer_count == 0 {
            return Err(HubError::alloc(format!(
                "invalid geometry {}x{}x{}",
                descriptor.width, descriptor.height, descriptor.layer_count
            )));
        }

        let mut descriptor = *descriptor;
        descriptor.stride = descriptor.width;

        let mut attempts = 0;
        let (id, name, shm) = loop {
            let id = self
                .ids
                .allocate()
                .ok_or_else(|| HubError::alloc("buffer id space exhausted"))?;
            let name = self.region_name(id);
            match create_shared_memory(descriptor.byte_size(), Some(&name)) {
                Ok(shm) => break (id, name, shm),
                // A remote client still holds a buffer freed here under this id
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempts < MAX_NAME_RETRIES => {
                    self.ids.free(id);
                    attempts += 1;
                }
                Err(e) => {
                    self.ids.free(id);
                    tracing::error!(
                        "SharedMemoryAllocator::allocate: {}x{} format={:#x} failed: {}",
                        descriptor.width,
                        descriptor.height,
                        descriptor.format.0,
                        e
                    );
                    return Err(HubError::alloc(format!("failed to create {}: {}", name, e)));
                }
            }
        };

        self.regions.lock().insert(name.clone(), (shm, true));
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "SharedMemoryAllocator::allocate: id={} {}x{} layers={} format={:#x} usage={:#x}",
            id,
            descriptor.width,
            descriptor.height,
            descriptor.layer_count,
            descriptor.format.0,
            descriptor.usage
        );

        Ok(BufferHandle::new(id, name, descriptor))
    }

    fn import(&self, handle: &BufferHandle) -> Result<BufferHandle> {
        let mut regions = self.regions.lock();
        if regions.contains_key(handle.region()) {
            return Ok(handle.clone());
        }

        let shm = attach_shared_memory(handle.region(), handle.descriptor().byte_size())
            .map_err(|e| HubError::import(format!("{}: {}", handle.region(), e)))?;
        regions.insert(handle.region().to_owned(), (shm, false));
        Ok(handle.clone())
    }

    fn free(&self, handle: &BufferHandle) {
        let removed = self.regions.lock().remove(handle.region());
        if let Some((_shm, created_here)) = removed {
            if created_here {
                self.ids.free(handle.id());
            }
        }
    }

    fn destroy(&self, handle: &BufferHandle) {
        self.free(handle);
        if let Err(e) = unlink_shared_memory(handle.region()) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    "SharedMemoryAllocator::destroy: failed to unlink {}: {}",
                    handle.region(),
                    e
                );
            }
        }
    }
}

impl Drop for SharedMemoryAllocator {
    fn drop(&mut self) {
        for (name, (_shm, created_here)) in self.regions.get_mut().drain() {
            if created_here {
                let _ = unlink_shared_memory(&name);
            }
        }
    }
}

// Implement Send + Sync since we manage synchronization internally
unsafe impl Send for SharedMemoryAllocator {}
unsafe impl Sync for SharedMemoryAllocator {}

// Named regions under /dev/shm, mapped with mmap(MAP_SHARED) so every process
// that opens the same name sees the same bytes. Buffer metadata and pixel
// storage both live in regions like these.

use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io;
#[cfg(unix)]
use std::os::fd::AsRawFd;
#[cfg(unix)]
use std::os::fd::IntoRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// Directory backing named regions.
pub const SHM_DIR: &str = "/dev/shm";

/// A mapped region, shared with every process that attaches by name.
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Start of the mapping.
    fn as_ptr(&self) -> *mut u8;

    /// Mapped length in bytes.
    fn size(&self) -> usize;

    fn raw_handle(&self) -> RawHandle;

    /// Name other processes use to attach to this region
    fn name(&self) -> &str;
}

/// OS handle backing a region or a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawHandle {
    Fd(i32),
}

static REGION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build a region name unique to this process.
pub fn unique_region_name(prefix: &str) -> String {
    let seq = REGION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, std::process::id(), seq)
}

/// Create a zero-filled region of `size` bytes.
///
/// Without a `name` a process-unique one is generated. An existing region of
/// the same name is never reused: the call fails with `AlreadyExists`.
#[cfg(target_os = "linux")]
pub fn create_shared_memory(size: usize, name: Option<&str>) -> io::Result<Box<dyn SharedMemoryBackend>> {
    let name = match name {
        Some(name) => name.to_owned(),
        None => unique_region_name("bufferhub"),
    };
    Ok(Box::new(LinuxSharedMemory::create(size, name)?))
}

/// Map a region created elsewhere. Fails with `InvalidData` when it is
/// smaller than `size`.
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str, size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::attach(name, size)?))
}

/// Remove a region's name. Existing mappings stay valid until dropped.
#[cfg(target_os = "linux")]
pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
    std::fs::remove_file(region_path(name))
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "hub regions need /dev/shm (Linux only)")
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_size: usize, _name: Option<&str>) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str, _size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn unlink_shared_memory(_name: &str) -> io::Result<()> {
    Err(unsupported())
}

fn region_path(name: &str) -> String {
    format!("{}/{}", SHM_DIR, name)
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
    name: String,
}

#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    pub fn create(size: usize, name: String) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("region {} requested with zero length", name),
            ));
        }

        let path = region_path(&name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| io::Error::new(e.kind(), format!("create {}: {}", path, e)))?;

        // Set size; ftruncate zero-fills the new pages
        if unsafe { libc::ftruncate(file.as_raw_fd(), size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        let fd = file.into_raw_fd();
        let ptr = match unsafe { Self::map(fd, size) } {
            Ok(ptr) => ptr,
            Err(err) => {
                let _ = std::fs::remove_file(&path);
                return Err(err);
            }
        };

        Ok(Self {
            ptr,
            size,
            fd,
            name,
        })
    }

    pub fn attach(name: &str, min_size: usize) -> io::Result<Self> {
        let path = region_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("attach {}: {}", path, e)))?;

        let len = file.metadata()?.len() as usize;
        if len == 0 || len < min_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("region {} holds {} bytes, need {}", name, len, min_size),
            ));
        }

        let fd = file.into_raw_fd();
        let ptr = unsafe { Self::map(fd, len)? };
        Ok(Self {
            ptr,
            size: len,
            fd,
            name: name.to_owned(),
        })
    }

    /// Map `size` bytes of `fd`. Closes `fd` on failure.
    unsafe fn map(fd: i32, size: usize) -> io::Result<NonNull<u8>> {
        let ptr = libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        // mmap hands back page-aligned addresses; the header layout relies on it
        if (ptr as usize) % 128 != 0 {
            libc::munmap(ptr, size);
            libc::close(fd);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("mapping at {:p} is not 128-byte aligned", ptr),
            ));
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| {
            libc::close(fd);
            io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping")
        })
    }
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

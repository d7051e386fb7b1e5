//! Error types for the buffer hub.

use crate::Hub::client::ClientRole;
use crate::Hub::Structs::Rect;

/// Result type alias for buffer hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Coarse classification used by callers to decide between retrying and
/// treating the failure as a bug on their side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A fixed-size table is full (client bits, queue slots).
    Capacity,
    /// The caller asked for a transition its current state forbids.
    Protocol,
    /// Nothing became available in time; retrying later may succeed.
    Transient,
    /// Internal bookkeeping is corrupt; the operation was aborted.
    Fatal,
    /// Failure reported by the operating system or an allocator.
    System,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// All 64 client bits of a buffer are taken
    #[error("client capacity exhausted: buffer {buffer_id} already has {max} clients")]
    ClientCapacity { buffer_id: u32, max: usize },

    /// No unbound slot left in the producer queue
    #[error("slot capacity exhausted: {message}")]
    SlotCapacity { message: String },

    /// A second producer-role client tried to register on one buffer
    #[error("buffer {buffer_id} already has a producer (bit {producer_bit:#x})")]
    ProducerExists { buffer_id: u32, producer_bit: u64 },

    /// Gain attempted while another client still holds the buffer
    #[error("buffer {buffer_id} not released: client {client_bit:#x} sees state {state:#018x}")]
    NotReleased {
        buffer_id: u32,
        client_bit: u64,
        state: u64,
    },

    /// Post attempted by a client that does not hold the buffer exclusively
    #[error("buffer {buffer_id} not gained by client {client_bit:#x}: state {state:#018x}")]
    NotGained {
        buffer_id: u32,
        client_bit: u64,
        state: u64,
    },

    /// Acquire attempted without a fresh posted frame
    #[error("buffer {buffer_id} has no posted frame for client {client_bit:#x}: state {state:#018x}")]
    NotPosted {
        buffer_id: u32,
        client_bit: u64,
        state: u64,
    },

    /// Operation not legal for the handle's role
    #[error("{op} is not permitted for a {role:?} client")]
    WrongRole { op: &'static str, role: ClientRole },

    /// Producer queue has no connected api
    #[error("producer queue is not connected")]
    NoInit,

    /// Caller supplied an invalid argument or called from the wrong slot state
    #[error("bad value: {message}")]
    BadValue { message: String },

    /// Crop rectangle is not contained in the buffer bounds
    #[error("crop {crop:?} exceeds buffer bounds {width}x{height}")]
    CropOutOfBounds { crop: Rect, width: u32, height: u32 },

    /// Detached buffer belongs to another queue generation
    #[error("generation mismatch: queue expects {expected}, buffer has {actual}")]
    GenerationMismatch { expected: u32, actual: u32 },

    /// No buffer could be produced (timeout, retry budget or allocation failure)
    #[error("no buffer available: {message}")]
    NoMemory { message: String },

    /// Slot bookkeeping contradicts the protocol
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Graphics memory allocation failed
    #[error("allocation failed: {message}")]
    Alloc { message: String },

    /// A received handle could not be imported
    #[error("import failed: {message}")]
    Import { message: String },

    /// I/O related errors (shm open, mmap, futex)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::BadValue {
            message: message.into(),
        }
    }

    pub fn no_memory(message: impl Into<String>) -> Self {
        Self::NoMemory {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn slot_capacity(message: impl Into<String>) -> Self {
        Self::SlotCapacity {
            message: message.into(),
        }
    }

    pub fn alloc(message: impl Into<String>) -> Self {
        Self::Alloc {
            message: message.into(),
        }
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::Import {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ClientCapacity { .. } | Self::SlotCapacity { .. } => ErrorKind::Capacity,
            Self::ProducerExists { .. }
            | Self::NotReleased { .. }
            | Self::NotGained { .. }
            | Self::NotPosted { .. }
            | Self::WrongRole { .. }
            | Self::NoInit
            | Self::BadValue { .. }
            | Self::CropOutOfBounds { .. }
            | Self::GenerationMismatch { .. } => ErrorKind::Protocol,
            Self::NoMemory { .. } => ErrorKind::Transient,
            Self::InvalidState { .. } => ErrorKind::Fatal,
            Self::Alloc { .. } | Self::Import { .. } | Self::Io(_) => ErrorKind::System,
        }
    }

    /// True when the same call may succeed later without the caller changing anything.
    /// Gain and Acquire refusals count: another client has to move first.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Capacity | ErrorKind::Transient)
            || matches!(self, Self::NotReleased { .. } | Self::NotPosted { .. })
    }
}

use std::sync::Arc;

use crate::Hub::Buffer::{BufferNode, NodeHandle};
use crate::Hub::Structs::Buffer_Structs::{BufferDescriptor, PixelFormat};

/// The producer's local reference to a slot's buffer, handed out by `request`.
#[derive(Clone, Debug)]
pub struct GraphicBuffer {
    node: Arc<BufferNode>,
    generation_number: u32,
}

impl GraphicBuffer {
    pub(crate) fn new(node: Arc<BufferNode>, generation_number: u32) -> Self {
        Self {
            node,
            generation_number,
        }
    }

    pub fn id(&self) -> u32 {
        self.node.id()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        self.node.descriptor()
    }

    pub fn width(&self) -> u32 {
        self.descriptor().width
    }

    pub fn height(&self) -> u32 {
        self.descriptor().height
    }

    pub fn format(&self) -> PixelFormat {
        self.descriptor().format
    }

    pub fn usage(&self) -> u64 {
        self.descriptor().usage
    }

    pub fn stride(&self) -> u32 {
        self.descriptor().stride
    }

    pub fn layer_count(&self) -> u32 {
        self.descriptor().layer_count
    }

    /// Queue generation number at the time the buffer was handed out.
    pub fn generation_number(&self) -> u32 {
        self.generation_number
    }

    pub fn node(&self) -> &Arc<BufferNode> {
        &self.node
    }

    pub fn export(&self) -> NodeHandle {
        self.node.export()
    }
}

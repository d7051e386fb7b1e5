// Plain value types shared by the buffer node, client handles and the queue.
// FrameMetadata is written into shared memory; everything else stays local.

use crate::error::HubError;
use crate::Core::SharedMemory::RawHandle;

/// Pixel format code of a graphics buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    pub const RGBA_8888: Self = Self(1);
    pub const RGBX_8888: Self = Self(2);
    pub const RGB_888: Self = Self(3);
    pub const RGB_565: Self = Self(4);
    pub const BGRA_8888: Self = Self(5);
    pub const RGBA_FP16: Self = Self(0x16);
    pub const BLOB: Self = Self(0x21);
    pub const YCBCR_420_888: Self = Self(0x23);
    pub const RGBA_1010102: Self = Self(0x2B);

    /// Storage cost used when sizing backing memory; unknown formats count as 4 bytes.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::RGBA_FP16 => 64,
            Self::RGB_888 => 24,
            Self::RGB_565 => 16,
            Self::YCBCR_420_888 => 12,
            Self::BLOB => 8,
            _ => 32,
        }
    }
}

/// Immutable description of one shared buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    pub format: PixelFormat,
    pub usage: u64,
    /// Row pitch in pixels, filled in by the allocator.
    pub stride: u32,
    /// Bytes of opaque user metadata stored after the frame metadata.
    pub user_metadata_size: u64,
}

impl BufferDescriptor {
    pub fn new(width: u32, height: u32, layer_count: u32, format: PixelFormat, usage: u64) -> Self {
        Self {
            width,
            height,
            layer_count,
            format,
            usage,
            stride: width,
            user_metadata_size: 0,
        }
    }

    pub fn with_user_metadata_size(mut self, size: u64) -> Self {
        self.user_metadata_size = size;
        self
    }

    /// Geometry check used by the producer queue to decide on reallocation.
    pub fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    /// Bytes of graphics memory needed for all layers.
    pub fn byte_size(&self) -> usize {
        let row_bits = self.stride.max(self.width) as usize * self.format.bits_per_pixel() as usize;
        let row = (row_bits + 7) / 8;
        row * self.height as usize * self.layer_count.max(1) as usize
    }
}

/// Crop rectangle, right/bottom exclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const EMPTY: Self = Self {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width.min(i32::MAX as u32) as i32, height.min(i32::MAX as u32) as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }

    /// True when clipping against `bounds` would leave the rectangle untouched.
    /// Only `Rect::EMPTY` means "whole buffer"; any other rectangle, inverted
    /// ones included, must lie inside `bounds`.
    pub fn fits_within(&self, bounds: &Rect) -> bool {
        *self == Rect::EMPTY || self.intersect(bounds) == *self
    }
}

#[repr(i32)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ScalingMode {
    #[default]
    Freeze = 0,
    ScaleToWindow = 1,
    ScaleCrop = 2,
    NoScaleCrop = 3,
}

impl TryFrom<i32> for ScalingMode {
    type Error = HubError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Freeze),
            1 => Ok(Self::ScaleToWindow),
            2 => Ok(Self::ScaleCrop),
            3 => Ok(Self::NoScaleCrop),
            other => Err(HubError::bad_value(format!("unknown scaling mode {}", other))),
        }
    }
}

/// Buffer transform bitmask.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Transform(pub u32);

impl Transform {
    pub const IDENTITY: Self = Self(0);
    pub const FLIP_H: Self = Self(0x01);
    pub const FLIP_V: Self = Self(0x02);
    pub const ROT_90: Self = Self(0x04);
    pub const ROT_180: Self = Self(0x03);
    pub const ROT_270: Self = Self(0x07);

    pub fn is_valid(self) -> bool {
        self.0 & !0x07 == 0
    }
}

impl std::ops::BitOr for Transform {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Dataspace(pub i32);

impl Dataspace {
    pub const UNKNOWN: Self = Self(0);
    pub const SRGB_LINEAR: Self = Self(0x8A_0000);
    pub const SRGB: Self = Self(0x8C_0000);
    pub const DISPLAY_P3: Self = Self(0x8C_1000);
}

/// Per-frame record published by Post. Bit-exact across processes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Presentation time in nanoseconds.
    pub timestamp: i64,
    /// Non-zero when the timestamp was generated automatically.
    pub is_auto_timestamp: i32,
    pub dataspace: i32,
    pub crop_left: i32,
    pub crop_top: i32,
    pub crop_right: i32,
    pub crop_bottom: i32,
    pub scaling_mode: i32,
    pub transform: u32,
    /// Bytes of user metadata the producer wrote alongside this frame.
    pub user_metadata_size: u64,
}

impl FrameMetadata {
    pub fn crop(&self) -> Rect {
        Rect::new(self.crop_left, self.crop_top, self.crop_right, self.crop_bottom)
    }

    pub fn set_crop(&mut self, crop: Rect) {
        self.crop_left = crop.left;
        self.crop_top = crop.top;
        self.crop_right = crop.right;
        self.crop_bottom = crop.bottom;
    }

    pub fn scaling_mode(&self) -> Result<ScalingMode, HubError> {
        ScalingMode::try_from(self.scaling_mode)
    }

    pub fn transform(&self) -> Transform {
        Transform(self.transform)
    }

    pub fn dataspace(&self) -> Dataspace {
        Dataspace(self.dataspace)
    }

    pub fn is_auto_timestamp(&self) -> bool {
        self.is_auto_timestamp != 0
    }
}

/// Synchronization token for GPU/display work on a buffer.
/// The handle is owned by the transport layer; the hub only passes it along.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Fence {
    #[default]
    NoFence,
    Sync(RawHandle),
}

impl Fence {
    pub fn is_valid(&self) -> bool {
        matches!(self, Fence::Sync(_))
    }
}

//! The DRM-facing side: what a flush asks for and how the engine reports back.

use core::time::Duration;

use iomfb::swap::Rect;
use smallvec::SmallVec;

use crate::modes::Timing;

/// Identifies a framebuffer towards the DRM layer.
pub type FramebufferId = u64;

/// Surface slots available to planes. Slot 0 holds the boot framebuffer and is never assigned.
pub const MAX_PLANES: usize = iomfb::SWAP_SURFACES - 1;

/// Notifications from the engine to the DRM layer.
///
/// These are called with the engine's state locked and must not call back into the engine
/// before returning.
pub trait DrmClient: Send + Sync {
    /// A vblank event for the last flush.
    fn vblank(&self);

    /// Deliver a vblank event after `delay`, for flushes that could not be swapped.
    fn schedule_vblank(&self, delay: Duration);

    /// The connector's state changed.
    fn hotplug(&self, connected: bool);

    /// The firmware no longer scans out of `fb`.
    fn release_framebuffer(&self, fb: FramebufferId);

    /// Physical panel size became known.
    fn set_dimensions(&self, width_mm: u32, height_mm: u32);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    Xrgb8888,
    Argb8888,
    Xbgr8888,
    Abgr8888,
    Xrgb2101010,
    Argb2101010,
}

impl PixelFormat {
    /// Format code the firmware expects.
    pub fn fourcc(self) -> u32 {
        let code = match self {
            PixelFormat::Xrgb8888 | PixelFormat::Argb8888 => b"ARGB",
            PixelFormat::Xbgr8888 | PixelFormat::Abgr8888 => b"ABGR",
            PixelFormat::Xrgb2101010 | PixelFormat::Argb2101010 => b"r03w",
        };
        u32::from_le_bytes(*code)
    }

    /// Formats without alpha are blended as premultiplied over black.
    pub fn is_opaque(self) -> bool {
        matches!(self, PixelFormat::Xrgb8888 | PixelFormat::Xbgr8888)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    pub id: FramebufferId,
    pub format: PixelFormat,
    /// Device address of the first pixel.
    pub iova: u64,
    /// Bytes per row.
    pub stride: u32,
    pub width: u32,
    pub height: u32,
}

/// A rectangle given by its corners, end exclusive.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DrmRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl DrmRect {
    pub fn to_rect(&self) -> Rect {
        Rect {
            x: self.x1.max(0) as u32,
            y: self.y1.max(0) as u32,
            w: (self.x2 - self.x1).max(0) as u32,
            h: (self.y2 - self.y1).max(0) as u32,
        }
    }
}

/// One plane of a flush.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PlaneState {
    /// Framebuffer to scan out, `None` to disable the plane.
    pub fb: Option<Framebuffer>,
    /// Framebuffer the plane showed before this flush.
    pub old_fb: Option<FramebufferId>,
    /// Source rectangle in whole pixels.
    pub src: DrmRect,
    /// Destination rectangle on the display.
    pub dst: DrmRect,
}

/// An atomic commit as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRequest {
    pub timing: Timing,
    /// The CRTC mode changed.
    pub mode_changed: bool,
    pub enabled: bool,
    pub active: bool,
    pub planes_changed: bool,
    pub color_mgmt_changed: bool,
    pub planes: SmallVec<[PlaneState; MAX_PLANES]>,
}

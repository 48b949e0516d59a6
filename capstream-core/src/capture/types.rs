//! Frame and display types shared between providers and the encoder.
//!
//! A [`Frame`] is a *borrowed* view into memory owned by the capture
//! provider. It is only valid between a successful consume and the
//! matching release, which the borrow checker enforces through
//! [`FrameGuard`](super::FrameGuard).

use serde::{Deserialize, Serialize};

use crate::projection::Rotation;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of a captured frame. Discriminants match the native
/// capture library's format codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PixelFormat {
    Unknown = 0x00,
    Rgba8888 = 0x06,
    Rgbx8888 = 0x07,
    Rgb888 = 0x08,
    Rgb565 = 0x09,
    Bgra8888 = 0x0a,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel, `None` when unknown.
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 | PixelFormat::Bgra8888 => Some(4),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Rgb565 => Some(2),
            PixelFormat::Unknown => None,
        }
    }

    /// Byte offsets of the red, green and blue channels within a pixel.
    pub(crate) const fn rgb_offsets(self) -> Option<[usize; 3]> {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 | PixelFormat::Rgb888 => Some([0, 1, 2]),
            PixelFormat::Bgra8888 => Some([2, 1, 0]),
            PixelFormat::Rgb565 | PixelFormat::Unknown => None,
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// Non-owning view of one captured image.
///
/// `stride` is measured in **pixels** and may exceed `width`; a row
/// occupies `stride * bpp` bytes.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bpp: u32,
    pub format: PixelFormat,
}

impl Frame<'_> {
    /// Row pitch in bytes.
    pub fn row_bytes(&self) -> usize {
        self.stride as usize * self.bpp as usize
    }

    /// Bytes the view must cover: every full row but the last, plus the
    /// visible part of the last row.
    pub fn required_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        (self.height as usize - 1) * self.row_bytes() + self.width as usize * self.bpp as usize
    }
}

// ── DisplayInfo ──────────────────────────────────────────────────

/// Geometry and properties of a display, as reported by a provider or
/// requested of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub density: f32,
    pub xdpi: f32,
    pub ydpi: f32,
    /// Diagonal in inches.
    pub size: f32,
    #[serde(rename = "rotation")]
    pub orientation: Rotation,
    pub secure: bool,
}

impl Default for DisplayInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            fps: 0.0,
            density: 0.0,
            xdpi: 0.0,
            ydpi: 0.0,
            size: 0.0,
            orientation: Rotation::Deg0,
            secure: false,
        }
    }
}

//! JPEG compression backed by the `image` crate.

use std::io::{Cursor, ErrorKind};

use image::codecs::jpeg::JpegEncoder as ImageEncoder;
use image::{ExtendedColorType, ImageError};
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::EncodeError;

// ── ColorMode ────────────────────────────────────────────────────

/// Output colour of the JPEG.
///
/// `image` encodes colour with full-resolution chroma (4:4:4), so the
/// colour bound is the 4:4:4 one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Color,
    Gray,
}

impl ColorMode {
    /// Upper bound of the compressed size of a `width` x `height` image.
    ///
    /// Two bytes per sample of every 8x8 block, plus room for headers
    /// and tables.
    pub fn worst_case_size(self, width: u32, height: u32) -> usize {
        let w = (width as usize).next_multiple_of(8);
        let h = (height as usize).next_multiple_of(8);
        let components = match self {
            ColorMode::Color => 3,
            ColorMode::Gray => 1,
        };
        w * h * 2 * components + 2048
    }
}

// ── FrameCompressor ──────────────────────────────────────────────

/// Compresses one frame into a caller-provided buffer.
pub trait FrameCompressor: Send {
    /// Bytes `compress` may need for a `width` x `height` output.
    fn worst_case_size(&self, width: u32, height: u32) -> usize;

    /// Compress `frame`, resized to `target`, into `out`.
    ///
    /// Returns the number of bytes written. Must fail rather than write
    /// past the end of `out`.
    fn compress(
        &mut self,
        frame: &Frame<'_>,
        quality: u8,
        target: (u32, u32),
        out: &mut [u8],
    ) -> Result<usize, EncodeError>;
}

// ── ImageJpegCompressor ──────────────────────────────────────────

/// [`FrameCompressor`] using `image::codecs::jpeg`.
///
/// Frames are first packed into a tightly strided RGB (or luma)
/// scratch buffer that is kept between calls.
#[derive(Debug, Default)]
pub struct ImageJpegCompressor {
    mode: ColorMode,
    scratch: Vec<u8>,
}

impl ImageJpegCompressor {
    pub fn new(mode: ColorMode) -> Self {
        Self {
            mode,
            scratch: Vec::new(),
        }
    }

    /// Pack `frame` into the scratch buffer at `width` x `height`.
    fn pack(&mut self, frame: &Frame<'_>, width: u32, height: u32) -> Result<(), EncodeError> {
        let offsets = frame
            .format
            .rgb_offsets()
            .ok_or(EncodeError::UnsupportedFormat(frame.format))?;
        let bpp = frame.bpp as usize;
        if frame.format.bytes_per_pixel() != Some(frame.bpp) || frame.stride < frame.width {
            return Err(EncodeError::UnsupportedFormat(frame.format));
        }
        let required = frame.required_len();
        if frame.data.len() < required {
            return Err(EncodeError::Truncated {
                expected: required,
                actual: frame.data.len(),
            });
        }

        let gray = self.mode == ColorMode::Gray;
        let out_bpp = if gray { 1 } else { 3 };
        self.scratch.clear();
        self.scratch
            .resize(width as usize * height as usize * out_bpp, 0);

        let row_bytes = frame.row_bytes();
        for (y, out_row) in self
            .scratch
            .chunks_exact_mut(width as usize * out_bpp)
            .enumerate()
        {
            let sy = (y as u64 * frame.height as u64 / height as u64) as usize;
            let row = &frame.data[sy * row_bytes..];
            for (x, out) in out_row.chunks_exact_mut(out_bpp).enumerate() {
                let sx = (x as u64 * frame.width as u64 / width as u64) as usize;
                let px = &row[sx * bpp..];
                let (r, g, b) = (px[offsets[0]], px[offsets[1]], px[offsets[2]]);
                if gray {
                    out[0] = ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8) as u8;
                } else {
                    out.copy_from_slice(&[r, g, b]);
                }
            }
        }
        Ok(())
    }
}

impl FrameCompressor for ImageJpegCompressor {
    fn worst_case_size(&self, width: u32, height: u32) -> usize {
        self.mode.worst_case_size(width, height)
    }

    fn compress(
        &mut self,
        frame: &Frame<'_>,
        quality: u8,
        target: (u32, u32),
        out: &mut [u8],
    ) -> Result<usize, EncodeError> {
        let (width, height) = target;
        if width == 0 || height == 0 {
            return Err(EncodeError::Compression(format!(
                "empty output size {width}x{height}"
            )));
        }
        self.pack(frame, width, height)?;

        let color = if self.mode == ColorMode::Gray {
            ExtendedColorType::L8
        } else {
            ExtendedColorType::Rgb8
        };
        let capacity = out.len();
        let mut cursor = Cursor::new(out);
        {
            let mut encoder = ImageEncoder::new_with_quality(&mut cursor, quality.clamp(1, 100));
            encoder
                .encode(&self.scratch, width, height, color)
                .map_err(|e| match e {
                    ImageError::IoError(io) if io.kind() == ErrorKind::WriteZero => {
                        EncodeError::BufferTooSmall { capacity }
                    }
                    other => EncodeError::Compression(other.to_string()),
                })?;
        }
        Ok(cursor.position() as usize)
    }
}

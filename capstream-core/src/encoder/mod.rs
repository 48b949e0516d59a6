//! Reusable JPEG output buffer.
//!
//! [`JpegEncoder`] owns one buffer sized for the worst case of the
//! reserved dimensions, plus padding on both sides:
//!
//! ```text
//! [ pre_padding | payload (<= worst case) | post_padding ]
//! ```
//!
//! With at least four bytes of pre-padding the length prefix is written
//! in place, so a frame leaves in a single write via
//! [`framed_data`](JpegEncoder::framed_data).

pub mod jpeg;

use tracing::debug;

use crate::capture::Frame;
use crate::error::EncodeError;
use crate::protocol::FRAME_HEADER_SIZE;

pub use jpeg::{ColorMode, FrameCompressor, ImageJpegCompressor};

// ── JpegEncoder ──────────────────────────────────────────────────

/// Buffer manager around a [`FrameCompressor`].
pub struct JpegEncoder<C: FrameCompressor> {
    compressor: C,
    pre_padding: usize,
    post_padding: usize,
    buffer: Vec<u8>,
    capacity_width: u32,
    capacity_height: u32,
    worst_case: usize,
    encoded_size: usize,
    allocations: u64,
}

impl<C: FrameCompressor> JpegEncoder<C> {
    pub fn new(compressor: C, pre_padding: usize, post_padding: usize) -> Self {
        Self {
            compressor,
            pre_padding,
            post_padding,
            buffer: Vec::new(),
            capacity_width: 0,
            capacity_height: 0,
            worst_case: 0,
            encoded_size: 0,
            allocations: 0,
        }
    }

    /// Size the buffer for `width` x `height` frames.
    ///
    /// A no-op when the dimensions equal the current capacity. On
    /// failure the encoder is left unreserved.
    pub fn reserve(&mut self, width: u32, height: u32) -> Result<(), EncodeError> {
        if self.is_reserved() && width == self.capacity_width && height == self.capacity_height {
            return Ok(());
        }

        self.buffer = Vec::new();
        self.capacity_width = 0;
        self.capacity_height = 0;
        self.worst_case = 0;
        self.encoded_size = 0;

        let worst_case = self.compressor.worst_case_size(width, height);
        let size = self
            .pre_padding
            .checked_add(worst_case)
            .and_then(|n| n.checked_add(self.post_padding))
            .ok_or(EncodeError::Allocation { size: usize::MAX })?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| EncodeError::Allocation { size })?;
        buffer.resize(size, 0);

        debug!("encoder reserved {} bytes for {}x{}", size, width, height);
        self.buffer = buffer;
        self.capacity_width = width;
        self.capacity_height = height;
        self.worst_case = worst_case;
        self.allocations += 1;
        Ok(())
    }

    /// Encode `frame` at its own size.
    pub fn encode(&mut self, frame: &Frame<'_>, quality: u8) -> Result<usize, EncodeError> {
        self.encode_scaled(frame, quality, frame.width, frame.height)
    }

    /// Encode `frame` downsampled to `width` x `height`.
    pub fn encode_scaled(
        &mut self,
        frame: &Frame<'_>,
        quality: u8,
        width: u32,
        height: u32,
    ) -> Result<usize, EncodeError> {
        if !self.is_reserved() {
            return Err(EncodeError::NotReserved);
        }
        if width > self.capacity_width || height > self.capacity_height {
            return Err(EncodeError::FrameTooLarge {
                width,
                height,
                max_width: self.capacity_width,
                max_height: self.capacity_height,
            });
        }

        self.encoded_size = 0;
        let out = &mut self.buffer[self.pre_padding..self.pre_padding + self.worst_case];
        let size = self
            .compressor
            .compress(frame, quality, (width, height), out)?;
        self.encoded_size = size;
        Ok(size)
    }

    /// Payload of the last successful encode.
    pub fn encoded_data(&self) -> &[u8] {
        match self.buffer.get(self.pre_padding..self.pre_padding + self.encoded_size) {
            Some(data) => data,
            None => &[],
        }
    }

    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    /// Length prefix and payload of the last encode as one slice.
    ///
    /// `None` when the pre-padding cannot hold the prefix or nothing is
    /// reserved.
    pub fn framed_data(&mut self) -> Option<&[u8]> {
        if self.pre_padding < FRAME_HEADER_SIZE || !self.is_reserved() {
            return None;
        }
        let start = self.pre_padding - FRAME_HEADER_SIZE;
        let len = u32::try_from(self.encoded_size).ok()?;
        self.buffer[start..self.pre_padding].copy_from_slice(&len.to_le_bytes());
        Some(&self.buffer[start..self.pre_padding + self.encoded_size])
    }

    pub fn is_reserved(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Number of buffer allocations so far.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    /// Writes a fixed marker pattern; fails if it does not fit.
    struct Marker {
        len: usize,
    }

    impl FrameCompressor for Marker {
        fn worst_case_size(&self, width: u32, height: u32) -> usize {
            (width * height) as usize
        }

        fn compress(
            &mut self,
            _frame: &Frame<'_>,
            _quality: u8,
            _target: (u32, u32),
            out: &mut [u8],
        ) -> Result<usize, EncodeError> {
            let capacity = out.len();
            let dst = out
                .get_mut(..self.len)
                .ok_or(EncodeError::BufferTooSmall { capacity })?;
            dst.fill(0xab);
            Ok(self.len)
        }
    }

    fn frame(data: &[u8], width: u32, height: u32) -> Frame<'_> {
        Frame {
            data,
            width,
            height,
            stride: width,
            bpp: 4,
            format: PixelFormat::Rgba8888,
        }
    }

    #[test]
    fn reserve_is_idempotent() {
        let mut enc = JpegEncoder::new(Marker { len: 3 }, 4, 2);
        enc.reserve(8, 8).unwrap();
        enc.reserve(8, 8).unwrap();
        assert_eq!(enc.allocations(), 1);
        assert_eq!(enc.buffer.len(), 4 + 64 + 2);

        enc.reserve(4, 4).unwrap();
        assert_eq!(enc.allocations(), 2);
        assert_eq!((enc.capacity_width, enc.capacity_height), (4, 4));
    }

    #[test]
    fn encode_requires_reserve() {
        let data = vec![0u8; 64];
        let mut enc = JpegEncoder::new(Marker { len: 3 }, 0, 0);
        assert!(matches!(
            enc.encode(&frame(&data, 4, 4), 80),
            Err(EncodeError::NotReserved)
        ));
    }

    #[test]
    fn encoded_data_skips_padding() {
        let data = vec![0u8; 64];
        let mut enc = JpegEncoder::new(Marker { len: 5 }, 8, 8);
        enc.reserve(4, 4).unwrap();
        assert_eq!(enc.encode(&frame(&data, 4, 4), 80).unwrap(), 5);
        assert_eq!(enc.encoded_size(), 5);
        assert_eq!(enc.encoded_data(), &[0xab; 5]);
        assert!(enc.buffer[..8].iter().all(|&b| b == 0));
    }

    #[test]
    fn framed_data_prefixes_length_in_place() {
        let data = vec![0u8; 64];
        let mut enc = JpegEncoder::new(Marker { len: 3 }, 4, 0);
        enc.reserve(4, 4).unwrap();
        enc.encode(&frame(&data, 4, 4), 80).unwrap();
        assert_eq!(
            enc.framed_data().unwrap(),
            &[3, 0, 0, 0, 0xab, 0xab, 0xab]
        );

        let mut bare = JpegEncoder::new(Marker { len: 3 }, 0, 0);
        bare.reserve(4, 4).unwrap();
        assert!(bare.framed_data().is_none());
    }

    #[test]
    fn oversized_frame_and_output_fail() {
        let data = vec![0u8; 256];
        let mut enc = JpegEncoder::new(Marker { len: 3 }, 0, 0);
        enc.reserve(4, 4).unwrap();
        assert!(matches!(
            enc.encode(&frame(&data, 8, 8), 80),
            Err(EncodeError::FrameTooLarge { .. })
        ));

        let mut enc = JpegEncoder::new(Marker { len: 100 }, 0, 0);
        enc.reserve(4, 4).unwrap();
        assert!(matches!(
            enc.encode(&frame(&data, 4, 4), 80),
            Err(EncodeError::BufferTooSmall { capacity: 16 })
        ));
        assert_eq!(enc.encoded_size(), 0);
    }

    #[test]
    fn real_jpeg_through_padded_buffer() {
        let data = vec![0x80u8; 16 * 16 * 4];
        let mut enc = JpegEncoder::new(ImageJpegCompressor::default(), 4, 0);
        enc.reserve(16, 16).unwrap();
        let n = enc.encode(&frame(&data, 16, 16), 80).unwrap();
        let framed = enc.framed_data().unwrap();
        assert_eq!(framed.len(), n + 4);
        assert_eq!(&framed[..4], &(n as u32).to_le_bytes());
        assert_eq!(&framed[4..6], &[0xff, 0xd8]);
    }
}

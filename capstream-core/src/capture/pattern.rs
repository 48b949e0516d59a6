//! Synthetic capture provider.
//!
//! Renders a moving RGBA test pattern at the desired geometry. A
//! producer thread announces a new frame every `interval`; the pixels
//! for a frame are rendered when it is consumed. Rows are padded so the
//! stride is wider than the image, like real compositor buffers.
//!
//! Output is always upright: for 90/270 rotations the desired width and
//! height are swapped, and the provider advertises
//! [`Quirks::ALWAYS_UPRIGHT`].

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::capture::producer::Producer;
use crate::capture::{
    CaptureProvider, CaptureResult, DisplayInfo, Frame, PixelFormat, check_geometry,
};
use crate::error::CaptureError;
use crate::notifier::FrameNotifier;
use crate::protocol::Quirks;

/// Stride alignment in pixels.
const STRIDE_ALIGN: u32 = 16;
const BPP: u32 = 4;

// ── PatternProvider ──────────────────────────────────────────────

/// Test-pattern [`CaptureProvider`]. See the module docs.
pub struct PatternProvider {
    display: DisplayInfo,
    real: Option<DisplayInfo>,
    desired: Option<DisplayInfo>,
    /// `None` disables the producer thread; frames are then announced
    /// by whoever holds the notifier.
    interval: Option<Duration>,
    width: u32,
    height: u32,
    stride: u32,
    pixels: Vec<u8>,
    sequence: u64,
    consumed: bool,
    producer: Option<Producer>,
}

impl PatternProvider {
    /// Provider emitting `fps` frames per second for `display`.
    ///
    /// A rate too low to express as an interval produces no frames.
    pub fn new(display: DisplayInfo, fps: f32) -> Self {
        let interval = (fps > 0.0)
            .then(|| Duration::try_from_secs_f32(1.0 / fps).ok())
            .flatten();
        Self::with_interval(display, interval)
    }

    /// Provider without a producer thread.
    pub fn manual(display: DisplayInfo) -> Self {
        Self::with_interval(display, None)
    }

    fn with_interval(display: DisplayInfo, interval: Option<Duration>) -> Self {
        Self {
            display,
            real: None,
            desired: None,
            interval,
            width: 0,
            height: 0,
            stride: 0,
            pixels: Vec::new(),
            sequence: 0,
            consumed: false,
            producer: None,
        }
    }

    fn render(&mut self) {
        let row_bytes = (self.stride * BPP) as usize;
        let shift = self.sequence.wrapping_mul(8) as u32;
        let bar = shift % self.width.max(1);

        for (y, row) in self.pixels.chunks_exact_mut(row_bytes).enumerate() {
            let y = y as u32;
            for (x, px) in row.chunks_exact_mut(BPP as usize).take(self.width as usize).enumerate() {
                let x = x as u32;
                let on_bar = x.wrapping_sub(bar) < 16;
                px[0] = x.wrapping_add(shift) as u8;
                px[1] = y.wrapping_add(shift / 2) as u8;
                px[2] = if on_bar { 0xff } else { (x ^ y) as u8 };
                px[3] = 0xff;
            }
        }
    }
}

impl CaptureProvider for PatternProvider {
    fn display_info(&self) -> CaptureResult<DisplayInfo> {
        Ok(self.display)
    }

    fn set_real_info(&mut self, info: DisplayInfo) -> CaptureResult<()> {
        check_geometry(&info)?;
        self.real = Some(info);
        Ok(())
    }

    fn set_desired_info(&mut self, info: DisplayInfo) -> CaptureResult<()> {
        check_geometry(&info)?;
        self.desired = Some(info);
        Ok(())
    }

    fn apply_config_changes(&mut self, notifier: Arc<FrameNotifier>) -> CaptureResult<()> {
        let desired = self.desired.ok_or(CaptureError::NotConfigured)?;
        if self.real.is_none() {
            return Err(CaptureError::NotConfigured);
        }

        // Stop the previous producer before the geometry changes.
        self.producer = None;
        self.release_consumed_frame();

        let (width, height) = if desired.orientation.is_sideways() {
            (desired.height, desired.width)
        } else {
            (desired.width, desired.height)
        };
        self.width = width;
        self.height = height;
        self.stride = width.div_ceil(STRIDE_ALIGN) * STRIDE_ALIGN;
        self.pixels = vec![0; (self.stride * BPP) as usize * height as usize];

        info!(
            "pattern capture {}x{} (stride {}) rotation {}",
            width,
            height,
            self.stride,
            desired.orientation.degrees()
        );

        if let Some(interval) = self.interval {
            self.producer = Some(Producer::spawn("pattern-producer", interval, notifier)?);
        }
        Ok(())
    }

    fn consume_pending_frame(&mut self) -> CaptureResult<()> {
        if self.pixels.is_empty() {
            return Err(CaptureError::NotConfigured);
        }
        if self.consumed {
            return Err(CaptureError::AlreadyConsumed);
        }
        self.render();
        self.sequence += 1;
        self.consumed = true;
        Ok(())
    }

    fn consumed_frame(&self) -> Option<Frame<'_>> {
        self.consumed.then(|| Frame {
            data: &self.pixels,
            width: self.width,
            height: self.height,
            stride: self.stride,
            bpp: BPP,
            format: PixelFormat::Rgba8888,
        })
    }

    fn release_consumed_frame(&mut self) {
        self.consumed = false;
    }

    fn quirks(&self) -> Quirks {
        Quirks::ALWAYS_UPRIGHT
    }
}

//! Scriptable provider for unit tests.

use std::sync::Arc;

use crate::capture::{CaptureProvider, CaptureResult, DisplayInfo, Frame, PixelFormat};
use crate::encoder::FrameCompressor;
use crate::error::{CaptureError, EncodeError};
use crate::notifier::FrameNotifier;
use crate::protocol::Quirks;

/// Counts consumes and releases; optionally fails the n-th consume.
pub(crate) struct MockProvider {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) consumed: u32,
    pub(crate) released: u32,
    pub(crate) fail_on: Option<u32>,
    pub(crate) fail_with: fn() -> CaptureError,
    held: bool,
    pixels: Vec<u8>,
}

impl MockProvider {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            consumed: 0,
            released: 0,
            fail_on: None,
            fail_with: || CaptureError::Interrupted,
            held: false,
            pixels: vec![0x40; (width * height * 4) as usize],
        }
    }

    pub(crate) fn failing_on(mut self, nth: u32, with: fn() -> CaptureError) -> Self {
        self.fail_on = Some(nth);
        self.fail_with = with;
        self
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held
    }
}

/// Compressor whose every call fails.
pub(crate) struct FailingCompressor;

impl FrameCompressor for FailingCompressor {
    fn worst_case_size(&self, width: u32, height: u32) -> usize {
        (width * height) as usize
    }

    fn compress(
        &mut self,
        _frame: &Frame<'_>,
        _quality: u8,
        _target: (u32, u32),
        _out: &mut [u8],
    ) -> Result<usize, EncodeError> {
        Err(EncodeError::Compression("broken codec".into()))
    }
}

impl CaptureProvider for MockProvider {
    fn display_info(&self) -> CaptureResult<DisplayInfo> {
        Ok(DisplayInfo {
            width: self.width,
            height: self.height,
            ..DisplayInfo::default()
        })
    }

    fn set_real_info(&mut self, _info: DisplayInfo) -> CaptureResult<()> {
        Ok(())
    }

    fn set_desired_info(&mut self, _info: DisplayInfo) -> CaptureResult<()> {
        Ok(())
    }

    fn apply_config_changes(&mut self, _notifier: Arc<FrameNotifier>) -> CaptureResult<()> {
        Ok(())
    }

    fn consume_pending_frame(&mut self) -> CaptureResult<()> {
        assert!(!self.held, "consumed twice without release");
        if self.fail_on == Some(self.consumed + 1) {
            self.fail_on = None;
            return Err((self.fail_with)());
        }
        self.consumed += 1;
        self.held = true;
        Ok(())
    }

    fn consumed_frame(&self) -> Option<Frame<'_>> {
        self.held.then(|| Frame {
            data: &self.pixels,
            width: self.width,
            height: self.height,
            stride: self.width,
            bpp: 4,
            format: PixelFormat::Rgba8888,
        })
    }

    fn release_consumed_frame(&mut self) {
        if self.held {
            self.held = false;
            self.released += 1;
        }
    }

    fn quirks(&self) -> Quirks {
        Quirks::empty()
    }
}

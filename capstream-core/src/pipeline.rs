//! Wait, skip, consume, encode.
//!
//! [`FramePipeline`] is the narrow interface between the session loop
//! and the capture/encode machinery: every call to
//! [`next_encoded_frame`](FramePipeline::next_encoded_frame) blocks until
//! the provider announces a frame, drops any backlog according to the
//! configured policy and returns one length-prefixed JPEG.
//!
//! Each consumed frame is held by a [`FrameGuard`] and released once it
//! has been encoded, or on whichever error path is taken first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::capture::{CaptureProvider, FrameGuard, discard_frames};
use crate::encoder::{FrameCompressor, JpegEncoder};
use crate::error::{EncodeError, PipelineError};
use crate::notifier::{FrameNotifier, WaitResult};
use crate::protocol::{CaptureRequest, FRAME_HEADER_SIZE};

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 80;

// ── PipelineOptions ──────────────────────────────────────────────

/// Per-process frame policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// JPEG quality for push mode, 0..=100.
    pub quality: u8,
    /// Drop all but the freshest pending frame.
    pub skip_frames: bool,
    /// Minimum time between two sent frames.
    pub min_frame_interval: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            skip_frames: false,
            min_frame_interval: None,
        }
    }
}

impl PipelineOptions {
    /// Cap the output at `fps` frames per second; `0` removes the cap.
    pub fn with_frame_rate(mut self, fps: f32) -> Self {
        self.min_frame_interval = (fps > 0.0)
            .then(|| Duration::try_from_secs_f32(1.0 / fps).unwrap_or(Duration::MAX));
        self
    }
}

/// Frame counters since the pipeline was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub encoded: u64,
    /// Dropped by the backlog skip policy.
    pub skipped: u64,
    /// Dropped by the frame-rate cap.
    pub throttled: u64,
}

// ── FramePipeline ────────────────────────────────────────────────

pub struct FramePipeline<P: CaptureProvider, C: FrameCompressor> {
    provider: P,
    encoder: JpegEncoder<C>,
    notifier: Arc<FrameNotifier>,
    options: PipelineOptions,
    last_sent: Option<Instant>,
    stats: PipelineStats,
}

impl<P: CaptureProvider, C: FrameCompressor> FramePipeline<P, C> {
    /// Pipeline over an already configured provider.
    pub fn new(
        provider: P,
        compressor: C,
        notifier: Arc<FrameNotifier>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            provider,
            encoder: JpegEncoder::new(compressor, FRAME_HEADER_SIZE, 0),
            notifier,
            options,
            last_sent: None,
            stats: PipelineStats::default(),
        }
    }

    /// Block for the next frame and return it length-prefixed.
    ///
    /// `Ok(None)` once the notifier is stopped.
    pub fn next_encoded_frame(&mut self) -> Result<Option<&[u8]>, PipelineError> {
        loop {
            let Some(pending) = self.wait_pending()? else {
                return Ok(None);
            };
            if self.options.skip_frames {
                self.skip_backlog(pending)?;
            }

            if let (Some(min), Some(last)) = (self.options.min_frame_interval, self.last_sent) {
                if last.elapsed() < min {
                    discard_frames(&mut self.provider, 1)?;
                    self.stats.throttled += 1;
                    continue;
                }
            }

            let quality = self.options.quality;
            self.encode_next(quality, None)?;
            return self.framed().map(Some);
        }
    }

    /// Serve one request-mode capture.
    ///
    /// Waits for a frame, always drops the backlog, and encodes the
    /// freshest frame bounded by the requested size.
    pub fn capture_request(
        &mut self,
        request: &CaptureRequest,
    ) -> Result<Option<&[u8]>, PipelineError> {
        let Some(pending) = self.wait_pending()? else {
            return Ok(None);
        };
        self.skip_backlog(pending)?;
        self.encode_next(request.quality, Some((request.width, request.height)))?;
        self.framed().map(Some)
    }

    fn wait_pending(&mut self) -> Result<Option<u32>, PipelineError> {
        match self.notifier.wait() {
            WaitResult::Cancelled => Ok(None),
            WaitResult::Frames(n) => Ok(Some(n)),
        }
    }

    fn skip_backlog(&mut self, pending: u32) -> Result<(), PipelineError> {
        if pending > 1 {
            let extra = pending - 1;
            self.notifier.report_extra_consumption(extra);
            discard_frames(&mut self.provider, extra)?;
            self.stats.skipped += extra as u64;
            debug!("skipped {} pending frames", extra);
        }
        Ok(())
    }

    /// Consume one frame and encode it, optionally bounded to `limit`.
    fn encode_next(&mut self, quality: u8, limit: Option<(u32, u32)>) -> Result<(), PipelineError> {
        let started = Instant::now();
        let guard = FrameGuard::consume(&mut self.provider)?;
        let frame = guard.frame()?;

        let (width, height) = match limit {
            Some((w, h)) => (w.min(frame.width), h.min(frame.height)),
            None => (frame.width, frame.height),
        };
        self.encoder.reserve(frame.width, frame.height)?;
        let size = self.encoder.encode_scaled(&frame, quality, width, height)?;
        drop(guard);

        self.last_sent = Some(Instant::now());
        self.stats.encoded += 1;
        debug!(
            "encoded {}x{} q{} -> {} bytes in {:?}",
            width,
            height,
            quality,
            size,
            started.elapsed()
        );
        Ok(())
    }

    fn framed(&mut self) -> Result<&[u8], PipelineError> {
        self.encoder
            .framed_data()
            .ok_or(PipelineError::Encode(EncodeError::NotReserved))
    }

    /// JPEG bytes of the last frame, without the length prefix.
    pub fn last_encoded(&self) -> &[u8] {
        self.encoder.encoded_data()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn notifier(&self) -> &Arc<FrameNotifier> {
        &self.notifier
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Number of encoder buffer allocations.
    pub fn allocations(&self) -> u64 {
        self.encoder.allocations()
    }
}

//! Domain-specific error types for the capture/encode/stream pipeline.
//!
//! Each concern owns a typed error; [`StreamError`] aggregates them at
//! the session level. The split matters for recovery: a
//! [`CaptureError::Interrupted`] only ends the current client, every
//! other capture or encode error is fatal for the process.

use thiserror::Error;

// ── ProjectionError ──────────────────────────────────────────────

/// Failure to parse a `<w>x<h>@<w>x<h>/<rot>` projection string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    /// A byte outside the class expected by the parser state.
    #[error("malformed projection: unexpected {byte:?} at offset {offset}")]
    Malformed { offset: usize, byte: char },

    /// Input ended before the rotation literal was complete.
    #[error("incomplete projection: expected <w>x<h>@<w>x<h>/{{0|90|180|270}}")]
    Incomplete,

    /// Parsed, but the geometry violates the validity predicate.
    #[error("invalid projection {0}")]
    Invalid(String),
}

// ── CaptureError ─────────────────────────────────────────────────

/// Errors reported by a [`CaptureProvider`](crate::capture::CaptureProvider).
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The provider was interrupted (e.g. display reconfigured). The
    /// current client is dropped; the process keeps running.
    #[error("capture interrupted")]
    Interrupted,

    /// `consumed_frame` was queried with no frame held.
    #[error("no frame is currently consumed")]
    NoFrame,

    /// A frame was consumed while the previous one was still held.
    #[error("previous frame has not been released")]
    AlreadyConsumed,

    /// A frame was requested before `apply_config_changes`.
    #[error("capture not configured")]
    NotConfigured,

    /// The provider rejected the requested geometry.
    #[error("unsupported geometry: {width}x{height}")]
    UnsupportedGeometry { width: u32, height: u32 },

    /// The provider's native pixel layout cannot be encoded.
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Capture could not be started.
    #[error("capture setup failed: {0}")]
    Setup(String),

    /// Device or file I/O failed.
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Whether this error only affects the current client.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Interrupted)
    }
}

// ── EncodeError ──────────────────────────────────────────────────

/// Errors from the encode buffer manager or the JPEG compressor.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The output buffer could not be allocated.
    #[error("unable to allocate {size} bytes for encoder")]
    Allocation { size: usize },

    /// `encode` was called before `reserve`.
    #[error("encoder buffer not reserved")]
    NotReserved,

    /// The frame is larger than the reserved capacity.
    #[error("frame {width}x{height} exceeds reserved {max_width}x{max_height}")]
    FrameTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    /// The compressed output did not fit into the reserved buffer.
    #[error("encoded output exceeds reserved buffer of {capacity} bytes")]
    BufferTooSmall { capacity: usize },

    /// The frame's pixel layout cannot be fed to the compressor.
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(crate::capture::PixelFormat),

    /// The frame data is shorter than `stride * height * bpp`.
    #[error("frame data truncated: {actual} bytes, need {expected}")]
    Truncated { expected: usize, actual: usize },

    /// The compressor itself failed.
    #[error("compression failed: {0}")]
    Compression(String),
}

// ── ProtocolError ────────────────────────────────────────────────

/// Errors decoding the banner/frame stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The banner declares a size the reader does not understand.
    #[error("invalid banner size: {0}")]
    InvalidBannerSize(u8),

    /// The banner declares an unsupported protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Not enough bytes for the structure being decoded.
    #[error("truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A frame length prefix exceeds the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A request line could not be parsed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Underlying I/O failure.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── PipelineError ────────────────────────────────────────────────

/// Errors from [`FramePipeline`](crate::pipeline::FramePipeline).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The provider was interrupted; only the current client is lost.
    #[error("capture interrupted")]
    Interrupted,

    /// Any other capture failure. Fatal.
    #[error(transparent)]
    Capture(CaptureError),

    /// Encoding failed. Fatal.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Interrupted => PipelineError::Interrupted,
            other => PipelineError::Capture(other),
        }
    }
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Interrupted)
    }
}

// ── StreamError ──────────────────────────────────────────────────

/// The aggregate error of the pipeline and session loop.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Socket setup failed.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// An endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<PipelineError> for StreamError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Interrupted => StreamError::Capture(CaptureError::Interrupted),
            PipelineError::Capture(e) => StreamError::Capture(e),
            PipelineError::Encode(e) => StreamError::Encode(e),
        }
    }
}

impl StreamError {
    /// Whether the error only ends the current client connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Capture(e) if e.is_transient())
    }
}

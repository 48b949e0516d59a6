//! # capstream-core
//!
//! Screen-frame JPEG streaming over a length-framed socket protocol.
//!
//! This crate contains:
//! - **Projection**: `Projection` grammar, validation and normalization
//! - **Notifier**: `FrameNotifier`, the counting frame signal that doubles as the stop flag
//! - **Capture**: `CaptureProvider` trait, `FrameGuard`, pattern and framebuffer providers
//! - **Encoder**: `JpegEncoder` buffer manager over a `FrameCompressor`
//! - **Protocol**: `Banner`, `Quirks`, frame framing and request-mode commands
//! - **Codec**: `StreamCodec` for async readers via `tokio_util`
//! - **Pipeline / Session**: `FramePipeline` and the per-client `SessionLoop`
//! - **Network**: `Endpoint`, `ServerSocket`, `ClientStream`, async `StreamClient`
//! - **Error**: typed, `thiserror`-based errors per concern

pub mod capture;
pub mod codec;
pub mod encoder;
pub mod error;
pub mod network;
pub mod notifier;
pub mod pipeline;
pub mod projection;
pub mod protocol;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    CaptureProvider, DisplayInfo, Frame, FrameGuard, PatternProvider, PixelFormat,
};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use capture::FramebufferProvider;
pub use codec::{MAX_FRAME_SIZE, StreamCodec, StreamItem};
pub use encoder::{ColorMode, FrameCompressor, ImageJpegCompressor, JpegEncoder};
pub use error::{
    CaptureError, EncodeError, PipelineError, ProjectionError, ProtocolError, StreamError,
};
pub use network::{ClientStream, DEFAULT_ENDPOINT, Endpoint, ServerSocket, StreamClient};
pub use notifier::{FrameNotifier, WaitResult};
pub use pipeline::{FramePipeline, PipelineOptions, PipelineStats};
pub use projection::{Projection, Rotation};
pub use protocol::{BANNER_SIZE, BANNER_VERSION, Banner, CaptureRequest, Command, Quirks};
pub use session::{Listener, SessionLoop, SessionMode, SessionState};

//! Capture providers and scoped frame ownership.
//!
//! A [`CaptureProvider`] produces raw frames for a configured geometry
//! and announces each one through the shared
//! [`FrameNotifier`](crate::notifier::FrameNotifier). Frames are handed
//! out one at a time: consume, read through [`Frame`], release. The
//! release half is owned by [`FrameGuard`], so every exit path of the
//! session loop (skip, encode failure, write failure, shutdown) gives
//! the frame back exactly once.
//!
//! | Provider                | Source                                 |
//! |-------------------------|----------------------------------------|
//! | [`PatternProvider`]     | synthetic moving test pattern          |
//! | [`FramebufferProvider`] | Linux fbdev (`/dev/graphics/fbN`, `/dev/fbN`) |

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod framebuffer;
#[cfg(test)]
pub(crate) mod mock;
pub mod pattern;
mod producer;
pub mod types;

use std::sync::Arc;

use crate::error::CaptureError;
use crate::notifier::FrameNotifier;
use crate::protocol::Quirks;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use framebuffer::FramebufferProvider;
pub use pattern::PatternProvider;
pub use types::{DisplayInfo, Frame, PixelFormat};

pub type CaptureResult<T> = Result<T, CaptureError>;

// ── CaptureProvider ──────────────────────────────────────────────

/// A source of raw screen frames.
///
/// Lifecycle: `set_real_info` + `set_desired_info`, then
/// `apply_config_changes` starts production. From then on the provider
/// calls `signal()` on the notifier once per frame it makes available,
/// from its own thread.
pub trait CaptureProvider: Send {
    /// Properties of the physical display.
    fn display_info(&self) -> CaptureResult<DisplayInfo>;

    /// Geometry of the physical display to capture.
    fn set_real_info(&mut self, info: DisplayInfo) -> CaptureResult<()>;

    /// Geometry and rotation of the produced frames.
    fn set_desired_info(&mut self, info: DisplayInfo) -> CaptureResult<()>;

    /// Start (or restart) capture with the configured geometry.
    fn apply_config_changes(&mut self, notifier: Arc<FrameNotifier>) -> CaptureResult<()>;

    /// Take ownership of the next pending frame.
    ///
    /// Must not be called again before `release_consumed_frame`.
    fn consume_pending_frame(&mut self) -> CaptureResult<()>;

    /// View of the currently consumed frame.
    fn consumed_frame(&self) -> Option<Frame<'_>>;

    /// Give the consumed frame back. A no-op when none is held.
    fn release_consumed_frame(&mut self);

    /// Capture-method limitations advertised in the banner.
    fn quirks(&self) -> Quirks;
}

impl<P: CaptureProvider + ?Sized> CaptureProvider for Box<P> {
    fn display_info(&self) -> CaptureResult<DisplayInfo> {
        (**self).display_info()
    }

    fn set_real_info(&mut self, info: DisplayInfo) -> CaptureResult<()> {
        (**self).set_real_info(info)
    }

    fn set_desired_info(&mut self, info: DisplayInfo) -> CaptureResult<()> {
        (**self).set_desired_info(info)
    }

    fn apply_config_changes(&mut self, notifier: Arc<FrameNotifier>) -> CaptureResult<()> {
        (**self).apply_config_changes(notifier)
    }

    fn consume_pending_frame(&mut self) -> CaptureResult<()> {
        (**self).consume_pending_frame()
    }

    fn consumed_frame(&self) -> Option<Frame<'_>> {
        (**self).consumed_frame()
    }

    fn release_consumed_frame(&mut self) {
        (**self).release_consumed_frame()
    }

    fn quirks(&self) -> Quirks {
        (**self).quirks()
    }
}

// ── FrameGuard ───────────────────────────────────────────────────

/// Exclusive ownership of one consumed frame; releases it on drop.
pub struct FrameGuard<'a, P: CaptureProvider + ?Sized> {
    provider: &'a mut P,
}

impl<'a, P: CaptureProvider + ?Sized> FrameGuard<'a, P> {
    /// Consume the next pending frame. On error nothing is held and
    /// nothing will be released.
    pub fn consume(provider: &'a mut P) -> CaptureResult<Self> {
        provider.consume_pending_frame()?;
        Ok(Self { provider })
    }

    /// View of the held frame.
    pub fn frame(&self) -> CaptureResult<Frame<'_>> {
        self.provider.consumed_frame().ok_or(CaptureError::NoFrame)
    }
}

impl<P: CaptureProvider + ?Sized> Drop for FrameGuard<'_, P> {
    fn drop(&mut self) {
        self.provider.release_consumed_frame();
    }
}

/// Reject geometries with an empty axis.
pub(crate) fn check_geometry(info: &DisplayInfo) -> CaptureResult<()> {
    if info.width == 0 || info.height == 0 {
        return Err(CaptureError::UnsupportedGeometry {
            width: info.width,
            height: info.height,
        });
    }
    Ok(())
}

/// Consume and immediately release `count` frames without reading them.
///
/// Stops at the first error; frames consumed before it are released.
pub fn discard_frames<P: CaptureProvider + ?Sized>(
    provider: &mut P,
    count: u32,
) -> CaptureResult<()> {
    for _ in 0..count {
        drop(FrameGuard::consume(provider)?);
    }
    Ok(())
}

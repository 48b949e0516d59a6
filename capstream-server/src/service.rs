//! Capture server core logic.
//!
//! Builds the provider and pipeline described by a [`ServerConfig`] and
//! runs one of the server's modes: serve clients, grab a single frame,
//! or report display information. Blocking capture work runs on the
//! Tokio blocking pool; the shared [`FrameNotifier`] is the stop handle.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{info, warn};

use capstream_core::capture::CaptureResult;
use capstream_core::{
    Banner, CaptureProvider, DisplayInfo, Endpoint, FrameNotifier, FramePipeline,
    ImageJpegCompressor, PatternProvider, Projection, ProjectionError, ServerSocket, SessionLoop,
    StreamError,
};

use crate::config::{ProviderKind, ServerConfig};

type DynProvider = Box<dyn CaptureProvider>;

// ── ServerError ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// No frame arrived in time.
    #[error("no frame captured within {0:?}")]
    Timeout(Duration),

    /// The server was stopped before a frame was captured.
    #[error("stopped before a frame was captured")]
    Stopped,

    #[error("worker task failed: {0}")]
    Join(#[from] JoinError),

    #[error("output error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

// ── CaptureServer ────────────────────────────────────────────────

pub struct CaptureServer {
    config: ServerConfig,
    notifier: Arc<FrameNotifier>,
}

impl CaptureServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            notifier: Arc::new(FrameNotifier::new()),
        }
    }

    /// Handle that stops the server from another task.
    pub fn stop_handle(&self) -> Arc<FrameNotifier> {
        Arc::clone(&self.notifier)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Properties of the configured display.
    pub fn display_info(&self) -> Result<DisplayInfo, ServerError> {
        let provider = open_provider(&self.config).map_err(StreamError::from)?;
        Ok(provider.display_info().map_err(StreamError::from)?)
    }

    /// Display information as pretty JSON.
    pub fn display_info_json(&self) -> Result<String, ServerError> {
        Ok(serde_json::to_string_pretty(&self.display_info()?)?)
    }

    /// Capture and encode a single frame, returning the JPEG bytes.
    pub async fn grab_frame(&self, timeout: Duration) -> Result<Vec<u8>, ServerError> {
        let config = self.config.clone();
        let notifier = Arc::clone(&self.notifier);

        let mut handle = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ServerError> {
            let (_, provider) = prepare(&config, &notifier)?;
            let mut pipeline = FramePipeline::new(
                provider,
                ImageJpegCompressor::new(config.encoder.color),
                notifier,
                config.pipeline_options(),
            );
            match pipeline.next_encoded_frame().map_err(StreamError::from)? {
                Some(_) => Ok(pipeline.last_encoded().to_vec()),
                None => Err(ServerError::Stopped),
            }
        });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                self.notifier.stop();
                let _ = handle.await;
                Err(ServerError::Timeout(timeout))
            }
        }
    }

    /// Serve clients until stopped or a fatal error occurs.
    pub async fn serve(&self) -> Result<(), ServerError> {
        let config = self.config.clone();
        let notifier = Arc::clone(&self.notifier);

        tokio::task::spawn_blocking(move || -> Result<(), ServerError> {
            let endpoint = Endpoint::parse(&config.network.endpoint)?;
            let (projection, provider) = prepare(&config, &notifier)?;
            let banner = Banner::new(&projection, std::process::id(), provider.quirks());
            let socket = ServerSocket::bind(&endpoint)?;

            let pipeline = FramePipeline::new(
                provider,
                ImageJpegCompressor::new(config.encoder.color),
                Arc::clone(&notifier),
                config.pipeline_options(),
            );
            let mut session = SessionLoop::new(socket, pipeline, banner, config.network.mode);
            let result = session.run();

            let stats = session.pipeline().stats();
            info!(
                "served {} client(s): {} frames sent, {} skipped, {} throttled, {} buffer allocation(s)",
                session.clients(),
                stats.encoded,
                stats.skipped,
                stats.throttled,
                session.pipeline().allocations()
            );
            // Stop the provider's producer thread on every exit path.
            notifier.stop();
            Ok(result?)
        })
        .await?
    }
}

// ── Setup ────────────────────────────────────────────────────────

/// Instantiate the configured provider.
fn open_provider(config: &ServerConfig) -> CaptureResult<DynProvider> {
    let capture = &config.capture;
    match capture.provider {
        ProviderKind::Pattern => {
            let display = DisplayInfo {
                width: capture.pattern_width,
                height: capture.pattern_height,
                fps: capture.source_fps,
                ..DisplayInfo::default()
            };
            Ok(Box::new(PatternProvider::new(display, capture.source_fps)))
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        ProviderKind::Framebuffer => Ok(Box::new(capstream_core::FramebufferProvider::open(
            capture.display,
            capture.source_fps,
        )?)),
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        ProviderKind::Framebuffer => Err(capstream_core::CaptureError::Setup(
            "framebuffer capture is only available on Linux and Android".into(),
        )),
    }
}

/// Projection from the configured string, or the display itself when
/// none is configured.
pub fn resolve_projection(spec: &str, display: &DisplayInfo) -> Result<Projection, ProjectionError> {
    if spec.trim().is_empty() {
        return Projection::from_display(display).validated();
    }
    let mut projection = spec.trim().parse::<Projection>()?;
    projection.normalize();
    projection.validated()
}

/// Open and configure the provider, starting frame production.
fn prepare(
    config: &ServerConfig,
    notifier: &Arc<FrameNotifier>,
) -> Result<(Projection, DynProvider), StreamError> {
    let mut provider = open_provider(config)?;
    let display = provider.display_info()?;
    let projection = resolve_projection(&config.capture.projection, &display)?;
    info!("projection {}", projection);

    if config.capture.provider == ProviderKind::Framebuffer && projection.rotation.is_sideways() {
        warn!("framebuffer capture does not rotate output");
    }

    provider.set_real_info(projection.real_info())?;
    provider.set_desired_info(projection.desired_info())?;
    provider.apply_config_changes(Arc::clone(notifier))?;
    Ok((projection, provider))
}

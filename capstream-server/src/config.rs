//! Configuration for the capture server.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use capstream_core::{ColorMode, DEFAULT_ENDPOINT, PipelineOptions, SessionMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Capture source and frame policy.
    pub capture: CaptureConfig,
    /// JPEG settings.
    pub encoder: EncoderConfig,
    /// Listening endpoint and delivery mode.
    pub network: NetworkConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Which capture provider to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Synthetic moving test pattern.
    #[default]
    Pattern,
    /// Linux framebuffer device.
    Framebuffer,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Display id (framebuffer index for the framebuffer provider).
    pub display: u32,
    /// Projection `<w>x<h>@<w>x<h>/<rot>`. Empty: capture the display as is.
    pub projection: String,
    pub provider: ProviderKind,
    /// Maximum frames per second sent to a client; 0 = unlimited.
    pub frame_rate: f32,
    /// Drop all but the freshest pending frame.
    pub skip_frames: bool,
    /// Rate at which the provider produces frames.
    pub source_fps: f32,
    /// Display size reported by the pattern provider.
    pub pattern_width: u32,
    pub pattern_height: u32,
}

/// Encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// JPEG quality, 0..=100.
    pub quality: u8,
    /// Output colour: "color" or "gray".
    pub color: ColorMode,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `abstract:<name>`, `unix:<path>`, `tcp:<host:port>` or `<host:port>`.
    pub endpoint: String,
    /// "push" or "request".
    pub mode: SessionMode,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display: 0,
            projection: String::new(),
            provider: ProviderKind::default(),
            frame_rate: 0.0,
            skip_frames: false,
            source_fps: 30.0,
            pattern_width: 1080,
            pattern_height: 1920,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: capstream_core::pipeline::DEFAULT_QUALITY,
            color: ColorMode::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            mode: SessionMode::Push,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Overrides ────────────────────────────────────────────────────

/// Values given on the command line; `None`/`false` keeps the config.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub display: Option<u32>,
    pub endpoint: Option<String>,
    pub projection: Option<String>,
    pub quality: Option<u8>,
    pub frame_rate: Option<f32>,
    pub skip_frames: bool,
    pub request_mode: bool,
    pub provider: Option<ProviderKind>,
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed
    /// one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply command-line values on top of the file configuration.
    pub fn apply(&mut self, o: &Overrides) {
        if let Some(display) = o.display {
            self.capture.display = display;
        }
        if let Some(endpoint) = &o.endpoint {
            self.network.endpoint = endpoint.clone();
        }
        if let Some(projection) = &o.projection {
            self.capture.projection = projection.clone();
        }
        if let Some(quality) = o.quality {
            self.encoder.quality = quality;
        }
        if let Some(rate) = o.frame_rate {
            self.capture.frame_rate = rate;
        }
        if o.skip_frames {
            self.capture.skip_frames = true;
        }
        if o.request_mode {
            self.network.mode = SessionMode::Request;
        }
        if let Some(provider) = o.provider {
            self.capture.provider = provider;
        }
    }

    /// Frame policy for the pipeline.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            quality: self.encoder.quality.min(100),
            skip_frames: self.capture.skip_frames,
            min_frame_interval: None,
        }
        .with_frame_rate(self.capture.frame_rate)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        assert!(text.contains("endpoint = \"abstract:minicap\""));
        assert!(text.contains("quality = 80"));
        assert!(text.contains("color = \"color\""));
        assert!(text.contains("mode = \"push\""));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.encoder.quality, 80);
        assert_eq!(parsed.capture.provider, ProviderKind::Pattern);
        assert_eq!(parsed.network.mode, SessionMode::Push);
        assert!(parsed.capture.projection.is_empty());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: ServerConfig = toml::from_str(
            r#"
            [capture]
            provider = "framebuffer"
            skip_frames = true

            [network]
            mode = "request"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.capture.provider, ProviderKind::Framebuffer);
        assert!(parsed.capture.skip_frames);
        assert_eq!(parsed.capture.source_fps, 30.0);
        assert_eq!(parsed.network.mode, SessionMode::Request);
        assert_eq!(parsed.network.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("capstream-no-such-config.toml");
        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.network.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn load_malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("capstream-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[encoder]\nquality = \"high\"\n").unwrap();
        let result = ServerConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn overrides_win_over_file() {
        let mut cfg = ServerConfig::default();
        cfg.capture.skip_frames = true;
        cfg.apply(&Overrides {
            endpoint: Some("tcp:127.0.0.1:1313".into()),
            projection: Some("1080x1920@720x1280/0".into()),
            quality: Some(55),
            request_mode: true,
            ..Overrides::default()
        });
        assert_eq!(cfg.network.endpoint, "tcp:127.0.0.1:1313");
        assert_eq!(cfg.capture.projection, "1080x1920@720x1280/0");
        assert_eq!(cfg.encoder.quality, 55);
        assert_eq!(cfg.network.mode, SessionMode::Request);
        // Absent flags leave file values alone.
        assert!(cfg.capture.skip_frames);
    }

    #[test]
    fn pipeline_options_from_config() {
        let mut cfg = ServerConfig::default();
        cfg.capture.frame_rate = 10.0;
        cfg.encoder.quality = 200;
        let options = cfg.pipeline_options();
        assert_eq!(options.quality, 100);
        let interval = options.min_frame_interval.unwrap();
        assert!((interval.as_secs_f64() - 0.1).abs() < 1e-6);

        cfg.capture.frame_rate = 0.0;
        assert!(cfg.pipeline_options().min_frame_interval.is_none());
    }
}

//! capstream-server entry point.
//!
//! ```text
//! capstream-server                      Serve on abstract:minicap
//! capstream-server -P 1080x1920@720x1280/0 -S
//! capstream-server -n tcp:127.0.0.1:1313 -R
//! capstream-server -s > frame.jpg       Single screenshot
//! capstream-server -i                   Display info as JSON
//! capstream-server --config <path>      Load a custom config TOML
//! capstream-server --gen-config         Write default config to stdout
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use capstream_server::config::{Overrides, ProviderKind, ServerConfig};
use capstream_server::service::{CaptureServer, ServerError};

/// How long single-frame modes wait for the provider.
const GRAB_TIMEOUT: Duration = Duration::from_secs(10);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "capstream-server", version, about = "Stream JPEG screen frames over a socket")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "capstream.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Display id.
    #[arg(short, long)]
    display: Option<u32>,

    /// Listening endpoint (abstract:<name>, unix:<path>, tcp:<host:port>).
    #[arg(short = 'n', long = "name")]
    endpoint: Option<String>,

    /// Projection <w>x<h>@<w>x<h>/{0|90|180|270}.
    #[arg(short = 'P', long)]
    projection: Option<String>,

    /// JPEG quality.
    #[arg(short = 'Q', long, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// Maximum frames per second.
    #[arg(short = 'r', long)]
    frame_rate: Option<f32>,

    /// Skip pending frames and send only the freshest.
    #[arg(short = 'S', long)]
    skip_frames: bool,

    /// Answer `c <w> <h> <q>` requests instead of pushing frames.
    #[arg(short = 'R', long)]
    request_mode: bool,

    /// Write one JPEG to stdout and exit.
    #[arg(short = 's', long)]
    screenshot: bool,

    /// Print display information as JSON and exit.
    #[arg(short = 'i', long)]
    info: bool,

    /// Capture one frame and exit with its status.
    #[arg(short = 't', long)]
    test: bool,

    /// Capture provider.
    #[arg(long, value_enum)]
    provider: Option<ProviderKind>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            display: self.display,
            endpoint: self.endpoint.clone(),
            projection: self.projection.clone(),
            quality: self.quality,
            frame_rate: self.frame_rate,
            skip_frames: self.skip_frames,
            request_mode: self.request_mode,
            provider: self.provider,
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            e.print().ok();
            return code;
        }
    };

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        return match toml::to_string_pretty(&ServerConfig::default()) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to render default config: {e}");
                ExitCode::FAILURE
            }
        };
    }

    // Load config, then let flags override it. Logging is not up yet,
    // so a broken file is reported on stderr directly.
    let mut config = match ServerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("capstream-server: {e}");
            return ExitCode::FAILURE;
        }
    };
    config.apply(&cli.overrides());

    // Init tracing. stdout carries screenshots and JSON.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("capstream-server v{}", env!("CARGO_PKG_VERSION"));
    if cli.config.exists() {
        info!("config: {}", cli.config.display());
    } else {
        info!("no config at {}; using defaults", cli.config.display());
    }

    let server = CaptureServer::new(config);
    let result = if cli.info {
        print_info(&server)
    } else if cli.test {
        server.grab_frame(GRAB_TIMEOUT).await.map(|jpeg| {
            info!("test capture ok: {} bytes", jpeg.len());
        })
    } else if cli.screenshot {
        screenshot(&server).await
    } else {
        serve(&server).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn print_info(server: &CaptureServer) -> Result<(), ServerError> {
    let json = server.display_info_json()?;
    println!("{json}");
    Ok(())
}

async fn screenshot(server: &CaptureServer) -> Result<(), ServerError> {
    let jpeg = server.grab_frame(GRAB_TIMEOUT).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&jpeg)?;
    stdout.flush()?;
    Ok(())
}

async fn serve(server: &CaptureServer) -> Result<(), ServerError> {
    let config = server.config();
    info!("endpoint: {}", config.network.endpoint);
    info!("provider: {:?}", config.capture.provider);
    info!("mode: {:?}", config.network.mode);
    info!("quality: {}", config.encoder.quality);

    // Ctrl-C handler.
    let stop = server.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.stop();
    });

    server.serve().await
}

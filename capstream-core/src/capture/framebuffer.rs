//! Linux framebuffer capture provider.
//!
//! Reads the visible page of `/dev/graphics/fbN` (Android layout) or
//! `/dev/fbN` on every consume, then scales it nearest-neighbour to the
//! desired geometry. Geometry comes from sysfs:
//!
//! ```text
//! /sys/class/graphics/fbN/modes            "U:1080x1920p-60"  (visible size)
//! /sys/class/graphics/fbN/virtual_size     "1080,3840"        (all pages)
//! /sys/class/graphics/fbN/bits_per_pixel   "32"
//! /sys/class/graphics/fbN/stride           "4352"             (bytes, optional)
//! ```
//!
//! Without a mode line the visible height is guessed from a
//! double-buffered portrait `virtual_size`.
//!
//! fbdev has no vsync notification, so frames are announced at a fixed
//! rate and may tear. Rotation is not applied.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::capture::producer::Producer;
use crate::capture::{
    CaptureProvider, CaptureResult, DisplayInfo, Frame, PixelFormat, check_geometry,
};
use crate::error::CaptureError;
use crate::notifier::FrameNotifier;
use crate::protocol::Quirks;

const SYSFS_ROOT: &str = "/sys/class/graphics";
const DEFAULT_FPS: f32 = 30.0;

// ── Geometry ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FbGeometry {
    width: u32,
    height: u32,
    /// Bytes per row.
    line_length: u32,
    format: PixelFormat,
}

impl FbGeometry {
    fn source_bpp(&self) -> u32 {
        self.format.bytes_per_pixel().unwrap_or(0)
    }

    fn page_len(&self) -> usize {
        self.line_length as usize * self.height as usize
    }

    /// Format handed to the encoder. 16-bit sources are widened.
    fn output_format(&self) -> PixelFormat {
        match self.format {
            PixelFormat::Rgb565 => PixelFormat::Rgb888,
            other => other,
        }
    }
}

fn format_for_depth(bits: u32) -> CaptureResult<PixelFormat> {
    match bits {
        32 => Ok(PixelFormat::Bgra8888),
        24 => Ok(PixelFormat::Rgb888),
        16 => Ok(PixelFormat::Rgb565),
        other => Err(CaptureError::UnsupportedFormat(format!(
            "{other} bits per pixel"
        ))),
    }
}

fn read_sysfs(dir: &Path, name: &str) -> CaptureResult<String> {
    let path = dir.join(name);
    fs::read_to_string(&path)
        .map(|s| s.trim().to_owned())
        .map_err(|e| CaptureError::Setup(format!("{}: {e}", path.display())))
}

fn parse_number(text: &str, what: &str) -> CaptureResult<u32> {
    text.trim()
        .parse()
        .map_err(|_| CaptureError::Setup(format!("bad {what}: {text:?}")))
}

/// Visible resolution from the first line of `modes`, e.g.
/// `U:1080x1920p-60` or `S:1920x1080i`.
fn parse_mode(modes: &str) -> Option<(u32, u32)> {
    let line = modes.lines().next()?.trim();
    let (_, mode) = line.split_once(':')?;
    let (w, rest) = mode.split_once('x')?;
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .map_or(rest, |end| &rest[..end]);
    match (w.parse().ok()?, digits.parse().ok()?) {
        (0, _) | (_, 0) => None,
        size => Some(size),
    }
}

/// Parse the sysfs attributes of one framebuffer.
fn parse_geometry(
    modes: Option<&str>,
    virtual_size: &str,
    bits_per_pixel: &str,
    stride: Option<&str>,
) -> CaptureResult<FbGeometry> {
    let (w, h) = virtual_size
        .split_once(',')
        .ok_or_else(|| CaptureError::Setup(format!("bad virtual_size: {virtual_size:?}")))?;
    let virtual_width = parse_number(w, "width")?;
    // virtual_size covers every page; the visible page is the first.
    let virtual_height = parse_number(h, "height")?;
    let visible = modes.and_then(parse_mode);
    let width = visible.map_or(virtual_width, |(w, _)| w.min(virtual_width));
    let format = format_for_depth(parse_number(bits_per_pixel, "bits_per_pixel")?)?;
    let bpp = format.bytes_per_pixel().unwrap_or(0);

    let min_line = width * bpp;
    let line_length = match stride.map(|s| parse_number(s, "stride")).transpose()? {
        Some(s) if s >= min_line => s,
        _ => min_line,
    };

    let height = match visible {
        Some((_, h)) => h.min(virtual_height),
        None if virtual_height % 2 == 0 && virtual_height > 2 * width => virtual_height / 2,
        None => virtual_height,
    };

    Ok(FbGeometry {
        width,
        height,
        line_length,
        format,
    })
}

// ── Scaling ──────────────────────────────────────────────────────

fn widen_565(px: u16) -> [u8; 3] {
    let r = ((px >> 11) & 0x1f) as u8;
    let g = ((px >> 5) & 0x3f) as u8;
    let b = (px & 0x1f) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

/// Nearest-neighbour copy of `src` into a tightly packed `dst`.
fn scale_into(src: &[u8], geo: &FbGeometry, dst: &mut [u8], width: u32, height: u32) {
    let src_bpp = geo.source_bpp() as usize;
    let dst_bpp = geo.output_format().bytes_per_pixel().unwrap_or(0) as usize;
    let line = geo.line_length as usize;

    for (y, out_row) in dst
        .chunks_exact_mut(width as usize * dst_bpp)
        .take(height as usize)
        .enumerate()
    {
        let sy = (y as u64 * geo.height as u64 / height as u64) as usize;
        let row = &src[sy * line..];
        for (x, out) in out_row.chunks_exact_mut(dst_bpp).enumerate() {
            let sx = (x as u64 * geo.width as u64 / width as u64) as usize;
            let px = &row[sx * src_bpp..sx * src_bpp + src_bpp];
            if geo.format == PixelFormat::Rgb565 {
                out.copy_from_slice(&widen_565(u16::from_le_bytes([px[0], px[1]])));
            } else {
                out.copy_from_slice(px);
            }
        }
    }
}

// ── FramebufferProvider ──────────────────────────────────────────

/// fbdev [`CaptureProvider`]. See the module docs.
pub struct FramebufferProvider {
    device: File,
    path: PathBuf,
    geometry: FbGeometry,
    fps: f32,
    real: Option<DisplayInfo>,
    desired: Option<DisplayInfo>,
    raw: Vec<u8>,
    scaled: Vec<u8>,
    width: u32,
    height: u32,
    consumed: bool,
    producer: Option<Producer>,
}

impl FramebufferProvider {
    /// Open framebuffer `index`, announcing frames at `fps`.
    pub fn open(index: u32, fps: f32) -> CaptureResult<Self> {
        let sysfs = PathBuf::from(SYSFS_ROOT).join(format!("fb{index}"));
        let stride = read_sysfs(&sysfs, "stride").ok();
        let modes = read_sysfs(&sysfs, "modes").ok();
        let geometry = parse_geometry(
            modes.as_deref(),
            &read_sysfs(&sysfs, "virtual_size")?,
            &read_sysfs(&sysfs, "bits_per_pixel")?,
            stride.as_deref(),
        )?;

        let candidates = [
            PathBuf::from(format!("/dev/graphics/fb{index}")),
            PathBuf::from(format!("/dev/fb{index}")),
        ];
        let mut last_err = None;
        for path in candidates {
            match File::open(&path) {
                Ok(device) => {
                    info!(
                        "framebuffer {} {}x{} {:?} line {} bytes",
                        path.display(),
                        geometry.width,
                        geometry.height,
                        geometry.format,
                        geometry.line_length
                    );
                    return Ok(Self {
                        device,
                        path,
                        geometry,
                        fps: if fps > 0.0 { fps } else { DEFAULT_FPS },
                        real: None,
                        desired: None,
                        raw: Vec::new(),
                        scaled: Vec::new(),
                        width: 0,
                        height: 0,
                        consumed: false,
                        producer: None,
                    });
                }
                Err(e) => {
                    debug!("cannot open {}: {}", path.display(), e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map_or_else(
            || CaptureError::Setup(format!("no device for fb{index}")),
            CaptureError::Io,
        ))
    }
}

impl CaptureProvider for FramebufferProvider {
    fn display_info(&self) -> CaptureResult<DisplayInfo> {
        Ok(DisplayInfo {
            width: self.geometry.width,
            height: self.geometry.height,
            fps: self.fps,
            ..DisplayInfo::default()
        })
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

        self.producer = None;
        self.release_consumed_frame();

        let out_bpp = self.geometry.output_format().bytes_per_pixel().unwrap_or(0);
        self.width = desired.width;
        self.height = desired.height;
        self.raw = vec![0; self.geometry.page_len()];
        self.scaled = vec![0; (desired.width * out_bpp) as usize * desired.height as usize];

        info!(
            "framebuffer capture {} {}x{} -> {}x{}",
            self.path.display(),
            self.geometry.width,
            self.geometry.height,
            self.width,
            self.height
        );

        let interval = Duration::try_from_secs_f32(1.0 / self.fps)
            .map_err(|_| CaptureError::Setup(format!("unusable frame rate {}", self.fps)))?;
        self.producer = Some(Producer::spawn("fb-producer", interval, notifier)?);
        Ok(())
    }

    fn consume_pending_frame(&mut self) -> CaptureResult<()> {
        if self.raw.is_empty() {
            return Err(CaptureError::NotConfigured);
        }
        if self.consumed {
            return Err(CaptureError::AlreadyConsumed);
        }
        match self.device.read_exact_at(&mut self.raw, 0) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Err(CaptureError::Interrupted),
            Err(e) => return Err(CaptureError::Io(e)),
        }
        scale_into(
            &self.raw,
            &self.geometry,
            &mut self.scaled,
            self.width,
            self.height,
        );
        self.consumed = true;
        Ok(())
    }

    fn consumed_frame(&self) -> Option<Frame<'_>> {
        let format = self.geometry.output_format();
        self.consumed.then(|| Frame {
            data: &self.scaled,
            width: self.width,
            height: self.height,
            stride: self.width,
            bpp: format.bytes_per_pixel().unwrap_or(0),
            format,
        })
    }

    fn release_consumed_frame(&mut self) {
        self.consumed = false;
    }

    fn quirks(&self) -> Quirks {
        Quirks::DUMB | Quirks::TEAR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sysfs_geometry() {
        let geo = parse_geometry(None, "1080,3840", "32\n", Some("4352")).unwrap();
        assert_eq!((geo.width, geo.height), (1080, 1920));
        assert_eq!(geo.line_length, 4352);
        assert_eq!(geo.format, PixelFormat::Bgra8888);
    }

    #[test]
    fn single_page_and_missing_stride() {
        let geo = parse_geometry(None, "800,600", "16", None).unwrap();
        assert_eq!((geo.width, geo.height), (800, 600));
        assert_eq!(geo.line_length, 1600);
        assert_eq!(geo.output_format(), PixelFormat::Rgb888);
    }

    #[test]
    fn rejects_unknown_depth() {
        assert!(matches!(
            parse_geometry(None, "800,600", "8", None),
            Err(CaptureError::UnsupportedFormat(_))
        ));
        assert!(parse_geometry(None, "800x600", "32", None).is_err());
    }

    #[test]
    fn mode_line_gives_visible_size() {
        assert_eq!(parse_mode("U:1080x1920p-60\n"), Some((1080, 1920)));
        assert_eq!(parse_mode("S:1920x1080i\nU:1280x720p-60\n"), Some((1920, 1080)));
        assert_eq!(parse_mode("U:0x1080p-60"), None);
        assert_eq!(parse_mode(""), None);
    }

    #[test]
    fn landscape_double_buffer_uses_mode() {
        let geo = parse_geometry(Some("U:1920x1080p-60"), "1920,2160", "32", None).unwrap();
        assert_eq!((geo.width, geo.height), (1920, 1080));
        assert_eq!(geo.page_len(), 1920 * 4 * 1080);

        // Without a mode line the landscape pages cannot be told apart.
        let geo = parse_geometry(None, "1920,2160", "32", None).unwrap();
        assert_eq!(geo.height, 2160);
    }

    #[test]
    fn widens_565() {
        assert_eq!(widen_565(0xffff), [0xff, 0xff, 0xff]);
        assert_eq!(widen_565(0xf800), [0xff, 0, 0]);
        assert_eq!(widen_565(0x07e0), [0, 0xff, 0]);
    }

    #[test]
    fn scales_down_nearest() {
        let geo = FbGeometry {
            width: 4,
            height: 2,
            line_length: 16,
            format: PixelFormat::Bgra8888,
        };
        let src: Vec<u8> = (0..32).collect();
        let mut dst = vec![0u8; 2 * 4];
        scale_into(&src, &geo, &mut dst, 2, 1);
        assert_eq!(dst, vec![0, 1, 2, 3, 8, 9, 10, 11]);
    }
}

//! Wire protocol: connection banner, frame framing, request commands.
//!
//! ## Banner (24 bytes, little-endian)
//! ```text
//! version:         u8   (1)
//! banner_size:     u8   (1)   always 24
//! pid:             u32  (4)
//! real_width:      u32  (4)
//! real_height:     u32  (4)
//! virtual_width:   u32  (4)
//! virtual_height:  u32  (4)
//! orientation:     u8   (1)   rotation code 0..3
//! quirks:          u8   (1)
//! ```
//!
//! ## Frame
//! ```text
//! length:  u32 LE (4)
//! jpeg:    [u8]   (length)
//! ```
//!
//! ## Request mode
//! The client sends `c <width> <height> <quality>\n` and receives one
//! frame per line.

use bitflags::bitflags;

use crate::error::ProtocolError;
use crate::projection::{Projection, Rotation};

/// Protocol version written in the banner.
pub const BANNER_VERSION: u8 = 1;

/// Size of the banner on the wire.
pub const BANNER_SIZE: usize = 24;

/// Size of the per-frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

// ── Quirks ───────────────────────────────────────────────────────

bitflags! {
    /// Capture-method limitations advertised to the client.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Quirks: u8 {
        /// Frames are whole-screen polls; no partial updates.
        const DUMB = 0x01;
        /// Output is upright regardless of the requested rotation.
        const ALWAYS_UPRIGHT = 0x02;
        /// Frames may tear.
        const TEAR = 0x04;
    }
}

// ── Banner ───────────────────────────────────────────────────────

/// The fixed header sent once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Banner {
    pub version: u8,
    pub pid: u32,
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub orientation: Rotation,
    pub quirks: Quirks,
}

impl Banner {
    /// Banner describing `projection` for process `pid`.
    pub fn new(projection: &Projection, pid: u32, quirks: Quirks) -> Self {
        Self {
            version: BANNER_VERSION,
            pid,
            real_width: projection.real_width,
            real_height: projection.real_height,
            virtual_width: projection.virtual_width,
            virtual_height: projection.virtual_height,
            orientation: projection.rotation,
            quirks,
        }
    }

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; BANNER_SIZE] {
        let mut buf = [0u8; BANNER_SIZE];
        buf[0] = self.version;
        buf[1] = BANNER_SIZE as u8;
        buf[2..6].copy_from_slice(&self.pid.to_le_bytes());
        buf[6..10].copy_from_slice(&self.real_width.to_le_bytes());
        buf[10..14].copy_from_slice(&self.real_height.to_le_bytes());
        buf[14..18].copy_from_slice(&self.virtual_width.to_le_bytes());
        buf[18..22].copy_from_slice(&self.virtual_height.to_le_bytes());
        buf[22] = self.orientation.code();
        buf[23] = self.quirks.bits();
        buf
    }

    /// Deserialize from bytes. Unknown quirk bits are dropped.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 2 {
            return Err(ProtocolError::Truncated {
                what: "banner",
                expected: BANNER_SIZE,
                actual: data.len(),
            });
        }
        if data[0] != BANNER_VERSION {
            return Err(ProtocolError::UnsupportedVersion(data[0]));
        }
        if data[1] as usize != BANNER_SIZE {
            return Err(ProtocolError::InvalidBannerSize(data[1]));
        }
        if data.len() < BANNER_SIZE {
            return Err(ProtocolError::Truncated {
                what: "banner",
                expected: BANNER_SIZE,
                actual: data.len(),
            });
        }

        let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        let orientation = Rotation::from_code(data[22]).ok_or_else(|| {
            ProtocolError::InvalidRequest(format!("bad orientation code {}", data[22]))
        })?;

        Ok(Self {
            version: data[0],
            pid: u32_at(2),
            real_width: u32_at(6),
            real_height: u32_at(10),
            virtual_width: u32_at(14),
            virtual_height: u32_at(18),
            orientation,
            quirks: Quirks::from_bits_truncate(data[23]),
        })
    }
}

// ── Request mode ─────────────────────────────────────────────────

/// One capture request: output bounds and JPEG quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

/// A parsed request-mode line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `c <width> <height> <quality>`
    Capture(CaptureRequest),
    /// Blank line.
    Empty,
    /// Any other leading character; ignored by the server.
    Unknown(String),
}

impl Command {
    /// Parse a single line, with or without its trailing newline.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let Some(first) = line.chars().next() else {
            return Ok(Command::Empty);
        };
        if first != 'c' {
            return Ok(Command::Unknown(line.to_owned()));
        }
        CaptureRequest::parse(line).map(Command::Capture)
    }
}

impl CaptureRequest {
    /// Parse `c <width> <height> <quality>`. Quality is clamped to 1..=100.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("c") {
            return Err(ProtocolError::InvalidRequest(line.to_owned()));
        }

        let mut field = |name: &str| -> Result<u32, ProtocolError> {
            parts
                .next()
                .ok_or_else(|| ProtocolError::InvalidRequest(format!("missing {name}")))?
                .parse::<u32>()
                .map_err(|_| ProtocolError::InvalidRequest(format!("bad {name} in {line:?}")))
        };
        let width = field("width")?;
        let height = field("height")?;
        let quality = field("quality")?;

        if parts.next().is_some() {
            return Err(ProtocolError::InvalidRequest(format!(
                "trailing data in {line:?}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(ProtocolError::InvalidRequest(format!(
                "empty size {width}x{height}"
            )));
        }

        Ok(Self {
            width,
            height,
            quality: quality.clamp(1, 100) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Banner {
        Banner {
            version: BANNER_VERSION,
            pid: 1234,
            real_width: 1080,
            real_height: 1920,
            virtual_width: 720,
            virtual_height: 1280,
            orientation: Rotation::Deg0,
            quirks: Quirks::empty(),
        }
    }

    #[test]
    fn banner_layout() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), 24);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 24);
        assert_eq!(&bytes[2..6], &1234u32.to_le_bytes());
        assert_eq!(&bytes[6..10], &1080u32.to_le_bytes());
        assert_eq!(&bytes[10..14], &1920u32.to_le_bytes());
        assert_eq!(&bytes[14..18], &720u32.to_le_bytes());
        assert_eq!(&bytes[18..22], &1280u32.to_le_bytes());
        assert_eq!(bytes[22], 0);
        assert_eq!(bytes[23], 0);
    }

    #[test]
    fn banner_decode_matches_encode() {
        let banner = Banner {
            orientation: Rotation::Deg270,
            quirks: Quirks::DUMB | Quirks::TEAR,
            ..sample()
        };
        let bytes = banner.encode();
        assert_eq!(bytes[22], 3);
        assert_eq!(bytes[23], 0b101);
        assert_eq!(Banner::decode(&bytes).unwrap(), banner);
    }

    #[test]
    fn banner_decode_rejects_bad_header() {
        let mut bytes = sample().encode();
        bytes[1] = 32;
        assert!(matches!(
            Banner::decode(&bytes),
            Err(ProtocolError::InvalidBannerSize(32))
        ));
        bytes[0] = 2;
        assert!(matches!(
            Banner::decode(&bytes),
            Err(ProtocolError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            Banner::decode(&sample().encode()[..10]),
            Err(ProtocolError::Truncated { actual: 10, .. })
        ));
    }

    #[test]
    fn banner_from_projection() {
        let p: Projection = "1080x1920@720x1280/1".parse().unwrap();
        let banner = Banner::new(&p, 7, Quirks::ALWAYS_UPRIGHT);
        assert_eq!(banner.virtual_width, 720);
        assert_eq!(banner.orientation, Rotation::Deg90);
        assert_eq!(banner.encode()[23], 2);
    }

    #[test]
    fn parses_capture_request() {
        assert_eq!(
            Command::parse("c 720 1280 80\n").unwrap(),
            Command::Capture(CaptureRequest {
                width: 720,
                height: 1280,
                quality: 80,
            })
        );
        let req = CaptureRequest::parse("c 10 10 250").unwrap();
        assert_eq!(req.quality, 100);
        let req = CaptureRequest::parse("c 10 10 0").unwrap();
        assert_eq!(req.quality, 1);
    }

    #[test]
    fn other_lines_are_not_requests() {
        assert_eq!(Command::parse("\n").unwrap(), Command::Empty);
        assert_eq!(
            Command::parse("x 1 2 3").unwrap(),
            Command::Unknown("x 1 2 3".into())
        );
    }

    #[test]
    fn malformed_requests() {
        assert!(Command::parse("c 720").is_err());
        assert!(Command::parse("c 720 abc 80").is_err());
        assert!(Command::parse("c 720 1280 80 9").is_err());
        assert!(Command::parse("c 0 1280 80").is_err());
        assert!(Command::parse("capture 1 2 3").is_err());
    }
}

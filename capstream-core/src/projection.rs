//! Display projection: `<realW>x<realH>@<virtualW>x<virtualH>/<rotation>`.
//!
//! A [`Projection`] maps the device's real display resolution to the
//! requested output resolution and rotation. It is parsed once from the
//! command line, normalised with [`force_maximum_size`] and
//! [`force_aspect_ratio`], validated, and then stays fixed for the
//! lifetime of a capture session.
//!
//! The parser is a byte-level state machine. It never backtracks: any
//! byte outside the class expected by the current state fails the parse,
//! and the input must end exactly on the `Satisfied` state.
//!
//! [`force_maximum_size`]: Projection::force_maximum_size
//! [`force_aspect_ratio`]: Projection::force_aspect_ratio

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::capture::DisplayInfo;
use crate::error::ProjectionError;

/// Largest supported dimension on either axis.
pub const MAX_WIDTH: u32 = 10_000;
/// Largest supported dimension on either axis.
pub const MAX_HEIGHT: u32 = 10_000;

// ── Rotation ─────────────────────────────────────────────────────

/// Display rotation, stored on the wire as a code in `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Wire code (`0..=3`).
    pub const fn code(self) -> u8 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }

    /// Rotation from its wire code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Rotation::Deg0),
            1 => Some(Rotation::Deg90),
            2 => Some(Rotation::Deg180),
            3 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// Rotation in degrees.
    pub const fn degrees(self) -> u32 {
        self.code() as u32 * 90
    }

    /// Whether width and height swap under this rotation.
    pub const fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl From<Rotation> for u32 {
    fn from(r: Rotation) -> u32 {
        r.degrees()
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(format!("invalid rotation {other}, expected 0/90/180/270")),
        }
    }
}

// ── Projection ───────────────────────────────────────────────────

/// Real and virtual (output) geometry plus rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Projection {
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub rotation: Rotation,
}

impl Projection {
    /// Parse a projection string. See the module docs for the grammar.
    pub fn parse(input: &[u8]) -> Result<Self, ProjectionError> {
        let mut proj = Projection::default();
        let mut parser = Parser::new();
        parser.feed(&mut proj, input)?;
        parser.finish()?;
        Ok(proj)
    }

    /// Identity projection for a display: output equals input.
    pub fn from_display(info: &DisplayInfo) -> Self {
        Self {
            real_width: info.width,
            real_height: info.height,
            virtual_width: info.width,
            virtual_height: info.height,
            rotation: info.orientation,
        }
    }

    /// Clamp the virtual size so it never exceeds the real size.
    pub fn force_maximum_size(&mut self) {
        if self.virtual_width > self.real_width {
            self.virtual_width = self.real_width;
        }

        if self.virtual_height > self.real_height {
            self.virtual_height = self.real_height;
        }
    }

    /// Make the virtual size follow the real aspect ratio.
    ///
    /// Exactly one virtual dimension is recomputed: the height when it
    /// is taller than the width implies (compared after truncation),
    /// otherwise the width. The untouched dimension is authoritative.
    pub fn force_aspect_ratio(&mut self) {
        if self.real_width == 0 || self.real_height == 0 {
            return;
        }

        let aspect = self.real_width as f64 / self.real_height as f64;
        let implied_height = self.virtual_width as f64 / aspect;

        if self.virtual_height > implied_height as u32 {
            self.virtual_height = implied_height.round() as u32;
        } else {
            self.virtual_width = (self.virtual_height as f64 * aspect).round() as u32;
        }
    }

    /// Apply both normalisations in order.
    pub fn normalize(&mut self) {
        self.force_maximum_size();
        self.force_aspect_ratio();
    }

    /// All dimensions positive and virtual within real on both axes.
    pub fn valid(&self) -> bool {
        self.real_width > 0
            && self.real_height > 0
            && self.virtual_width > 0
            && self.virtual_height > 0
            && self.virtual_width <= self.real_width
            && self.virtual_height <= self.real_height
    }

    /// Validate, returning the projection back on success.
    pub fn validated(self) -> Result<Self, ProjectionError> {
        if self.valid() {
            Ok(self)
        } else {
            Err(ProjectionError::Invalid(self.to_string()))
        }
    }

    /// Geometry of the physical display, as handed to the provider.
    pub fn real_info(&self) -> DisplayInfo {
        DisplayInfo {
            width: self.real_width,
            height: self.real_height,
            orientation: self.rotation,
            ..DisplayInfo::default()
        }
    }

    /// Geometry of the requested output, as handed to the provider.
    pub fn desired_info(&self) -> DisplayInfo {
        DisplayInfo {
            width: self.virtual_width,
            height: self.virtual_height,
            orientation: self.rotation,
            ..DisplayInfo::default()
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}x{}/{}",
            self.real_width,
            self.real_height,
            self.virtual_width,
            self.virtual_height,
            self.rotation.code()
        )
    }
}

impl FromStr for Projection {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

// ── Parser ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RealWidthStart,
    RealWidthContinued,
    RealHeightStart,
    RealHeightContinued,
    VirtualWidthStart,
    VirtualWidthContinued,
    VirtualHeightStart,
    VirtualHeightContinued,
    RotationStart,
    Rotation90Second,
    Rotation180Second,
    Rotation180Third,
    Rotation270Second,
    Rotation270Third,
    Satisfied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    RealWidth,
    RealHeight,
    VirtualWidth,
    VirtualHeight,
}

/// Incremental projection parser.
struct Parser {
    state: State,
}

impl Parser {
    fn new() -> Self {
        Self {
            state: State::RealWidthStart,
        }
    }

    fn feed(&mut self, proj: &mut Projection, input: &[u8]) -> Result<(), ProjectionError> {
        for (offset, &byte) in input.iter().enumerate() {
            self.state = self.step(proj, byte).ok_or(ProjectionError::Malformed {
                offset,
                byte: byte as char,
            })?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), ProjectionError> {
        if self.state == State::Satisfied {
            Ok(())
        } else {
            Err(ProjectionError::Incomplete)
        }
    }

    /// Next state for `byte`, or `None` if the byte is not accepted.
    fn step(&self, proj: &mut Projection, byte: u8) -> Option<State> {
        use State::*;

        let next = match (self.state, byte) {
            (RealWidthStart, b'0'..=b'9') => {
                push_digit(proj, Field::RealWidth, byte);
                RealWidthContinued
            }
            (RealWidthContinued, b'0'..=b'9') => {
                push_digit(proj, Field::RealWidth, byte);
                RealWidthContinued
            }
            (RealWidthContinued, b'x') => RealHeightStart,

            (RealHeightStart | RealHeightContinued, b'0'..=b'9') => {
                push_digit(proj, Field::RealHeight, byte);
                RealHeightContinued
            }
            (RealHeightContinued, b'@') => VirtualWidthStart,

            (VirtualWidthStart | VirtualWidthContinued, b'0'..=b'9') => {
                push_digit(proj, Field::VirtualWidth, byte);
                VirtualWidthContinued
            }
            (VirtualWidthContinued, b'x') => VirtualHeightStart,

            (VirtualHeightStart | VirtualHeightContinued, b'0'..=b'9') => {
                push_digit(proj, Field::VirtualHeight, byte);
                VirtualHeightContinued
            }
            (VirtualHeightContinued, b'/') => RotationStart,

            (RotationStart, b'0') => {
                proj.rotation = Rotation::Deg0;
                Satisfied
            }
            (RotationStart, b'9') => Rotation90Second,
            (RotationStart, b'1') => Rotation180Second,
            (RotationStart, b'2') => Rotation270Second,
            (Rotation90Second, b'0') => {
                proj.rotation = Rotation::Deg90;
                Satisfied
            }
            (Rotation180Second, b'8') => Rotation180Third,
            (Rotation180Third, b'0') => {
                proj.rotation = Rotation::Deg180;
                Satisfied
            }
            (Rotation270Second, b'7') => Rotation270Third,
            (Rotation270Third, b'0') => {
                proj.rotation = Rotation::Deg270;
                Satisfied
            }

            _ => return None,
        };

        Some(next)
    }
}

// Wrapping arithmetic: overlong inputs produce garbage that `valid()`
// or the provider rejects, never a panic.
fn push_digit(proj: &mut Projection, field: Field, byte: u8) {
    let slot = match field {
        Field::RealWidth => &mut proj.real_width,
        Field::RealHeight => &mut proj.real_height,
        Field::VirtualWidth => &mut proj.virtual_width,
        Field::VirtualHeight => &mut proj.virtual_height,
    };
    *slot = slot.wrapping_mul(10).wrapping_add((byte - b'0') as u32);
}

// ── Tests ────────────────────────────────────────────────────────

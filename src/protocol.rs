//! Wire format of the display.
//!
//! The panel accepts a fire-and-forget stream of frames. Each frame is a 9-byte
//! region header followed by the pixels of that region:
//!
//! ```text
//! 0xA5 x0_hi x0_lo y0_hi y0_lo x1_hi x1_lo y1_hi y1_lo  [RGB565 BE] * area
//! ```
//!
//! Coordinates are big-endian 16-bit, bounds inclusive. Pixels are sent row-major,
//! two bytes each, big-endian `RRRRRGGGGGGBBBBB`. Nothing is ever read back, so the
//! codec is encode-only and knows nothing about the link or orientation.

use bytes::{BufMut, BytesMut};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// First byte of every region header.
pub const REGION_HEADER: u8 = 0xA5;

/// Length of the region header in bytes.
pub const HEADER_LEN: usize = 9;

/// Native panel width in pixels.
pub const DEFAULT_WIDTH: u16 = 160;

/// Native panel height in pixels.
pub const DEFAULT_HEIGHT: u16 = 80;

/// 16-bit RGB565 colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb565(pub u16);

impl Rgb565 {
    pub const BLACK: Rgb565 = Rgb565(0x0000);
    pub const WHITE: Rgb565 = Rgb565(0xFFFF);
    pub const RED: Rgb565 = Rgb565(0xF800);
    pub const GREEN: Rgb565 = Rgb565(0x07E0);
    pub const BLUE: Rgb565 = Rgb565(0x001F);
    pub const YELLOW: Rgb565 = Rgb565(0xFFE0);
    pub const CYAN: Rgb565 = Rgb565(0x07FF);
    pub const MAGENTA: Rgb565 = Rgb565(0xF81F);
    pub const ORANGE: Rgb565 = Rgb565(0xFD20);
    pub const DARK_GREEN: Rgb565 = Rgb565(0x0200);

    /// Packs an 8-bit-per-channel colour by truncating the low bits.
    pub const fn from_rgb888(r: u8, g: u8, b: u8) -> Self {
        Rgb565(((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3))
    }

    /// Raw 16-bit value.
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rgb565 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Error parsing a colour string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid colour '{0}': expected #RRGGBB or 0xNNNN")]
pub struct ParseColorError(String);

impl FromStr for Rgb565 {
    type Err = ParseColorError;

    /// Accepts `#RRGGBB` (converted from RGB888) or `0xNNNN` (raw RGB565).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ParseColorError(s.to_string());
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 {
                return Err(err());
            }
            let value = u32::from_str_radix(hex, 16).map_err(|_| err())?;
            let [_, r, g, b] = value.to_be_bytes();
            return Ok(Rgb565::from_rgb888(r, g, b));
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u16::from_str_radix(hex, 16).map(Rgb565).map_err(|_| err());
        }
        Err(err())
    }
}

/// Inclusive rectangle in panel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x0: u16,
    pub y0: u16,
    pub x1: u16,
    pub y1: u16,
}

impl Region {
    /// Builds the inclusive region covering a `w`×`h` rectangle at `(x, y)`.
    ///
    /// Only rejects empty rectangles and arithmetic overflow; panel bounds are
    /// checked by [`FrameCodec`].
    pub fn from_rect(x: u16, y: u16, w: u16, h: u16) -> Result<Self, ProtocolError> {
        if w == 0 || h == 0 {
            return Err(ProtocolError::EmptyRegion {
                width: w,
                height: h,
            });
        }
        let x1 = u32::from(x) + u32::from(w) - 1;
        let y1 = u32::from(y) + u32::from(h) - 1;
        match (u16::try_from(x1), u16::try_from(y1)) {
            (Ok(x1), Ok(y1)) => Ok(Self { x0: x, y0: y, x1, y1 }),
            _ => Err(ProtocolError::RegionOutOfBounds {
                x0: u32::from(x),
                y0: u32::from(y),
                x1,
                y1,
                width: u16::MAX,
                height: u16::MAX,
            }),
        }
    }

    pub fn width(&self) -> usize {
        usize::from(self.x1.saturating_sub(self.x0)) + 1
    }

    pub fn height(&self) -> usize {
        usize::from(self.y1.saturating_sub(self.y0)) + 1
    }

    /// Number of pixels in the region.
    pub fn area(&self) -> usize {
        self.width() * self.height()
    }
}

/// One logical operation on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameCommand {
    /// Select a region without sending pixels.
    SetRegion(Region),
    /// Select a region and stream its pixels, row-major.
    PixelData { region: Region, payload: Vec<Rgb565> },
}

impl FrameCommand {
    pub fn region(&self) -> &Region {
        match self {
            FrameCommand::SetRegion(region) => region,
            FrameCommand::PixelData { region, .. } => region,
        }
    }
}

/// Encoder for the panel's frame format, parameterised by panel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    width: u16,
    height: u16,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl FrameCodec {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Checks `0 <= x0 <= x1 < width` and `0 <= y0 <= y1 < height`.
    pub fn check_region(&self, region: &Region) -> Result<(), ProtocolError> {
        if region.x0 > region.x1
            || region.y0 > region.y1
            || region.x1 >= self.width
            || region.y1 >= self.height
        {
            return Err(ProtocolError::RegionOutOfBounds {
                x0: u32::from(region.x0),
                y0: u32::from(region.y0),
                x1: u32::from(region.x1),
                y1: u32::from(region.y1),
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Size in bytes of the encoded command.
    pub fn encoded_len(command: &FrameCommand) -> usize {
        match command {
            FrameCommand::SetRegion(_) => HEADER_LEN,
            FrameCommand::PixelData { payload, .. } => HEADER_LEN + payload.len() * 2,
        }
    }

    /// Appends the encoded command to `dst`.
    ///
    /// Nothing is written if the command violates the region or payload invariants.
    pub fn encode(&self, command: &FrameCommand, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let region = command.region();
        self.check_region(region)?;
        if let FrameCommand::PixelData { payload, .. } = command {
            if payload.len() != region.area() {
                return Err(ProtocolError::PayloadMismatch {
                    expected: region.area(),
                    actual: payload.len(),
                });
            }
        }

        dst.reserve(Self::encoded_len(command));
        dst.put_u8(REGION_HEADER);
        dst.put_u16(region.x0);
        dst.put_u16(region.y0);
        dst.put_u16(region.x1);
        dst.put_u16(region.y1);
        if let FrameCommand::PixelData { payload, .. } = command {
            for pixel in payload {
                dst.put_u16(pixel.raw());
            }
        }
        Ok(())
    }

    /// Encodes a single command into a fresh buffer.
    pub fn encode_to_vec(&self, command: &FrameCommand) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(command));
        self.encode(command, &mut buf)?;
        Ok(buf.to_vec())
    }
}

//! Drawing primitives.
//!
//! A [`Canvas`] borrows the [`Link`] for the duration of one module call and turns
//! drawing requests into frames. Every primitive encodes its whole request before
//! writing, so protocol errors never leave half a frame on the wire; link errors
//! abort the primitive where they happen and are returned unchanged. Nothing is
//! retried here.
//!
//! # Orientation
//!
//! Coordinates are always native panel coordinates. [`Orientation::Portrait`] only
//! changes how text is laid out: each glyph is rotated counter-clockwise and the
//! run is stacked along `y` in reverse, so it reads bottom to top on a panel
//! turned on its side.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DrawResult, ProtocolError};
use crate::link::Link;
use crate::protocol::{FrameCodec, FrameCommand, Region, Rgb565};

pub mod font;

pub use font::{GlyphBitmap, GLYPH_HEIGHT, GLYPH_WIDTH};

/// Layout of glyph runs on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Glyphs upright, runs advance along `x`.
    #[default]
    Landscape,
    /// Glyphs rotated 90° counter-clockwise, runs advance along `y`.
    Portrait,
}

impl Orientation {
    /// Distance between consecutive glyph origins along the run.
    pub fn advance(self, scale: u8) -> u32 {
        match self {
            Orientation::Landscape => 6 * u32::from(scale),
            Orientation::Portrait => 8 * u32::from(scale),
        }
    }

    /// Glyph cell size `(width, height)` after rotation and scaling.
    pub fn cell(self, scale: u8) -> (u32, u32) {
        let s = u32::from(scale);
        match self {
            Orientation::Landscape => (GLYPH_WIDTH as u32 * s, GLYPH_HEIGHT as u32 * s),
            Orientation::Portrait => (GLYPH_HEIGHT as u32 * s, GLYPH_WIDTH as u32 * s),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Landscape => write!(f, "landscape"),
            Orientation::Portrait => write!(f, "portrait"),
        }
    }
}

/// Bounding box `(width, height)` of a glyph run, gaps between glyphs included
/// but not the trailing one.
pub fn text_extent(text: &str, scale: u8, orientation: Orientation) -> (u32, u32) {
    let count = text.chars().count() as u32;
    if count == 0 || scale == 0 {
        return (0, 0);
    }
    let (cell_w, cell_h) = orientation.cell(scale);
    let span = orientation.advance(scale) * (count - 1);
    match orientation {
        Orientation::Landscape => (span + cell_w, cell_h),
        Orientation::Portrait => (cell_w, span + cell_h),
    }
}

/// Drawing surface handed to a module for one `initialize` or `update` call.
pub struct Canvas<'a> {
    link: &'a mut Link,
    codec: FrameCodec,
    orientation: Orientation,
    orientation_locked: bool,
    buf: BytesMut,
}

impl fmt::Debug for Canvas<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("codec", &self.codec)
            .field("orientation", &self.orientation)
            .field("orientation_locked", &self.orientation_locked)
            .finish()
    }
}

impl<'a> Canvas<'a> {
    /// Canvas for `update`: orientation is fixed.
    pub fn new(link: &'a mut Link, codec: FrameCodec, orientation: Orientation) -> Self {
        Self {
            link,
            codec,
            orientation,
            orientation_locked: true,
            buf: BytesMut::new(),
        }
    }

    /// Canvas for `initialize`: the module may still pick its orientation.
    pub fn for_initialize(link: &'a mut Link, codec: FrameCodec) -> Self {
        Self {
            orientation_locked: false,
            ..Self::new(link, codec, Orientation::default())
        }
    }

    pub fn width(&self) -> u16 {
        self.codec.width()
    }

    pub fn height(&self) -> u16 {
        self.codec.height()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Chooses the orientation; only allowed during `initialize`.
    pub fn set_orientation(&mut self, orientation: Orientation) -> Result<(), ProtocolError> {
        if self.orientation_locked {
            return Err(ProtocolError::OrientationLocked);
        }
        self.orientation = orientation;
        Ok(())
    }

    /// Fills the whole panel.
    pub async fn clear(&mut self, color: Rgb565) -> DrawResult<()> {
        self.fill_rect(0, 0, self.width(), self.height(), color).await
    }

    pub async fn fill_rect(
        &mut self,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        color: Rgb565,
    ) -> DrawResult<()> {
        let region = Region::from_rect(x, y, w, h)?;
        self.codec.check_region(&region)?;
        let payload = vec![color; region.area()];
        self.send(&[FrameCommand::PixelData { region, payload }]).await
    }

    pub async fn draw_pixel(&mut self, x: u16, y: u16, color: Rgb565) -> DrawResult<()> {
        self.fill_rect(x, y, 1, 1, color).await
    }

    /// Streams a row-major pixel block into `region`.
    pub async fn blit(&mut self, region: Region, pixels: Vec<Rgb565>) -> DrawResult<()> {
        self.send(&[FrameCommand::PixelData {
            region,
            payload: pixels,
        }])
        .await
    }

    /// Draws a glyph run starting at `(x, y)` and returns the cursor position
    /// along the run after the last glyph (`x` in landscape, `y` in portrait).
    ///
    /// The whole run must fit on the panel; nothing is drawn otherwise.
    pub async fn draw_text(
        &mut self,
        x: u16,
        y: u16,
        text: &str,
        fg: Rgb565,
        bg: Rgb565,
        scale: u8,
    ) -> DrawResult<u16> {
        if scale == 0 {
            return Err(ProtocolError::InvalidScale(scale).into());
        }
        let orientation = self.orientation;
        let advance = orientation.advance(scale);
        let (cell_w, cell_h) = orientation.cell(scale);
        let count = text.chars().count() as u32;

        let start = match orientation {
            Orientation::Landscape => u32::from(x),
            Orientation::Portrait => u32::from(y),
        };
        let end = start + advance * count;
        if count == 0 {
            return Ok(clamp_cursor(end));
        }

        let (w, h) = text_extent(text, scale, orientation);
        self.codec.check_region(&bounding_region(x, y, w, h)?)?;

        let mut frames = Vec::with_capacity(count as usize);
        let mut glyphs: Vec<char> = text.chars().collect();
        if orientation == Orientation::Portrait {
            glyphs.reverse();
        }
        for (i, c) in glyphs.into_iter().enumerate() {
            let offset = advance * i as u32;
            let (gx, gy) = match orientation {
                Orientation::Landscape => (u32::from(x) + offset, u32::from(y)),
                Orientation::Portrait => (u32::from(x), u32::from(y) + offset),
            };
            let mut glyph = GlyphBitmap::for_char(c);
            if orientation == Orientation::Portrait {
                glyph = glyph.rotate_ccw();
            }
            let glyph = glyph.scaled(usize::from(scale));
            let region = bounding_region(gx as u16, gy as u16, cell_w, cell_h)?;
            frames.push(FrameCommand::PixelData {
                region,
                payload: glyph.render(fg, bg),
            });
        }
        self.send(&frames).await?;
        Ok(clamp_cursor(end))
    }

    /// Encodes every command first, then writes them in order.
    async fn send(&mut self, commands: &[FrameCommand]) -> DrawResult<()> {
        self.buf.clear();
        let mut bounds = Vec::with_capacity(commands.len());
        for command in commands {
            self.codec.encode(command, &mut self.buf)?;
            bounds.push(self.buf.len());
        }
        let mut start = 0;
        for end in bounds {
            self.link.send(&self.buf[start..end]).await?;
            start = end;
        }
        Ok(())
    }
}

fn bounding_region(x: u16, y: u16, w: u32, h: u32) -> Result<Region, ProtocolError> {
    let too_big = || ProtocolError::RegionOutOfBounds {
        x0: u32::from(x),
        y0: u32::from(y),
        x1: u32::from(x) + w.saturating_sub(1),
        y1: u32::from(y) + h.saturating_sub(1),
        width: u16::MAX,
        height: u16::MAX,
    };
    let w = u16::try_from(w).map_err(|_| too_big())?;
    let h = u16::try_from(h).map_err(|_| too_big())?;
    Region::from_rect(x, y, w, h)
}

fn clamp_cursor(pos: u32) -> u16 {
    u16::try_from(pos).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DrawError, IoError};
    use crate::link::mock::MockDevice;
    use crate::link::{Link, LinkSettings};
    use crate::protocol::HEADER_LEN;

    async fn connected() -> (MockDevice, Link) {
        let device = MockDevice::new();
        let link = Link::open(device.connector(), LinkSettings::default())
            .await
            .unwrap();
        (device, link)
    }

    #[test]
    fn extents() {
        assert_eq!(text_extent("", 1, Orientation::Landscape), (0, 0));
        assert_eq!(text_extent("AB", 1, Orientation::Landscape), (11, 7));
        assert_eq!(text_extent("AB", 2, Orientation::Portrait), (14, 26));
    }

    #[tokio::test]
    async fn draw_pixel_sends_single_frame() {
        let (device, mut link) = connected().await;
        let mut canvas = Canvas::new(&mut link, FrameCodec::default(), Orientation::Landscape);
        canvas.draw_pixel(159, 79, Rgb565::RED).await.unwrap();
        assert_eq!(
            device.written(),
            vec![vec![0xA5, 0, 159, 0, 79, 0, 159, 0, 79, 0xF8, 0x00]]
        );
    }

    #[tokio::test]
    async fn out_of_bounds_rect_sends_nothing() {
        let (device, mut link) = connected().await;
        let mut canvas = Canvas::new(&mut link, FrameCodec::default(), Orientation::Landscape);
        let err = canvas.fill_rect(100, 0, 61, 10, Rgb565::RED).await.unwrap_err();
        assert!(matches!(
            err,
            DrawError::Protocol(ProtocolError::RegionOutOfBounds { .. })
        ));
        assert_eq!(device.write_count(), 0);
    }

    #[tokio::test]
    async fn landscape_text_advances_along_x() {
        let (device, mut link) = connected().await;
        let mut canvas = Canvas::new(&mut link, FrameCodec::default(), Orientation::Landscape);
        let next = canvas
            .draw_text(10, 20, "Hi", Rgb565::WHITE, Rgb565::BLACK, 2)
            .await
            .unwrap();
        assert_eq!(next, 34);

        let frames = device.written();
        assert_eq!(frames.len(), 2);
        // Second glyph at x = 10 + 12, cell 10x14.
        assert_eq!(&frames[1][..HEADER_LEN], &[0xA5, 0, 22, 0, 20, 0, 31, 0, 33]);
        assert_eq!(frames[1].len(), HEADER_LEN + 10 * 14 * 2);
    }

    #[tokio::test]
    async fn portrait_text_is_reversed_along_y() {
        let (device, mut link) = connected().await;
        let mut canvas = Canvas::for_initialize(&mut link, FrameCodec::default());
        canvas.set_orientation(Orientation::Portrait).unwrap();
        let next = canvas
            .draw_text(30, 4, "AB", Rgb565::WHITE, Rgb565::BLACK, 1)
            .await
            .unwrap();
        assert_eq!(next, 20);

        let frames = device.written();
        // 'B' first at the top, 7 wide by 5 tall.
        assert_eq!(&frames[0][..HEADER_LEN], &[0xA5, 0, 30, 0, 4, 0, 36, 0, 8]);
        assert_eq!(&frames[1][..HEADER_LEN], &[0xA5, 0, 30, 0, 12, 0, 36, 0, 16]);

        let b_rotated = GlyphBitmap::for_char('B')
            .rotate_ccw()
            .render(Rgb565::WHITE, Rgb565::BLACK);
        let expected: Vec<u8> = b_rotated.iter().flat_map(|p| p.raw().to_be_bytes()).collect();
        assert_eq!(&frames[0][HEADER_LEN..], expected.as_slice());
    }

    #[tokio::test]
    async fn text_past_edge_is_rejected_whole() {
        let (device, mut link) = connected().await;
        let mut canvas = Canvas::new(&mut link, FrameCodec::default(), Orientation::Landscape);
        let err = canvas
            .draw_text(150, 0, "ABC", Rgb565::WHITE, Rgb565::BLACK, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DrawError::Protocol(_)));
        assert_eq!(device.write_count(), 0);

        assert_eq!(
            canvas
                .draw_text(0, 0, "A", Rgb565::WHITE, Rgb565::BLACK, 0)
                .await,
            Err(DrawError::Protocol(ProtocolError::InvalidScale(0)))
        );
    }

    #[tokio::test]
    async fn orientation_locked_outside_initialize() {
        let (_device, mut link) = connected().await;
        let mut canvas = Canvas::new(&mut link, FrameCodec::default(), Orientation::Landscape);
        assert_eq!(
            canvas.set_orientation(Orientation::Portrait),
            Err(ProtocolError::OrientationLocked)
        );
    }

    #[tokio::test]
    async fn link_error_aborts_remaining_glyphs() {
        let (device, mut link) = connected().await;
        device.unplug();
        let mut canvas = Canvas::new(&mut link, FrameCodec::default(), Orientation::Landscape);
        let err = canvas
            .draw_text(0, 0, "ABC", Rgb565::WHITE, Rgb565::BLACK, 1)
            .await
            .unwrap_err();
        assert_eq!(err, DrawError::Link(IoError::Disconnected));
        assert_eq!(device.write_count(), 0);
    }
}

//! 5×7 bitmap font and glyph transforms.
//!
//! Glyphs are stored column-major as the panel firmware's font tables are: five
//! column bytes, bit `n` of each byte is row `n` counted from the top.

use crate::protocol::Rgb565;

/// Glyph cell width before rotation.
pub const GLYPH_WIDTH: usize = 5;
/// Glyph cell height before rotation.
pub const GLYPH_HEIGHT: usize = 7;

/// Column bytes for a character, or `None` if the font has no glyph for it.
/// Lowercase letters share the uppercase glyphs.
pub fn glyph_columns(c: char) -> Option<[u8; GLYPH_WIDTH]> {
    let columns = match c.to_ascii_uppercase() {
        '0' => [0x3E, 0x51, 0x49, 0x45, 0x3E],
        '1' => [0x00, 0x42, 0x7F, 0x40, 0x00],
        '2' => [0x42, 0x61, 0x51, 0x49, 0x46],
        '3' => [0x21, 0x41, 0x45, 0x4B, 0x31],
        '4' => [0x18, 0x14, 0x12, 0x7F, 0x10],
        '5' => [0x27, 0x45, 0x45, 0x45, 0x39],
        '6' => [0x3C, 0x4A, 0x49, 0x49, 0x30],
        '7' => [0x01, 0x71, 0x09, 0x05, 0x03],
        '8' => [0x36, 0x49, 0x49, 0x49, 0x36],
        '9' => [0x06, 0x49, 0x49, 0x29, 0x1E],
        'A' => [0x7E, 0x09, 0x09, 0x09, 0x7E],
        'B' => [0x7F, 0x49, 0x49, 0x49, 0x36],
        'C' => [0x3E, 0x41, 0x41, 0x41, 0x22],
        'D' => [0x7F, 0x41, 0x41, 0x22, 0x1C],
        'E' => [0x7F, 0x49, 0x49, 0x49, 0x41],
        'F' => [0x7F, 0x09, 0x09, 0x09, 0x01],
        'G' => [0x3E, 0x41, 0x49, 0x49, 0x7A],
        'H' => [0x7F, 0x08, 0x08, 0x08, 0x7F],
        'I' => [0x00, 0x41, 0x7F, 0x41, 0x00],
        'J' => [0x20, 0x40, 0x41, 0x3F, 0x01],
        'K' => [0x7F, 0x08, 0x14, 0x22, 0x41],
        'L' => [0x7F, 0x40, 0x40, 0x40, 0x40],
        'M' => [0x7F, 0x02, 0x0C, 0x02, 0x7F],
        'N' => [0x7F, 0x04, 0x08, 0x10, 0x7F],
        'O' => [0x3E, 0x41, 0x41, 0x41, 0x3E],
        'P' => [0x7F, 0x09, 0x09, 0x09, 0x06],
        'Q' => [0x3E, 0x41, 0x51, 0x21, 0x5E],
        'R' => [0x7F, 0x09, 0x19, 0x29, 0x46],
        'S' => [0x46, 0x49, 0x49, 0x49, 0x31],
        'T' => [0x01, 0x01, 0x7F, 0x01, 0x01],
        'U' => [0x3F, 0x40, 0x40, 0x40, 0x3F],
        'V' => [0x1F, 0x20, 0x40, 0x20, 0x1F],
        'W' => [0x3F, 0x40, 0x38, 0x40, 0x3F],
        'X' => [0x63, 0x14, 0x08, 0x14, 0x63],
        'Y' => [0x07, 0x08, 0x70, 0x08, 0x07],
        'Z' => [0x61, 0x51, 0x49, 0x45, 0x43],
        ':' => [0x00, 0x36, 0x36, 0x00, 0x00],
        '%' => [0x23, 0x13, 0x08, 0x64, 0x62],
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x60, 0x60, 0x00, 0x00],
        '/' => [0x20, 0x10, 0x08, 0x04, 0x02],
        '-' => [0x08, 0x08, 0x08, 0x08, 0x08],
        '+' => [0x08, 0x08, 0x3E, 0x08, 0x08],
        '(' => [0x00, 0x1C, 0x22, 0x41, 0x00],
        ')' => [0x00, 0x41, 0x22, 0x1C, 0x00],
        _ => return None,
    };
    Some(columns)
}

/// A monochrome pixel grid, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl GlyphBitmap {
    /// All-clear bitmap.
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    /// Builds a bitmap from row-major bits. Returns `None` if the length is wrong.
    pub fn from_bits(width: usize, height: usize, bits: Vec<bool>) -> Option<Self> {
        (bits.len() == width * height).then_some(Self {
            width,
            height,
            bits,
        })
    }

    /// Unrotated 5×7 glyph. Characters outside the font render blank.
    pub fn for_char(c: char) -> Self {
        let mut glyph = Self::blank(GLYPH_WIDTH, GLYPH_HEIGHT);
        if let Some(columns) = glyph_columns(c) {
            for (col, byte) in columns.iter().enumerate() {
                for row in 0..GLYPH_HEIGHT {
                    if byte & (1 << row) != 0 {
                        glyph.set(col, row, true);
                    }
                }
            }
        }
        glyph
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, col: usize, row: usize) -> bool {
        self.bits[row * self.width + col]
    }

    pub fn set(&mut self, col: usize, row: usize, on: bool) {
        self.bits[row * self.width + col] = on;
    }

    /// Rotates 90° counter-clockwise: source `(col, row)` lands on
    /// `(row, width - 1 - col)` of a `height × width` bitmap.
    pub fn rotate_ccw(&self) -> Self {
        let mut rotated = Self::blank(self.height, self.width);
        for row in 0..self.height {
            for col in 0..self.width {
                if self.get(col, row) {
                    rotated.set(row, self.width - 1 - col, true);
                }
            }
        }
        rotated
    }

    /// Nearest-neighbour upscale by an integer factor.
    pub fn scaled(&self, scale: usize) -> Self {
        if scale <= 1 {
            return self.clone();
        }
        let mut out = Self::blank(self.width * scale, self.height * scale);
        for row in 0..out.height {
            for col in 0..out.width {
                if self.get(col / scale, row / scale) {
                    out.set(col, row, true);
                }
            }
        }
        out
    }

    /// Colours the bitmap, row-major, ready for a pixel frame.
    pub fn render(&self, fg: Rgb565, bg: Rgb565) -> Vec<Rgb565> {
        self.bits
            .iter()
            .map(|&on| if on { fg } else { bg })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_and_unknown() {
        assert_eq!(glyph_columns('a'), glyph_columns('A'));
        assert!(glyph_columns('~').is_none());
        assert_eq!(GlyphBitmap::for_char('~'), GlyphBitmap::blank(5, 7));
    }

    #[test]
    fn digit_one_stem() {
        // Column 2 of '1' is 0x7F: rows 0-6 all set.
        let glyph = GlyphBitmap::for_char('1');
        assert!((0..7).all(|row| glyph.get(2, row)));
        assert!(!glyph.get(0, 0));
    }

    #[test]
    fn rotation_moves_top_row_to_left_column() {
        // 'T': top row is fully set.
        let glyph = GlyphBitmap::for_char('T');
        let rotated = glyph.rotate_ccw();
        assert_eq!((rotated.width(), rotated.height()), (7, 5));
        assert!((0..5).all(|row| rotated.get(0, row)));
        // Stem (column 2) becomes the middle row.
        assert!((0..7).all(|col| rotated.get(col, 2)));
    }

    #[test]
    fn scale_doubles_each_pixel() {
        let mut bitmap = GlyphBitmap::blank(2, 1);
        bitmap.set(1, 0, true);
        let scaled = bitmap.scaled(2);
        assert_eq!((scaled.width(), scaled.height()), (4, 2));
        assert_eq!(
            scaled.render(Rgb565::WHITE, Rgb565::BLACK),
            vec![
                Rgb565::BLACK,
                Rgb565::BLACK,
                Rgb565::WHITE,
                Rgb565::WHITE,
                Rgb565::BLACK,
                Rgb565::BLACK,
                Rgb565::WHITE,
                Rgb565::WHITE,
            ]
        );
    }
}

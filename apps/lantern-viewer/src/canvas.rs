//! CPU-side pixel canvas for generating overlay textures.

use bytemuck::{Pod, Zeroable};

/// A single RGBA8 pixel.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Pixel {
    /// An opaque pixel from RGB components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// A fixed-size RGBA8 image assembled on the CPU, row-major.
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
}

impl Canvas {
    /// Create a canvas filled with a single color.
    pub fn new(width: u32, height: u32, fill: Pixel) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; width as usize * height as usize],
        }
    }

    /// Generate a two-color checkerboard with square cells.
    pub fn checkerboard(width: u32, height: u32, cell: u32, even: Pixel, odd: Pixel) -> Self {
        let mut canvas = Self::new(width, height, even);
        for cy in 0..height.div_ceil(cell) {
            for cx in 0..width.div_ceil(cell) {
                if (cx + cy) % 2 == 1 {
                    canvas.fill_rect(cx * cell, cy * cell, cell, cell, odd);
                }
            }
        }
        canvas
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill a rectangle, clamped to the canvas bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Pixel) {
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        for py in y.min(self.height)..y_end {
            let row = py as usize * self.width as usize;
            for px in x.min(self.width)..x_end {
                self.pixels[row + px as usize] = color;
            }
        }
    }

    /// Read a single pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// The raw RGBA8 bytes, suitable for an image upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Pixel = Pixel::rgb(255, 0, 0);
    const BLUE: Pixel = Pixel::rgb(0, 0, 255);

    #[test]
    fn pixel_layout_is_four_bytes() {
        assert_eq!(std::mem::size_of::<Pixel>(), 4);
    }

    #[test]
    fn byte_length_matches_dimensions() {
        let canvas = Canvas::new(7, 5, RED);
        assert_eq!(canvas.as_bytes().len(), 7 * 5 * 4);
    }

    #[test]
    fn fill_covers_every_pixel() {
        let canvas = Canvas::new(4, 4, RED);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(canvas.pixel(x, y), RED);
            }
        }
    }

    #[test]
    fn fill_rect_clamps_to_bounds() {
        let mut canvas = Canvas::new(4, 4, RED);
        canvas.fill_rect(2, 2, 100, 100, BLUE);
        assert_eq!(canvas.pixel(1, 1), RED);
        assert_eq!(canvas.pixel(2, 2), BLUE);
        assert_eq!(canvas.pixel(3, 3), BLUE);
        assert_eq!(canvas.as_bytes().len(), 4 * 4 * 4);
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let canvas = Canvas::checkerboard(64, 64, 16, RED, BLUE);
        assert_eq!(canvas.pixel(0, 0), RED);
        assert_eq!(canvas.pixel(16, 0), BLUE);
        assert_eq!(canvas.pixel(0, 16), BLUE);
        assert_eq!(canvas.pixel(16, 16), RED);
        // Within one cell the color is uniform
        assert_eq!(canvas.pixel(15, 15), RED);
        assert_eq!(canvas.pixel(31, 15), BLUE);
    }

    #[test]
    fn checkerboard_handles_partial_edge_cells() {
        let canvas = Canvas::checkerboard(20, 20, 16, RED, BLUE);
        assert_eq!(canvas.pixel(0, 0), RED);
        assert_eq!(canvas.pixel(19, 0), BLUE);
        assert_eq!(canvas.pixel(0, 19), BLUE);
        assert_eq!(canvas.pixel(19, 19), RED);
    }

    #[test]
    fn bytes_are_rgba_order() {
        let canvas = Canvas::new(1, 1, Pixel::rgb(1, 2, 3));
        assert_eq!(canvas.as_bytes(), &[1, 2, 3, 255]);
    }
}

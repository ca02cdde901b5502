//! Detection overlay rendering.
//!
//! Draws each detection as a hollow rectangle with a `"<label> <conf>"`
//! caption 10 px above its top edge. Everything drawn is clipped to the frame:
//! boxes are clamped first, and the border grows inward from the clamped edge.

mod font;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::{Detection, PixelRect};
use crate::frame::Frame;

pub use font::text_size;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 2;
/// Gap between the caption baseline and the top of its box.
pub const LABEL_OFFSET: u32 = 10;
pub const FONT_SCALE: u32 = 2;

#[derive(Clone, Debug)]
pub struct Renderer {
    color: Rgb<u8>,
    thickness: u32,
    font_scale: u32,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            color: BOX_COLOR,
            thickness: BOX_THICKNESS,
            font_scale: FONT_SCALE,
        }
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw all detections onto `frame` in place.
    ///
    /// With no detections the frame is left untouched.
    pub fn draw(&self, frame: &mut Frame, detections: &[Detection]) {
        let (width, height) = (frame.width(), frame.height());
        let image = frame.image_mut();
        for detection in detections {
            let Some(rect) = detection.bbox.to_pixel_rect(width, height) else {
                continue;
            };
            self.draw_box(image, rect);
            self.draw_caption(image, &detection.caption(), rect);
        }
    }

    fn draw_box(&self, image: &mut RgbImage, rect: PixelRect) {
        for inset in 0..self.thickness {
            let w = rect.width() as i64 - 2 * inset as i64;
            let h = rect.height() as i64 - 2 * inset as i64;
            if w <= 0 || h <= 0 {
                break;
            }
            let outline = Rect::at((rect.x1 + inset) as i32, (rect.y1 + inset) as i32)
                .of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, outline, self.color);
        }
    }

    fn draw_caption(&self, image: &mut RgbImage, text: &str, rect: PixelRect) {
        let (_, text_h) = text_size(text, self.font_scale);
        let baseline = rect.y1 as i64 - LABEL_OFFSET as i64;
        let top = (baseline - text_h as i64).max(0) as i32;
        self.draw_text(image, text, rect.x1 as i32, top);
    }

    fn draw_text(&self, image: &mut RgbImage, text: &str, x: i32, y: i32) {
        let scale = self.font_scale as i32;
        let mut cursor = x;
        for ch in text.chars() {
            for (row, bits) in font::glyph(ch).iter().enumerate() {
                for col in 0..font::GLYPH_WIDTH as i32 {
                    if (bits >> (font::GLYPH_WIDTH as i32 - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = cursor + col * scale;
                    let py = y + row as i32 * scale;
                    // imageproc clips to the image; skip cells that start past the edge.
                    if px >= image.width() as i32 || py >= image.height() as i32 {
                        continue;
                    }
                    draw_filled_rect_mut(
                        image,
                        Rect::at(px, py).of_size(self.font_scale, self.font_scale),
                        self.color,
                    );
                }
            }
            cursor += font::GLYPH_ADVANCE as i32 * scale;
        }
    }
}

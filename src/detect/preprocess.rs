//! Model input preparation.

use image::imageops::FilterType;
use image::{Rgb, RgbImage};

/// Grey used by the YOLOv8 exporter for letterbox padding.
pub const LETTERBOX_FILL: u8 = 114;

/// Geometry of an aspect-preserving resize onto a square canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn for_frame(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            size,
            scale,
            pad_x: ((size as f32 - new_w) / 2.0).floor(),
            pad_y: ((size as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model input space back to the source frame.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize `image` into a `size × size` canvas, padding with [`LETTERBOX_FILL`].
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let geometry = Letterbox::for_frame(image.width(), image.height(), size);
    let new_w = ((image.width() as f32 * geometry.scale).round() as u32).clamp(1, size);
    let new_h = ((image.height() as f32 * geometry.scale).round() as u32).clamp(1, size);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );
    (canvas, geometry)
}

/// Planar CHW float buffer normalised to `[0, 1]`.
pub fn to_chw(image: &RgbImage) -> Vec<f32> {
    let plane = (image.width() * image.height()) as usize;
    let mut out = vec![0.0f32; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        for channel in 0..3 {
            out[channel * plane + i] = pixel[channel] as f32 / 255.0;
        }
    }
    out
}

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Synthetic source (`stub://`) for tests and demos.
///
/// Produces a diagonal gradient with a bright square sweeping across it, so a
/// live preview visibly moves. Always opens successfully.
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    max_frames: Option<u64>,
    frame_count: u64,
    opened: bool,
}

impl SyntheticSource {
    pub fn new(name: String, width: u32, height: u32, max_frames: Option<u64>) -> Self {
        Self {
            name,
            width,
            height,
            max_frames,
            frame_count: 0,
            opened: false,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut pixels = vec![0u8; w * h * 3];

        let side = (w.min(h) / 4).max(1);
        let travel = w.saturating_sub(side).max(1);
        let square_x = (self.frame_count as usize * 8) % travel;
        let square_y = h.saturating_sub(side) / 2;

        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 3;
                let inside =
                    x >= square_x && x < square_x + side && y >= square_y && y < square_y + side;
                if inside {
                    pixels[offset..offset + 3].copy_from_slice(&[230, 230, 230]);
                } else {
                    pixels[offset] = ((x * 255) / w.max(1)) as u8;
                    pixels[offset + 1] = ((y * 255) / h.max(1)) as u8;
                    pixels[offset + 2] = (((x + y + self.frame_count as usize) % 256) / 2) as u8;
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{} (synthetic {}x{})", self.name, self.width, self.height)
    }

    fn open(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-zero size, got {}x{}",
                self.width,
                self.height
            ));
        }
        self.opened = true;
        log::info!("SyntheticSource: opened {}", self.describe());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.opened {
            return Err(anyhow!("synthetic source not opened; call open() first"));
        }
        if self.max_frames.is_some_and(|max| self.frame_count >= max) {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.name),
        }
    }
}

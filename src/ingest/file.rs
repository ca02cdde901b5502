//! Local image frame source.
//!
//! Replays a single JPEG file or every `.jpg`/`.jpeg` file in a directory, in
//! file-name order, then reports end of stream. Local paths only.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub struct FileSource {
    path: PathBuf,
    pending: Option<VecDeque<PathBuf>>,
    frame_count: u64,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: None,
            frame_count: 0,
        }
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&mut self) -> Result<()> {
        let frames = list_frames(&self.path)?;
        if frames.is_empty() {
            return Err(anyhow!("no JPEG frames found in {}", self.path.display()));
        }
        log::info!(
            "FileSource: opened {} ({} frames)",
            self.path.display(),
            frames.len()
        );
        self.pending = Some(frames.into());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| anyhow!("file source not opened; call open() first"))?;
        let Some(path) = pending.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path)
            .with_context(|| format!("decode frame {}", path.display()))?
            .into_rgb8();
        self.frame_count += 1;
        Ok(Some(Frame::new(image, self.frame_count)))
    }

    fn close(&mut self) {
        self.pending = None;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.describe(),
        }
    }
}

fn list_frames(path: &Path) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("cannot open video source {}", path.display()))?;
    if meta.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut frames = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("list frame directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("list frame directory {}", path.display()))?;
        let candidate = entry.path();
        if candidate.is_file() && is_jpeg(&candidate) {
            frames.push(candidate);
        }
    }
    frames.sort();
    Ok(frames)
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_jpeg(path: &Path, shade: u8) {
        RgbImage::from_pixel(16, 8, Rgb([shade, shade, shade]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn replays_directory_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_jpeg(&dir.path().join("b.jpg"), 200);
        write_jpeg(&dir.path().join("a.JPEG"), 20);
        std::fs::write(dir.path().join("notes.txt"), "skip me")?;

        let mut source = FileSource::new(dir.path().to_path_buf());
        source.open()?;

        let first = source.next_frame()?.expect("first frame");
        assert_eq!((first.width(), first.height()), (16, 8));
        assert!(first.as_rgb()[0] < 100);
        let second = source.next_frame()?.expect("second frame");
        assert!(second.as_rgb()[0] > 100);
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn missing_or_empty_sources_fail_to_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(FileSource::new(dir.path().to_path_buf()).open().is_err());
        assert!(FileSource::new(dir.path().join("missing.jpg")).open().is_err());
        Ok(())
    }
}

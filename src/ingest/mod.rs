//! Frame sources.
//!
//! A source is selected from a single string:
//!
//! - `stub://name[?frames=N]`: synthetic moving pattern (tests, demos)
//! - `0`, `1`, ...: camera index, opened as `/dev/video<N>` (feature: ingest-v4l2, default on Linux)
//! - `/dev/videoN`: V4L2 device node (feature: ingest-v4l2, default on Linux)
//! - `http(s)://...`: MJPEG or single-JPEG HTTP stream (feature: ingest-mjpeg)
//! - anything else: a local JPEG file or a directory of JPEG frames
//!
//! Sources produce RGB [`Frame`]s. `next_frame` returns `Ok(None)` at a clean end
//! of stream; the capture loop also treats read errors as end of stream.

mod file;
#[cfg(feature = "ingest-mjpeg")]
mod mjpeg;
#[cfg(any(all(feature = "ingest-v4l2", target_os = "linux"), test))]
mod normalize;
mod synthetic;
#[cfg(all(feature = "ingest-v4l2", target_os = "linux"))]
mod v4l2;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use file::FileSource;
#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;
#[cfg(all(feature = "ingest-v4l2", target_os = "linux"))]
pub use v4l2::V4l2Source;

/// A stream of frames owned by the capture loop.
pub trait FrameSource {
    /// Human-readable source name for logs.
    fn describe(&self) -> String;

    /// Acquire the underlying device or stream.
    fn open(&mut self) -> Result<()>;

    /// Next frame, or `None` when the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device or stream. Must be idempotent.
    fn close(&mut self) {}

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Capture preferences passed to sources that can negotiate them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    /// Target frame rate. Zero means "as fast as the source delivers".
    pub target_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Parsed source selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Synthetic {
        name: String,
        max_frames: Option<u64>,
    },
    Device(String),
    Http(String),
    File(PathBuf),
}

impl FromStr for SourceSpec {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if let Some(rest) = value.strip_prefix("stub://") {
            return parse_synthetic(rest);
        }
        if value.chars().all(|c| c.is_ascii_digit()) {
            let index: u32 = value
                .parse()
                .map_err(|_| anyhow!("camera index {} is out of range", value))?;
            return Ok(Self::Device(format!("/dev/video{}", index)));
        }
        if value.starts_with("/dev/video") {
            return Ok(Self::Device(value.to_string()));
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            return Ok(Self::Http(value.to_string()));
        }
        if value.contains("://") {
            return Err(anyhow!(
                "unsupported source scheme in '{}'; expected stub://, http(s)://, a camera index or a local path",
                value
            ));
        }
        Ok(Self::File(PathBuf::from(value)))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthetic {
                name,
                max_frames: Some(n),
            } => write!(f, "stub://{}?frames={}", name, n),
            Self::Synthetic { name, .. } => write!(f, "stub://{}", name),
            Self::Device(path) | Self::Http(path) => write!(f, "{}", path),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

fn parse_synthetic(rest: &str) -> Result<SourceSpec> {
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };
    let mut max_frames = None;
    for pair in query.into_iter().flat_map(|q| q.split('&')) {
        match pair.split_once('=') {
            Some(("frames", n)) => {
                max_frames = Some(
                    n.parse()
                        .map_err(|_| anyhow!("stub frames must be an integer, got '{}'", n))?,
                );
            }
            _ => return Err(anyhow!("unknown stub source option '{}'", pair)),
        }
    }
    Ok(SourceSpec::Synthetic {
        name: if name.is_empty() { "stub" } else { name }.to_string(),
        max_frames,
    })
}

/// Construct (but do not open) the source described by `spec`.
pub fn build_source(spec: &SourceSpec, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::Synthetic { name, max_frames } => Ok(Box::new(SyntheticSource::new(
            name.clone(),
            settings.width,
            settings.height,
            *max_frames,
        ))),
        SourceSpec::Device(device) => build_device(device, settings),
        SourceSpec::Http(url) => build_http(url, settings),
        SourceSpec::File(path) => Ok(Box::new(FileSource::new(path.clone()))),
    }
}

#[cfg(all(feature = "ingest-v4l2", target_os = "linux"))]
fn build_device(device: &str, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(device.to_string(), settings.clone())))
}

#[cfg(not(all(feature = "ingest-v4l2", target_os = "linux")))]
fn build_device(device: &str, _settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "camera {} requires the ingest-v4l2 feature on Linux (rebuild with --features ingest-v4l2)",
        device
    ))
}

#[cfg(feature = "ingest-mjpeg")]
fn build_http(url: &str, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(MjpegSource::new(url, settings.target_fps)?))
}

#[cfg(not(feature = "ingest-mjpeg"))]
fn build_http(url: &str, _settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "stream {} requires the ingest-mjpeg feature (rebuild with --features ingest-mjpeg)",
        url
    ))
}

//! V4L2 camera source.
//!
//! Opens a local device node (e.g. `/dev/video0`), negotiates a capture format
//! close to the requested size, and converts each buffer to RGB. The device and
//! its mmap stream are released in `close()` and on drop.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureSettings, FrameSource, SourceStats};
use crate::frame::Frame;

/// Formats to ask for, most convenient first.
const PREFERRED_FOURCCS: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

pub struct V4l2Source {
    device_path: String,
    settings: CaptureSettings,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(device_path: String, settings: CaptureSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            device_path,
            settings,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
        }
    }

    fn negotiate(&mut self, device: &v4l::Device) -> Result<()> {
        use v4l::video::Capture;

        let mut last_err = None;
        for fourcc in PREFERRED_FOURCCS {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.settings.width;
            format.height = self.settings.height;
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(applied) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(&applied.fourcc.repr) {
                        self.format = pixel_format;
                        self.active_width = applied.width;
                        self.active_height = applied.height;
                        return Ok(());
                    }
                    log::debug!(
                        "V4l2Source: {} substituted unsupported format {}",
                        self.device_path,
                        applied.fourcc
                    );
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => anyhow::Error::new(err).context(format!(
                "{} supports none of RGB3, YUYV, MJPG",
                self.device_path
            )),
            None => anyhow!("{} supports none of RGB3, YUYV, MJPG", self.device_path),
        })
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.device_path.clone()
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        self.negotiate(&device)?;

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{}, {:?})",
            self.device_path,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not opened")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        let (rgb, width, height) =
            normalize_to_rgb(&buf, self.active_width, self.active_height, self.format)?;
        self.frame_count += 1;
        Frame::from_rgb(rgb, width, height, self.frame_count).map(Some)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.device_path);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.device_path.clone(),
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}

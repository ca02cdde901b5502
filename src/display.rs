//! Display surfaces for annotated frames.
//!
//! The capture loop talks to a [`DisplaySurface`]; the real implementation is a
//! resizable `minifb` window, and [`HeadlessDisplay`] discards frames for
//! unattended runs.

use anyhow::Result;

use crate::frame::Frame;

/// User input observed since the last frame was shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    None,
    Escape,
    Closed,
}

pub trait DisplaySurface {
    fn show(&mut self, frame: &Frame) -> Result<()>;

    /// Checked once per iteration, after `show`.
    fn poll_event(&mut self) -> DisplayEvent;
}

/// Window presentation settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSettings {
    pub title: String,
    /// Initial window size; defaults to the first frame's size.
    pub size: Option<(u32, u32)>,
    pub headless: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "facecam".to_string(),
            size: None,
            headless: false,
        }
    }
}

impl WindowSettings {
    pub fn window_size(&self, frame_width: u32, frame_height: u32) -> (u32, u32) {
        self.size.unwrap_or((frame_width, frame_height))
    }
}

/// Accepts frames and never reports input.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    frames_shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }
}

impl DisplaySurface for HeadlessDisplay {
    fn show(&mut self, _frame: &Frame) -> Result<()> {
        self.frames_shown += 1;
        Ok(())
    }

    fn poll_event(&mut self) -> DisplayEvent {
        DisplayEvent::None
    }
}

/// Map window state to an event. A closed window wins over a pending Escape.
pub fn window_event(open: bool, escape_pressed: bool) -> DisplayEvent {
    if !open {
        DisplayEvent::Closed
    } else if escape_pressed {
        DisplayEvent::Escape
    } else {
        DisplayEvent::None
    }
}

/// Pack RGB24 into `0x00RRGGBB` words.
pub fn rgb_to_argb(rgb: &[u8]) -> Vec<u32> {
    rgb.chunks_exact(3)
        .map(|px| ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32)
        .collect()
}

#[cfg(feature = "display-minifb")]
pub use window::WindowDisplay;

#[cfg(feature = "display-minifb")]
mod window {
    use anyhow::{Context, Result};
    use minifb::{Key, KeyRepeat, ScaleMode, Window, WindowOptions};

    use super::{rgb_to_argb, window_event, DisplayEvent, DisplaySurface, WindowSettings};
    use crate::frame::Frame;

    pub struct WindowDisplay {
        window: Window,
        title: String,
        buffer: Vec<u32>,
    }

    impl WindowDisplay {
        pub fn open(settings: &WindowSettings, frame_width: u32, frame_height: u32) -> Result<Self> {
            let (width, height) = settings.window_size(frame_width, frame_height);
            let window = Window::new(
                &settings.title,
                width as usize,
                height as usize,
                WindowOptions {
                    resize: true,
                    scale_mode: ScaleMode::AspectRatioStretch,
                    ..WindowOptions::default()
                },
            )
            .with_context(|| format!("create window '{}'", settings.title))?;
            log::info!("opened window '{}' ({}x{})", settings.title, width, height);
            Ok(Self {
                window,
                title: settings.title.clone(),
                buffer: Vec::new(),
            })
        }
    }

    impl DisplaySurface for WindowDisplay {
        fn show(&mut self, frame: &Frame) -> Result<()> {
            self.buffer = rgb_to_argb(frame.as_rgb());
            self.window
                .update_with_buffer(&self.buffer, frame.width() as usize, frame.height() as usize)
                .context("update window")?;
            Ok(())
        }

        fn poll_event(&mut self) -> DisplayEvent {
            // Edge-triggered: one press is one exit, however long the key is held.
            window_event(
                self.window.is_open(),
                self.window.is_key_pressed(Key::Escape, KeyRepeat::No),
            )
        }
    }

    impl Drop for WindowDisplay {
        fn drop(&mut self) {
            log::info!("closed window '{}'", self.title);
        }
    }
}

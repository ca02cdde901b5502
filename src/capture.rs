//! The per-frame capture loop.
//!
//! `INIT → (READ → DETECT → RENDER → DISPLAY → CHECK_EXIT)* → TEARDOWN`
//!
//! The source is closed and the display dropped on every exit path, including
//! detector and display errors that abort the loop. The display is opened
//! lazily from the first frame, so a source that cannot be opened never
//! produces a window.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::detect::{validate_threshold, Detector};
use crate::display::{DisplayEvent, DisplaySurface};
use crate::ingest::FrameSource;
use crate::render::Renderer;

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureOptions {
    pub confidence: f32,
    /// Stop after this many displayed frames.
    pub max_frames: Option<u64>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            max_frames: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    EscapePressed,
    WindowClosed,
    EndOfStream,
    FrameLimit,
    Interrupted,
    SourceUnavailable,
}

impl ExitReason {
    /// Whether the run ended the way an operator expects a run to end.
    pub fn is_normal(&self) -> bool {
        !matches!(self, Self::SourceUnavailable)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::EscapePressed => "escape pressed",
            Self::WindowClosed => "window closed",
            Self::EndOfStream => "end of stream",
            Self::FrameLimit => "frame limit reached",
            Self::Interrupted => "interrupted",
            Self::SourceUnavailable => "source unavailable",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub exit_reason: ExitReason,
    pub source: String,
    pub frames: u64,
    /// Frames the source reports delivering, from [`FrameSource::stats`].
    pub frames_captured: u64,
    pub detections: u64,
    pub inference_time: Duration,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(exit_reason: ExitReason, source: String) -> Self {
        Self {
            exit_reason,
            source,
            frames: 0,
            frames_captured: 0,
            detections: 0,
            inference_time: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.frames as f64 / secs
        }
    }

    pub fn avg_inference_ms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.inference_time.as_secs_f64() * 1000.0 / self.frames as f64
        }
    }
}

/// Closes the wrapped source when dropped.
struct SourceGuard {
    source: Box<dyn FrameSource>,
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.source.close();
        log::debug!("released source {}", self.source.describe());
    }
}

pub struct CaptureLoop {
    detector: Detector,
    renderer: Renderer,
    options: CaptureOptions,
    stop: Arc<AtomicBool>,
}

impl CaptureLoop {
    pub fn new(detector: Detector, options: CaptureOptions) -> Result<Self> {
        validate_threshold(options.confidence)?;
        Ok(Self {
            detector,
            renderer: Renderer::default(),
            options,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Flag polled once per iteration; setting it ends the run as `Interrupted`.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn detector_mut(&mut self) -> &mut Detector {
        &mut self.detector
    }

    /// Run until an exit condition is met.
    ///
    /// `open_display` is called at most once, with the first frame's size.
    pub fn run<D, F>(&mut self, source: Box<dyn FrameSource>, open_display: F) -> Result<RunSummary>
    where
        D: DisplaySurface,
        F: FnOnce(u32, u32) -> Result<D>,
    {
        let mut source = SourceGuard { source };
        let name = source.source.describe();

        if let Err(err) = source.source.open() {
            log::error!("cannot open source {}: {:#}", name, err);
            return Ok(RunSummary::new(ExitReason::SourceUnavailable, name));
        }
        log::info!("capturing from {}", name);

        let mut summary = RunSummary::new(ExitReason::EndOfStream, name);
        let mut open_display = Some(open_display);
        let mut display: Option<D> = None;
        let started = Instant::now();

        let exit_reason = loop {
            if self.stop.load(Ordering::SeqCst) {
                break ExitReason::Interrupted;
            }
            if let Some(max) = self.options.max_frames {
                if summary.frames >= max {
                    break ExitReason::FrameLimit;
                }
            }

            let mut frame = match source.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break ExitReason::EndOfStream,
                Err(err) => {
                    log::warn!("frame read failed, treating as end of stream: {:#}", err);
                    break ExitReason::EndOfStream;
                }
            };

            let inference_started = Instant::now();
            let detections = self
                .detector
                .detect(&frame, self.options.confidence)
                .with_context(|| format!("detect on frame {}", frame.sequence()))?;
            summary.inference_time += inference_started.elapsed();
            summary.detections += detections.len() as u64;

            self.renderer.draw(&mut frame, &detections);

            if display.is_none() {
                if let Some(open) = open_display.take() {
                    display = Some(open(frame.width(), frame.height()).context("open display")?);
                }
            }
            let Some(surface) = display.as_mut() else {
                break ExitReason::WindowClosed;
            };
            surface.show(&frame)?;
            summary.frames += 1;
            log::debug!(
                "frame {}: {} detection(s)",
                frame.sequence(),
                detections.len()
            );

            match surface.poll_event() {
                DisplayEvent::Escape => break ExitReason::EscapePressed,
                DisplayEvent::Closed => break ExitReason::WindowClosed,
                DisplayEvent::None => {}
            }
        };

        summary.exit_reason = exit_reason;
        summary.elapsed = started.elapsed();
        summary.frames_captured = source.source.stats().frames_captured;
        Ok(summary)
    }
}

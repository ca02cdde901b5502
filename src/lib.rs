//! facecam
//!
//! Live object detection on a camera feed: provision a YOLOv8 ONNX model,
//! run it on every frame, draw boxes and confidence labels, and show the
//! annotated stream until Escape is pressed.
//!
//! # Pipeline
//!
//! ```text
//! provision → load model → open source → (read → detect → render → display)* → teardown
//! ```
//!
//! # Module Structure
//!
//! - `provision`: locate or download the weight file, with an explicit failure policy
//! - `detect`: `Detector` facade over a `DetectorBackend` (tract ONNX or scripted stub)
//! - `render`: in-place box and caption drawing
//! - `ingest`: frame sources (synthetic, V4L2 camera, HTTP MJPEG, JPEG files)
//! - `display`: window or headless sink
//! - `capture`: the frame loop and its exit reasons
//! - `config`, `ui`: file/env configuration and console stages

pub mod capture;
pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod ingest;
pub mod provision;
pub mod render;
pub mod ui;

pub use capture::{CaptureLoop, CaptureOptions, ExitReason, RunSummary};
pub use config::{AppConfig, LabelSource};
pub use detect::{
    BoundingBox, ClassTable, Detection, Detector, DetectorBackend, RawDetection, StubBackend,
    YoloParams,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use display::{DisplayEvent, DisplaySurface, HeadlessDisplay, WindowSettings};
#[cfg(feature = "display-minifb")]
pub use display::WindowDisplay;
pub use frame::Frame;
pub use ingest::{build_source, CaptureSettings, FrameSource, SourceSpec, SourceStats};
pub use provision::{
    FailurePolicy, ModelFetcher, ModelFile, ModelOrigin, ModelSpec, OfflineFetcher, Provisioner,
};
#[cfg(feature = "download")]
pub use provision::HttpFetcher;
pub use render::Renderer;
pub use ui::Ui;

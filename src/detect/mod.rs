mod backend;
pub mod backends;
mod classes;
mod detector;
pub mod preprocess;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use classes::{ClassTable, FALLBACK_LABEL};
pub use detector::Detector;
pub(crate) use detector::validate_threshold;
pub use result::{BoundingBox, Detection, PixelRect, RawDetection};
pub use yolo::YoloParams;

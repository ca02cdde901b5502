/// Axis-aligned box in frame pixel coordinates (`x1,y1` top-left, `x2,y2` bottom-right).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Integer box with inclusive corners, guaranteed to lie inside its frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from YOLO-style centre/size coordinates.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Clamp the box into `[0, width) × [0, height)`.
    ///
    /// Returns `None` for non-finite boxes, empty frames, and boxes lying
    /// entirely outside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if width == 0 || height == 0 {
            return None;
        }
        if ![self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
        {
            return None;
        }
        let (x1, x2) = ordered(self.x1, self.x2);
        let (y1, y2) = ordered(self.y1, self.y2);
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;
        if x2 < 0.0 || y2 < 0.0 || x1 > max_x || y1 > max_y {
            return None;
        }
        Some(BoundingBox {
            x1: x1.clamp(0.0, max_x),
            y1: y1.clamp(0.0, max_y),
            x2: x2.clamp(0.0, max_x),
            y2: y2.clamp(0.0, max_y),
        })
    }

    /// Integer rectangle for drawing. Truncates toward zero after clamping.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> Option<PixelRect> {
        let clamped = self.clamp_to(width, height)?;
        Some(PixelRect {
            x1: clamped.x1 as u32,
            y1: clamped.y1 as u32,
            x2: clamped.x2 as u32,
            y2: clamped.y2 as u32,
        })
    }
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1 + 1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1 + 1
    }
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Backend output before threshold, clamping and labelling are enforced.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub class_index: usize,
}

impl RawDetection {
    pub fn new(bbox: BoundingBox, score: f32, class_index: usize) -> Self {
        Self {
            bbox,
            score,
            class_index,
        }
    }
}

/// A detected object instance, valid for the frame it was produced from.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Clamped to the source frame.
    pub bbox: BoundingBox,
    /// Confidence in `[threshold, 1.0]`.
    pub confidence: f32,
    pub class_index: usize,
    pub label: String,
}

impl Detection {
    /// Text drawn next to the box, e.g. `"face 0.87"`.
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label, self.confidence)
    }
}

//! YOLOv8 output decoding and non-max suppression.
//!
//! The exported head produces one tensor holding, per anchor, a centre/size box
//! followed by per-class scores: `[1, 4 + C, N]` (stock export) or the
//! transposed `[1, N, 4 + C]`. Face models may append keypoint channels after
//! the class scores; those are ignored when `num_classes` is set.

use anyhow::{anyhow, Result};

use crate::detect::preprocess::Letterbox;
use crate::detect::result::{BoundingBox, RawDetection};

const BOX_CHANNELS: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct YoloParams {
    /// IoU above which a lower-scoring box of the same class is suppressed.
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Number of class-score channels. `None` treats every non-box channel as a class.
    pub num_classes: Option<usize>,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            iou_threshold: 0.7,
            max_detections: 300,
            num_classes: None,
        }
    }
}

/// Decode a raw output tensor into frame-space detections.
pub fn decode(
    shape: &[usize],
    data: &[f32],
    letterbox: &Letterbox,
    threshold: f32,
    params: &YoloParams,
) -> Result<Vec<RawDetection>> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
    }
    let expected = shape.iter().product::<usize>();
    if data.len() != expected {
        return Err(anyhow!(
            "YOLO output length mismatch: shape {:?} needs {} values, got {}",
            shape,
            expected,
            data.len()
        ));
    }

    // Anchors outnumber channels in every YOLOv8 head, which tells the layouts apart.
    let channels_first = shape[1] <= shape[2];
    let (channels, anchors) = if channels_first {
        (shape[1], shape[2])
    } else {
        (shape[2], shape[1])
    };
    if channels <= BOX_CHANNELS {
        return Err(anyhow!(
            "YOLO output has {} channels; expected box plus class scores",
            channels
        ));
    }
    let num_classes = params.num_classes.unwrap_or(channels - BOX_CHANNELS);
    if num_classes == 0 || BOX_CHANNELS + num_classes > channels {
        return Err(anyhow!(
            "model output has {} channels, cannot hold {} classes",
            channels,
            num_classes
        ));
    }

    let at = |anchor: usize, channel: usize| -> f32 {
        if channels_first {
            data[channel * anchors + anchor]
        } else {
            data[anchor * channels + channel]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = at(anchor, BOX_CHANNELS + class);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < threshold {
            continue;
        }

        let bbox = BoundingBox::from_center(
            at(anchor, 0),
            at(anchor, 1),
            at(anchor, 2),
            at(anchor, 3),
        );
        let (x1, y1) = letterbox.unmap(bbox.x1, bbox.y1);
        let (x2, y2) = letterbox.unmap(bbox.x2, bbox.y2);
        candidates.push(RawDetection::new(
            BoundingBox::new(x1, y1, x2, y2),
            best_score,
            best_class,
        ));
    }

    Ok(non_max_suppression(
        candidates,
        params.iou_threshold,
        params.max_detections,
    ))
}

/// Greedy per-class NMS. Output is sorted by descending score.
pub fn non_max_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        if keep.len() >= max_detections {
            break;
        }
        let suppressed = keep.iter().any(|kept| {
            kept.class_index == det.class_index && kept.bbox.iou(&det.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Letterbox {
        Letterbox {
            size: 640,
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    }

    /// Six anchors (two populated), one class, channels-first.
    fn channels_first_output() -> (Vec<usize>, Vec<f32>) {
        // rows: cx, cy, w, h, score ; columns: anchors
        let data = vec![
            100.0, 300.0, 0.0, 0.0, 0.0, 0.0, //
            100.0, 300.0, 0.0, 0.0, 0.0, 0.0, //
            40.0, 20.0, 0.0, 0.0, 0.0, 0.0, //
            60.0, 20.0, 0.0, 0.0, 0.0, 0.0, //
            0.9, 0.2, 0.0, 0.0, 0.0, 0.0,
        ];
        (vec![1, 5, 6], data)
    }

    #[test]
    fn decodes_channels_first_layout() {
        let (shape, data) = channels_first_output();
        let dets = decode(&shape, &data, &identity(), 0.4, &YoloParams::default()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(80.0, 70.0, 120.0, 130.0));
        assert_eq!(dets[0].class_index, 0);
        assert!((dets[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn decodes_transposed_layout() {
        let data = vec![
            100.0, 100.0, 40.0, 60.0, 0.1, 0.8, //
            300.0, 300.0, 20.0, 20.0, 0.3, 0.1, //
            50.0, 50.0, 10.0, 10.0, 0.0, 0.0, //
            60.0, 60.0, 10.0, 10.0, 0.0, 0.0, //
            70.0, 70.0, 10.0, 10.0, 0.0, 0.0, //
            80.0, 80.0, 10.0, 10.0, 0.0, 0.0, //
            90.0, 90.0, 10.0, 10.0, 0.0, 0.0,
        ];
        let dets = decode(&[1, 7, 6], &data, &identity(), 0.25, &YoloParams::default()).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_index, 1);
        assert!((dets[0].score - 0.8).abs() < 1e-6);
        assert_eq!(dets[1].class_index, 0);
    }

    #[test]
    fn keypoint_channels_are_ignored_with_explicit_class_count() {
        // box, one class score, three keypoint values; anchor 0 populated.
        let mut data = vec![0.0f32; 8 * 8];
        let anchors = 8;
        let set = |data: &mut Vec<f32>, ch: usize, a: usize, v: f32| data[ch * anchors + a] = v;
        set(&mut data, 0, 0, 50.0);
        set(&mut data, 1, 0, 50.0);
        set(&mut data, 2, 0, 10.0);
        set(&mut data, 3, 0, 10.0);
        set(&mut data, 4, 0, 0.6);
        set(&mut data, 5, 0, 412.0);
        set(&mut data, 6, 0, 233.0);
        set(&mut data, 7, 0, 0.9);

        let params = YoloParams {
            num_classes: Some(1),
            ..YoloParams::default()
        };
        let dets = decode(&[1, 8, 8], &data, &identity(), 0.5, &params).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_index, 0);
        assert!((dets[0].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn letterbox_offsets_are_removed() {
        let (shape, data) = channels_first_output();
        let geometry = Letterbox {
            size: 640,
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 20.0,
        };
        let dets = decode(&shape, &data, &geometry, 0.4, &YoloParams::default()).unwrap();
        assert_eq!(dets[0].bbox, BoundingBox::new(160.0, 100.0, 240.0, 220.0));
    }

    #[test]
    fn rejects_malformed_outputs() {
        let params = YoloParams::default();
        assert!(decode(&[5, 2], &[0.0; 10], &identity(), 0.4, &params).is_err());
        assert!(decode(&[1, 4, 9], &[0.0; 36], &identity(), 0.4, &params).is_err());
        assert!(decode(&[1, 5, 2], &[0.0; 9], &identity(), 0.4, &params).is_err());
        let too_many = YoloParams {
            num_classes: Some(3),
            ..YoloParams::default()
        };
        assert!(decode(&[1, 5, 2], &[0.0; 10], &identity(), 0.4, &too_many).is_err());
    }

    #[test]
    fn nms_suppresses_overlapping_boxes_of_the_same_class() {
        let a = RawDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 0);
        let b = RawDetection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0.8, 0);
        let c = RawDetection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0.7, 1);
        let d = RawDetection::new(BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0.6, 0);

        let kept = non_max_suppression(vec![d.clone(), b, c.clone(), a.clone()], 0.5, 300);
        assert_eq!(kept, vec![a.clone(), c, d]);

        let capped = non_max_suppression(vec![a.clone()], 0.5, 0);
        assert!(capped.is_empty());
    }
}

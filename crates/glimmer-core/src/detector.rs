//! Anchor-free face detector via ONNX Runtime.
//!
//! Three-stride (8/16/32) decoding with two anchors per cell, letterboxed
//! square input whose side comes from [`DetectorOptions::input_size`].

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_MEAN: f32 = 127.5;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_NMS_THRESHOLD: f32 = 0.4;
const DETECTOR_STRIDES: [usize; 3] = [8, 16, 32];
const DETECTOR_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input size {0}: must be a positive multiple of 32")]
    InvalidInputSize(usize),
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection knobs, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Side of the square network input, in pixels.
    pub input_size: usize,
    /// Minimum detection score for a box to be kept.
    pub score_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: 224,
            score_threshold: 0.5,
        }
    }
}

impl DetectorOptions {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.input_size == 0 || self.input_size % 32 != 0 {
            return Err(DetectorError::InvalidInputSize(self.input_size));
        }
        Ok(())
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the detector ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded face detector model"
        );

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "detector needs at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "detector output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces in a grayscale frame, returning boxes sorted by confidence.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        options: &DetectorOptions,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        options.validate()?;
        let expected = width as usize * height as usize;
        if expected == 0 || frame.len() < expected {
            return Err(DetectorError::InvalidFrame {
                expected,
                actual: frame.len(),
            });
        }

        let (input, letterbox) =
            preprocess(frame, width as usize, height as usize, options.input_size);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in DETECTOR_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                options.input_size,
                &letterbox,
                options.score_threshold,
            ));
        }

        Ok(nms(all_detections, DETECTOR_NMS_THRESHOLD))
    }
}

/// Letterbox a grayscale frame into a normalized square NCHW tensor.
fn preprocess(
    frame: &[u8],
    width: usize,
    height: usize,
    input_size: usize,
) -> (Array4<f32>, LetterboxInfo) {
    let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_size);
    let pad_x = (input_size - new_w) as f32 / 2.0;
    let pad_y = (input_size - new_h) as f32 / 2.0;

    let resized = crate::resize::bilinear(frame, width, height, new_w, new_h);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));

    for y in 0..input_size {
        for x in 0..input_size {
            let inside = y >= pad_y_start
                && y < pad_y_start + new_h
                && x >= pad_x_start
                && x < pad_x_start + new_w;
            let pixel = if inside {
                resized[(y - pad_y_start) * new_w + (x - pad_x_start)] as f32
            } else {
                DETECTOR_MEAN
            };

            let normalized = (pixel - DETECTOR_MEAN) / DETECTOR_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Discover output tensor ordering by name (`score_8`, `bbox_16`, ...).
///
/// Falls back to positional ordering: [0-2] = scores, [3-5] = bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0usize, 0usize); 3];
    for (slot, &stride) in DETECTOR_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => named[slot] = (score, bbox),
            _ => {
                tracing::info!(
                    ?names,
                    "detector output names not recognized, using positional mapping"
                );
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    named
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * DETECTOR_ANCHORS_PER_CELL;
    let stride_f = stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }

        let anchor_idx = idx / DETECTOR_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * stride_f;
        let anchor_cy = (anchor_idx / grid) as f32 * stride_f;

        let x1 = anchor_cx - bboxes[bbox_off] * stride_f;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * stride_f;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * stride_f;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * stride_f;

        let orig_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let orig_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let orig_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let orig_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        detections.push(BoundingBox {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by confidence, highest first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_options_validate() {
        assert!(DetectorOptions::default().validate().is_ok());
        let bad = DetectorOptions { input_size: 200, ..Default::default() };
        assert!(matches!(bad.validate(), Err(DetectorError::InvalidInputSize(200))));
        let zero = DetectorOptions { input_size: 0, ..Default::default() };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_and_sorts() {
        let detections = vec![
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_preprocess_letterbox_padding() {
        // 8x4 frame into a 32x32 input: scale 4, padded 8 rows top and bottom
        let frame = vec![255u8; 8 * 4];
        let (tensor, letterbox) = preprocess(&frame, 8, 4, 32);
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert!((letterbox.scale - 4.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 8.0).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        // Padding normalizes to 0.0, content to (255 - 127.5) / 128
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let content = (255.0 - DETECTOR_MEAN) / DETECTOR_STD;
        assert!((tensor[[0, 1, 16, 16]] - content).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        // 32x32 input, stride 32 → a single cell with two anchors
        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 0.0 };
        let scores = [0.9, 0.1];
        let bboxes = [0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 1.0, 1.0];
        let dets = decode_stride(&scores, &bboxes, 32, 32, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        // anchor at (0,0); box (0,0)-(16,16) in input space → halved in frame space
        assert_eq!(dets[0], make_bbox(0.0, 0.0, 8.0, 8.0, 0.9));
    }
}

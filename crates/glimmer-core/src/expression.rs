//! Facial expression classifier via ONNX Runtime.
//!
//! Takes a face crop out of a grayscale frame, resizes it to 64x64 and
//! runs an 8-way expression model (FER+ layout). The eight classes are
//! folded onto the seven [`EmotionLabel`]s.

use crate::types::{BoundingBox, EmotionLabel, ExpressionScores};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EXPRESSION_INPUT_SIZE: usize = 64;

/// Model output order. Contempt has no label of its own and counts as disgust.
const EXPRESSION_CLASSES: [EmotionLabel; 8] = [
    EmotionLabel::Neutral,
    EmotionLabel::Happy,
    EmotionLabel::Surprised,
    EmotionLabel::Sad,
    EmotionLabel::Angry,
    EmotionLabel::Disgusted,
    EmotionLabel::Fearful,
    EmotionLabel::Disgusted,
];

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty after clamping to the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ExpressionNet {
    session: Session,
}

impl ExpressionNet {
    /// Load the expression ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ExpressionError> {
        if !model_path.exists() {
            return Err(ExpressionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded expression model"
        );

        Ok(Self { session })
    }

    /// Score the expression of one detected face in a grayscale frame.
    pub fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<ExpressionScores, ExpressionError> {
        let crop = crop_face(frame, width as usize, height as usize, face)
            .ok_or(ExpressionError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("expression logits: {e}")))?;

        if logits.len() != EXPRESSION_CLASSES.len() {
            return Err(ExpressionError::InferenceFailed(format!(
                "expected {} expression logits, got {}",
                EXPRESSION_CLASSES.len(),
                logits.len()
            )));
        }

        Ok(fold_scores(&softmax(logits)))
    }
}

/// A clamped face crop, resized to the model input size.
struct FaceCrop {
    pixels: Vec<u8>,
}

fn crop_face(frame: &[u8], width: usize, height: usize, face: &BoundingBox) -> Option<FaceCrop> {
    if frame.len() < width * height {
        return None;
    }

    let x0 = face.x.max(0.0).floor() as usize;
    let y0 = face.y.max(0.0).floor() as usize;
    let x1 = ((face.x + face.width).ceil().max(0.0) as usize).min(width);
    let y1 = ((face.y + face.height).ceil().max(0.0) as usize).min(height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let crop_w = x1 - x0;
    let crop_h = y1 - y0;
    let mut region = Vec::with_capacity(crop_w * crop_h);
    for y in y0..y1 {
        region.extend_from_slice(&frame[y * width + x0..y * width + x1]);
    }

    Some(FaceCrop {
        pixels: crate::resize::bilinear(
            &region,
            crop_w,
            crop_h,
            EXPRESSION_INPUT_SIZE,
            EXPRESSION_INPUT_SIZE,
        ),
    })
}

/// The expression model takes raw 0–255 luma, single channel.
fn preprocess(crop: &FaceCrop) -> Array4<f32> {
    let size = EXPRESSION_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for y in 0..size {
        for x in 0..size {
            tensor[[0, 0, y, x]] = crop.pixels.get(y * size + x).copied().unwrap_or(0) as f32;
        }
    }
    tensor
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        exps
    }
}

fn fold_scores(probabilities: &[f32]) -> ExpressionScores {
    let mut scores = ExpressionScores::default();
    for (label, p) in EXPRESSION_CLASSES.iter().zip(probabilities) {
        scores.set(*label, scores.get(*label) + p);
    }
    scores
}

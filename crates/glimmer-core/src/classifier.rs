use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::expression::{ExpressionError, ExpressionNet};
use crate::types::ClassificationResult;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Model directory names under the model root.
pub const DETECTOR_MODEL: &str = "tiny_face_detector";
pub const EXPRESSION_MODEL: &str = "face_expression";
const MODEL_FILE: &str = "model.onnx";

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("expression: {0}")]
    Expression(#[from] ExpressionError),
}

/// Face + expression classification over a grayscale frame.
///
/// Results are ordered by detection confidence, most confident first.
pub trait Classifier: Send {
    fn detect_all_faces(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        options: &DetectorOptions,
    ) -> Result<Vec<ClassificationResult>, ClassifierError>;
}

/// `<model_dir>/<model-name>/model.onnx`
pub fn model_path(model_dir: &Path, model_name: &str) -> PathBuf {
    model_dir.join(model_name).join(MODEL_FILE)
}

/// ONNX-backed classifier: face detector followed by the expression net.
pub struct OnnxClassifier {
    detector: FaceDetector,
    expressions: ExpressionNet,
}

impl OnnxClassifier {
    pub fn load(model_dir: &Path) -> Result<Self, ClassifierError> {
        let detector = FaceDetector::load(&model_path(model_dir, DETECTOR_MODEL))?;
        let expressions = ExpressionNet::load(&model_path(model_dir, EXPRESSION_MODEL))?;
        Ok(Self {
            detector,
            expressions,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn detect_all_faces(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        options: &DetectorOptions,
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let boxes = self.detector.detect(frame, width, height, options)?;
        tracing::debug!(faces = boxes.len(), "faces detected");

        let mut results = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match self.expressions.classify(frame, width, height, &bbox) {
                Ok(scores) => results.push(ClassificationResult { bbox, scores }),
                // A box hanging off the frame edge has nothing to classify.
                Err(ExpressionError::EmptyCrop) => {
                    tracing::debug!(?bbox, "skipping face with empty crop");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(results)
    }
}

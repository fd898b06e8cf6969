//! glimmer-core: expression classification and reaction gating.
//!
//! Face detection and expression scoring run through ONNX Runtime on CPU.
//! The [`ReactionDebouncer`] decides which classifications deserve a
//! visible reaction.

pub mod classifier;
pub mod debounce;
pub mod detector;
pub mod expression;
mod resize;
pub mod types;

pub use classifier::{Classifier, ClassifierError, OnnxClassifier};
pub use debounce::ReactionDebouncer;
pub use detector::DetectorOptions;
pub use types::{BoundingBox, ClassificationResult, EmotionLabel, ExpressionScores};

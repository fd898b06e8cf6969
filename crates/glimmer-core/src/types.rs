use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the seven expressions the classifier can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl EmotionLabel {
    /// All labels in canonical (classifier) order.
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Neutral,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Fearful,
        EmotionLabel::Disgusted,
        EmotionLabel::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Fearful => "fearful",
            EmotionLabel::Disgusted => "disgusted",
            EmotionLabel::Surprised => "surprised",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion label: {0}")]
pub struct UnknownLabel(pub String);

impl FromStr for EmotionLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmotionLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// Bounding box for a detected face, in source-frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence for this box.
    pub confidence: f32,
}

/// Per-label expression confidences, each in [0, 1].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScores {
    scores: [f32; 7],
}

impl ExpressionScores {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (EmotionLabel, f32)>,
    {
        let mut scores = Self::default();
        for (label, score) in pairs {
            scores.set(label, score);
        }
        scores
    }

    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.scores[label.index()]
    }

    pub fn set(&mut self, label: EmotionLabel, score: f32) {
        self.scores[label.index()] = score;
    }

    /// Scores in canonical label order.
    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f32)> + '_ {
        EmotionLabel::ALL.into_iter().zip(self.scores.iter().copied())
    }

    /// The dominant emotion: highest score, earliest label on ties.
    ///
    /// NaN scores never win. Returns `None` only if every score is NaN.
    pub fn dominant(&self) -> Option<(EmotionLabel, f32)> {
        let mut best: Option<(EmotionLabel, f32)> = None;
        for (label, score) in self.iter() {
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((label, score)),
            }
        }
        best
    }
}

/// One detected face with its expression scores. Produced once per poll
/// and discarded after use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub bbox: BoundingBox,
    pub scores: ExpressionScores,
}

impl ClassificationResult {
    pub fn dominant(&self) -> Option<(EmotionLabel, f32)> {
        self.scores.dominant()
    }
}

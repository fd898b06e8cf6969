use glimmer_core::EmotionLabel;

/// What the app says and plays for one emotion.
#[derive(Debug)]
pub struct Recipe {
    /// Short label shown next to the video.
    pub label: &'static str,
    pub line: &'static str,
    /// Motif notes in Hz, struck in order.
    pub melody: &'static [f32],
}

impl Recipe {
    pub fn headline(&self) -> String {
        format!("You look {}...", self.label.to_lowercase())
    }
}

static NEUTRAL: Recipe = Recipe {
    label: "Calm",
    line: "You have that serene glow — camera can't keep up.",
    melody: &[440.0, 660.0, 880.0],
};

static HAPPY: Recipe = Recipe {
    label: "Happy",
    line: "Your smile should be a crime — stealing hearts everywhere.",
    melody: &[660.0, 880.0, 990.0, 1320.0],
};

static SAD: Recipe = Recipe {
    label: "A little blue",
    line: "If sadness was an art, you'd still be a masterpiece — here, smile?",
    melody: &[330.0, 247.0, 220.0],
};

static ANGRY: Recipe = Recipe {
    label: "Fiery",
    line: "Your intensity is impressive — but your smile would be lethal.",
    melody: &[220.0, 196.0, 174.0],
};

static FEARFUL: Recipe = Recipe {
    label: "Surprised",
    line: "Don't worry — the camera's only afraid of your beauty.",
    melody: &[880.0, 740.0, 660.0],
};

static DISGUSTED: Recipe = Recipe {
    label: "Hmm",
    line: "Even when you're picky, you look absolutely stunning.",
    melody: &[330.0, 392.0, 494.0],
};

static SURPRISED: Recipe = Recipe {
    label: "Surprised",
    line: "Wow — you just took my breath away all over again.",
    melody: &[990.0, 1320.0, 1650.0],
};

pub fn recipe_for(label: EmotionLabel) -> &'static Recipe {
    match label {
        EmotionLabel::Neutral => &NEUTRAL,
        EmotionLabel::Happy => &HAPPY,
        EmotionLabel::Sad => &SAD,
        EmotionLabel::Angry => &ANGRY,
        EmotionLabel::Fearful => &FEARFUL,
        EmotionLabel::Disgusted => &DISGUSTED,
        EmotionLabel::Surprised => &SURPRISED,
    }
}

//! Reaction debouncing.
//!
//! A sustained expression is classified several times a second; only the
//! first classification of a run should trigger a reaction. A different
//! label always gets through, the same label only once the cooldown has
//! elapsed since the last reaction.

use crate::types::EmotionLabel;
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1400);

#[derive(Debug, Clone)]
pub struct ReactionDebouncer {
    cooldown: Duration,
    last: Option<(EmotionLabel, Instant)>,
}

impl Default for ReactionDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl ReactionDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// Offer a candidate; returns `true` if it should produce a reaction.
    ///
    /// Same-label repeats pass only when strictly more than `cooldown` has
    /// elapsed since the last emitted reaction. A `now` earlier than the
    /// last reaction counts as zero elapsed time.
    pub fn offer(&mut self, candidate: EmotionLabel, now: Instant) -> bool {
        let emit = match self.last {
            None => true,
            Some((label, at)) => {
                label != candidate || now.saturating_duration_since(at) > self.cooldown
            }
        };
        if emit {
            self.last = Some((candidate, now));
        }
        emit
    }

    /// Last emitted label and when it was emitted.
    pub fn last(&self) -> Option<(EmotionLabel, Instant)> {
        self.last
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

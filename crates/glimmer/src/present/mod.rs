//! Presentation side effects: text, overlay box, particles, motifs.

pub mod audio;
pub mod terminal;

use glimmer_core::BoundingBox;
use std::time::Duration;

pub use audio::MotifPlayer;
pub use terminal::TerminalSink;

/// Label shown while no face is in view.
pub const NO_DETECTION: &str = "—";

pub const STATUS_LOADING: &str = "Loading face models…";
pub const STATUS_MODEL_ERROR: &str = "Error loading models. See log.";
pub const STATUS_CAMERA_DENIED: &str = "Camera access denied or not available.";
pub const STATUS_STOPPED: &str = "Camera stopped";

/// Where reactions end up. All effects are cosmetic and infallible from
/// the caller's point of view.
pub trait PresentationSink: Send + Sync {
    /// Status line; an empty string hides it.
    fn set_status(&self, text: &str);
    fn set_label(&self, text: &str);
    fn set_headline(&self, text: &str);
    fn set_message(&self, text: &str);
    fn draw_box(&self, bbox: &BoundingBox);
    fn clear_overlay(&self);
    fn spawn_particle(&self);
    fn play_motif(&self, frequencies: &[f32], duration: Duration);
}

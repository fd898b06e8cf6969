use super::{MotifPlayer, PresentationSink};
use glimmer_core::BoundingBox;
use rand::Rng;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const PARTICLE_LIFETIME: Duration = Duration::from_millis(1800);
const PARTICLE_ROW_WIDTH: usize = 40;

struct Particle {
    /// Horizontal position in [0, 1).
    x: f32,
    born: Instant,
}

#[derive(Default)]
struct Stage {
    status: String,
    label: String,
    headline: String,
    message: String,
    overlay: Option<BoundingBox>,
    particles: Vec<Particle>,
}

/// Renders reactions as lines of text and hands motifs to a [`MotifPlayer`].
pub struct TerminalSink<W: Write + Send = io::Stdout> {
    stage: Mutex<Stage>,
    out: Mutex<W>,
    player: Option<MotifPlayer>,
}

impl TerminalSink<io::Stdout> {
    pub fn new(player: Option<MotifPlayer>) -> Self {
        Self::with_writer(io::stdout(), player)
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn with_writer(out: W, player: Option<MotifPlayer>) -> Self {
        Self {
            stage: Mutex::new(Stage::default()),
            out: Mutex::new(out),
            player,
        }
    }

    fn stage(&self) -> MutexGuard<'_, Stage> {
        self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    /// Update a text field, printing only when it actually changes.
    fn update(
        &self,
        field: fn(&mut Stage) -> &mut String,
        text: &str,
        render: impl Fn(&str) -> String,
    ) {
        let changed = {
            let mut stage = self.stage();
            let slot = field(&mut *stage);
            if *slot == text {
                false
            } else {
                *slot = text.to_string();
                true
            }
        };
        if changed && !text.is_empty() {
            self.emit(&render(text));
        }
    }

    fn particle_row(particles: &[Particle]) -> String {
        let mut row = vec![' '; PARTICLE_ROW_WIDTH];
        for p in particles {
            let col = ((p.x * PARTICLE_ROW_WIDTH as f32) as usize).min(PARTICLE_ROW_WIDTH - 1);
            row[col] = '♥';
        }
        row.into_iter().collect::<String>().trim_end().to_string()
    }

    #[cfg(test)]
    pub fn live_particles(&self) -> usize {
        let now = Instant::now();
        self.stage()
            .particles
            .iter()
            .filter(|p| now.duration_since(p.born) < PARTICLE_LIFETIME)
            .count()
    }

    #[cfg(test)]
    pub fn overlay(&self) -> Option<BoundingBox> {
        self.stage().overlay.clone()
    }
}

impl<W: Write + Send> PresentationSink for TerminalSink<W> {
    fn set_status(&self, text: &str) {
        self.update(|s| &mut s.status, text, |t| format!("[{t}]"));
    }

    fn set_label(&self, text: &str) {
        self.update(|s| &mut s.label, text, |t| format!("emotion: {t}"));
    }

    fn set_headline(&self, text: &str) {
        self.update(|s| &mut s.headline, text, |t| format!("  {t}"));
    }

    fn set_message(&self, text: &str) {
        self.update(|s| &mut s.message, text, |t| format!("  {t}"));
    }

    fn draw_box(&self, bbox: &BoundingBox) {
        tracing::trace!(
            x = bbox.x,
            y = bbox.y,
            width = bbox.width,
            height = bbox.height,
            "overlay box"
        );
        self.stage().overlay = Some(bbox.clone());
    }

    fn clear_overlay(&self) {
        self.stage().overlay = None;
    }

    fn spawn_particle(&self) {
        let row = {
            let mut stage = self.stage();
            let now = Instant::now();
            stage
                .particles
                .retain(|p| now.duration_since(p.born) < PARTICLE_LIFETIME);
            stage.particles.push(Particle {
                x: rand::thread_rng().gen_range(0.0..1.0),
                born: now,
            });
            Self::particle_row(&stage.particles)
        };
        self.emit(&row);
    }

    fn play_motif(&self, frequencies: &[f32], duration: Duration) {
        if let Some(player) = &self.player {
            player.play(frequencies, duration);
        }
    }
}

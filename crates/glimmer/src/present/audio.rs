//! Motif synthesis and playback.
//!
//! A motif is a short run of sine notes. Note `i` strikes at `i * 40ms`,
//! decays exponentially until the motif duration and is cut at
//! `duration + i * 20ms`. A master envelope fades everything in over 20ms.

use rodio::{OutputStream, Source};
use std::f32::consts::PI;
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44_100;
const NOTE_STAGGER_SECS: f32 = 0.04;
const NOTE_TAIL_SECS: f32 = 0.02;
const MASTER_ATTACK_SECS: f32 = 0.02;
const MASTER_GAIN: f32 = 0.08;
const NOTE_GAIN: f32 = 0.06;
const SILENT_GAIN: f32 = 0.0001;

/// Exponential ramp from `from` to `to` as `progress` goes 0 → 1.
fn exp_ramp(from: f32, to: f32, progress: f32) -> f32 {
    from * (to / from).powf(progress.clamp(0.0, 1.0))
}

/// Finite mono source rendering one motif.
pub struct MotifSource {
    notes: Vec<f32>,
    duration: f32,
    sample: u64,
    total_samples: u64,
}

impl MotifSource {
    pub fn new(notes: &[f32], duration: Duration) -> Self {
        let duration = duration.as_secs_f32();
        let length = Self::length_secs(notes.len(), duration);
        Self {
            notes: notes.to_vec(),
            duration,
            sample: 0,
            total_samples: (length * SAMPLE_RATE as f32).ceil() as u64,
        }
    }

    /// The last note stops at `duration + (n - 1) * 20ms`.
    fn length_secs(note_count: usize, duration: f32) -> f32 {
        if note_count == 0 {
            return 0.0;
        }
        duration + (note_count - 1) as f32 * NOTE_TAIL_SECS
    }

    fn master_gain(t: f32) -> f32 {
        if t < MASTER_ATTACK_SECS {
            exp_ramp(SILENT_GAIN, MASTER_GAIN, t / MASTER_ATTACK_SECS)
        } else {
            MASTER_GAIN
        }
    }

    fn note_gain(&self, i: usize, t: f32) -> f32 {
        let peak_at = i as f32 * NOTE_TAIL_SECS;
        if t < peak_at || peak_at >= self.duration {
            SILENT_GAIN
        } else {
            exp_ramp(NOTE_GAIN, SILENT_GAIN, (t - peak_at) / (self.duration - peak_at))
        }
    }

    /// Signal value at `t` seconds after the motif starts.
    pub fn sample_at(&self, t: f32) -> f32 {
        let mut mix = 0.0;
        for (i, &freq) in self.notes.iter().enumerate() {
            let start = i as f32 * NOTE_STAGGER_SECS;
            let stop = self.duration + i as f32 * NOTE_TAIL_SECS;
            if t < start || t >= stop {
                continue;
            }
            mix += self.note_gain(i, t) * (2.0 * PI * freq * (t - start)).sin();
        }
        Self::master_gain(t) * mix
    }
}

impl Iterator for MotifSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.sample >= self.total_samples {
            return None;
        }
        let t = self.sample as f32 / SAMPLE_RATE as f32;
        self.sample += 1;
        Some(self.sample_at(t))
    }
}

impl Source for MotifSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f32(
            self.total_samples as f32 / SAMPLE_RATE as f32,
        ))
    }
}

enum AudioCommand {
    Play { notes: Vec<f32>, duration: Duration },
}

/// Plays motifs on a lazily started audio thread.
///
/// The output stream is not `Send`, so it lives on that thread. Motifs are
/// mixed rather than queued. Playback failures are never surfaced.
pub struct MotifPlayer {
    tx: Mutex<Option<Sender<AudioCommand>>>,
}

impl Default for MotifPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MotifPlayer {
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    fn ensure_thread(&self) -> Option<Sender<AudioCommand>> {
        let mut guard = self.tx.lock().ok()?;
        if let Some(tx) = guard.as_ref() {
            return Some(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();
        let spawned = thread::Builder::new()
            .name("glimmer-audio".to_string())
            .spawn(move || {
                let output = match OutputStream::try_default() {
                    Ok(output) => Some(output),
                    Err(e) => {
                        tracing::debug!(error = %e, "no audio output; motifs will be silent");
                        None
                    }
                };

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Play { notes, duration } => {
                            let Some((_, handle)) = output.as_ref() else {
                                continue;
                            };
                            if let Err(e) = handle.play_raw(MotifSource::new(&notes, duration)) {
                                tracing::debug!(error = %e, "motif playback failed");
                            }
                        }
                    }
                }
            });

        match spawned {
            Ok(_) => {
                *guard = Some(tx.clone());
                Some(tx)
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed to start audio thread");
                None
            }
        }
    }

    pub fn play(&self, notes: &[f32], duration: Duration) {
        if let Some(tx) = self.ensure_thread() {
            let _ = tx.send(AudioCommand::Play {
                notes: notes.to_vec(),
                duration,
            });
        }
    }
}

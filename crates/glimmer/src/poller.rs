use crate::config::Config;
use crate::engine::{EngineHandle, Sample};
use crate::present::{PresentationSink, NO_DETECTION};
use crate::recipe::recipe_for;
use glimmer_core::{EmotionLabel, ReactionDebouncer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    /// The dominant emotion must score strictly above this.
    pub confidence_threshold: f32,
    pub cooldown: Duration,
    pub particles: usize,
    pub particle_stagger: Duration,
    pub motif_duration: Duration,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            confidence_threshold: config.confidence_threshold,
            cooldown: config.cooldown(),
            particles: config.particles_per_reaction,
            particle_stagger: Duration::from_millis(config.particle_stagger_ms),
            motif_duration: Duration::from_millis(config.motif_duration_ms),
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No usable frame; nothing touched.
    NotReady,
    /// Detection failed; logged, retried next tick.
    Failed,
    NoFace,
    /// A face was found but no expression was confident enough.
    BelowThreshold,
    /// Same emotion as the last reaction, still cooling down.
    Suppressed(EmotionLabel),
    Reacted(EmotionLabel),
}

/// Samples the live frame on a fixed cadence and reacts to the dominant
/// emotion of the first face.
///
/// Cycles are serialized: the next tick is taken only after the current
/// inference has answered, and ticks missed meanwhile are skipped.
pub struct DetectionPoller {
    engine: EngineHandle,
    sink: Arc<dyn PresentationSink>,
    debouncer: ReactionDebouncer,
    settings: PollerSettings,
}

impl DetectionPoller {
    pub fn new(
        engine: EngineHandle,
        sink: Arc<dyn PresentationSink>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            engine,
            sink,
            debouncer: ReactionDebouncer::new(settings.cooldown),
            settings,
        }
    }

    /// Poll until `cancel` fires. A cycle still waiting on the classifier
    /// when that happens is abandoned and its result dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(interval = ?self.settings.interval, "detection poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        outcome = self.tick() => tracing::trace!(?outcome, "poll cycle"),
                    }
                }
            }
        }

        tracing::debug!("detection poller stopped");
    }

    pub async fn tick(&mut self) -> TickOutcome {
        self.tick_at(Instant::now()).await
    }

    /// Run one cycle, using `now` as the reaction timestamp.
    pub async fn tick_at(&mut self, now: Instant) -> TickOutcome {
        let faces = match self.engine.sample().await {
            Ok(Sample::NotReady) => return TickOutcome::NotReady,
            Ok(Sample::Faces(faces)) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "expression detection failed");
                return TickOutcome::Failed;
            }
        };

        self.sink.clear_overlay();
        let Some(face) = faces.first() else {
            self.sink.set_label(NO_DETECTION);
            return TickOutcome::NoFace;
        };
        self.sink.draw_box(&face.bbox);

        let Some((label, score)) = face.dominant() else {
            return TickOutcome::BelowThreshold;
        };
        if score <= self.settings.confidence_threshold {
            tracing::debug!(emotion = %label, score, "dominant emotion below threshold");
            return TickOutcome::BelowThreshold;
        }

        if !self.debouncer.offer(label, now) {
            return TickOutcome::Suppressed(label);
        }

        self.react(label, score);
        TickOutcome::Reacted(label)
    }

    fn react(&self, label: EmotionLabel, score: f32) {
        let recipe = recipe_for(label);
        tracing::info!(emotion = %label, score, "reacting");

        self.sink.set_label(recipe.label);
        self.sink.set_headline(&recipe.headline());
        self.sink.set_message(recipe.line);

        if self.settings.particles > 0 {
            self.sink.spawn_particle();
        }
        if self.settings.particles > 1 {
            let sink = Arc::clone(&self.sink);
            let remaining = self.settings.particles - 1;
            let stagger = self.settings.particle_stagger;
            tokio::spawn(async move {
                for _ in 0..remaining {
                    tokio::time::sleep(stagger).await;
                    sink.spawn_particle();
                }
            });
        }

        self.sink.play_motif(recipe.melody, self.settings.motif_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::testutil::{
        face, happy_face, inference_error, FakeOpener, RecordingSink, ScriptedClassifier,
        SinkEvent,
    };
    use glimmer_core::{ClassificationResult, DetectorOptions};
    use EmotionLabel::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    async fn poller_with(
        classifier: ScriptedClassifier,
        settings: PollerSettings,
    ) -> (DetectionPoller, Arc<RecordingSink>) {
        let engine = spawn_engine(classifier, FakeOpener::ready(), DetectorOptions::default()).unwrap();
        engine.open().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let poller = DetectionPoller::new(engine, sink.clone(), settings);
        (poller, sink)
    }

    fn scripted(results: Vec<Vec<ClassificationResult>>) -> ScriptedClassifier {
        ScriptedClassifier::scripted(results.into_iter().map(Ok).collect(), vec![]).0
    }

    #[tokio::test]
    async fn test_reference_sequence() {
        let classifier = scripted(vec![
            vec![happy_face(0.9)],
            vec![happy_face(0.9)],
            vec![face(&[(Sad, 0.6)])],
            vec![happy_face(0.9)],
        ]);
        let (mut poller, sink) = poller_with(classifier, PollerSettings::default()).await;

        let t0 = Instant::now();
        let mut outcomes = Vec::new();
        for at in [0, 500, 600, 2000] {
            outcomes.push(poller.tick_at(t0 + ms(at)).await);
        }

        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Reacted(Happy),
                TickOutcome::Suppressed(Happy),
                TickOutcome::Reacted(Sad),
                TickOutcome::Reacted(Happy),
            ]
        );
        assert_eq!(sink.motifs(), 3);
    }

    #[tokio::test]
    async fn test_reaction_fans_out_recipe() {
        let (mut poller, sink) =
            poller_with(scripted(vec![vec![happy_face(0.9)]]), PollerSettings::default()).await;

        assert_eq!(poller.tick().await, TickOutcome::Reacted(Happy));

        let events = sink.events();
        let recipe = recipe_for(Happy);
        assert_eq!(events[0], SinkEvent::ClearOverlay);
        assert_eq!(events[1], SinkEvent::DrawBox);
        assert!(events.contains(&SinkEvent::Label("Happy".into())));
        assert!(events.contains(&SinkEvent::Headline("You look happy...".into())));
        assert!(events.contains(&SinkEvent::Message(recipe.line.into())));
        assert!(events.contains(&SinkEvent::Motif(recipe.melody.to_vec(), ms(420))));
    }

    #[tokio::test]
    async fn test_below_threshold_still_draws_box() {
        let classifier = scripted(vec![
            vec![face(&[(Happy, 0.3), (Neutral, 0.2)])],
            vec![happy_face(0.35)],
        ]);
        let (mut poller, sink) = poller_with(classifier, PollerSettings::default()).await;

        assert_eq!(poller.tick().await, TickOutcome::BelowThreshold);
        assert_eq!(poller.tick().await, TickOutcome::BelowThreshold);
        assert_eq!(sink.count(|e| matches!(e, SinkEvent::DrawBox)), 2);
        assert_eq!(sink.count(|e| matches!(e, SinkEvent::Label(_))), 0);
        assert_eq!(sink.motifs(), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_ignores_cooldown_state() {
        let classifier = scripted(vec![vec![happy_face(0.2)], vec![happy_face(0.9)]]);
        let (mut poller, sink) = poller_with(classifier, PollerSettings::default()).await;
        let t0 = Instant::now();

        assert_eq!(poller.tick_at(t0).await, TickOutcome::BelowThreshold);
        // The low-confidence cycle did not consume the cooldown window
        assert_eq!(poller.tick_at(t0 + ms(1)).await, TickOutcome::Reacted(Happy));
        assert_eq!(sink.motifs(), 1);
    }

    #[tokio::test]
    async fn test_no_face_resets_label() {
        let (mut poller, sink) = poller_with(scripted(vec![vec![]]), PollerSettings::default()).await;

        assert_eq!(poller.tick().await, TickOutcome::NoFace);
        assert_eq!(
            sink.events(),
            vec![SinkEvent::ClearOverlay, SinkEvent::Label(NO_DETECTION.into())]
        );
    }

    #[tokio::test]
    async fn test_only_first_face_is_used() {
        let classifier = scripted(vec![vec![face(&[(Sad, 0.8)]), happy_face(0.99)]]);
        let (mut poller, _sink) = poller_with(classifier, PollerSettings::default()).await;
        assert_eq!(poller.tick().await, TickOutcome::Reacted(Sad));
    }

    #[tokio::test]
    async fn test_failure_is_not_fatal() {
        let (classifier, _) =
            ScriptedClassifier::scripted(vec![Err(inference_error())], vec![happy_face(0.9)]);
        let (mut poller, sink) = poller_with(classifier, PollerSettings::default()).await;

        assert_eq!(poller.tick().await, TickOutcome::Failed);
        assert!(sink.events().is_empty());
        assert_eq!(poller.tick().await, TickOutcome::Reacted(Happy));
    }

    #[tokio::test]
    async fn test_not_ready_frame_is_a_no_op() {
        let (classifier, calls) = ScriptedClassifier::always(vec![happy_face(0.9)]);
        let engine =
            spawn_engine(classifier, FakeOpener::not_ready(), DetectorOptions::default()).unwrap();
        engine.open().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut poller = DetectionPoller::new(engine, sink.clone(), PollerSettings::default());

        assert_eq!(poller.tick().await, TickOutcome::NotReady);
        assert!(sink.events().is_empty());
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn test_particles_are_staggered() {
        let settings = PollerSettings { particle_stagger: ms(20), ..Default::default() };
        let (mut poller, sink) = poller_with(scripted(vec![vec![happy_face(0.9)]]), settings).await;

        poller.tick().await;
        assert_eq!(sink.particles(), 1);
        tokio::time::sleep(ms(200)).await;
        assert_eq!(sink.particles(), 3);
    }

    #[tokio::test]
    async fn test_run_never_overlaps_inferences() {
        let (classifier, calls) = ScriptedClassifier::always(vec![happy_face(0.9)]);
        let classifier = classifier.with_delay(ms(50));
        let in_flight = classifier.in_flight.clone();
        let settings = PollerSettings { interval: ms(10), ..Default::default() };
        let (poller, _sink) = poller_with(classifier, settings).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(cancel.clone()));
        tokio::time::sleep(ms(400)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(in_flight.peak(), 1);
        // A 10ms cadence against 50ms inferences: missed ticks are skipped,
        // not queued up.
        let n = calls.count();
        assert!((2..=12).contains(&n), "{n} inferences in 400ms");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (classifier, _) = ScriptedClassifier::always(vec![]);
        let (poller, _sink) = poller_with(classifier, PollerSettings::default()).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(ms(500), task).await.unwrap().unwrap();
    }
}

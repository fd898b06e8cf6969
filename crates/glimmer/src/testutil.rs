//! Fakes for the classifier, camera and presentation seams.

use crate::engine::SourceOpener;
use crate::present::PresentationSink;
use glimmer_core::expression::ExpressionError;
use glimmer_core::{
    BoundingBox, ClassificationResult, Classifier, ClassifierError, DetectorOptions, EmotionLabel,
    ExpressionScores,
};
use glimmer_hw::{CameraError, Frame, FrameSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn face(scores: &[(EmotionLabel, f32)]) -> ClassificationResult {
    ClassificationResult {
        bbox: BoundingBox { x: 10.0, y: 20.0, width: 100.0, height: 120.0, confidence: 0.9 },
        scores: ExpressionScores::from_pairs(scores.iter().copied()),
    }
}

pub fn happy_face(score: f32) -> ClassificationResult {
    face(&[(EmotionLabel::Happy, score)])
}

pub fn inference_error() -> ClassifierError {
    ClassifierError::Expression(ExpressionError::InferenceFailed("scripted failure".into()))
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Tracks how many of something exist right now and the most that ever did.
#[derive(Clone, Default)]
pub struct LiveCounter {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl LiveCounter {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

type Scripted = Result<Vec<ClassificationResult>, ClassifierError>;

/// Replays scripted results, then repeats a fallback forever.
pub struct ScriptedClassifier {
    script: VecDeque<Scripted>,
    fallback: Vec<ClassificationResult>,
    delay: Duration,
    calls: Counter,
    pub in_flight: LiveCounter,
}

impl ScriptedClassifier {
    pub fn always(faces: Vec<ClassificationResult>) -> (Self, Counter) {
        Self::scripted(Vec::new(), faces)
    }

    pub fn scripted(script: Vec<Scripted>, fallback: Vec<ClassificationResult>) -> (Self, Counter) {
        let calls = Counter::default();
        let classifier = Self {
            script: script.into(),
            fallback,
            delay: Duration::ZERO,
            calls: calls.clone(),
            in_flight: LiveCounter::default(),
        };
        (classifier, calls)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Classifier for ScriptedClassifier {
    fn detect_all_faces(
        &mut self,
        _frame: &[u8],
        _width: u32,
        _height: u32,
        _options: &DetectorOptions,
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        self.in_flight.enter();
        self.calls.bump();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = self
            .script
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        self.in_flight.leave();
        result
    }
}

pub struct FakeSource {
    mode: OpenMode,
    live: LiveCounter,
    reads: Counter,
}

impl FrameSource for FakeSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.reads.bump();
        match self.mode {
            OpenMode::Broken => Err(CameraError::DeviceBusy("/dev/fake".into())),
            OpenMode::NotReady => Ok(None),
            _ => Ok(Some(Frame::new(vec![128; 16], 4, 4))),
        }
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.live.leave();
    }
}

#[derive(Clone, Copy)]
enum OpenMode {
    Ready,
    NotReady,
    Denied,
    /// Opens, but every frame read fails.
    Broken,
}

pub struct FakeOpener {
    mode: OpenMode,
    warmup: usize,
    pub live: LiveCounter,
    pub opens: Counter,
    /// Frames read from any source this opener produced.
    pub reads: Counter,
}

impl FakeOpener {
    fn with_mode(mode: OpenMode) -> Self {
        Self {
            mode,
            warmup: 0,
            live: LiveCounter::default(),
            opens: Counter::default(),
            reads: Counter::default(),
        }
    }

    pub fn ready() -> Self {
        Self::with_mode(OpenMode::Ready)
    }

    pub fn not_ready() -> Self {
        Self::with_mode(OpenMode::NotReady)
    }

    pub fn denied() -> Self {
        Self::with_mode(OpenMode::Denied)
    }

    pub fn broken() -> Self {
        Self::with_mode(OpenMode::Broken)
    }

    pub fn with_warmup(mut self, frames: usize) -> Self {
        self.warmup = frames;
        self
    }
}

impl SourceOpener for FakeOpener {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
        self.opens.bump();
        if let OpenMode::Denied = self.mode {
            return Err(CameraError::PermissionDenied("/dev/fake".into()));
        }
        self.live.enter();
        Ok(Box::new(FakeSource {
            mode: self.mode,
            live: self.live.clone(),
            reads: self.reads.clone(),
        }))
    }

    fn warmup_frames(&self) -> usize {
        self.warmup
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Status(String),
    Label(String),
    Headline(String),
    Message(String),
    DrawBox,
    ClearOverlay,
    Particle,
    Motif(Vec<f32>, Duration),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn motifs(&self) -> usize {
        self.count(|e| matches!(e, SinkEvent::Motif(..)))
    }

    pub fn particles(&self) -> usize {
        self.count(|e| matches!(e, SinkEvent::Particle))
    }

    pub fn count(&self, pred: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl PresentationSink for RecordingSink {
    fn set_status(&self, text: &str) {
        self.record(SinkEvent::Status(text.to_string()));
    }

    fn set_label(&self, text: &str) {
        self.record(SinkEvent::Label(text.to_string()));
    }

    fn set_headline(&self, text: &str) {
        self.record(SinkEvent::Headline(text.to_string()));
    }

    fn set_message(&self, text: &str) {
        self.record(SinkEvent::Message(text.to_string()));
    }

    fn draw_box(&self, _bbox: &BoundingBox) {
        self.record(SinkEvent::DrawBox);
    }

    fn clear_overlay(&self) {
        self.record(SinkEvent::ClearOverlay);
    }

    fn spawn_particle(&self) {
        self.record(SinkEvent::Particle);
    }

    fn play_motif(&self, frequencies: &[f32], duration: Duration) {
        self.record(SinkEvent::Motif(frequencies.to_vec(), duration));
    }
}

use glimmer_core::{ClassificationResult, Classifier, ClassifierError, DetectorOptions};
use glimmer_hw::{Camera, CameraError, FrameSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of sampling the current frame.
#[derive(Debug)]
pub enum Sample {
    /// No source is open, or the source has no usable picture yet.
    NotReady,
    /// Faces found in the frame, most confident first. May be empty.
    Faces(Vec<ClassificationResult>),
}

/// Opens the frame source for a capture session.
///
/// Called on the engine thread, so the source itself need not be `Send`.
pub trait SourceOpener: Send + 'static {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError>;

    /// Frames read and discarded right after opening.
    fn warmup_frames(&self) -> usize {
        0
    }
}

/// Opens a V4L2 camera. Its first frames are discarded while
/// auto-exposure settles.
pub struct CameraOpener {
    device: String,
    warmup_frames: usize,
}

impl CameraOpener {
    pub fn new(device: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device: device.into(),
            warmup_frames,
        }
    }
}

impl SourceOpener for CameraOpener {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.device)?;
        tracing::info!(
            device = %self.device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(Box::new(camera))
    }

    fn warmup_frames(&self) -> usize {
        self.warmup_frames
    }
}

/// Read and discard `count` frames. A source that cannot deliver a frame
/// is not usable; unready (dark) frames are fine.
fn warm_up(source: &mut dyn FrameSource, count: usize) -> Result<(), CameraError> {
    if count > 0 {
        tracing::debug!(count, "discarding warmup frames");
    }
    for _ in 0..count {
        source.next_frame()?;
    }
    Ok(())
}

fn open_source<O: SourceOpener>(opener: &mut O) -> Result<Box<dyn FrameSource>, CameraError> {
    let mut source = opener.open()?;
    warm_up(source.as_mut(), opener.warmup_frames())?;
    Ok(source)
}

/// Messages sent from async code to the engine thread.
enum EngineRequest {
    Open {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Sample {
        reply: oneshot::Sender<Result<Sample, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Open the frame source, replacing any source already open.
    pub async fn open(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Open { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Release the frame source. Closing when nothing is open is a no-op.
    pub async fn close(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Close { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Read the current frame and classify it.
    pub async fn sample(&self) -> Result<Sample, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Sample { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The classifier is loaded by the caller and lives as long as the thread,
/// across any number of open/close cycles. Requests are handled one at a
/// time, so two inferences never run concurrently.
pub fn spawn_engine<C, O>(
    classifier: C,
    opener: O,
    options: DetectorOptions,
) -> Result<EngineHandle, EngineError>
where
    C: Classifier + 'static,
    O: SourceOpener,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("glimmer-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut classifier = classifier;
            let mut opener = opener;
            let mut source: Option<Box<dyn FrameSource>> = None;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Open { reply } => {
                        // Release the old handle before acquiring a new one.
                        source = None;
                        let result = match open_source(&mut opener) {
                            Ok(opened) => {
                                source = Some(opened);
                                Ok(())
                            }
                            Err(e) => Err(EngineError::from(e)),
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::Close { reply } => {
                        if source.take().is_some() {
                            tracing::debug!("frame source closed");
                        }
                        let _ = reply.send(());
                    }
                    EngineRequest::Sample { reply } => {
                        let result = run_sample(&mut source, &mut classifier, &options);
                        // The poller may have been cancelled meanwhile.
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_sample<C: Classifier>(
    source: &mut Option<Box<dyn FrameSource>>,
    classifier: &mut C,
    options: &DetectorOptions,
) -> Result<Sample, EngineError> {
    let Some(source) = source.as_mut() else {
        return Ok(Sample::NotReady);
    };
    let Some(frame) = source.next_frame()? else {
        return Ok(Sample::NotReady);
    };

    let faces = classifier.detect_all_faces(&frame.data, frame.width, frame.height, options)?;
    tracing::debug!(seq = frame.sequence, faces = faces.len(), "frame classified");
    Ok(Sample::Faces(faces))
}

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::poller::{DetectionPoller, PollerSettings};
use crate::present::{PresentationSink, STATUS_CAMERA_DENIED, STATUS_STOPPED};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to start capture: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poller: PollerSettings,
    /// Pause between tearing down a running session and starting again.
    pub restart_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poller: PollerSettings::from_config(config),
            restart_delay: config.restart_delay(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the camera for the lifetime of one capture and the poller that
/// samples it.
///
/// Every start gets a fresh poller, so reaction cooldowns never carry over
/// from a previous session.
pub struct CaptureSession {
    engine: EngineHandle,
    sink: Arc<dyn PresentationSink>,
    settings: SessionSettings,
    running: Option<Running>,
}

impl CaptureSession {
    pub fn new(
        engine: EngineHandle,
        sink: Arc<dyn PresentationSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            engine,
            sink,
            settings,
            running: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// Open the camera and start polling.
    ///
    /// An active session is fully stopped first, and the camera is only
    /// reopened after the old handle has been released.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.is_active() {
            self.stop().await;
            tokio::time::sleep(self.settings.restart_delay).await;
        }

        if let Err(e) = self.engine.open().await {
            tracing::error!(error = %e, "camera unavailable");
            self.sink.set_status(STATUS_CAMERA_DENIED);
            return Err(e.into());
        }
        self.sink.set_status("");

        let cancel = CancellationToken::new();
        let poller = DetectionPoller::new(
            self.engine.clone(),
            Arc::clone(&self.sink),
            self.settings.poller.clone(),
        );
        let task = tokio::spawn(poller.run(cancel.clone()));
        self.running = Some(Running { cancel, task });

        tracing::info!("capture session started");
        Ok(())
    }

    /// Stop polling and release the camera. Does nothing when inactive.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "detection poller task failed");
        }
        if let Err(e) = self.engine.close().await {
            tracing::warn!(error = %e, "failed to release camera");
        }

        self.sink.clear_overlay();
        self.sink.set_status(STATUS_STOPPED);
        tracing::info!("capture session stopped");
    }

    /// Stop when active, start otherwise.
    pub async fn toggle(&mut self) -> Result<(), SessionError> {
        if self.is_active() {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }
}

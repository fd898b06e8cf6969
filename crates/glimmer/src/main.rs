use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glimmer_core::{Classifier, EmotionLabel, OnnxClassifier};
use glimmer_hw::Camera;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod poller;
mod present;
mod recipe;
mod session;
#[cfg(test)]
mod testutil;

use config::Config;
use engine::{spawn_engine, CameraOpener};
use present::{MotifPlayer, PresentationSink, TerminalSink, STATUS_LOADING, STATUS_MODEL_ERROR};
use session::{CaptureSession, SessionSettings};

#[derive(Parser)]
#[command(name = "glimmer", about = "Reacts to the emotion on your face")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and react to expressions
    Run {
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Camera device (e.g., "/dev/video0")
        #[arg(short, long)]
        device: Option<String>,
        /// Model directory
        #[arg(short, long)]
        models: Option<PathBuf>,
        /// Disable motifs
        #[arg(long)]
        mute: bool,
    },
    /// List capture devices
    Devices,
    /// Classify the faces in a still image
    Classify {
        image: PathBuf,
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Model directory
        #[arg(short, long)]
        models: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Play the motif for one emotion
    Motif {
        /// Emotion name (e.g., "happy", "sad")
        emotion: EmotionLabel,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            device,
            models,
            mute,
        } => {
            let mut config = load_config(config.as_deref(), models)?;
            if let Some(device) = device {
                config.camera_device = device;
            }
            if mute {
                config.audio_enabled = false;
            }
            run(config).await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Classify {
            image,
            config,
            models,
            json,
        } => {
            let config = load_config(config.as_deref(), models)?;
            classify(&image, &config, json)?;
        }
        Commands::Motif { emotion } => {
            let recipe = recipe::recipe_for(emotion);
            let duration = Config::default().motif_duration_ms;
            let duration = Duration::from_millis(duration);
            println!("{}: {:?} Hz", recipe.label, recipe.melody);
            MotifPlayer::new().play(recipe.melody, duration);
            // Let the audio thread finish the tail of the last note.
            tokio::time::sleep(duration + Duration::from_millis(400)).await;
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let player = config.audio_enabled.then(MotifPlayer::new);
    let sink: Arc<dyn PresentationSink> = Arc::new(TerminalSink::new(player));

    sink.set_status(STATUS_LOADING);
    let model_dir = config.model_dir.clone();
    let loaded = tokio::task::spawn_blocking(move || OnnxClassifier::load(&model_dir)).await?;
    let classifier = match loaded {
        Ok(classifier) => classifier,
        Err(e) => {
            tracing::error!(error = %e, dir = %config.model_dir.display(), "model loading failed");
            sink.set_status(STATUS_MODEL_ERROR);
            return Err(e.into());
        }
    };
    tracing::info!(dir = %config.model_dir.display(), "models loaded");

    let opener = CameraOpener::new(config.camera_device.clone(), config.warmup_frames);
    let engine = spawn_engine(classifier, opener, config.detector_options())?;
    let mut session = CaptureSession::new(engine, sink, SessionSettings::from_config(&config));

    // A denied camera is already on the status line; the toggle can retry.
    let _ = session.start().await;
    println!("Press Enter to toggle the camera, q to quit.");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    control(&mut session, BufReader::new(tokio::io::stdin()), shutdown).await?;

    session.stop().await;
    tracing::info!("glimmer shutting down");
    Ok(())
}

/// Config file and environment, then the `--models` flag on top.
fn load_config(path: Option<&Path>, models: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load(path)?;
    if let Some(models) = models {
        config.model_dir = models;
    }
    Ok(config)
}

/// Handle keyboard control until `q` or `shutdown`.
///
/// Enter toggles the camera. When input ends (stdin redirected or closed)
/// the session keeps running until `shutdown` completes.
async fn control<R>(
    session: &mut CaptureSession,
    input: R,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tokio::pin!(shutdown);
    let mut lines = input.lines();
    let mut interactive = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line(), if interactive => match line? {
                Some(line) if line.trim() == "q" => break,
                Some(_) => {
                    let _ = session.toggle().await;
                }
                None => {
                    tracing::info!("input closed, press Ctrl-C to quit");
                    interactive = false;
                }
            },
        }
    }
    Ok(())
}

fn classify(image: &Path, config: &Config, json: bool) -> Result<()> {
    let img = image::open(image)
        .with_context(|| format!("failed to open {}", image.display()))?
        .to_luma8();
    let (width, height) = img.dimensions();

    let mut classifier = OnnxClassifier::load(&config.model_dir)?;
    let faces = classifier.detect_all_faces(img.as_raw(), width, height, &config.detector_options())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&faces)?);
        return Ok(());
    }

    if faces.is_empty() {
        println!("No faces found");
    }
    for (i, face) in faces.iter().enumerate() {
        let b = &face.bbox;
        let dominant = match face.dominant() {
            Some((label, score)) => format!("{label} ({score:.2})"),
            None => "unknown".to_string(),
        };
        println!(
            "face {i}: {dominant} at {:.0},{:.0} {:.0}x{:.0} (detector {:.2})",
            b.x, b.y, b.width, b.height, b.confidence
        );
    }
    Ok(())
}

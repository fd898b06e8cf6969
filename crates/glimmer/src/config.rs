use glimmer_core::DetectorOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration.
///
/// Layered: built-in defaults, then an optional TOML file, then
/// `GLIMMER_*` environment variables. CLI flags are applied by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Root of the `<model-name>/model.onnx` tree.
    pub model_dir: PathBuf,
    /// Time between detection polls.
    pub poll_interval_ms: u64,
    /// Minimum time between two reactions to the same emotion.
    pub cooldown_ms: u64,
    /// Dominant emotion must score strictly above this to react.
    pub confidence_threshold: f32,
    /// Square detector input side, multiple of 32.
    pub input_size: usize,
    /// Minimum face detection score.
    pub score_threshold: f32,
    /// Frames discarded right after opening the camera.
    pub warmup_frames: usize,
    /// Pause between tearing a session down and starting it again.
    pub restart_delay_ms: u64,
    pub motif_duration_ms: u64,
    pub particles_per_reaction: usize,
    pub particle_stagger_ms: u64,
    pub audio_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: PathBuf::from("./models"),
            poll_interval_ms: 160,
            cooldown_ms: 1400,
            confidence_threshold: 0.35,
            input_size: 224,
            score_threshold: 0.5,
            warmup_frames: 4,
            restart_delay_ms: 300,
            motif_duration_ms: 420,
            particles_per_reaction: 3,
            particle_stagger_ms: 180,
            audio_enabled: true,
        }
    }
}

impl Config {
    /// Defaults, overlaid with `path` (if given), overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `GLIMMER_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(device) = var("GLIMMER_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = var("GLIMMER_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        override_parsed(&var, "GLIMMER_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
        override_parsed(&var, "GLIMMER_COOLDOWN_MS", &mut self.cooldown_ms);
        override_parsed(&var, "GLIMMER_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        override_parsed(&var, "GLIMMER_INPUT_SIZE", &mut self.input_size);
        override_parsed(&var, "GLIMMER_SCORE_THRESHOLD", &mut self.score_threshold);
        override_parsed(&var, "GLIMMER_WARMUP_FRAMES", &mut self.warmup_frames);
        override_parsed(&var, "GLIMMER_RESTART_DELAY_MS", &mut self.restart_delay_ms);
        if let Some(v) = var("GLIMMER_AUDIO_ENABLED") {
            self.audio_enabled = v != "0";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("score_threshold", self.score_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be within [0, 1]")));
            }
        }
        if self.motif_duration_ms == 0 {
            return Err(ConfigError::Invalid("motif_duration_ms must be > 0".into()));
        }
        self.detector_options()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.input_size,
            score_threshold: self.score_threshold,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

fn override_parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(parsed) = var(key).and_then(|v| v.parse().ok()) {
        *slot = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(160));
        assert_eq!(config.cooldown(), Duration::from_millis(1400));
        assert_eq!(config.detector_options(), DetectorOptions::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("cooldown_ms = 2000\naudio_enabled = false\n").unwrap();
        assert_eq!(config.cooldown_ms, 2000);
        assert!(!config.audio_enabled);
        assert_eq!(config.poll_interval_ms, 160);
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        assert!(Config::from_toml("cooldown = 2000\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GLIMMER_CAMERA_DEVICE", "/dev/video4"),
            ("GLIMMER_COOLDOWN_MS", "900"),
            ("GLIMMER_CONFIDENCE_THRESHOLD", "not-a-number"),
            ("GLIMMER_AUDIO_ENABLED", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.cooldown_ms, 900);
        assert_eq!(config.confidence_threshold, 0.35);
        assert!(!config.audio_enabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_interval = Config { poll_interval_ms: 0, ..Config::default() };
        assert!(bad_interval.validate().is_err());

        let bad_threshold = Config { confidence_threshold: 1.5, ..Config::default() };
        assert!(bad_threshold.validate().is_err());

        let bad_input = Config { input_size: 100, ..Config::default() };
        assert!(bad_input.validate().is_err());
    }
}

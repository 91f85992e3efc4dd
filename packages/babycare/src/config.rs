//! Runtime configuration, loaded from TOML.
//!
//! Every field is optional in the file and defaults to the matching value in
//! [`crate::constants`].
//!
//! ```toml
//! [detector]
//! period_ms = 4000
//! sound_threshold = 0.2
//!
//! [soothing]
//! mode = "auto"
//! sound = "rock_a_bye"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    actuation::{SoothingMode, SoundChoice},
    constants::{
        DEFAULT_READ_TIMEOUT, DETECTION_PERIOD, INITIAL_DELAY, LIGHT_POLL_INTERVAL,
        LIGHT_THRESHOLD, SOUND_THRESHOLD, STOP_COUNT_SATURATION, STOP_DEBOUNCE,
    },
    detection::Schedule,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub period_ms: u64,
    pub initial_delay_ms: u64,
    /// Peak amplitude under which a window is not classified.
    pub sound_threshold: f32,
    /// Consecutive calm cycles before soothing stops.
    pub stop_debounce: u32,
    pub read_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            period_ms: DETECTION_PERIOD.as_millis() as u64,
            initial_delay_ms: INITIAL_DELAY.as_millis() as u64,
            sound_threshold: SOUND_THRESHOLD,
            stop_debounce: STOP_DEBOUNCE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
        }
    }
}

impl DetectorConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            period: Duration::from_millis(self.period_ms),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoothingConfig {
    pub mode: SoothingMode,
    pub sound: SoundChoice,
    /// Directory holding `<sound>.wav` assets.
    pub sounds_dir: PathBuf,
}

impl Default for SoothingConfig {
    fn default() -> Self {
        Self {
            mode: SoothingMode::default(),
            sound: SoundChoice::default(),
            sounds_dir: PathBuf::from("sounds"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LightConfig {
    /// Lux at or below which the room is dark.
    pub threshold: f32,
    /// IIO illuminance attribute to poll; no sensor when unset.
    pub sensor_path: Option<PathBuf>,
    pub poll_ms: u64,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            threshold: LIGHT_THRESHOLD,
            sensor_path: None,
            poll_ms: LIGHT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/cry_net.safetensors"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToyConfig {
    /// Command endpoint; the toy is only logged when unset.
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BabycareConfig {
    pub detector: DetectorConfig,
    pub soothing: SoothingConfig,
    pub light: LightConfig,
    pub model: ModelConfig,
    pub toy: ToyConfig,
}

impl BabycareConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if !(d.sound_threshold.is_finite() && d.sound_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                field: "detector.sound_threshold",
                reason: format!("must be positive, got {}", d.sound_threshold),
            });
        }
        if d.stop_debounce == 0 || d.stop_debounce > STOP_COUNT_SATURATION {
            return Err(ConfigError::Invalid {
                field: "detector.stop_debounce",
                reason: format!(
                    "must be within 1..={STOP_COUNT_SATURATION}, got {}",
                    d.stop_debounce
                ),
            });
        }
        if d.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "detector.read_timeout_ms",
                reason: "must be greater than 0".into(),
            });
        }
        if !(self.light.threshold.is_finite() && self.light.threshold >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "light.threshold",
                reason: format!("must be non-negative, got {}", self.light.threshold),
            });
        }
        if self.light.poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "light.poll_ms",
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

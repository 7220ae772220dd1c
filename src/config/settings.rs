// Pipeline configuration
// A single value that is validated as a unit and swapped in only at tick boundaries

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating or parsing a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Electrode counts must be non-zero (tx={tx}, rx={rx})")]
    ZeroElectrodes { tx: usize, rx: usize },

    #[error("Input range is degenerate: min_input == max_input == {0}")]
    DegenerateInputRange(i32),

    #[error("Noise thresholds out of order: noise={noise}, max_noise={max_noise}")]
    NoiseThresholdOrder { noise: i32, max_noise: i32 },

    #[error("Calibration error threshold must be negative, got {0}")]
    NonNegativeErrorThreshold(i32),

    #[error("Recording and replay cannot be enabled together")]
    ConflictingCapabilities,

    #[error("Electrode geometry is fixed at {current}, cannot change to {requested}")]
    GeometryChanged { current: Geometry, requested: Geometry },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Electrode counts of the sensing array
/// tx = transmit lines (grid rows), rx = receive lines (grid columns)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub tx: usize,
    pub rx: usize,
}

impl Geometry {
    pub fn new(tx: usize, rx: usize) -> Self {
        Geometry { tx, rx }
    }

    /// Total number of electrode cells
    pub fn cells(&self) -> usize {
        self.tx * self.rx
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.tx, self.rx)
    }
}

/// Input and output bounds of the linear output remap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapRanges {
    /// Lower end of the expected adjusted signal; values below clamp to it
    pub min_input: i32,

    /// Upper end of the expected adjusted signal
    /// Lower it to amplify a weak sensor, raise it to suppress a strong one
    pub max_input: i32,

    /// Output value for `min_input` (usually black)
    pub min_output: i32,

    /// Output value for `max_input` (usually full white)
    pub max_output: i32,
}

impl Default for RemapRanges {
    fn default() -> Self {
        RemapRanges {
            min_input: 10,
            max_input: 600,
            min_output: 0,
            max_output: 255,
        }
    }
}

/// Thresholds used by autogain to separate touches from noise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseThresholds {
    /// Adjusted values at or below this are noise and are never rescaled
    pub noise: i32,

    /// A frame whose maximum exceeds this contains a touch
    pub max_noise: i32,
}

impl Default for NoiseThresholds {
    fn default() -> Self {
        NoiseThresholds {
            noise: 10,
            max_noise: 60,
        }
    }
}

/// Preset for the calibration error threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdProfile {
    /// Boards with AREF disconnected from AVCC (Uno, MEGA2560)
    #[default]
    Standard,
    /// Noisier boards (LilyPad) that dip further below baseline at rest
    Relaxed,
}

impl ThresholdProfile {
    pub fn calibration_error_threshold(&self) -> i32 {
        match self {
            ThresholdProfile::Standard => -40,
            ThresholdProfile::Relaxed => -70,
        }
    }
}

/// The part of a configuration that decides how readings become grid output
/// Sessions carry these so a replay runs under the settings of its live run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSettings {
    pub warmup_ms: u64,
    pub ranges: RemapRanges,
    pub noise: NoiseThresholds,
    pub calibration_error_threshold: i32,
    pub autogain: bool,
}

/// Where a session recording is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordTarget {
    /// Explicit file path
    Path(PathBuf),
    /// Bare session name, stored under the per-user sessions directory
    Name(String),
}

/// Optional pipeline features, validated together
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Stretch contrast when a touch is present in the frame
    #[serde(default)]
    pub autogain: bool,

    /// Record accepted lines to a session log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordTarget>,

    /// Replay a session log instead of reading live input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<PathBuf>,
}

/// Serial device selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Index into the enumerated device list; `None` runs without live input
    #[serde(default)]
    pub device_index: Option<usize>,

    /// Directory scanned for serial devices
    #[serde(default = "default_device_dir")]
    pub device_dir: PathBuf,

    /// File name prefixes that identify serial devices
    #[serde(default = "default_device_prefixes")]
    pub device_prefixes: Vec<String>,
}

fn default_device_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_device_prefixes() -> Vec<String> {
    ["ttyACM", "ttyUSB", "cu.usbmodem", "cu.usbserial"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            device_index: None,
            device_dir: default_device_dir(),
            device_prefixes: default_device_prefixes(),
        }
    }
}

fn default_warmup_ms() -> u64 {
    2000
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Electrode geometry, fixed for the lifetime of a pipeline
    pub geometry: Geometry,

    /// Minimum time spent collecting baseline samples (milliseconds)
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,

    #[serde(default)]
    pub ranges: RemapRanges,

    #[serde(default)]
    pub noise: NoiseThresholds,

    /// Preset used when no explicit error threshold is given
    #[serde(default)]
    pub profile: ThresholdProfile,

    /// Explicit calibration error threshold, overrides the profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_error_threshold: Option<i32>,

    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl PipelineConfig {
    /// Create a configuration with default thresholds for a tx × rx sensor
    pub fn new(tx: usize, rx: usize) -> Self {
        PipelineConfig {
            geometry: Geometry::new(tx, rx),
            warmup_ms: default_warmup_ms(),
            ranges: RemapRanges::default(),
            noise: NoiseThresholds::default(),
            profile: ThresholdProfile::default(),
            calibration_error_threshold: None,
            capabilities: Capabilities::default(),
            transport: TransportConfig::default(),
        }
    }

    /// Effective calibration error threshold
    pub fn error_threshold(&self) -> i32 {
        self.calibration_error_threshold
            .unwrap_or_else(|| self.profile.calibration_error_threshold())
    }

    /// Check every constraint the per-frame math relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Geometry { tx, rx } = self.geometry;
        if tx == 0 || rx == 0 {
            return Err(ConfigError::ZeroElectrodes { tx, rx });
        }

        if self.ranges.min_input == self.ranges.max_input {
            return Err(ConfigError::DegenerateInputRange(self.ranges.min_input));
        }

        if self.noise.noise < 0 || self.noise.max_noise < self.noise.noise {
            return Err(ConfigError::NoiseThresholdOrder {
                noise: self.noise.noise,
                max_noise: self.noise.max_noise,
            });
        }

        let threshold = self.error_threshold();
        if threshold >= 0 {
            return Err(ConfigError::NonNegativeErrorThreshold(threshold));
        }

        if self.capabilities.record.is_some() && self.capabilities.replay.is_some() {
            return Err(ConfigError::ConflictingCapabilities);
        }

        Ok(())
    }

    /// Validate a replacement configuration against this one
    /// Geometry may never change once a pipeline exists
    pub fn validate_update(&self, next: &PipelineConfig) -> Result<(), ConfigError> {
        next.validate()?;
        if next.geometry != self.geometry {
            return Err(ConfigError::GeometryChanged {
                current: self.geometry,
                requested: next.geometry,
            });
        }
        Ok(())
    }

    pub fn signal_settings(&self) -> SignalSettings {
        SignalSettings {
            warmup_ms: self.warmup_ms,
            ranges: self.ranges,
            noise: self.noise,
            calibration_error_threshold: self.error_threshold(),
            autogain: self.capabilities.autogain,
        }
    }

    /// Take over recorded signal settings
    /// Geometry, recording, replay and transport are left alone.
    pub fn apply_signal_settings(&mut self, settings: &SignalSettings) {
        self.warmup_ms = settings.warmup_ms;
        self.ranges = settings.ranges;
        self.noise = settings.noise;
        self.calibration_error_threshold = Some(settings.calibration_error_threshold);
        self.capabilities.autogain = settings.autogain;
    }

    /// SHA-256 over every setting that affects grid output
    /// Capabilities other than autogain and transport selection are excluded,
    /// so a live session and its replay share a digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.geometry.tx as u64).to_le_bytes());
        hasher.update((self.geometry.rx as u64).to_le_bytes());
        hasher.update(self.warmup_ms.to_le_bytes());
        for value in [
            self.ranges.min_input,
            self.ranges.max_input,
            self.ranges.min_output,
            self.ranges.max_output,
            self.noise.noise,
            self.noise.max_noise,
            self.error_threshold(),
        ] {
            hasher.update(value.to_le_bytes());
        }
        hasher.update([self.capabilities.autogain as u8]);
        hex::encode(hasher.finalize())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

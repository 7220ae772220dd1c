// Configuration module
// Pipeline settings, feature capabilities and their validation

pub mod settings;

pub use settings::{
    Capabilities, ConfigError, Geometry, NoiseThresholds, PipelineConfig, RecordTarget,
    RemapRanges, SignalSettings, ThresholdProfile, TransportConfig,
};

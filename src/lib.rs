// Touchgrid - Capacitive Multi-Touch Sensor Pipeline
// Module declarations

pub mod calibration;
pub mod config;
pub mod grid;
pub mod input;
pub mod pipeline;
pub mod session;
pub mod signal;

pub use calibration::{BaselineCalibrator, CalibrationState};
pub use config::{Capabilities, ConfigError, Geometry, PipelineConfig, RecordTarget};
pub use grid::{IntensityGrid, PixelBuffer};
pub use input::{ChannelSource, DecodedRow, DeviceSource, LineFrameDecoder, LineSource};
pub use pipeline::{FrameClock, FrameSnapshot, ManualClock, MonotonicClock, PipelineEvent};
pub use session::{SessionPlayer, SessionRecorder};
pub use signal::SignalAdjuster;

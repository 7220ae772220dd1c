// Pipeline execution module
// Orchestrates the per-tick acquisition, calibration and adjustment pipeline

pub mod clock;
pub mod snapshot;
pub mod time;

pub use clock::{ControlRequest, FrameClock};
pub use snapshot::{FrameSnapshot, PipelineEvent, TickStats};
pub use time::{ManualClock, MonotonicClock, TimeSource};

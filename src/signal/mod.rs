// Signal module
// Turns calibrated raw readings into touch intensities

pub mod adjust;

pub use adjust::{clamp_to_baseline, AdjustOutcome, SignalAdjuster};

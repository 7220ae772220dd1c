// Calibration module
// Warm-up baseline learning and post-calibration anomaly detection

pub mod baseline;

pub use baseline::{BaselineCalibrator, CalibrationState, GateOutcome};

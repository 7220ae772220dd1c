// Automatic baseline calibration
// Learns the resting (no-touch) reading of every cell during a warm-up window

use serde::Serialize;

use crate::config::Geometry;
use crate::input::DecodedRow;

/// Calibration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationState {
    /// Collecting samples; the sensor must not be touched
    Accumulating,
    /// Baseline frozen; frames are adjusted against it
    Ready,
}

/// Result of a warm-up gate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// No row decoded yet, the timer is not running
    NotStarted,
    /// Warm-up window still open
    Waiting,
    /// Window elapsed but some cells have no samples; timer restarted
    Deferred { missing_cells: usize },
    /// Baseline computed on this check
    Ready,
    /// Already ready before this check
    AlreadyReady,
}

/// Per-cell baseline accumulator and anomaly detector
#[derive(Debug, Clone)]
pub struct BaselineCalibrator {
    geometry: Geometry,

    /// Sum of raw samples per cell
    sum: Vec<u64>,

    /// Number of samples per cell
    count: Vec<u32>,

    /// floor(sum / count) per cell, valid once Ready
    baseline: Vec<u32>,

    state: CalibrationState,

    /// Minimum warm-up duration in milliseconds
    warmup_ms: u64,

    /// Negative deviation below baseline that signals a bad calibration
    error_threshold: i32,

    /// Tick time the warm-up window opened
    warmup_started_ms: Option<u64>,

    /// Sticky until `restart`
    calibration_error: bool,
}

impl BaselineCalibrator {
    pub fn new(geometry: Geometry, warmup_ms: u64, error_threshold: i32) -> Self {
        let cells = geometry.cells();
        BaselineCalibrator {
            geometry,
            sum: vec![0; cells],
            count: vec![0; cells],
            baseline: vec![0; cells],
            state: CalibrationState::Accumulating,
            warmup_ms,
            error_threshold,
            warmup_started_ms: None,
            calibration_error: false,
        }
    }

    /// Replace tuning parameters; accumulated samples are kept
    pub fn set_parameters(&mut self, warmup_ms: u64, error_threshold: i32) {
        self.warmup_ms = warmup_ms;
        self.error_threshold = error_threshold;
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == CalibrationState::Ready
    }

    pub fn calibration_error(&self) -> bool {
        self.calibration_error
    }

    /// Frozen baseline, row-major, once Ready
    pub fn baseline(&self) -> Option<&[u32]> {
        match self.state {
            CalibrationState::Ready => Some(&self.baseline),
            CalibrationState::Accumulating => None,
        }
    }

    /// Number of cells with at least one sample, and the total cell count
    pub fn progress(&self) -> (usize, usize) {
        let sampled = self.count.iter().filter(|&&c| c > 0).count();
        (sampled, self.count.len())
    }

    /// Open the warm-up window on the first decoded row
    /// Returns true when this call started the timer.
    pub fn arm(&mut self, now_ms: u64) -> bool {
        if self.state == CalibrationState::Ready || self.warmup_started_ms.is_some() {
            return false;
        }
        self.warmup_started_ms = Some(now_ms);
        true
    }

    /// Fold one row of samples into the running sums
    pub fn accumulate(&mut self, row: &DecodedRow) {
        if self.state == CalibrationState::Ready
            || row.row_index >= self.geometry.tx
            || row.values.len() != self.geometry.rx
        {
            return;
        }

        let start = row.row_index * self.geometry.rx;
        for (offset, &value) in row.values.iter().enumerate() {
            self.sum[start + offset] += value as u64;
            self.count[start + offset] += 1;
        }
    }

    /// Evaluate the warm-up gate at `now_ms`
    pub fn check_gate(&mut self, now_ms: u64) -> GateOutcome {
        if self.state == CalibrationState::Ready {
            return GateOutcome::AlreadyReady;
        }

        let started = match self.warmup_started_ms {
            Some(started) => started,
            None => return GateOutcome::NotStarted,
        };

        if now_ms.saturating_sub(started) < self.warmup_ms {
            return GateOutcome::Waiting;
        }

        let missing_cells = self.count.iter().filter(|&&c| c == 0).count();
        if missing_cells > 0 {
            self.warmup_started_ms = Some(now_ms);
            return GateOutcome::Deferred { missing_cells };
        }

        for ((baseline, &sum), &count) in self.baseline.iter_mut().zip(&self.sum).zip(&self.count) {
            *baseline = (sum / count as u64) as u32;
        }
        self.state = CalibrationState::Ready;
        GateOutcome::Ready
    }

    /// Compare a full frame against the baseline
    /// Returns true only on the frame that first sets the sticky error flag.
    pub fn check_anomaly(&mut self, raw: &[u32]) -> bool {
        if self.state != CalibrationState::Ready || self.calibration_error {
            return false;
        }

        let threshold = self.error_threshold as i64;
        let breached = raw
            .iter()
            .zip(&self.baseline)
            .any(|(&r, &b)| (r as i64 - b as i64) < threshold);

        if breached {
            self.calibration_error = true;
        }
        breached
    }

    /// Discard all samples, the baseline and the error flag
    pub fn restart(&mut self) {
        self.sum.iter_mut().for_each(|v| *v = 0);
        self.count.iter_mut().for_each(|v| *v = 0);
        self.baseline.iter_mut().for_each(|v| *v = 0);
        self.state = CalibrationState::Accumulating;
        self.warmup_started_ms = None;
        self.calibration_error = false;
    }
}

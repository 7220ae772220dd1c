// Per-tick output handed to rendering and UI collaborators

use serde::Serialize;
use std::path::PathBuf;

use crate::calibration::CalibrationState;
use crate::grid::{IntensityGrid, PixelBuffer};

/// Something that happened during a tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// First decoded row opened the warm-up window
    CalibrationStarted,
    /// Warm-up elapsed with unsampled cells; window restarted
    CalibrationDeferred { missing_cells: usize },
    CalibrationReady,
    /// A cell fell below baseline by more than the error threshold
    CalibrationAnomaly,
    CalibrationRestarted,
    ConfigApplied,
    RecordingStarted { path: PathBuf },
    RecordingStopped { ticks: u64 },
    RecordingFailed { reason: String },
    ReplayStarted {
        path: PathBuf,
        entries: usize,
        config_matches: bool,
    },
    ReplayFailed { reason: String },
    ReplayStopped,
    ReplayComplete,
}

impl PipelineEvent {
    /// Events describing calibration transitions
    pub fn is_calibration(&self) -> bool {
        matches!(
            self,
            PipelineEvent::CalibrationStarted
                | PipelineEvent::CalibrationDeferred { .. }
                | PipelineEvent::CalibrationReady
                | PipelineEvent::CalibrationAnomaly
                | PipelineEvent::CalibrationRestarted
        )
    }
}

/// Line counts for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    /// Lines taken from the transport or replay entry
    pub lines_read: usize,
    /// Lines the decoder accepted
    pub accepted: usize,
    /// Lines the decoder dropped
    pub rejected: usize,
    /// Accepted rows whose index was outside the grid
    pub out_of_range: usize,
    /// Live lines thrown away while a replay was active
    pub discarded_live: usize,
}

/// Everything collaborators may read after a tick
#[derive(Debug, Clone, Serialize)]
pub struct FrameSnapshot {
    pub tick: u64,
    pub grid: IntensityGrid,
    /// Row-major baseline, present once calibration is ready
    pub baseline: Option<Vec<u32>>,
    pub pixels: PixelBuffer,
    pub calibration_state: CalibrationState,
    pub calibration_error: bool,
    /// True on the single tick a replay ran out of entries
    pub replay_complete: bool,
    pub stats: TickStats,
    pub events: Vec<PipelineEvent>,
}

impl FrameSnapshot {
    pub fn calibration_ready(&self) -> bool {
        self.calibration_state == CalibrationState::Ready
    }

    pub fn raw(&self, row: usize, col: usize) -> u32 {
        self.grid.raw(row, col)
    }

    pub fn adjusted(&self, row: usize, col: usize) -> i32 {
        self.grid.adjusted(row, col)
    }

    pub fn baseline_at(&self, row: usize, col: usize) -> Option<u32> {
        let index = self.grid.index(row, col);
        self.baseline.as_ref().map(|b| b[index])
    }

    /// Baseline as nested rows
    pub fn baseline_rows(&self) -> Option<Vec<Vec<u32>>> {
        let rx = self.grid.geometry().rx;
        self.baseline
            .as_ref()
            .map(|b| b.chunks(rx).map(|r| r.to_vec()).collect())
    }
}

// Frame clock
// Per-tick orchestrator: apply queued requests, advance input (live or replay),
// decode and fold rows, calibrate or adjust, publish a snapshot

use std::path::{Path, PathBuf};

use crate::calibration::{BaselineCalibrator, CalibrationState, GateOutcome};
use crate::config::{ConfigError, PipelineConfig, RecordTarget, SignalSettings};
use crate::grid::{IntensityGrid, PixelBuffer};
use crate::input::{DeviceSource, LineFrameDecoder, LineSource, TransportError};
use crate::session::{SessionEntry, SessionPlayer, SessionRecorder};
use crate::signal::SignalAdjuster;

use super::snapshot::{FrameSnapshot, PipelineEvent, TickStats};
use super::time::TimeSource;

/// Requests that take effect at the start of the next tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Configure(PipelineConfig),
    StartRecording(RecordTarget),
    StopRecording,
    StartReplay(PathBuf),
    StopReplay,
    RestartCalibration,
}

/// Owns all pipeline state; driven by the host calling `tick`
pub struct FrameClock {
    config: PipelineConfig,
    decoder: LineFrameDecoder,
    grid: IntensityGrid,
    pixels: PixelBuffer,
    calibrator: BaselineCalibrator,
    adjuster: SignalAdjuster,

    /// Live input; `None` runs idle or replay-only
    source: Option<Box<dyn LineSource>>,
    time: Box<dyn TimeSource>,

    recorder: Option<SessionRecorder>,
    player: Option<SessionPlayer>,

    /// Recorded time of the last replayed entry
    replay_now_ms: u64,

    /// Settings to restore once a replay stops
    settings_before_replay: Option<SignalSettings>,

    pending: Vec<ControlRequest>,
    tick: u64,

    /// Reused line buffer
    lines: Vec<String>,
}

impl FrameClock {
    /// Build a pipeline from a validated configuration
    /// Recording or replay named in the capabilities starts on the first tick.
    pub fn new(mut config: PipelineConfig, time: Box<dyn TimeSource>) -> Result<Self, ConfigError> {
        config.validate()?;
        let adjuster = SignalAdjuster::from_config(&config)?;

        let mut pending = Vec::new();
        if let Some(target) = config.capabilities.record.take() {
            pending.push(ControlRequest::StartRecording(target));
        }
        if let Some(path) = config.capabilities.replay.take() {
            pending.push(ControlRequest::StartReplay(path));
        }

        let geometry = config.geometry;
        Ok(FrameClock {
            decoder: LineFrameDecoder::new(geometry.rx),
            grid: IntensityGrid::new(geometry),
            pixels: PixelBuffer::new(geometry),
            calibrator: BaselineCalibrator::new(
                geometry,
                config.warmup_ms,
                config.error_threshold(),
            ),
            adjuster,
            source: None,
            time,
            recorder: None,
            player: None,
            replay_now_ms: 0,
            settings_before_replay: None,
            pending,
            tick: 0,
            lines: Vec::new(),
            config,
        })
    }

    /// Attach a live line source
    pub fn with_source(mut self, source: Box<dyn LineSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn set_source(&mut self, source: Option<Box<dyn LineSource>>) {
        self.source = source;
    }

    /// Open the serial device selected in the transport configuration
    /// On failure the pipeline keeps running without live input.
    pub fn connect_device(&mut self) -> Result<(), TransportError> {
        match DeviceSource::open(&self.config.transport) {
            Ok(device) => {
                self.source = Some(Box::new(device));
                Ok(())
            }
            Err(e) => {
                log::warn!("Serial port not found, live input disabled: {}", e);
                Err(e)
            }
        }
    }

    /// Validate a new configuration now and apply it on the next tick
    pub fn queue_config(&mut self, config: PipelineConfig) -> Result<(), ConfigError> {
        self.config.validate_update(&config)?;
        self.pending.push(ControlRequest::Configure(config));
        Ok(())
    }

    pub fn start_recording(&mut self, target: RecordTarget) {
        self.pending.push(ControlRequest::StartRecording(target));
    }

    pub fn stop_recording(&mut self) {
        self.pending.push(ControlRequest::StopRecording);
    }

    pub fn start_replay(&mut self, path: impl Into<PathBuf>) {
        self.pending.push(ControlRequest::StartReplay(path.into()));
    }

    pub fn stop_replay(&mut self) {
        self.pending.push(ControlRequest::StopReplay);
    }

    /// Discard the baseline and clear the calibration error flag
    pub fn restart_calibration(&mut self) {
        self.pending.push(ControlRequest::RestartCalibration);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.calibrator.state()
    }

    pub fn calibration_error(&self) -> bool {
        self.calibrator.calibration_error()
    }

    /// Cells sampled so far and total cells
    pub fn calibration_progress(&self) -> (usize, usize) {
        self.calibrator.progress()
    }

    pub fn grid(&self) -> &IntensityGrid {
        &self.grid
    }

    pub fn baseline(&self) -> Option<&[u32]> {
        self.calibrator.baseline()
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn recording_path(&self) -> Option<&Path> {
        self.recorder.as_ref().map(|r| r.path())
    }

    pub fn is_replaying(&self) -> bool {
        self.player.is_some()
    }

    /// Replay cursor and entry count
    pub fn replay_progress(&self) -> Option<(usize, usize)> {
        self.player.as_ref().map(|p| (p.cursor(), p.len()))
    }

    /// Number of completed ticks
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Run one pipeline tick
    pub fn tick(&mut self) -> FrameSnapshot {
        let mut events = Vec::new();
        let clock_ms = self.time.now_ms();
        self.apply_pending(clock_ms, &mut events);

        let mut stats = TickStats::default();
        let mut replay_complete = false;
        let mut lines = std::mem::take(&mut self.lines);
        lines.clear();

        let replay_step = self.player.as_mut().map(|player| player.advance());
        let now_ms = match replay_step {
            Some(step) => {
                if let Some(source) = self.source.as_mut() {
                    let mut discarded = Vec::new();
                    source.poll_lines(&mut discarded);
                    stats.discarded_live = discarded.len();
                }

                if let Some(entry) = step.entry {
                    self.apply_recorded_controls(&entry, &mut events);
                    self.replay_now_ms = entry.elapsed_ms;
                    lines.extend(entry.lines().into_iter().map(str::to_string));
                }
                if step.exhausted_now {
                    if let Some(player) = &self.player {
                        log::info!(
                            "Replay of {} complete ({} ticks)",
                            player.source().display(),
                            player.len()
                        );
                    }
                    replay_complete = true;
                    events.push(PipelineEvent::ReplayComplete);
                }
                self.replay_now_ms
            }
            None => {
                if let Some(source) = self.source.as_mut() {
                    let mut chunks = Vec::new();
                    source.poll_lines(&mut chunks);
                    for chunk in &chunks {
                        lines.extend(chunk.lines().map(str::to_string));
                    }
                }
                clock_ms
            }
        };

        stats.lines_read = lines.len();
        let was_ready = self.calibrator.is_ready();
        let mut folded = 0;

        for line in &lines {
            let row = match self.decoder.decode(line) {
                Ok(row) => row,
                Err(e) => {
                    stats.rejected += 1;
                    log::debug!("Dropped malformed line {:?}: {}", line, e);
                    continue;
                }
            };
            stats.accepted += 1;

            if let Some(recorder) = self.recorder.as_mut() {
                recorder.capture(line);
            }

            if !was_ready && self.calibrator.arm(now_ms) {
                log::info!("Calibration started, don't touch the sensor");
                events.push(PipelineEvent::CalibrationStarted);
            }

            if !self.grid.fold_row(&row) {
                stats.out_of_range += 1;
                log::debug!(
                    "Dropped row {} outside a {}-row grid",
                    row.row_index,
                    self.config.geometry.tx
                );
                continue;
            }
            folded += 1;

            if !was_ready {
                self.calibrator.accumulate(&row);
            }
        }
        self.lines = lines;

        if was_ready {
            if folded > 0 {
                self.adjust_frame(&mut events);
            }
        } else {
            match self.calibrator.check_gate(now_ms) {
                GateOutcome::Ready => {
                    log::info!("Calibration done, ready to go");
                    events.push(PipelineEvent::CalibrationReady);
                }
                GateOutcome::Deferred { missing_cells } => {
                    log::warn!(
                        "Calibration not done yet, {} cells have no samples; don't touch the sensor",
                        missing_cells
                    );
                    events.push(PipelineEvent::CalibrationDeferred { missing_cells });
                }
                GateOutcome::NotStarted | GateOutcome::Waiting | GateOutcome::AlreadyReady => {}
            }
        }

        let failure = self.recorder.as_mut().and_then(|recorder| {
            recorder
                .finish_tick(now_ms)
                .err()
                .map(|e| (recorder.path().to_path_buf(), e))
        });
        if let Some((path, e)) = failure {
            log::error!("Recording to {} failed, recording disabled: {}", path.display(), e);
            events.push(PipelineEvent::RecordingFailed {
                reason: e.to_string(),
            });
            self.recorder = None;
            self.config.capabilities.record = None;
        }

        let snapshot = FrameSnapshot {
            tick: self.tick,
            grid: self.grid.clone(),
            baseline: self.calibrator.baseline().map(|b| b.to_vec()),
            pixels: self.pixels.clone(),
            calibration_state: self.calibrator.state(),
            calibration_error: self.calibrator.calibration_error(),
            replay_complete,
            stats,
            events,
        };
        self.tick += 1;
        snapshot
    }

    fn adjust_frame(&mut self, events: &mut Vec<PipelineEvent>) {
        let baseline = match self.calibrator.baseline() {
            Some(baseline) => baseline,
            None => return,
        };

        let (raw, adjusted) = self.grid.split_for_adjust();
        self.adjuster
            .adjust(raw, baseline, adjusted, &mut self.pixels.data);

        if self.calibrator.check_anomaly(self.grid.raw_values()) {
            log::warn!("There seems to be a problem with the calibration, please restart it");
            events.push(PipelineEvent::CalibrationAnomaly);
        }
    }

    fn apply_pending(&mut self, clock_ms: u64, events: &mut Vec<PipelineEvent>) {
        for request in std::mem::take(&mut self.pending) {
            match request {
                ControlRequest::Configure(config) => self.apply_config(config, clock_ms, events),
                ControlRequest::StartRecording(target) => {
                    self.begin_recording(&target, clock_ms, events)
                }
                ControlRequest::StopRecording => self.end_recording(events),
                ControlRequest::StartReplay(path) => self.begin_replay(&path, events),
                ControlRequest::StopReplay => self.end_replay(events),
                ControlRequest::RestartCalibration => {
                    log::info!("Calibration restarted on request");
                    self.calibrator.restart();
                    if let Some(recorder) = self.recorder.as_mut() {
                        recorder.mark_restart();
                    }
                    events.push(PipelineEvent::CalibrationRestarted);
                }
            }
        }
    }

    /// Replay the restart and settings changes the live run made on this tick
    fn apply_recorded_controls(&mut self, entry: &SessionEntry, events: &mut Vec<PipelineEvent>) {
        if let Some(settings) = &entry.settings {
            match self.apply_signal_settings(settings) {
                Ok(()) => {
                    log::info!("Recorded settings applied at tick {}", entry.tick);
                    events.push(PipelineEvent::ConfigApplied);
                }
                Err(e) => log::error!("Skipping recorded settings at tick {}: {}", entry.tick, e),
            }
        }
        if entry.restart {
            log::info!("Recorded calibration restart at tick {}", entry.tick);
            self.calibrator.restart();
            events.push(PipelineEvent::CalibrationRestarted);
        }
    }

    /// Swap in new signal settings; nothing changes when they are rejected
    fn apply_signal_settings(&mut self, settings: &SignalSettings) -> Result<(), ConfigError> {
        self.adjuster = SignalAdjuster::new(settings.ranges, settings.noise, settings.autogain)?;
        self.calibrator
            .set_parameters(settings.warmup_ms, settings.calibration_error_threshold);
        self.config.apply_signal_settings(settings);
        Ok(())
    }

    fn apply_config(
        &mut self,
        config: PipelineConfig,
        clock_ms: u64,
        events: &mut Vec<PipelineEvent>,
    ) {
        let adjuster = match SignalAdjuster::from_config(&config) {
            Ok(adjuster) => adjuster,
            Err(e) => {
                log::error!("Rejected configuration: {}", e);
                return;
            }
        };

        // Capabilities track what is actually running, not what was asked for
        let replay = config.capabilities.replay.clone();
        let record = config.capabilities.record.clone();
        let active_replay = self.config.capabilities.replay.take();
        let active_record = self.config.capabilities.record.take();
        let replay_changed = replay != active_replay;
        let record_changed = record != active_record;

        self.adjuster = adjuster;
        self.calibrator
            .set_parameters(config.warmup_ms, config.error_threshold());
        self.config = config;
        self.config.capabilities.replay = active_replay;
        self.config.capabilities.record = active_record;
        log::info!("Configuration applied");
        events.push(PipelineEvent::ConfigApplied);

        let settings = self.config.signal_settings();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.mark_settings(settings);
        }
        // Changes made during a replay outlive it
        if self.settings_before_replay.is_some() {
            self.settings_before_replay = Some(settings);
        }

        if replay_changed {
            match replay {
                Some(path) => self.begin_replay(&path, events),
                None => self.end_replay(events),
            }
        }
        if record_changed {
            match record {
                Some(target) => self.begin_recording(&target, clock_ms, events),
                None => self.end_recording(events),
            }
        }
    }

    /// Start from zero so a session's log replays to the same grids
    fn reset_for_session(&mut self, events: &mut Vec<PipelineEvent>) {
        self.calibrator.restart();
        self.grid.reset();
        self.pixels.reset();
        events.push(PipelineEvent::CalibrationRestarted);
    }

    fn begin_recording(
        &mut self,
        target: &RecordTarget,
        clock_ms: u64,
        events: &mut Vec<PipelineEvent>,
    ) {
        if self.player.is_some() {
            let reason = "recording is unavailable while a replay is active".to_string();
            log::warn!("Not recording: {}", reason);
            events.push(PipelineEvent::RecordingFailed { reason });
            return;
        }

        if self.recorder.is_some() {
            self.end_recording(events);
        }

        match SessionRecorder::start(target, &self.config, clock_ms) {
            Ok(recorder) => {
                events.push(PipelineEvent::RecordingStarted {
                    path: recorder.path().to_path_buf(),
                });
                self.config.capabilities.record = Some(target.clone());
                self.recorder = Some(recorder);
                self.reset_for_session(events);
            }
            Err(e) => {
                log::error!("Failed to start recording: {}", e);
                events.push(PipelineEvent::RecordingFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn end_recording(&mut self, events: &mut Vec<PipelineEvent>) {
        if let Some(recorder) = self.recorder.take() {
            log::info!(
                "Stopped recording {} after {} ticks",
                recorder.path().display(),
                recorder.ticks_written()
            );
            events.push(PipelineEvent::RecordingStopped {
                ticks: recorder.ticks_written(),
            });
        }
        self.config.capabilities.record = None;
    }

    fn begin_replay(&mut self, path: &Path, events: &mut Vec<PipelineEvent>) {
        if self.recorder.is_some() {
            let reason = "replay is unavailable while recording".to_string();
            log::warn!("Not replaying {}: {}", path.display(), reason);
            events.push(PipelineEvent::ReplayFailed { reason });
            return;
        }

        match SessionPlayer::load(path, &self.config) {
            Ok(player) => {
                let current = self.config.signal_settings();
                if let Err(e) = self.apply_signal_settings(&player.log().header.settings) {
                    log::error!("Session {} has unusable settings: {}", path.display(), e);
                    events.push(PipelineEvent::ReplayFailed {
                        reason: e.to_string(),
                    });
                    return;
                }
                self.settings_before_replay.get_or_insert(current);

                log::info!(
                    "Replaying {} ({} ticks), recalibrating from scratch",
                    path.display(),
                    player.len()
                );
                events.push(PipelineEvent::ReplayStarted {
                    path: path.to_path_buf(),
                    entries: player.len(),
                    config_matches: player.config_matches(),
                });
                self.player = Some(player);
                self.replay_now_ms = 0;
                self.config.capabilities.replay = Some(path.to_path_buf());
                self.reset_for_session(events);
            }
            Err(e) => {
                log::error!("Failed to load session {}: {}", path.display(), e);
                events.push(PipelineEvent::ReplayFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn end_replay(&mut self, events: &mut Vec<PipelineEvent>) {
        if let Some(player) = self.player.take() {
            log::info!("Stopped replay of {}", player.source().display());
            events.push(PipelineEvent::ReplayStopped);
            self.reset_for_session(events);
        }
        if let Some(settings) = self.settings_before_replay.take() {
            if let Err(e) = self.apply_signal_settings(&settings) {
                log::error!("Could not restore settings after replay: {}", e);
            }
        }
        self.config.capabilities.replay = None;
    }
}

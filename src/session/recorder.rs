// Session recording
// Collects the lines accepted during a tick and persists them at tick end,
// together with any calibration restart or settings change made at tick start

use std::path::{Path, PathBuf};

use super::format::{SessionEntry, SessionError, SessionHeader, SessionWriter};
use super::storage::resolve_record_target;
use crate::config::{PipelineConfig, RecordTarget, SignalSettings};

pub struct SessionRecorder {
    writer: SessionWriter,
    header: SessionHeader,

    /// Lines accepted so far on the current tick
    pending: Vec<String>,

    restart_pending: bool,
    settings_pending: Option<SignalSettings>,

    /// Pipeline time of the first recorded tick
    started_ms: u64,

    ticks_written: u64,
}

impl SessionRecorder {
    /// Start recording to `target` with a header describing `config`
    pub fn start(
        target: &RecordTarget,
        config: &PipelineConfig,
        now_ms: u64,
    ) -> Result<Self, SessionError> {
        let path = resolve_record_target(target)?;
        Self::start_at(path, config, now_ms)
    }

    /// Start recording to an already resolved path
    pub fn start_at(
        path: PathBuf,
        config: &PipelineConfig,
        now_ms: u64,
    ) -> Result<Self, SessionError> {
        let header = SessionHeader::for_config(config);
        let writer = SessionWriter::create(path, &header)?;

        log::info!(
            "Recording session {} to {}",
            header.session_id,
            writer.path().display()
        );

        Ok(SessionRecorder {
            writer,
            header,
            pending: Vec::new(),
            restart_pending: false,
            settings_pending: None,
            started_ms: now_ms,
            ticks_written: 0,
        })
    }

    /// Remember a line the decoder accepted on this tick
    pub fn capture(&mut self, line: &str) {
        self.pending.push(line.to_string());
    }

    /// Note a calibration restart applied at the start of the current tick
    pub fn mark_restart(&mut self) {
        self.restart_pending = true;
    }

    /// Note signal settings applied at the start of the current tick
    /// A later call on the same tick replaces the earlier one.
    pub fn mark_settings(&mut self, settings: SignalSettings) {
        self.settings_pending = Some(settings);
    }

    /// Persist this tick's entry, even when no line was accepted
    pub fn finish_tick(&mut self, now_ms: u64) -> Result<(), SessionError> {
        let mut entry = SessionEntry::from_lines(
            self.ticks_written,
            now_ms.saturating_sub(self.started_ms),
            &self.pending,
        );
        entry.restart = std::mem::take(&mut self.restart_pending);
        entry.settings = self.settings_pending.take();
        self.pending.clear();
        self.writer.append(&entry)?;
        self.ticks_written += 1;
        Ok(())
    }

    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    pub fn ticks_written(&self) -> u64 {
        self.ticks_written
    }
}

// Session playback
// Feeds one recorded tick per pipeline tick until the log runs out

use std::path::{Path, PathBuf};

use super::format::{read_session_log, SessionEntry, SessionError, SessionLog};
use crate::config::PipelineConfig;

/// What one playback step produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStep {
    /// The entry for this tick, if any remain
    pub entry: Option<SessionEntry>,

    /// True only on the tick the last entry was consumed
    pub exhausted_now: bool,
}

pub struct SessionPlayer {
    log: SessionLog,
    source: PathBuf,

    /// Index of the next entry; never decreases
    cursor: usize,

    completion_signalled: bool,

    /// Recorded configuration matched the active one
    config_matches: bool,
}

impl SessionPlayer {
    /// Load a recording and check it against the active configuration
    /// A geometry mismatch refuses playback; any other difference only warns.
    pub fn load(path: &Path, active: &PipelineConfig) -> Result<Self, SessionError> {
        let session = read_session_log(path)?;

        let recorded = session.header.geometry();
        if recorded != active.geometry {
            return Err(SessionError::GeometryMismatch {
                recorded,
                active: active.geometry,
            });
        }

        let config_matches = session.header.config_digest == active.digest();
        if !config_matches {
            log::warn!(
                "Session {} was recorded with different settings; replaying with the recorded ones",
                session.header.session_id
            );
        }

        Ok(Self::from_log(session, path.to_path_buf(), config_matches))
    }

    pub fn from_log(log: SessionLog, source: PathBuf, config_matches: bool) -> Self {
        SessionPlayer {
            log,
            source,
            cursor: 0,
            completion_signalled: false,
            config_matches,
        }
    }

    /// Consume the next entry
    pub fn advance(&mut self) -> ReplayStep {
        if self.completion_signalled {
            return ReplayStep {
                entry: None,
                exhausted_now: false,
            };
        }

        let entry = self.log.entries.get(self.cursor).cloned();
        if entry.is_some() {
            self.cursor += 1;
        }

        let exhausted_now = self.cursor >= self.log.entries.len();
        if exhausted_now {
            self.completion_signalled = true;
        }

        ReplayStep {
            entry,
            exhausted_now,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.log.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.entries.is_empty()
    }

    /// True once the completion signal has fired
    pub fn is_exhausted(&self) -> bool {
        self.completion_signalled
    }

    pub fn config_matches(&self) -> bool {
        self.config_matches
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTarget;
    use crate::session::format::SessionHeader;
    use crate::session::recorder::SessionRecorder;
    use tempfile::TempDir;

    fn log_with(entries: usize) -> SessionLog {
        SessionLog {
            header: SessionHeader::for_config(&PipelineConfig::new(2, 2)),
            entries: (0..entries as u64)
                .map(|i| SessionEntry::from_lines(i, i * 20, &[format!("0,{},{}", i, i)]))
                .collect(),
        }
    }

    #[test]
    fn test_completion_fires_once() {
        let mut player = SessionPlayer::from_log(log_with(2), PathBuf::from("x"), true);

        let first = player.advance();
        assert_eq!(first.entry.unwrap().tick, 0);
        assert!(!first.exhausted_now);

        let second = player.advance();
        assert_eq!(second.entry.unwrap().tick, 1);
        assert!(second.exhausted_now);
        assert!(player.is_exhausted());

        for _ in 0..3 {
            let idle = player.advance();
            assert!(idle.entry.is_none());
            assert!(!idle.exhausted_now);
        }
        assert_eq!(player.cursor(), 2);
    }

    #[test]
    fn test_empty_log_completes_immediately() {
        let mut player = SessionPlayer::from_log(log_with(0), PathBuf::from("x"), true);
        assert!(player.is_empty());

        let step = player.advance();
        assert!(step.entry.is_none());
        assert!(step.exhausted_now);
        assert!(!player.advance().exhausted_now);
    }

    #[test]
    fn test_load_checks_geometry_and_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rec.jsonl");
        let config = PipelineConfig::new(2, 2);

        let mut recorder =
            SessionRecorder::start(&RecordTarget::Path(path.clone()), &config, 0).unwrap();
        recorder.capture("0,1,2");
        recorder.finish_tick(0).unwrap();

        let player = SessionPlayer::load(&path, &config).unwrap();
        assert_eq!(player.len(), 1);
        assert!(player.config_matches());
        assert_eq!(player.source(), path.as_path());

        let mut tuned = config.clone();
        tuned.capabilities.autogain = true;
        let player = SessionPlayer::load(&path, &tuned).unwrap();
        assert!(!player.config_matches());

        let wider = PipelineConfig::new(2, 3);
        assert!(matches!(
            SessionPlayer::load(&path, &wider),
            Err(SessionError::GeometryMismatch { .. })
        ));
    }
}

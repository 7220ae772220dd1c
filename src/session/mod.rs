// Session module
// Record accepted sensor lines per tick and replay them deterministically

pub mod format;
pub mod player;
pub mod recorder;
pub mod storage;

pub use format::{
    read_session_log, SessionEntry, SessionError, SessionHeader, SessionLog, SessionRecord,
    SessionWriter, FORMAT_VERSION,
};
pub use player::{ReplayStep, SessionPlayer};
pub use recorder::SessionRecorder;
pub use storage::{resolve_record_target, session_file_name, sessions_dir, StorageError};

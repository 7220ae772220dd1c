// Session file locations
// Named recordings live in <data dir>/touchgrid/sessions; explicit paths are used as given

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::RecordTarget;

const APP_DIR: &str = "touchgrid";
const SESSIONS_DIR: &str = "sessions";
const SESSION_EXTENSION: &str = "jsonl";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No per-user data directory on this platform")]
    NoDataDir,

    #[error("Session name {0:?} must be a plain file name")]
    InvalidName(String),

    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Directory holding named recordings, created on first use
pub fn sessions_dir() -> Result<PathBuf, StorageError> {
    let dir = dirs::data_dir()
        .ok_or(StorageError::NoDataDir)?
        .join(APP_DIR)
        .join(SESSIONS_DIR);
    ensure_dir(&dir)?;
    Ok(dir)
}

/// File name for a named recording
/// Names that could leave the sessions directory are refused.
pub fn session_file_name(name: &str) -> Result<String, StorageError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if !plain {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(format!("{}.{}", name, SESSION_EXTENSION))
}

/// Turn a record target into a concrete file path
pub fn resolve_record_target(target: &RecordTarget) -> Result<PathBuf, StorageError> {
    match target {
        RecordTarget::Path(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                ensure_dir(parent)?;
            }
            Ok(path.clone())
        }
        RecordTarget::Name(name) => {
            let file_name = session_file_name(name)?;
            Ok(sessions_dir()?.join(file_name))
        }
    }
}

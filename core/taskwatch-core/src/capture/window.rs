//! Per-window directories and id allocation.

use fs2::FileExt;
use fs_err as fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::error::{Result, TaskwatchError};

const IDS_FILE: &str = "window_ids.json";
const LOCK_FILE: &str = "window_ids.lock";

/// Reserves the next unused window id.
///
/// Safe against concurrent callers in other processes: the read-modify-write
/// of `window_ids.json` happens under an exclusive lock on `window_ids.lock`.
pub fn allocate_window_id(terminals_dir: &Path) -> Result<u32> {
    fs::create_dir_all(terminals_dir)
        .map_err(|e| TaskwatchError::io("create terminals dir", e))?;

    let lock_path = terminals_dir.join(LOCK_FILE);
    let lock = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| TaskwatchError::io("open window id lock", e))?;
    lock.lock_exclusive()
        .map_err(|source| TaskwatchError::LockFailed {
            path: lock_path.clone(),
            source,
        })?;

    let result = next_id(&terminals_dir.join(IDS_FILE));
    if let Err(err) = lock.unlock() {
        warn!(path = %lock_path.display(), error = %err, "Failed to release window id lock");
    }
    result
}

fn next_id(ids_path: &Path) -> Result<u32> {
    let mut ids: Vec<u32> = match fs::read_to_string(ids_path) {
        Ok(raw) if raw.trim().is_empty() => Vec::new(),
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| TaskwatchError::ConfigMalformed {
            path: ids_path.to_path_buf(),
            details: e.to_string(),
        })?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(TaskwatchError::io("read window ids", err)),
    };

    let id = ids.iter().max().map(|max| max + 1).unwrap_or(0);
    ids.push(id);

    let content =
        serde_json::to_vec(&ids).map_err(|e| TaskwatchError::json("serialize window ids", e))?;
    write_atomic(ids_path, &content)?;
    debug!(window_id = id, "Allocated window id");
    Ok(id)
}

/// Files belonging to one terminal window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPaths {
    pub id: u32,
    pub dir: PathBuf,
    /// Live capture appended by the recorder.
    pub capture: PathBuf,
    pub trimmed: PathBuf,
    pub image: PathBuf,
    /// Written when this window's session has been submitted.
    pub marker: PathBuf,
}

impl WindowPaths {
    pub fn new(terminals_dir: &Path, id: u32) -> Self {
        let dir = terminals_dir.join(id.to_string());
        Self {
            id,
            capture: dir.join("terminal.cast"),
            trimmed: dir.join("trimmed_terminal.cast"),
            image: dir.join("terminal.gif"),
            marker: dir.join("submitted"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TaskwatchError::io("create window dir", e))
    }
}

//! Whole-file replacement that readers never observe half-written.

use std::io::Write;
use std::path::Path;

use fs_err as fs;
use tempfile::NamedTempFile;

use crate::error::{Result, TaskwatchError};

/// Writes `content` to a temp file beside `path`, then renames it over `path`.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent_dir)
        .map_err(|e| TaskwatchError::io(format!("create {}", parent_dir.display()), e))?;

    let mut temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|e| TaskwatchError::io("create temp file", e))?;
    temp_file
        .write_all(content)
        .map_err(|e| TaskwatchError::io("write temp file", e))?;
    temp_file
        .flush()
        .map_err(|e| TaskwatchError::io("flush temp file", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| TaskwatchError::io("sync temp file", e))?;
    temp_file
        .persist(path)
        .map_err(|e| TaskwatchError::io(format!("persist {}", path.display()), e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_existing_content_and_creates_parents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("status.txt");

        write_atomic(&path, b"RUNNING").unwrap();
        write_atomic(&path, b"STOPPED").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "STOPPED");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}

//! Append-only newline-delimited JSON log.
//!
//! Records are appended one per line and never rewritten. Readers replay from
//! the start and tolerate damage: the file may be hand-edited, or the last
//! line may be cut short by a crash mid-write, so a malformed line is counted
//! and skipped rather than failing the whole replay.

use fs_err as fs;
use fs_err::OpenOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Result, TaskwatchError};

/// Result of replaying a log from the start.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay<T> {
    pub records: Vec<T>,
    /// Lines that were present but did not decode.
    pub skipped: usize,
}

impl<T> Default for Replay<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventLog<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> EventLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and syncs it to disk before returning.
    pub fn append(&self, record: &T) -> Result<()> {
        let record = serde_json::to_string(record)
            .map_err(|e| TaskwatchError::json("serialize log record", e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TaskwatchError::io("create log dir", e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TaskwatchError::io("open log for append", e))?;

        // A torn final line must not swallow the record written after it.
        let mut line = String::with_capacity(record.len() + 2);
        if ends_without_newline(&mut file)? {
            line.push('\n');
        }
        line.push_str(&record);
        line.push('\n');

        file.write_all(line.as_bytes())
            .map_err(|e| TaskwatchError::io("append log record", e))?;
        file.sync_data()
            .map_err(|e| TaskwatchError::io("sync log", e))?;
        Ok(())
    }

    /// Reads every decodable record in file order. A missing file is an empty log.
    pub fn replay(&self) -> Result<Replay<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Replay::default())
            }
            Err(err) => return Err(TaskwatchError::io("read log", err)),
        };

        let content = String::from_utf8_lossy(&bytes);
        let mut replay = Replay::default();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => replay.records.push(record),
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %err,
                        "Skipping malformed log line"
                    );
                    replay.skipped += 1;
                }
            }
        }

        Ok(replay)
    }

    /// The last decodable record, if any.
    pub fn last(&self) -> Result<Option<T>> {
        Ok(self.replay()?.records.pop())
    }
}

fn ends_without_newline(file: &mut fs::File) -> Result<bool> {
    let len = file
        .metadata()
        .map_err(|e| TaskwatchError::io("stat log", e))?
        .len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| TaskwatchError::io("inspect log tail", e))?;
    Ok(last[0] != b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        seq: u32,
        label: String,
    }

    fn entry(seq: u32) -> Entry {
        Entry {
            seq,
            label: format!("entry-{}", seq),
        }
    }

    #[test]
    fn missing_file_replays_empty() {
        let temp = tempdir().unwrap();
        let log: EventLog<Entry> = EventLog::new(temp.path().join("missing.jsonl"));
        let replay = log.replay().unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.skipped, 0);
        assert!(log.last().unwrap().is_none());
    }

    #[test]
    fn append_creates_parent_and_preserves_order() {
        let temp = tempdir().unwrap();
        let log = EventLog::new(temp.path().join("nested").join("log.jsonl"));
        for seq in 0..3 {
            log.append(&entry(seq)).unwrap();
        }

        let replay = log.replay().unwrap();
        assert_eq!(replay.records, vec![entry(0), entry(1), entry(2)]);
        assert_eq!(log.last().unwrap(), Some(entry(2)));

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn malformed_and_blank_lines_are_skipped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        fs::write(
            &path,
            "{\"seq\":1,\"label\":\"a\"}\n\nnot json\n{\"seq\":2,\"label\":\"b\"}\n{\"seq\":3,",
        )
        .unwrap();

        let log: EventLog<Entry> = EventLog::new(&path);
        let replay = log.replay().unwrap();
        assert_eq!(replay.records.len(), 2);
        assert_eq!(replay.records[1].seq, 2);
        assert_eq!(replay.skipped, 2);
    }

    #[test]
    fn unterminated_but_complete_last_line_is_accepted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        fs::write(&path, "{\"seq\":1,\"label\":\"a\"}\n{\"seq\":2,\"label\":\"b\"}").unwrap();

        let log: EventLog<Entry> = EventLog::new(&path);
        assert_eq!(log.last().unwrap().map(|e| e.seq), Some(2));
    }

    #[test]
    fn append_after_damaged_tail_keeps_new_record_readable() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        fs::write(&path, "{\"seq\":1,\"label\":\"a\"}\n{\"seq\":2,\"la").unwrap();

        let log = EventLog::new(&path);
        log.append(&entry(3)).unwrap();
        let replay = log.replay().unwrap();
        assert_eq!(replay.records, vec![Entry { seq: 1, label: "a".to_string() }, entry(3)]);
        assert_eq!(replay.skipped, 1);
    }
}

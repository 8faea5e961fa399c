//! # Durable Log
//!
//! The append-only record of everything that can change actor state: inbound
//! call frames and internal lifecycle events. The log plus the checkpoints is
//! the actor's total durable truth; in-memory actor state is only a cache of
//! "log replayed to position X".
//!
//! Storage backends implement [`LogStore`]. Two are provided:
//! [`MemoryLog`] for tests and embedded hosts, and [`FileLog`], which stores
//! length-prefixed bincode records behind a small base-position header:
//!
//! ```text
//! [u64 base position][u32 len][bincode entry][u32 len][bincode entry]...
//! ```

use crate::codec::CallFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Internal lifecycle events worth replaying or auditing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Logged exactly once, the very first time this actor identity is
    /// instantiated. Replaying it re-runs the first-start hook so state built
    /// there is reconstructible before any checkpoint exists.
    FirstStart,
    /// Audit marker for the end of a recovery cycle. Skipped during replay;
    /// the becoming-primary hook fires fresh each recovery.
    BecamePrimary,
}

/// One immutable log record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    Inbound(CallFrame),
    Lifecycle(LifecycleEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log storage error: {0}")]
    Storage(String),
    #[error("corrupt log record at position {0}")]
    Corrupt(u64),
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Storage(e.to_string())
    }
}

/// Contract for durable log backends. Single-writer: exactly one sequencer
/// appends per actor identity; diagnostic readers must not mutate.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Appends an entry, durable before returning. Returns the position
    /// assigned to it.
    async fn append(&self, entry: &LogEntry) -> Result<u64, LogError>;

    /// All entries at positions `>= position`, in append order, paired with
    /// their positions.
    async fn read_from(&self, position: u64) -> Result<Vec<(u64, LogEntry)>, LogError>;

    /// Drops entries below `position`. Callers must only invoke this after a
    /// checkpoint at `>= position` is durably committed.
    async fn truncate_before(&self, position: u64) -> Result<(), LogError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryLogInner {
    base: u64,
    entries: Vec<LogEntry>,
}

/// Volatile log for tests and hosts that manage durability elsewhere.
#[derive(Debug, Default)]
pub struct MemoryLog {
    inner: RwLock<MemoryLogInner>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLog {
    async fn append(&self, entry: &LogEntry) -> Result<u64, LogError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| LogError::Storage("log lock poisoned".into()))?;
        let position = inner.base + inner.entries.len() as u64;
        inner.entries.push(entry.clone());
        Ok(position)
    }

    async fn read_from(&self, position: u64) -> Result<Vec<(u64, LogEntry)>, LogError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LogError::Storage("log lock poisoned".into()))?;
        let skip = position.saturating_sub(inner.base) as usize;
        Ok(inner
            .entries
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, e)| (inner.base + i as u64, e.clone()))
            .collect())
    }

    async fn truncate_before(&self, position: u64) -> Result<(), LogError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| LogError::Storage("log lock poisoned".into()))?;
        if position <= inner.base {
            return Ok(());
        }
        let drop_count = (position - inner.base).min(inner.entries.len() as u64);
        inner.entries.drain(..drop_count as usize);
        inner.base += drop_count;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

struct FileLogInner {
    file: File,
    base: u64,
    next: u64,
}

/// File-backed log. Appends are fsynced before the position is returned.
/// Filesystem calls are synchronous; the expected deployment keeps the log on
/// local disk where a blocking write is shorter than a task handoff.
pub struct FileLog {
    path: PathBuf,
    inner: Mutex<FileLogInner>,
}

impl FileLog {
    /// Opens or creates the log at `path`, scanning existing records to find
    /// the next position.
    ///
    /// `append` syncs every record before acknowledging it, so a torn record
    /// at the tail can only be the remains of a crash mid-append. It was
    /// never acknowledged; the file is truncated back to the last complete
    /// record so later appends continue from clean bytes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(&0u64.to_le_bytes())?;
            file.sync_all()?;
        }

        let (base, count, valid_len) = scan(&path)?;
        let file = OpenOptions::new().append(true).open(&path)?;
        if std::fs::metadata(&path)?.len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            path,
            inner: Mutex::new(FileLogInner {
                file,
                base,
                next: base + count,
            }),
        })
    }
}

/// Walks the records, returning the base position, the number of complete
/// records, and the byte length of the complete prefix. A record cut short
/// by end of file (partial length prefix or partial body) ends the walk.
fn scan(path: &Path) -> Result<(u64, u64, u64), LogError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let base = u64::from_le_bytes(header);

    let mut count = 0u64;
    let mut valid_len = 8u64;
    loop {
        let mut len = [0u8; 4];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut record = vec![0u8; u32::from_le_bytes(len) as usize];
        match reader.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        count += 1;
        valid_len += 4 + record.len() as u64;
    }
    Ok((base, count, valid_len))
}

fn read_all(path: &Path) -> Result<(u64, Vec<LogEntry>), LogError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let base = u64::from_le_bytes(header);

    let mut entries = Vec::new();
    loop {
        let mut len = [0u8; 4];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let position = base + entries.len() as u64;
        let mut record = vec![0u8; u32::from_le_bytes(len) as usize];
        match reader.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let entry = bincode::deserialize(&record).map_err(|_| LogError::Corrupt(position))?;
        entries.push(entry);
    }
    Ok((base, entries))
}

#[async_trait]
impl LogStore for FileLog {
    async fn append(&self, entry: &LogEntry) -> Result<u64, LogError> {
        let record = bincode::serialize(entry).map_err(|e| LogError::Storage(e.to_string()))?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| LogError::Storage("log lock poisoned".into()))?;
        inner.file.write_all(&(record.len() as u32).to_le_bytes())?;
        inner.file.write_all(&record)?;
        inner.file.sync_data()?;
        let position = inner.next;
        inner.next += 1;
        Ok(position)
    }

    async fn read_from(&self, position: u64) -> Result<Vec<(u64, LogEntry)>, LogError> {
        let _guard = self
            .inner
            .lock()
            .map_err(|_| LogError::Storage("log lock poisoned".into()))?;
        let (base, entries) = read_all(&self.path)?;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| (base + i as u64, e))
            .filter(|(pos, _)| *pos >= position)
            .collect())
    }

    async fn truncate_before(&self, position: u64) -> Result<(), LogError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| LogError::Storage("log lock poisoned".into()))?;
        if position <= inner.base {
            return Ok(());
        }
        let (base, entries) = read_all(&self.path)?;
        let retained: Vec<&LogEntry> = entries
            .iter()
            .enumerate()
            .filter(|(i, _)| base + *i as u64 >= position)
            .map(|(_, e)| e)
            .collect();

        // Rewrite to a sibling temp file and rename over the log, so a crash
        // mid-truncation leaves either the old file or the new one.
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(&position.to_le_bytes())?;
            for entry in retained {
                let record =
                    bincode::serialize(entry).map_err(|e| LogError::Storage(e.to_string()))?;
                writer.write_all(&(record.len() as u32).to_le_bytes())?;
                writer.write_all(&record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        inner.file = file;
        inner.base = position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CallFrame, CallKind, MethodId, SeqNo};

    fn entry(n: u64) -> LogEntry {
        LogEntry::Inbound(CallFrame {
            method: MethodId(1),
            kind: CallKind::FireAndForget,
            seq: SeqNo(n),
            payload: vec![n as u8; 3],
        })
    }

    #[tokio::test]
    async fn memory_log_assigns_sequential_positions() {
        let log = MemoryLog::new();
        assert_eq!(log.append(&entry(0)).await.unwrap(), 0);
        assert_eq!(log.append(&entry(1)).await.unwrap(), 1);

        let all = log.read_from(0).await.unwrap();
        assert_eq!(all.len(), 2);
        let tail = log.read_from(1).await.unwrap();
        assert_eq!(tail, vec![(1, entry(1))]);
    }

    #[tokio::test]
    async fn memory_log_truncation_preserves_positions() {
        let log = MemoryLog::new();
        for n in 0..5 {
            log.append(&entry(n)).await.unwrap();
        }
        log.truncate_before(3).await.unwrap();

        let rest = log.read_from(0).await.unwrap();
        assert_eq!(
            rest.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
            vec![3, 4]
        );
        // Positions keep growing from where they left off.
        assert_eq!(log.append(&entry(5)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actor.log");

        {
            let log = FileLog::open(&path).unwrap();
            assert_eq!(log.append(&entry(0)).await.unwrap(), 0);
            assert_eq!(log.append(&entry(1)).await.unwrap(), 1);
        }

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.append(&entry(2)).await.unwrap(), 2);
        let all = log.read_from(0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], (2, entry(2)));
    }

    #[tokio::test]
    async fn torn_tail_record_is_discarded_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actor.log");

        let log = FileLog::open(&path).unwrap();
        log.append(&entry(0)).await.unwrap();
        log.append(&entry(1)).await.unwrap();
        drop(log);

        // Crash mid-append: a length prefix promising 100 bytes, followed by
        // only 2 bytes of body. The entry was never acknowledged.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(&[0xde, 0xad]).unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        let all = log.read_from(0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], (1, entry(1)));

        // The tail was cut back, so the next append lands on clean bytes.
        assert_eq!(log.append(&entry(2)).await.unwrap(), 2);
        drop(log);
        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.read_from(0).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn partial_length_prefix_is_discarded_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actor.log");

        let log = FileLog::open(&path).unwrap();
        log.append(&entry(0)).await.unwrap();
        drop(log);

        // Crash even earlier: only half of the length prefix made it out.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[7, 0]).unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.read_from(0).await.unwrap(), vec![(0, entry(0))]);
        assert_eq!(log.append(&entry(1)).await.unwrap(), 1);
        assert_eq!(log.read_from(0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_log_truncates_and_keeps_base_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actor.log");

        let log = FileLog::open(&path).unwrap();
        for n in 0..4 {
            log.append(&entry(n)).await.unwrap();
        }
        log.truncate_before(2).await.unwrap();
        assert_eq!(
            log.read_from(0)
                .await
                .unwrap()
                .iter()
                .map(|(p, _)| *p)
                .collect::<Vec<_>>(),
            vec![2, 3]
        );
        drop(log);

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.append(&entry(4)).await.unwrap(), 4);
    }
}

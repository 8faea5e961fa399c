//! # Checkpoints
//!
//! A checkpoint is a point-in-time image of everything the sequencer needs to
//! resume without re-reading the whole log: serialized actor state, the log
//! position already reflected in that state, the outbound sequence counter,
//! and a marker for every parked continuation.
//!
//! Stores implement [`CheckpointStore`] with atomic visibility: the previous
//! image stays valid until the new one is durably committed, so a crash
//! mid-checkpoint never leaves a partial snapshot. Multiple images may
//! coexist; recovery reads the most recent complete one. An image that exists
//! but cannot be decoded is a fatal recovery error; the sequencer must not
//! silently fall back to an older image.

use crate::call_cache::ParkedMarker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// The full persisted form of one checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointImage {
    /// Actor state as produced by `on_save_state`.
    pub state: Vec<u8>,
    /// Replay resumes at this log position.
    pub position: u64,
    /// Next outbound sequence number to allocate.
    pub next_seq: u64,
    /// Continuations parked at capture time, in sequence order.
    pub parked: Vec<ParkedMarker>,
}

impl CheckpointImage {
    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| CheckpointError::Storage(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        bincode::deserialize(bytes).map_err(|e| CheckpointError::Corrupt(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint storage error: {0}")]
    Storage(String),
    #[error("unreadable checkpoint image: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        CheckpointError::Storage(e.to_string())
    }
}

/// Contract for checkpoint storage backends.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Commits an encoded image for the given log position. Must be atomic:
    /// readers see either the previous latest image or this one, never a
    /// partial write.
    async fn write_checkpoint(&self, bytes: Vec<u8>, position: u64)
        -> Result<(), CheckpointError>;

    /// The most recent complete image and its position, or `None` when no
    /// checkpoint has ever been committed (first start).
    async fn read_latest(&self) -> Result<Option<(Vec<u8>, u64)>, CheckpointError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Volatile checkpoint store for tests and embedded hosts.
#[derive(Debug, Default)]
pub struct MemoryCheckpoints {
    images: RwLock<Vec<(u64, Vec<u8>)>>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoints {
    async fn write_checkpoint(
        &self,
        bytes: Vec<u8>,
        position: u64,
    ) -> Result<(), CheckpointError> {
        let mut images = self
            .images
            .write()
            .map_err(|_| CheckpointError::Storage("checkpoint lock poisoned".into()))?;
        images.push((position, bytes));
        Ok(())
    }

    async fn read_latest(&self) -> Result<Option<(Vec<u8>, u64)>, CheckpointError> {
        let images = self
            .images
            .read()
            .map_err(|_| CheckpointError::Storage("checkpoint lock poisoned".into()))?;
        Ok(images
            .iter()
            .max_by_key(|(position, _)| *position)
            .map(|(position, bytes)| (bytes.clone(), *position)))
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// Directory of `ckpt-<position>.bin` files. Atomicity comes from writing a
/// temp file and renaming it into place; an interrupted write never produces
/// a visible `.bin` file.
pub struct FileCheckpoints {
    dir: PathBuf,
}

impl FileCheckpoints {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn image_path(&self, position: u64) -> PathBuf {
        self.dir.join(format!("ckpt-{position:020}.bin"))
    }
}

fn parse_position(name: &str) -> Option<u64> {
    name.strip_prefix("ckpt-")?
        .strip_suffix(".bin")?
        .parse()
        .ok()
}

#[async_trait]
impl CheckpointStore for FileCheckpoints {
    async fn write_checkpoint(
        &self,
        bytes: Vec<u8>,
        position: u64,
    ) -> Result<(), CheckpointError> {
        let target = self.image_path(position);
        let tmp = target.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    async fn read_latest(&self) -> Result<Option<(Vec<u8>, u64)>, CheckpointError> {
        let mut latest: Option<(u64, PathBuf)> = None;
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(position) = name.to_str().and_then(parse_position) else {
                continue;
            };
            if latest.as_ref().is_none_or(|(best, _)| position > *best) {
                latest = Some((position, dirent.path()));
            }
        }
        match latest {
            None => Ok(None),
            Some((position, path)) => {
                let bytes = std::fs::read(path)?;
                Ok(Some((bytes, position)))
            }
        }
    }
}

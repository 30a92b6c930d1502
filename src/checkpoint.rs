//! Checkpoint of the last successful incremental run.
//!
//! A checkpoint is a single timestamp stored under a fixed key. It is read
//! before an incremental run and replaced once every table of that run has
//! been copied. The stored value is the upper bound of the run's window,
//! captured when the run started.

use crate::error::{Error, Result};
use crate::window::{format_timestamp, parse_timestamp};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Identity of the checkpoint record in the sink store.
pub const CHECKPOINT_ID: i32 = 0;

/// Default collection holding the checkpoint record.
pub const DEFAULT_CHECKPOINT_COLLECTION: &str = "_lastRun";

/// Timestamp of the last successful incremental run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Start of the next incremental window
    #[serde(serialize_with = "serialize_date", deserialize_with = "deserialize_date")]
    pub date: NaiveDateTime,
}

impl Checkpoint {
    /// Create a checkpoint.
    pub fn new(date: NaiveDateTime) -> Self {
        Self { date }
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_timestamp(&self.date))
    }
}

fn serialize_date<S: Serializer>(date: &NaiveDateTime, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(date))
}

fn deserialize_date<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Persistence of the singleton checkpoint record.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint, `None` if no incremental run has completed yet.
    async fn load(&self) -> Result<Option<Checkpoint>>;

    /// Create or replace the checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        (**self).load().await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        (**self).save(checkpoint).await
    }
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Box<T> {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        (**self).load().await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        (**self).save(checkpoint).await
    }
}

/// Checkpoint kept in a local JSON file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::store_with_source(
                    format!("Failed to read {}", self.path.display()),
                    e,
                ));
            }
        };

        let checkpoint = serde_json::from_str(&content).map_err(|e| {
            Error::store_with_source(format!("Failed to parse {}", self.path.display()), e)
        })?;
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let content = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| Error::store_with_source("Failed to encode checkpoint", e))?;

        // Write next to the target, then rename over it.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content).await.map_err(|e| {
            Error::store_with_source(format!("Failed to write {}", tmp.display()), e)
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::store_with_source(format!("Failed to replace {}", self.path.display()), e)
        })?;

        debug!("Saved checkpoint {} to {}", checkpoint, self.path.display());
        Ok(())
    }
}

//! Lifetime record-id counter.
//!
//! The counter file holds the last id handed out as decimal text. A new id
//! is written to a temp file, synced and renamed over the counter before it
//! is returned, so a crash can skip an id but never reuse one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tn_common::RecordId;
use tracing::debug;

use crate::error::StoreError;
use crate::segment::{segment_path, swap_segment};

/// Monotonic id source persisted on the storage volume.
#[derive(Debug, Clone)]
pub struct LifetimeCounter {
    path: PathBuf,
}

impl LifetimeCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LifetimeCounter { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last id handed out (0 when none has been yet).
    pub fn current(&self) -> Result<u32, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            // A crash between create and write of the very first value.
            return Ok(0);
        }
        trimmed
            .parse::<u32>()
            .map_err(|_| StoreError::CounterCorrupt {
                path: self.path.clone(),
                content: trimmed.chars().take(32).collect(),
            })
    }

    /// Reserve and persist the next id.
    pub fn next_id(&self) -> Result<RecordId, StoreError> {
        let next = RecordId(self.current()?)
            .next()
            .ok_or(StoreError::CounterExhausted)?;
        self.persist(next.0)?;
        debug!(record_id = next.0, "record id reserved");
        Ok(next)
    }

    fn persist(&self, value: u32) -> Result<(), StoreError> {
        let temp = segment_path(&self.path);
        let write = || -> io::Result<()> {
            let mut file = File::create(&temp)?;
            writeln!(file, "{}", value)?;
            file.sync_all()?;
            drop(file);
            swap_segment(&temp, &self.path)
        };
        write().map_err(|e| StoreError::io(&self.path, e))
    }
}

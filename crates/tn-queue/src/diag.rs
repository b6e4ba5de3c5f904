//! Best-effort diagnostic log on the storage volume.
//!
//! Diagnostics must never take the node down: every failure here is
//! reported through `tracing` and otherwise ignored.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Suffix of the single rotated generation.
const ROTATED_SUFFIX: &str = "1";

/// Append-only text log with single-generation size rotation.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    path: PathBuf,
    max_bytes: u64,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        DiagnosticLog {
            path: path.into(),
            max_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the rotated generation (`<diag>.1`).
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(ROTATED_SUFFIX);
        self.path.with_file_name(name)
    }

    /// Append one message. Line breaks inside the message are flattened so
    /// one call is always one line.
    pub fn append(&self, message: &str) {
        if let Err(e) = self.try_append(message) {
            warn!(path = %self.path.display(), error = %e, "diagnostic log write failed");
        }
    }

    fn try_append(&self, message: &str) -> std::io::Result<()> {
        self.rotate_if_needed()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let flat = message.replace(['\n', '\r'], " ");
        writeln!(file, "{}", flat)?;
        file.flush()
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if size >= self.max_bytes {
            fs::rename(&self.path, self.rotated_path())?;
        }
        Ok(())
    }
}

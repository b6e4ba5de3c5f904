//! Durable queue store: the `pending` and `sent` logs on one volume.
//!
//! Every mutation of a log is either an append followed by a sync, or a
//! compaction that writes a new segment and swaps it in by rename. No
//! operation rewrites bytes in place, so a power cut at any point leaves
//! a state that [`QueueStore::recover`] can finish.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tn_common::{RecordId, FIELD_DELIMITER};
use tn_config::StorageConfig;
use tracing::{debug, info, warn};

use crate::counter::LifetimeCounter;
use crate::diag::DiagnosticLog;
use crate::error::StoreError;
use crate::segment;

/// File names of the logs inside the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub pending_file: String,
    pub sent_file: String,
    pub diag_file: String,
    pub counter_file: String,
    pub diag_max_bytes: u64,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

impl StoreLayout {
    pub fn from_config(config: &StorageConfig) -> Self {
        StoreLayout {
            pending_file: config.pending_file.clone(),
            sent_file: config.sent_file.clone(),
            diag_file: config.diag_file.clone(),
            counter_file: config.counter_file.clone(),
            diag_max_bytes: config.diag_max_bytes,
        }
    }
}

/// Result of [`QueueStore::promote_oldest_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    /// The line was appended to `sent` and removed from `pending`.
    Promoted(String),
    /// The line was already the tail of `sent` (an earlier promotion was
    /// interrupted); only the removal from `pending` was performed.
    Completed(String),
    /// `pending` held no complete line.
    Empty,
}

impl Promotion {
    pub fn line(&self) -> Option<&str> {
        match self {
            Promotion::Promoted(line) | Promotion::Completed(line) => Some(line),
            Promotion::Empty => None,
        }
    }
}

/// Which log a record currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Sent,
}

/// What [`QueueStore::recover`] had to repair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Stale compaction segments deleted (the original log was intact).
    pub stale_segments_removed: usize,
    /// Compaction segments renamed into place (the original was gone).
    pub segments_restored: usize,
    /// Line whose interrupted promotion was finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_promotion: Option<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.stale_segments_removed == 0
            && self.segments_restored == 0
            && self.completed_promotion.is_none()
    }
}

/// The durable queue.
#[derive(Debug)]
pub struct QueueStore {
    volume: PathBuf,
    pending: PathBuf,
    sent: PathBuf,
    counter: LifetimeCounter,
    diag: DiagnosticLog,
    available: bool,
}

impl QueueStore {
    /// Mount the store on `volume`.
    ///
    /// The volume is checked once. If it is not an existing directory the
    /// store stays unavailable for the lifetime of this value and every
    /// operation returns [`StoreError::Unavailable`].
    pub fn mount(volume: impl Into<PathBuf>, layout: &StoreLayout) -> Self {
        let volume = volume.into();
        let available = volume.is_dir();
        let store = QueueStore {
            pending: volume.join(&layout.pending_file),
            sent: volume.join(&layout.sent_file),
            counter: LifetimeCounter::new(volume.join(&layout.counter_file)),
            diag: DiagnosticLog::new(volume.join(&layout.diag_file), layout.diag_max_bytes),
            volume,
            available,
        };

        if !available {
            warn!(volume = %store.volume.display(), "storage volume unavailable; running without durability");
            return store;
        }

        info!(volume = %store.volume.display(), "storage volume mounted");
        match store.recover() {
            Ok(report) if !report.is_clean() => {
                info!(?report, "recovered queue state at mount")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "queue recovery at mount failed"),
        }
        store
    }

    /// Mount using the storage section of the node configuration.
    pub fn open(config: &StorageConfig) -> Self {
        Self::mount(config.volume.clone(), &StoreLayout::from_config(config))
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn volume(&self) -> &Path {
        &self.volume
    }

    pub fn pending_path(&self) -> &Path {
        &self.pending
    }

    pub fn sent_path(&self) -> &Path {
        &self.sent
    }

    pub fn diag(&self) -> &DiagnosticLog {
        &self.diag
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                volume: self.volume.clone(),
            })
        }
    }

    /// Append an encoded record to `pending` and sync it to the medium.
    pub fn append_pending(&self, line: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        if line.contains(['\n', '\r']) {
            return Err(StoreError::io(
                &self.pending,
                io::Error::new(io::ErrorKind::InvalidInput, "record line contains a line break"),
            ));
        }
        segment::append_line(&self.pending, line.as_bytes())
            .map_err(|e| StoreError::io(&self.pending, e))?;
        debug!(bytes = line.len(), "record appended to pending");
        Ok(())
    }

    pub fn count_pending(&self) -> Result<usize, StoreError> {
        self.ensure_available()?;
        segment::count_lines(&self.pending).map_err(|e| StoreError::io(&self.pending, e))
    }

    /// The oldest complete pending line, without removing it.
    pub fn peek_oldest_pending(&self) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        let first =
            segment::first_line(&self.pending).map_err(|e| StoreError::io(&self.pending, e))?;
        Ok(first.map(lossy))
    }

    /// Move the oldest pending line to `sent`.
    ///
    /// The line is appended to `sent` first and removed from `pending`
    /// second. When the line is already the last line of `sent`, an
    /// earlier promotion was interrupted between the two steps and only
    /// the removal is redone.
    pub fn promote_oldest_pending(&self) -> Result<Promotion, StoreError> {
        self.ensure_available()?;
        let Some(oldest) =
            segment::first_line(&self.pending).map_err(|e| StoreError::io(&self.pending, e))?
        else {
            return Ok(Promotion::Empty);
        };

        let already_sent = self.sent_tail()?.as_deref() == Some(oldest.as_slice());
        if !already_sent {
            segment::append_line(&self.sent, &oldest)
                .map_err(|e| StoreError::io(&self.sent, e))?;
        }
        segment::compact_without_first(&self.pending)
            .map_err(|e| StoreError::io(&self.pending, e))?;

        let line = lossy(oldest);
        if already_sent {
            info!(line = %line, "finished interrupted promotion");
            Ok(Promotion::Completed(line))
        } else {
            debug!(line = %line, "record promoted to sent");
            Ok(Promotion::Promoted(line))
        }
    }

    /// Remove the oldest pending line without sending it.
    ///
    /// Used for lines that cannot be decoded. The text is kept in the
    /// diagnostic log.
    pub fn discard_oldest_pending(&self) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        let removed = segment::compact_without_first(&self.pending)
            .map_err(|e| StoreError::io(&self.pending, e))?
            .map(lossy);
        if let Some(line) = &removed {
            warn!(line = %line, "discarded pending record");
            self.diag.append(&format!("discarded pending record: {}", line));
        }
        Ok(removed)
    }

    /// Finish whatever a power cut interrupted.
    ///
    /// - A compaction segment next to an intact log is stale and deleted.
    /// - A compaction segment whose log is missing replaces it.
    /// - An oldest pending line equal to the tail of `sent` was promoted
    ///   but not yet removed; the removal is done now.
    pub fn recover(&self) -> Result<RecoveryReport, StoreError> {
        self.ensure_available()?;
        let mut report = RecoveryReport::default();

        for log in [self.pending.as_path(), self.counter.path()] {
            recover_segment(log, &mut report).map_err(|e| StoreError::io(log, e))?;
        }

        let oldest =
            segment::first_line(&self.pending).map_err(|e| StoreError::io(&self.pending, e))?;
        if let Some(oldest) = oldest {
            if self.sent_tail()?.as_deref() == Some(oldest.as_slice()) {
                segment::compact_without_first(&self.pending)
                    .map_err(|e| StoreError::io(&self.pending, e))?;
                let line = lossy(oldest);
                info!(line = %line, "finished interrupted promotion during recovery");
                report.completed_promotion = Some(line);
            }
        }

        if !report.is_clean() {
            self.diag.append(&format!(
                "recovery: {} stale segment(s) removed, {} restored, promotion completed: {}",
                report.stale_segments_removed,
                report.segments_restored,
                report.completed_promotion.is_some()
            ));
        }
        Ok(report)
    }

    pub fn count_sent(&self) -> Result<usize, StoreError> {
        self.ensure_available()?;
        segment::count_lines(&self.sent).map_err(|e| StoreError::io(&self.sent, e))
    }

    pub fn sent_lines(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_available()?;
        let lines = segment::read_lines(&self.sent).map_err(|e| StoreError::io(&self.sent, e))?;
        Ok(lines.into_iter().map(lossy).collect())
    }

    pub fn pending_lines(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_available()?;
        let lines =
            segment::read_lines(&self.pending).map_err(|e| StoreError::io(&self.pending, e))?;
        Ok(lines.into_iter().map(lossy).collect())
    }

    /// Which log holds the record with this id, if any.
    ///
    /// A record caught between the two steps of a promotion has already
    /// been acknowledged and is reported as sent.
    pub fn status_of(&self, id: RecordId) -> Result<Option<RecordStatus>, StoreError> {
        self.ensure_available()?;
        let prefix = format!("{}{}", id, FIELD_DELIMITER);
        let matches = |line: &[u8]| line.starts_with(prefix.as_bytes());

        let sent = segment::read_lines(&self.sent).map_err(|e| StoreError::io(&self.sent, e))?;
        if sent.iter().any(|l| matches(l)) {
            return Ok(Some(RecordStatus::Sent));
        }
        let pending =
            segment::read_lines(&self.pending).map_err(|e| StoreError::io(&self.pending, e))?;
        if pending.iter().any(|l| matches(l)) {
            return Ok(Some(RecordStatus::Pending));
        }
        Ok(None)
    }

    /// Best-effort diagnostic line. Does nothing without a volume.
    pub fn append_log(&self, message: &str) {
        if self.available {
            self.diag.append(message);
        } else {
            debug!(dropped = message, "diagnostic line dropped; storage unavailable");
        }
    }

    /// Reserve the next lifetime record id.
    pub fn next_record_id(&self) -> Result<RecordId, StoreError> {
        self.ensure_available()?;
        self.counter.next_id()
    }

    /// The last record id handed out.
    pub fn last_record_id(&self) -> Result<u32, StoreError> {
        self.ensure_available()?;
        self.counter.current()
    }

    fn sent_tail(&self) -> Result<Option<Vec<u8>>, StoreError> {
        segment::last_line(&self.sent).map_err(|e| StoreError::io(&self.sent, e))
    }
}

fn recover_segment(log: &Path, report: &mut RecoveryReport) -> io::Result<()> {
    let seg = segment::segment_path(log);
    if !seg.exists() {
        return Ok(());
    }
    if log.exists() {
        fs::remove_file(&seg)?;
        report.stale_segments_removed += 1;
        debug!(segment = %seg.display(), "removed stale compaction segment");
    } else {
        fs::rename(&seg, log)?;
        report.segments_restored += 1;
        info!(log = %log.display(), "restored log from compaction segment");
    }
    Ok(())
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

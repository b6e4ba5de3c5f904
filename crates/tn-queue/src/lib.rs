//! Telenode durable store-and-forward queue.
//!
//! This crate provides:
//! - The record codec (`;`-delimited text lines, `|` sub-samples)
//! - The durable queue store: append-only `pending` and `sent` logs on one
//!   storage volume, FIFO promotion with segment compaction, and crash
//!   recovery
//! - The lifetime record-id counter
//! - A best-effort diagnostic log
//!
//! # Persisted layout
//!
//! ```text
//! <volume>/
//! ├── pending.log       # measurements not yet acknowledged, oldest first
//! ├── pending.log.tmp   # compaction segment (only during a promotion)
//! ├── sent.log          # acknowledged measurements, append-only audit trail
//! ├── diag.log          # diagnostic lines (rotated to diag.log.1)
//! └── counter           # lifetime record-id counter
//! ```
//!
//! A record is appended to `pending` before any transmission is attempted.
//! Promotion appends it to `sent` first and removes it from `pending`
//! second, so an interruption leaves a benign duplicate that recovery
//! cleans up, never a lost record.

pub mod codec;
pub mod counter;
pub mod diag;
pub mod error;
pub mod segment;
pub mod store;

pub use codec::{decode, encode, FieldKind, FieldSpec, Record, Schema, MAX_LINE_LEN};
pub use counter::LifetimeCounter;
pub use diag::DiagnosticLog;
pub use error::{DecodeError, EncodeError, StoreError};
pub use store::{Promotion, QueueStore, RecordStatus, RecoveryReport, StoreLayout};

/// Suffix of the compaction segment written next to a log.
pub const SEGMENT_SUFFIX: &str = "tmp";

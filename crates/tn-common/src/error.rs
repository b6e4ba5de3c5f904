//! Failure taxonomy for the store-and-forward pipeline.
//!
//! Every concrete error type in the workspace (storage, codec, transport)
//! classifies itself into one of a handful of [`FailureClass`]es. The class
//! determines the [`Disposition`]: what the retry controller does with the
//! failing step. Nothing here is allowed to halt the node; only the
//! battery-critical gate does that, and it is not an error.
//!
//! ```text
//! StorageUnavailable  -> SkipDurability (permanent, writes become no-ops)
//! Storage             -> SkipDurability (transient, retried next cycle)
//! Decode              -> Discard        (drop the record, keep draining)
//! Transport           -> Defer          (leave in pending, stop draining)
//! Encoding            -> Bug            (input validation should prevent it)
//! ```

use serde::{Deserialize, Serialize};

/// Classes of failure the node distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Storage medium never mounted; permanent for the process lifetime.
    StorageUnavailable,
    /// Transient I/O failure on a mounted medium.
    Storage,
    /// Malformed persisted record.
    Decode,
    /// No acknowledgment from the backend.
    Transport,
    /// A field contains a reserved delimiter or exceeds the record bound.
    Encoding,
}

impl FailureClass {
    /// What the controller does with a failure of this class.
    pub fn disposition(self) -> Disposition {
        match self {
            FailureClass::StorageUnavailable | FailureClass::Storage => {
                Disposition::SkipDurability
            }
            FailureClass::Decode => Disposition::Discard,
            FailureClass::Transport => Disposition::Defer,
            FailureClass::Encoding => Disposition::Bug,
        }
    }

    /// Whether the condition can clear on a later cycle.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureClass::Storage | FailureClass::Transport)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::StorageUnavailable => write!(f, "storage_unavailable"),
            FailureClass::Storage => write!(f, "storage"),
            FailureClass::Decode => write!(f, "decode"),
            FailureClass::Transport => write!(f, "transport"),
            FailureClass::Encoding => write!(f, "encoding"),
        }
    }
}

/// How a failing step degrades the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Log it; this cycle contributes no durability. Next cycle retries.
    SkipDurability,
    /// Leave the record pending and stop transmitting for this cycle.
    Defer,
    /// Drop the offending record and carry on.
    Discard,
    /// Programmer error; log loudly, drop the measurement.
    Bug,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::SkipDurability => write!(f, "skip_durability"),
            Disposition::Defer => write!(f, "defer"),
            Disposition::Discard => write!(f, "discard"),
            Disposition::Bug => write!(f, "bug"),
        }
    }
}

/// Implemented by every error type that can surface inside a cycle.
pub trait Classify {
    /// The failure class of this error.
    fn class(&self) -> FailureClass;

    /// Shorthand for `self.class().disposition()`.
    fn disposition(&self) -> Disposition {
        self.class().disposition()
    }
}

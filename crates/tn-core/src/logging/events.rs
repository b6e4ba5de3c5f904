//! Stable event names attached to log lines as the `event` field.
//!
//! Field tooling greps JSONL logs for these; renaming one is a breaking
//! change.

pub mod event_names {
    // Node lifecycle
    pub const NODE_STARTED: &str = "node.started";
    pub const NODE_SHUTDOWN: &str = "node.shutdown";

    // Cycle
    pub const CYCLE_STARTED: &str = "cycle.started";
    pub const CYCLE_FINISHED: &str = "cycle.finished";

    // Queue
    pub const QUEUE_RECOVERED: &str = "queue.recovered";
    pub const RECORD_QUEUED: &str = "record.queued";
    pub const RECORD_PROMOTED: &str = "record.promoted";
    pub const RECORD_DISCARDED: &str = "record.discarded";
    pub const RECORD_DEFERRED: &str = "record.deferred";
    pub const RECORD_DROPPED: &str = "record.dropped";
    pub const STORAGE_FAILED: &str = "storage.failed";

    // Operating parameters
    pub const PARAMS_UPDATED: &str = "params.updated";
    pub const PARAMS_REJECTED: &str = "params.rejected";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";
}

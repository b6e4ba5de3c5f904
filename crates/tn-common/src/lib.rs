//! Telenode common types, IDs, and failure taxonomy.
//!
//! This crate provides foundational types shared across the node crates:
//! - Record and device identity types
//! - The per-cycle system snapshot
//! - Measurement values, sensor channels and operating parameters
//! - Failure classification shared by storage, codec and transport errors
//! - Output formats for the CLI

pub mod error;
pub mod id;
pub mod line;
pub mod measurement;
pub mod output;
pub mod sensor;
pub mod snapshot;

pub use error::{Classify, Disposition, FailureClass};
pub use id::{DeviceId, ParseIdError, RecordId};
pub use line::{max_accumulation_for, worst_case_line_len, MAX_LINE_LEN};
pub use measurement::{MeasurementFields, NamedValue, OperatingParams, ParamLimits, ParamUpdate};
pub use output::OutputFormat;
pub use sensor::SensorKind;
pub use snapshot::SystemSnapshot;

/// Primary field delimiter of a persisted record line.
pub const FIELD_DELIMITER: char = ';';

/// Delimiter between accumulated samples inside one field.
pub const SAMPLE_DELIMITER: char = '|';

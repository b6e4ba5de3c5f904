//! Configuration validation errors and semantic validation.

use crate::NodeConfig;
use std::collections::HashSet;
use thiserror::Error;
use tn_common::{max_accumulation_for, worst_case_line_len, MAX_LINE_LEN};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a node configuration semantically.
pub fn validate_config(config: &NodeConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    validate_storage(config)?;

    if config.queue.max_retries == 0 {
        return Err(ValidationError::invalid(
            "queue.max_retries",
            "Must be at least 1",
        ));
    }

    if config.operating.period_ms == 0 {
        return Err(ValidationError::invalid(
            "operating.period_ms",
            "Must be positive",
        ));
    }
    if config.operating.accumulation == 0 {
        return Err(ValidationError::invalid(
            "operating.accumulation",
            "Must be positive",
        ));
    }
    if config.operating.period_ms > config.limits.max_period_ms {
        return Err(ValidationError::invalid(
            "operating.period_ms",
            format!(
                "Exceeds limits.max_period_ms ({} > {})",
                config.operating.period_ms, config.limits.max_period_ms
            ),
        ));
    }
    if config.operating.accumulation > config.limits.max_accumulation {
        return Err(ValidationError::invalid(
            "operating.accumulation",
            format!(
                "Exceeds limits.max_accumulation ({} > {})",
                config.operating.accumulation, config.limits.max_accumulation
            ),
        ));
    }

    if config.sensors.is_empty() {
        return Err(ValidationError::invalid(
            "sensors",
            "At least one sensor must be active",
        ));
    }
    let mut seen = HashSet::new();
    for sensor in &config.sensors {
        if !seen.insert(*sensor) {
            return Err(ValidationError::invalid(
                "sensors",
                format!("Duplicate sensor: {}", sensor),
            ));
        }
    }
    validate_record_size(config)?;

    let critical = config.power.critical_battery_percent;
    if !(0.0..=100.0).contains(&critical) {
        return Err(ValidationError::invalid(
            "power.critical_battery_percent",
            format!("Must be in [0, 100], got {}", critical),
        ));
    }

    validate_transport(config)?;

    Ok(())
}

/// Every accumulation the node may run with, configured or retuned by the
/// backend, must yield records within the line bound.
fn validate_record_size(config: &NodeConfig) -> ValidationResult<()> {
    let fit = max_accumulation_for(&config.sensors);
    let checks = [
        ("operating.accumulation", config.operating.accumulation),
        ("limits.max_accumulation", config.limits.max_accumulation),
    ];
    for (field, accumulation) in checks {
        if accumulation > fit {
            return Err(ValidationError::invalid(
                field,
                format!(
                    "{} samples per field can encode to {} bytes with {} sensors, limit is {} (at most {})",
                    accumulation,
                    worst_case_line_len(&config.sensors, accumulation),
                    config.sensors.len(),
                    MAX_LINE_LEN,
                    fit
                ),
            ));
        }
    }
    Ok(())
}

fn validate_storage(config: &NodeConfig) -> ValidationResult<()> {
    let names = [
        ("storage.pending_file", &config.storage.pending_file),
        ("storage.sent_file", &config.storage.sent_file),
        ("storage.diag_file", &config.storage.diag_file),
        ("storage.counter_file", &config.storage.counter_file),
    ];

    let mut seen = HashSet::new();
    for (field, name) in names {
        if name.is_empty() {
            return Err(ValidationError::invalid(field, "Must not be empty"));
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(ValidationError::invalid(
                field,
                format!("Must be a plain file name, got {:?}", name),
            ));
        }
        if name.ends_with(".tmp") {
            return Err(ValidationError::invalid(
                field,
                "The .tmp suffix is reserved for compaction segments",
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(ValidationError::invalid(
                field,
                format!("File name {:?} is used twice", name),
            ));
        }
    }

    if config.storage.diag_max_bytes < 1024 {
        return Err(ValidationError::invalid(
            "storage.diag_max_bytes",
            "Must be at least 1024",
        ));
    }

    Ok(())
}

fn validate_transport(config: &NodeConfig) -> ValidationResult<()> {
    let endpoint = config.transport.endpoint.trim();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ValidationError::invalid(
            "transport.endpoint",
            format!("Must be an http(s) URL, got {:?}", endpoint),
        ));
    }
    if config.transport.timeout_ms == 0 {
        return Err(ValidationError::invalid(
            "transport.timeout_ms",
            "Must be positive; an unbounded submit stalls the node",
        ));
    }
    Ok(())
}

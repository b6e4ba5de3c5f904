//! Measurement values and operating parameters.

use serde::{Deserialize, Serialize};

/// One named sensor or system reading.
///
/// `value` is `None` when the sensor produced no usable reading this round;
/// it is persisted as an empty sample so the slot stays aligned with the
/// schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedValue {
    pub name: String,
    pub value: Option<f64>,
    pub unit: &'static str,
    /// Decimal places used when the value is written to a record line.
    pub precision: usize,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: Option<f64>, unit: &'static str) -> Self {
        NamedValue {
            name: name.into(),
            value,
            unit,
            precision: 2,
        }
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Text form persisted in the record; empty for a missing value.
    pub fn formatted(&self) -> String {
        match self.value {
            Some(v) if v.is_finite() => format!("{:.*}", self.precision, v),
            _ => String::new(),
        }
    }
}

/// The readings of one sampling round, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MeasurementFields(pub Vec<NamedValue>);

impl MeasurementFields {
    pub fn new(values: Vec<NamedValue>) -> Self {
        MeasurementFields(values)
    }

    pub fn get(&self, name: &str) -> Option<&NamedValue> {
        self.0.iter().find(|v| v.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sampling parameters the backend may retune through acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingParams {
    /// Milliseconds between operating cycles.
    pub period_ms: u32,
    /// Samples accumulated per field before one send.
    pub accumulation: u32,
}

impl Default for OperatingParams {
    fn default() -> Self {
        OperatingParams {
            period_ms: 600_000,
            accumulation: 1,
        }
    }
}

/// Upper bounds a retuned parameter must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamLimits {
    pub max_period_ms: u32,
    pub max_accumulation: u32,
}

impl Default for ParamLimits {
    fn default() -> Self {
        ParamLimits {
            max_period_ms: 86_400_000,
            max_accumulation: 12,
        }
    }
}

/// Result of applying a backend update to the operating parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamUpdate {
    pub period_changed: bool,
    pub accumulation_changed: bool,
    pub rejected_period: Option<u32>,
    pub rejected_accumulation: Option<u32>,
}

impl ParamUpdate {
    pub fn has_rejections(&self) -> bool {
        self.rejected_period.is_some() || self.rejected_accumulation.is_some()
    }
}

impl OperatingParams {
    /// Apply backend-provided values, keeping the last-known-good value for
    /// anything zero or above the limits.
    pub fn apply(
        &mut self,
        new_period: Option<u32>,
        new_accumulation: Option<u32>,
        limits: &ParamLimits,
    ) -> ParamUpdate {
        let mut update = ParamUpdate::default();

        if let Some(period) = new_period {
            if period > 0 && period <= limits.max_period_ms {
                update.period_changed = period != self.period_ms;
                self.period_ms = period;
            } else {
                update.rejected_period = Some(period);
            }
        }

        if let Some(accumulation) = new_accumulation {
            if accumulation > 0 && accumulation <= limits.max_accumulation {
                update.accumulation_changed = accumulation != self.accumulation;
                self.accumulation = accumulation;
            } else {
                update.rejected_accumulation = Some(accumulation);
            }
        }

        update
    }

    /// Sleep between accumulation rounds so one cycle spans one period.
    pub fn accumulation_interval_ms(&self) -> u32 {
        self.period_ms / self.accumulation.max(1)
    }
}

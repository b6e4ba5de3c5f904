//! The closed set of sensor and system channels a node can report.
//!
//! Which channels are active is a configuration choice; the order in the
//! configuration is the field order of every persisted record.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One reportable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Water temperature from an NTC thermistor.
    Temperature,
    /// Electrical conductivity, compensated to 25 °C.
    Conductivity,
    /// Dissolved oxygen from a galvanic probe.
    DissolvedOxygen,
    /// Battery state of charge.
    BatteryPercent,
    /// Battery terminal voltage.
    BatteryVoltage,
    /// Cellular signal quality.
    Signal,
}

impl SensorKind {
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Temperature,
        SensorKind::Conductivity,
        SensorKind::DissolvedOxygen,
        SensorKind::BatteryPercent,
        SensorKind::BatteryVoltage,
        SensorKind::Signal,
    ];

    /// Field name used in records and transport payloads.
    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Conductivity => "conductivity",
            SensorKind::DissolvedOxygen => "dissolved_oxygen",
            SensorKind::BatteryPercent => "battery_percent",
            SensorKind::BatteryVoltage => "battery_voltage",
            SensorKind::Signal => "signal",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "C",
            SensorKind::Conductivity => "uS/cm",
            SensorKind::DissolvedOxygen => "mg/L",
            SensorKind::BatteryPercent => "%",
            SensorKind::BatteryVoltage => "V",
            SensorKind::Signal => "csq",
        }
    }

    /// Decimal places written to the record line.
    pub fn precision(self) -> usize {
        match self {
            SensorKind::Temperature | SensorKind::DissolvedOxygen | SensorKind::BatteryVoltage => 2,
            SensorKind::Conductivity | SensorKind::BatteryPercent => 1,
            SensorKind::Signal => 0,
        }
    }

    /// Plausible physical range of a reading, bounds inclusive. Anything
    /// outside is a sensor fault and is reported as missing.
    pub fn range(self) -> (f64, f64) {
        match self {
            SensorKind::Temperature => (-40.0, 85.0),
            SensorKind::Conductivity => (0.0, 200_000.0),
            SensorKind::DissolvedOxygen => (0.0, 50.0),
            SensorKind::BatteryPercent => (0.0, 100.0),
            SensorKind::BatteryVoltage => (0.0, 10.0),
            SensorKind::Signal => (0.0, 31.0),
        }
    }

    pub fn accepts(self, value: f64) -> bool {
        let (lo, hi) = self.range();
        value.is_finite() && (lo..=hi).contains(&value)
    }

    /// Longest text form of an accepted reading at this channel's precision.
    pub fn max_sample_len(self) -> usize {
        let (lo, hi) = self.range();
        let width = |v: f64| format!("{:.*}", self.precision(), v).len();
        // -0.0 is accepted and prints with a sign
        width(lo).max(width(hi)).max(width(-0.0))
    }

    /// Channels read from the system snapshot rather than a probe.
    pub fn is_system_metric(self) -> bool {
        matches!(
            self,
            SensorKind::BatteryPercent | SensorKind::BatteryVoltage | SensorKind::Signal
        )
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown sensor: {}", s))
    }
}

//! Per-cycle system snapshot.
//!
//! Battery, supply and radio state are read once at the start of a cycle
//! and handed by reference to the power gate, the sampler and the
//! controller. Nothing reads these values from shared mutable state.

use serde::{Deserialize, Serialize};

/// System metrics captured once per operating cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Milliseconds since boot. Not comparable across reboots.
    pub uptime_ms: u32,
    /// Battery state of charge, 0-100.
    pub battery_percent: Option<f32>,
    /// Battery terminal voltage in volts.
    pub battery_voltage: Option<f32>,
    /// Modem signal quality (CSQ scale, 0-31; 99 = unknown).
    pub signal_quality: Option<u8>,
    /// Most recent water temperature, used for probe compensation.
    pub last_temperature_c: Option<f32>,
}

impl SystemSnapshot {
    pub fn at(uptime_ms: u32) -> Self {
        SystemSnapshot {
            uptime_ms,
            ..Default::default()
        }
    }

    pub fn with_battery(mut self, percent: f32, voltage: f32) -> Self {
        self.battery_percent = Some(percent);
        self.battery_voltage = Some(voltage);
        self
    }

    pub fn with_signal(mut self, quality: u8) -> Self {
        self.signal_quality = Some(quality);
        self
    }

    pub fn with_temperature(mut self, celsius: f32) -> Self {
        self.last_temperature_c = Some(celsius);
        self
    }

    /// Signal quality with the modem's "unknown" marker mapped to `None`.
    pub fn known_signal(&self) -> Option<u8> {
        self.signal_quality.filter(|q| *q <= 31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let snap = SystemSnapshot::at(1_500)
            .with_battery(76.0, 3.9)
            .with_signal(18)
            .with_temperature(12.5);
        assert_eq!(snap.uptime_ms, 1_500);
        assert_eq!(snap.battery_percent, Some(76.0));
        assert_eq!(snap.battery_voltage, Some(3.9));
        assert_eq!(snap.known_signal(), Some(18));
        assert_eq!(snap.last_temperature_c, Some(12.5));
    }

    #[test]
    fn test_unknown_signal_marker() {
        let snap = SystemSnapshot::at(0).with_signal(99);
        assert_eq!(snap.known_signal(), None);
    }
}

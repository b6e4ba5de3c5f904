//! Battery-based power gate.

use tn_common::SystemSnapshot;
use tn_config::PowerConfig;
use tracing::warn;

use crate::ports::PowerGate;

/// Declares the battery critical at or below a state-of-charge threshold.
///
/// An unknown battery level is never critical: a failed gauge read must
/// not power the node down.
#[derive(Debug, Clone)]
pub struct BatteryGate {
    critical_percent: f32,
    shutdown_requested: bool,
}

impl BatteryGate {
    pub fn new(critical_percent: f32) -> Self {
        BatteryGate {
            critical_percent,
            shutdown_requested: false,
        }
    }

    pub fn from_config(config: &PowerConfig) -> Self {
        Self::new(config.critical_battery_percent)
    }

    pub fn critical_percent(&self) -> f32 {
        self.critical_percent
    }

    /// Whether [`PowerGate::on_shutdown`] has been called.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }
}

impl PowerGate for BatteryGate {
    fn is_battery_critical(&self, snapshot: &SystemSnapshot) -> bool {
        snapshot
            .battery_percent
            .map(|p| p <= self.critical_percent)
            .unwrap_or(false)
    }

    fn on_shutdown(&mut self) {
        if !self.shutdown_requested {
            warn!(
                critical_percent = self.critical_percent,
                "battery critical, shutting down"
            );
        }
        self.shutdown_requested = true;
    }
}

//! Port traits between the retry controller and the outside world.
//!
//! The controller only talks to hardware and the network through these
//! traits, so every cycle can be driven by scripted implementations in
//! tests.

use serde::Serialize;
use thiserror::Error;
use tn_common::{
    Classify, DeviceId, FailureClass, MeasurementFields, RecordId, SystemSnapshot,
};
use tn_queue::{Record, Schema};

/// Source of system state and sensor readings.
pub trait Sampler {
    /// Read battery, supply, radio and uptime once for this cycle.
    fn snapshot(&mut self) -> SystemSnapshot;

    /// One reading of every active channel, in schema order.
    fn read_all(&mut self, snapshot: &SystemSnapshot) -> MeasurementFields;
}

/// Uplink to the backend.
pub trait Transport {
    /// Submit one record. `period_ms` is the sampling period currently in
    /// force, reported to the backend alongside the values.
    fn submit(&mut self, payload: &Payload, period_ms: u32) -> Outcome;
}

/// Power and lifecycle gate consulted at the start of every cycle.
pub trait PowerGate {
    fn is_battery_critical(&self, snapshot: &SystemSnapshot) -> bool;

    /// Called once when the node decides to power down.
    fn on_shutdown(&mut self);
}

/// The only way the controller suspends.
pub trait Sleeper {
    fn sleep_ms(&mut self, ms: u32);
}

/// Sleeps on the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}

/// Returns immediately. For bench runs and one-shot CLI cycles.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWait;

impl Sleeper for NoWait {
    fn sleep_ms(&mut self, _ms: u32) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, payload: &Payload, period_ms: u32) -> Outcome {
        (**self).submit(payload, period_ms)
    }
}

impl<Z: Sleeper + ?Sized> Sleeper for Box<Z> {
    fn sleep_ms(&mut self, ms: u32) {
        (**self).sleep_ms(ms)
    }
}

/// Raw analog front end of the probe board.
pub trait AnalogSource {
    /// Milliseconds since boot.
    fn uptime_ms(&mut self) -> u32;

    /// ADC counts for a channel, `None` when the conversion failed.
    fn read_counts(&mut self, channel: AnalogChannel) -> Option<u16>;

    /// Modem signal quality on the CSQ scale.
    fn signal_quality(&mut self) -> Option<u8>;
}

/// Physical ADC inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalogChannel {
    Thermistor,
    Conductivity,
    DissolvedOxygen,
    BatteryDivider,
}

/// One record as handed to the transport: values paired with schema names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub device_id: DeviceId,
    pub record_id: RecordId,
    pub timestamp: u32,
    pub fields: Vec<(String, String)>,
}

impl Payload {
    pub fn from_record(device_id: &DeviceId, record: &Record, schema: &Schema) -> Self {
        Payload {
            device_id: device_id.clone(),
            record_id: record.id,
            timestamp: record.timestamp,
            fields: record
                .named_fields(schema)
                .into_iter()
                .map(|(name, value)| (name, value.to_string()))
                .collect(),
        }
    }
}

/// Backend acknowledgment, optionally carrying retuned parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub new_period: Option<u32>,
    pub new_accumulation: Option<u32>,
}

/// Result of one submission.
#[derive(Debug)]
pub enum Outcome {
    Ack(Ack),
    Nack(TransportFailure),
}

impl Outcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, Outcome::Ack(_))
    }
}

/// Why a submission was not acknowledged.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The reply carried no success marker.
    #[error("reply has no success marker: {excerpt:?}")]
    NoSuccessMarker { excerpt: String },

    #[error("HTTP failure{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Http { status: Option<u16>, message: String },

    #[error("no reply within {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("uplink offline")]
    Offline,
}

impl Classify for TransportFailure {
    fn class(&self) -> FailureClass {
        FailureClass::Transport
    }
}

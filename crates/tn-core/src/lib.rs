//! Telenode node runtime.
//!
//! This crate provides:
//! - Port traits the controller talks through (sampler, transport, power
//!   gate, sleeper, analog front end)
//! - The retry controller that runs one operating cycle
//! - Sensor conversions and a simulated analog source
//! - The HTTP and offline transports
//! - The battery power gate
//! - Structured logging setup and CLI exit codes

pub mod controller;
pub mod exit_codes;
pub mod logging;
pub mod ports;
pub mod power;
pub mod sensors;
pub mod transport;

pub use controller::{
    ControllerSettings, CycleEvent, CycleEventType, CycleOutcome, CycleStatus, RetryController,
    RunSummary,
};
pub use exit_codes::ExitCode;
pub use ports::{
    Ack, AnalogChannel, AnalogSource, NoWait, Outcome, Payload, PowerGate, Sampler, Sleeper,
    ThreadSleeper, Transport, TransportFailure,
};
pub use power::BatteryGate;
pub use sensors::{SensorSampler, SimulatedSource};
pub use transport::{HttpTransport, OfflineTransport};

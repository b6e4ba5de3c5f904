//! Retry controller: one operating cycle of the store-and-forward node.
//!
//! A cycle is:
//!
//! 1. take one [`SystemSnapshot`]
//! 2. consult the power gate; a critical battery ends the cycle before any
//!    queue mutation
//! 3. drain the backlog oldest-first, at most `max_retries` attempts,
//!    stopping at the first transport failure
//! 4. sample, encode and append the new measurement to `pending`
//! 5. send it immediately only when it is the whole backlog
//!
//! Every step degrades instead of failing: storage errors cost this
//! cycle's durability, transport errors defer, undecodable records are
//! discarded. Only the power gate halts the node.

use serde::Serialize;
use tn_common::{
    max_accumulation_for, Classify, DeviceId, OperatingParams, ParamLimits, RecordId, SensorKind,
    SystemSnapshot,
};
use tn_config::NodeConfig;
use tn_queue::codec::join_samples;
use tn_queue::{decode, encode, Promotion, QueueStore, Record, Schema, StoreError};
use tracing::{debug, error, info, warn};

use crate::logging::event_names;
use crate::ports::{Ack, Outcome, Payload, PowerGate, Sampler, Sleeper, Transport};

/// Fixed settings of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub device_id: DeviceId,
    /// Upper bound on pending records attempted per cycle.
    pub max_retries: u32,
    pub limits: ParamLimits,
}

impl ControllerSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        ControllerSettings {
            device_id: config.device_id.clone(),
            max_retries: config.queue.max_retries,
            limits: config.limits,
        }
        .fitted_to(&config.sensors)
    }

    /// Lower the accumulation limit to what a record over `sensors` can
    /// hold, so a retuned accumulation never produces an unencodable line.
    pub fn fitted_to(mut self, sensors: &[SensorKind]) -> Self {
        let fit = max_accumulation_for(sensors);
        if self.limits.max_accumulation > fit {
            debug!(
                configured = self.limits.max_accumulation,
                fit, "accumulation limit lowered to the record size bound"
            );
            self.limits.max_accumulation = fit;
        }
        self
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    /// Battery critical; the queue was not touched.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleEventType {
    Recovered,
    Promoted,
    Discarded,
    Deferred,
    Queued,
    Dropped,
    StorageFailed,
    ParamsUpdated,
    ParamsRejected,
    Shutdown,
}

impl CycleEventType {
    /// Stable log event name.
    pub fn event_name(self) -> &'static str {
        match self {
            CycleEventType::Recovered => event_names::QUEUE_RECOVERED,
            CycleEventType::Promoted => event_names::RECORD_PROMOTED,
            CycleEventType::Discarded => event_names::RECORD_DISCARDED,
            CycleEventType::Deferred => event_names::RECORD_DEFERRED,
            CycleEventType::Queued => event_names::RECORD_QUEUED,
            CycleEventType::Dropped => event_names::RECORD_DROPPED,
            CycleEventType::StorageFailed => event_names::STORAGE_FAILED,
            CycleEventType::ParamsUpdated => event_names::PARAMS_UPDATED,
            CycleEventType::ParamsRejected => event_names::PARAMS_REJECTED,
            CycleEventType::Shutdown => event_names::NODE_SHUTDOWN,
        }
    }
}

/// Something notable that happened during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleEvent {
    pub event_type: CycleEventType,
    pub detail: String,
}

/// Report of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    pub snapshot: SystemSnapshot,
    /// Backlog records attempted (sends plus discards).
    pub attempts: u32,
    /// Records moved to `sent`, including an immediate send.
    pub promoted: u32,
    pub discarded: u32,
    /// A transport failure ended transmission this cycle.
    pub deferred: bool,
    /// Id of the measurement appended this cycle.
    pub queued: Option<RecordId>,
    pub immediate_sent: bool,
    pub storage_available: bool,
    /// Pending backlog at the end of the cycle, when readable.
    pub pending: Option<usize>,
    pub params: OperatingParams,
    pub events: Vec<CycleEvent>,
}

impl CycleOutcome {
    fn new(status: CycleStatus, snapshot: SystemSnapshot, params: OperatingParams) -> Self {
        CycleOutcome {
            status,
            snapshot,
            attempts: 0,
            promoted: 0,
            discarded: 0,
            deferred: false,
            queued: None,
            immediate_sent: false,
            storage_available: true,
            pending: None,
            params,
            events: Vec::new(),
        }
    }

    fn record(&mut self, event_type: CycleEventType, detail: impl Into<String>) {
        self.events.push(CycleEvent {
            event_type,
            detail: detail.into(),
        });
    }

    pub fn has_event(&self, event_type: CycleEventType) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }
}

/// Totals of a multi-cycle run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub promoted: u64,
    pub queued: u64,
    pub shutdown: bool,
}

/// Drives the queue through the ports.
#[derive(Debug)]
pub struct RetryController<S, T, G, Z> {
    store: QueueStore,
    schema: Schema,
    settings: ControllerSettings,
    params: OperatingParams,
    sampler: S,
    transport: T,
    gate: G,
    sleeper: Z,
}

impl<S, T, G, Z> RetryController<S, T, G, Z>
where
    S: Sampler,
    T: Transport,
    G: PowerGate,
    Z: Sleeper,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: QueueStore,
        schema: Schema,
        settings: ControllerSettings,
        params: OperatingParams,
        sampler: S,
        transport: T,
        gate: G,
        sleeper: Z,
    ) -> Self {
        RetryController {
            store,
            schema,
            settings,
            params,
            sampler,
            transport,
            gate,
            sleeper,
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn params(&self) -> OperatingParams {
        self.params
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn sampler_mut(&mut self) -> &mut S {
        &mut self.sampler
    }

    /// Idle time after a cycle so that sampling rounds plus idle span one
    /// period.
    pub fn idle_ms(&self) -> u32 {
        self.params.accumulation_interval_ms()
    }

    /// Run one full operating cycle.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let snapshot = self.sampler.snapshot();
        info!(
            event = event_names::CYCLE_STARTED,
            uptime_ms = snapshot.uptime_ms,
            battery_percent = ?snapshot.battery_percent,
            "cycle started"
        );

        if self.gate.is_battery_critical(&snapshot) {
            return self.shut_down(snapshot);
        }

        let mut outcome = CycleOutcome::new(CycleStatus::Completed, snapshot, self.params);
        self.drain(&mut outcome);
        if let Some(line) = self.sample_and_queue(&snapshot, &mut outcome) {
            self.send_immediately(&line, &mut outcome);
        }
        self.finish(outcome)
    }

    /// Drain the backlog only, without sampling. The power gate applies as
    /// in a full cycle.
    pub fn drain_only(&mut self) -> CycleOutcome {
        let snapshot = self.sampler.snapshot();
        if self.gate.is_battery_critical(&snapshot) {
            return self.shut_down(snapshot);
        }
        let mut outcome = CycleOutcome::new(CycleStatus::Completed, snapshot, self.params);
        self.drain(&mut outcome);
        self.finish(outcome)
    }

    /// Cycle until the power gate shuts the node down or `max_cycles` is
    /// reached, idling between cycles through the sleeper.
    pub fn run(&mut self, max_cycles: Option<u64>) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            event = event_names::NODE_STARTED,
            device_id = %self.settings.device_id,
            ?max_cycles,
            "node started"
        );
        loop {
            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            let outcome = self.run_cycle();
            summary.cycles += 1;
            summary.promoted += u64::from(outcome.promoted);
            summary.queued += u64::from(outcome.queued.is_some());
            if outcome.status == CycleStatus::Shutdown {
                summary.shutdown = true;
                break;
            }
            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            self.sleeper.sleep_ms(self.idle_ms());
        }
        summary
    }

    fn shut_down(&mut self, snapshot: SystemSnapshot) -> CycleOutcome {
        self.gate.on_shutdown();
        let detail = format!(
            "battery critical at {}%",
            snapshot
                .battery_percent
                .map(|p| format!("{:.1}", p))
                .unwrap_or_else(|| "?".to_string())
        );
        self.store.append_log(&format!("shutdown: {}", detail));
        warn!(event = event_names::NODE_SHUTDOWN, %detail, "shutting down");

        let mut outcome = CycleOutcome::new(CycleStatus::Shutdown, snapshot, self.params);
        outcome.record(CycleEventType::Shutdown, detail);
        outcome.storage_available = self.store.is_available();
        outcome.pending = self.store.count_pending().ok();
        outcome
    }

    fn finish(&mut self, mut outcome: CycleOutcome) -> CycleOutcome {
        outcome.storage_available = self.store.is_available();
        outcome.pending = self.store.count_pending().ok();
        outcome.params = self.params;
        info!(
            event = event_names::CYCLE_FINISHED,
            attempts = outcome.attempts,
            promoted = outcome.promoted,
            discarded = outcome.discarded,
            deferred = outcome.deferred,
            pending = ?outcome.pending,
            "cycle finished"
        );
        outcome
    }

    fn storage_failed(&self, outcome: &mut CycleOutcome, step: &str, err: &StoreError) {
        if err.is_unavailable() {
            debug!(step, "storage unavailable");
        } else {
            error!(
                event = event_names::STORAGE_FAILED,
                step,
                error = %err,
                disposition = %err.disposition(),
                "storage operation failed"
            );
            self.store.append_log(&format!("storage failure during {}: {}", step, err));
        }
        outcome.record(CycleEventType::StorageFailed, format!("{}: {}", step, err));
    }

    fn drain(&mut self, outcome: &mut CycleOutcome) {
        match self.store.recover() {
            Ok(report) if !report.is_clean() => {
                info!(event = event_names::QUEUE_RECOVERED, ?report, "queue recovered");
                outcome.record(CycleEventType::Recovered, format!("{:?}", report));
            }
            Ok(_) => {}
            Err(e) => {
                self.storage_failed(outcome, "recover", &e);
                return;
            }
        }

        while outcome.attempts < self.settings.max_retries {
            match self.store.count_pending() {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    self.storage_failed(outcome, "count", &e);
                    break;
                }
            }
            let line = match self.store.peek_oldest_pending() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.storage_failed(outcome, "peek", &e);
                    break;
                }
            };
            outcome.attempts += 1;

            let record = match decode(&line, &self.schema) {
                Ok(record) => record,
                Err(e) => {
                    warn!(event = event_names::RECORD_DISCARDED, error = %e, %line, "undecodable pending record");
                    match self.store.discard_oldest_pending() {
                        Ok(_) => {
                            outcome.discarded += 1;
                            outcome.record(CycleEventType::Discarded, format!("{}: {}", e, line));
                            continue;
                        }
                        Err(se) => {
                            self.storage_failed(outcome, "discard", &se);
                            break;
                        }
                    }
                }
            };

            if !self.transmit(&record, outcome) {
                break;
            }
        }
    }

    /// Submit one decoded record that is currently the oldest pending.
    /// Returns whether draining may continue.
    fn transmit(&mut self, record: &Record, outcome: &mut CycleOutcome) -> bool {
        let payload = Payload::from_record(&self.settings.device_id, record, &self.schema);
        match self.transport.submit(&payload, self.params.period_ms) {
            Outcome::Ack(ack) => {
                match self.store.promote_oldest_pending() {
                    Ok(Promotion::Empty) => {
                        warn!(record_id = %record.id, "acknowledged record vanished from pending");
                    }
                    Ok(promotion) => {
                        debug!(event = event_names::RECORD_PROMOTED, record_id = %record.id, ?promotion, "record promoted");
                        outcome.promoted += 1;
                        outcome.record(CycleEventType::Promoted, record.id.to_string());
                    }
                    Err(e) => {
                        // Acknowledged but still pending: it will be sent
                        // again next cycle.
                        self.storage_failed(outcome, "promote", &e);
                        self.apply_ack(ack, outcome);
                        return false;
                    }
                }
                self.apply_ack(ack, outcome);
                true
            }
            Outcome::Nack(failure) => {
                info!(
                    event = event_names::RECORD_DEFERRED,
                    record_id = %record.id,
                    error = %failure,
                    "submission failed, deferring"
                );
                outcome.deferred = true;
                outcome.record(CycleEventType::Deferred, format!("{}: {}", record.id, failure));
                false
            }
        }
    }

    fn apply_ack(&mut self, ack: Ack, outcome: &mut CycleOutcome) {
        let update = self
            .params
            .apply(ack.new_period, ack.new_accumulation, &self.settings.limits);
        if update.has_rejections() {
            warn!(
                event = event_names::PARAMS_REJECTED,
                rejected_period = ?update.rejected_period,
                rejected_accumulation = ?update.rejected_accumulation,
                "backend sent out-of-range parameters, keeping last known good"
            );
            outcome.record(
                CycleEventType::ParamsRejected,
                format!(
                    "period={:?} accumulation={:?}",
                    update.rejected_period, update.rejected_accumulation
                ),
            );
        }
        if update.period_changed || update.accumulation_changed {
            info!(
                event = event_names::PARAMS_UPDATED,
                period_ms = self.params.period_ms,
                accumulation = self.params.accumulation,
                "operating parameters updated"
            );
            outcome.record(
                CycleEventType::ParamsUpdated,
                format!(
                    "period_ms={} accumulation={}",
                    self.params.period_ms, self.params.accumulation
                ),
            );
        }
    }

    /// Accumulate readings, build the record and append it to `pending`.
    /// Returns the persisted line.
    fn sample_and_queue(&mut self, snapshot: &SystemSnapshot, outcome: &mut CycleOutcome) -> Option<String> {
        let rounds = self.params.accumulation.max(1);
        let interval = self.params.accumulation_interval_ms();
        let mut columns: Vec<Vec<String>> = vec![Vec::with_capacity(rounds as usize); self.schema.len()];

        for round in 0..rounds {
            if round > 0 {
                self.sleeper.sleep_ms(interval);
            }
            let readings = self.sampler.read_all(snapshot);
            for (column, name) in columns.iter_mut().zip(self.schema.names()) {
                column.push(readings.get(name).map(|v| v.formatted()).unwrap_or_default());
            }
        }
        let fields: Vec<String> = columns.iter().map(|c| join_samples(c.as_slice())).collect();

        let id = match self.store.next_record_id() {
            Ok(id) => id,
            Err(e) => {
                self.storage_failed(outcome, "reserve id", &e);
                self.drop_measurement(outcome, &e.to_string());
                return None;
            }
        };
        let record = Record::new(id, snapshot.uptime_ms, fields);

        let line = match encode(&record) {
            Ok(line) => line,
            Err(e) => {
                error!(record_id = %id, error = %e, disposition = %e.disposition(), "measurement could not be encoded");
                self.store.append_log(&format!("encode failure for record {}: {}", id, e));
                self.drop_measurement(outcome, &e.to_string());
                return None;
            }
        };

        if let Err(e) = self.store.append_pending(&line) {
            self.storage_failed(outcome, "append", &e);
            self.drop_measurement(outcome, &e.to_string());
            return None;
        }

        info!(event = event_names::RECORD_QUEUED, record_id = %id, "measurement queued");
        outcome.queued = Some(id);
        outcome.record(CycleEventType::Queued, id.to_string());
        Some(line)
    }

    fn drop_measurement(&self, outcome: &mut CycleOutcome, reason: &str) {
        warn!(event = event_names::RECORD_DROPPED, reason, "measurement dropped");
        outcome.record(CycleEventType::Dropped, reason.to_string());
    }

    /// Send the record just queued when nothing older is waiting.
    fn send_immediately(&mut self, line: &str, outcome: &mut CycleOutcome) {
        if outcome.deferred {
            return;
        }
        match self.store.count_pending() {
            Ok(1) => {}
            Ok(n) => {
                debug!(pending = n, "backlog present, new record waits its turn");
                return;
            }
            Err(e) => {
                self.storage_failed(outcome, "count", &e);
                return;
            }
        }
        match self.store.peek_oldest_pending() {
            Ok(Some(oldest)) if oldest == line => {}
            Ok(_) => return,
            Err(e) => {
                self.storage_failed(outcome, "peek", &e);
                return;
            }
        }
        let record = match decode(line, &self.schema) {
            Ok(record) => record,
            Err(e) => {
                // Encoded a moment ago; a mismatch means the schema and the
                // sampler disagree. Leave it for the drain to discard.
                error!(error = %e, "freshly encoded record does not decode");
                return;
            }
        };
        let before = outcome.promoted;
        self.transmit(&record, outcome);
        outcome.immediate_sent = outcome.promoted > before;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{NoWait, TransportFailure};
    use crate::power::BatteryGate;
    use tempfile::TempDir;
    use tn_common::{MeasurementFields, NamedValue, SensorKind};
    use tn_queue::StoreLayout;

    struct FixedSampler {
        battery: f32,
    }

    impl Sampler for FixedSampler {
        fn snapshot(&mut self) -> SystemSnapshot {
            SystemSnapshot::at(1_000).with_battery(self.battery, 3.9)
        }

        fn read_all(&mut self, snapshot: &SystemSnapshot) -> MeasurementFields {
            MeasurementFields::new(vec![
                NamedValue::new("temperature", Some(12.5), "C"),
                NamedValue::new("battery_percent", snapshot.battery_percent.map(f64::from), "%")
                    .with_precision(1),
            ])
        }
    }

    /// Acks everything.
    struct AckAll;

    impl Transport for AckAll {
        fn submit(&mut self, _payload: &Payload, _period_ms: u32) -> Outcome {
            Outcome::Ack(Ack::default())
        }
    }

    struct NackAll;

    impl Transport for NackAll {
        fn submit(&mut self, _payload: &Payload, _period_ms: u32) -> Outcome {
            Outcome::Nack(TransportFailure::Offline)
        }
    }

    fn controller<T: Transport>(
        dir: &TempDir,
        transport: T,
        battery: f32,
    ) -> RetryController<FixedSampler, T, BatteryGate, NoWait> {
        let store = QueueStore::mount(dir.path(), &StoreLayout::default());
        let schema = Schema::from_sensors(&[SensorKind::Temperature, SensorKind::BatteryPercent]);
        RetryController::new(
            store,
            schema,
            ControllerSettings {
                device_id: DeviceId::default(),
                max_retries: 3,
                limits: ParamLimits::default(),
            },
            OperatingParams::default(),
            FixedSampler { battery },
            transport,
            BatteryGate::new(10.0),
            NoWait,
        )
    }

    #[test]
    fn test_cycle_sends_new_record_immediately() {
        let dir = TempDir::new().unwrap();
        let mut c = controller(&dir, AckAll, 80.0);
        let outcome = c.run_cycle();
        assert_eq!(outcome.status, CycleStatus::Completed);
        assert_eq!(outcome.queued, Some(RecordId(1)));
        assert!(outcome.immediate_sent);
        assert_eq!(outcome.pending, Some(0));
        assert_eq!(c.store().sent_lines().unwrap(), vec!["1;1000;12.50;80.0"]);
    }

    #[test]
    fn test_cycle_offline_keeps_record_pending() {
        let dir = TempDir::new().unwrap();
        let mut c = controller(&dir, NackAll, 80.0);
        let outcome = c.run_cycle();
        assert!(outcome.deferred);
        assert!(!outcome.immediate_sent);
        assert_eq!(outcome.pending, Some(1));
        assert!(outcome.has_event(CycleEventType::Deferred));
    }

    #[test]
    fn test_critical_battery_shuts_down_without_touching_queue() {
        let dir = TempDir::new().unwrap();
        let mut c = controller(&dir, AckAll, 5.0);
        let outcome = c.run_cycle();
        assert_eq!(outcome.status, CycleStatus::Shutdown);
        assert!(c.gate().shutdown_requested());
        assert_eq!(outcome.queued, None);
        assert!(!c.store().pending_path().exists());
        assert!(!c.store().sent_path().exists());
    }

    #[test]
    fn test_drain_only_respects_power_gate() {
        let dir = TempDir::new().unwrap();
        let mut c = controller(&dir, AckAll, 5.0);
        let outcome = c.drain_only();
        assert_eq!(outcome.status, CycleStatus::Shutdown);
        assert!(c.gate().shutdown_requested());
        assert_eq!(outcome.attempts, 0);
        assert!(!c.store().sent_path().exists());
    }

    #[test]
    fn test_settings_fit_accumulation_to_sensors() {
        let mut config = NodeConfig::default();
        config.limits.max_accumulation = 1_000;
        let settings = ControllerSettings::from_config(&config);
        assert_eq!(settings.limits.max_accumulation, max_accumulation_for(&SensorKind::ALL));

        config.sensors = vec![SensorKind::Signal];
        config.limits.max_accumulation = 4;
        let settings = ControllerSettings::from_config(&config);
        assert_eq!(settings.limits.max_accumulation, 4);
    }

    #[test]
    fn test_run_stops_at_max_cycles() {
        let dir = TempDir::new().unwrap();
        let mut c = controller(&dir, AckAll, 80.0);
        let summary = c.run(Some(3));
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.promoted, 3);
        assert!(!summary.shutdown);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut c = controller(&dir, AckAll, 1.0);
        let summary = c.run(None);
        assert_eq!(summary.cycles, 1);
        assert!(summary.shutdown);
    }
}

//! No-mock scenario tests for the retry controller.
//!
//! The queue runs on a real temp directory. Only the sampler, the uplink
//! and the clock are scripted, so every test observes the logs exactly as
//! a node would leave them on its card.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::rc::Rc;
use tempfile::TempDir;
use tn_common::{
    max_accumulation_for, DeviceId, MeasurementFields, NamedValue, OperatingParams, ParamLimits,
    RecordId, SensorKind, SystemSnapshot,
};
use tn_config::NodeConfig;
use tn_core::{
    Ack, BatteryGate, ControllerSettings, CycleEventType, CycleStatus, NoWait, Outcome, Payload,
    RetryController, Sampler, SensorSampler, SimulatedSource, Sleeper, Transport,
    TransportFailure,
};
use tn_queue::{encode, QueueStore, Record, Schema, StoreLayout, MAX_LINE_LEN};

/// Temperature climbs by one degree per reading so the order of records
/// is visible in their values.
struct RampSampler {
    battery: f32,
    uptime_ms: u32,
    next_value: f64,
}

impl RampSampler {
    fn new(battery: f32) -> Self {
        RampSampler {
            battery,
            uptime_ms: 0,
            next_value: 10.0,
        }
    }
}

impl Sampler for RampSampler {
    fn snapshot(&mut self) -> SystemSnapshot {
        self.uptime_ms += 1_000;
        SystemSnapshot::at(self.uptime_ms).with_battery(self.battery, 3.8)
    }

    fn read_all(&mut self, _snapshot: &SystemSnapshot) -> MeasurementFields {
        let value = self.next_value;
        self.next_value += 1.0;
        MeasurementFields::new(vec![
            NamedValue::new("temperature", Some(value), "C").with_precision(2)
        ])
    }
}

/// Uplink that plays back scripted replies, then falls back to a fixed
/// link state. Every submitted record id is kept.
#[derive(Default)]
struct ScriptedLink {
    script: VecDeque<Outcome>,
    up: bool,
    submitted: Vec<RecordId>,
}

impl ScriptedLink {
    fn up() -> Self {
        ScriptedLink {
            up: true,
            ..Default::default()
        }
    }

    fn down() -> Self {
        ScriptedLink::default()
    }

    fn then(mut self, outcome: Outcome) -> Self {
        self.script.push_back(outcome);
        self
    }
}

impl Transport for ScriptedLink {
    fn submit(&mut self, payload: &Payload, _period_ms: u32) -> Outcome {
        self.submitted.push(payload.record_id);
        if let Some(outcome) = self.script.pop_front() {
            return outcome;
        }
        if self.up {
            Outcome::Ack(Ack::default())
        } else {
            Outcome::Nack(TransportFailure::Timeout { after_ms: 30_000 })
        }
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Clone, Default)]
struct RecordingSleeper(Rc<RefCell<Vec<u32>>>);

impl RecordingSleeper {
    fn sleeps(&self) -> Vec<u32> {
        self.0.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep_ms(&mut self, ms: u32) {
        self.0.borrow_mut().push(ms);
    }
}

type Node = RetryController<RampSampler, ScriptedLink, BatteryGate, RecordingSleeper>;

struct Harness {
    node: Node,
    sleeper: RecordingSleeper,
}

fn schema() -> Schema {
    Schema::from_sensors(&[SensorKind::Temperature])
}

fn harness_with(store: QueueStore, link: ScriptedLink, battery: f32, max_retries: u32) -> Harness {
    let sleeper = RecordingSleeper::default();
    let node = RetryController::new(
        store,
        schema(),
        ControllerSettings {
            device_id: DeviceId::default(),
            max_retries,
            limits: ParamLimits::default(),
        },
        OperatingParams {
            period_ms: 60_000,
            accumulation: 1,
        },
        RampSampler::new(battery),
        link,
        BatteryGate::new(10.0),
        sleeper.clone(),
    );
    Harness { node, sleeper }
}

fn harness(dir: &TempDir, link: ScriptedLink) -> Harness {
    harness_with(mount(dir), link, 80.0, 5)
}

fn mount(dir: &TempDir) -> QueueStore {
    QueueStore::mount(dir.path(), &StoreLayout::default())
}

/// Queue a valid record through the store, as an earlier boot would have.
fn prequeue(store: &QueueStore, value: &str) -> String {
    let id = store.next_record_id().unwrap();
    let line = encode(&Record::new(id, 500, vec![value.to_string()])).unwrap();
    store.append_pending(&line).unwrap();
    line
}

fn ids(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|l| l.split(';').next().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn link_up_every_record_is_sent_in_its_own_cycle() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir, ScriptedLink::up());

    for expected in 1..=3 {
        let outcome = h.node.run_cycle();
        assert_eq!(outcome.queued, Some(RecordId(expected)));
        assert!(outcome.immediate_sent);
        assert_eq!(outcome.pending, Some(0));
    }

    assert_eq!(
        h.node.store().sent_lines().unwrap(),
        vec!["1;1000;10.00", "2;2000;11.00", "3;3000;12.00"]
    );
    assert_eq!(h.node.transport().submitted, vec![RecordId(1), RecordId(2), RecordId(3)]);
}

#[test]
fn link_down_then_restored_drains_backlog_oldest_first() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir, ScriptedLink::down());

    for _ in 0..3 {
        let outcome = h.node.run_cycle();
        assert_eq!(outcome.status, CycleStatus::Completed);
        assert!(outcome.deferred);
        assert_eq!(outcome.promoted, 0);
    }
    assert_eq!(h.node.store().count_pending().unwrap(), 3);
    assert_eq!(h.node.store().count_sent().unwrap(), 0);
    // The failing head is retried; nothing behind it is attempted.
    assert_eq!(h.node.transport().submitted, vec![RecordId(1), RecordId(1), RecordId(1)]);

    h.node.transport_mut().up = true;
    let outcome = h.node.run_cycle();
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.queued, Some(RecordId(4)));
    assert!(outcome.immediate_sent);
    assert_eq!(outcome.promoted, 4);
    assert_eq!(outcome.pending, Some(0));
    assert_eq!(ids(&h.node.store().sent_lines().unwrap()), vec!["1", "2", "3", "4"]);
}

#[test]
fn undecodable_line_is_discarded_and_the_next_record_is_sent() {
    let dir = TempDir::new().unwrap();
    let store = mount(&dir);
    store.append_pending("garbage").unwrap();
    let good = prequeue(&store, "9.50");
    let mut h = harness_with(store, ScriptedLink::up(), 80.0, 5);

    let outcome = h.node.run_cycle();

    assert_eq!(outcome.discarded, 1);
    assert!(outcome.has_event(CycleEventType::Discarded));
    // Discarding costs an attempt but sends nothing.
    assert_eq!(outcome.attempts, 2);
    assert_eq!(h.node.transport().submitted[0], RecordId(1));
    let sent = h.node.store().sent_lines().unwrap();
    assert_eq!(sent[0], good);
    assert!(!sent.iter().any(|l| l == "garbage"));

    let diag = fs::read_to_string(h.node.store().diag().path()).unwrap();
    assert!(diag.contains("garbage"));
}

#[test]
fn drain_is_bounded_by_max_retries() {
    let dir = TempDir::new().unwrap();
    let store = mount(&dir);
    for i in 0..5 {
        prequeue(&store, &format!("{}.00", i));
    }
    let mut h = harness_with(store, ScriptedLink::up(), 80.0, 2);

    let outcome = h.node.run_cycle();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.promoted, 2);
    assert!(!outcome.immediate_sent);
    assert_eq!(outcome.queued, Some(RecordId(6)));
    assert_eq!(outcome.pending, Some(4));
    assert_eq!(ids(&h.node.store().sent_lines().unwrap()), vec!["1", "2"]);
    assert_eq!(ids(&h.node.store().pending_lines().unwrap()), vec!["3", "4", "5", "6"]);
}

#[test]
fn critical_battery_halts_before_any_queue_mutation() {
    let dir = TempDir::new().unwrap();
    let store = mount(&dir);
    prequeue(&store, "7.00");
    let pending_before = fs::read(store.pending_path()).unwrap();
    let last_id_before = store.last_record_id().unwrap();
    let mut h = harness_with(store, ScriptedLink::up(), 4.0, 5);

    let outcome = h.node.run_cycle();

    assert_eq!(outcome.status, CycleStatus::Shutdown);
    assert!(outcome.has_event(CycleEventType::Shutdown));
    assert!(h.node.gate().shutdown_requested());
    assert!(h.node.transport().submitted.is_empty());
    assert_eq!(fs::read(h.node.store().pending_path()).unwrap(), pending_before);
    assert!(!h.node.store().sent_path().exists());
    assert_eq!(h.node.store().last_record_id().unwrap(), last_id_before);
}

#[test]
fn battery_exactly_at_threshold_is_critical() {
    let dir = TempDir::new().unwrap();
    let mut h = harness_with(mount(&dir), ScriptedLink::up(), 10.0, 5);
    assert_eq!(h.node.run_cycle().status, CycleStatus::Shutdown);
}

#[test]
fn new_record_waits_behind_a_failed_backlog() {
    let dir = TempDir::new().unwrap();
    let store = mount(&dir);
    prequeue(&store, "7.00");
    let link = ScriptedLink::up().then(Outcome::Nack(TransportFailure::NoSuccessMarker {
        excerpt: "502 Bad Gateway".to_string(),
    }));
    let mut h = harness_with(store, link, 80.0, 5);

    let outcome = h.node.run_cycle();

    assert!(outcome.deferred);
    assert_eq!(outcome.queued, Some(RecordId(2)));
    assert!(!outcome.immediate_sent);
    assert_eq!(h.node.transport().submitted, vec![RecordId(1)]);
    assert_eq!(ids(&h.node.store().pending_lines().unwrap()), vec!["1", "2"]);
}

#[test]
fn out_of_range_params_keep_last_known_good() {
    let dir = TempDir::new().unwrap();
    let link = ScriptedLink::up().then(Outcome::Ack(Ack {
        new_period: Some(0),
        new_accumulation: Some(1_000),
    }));
    let mut h = harness(&dir, link);

    let outcome = h.node.run_cycle();

    assert!(outcome.immediate_sent);
    assert!(outcome.has_event(CycleEventType::ParamsRejected));
    assert!(!outcome.has_event(CycleEventType::ParamsUpdated));
    assert_eq!(
        h.node.params(),
        OperatingParams {
            period_ms: 60_000,
            accumulation: 1,
        }
    );
}

#[test]
fn accepted_accumulation_joins_samples_and_paces_rounds() {
    let dir = TempDir::new().unwrap();
    let link = ScriptedLink::up().then(Outcome::Ack(Ack {
        new_period: Some(90_000),
        new_accumulation: Some(3),
    }));
    let mut h = harness(&dir, link);

    let first = h.node.run_cycle();
    assert!(first.has_event(CycleEventType::ParamsUpdated));
    assert_eq!(h.node.idle_ms(), 30_000);

    let second = h.node.run_cycle();
    assert_eq!(second.queued, Some(RecordId(2)));
    assert_eq!(
        h.node.store().sent_lines().unwrap(),
        vec!["1;1000;10.00", "2;2000;11.00|12.00|13.00"]
    );
    // Two pauses between three rounds.
    assert_eq!(h.sleeper.sleeps(), vec![30_000, 30_000]);
}

#[test]
fn run_idles_between_cycles_but_not_after_the_last() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir, ScriptedLink::up());

    let summary = h.node.run(Some(3));

    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.queued, 3);
    assert_eq!(summary.promoted, 3);
    assert_eq!(h.sleeper.sleeps(), vec![60_000, 60_000]);
}

#[test]
fn unavailable_storage_keeps_the_node_cycling() {
    let dir = TempDir::new().unwrap();
    let store = QueueStore::mount(dir.path().join("not-mounted"), &StoreLayout::default());
    let mut h = harness_with(store, ScriptedLink::up(), 80.0, 5);

    for _ in 0..2 {
        let outcome = h.node.run_cycle();
        assert_eq!(outcome.status, CycleStatus::Completed);
        assert!(!outcome.storage_available);
        assert_eq!(outcome.queued, None);
        assert_eq!(outcome.pending, None);
        assert!(outcome.has_event(CycleEventType::Dropped));
    }
    assert!(h.node.transport().submitted.is_empty());
    assert!(!dir.path().join("not-mounted").exists());
}

#[test]
fn drain_only_does_not_sample() {
    let dir = TempDir::new().unwrap();
    let store = mount(&dir);
    prequeue(&store, "7.00");
    prequeue(&store, "8.00");
    let mut h = harness_with(store, ScriptedLink::up(), 80.0, 5);

    let outcome = h.node.drain_only();

    assert_eq!(outcome.promoted, 2);
    assert_eq!(outcome.queued, None);
    assert_eq!(outcome.pending, Some(0));
    assert_eq!(h.node.store().last_record_id().unwrap(), 2);
}

#[test]
fn drain_only_with_critical_battery_shuts_down_untouched() {
    let dir = TempDir::new().unwrap();
    let store = mount(&dir);
    prequeue(&store, "7.00");
    let pending_before = fs::read(store.pending_path()).unwrap();
    let mut h = harness_with(store, ScriptedLink::up(), 4.0, 5);

    let outcome = h.node.drain_only();

    assert_eq!(outcome.status, CycleStatus::Shutdown);
    assert!(outcome.has_event(CycleEventType::Shutdown));
    assert!(h.node.gate().shutdown_requested());
    assert!(h.node.transport().submitted.is_empty());
    assert_eq!(fs::read(h.node.store().pending_path()).unwrap(), pending_before);
    assert!(!h.node.store().sent_path().exists());
}

#[test]
fn pending_line_over_the_size_bound_is_discarded_not_sent() {
    let dir = TempDir::new().unwrap();
    let store = mount(&dir);
    let oversized = format!("1;500;{}", vec!["10.00"; 120].join("|"));
    assert!(oversized.len() > MAX_LINE_LEN);
    store.append_pending(&oversized).unwrap();
    let mut h = harness_with(store, ScriptedLink::up(), 80.0, 5);

    let outcome = h.node.run_cycle();

    assert_eq!(outcome.discarded, 1);
    assert!(outcome.immediate_sent);
    assert_eq!(h.node.store().sent_lines().unwrap(), vec!["1;1000;10.00"]);
    let diag = fs::read_to_string(h.node.store().diag().path()).unwrap();
    assert!(diag.contains("discarded pending record"));
}

type SimulatedNode = RetryController<SensorSampler<SimulatedSource>, ScriptedLink, BatteryGate, NoWait>;

/// A node reporting every channel off the simulated board, with the
/// settings derived from `config` as the binary derives them.
fn simulated_node(dir: &TempDir, config: &NodeConfig, link: ScriptedLink) -> SimulatedNode {
    RetryController::new(
        mount(dir),
        Schema::from_sensors(&config.sensors),
        ControllerSettings::from_config(config),
        config.operating,
        SensorSampler::new(SimulatedSource::seeded(3), config.sensors.clone()),
        link,
        BatteryGate::new(0.0),
        NoWait,
    )
}

#[test]
fn accumulation_too_large_for_a_record_is_rejected_and_cycles_keep_queueing() {
    let dir = TempDir::new().unwrap();
    let mut config = NodeConfig::default();
    // Limits loaded without validation; the controller still bounds them.
    config.limits.max_accumulation = 1_000;
    let link = ScriptedLink::up().then(Outcome::Ack(Ack {
        new_period: None,
        new_accumulation: Some(20),
    }));
    let mut node = simulated_node(&dir, &config, link);

    let first = node.run_cycle();
    assert!(first.immediate_sent);
    assert!(first.has_event(CycleEventType::ParamsRejected));
    assert_eq!(node.params().accumulation, 1);

    for expected in 2..=4 {
        let outcome = node.run_cycle();
        assert_eq!(outcome.queued, Some(RecordId(expected)));
        assert!(!outcome.has_event(CycleEventType::Dropped));
    }
    assert_eq!(node.store().sent_lines().unwrap().len(), 4);
}

#[test]
fn largest_fitting_accumulation_still_encodes_every_channel() {
    let dir = TempDir::new().unwrap();
    let mut config = NodeConfig::default();
    let fit = max_accumulation_for(&config.sensors);
    config.limits.max_accumulation = fit;
    let link = ScriptedLink::up().then(Outcome::Ack(Ack {
        new_period: None,
        new_accumulation: Some(fit),
    }));
    let mut node = simulated_node(&dir, &config, link);

    let first = node.run_cycle();
    assert!(first.has_event(CycleEventType::ParamsUpdated));
    assert_eq!(node.params().accumulation, fit);

    let outcome = node.run_cycle();
    assert_eq!(outcome.queued, Some(RecordId(2)));
    let sent = node.store().sent_lines().unwrap();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].len() <= MAX_LINE_LEN, "{} bytes", sent[1].len());
    let samples = sent[1].split(';').nth(2).unwrap().split('|').count();
    assert_eq!(samples as u32, fit);
}

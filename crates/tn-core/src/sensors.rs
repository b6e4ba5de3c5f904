//! Probe conversions and the sampler built on them.
//!
//! Each [`SensorKind`] maps raw ADC counts (or the per-cycle snapshot) to
//! one [`NamedValue`]. A failed conversion yields a missing value rather
//! than an error, so one dead probe never costs the other channels.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tn_common::{MeasurementFields, NamedValue, SensorKind, SystemSnapshot};
use tracing::{debug, trace};

use crate::ports::{AnalogChannel, AnalogSource, Sampler};

/// Full-scale reading of the 12-bit ADC.
pub const ADC_MAX: u16 = 4095;

/// ADC reference voltage.
pub const ADC_VREF: f64 = 3.3;

const KELVIN_OFFSET: f64 = 273.15;

/// Dissolved-oxygen saturation (mg/L) in fresh water at sea level, every
/// 5 °C from 0 to 40 °C.
const DO_SATURATION: [(f64, f64); 9] = [
    (0.0, 14.62),
    (5.0, 12.77),
    (10.0, 11.29),
    (15.0, 10.08),
    (20.0, 9.09),
    (25.0, 8.26),
    (30.0, 7.56),
    (35.0, 6.95),
    (40.0, 6.41),
];

/// Single-cell Li-ion open-circuit voltage to state of charge.
const BATTERY_CURVE: [(f64, f64); 7] = [
    (3.30, 0.0),
    (3.60, 10.0),
    (3.70, 30.0),
    (3.80, 55.0),
    (3.90, 75.0),
    (4.00, 88.0),
    (4.20, 100.0),
];

/// Board and probe constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Fixed resistor above the thermistor in the divider.
    pub series_resistor_ohms: f64,
    /// Steinhart-Hart coefficients of the thermistor.
    pub steinhart_a: f64,
    pub steinhart_b: f64,
    pub steinhart_c: f64,
    /// Conductivity per volt of probe output at the reference temperature.
    pub ec_per_volt: f64,
    /// Linear temperature compensation coefficient, per °C.
    pub ec_temp_coefficient: f64,
    /// Probe output in millivolts at 100 % saturation.
    pub do_saturation_mv: f64,
    /// Battery divider ratio (battery volts per ADC volt).
    pub battery_divider: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            series_resistor_ohms: 10_000.0,
            steinhart_a: 1.009_249_522e-3,
            steinhart_b: 2.378_405_444e-4,
            steinhart_c: 2.019_202_697e-7,
            ec_per_volt: 1_000.0,
            ec_temp_coefficient: 0.02,
            do_saturation_mv: 1_600.0,
            battery_divider: 2.0,
        }
    }
}

fn counts_to_volts(counts: u16) -> f64 {
    f64::from(counts.min(ADC_MAX)) / f64::from(ADC_MAX) * ADC_VREF
}

/// Linear interpolation over a table sorted by its first column, clamped
/// at both ends.
fn interpolate(table: &[(f64, f64)], x: f64) -> Option<f64> {
    let (first, last) = (table.first()?, table.last()?);
    if x <= first.0 {
        return Some(first.1);
    }
    if x >= last.0 {
        return Some(last.1);
    }
    table.windows(2).find_map(|w| {
        let ((x0, y0), (x1, y1)) = (w[0], w[1]);
        (x >= x0 && x <= x1).then(|| y0 + (y1 - y0) * (x - x0) / (x1 - x0))
    })
}

/// Thermistor counts to °C through the Steinhart-Hart equation.
///
/// A rail reading (0 or full scale) means an open or shorted probe.
pub fn thermistor_celsius(counts: u16, cal: &Calibration) -> Option<f64> {
    if counts == 0 || counts >= ADC_MAX {
        return None;
    }
    let c = f64::from(counts);
    let resistance = cal.series_resistor_ohms * c / (f64::from(ADC_MAX) - c);
    let ln_r = resistance.ln();
    let inv_t = cal.steinhart_a + cal.steinhart_b * ln_r + cal.steinhart_c * ln_r.powi(3);
    let celsius = 1.0 / inv_t - KELVIN_OFFSET;
    celsius.is_finite().then_some(celsius)
}

/// Probe counts to conductivity compensated to 25 °C.
///
/// Without a water temperature the reading is reported uncompensated.
pub fn conductivity_us_cm(counts: u16, temperature_c: Option<f64>, cal: &Calibration) -> Option<f64> {
    let raw = counts_to_volts(counts) * cal.ec_per_volt;
    let factor = temperature_c
        .map(|t| 1.0 + cal.ec_temp_coefficient * (t - 25.0))
        .unwrap_or(1.0);
    (factor > 0.0).then(|| raw / factor)
}

/// Saturation concentration at a water temperature, from the table.
pub fn do_saturation_mg_l(temperature_c: f64) -> Option<f64> {
    interpolate(&DO_SATURATION, temperature_c)
}

/// Galvanic probe counts to dissolved oxygen.
pub fn dissolved_oxygen_mg_l(counts: u16, temperature_c: Option<f64>, cal: &Calibration) -> Option<f64> {
    let millivolts = counts_to_volts(counts) * 1_000.0;
    let saturation = do_saturation_mg_l(temperature_c.unwrap_or(25.0))?;
    Some(saturation * millivolts / cal.do_saturation_mv)
}

pub fn battery_volts(counts: u16, cal: &Calibration) -> f64 {
    counts_to_volts(counts) * cal.battery_divider
}

pub fn battery_percent(volts: f64) -> Option<f64> {
    interpolate(&BATTERY_CURVE, volts)
}

/// Sampler over a closed set of channels read through an [`AnalogSource`].
#[derive(Debug)]
pub struct SensorSampler<A> {
    source: A,
    sensors: Vec<SensorKind>,
    calibration: Calibration,
}

impl<A: AnalogSource> SensorSampler<A> {
    pub fn new(source: A, sensors: Vec<SensorKind>) -> Self {
        SensorSampler {
            source,
            sensors,
            calibration: Calibration::default(),
        }
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn sensors(&self) -> &[SensorKind] {
        &self.sensors
    }

    fn water_temperature(&mut self) -> Option<f64> {
        self.source
            .read_counts(AnalogChannel::Thermistor)
            .and_then(|c| thermistor_celsius(c, &self.calibration))
    }

    /// One reading of a single channel.
    pub fn sample(&mut self, kind: SensorKind, snapshot: &SystemSnapshot) -> NamedValue {
        let cal = self.calibration;
        let snapshot_temp = snapshot.last_temperature_c.map(f64::from);
        let value = match kind {
            SensorKind::Temperature => self.water_temperature(),
            SensorKind::Conductivity => self
                .source
                .read_counts(AnalogChannel::Conductivity)
                .and_then(|c| conductivity_us_cm(c, snapshot_temp, &cal)),
            SensorKind::DissolvedOxygen => self
                .source
                .read_counts(AnalogChannel::DissolvedOxygen)
                .and_then(|c| dissolved_oxygen_mg_l(c, snapshot_temp, &cal)),
            SensorKind::BatteryPercent => snapshot.battery_percent.map(f64::from),
            SensorKind::BatteryVoltage => snapshot.battery_voltage.map(f64::from),
            SensorKind::Signal => snapshot.known_signal().map(f64::from),
        };
        trace!(sensor = %kind, ?value, "channel sampled");
        let value = value.filter(|v| {
            let plausible = kind.accepts(*v);
            if !plausible {
                debug!(sensor = %kind, value = *v, "reading outside plausible range, reporting missing");
            }
            plausible
        });
        NamedValue::new(kind.name(), value, kind.unit()).with_precision(kind.precision())
    }
}

impl<A: AnalogSource> Sampler for SensorSampler<A> {
    fn snapshot(&mut self) -> SystemSnapshot {
        let mut snapshot = SystemSnapshot::at(self.source.uptime_ms());
        if let Some(counts) = self.source.read_counts(AnalogChannel::BatteryDivider) {
            let volts = battery_volts(counts, &self.calibration);
            if let Some(percent) = battery_percent(volts) {
                snapshot = snapshot.with_battery(percent as f32, volts as f32);
            }
        }
        if let Some(csq) = self.source.signal_quality() {
            snapshot = snapshot.with_signal(csq);
        }
        if let Some(t) = self.water_temperature() {
            snapshot = snapshot.with_temperature(t as f32);
        }
        snapshot
    }

    fn read_all(&mut self, snapshot: &SystemSnapshot) -> MeasurementFields {
        let sensors = self.sensors.clone();
        MeasurementFields::new(sensors.into_iter().map(|k| self.sample(k, snapshot)).collect())
    }
}

/// Nominal counts of a healthy probe board in 15 °C water on a charged
/// battery.
const NOMINAL_COUNTS: [(AnalogChannel, u16); 4] = [
    (AnalogChannel::Thermistor, 2_500),
    (AnalogChannel::Conductivity, 620),
    (AnalogChannel::DissolvedOxygen, 1_860),
    (AnalogChannel::BatteryDivider, 2_420),
];

/// Noisy stand-in for the probe board, for bench runs without hardware.
#[derive(Debug)]
pub struct SimulatedSource {
    rng: StdRng,
    boot: Instant,
    noise_counts: u16,
    battery_drain_per_read: u16,
    battery_offset: u16,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Reproducible readings for tests and demos.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        SimulatedSource {
            rng,
            boot: Instant::now(),
            noise_counts: 12,
            battery_drain_per_read: 0,
            battery_offset: 0,
        }
    }

    /// Lower the battery reading by `counts` on every battery read.
    pub fn with_battery_drain(mut self, counts: u16) -> Self {
        self.battery_drain_per_read = counts;
        self
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalogSource for SimulatedSource {
    fn uptime_ms(&mut self) -> u32 {
        u32::try_from(self.boot.elapsed().as_millis()).unwrap_or(u32::MAX)
    }

    fn read_counts(&mut self, channel: AnalogChannel) -> Option<u16> {
        let nominal = NOMINAL_COUNTS
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, n)| *n)?;
        let nominal = if channel == AnalogChannel::BatteryDivider {
            self.battery_offset = self.battery_offset.saturating_add(self.battery_drain_per_read);
            nominal.saturating_sub(self.battery_offset)
        } else {
            nominal
        };
        let noise = i32::from(self.noise_counts);
        let jitter = self.rng.random_range(-noise..=noise);
        let counts = (i32::from(nominal) + jitter).clamp(0, i32::from(ADC_MAX));
        u16::try_from(counts).ok()
    }

    fn signal_quality(&mut self) -> Option<u8> {
        Some(self.rng.random_range(8..=24))
    }
}

//! Fuzz target for persisted record lines.
//!
//! Decoding must never panic, and any line that decodes must encode back
//! to a line that decodes to the same record.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tn_common::SensorKind;
use tn_queue::{decode, encode, Schema};

#[derive(Debug, Arbitrary)]
struct Input {
    /// Bit mask over the known channels.
    channels: u8,
    line: String,
}

fuzz_target!(|input: Input| {
    let sensors: Vec<SensorKind> = SensorKind::ALL
        .iter()
        .enumerate()
        .filter(|(i, _)| input.channels & (1 << i) != 0)
        .map(|(_, k)| *k)
        .collect();
    let schema = Schema::from_sensors(&sensors);

    if let Ok(record) = decode(&input.line, &schema) {
        if let Ok(line) = encode(&record) {
            let again = decode(&line, &schema).expect("re-encoded line must decode");
            assert_eq!(again, record);
        }
    }
});

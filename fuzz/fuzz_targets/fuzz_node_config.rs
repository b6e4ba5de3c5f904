//! Fuzz target for node.json parsing and validation.
//!
//! Tests that config parsing and semantic validation handle arbitrary
//! input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tn_config::{validate_config, NodeConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = serde_json::from_slice::<NodeConfig>(data) {
        let _ = validate_config(&config);
    }
});

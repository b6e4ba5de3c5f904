//! Fuzz target for backend reply interpretation.
//!
//! The reply body is untrusted; interpreting it must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tn_core::transport::{interpret_reply, parse_reply_params};

fuzz_target!(|data: &str| {
    let _ = parse_reply_params(data);
    let _ = interpret_reply("200 OK", data);
});

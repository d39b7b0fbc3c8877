//! Fuzz target for single log entry decoding.
//!
//! This tests that `decode_entry` never panics on arbitrary input; it may
//! only return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_applier::entry::decode_entry;

fuzz_target!(|data: &[u8]| {
    let _ = decode_entry(data);
});

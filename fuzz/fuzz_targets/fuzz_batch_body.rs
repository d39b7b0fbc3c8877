//! Fuzz target for tail batch body decoding.
//!
//! Bodies come off the wire as newline-delimited JSON with optional
//! carriage returns and a NUL sentinel; `decode_batch_body` must handle
//! arbitrary byte soup without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_applier::entry::decode_batch_body;

fuzz_target!(|data: &[u8]| {
    if let Ok(entries) = decode_batch_body(data) {
        for entry in entries {
            // Accessors must hold up on anything that decoded
            let _ = entry.document_key();
            let _ = entry.is_system_collection();
            let _ = entry.raw_truncated(64);
        }
    }
});

#![no_main]
//! Fuzz target for the bug report wire decoder.
//!
//! The decoder is the hub's only surface exposed to the open network, so
//! no byte sequence may panic it. Inputs that happen to decode are
//! re-encoded and must reproduce their wire bytes exactly.

use libfuzzer_sys::fuzz_target;
use vopr_core::wire::{BugReport, REPORT_WIRE_SIZE};

fuzz_target!(|data: &[u8]| {
    let Ok(report) = BugReport::decode(data) else {
        return; // Expected for most fuzz inputs.
    };

    // Accepted input must round-trip byte-for-byte.
    assert_eq!(&report.encode()[..], &data[..REPORT_WIRE_SIZE]);

    // And the re-encoded form must decode to the same report.
    assert_eq!(BugReport::decode(&report.encode()), Ok(report));
});

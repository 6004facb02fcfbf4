//! Fuzz target for change event decoding.
//!
//! Arbitrary bytes must decode to an event or an error, never a panic, and
//! anything that decodes must re-encode to the same event.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_sink::codec::{decode, encode};

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = decode(data) {
        let payload = encode(&event, false).expect("decoded event must re-encode");
        let again = decode(&payload).expect("re-encoded event must decode");
        assert_eq!(again, event);
    }
});

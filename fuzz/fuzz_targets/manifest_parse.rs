//! Fuzz target for bundle manifest parsing.
//!
//! Feeds arbitrary bytes through manifest deserialization and the structural
//! checks the importer runs before touching the dataset store.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shrinkwatch::bundle::fuzz_parse_manifest;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_manifest(data);
});
